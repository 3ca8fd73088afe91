//! Scene snapshot handed to the tracers and its GPU packing.
//!
//! Layouts match the std430 declarations in `common.glsl`.

use crate::camera::CameraUniforms;
use crate::settings::TraceParams;
use crate::tiles::TileRect;
use bytemuck::{Pod, Zeroable};
use radiant_core::{Environment, Light, LightKind, Material, Triangle};

/// Geometry, materials and lighting for one scene snapshot.
#[derive(Debug, Clone, Default)]
pub struct SceneData {
    pub triangles: Vec<Triangle>,
    pub materials: Vec<Material>,
    pub lights: Vec<Light>,
    pub environment: Environment,
}

impl SceneData {
    pub fn new(triangles: Vec<Triangle>, materials: Vec<Material>) -> Self {
        Self {
            triangles,
            materials,
            ..Self::default()
        }
    }

    pub fn with_lights(mut self, lights: Vec<Light>) -> Self {
        self.lights = lights;
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// True when there is no geometry to trace.
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Material for a triangle's index, clamped like the shaders clamp it.
    pub fn material(&self, index: u32) -> Material {
        resolve_material(&self.materials, index)
    }
}

/// Out-of-range indices resolve to the last material; no materials at all
/// resolve to the default one.
pub(crate) fn resolve_material(materials: &[Material], index: u32) -> Material {
    materials
        .get(index as usize)
        .or_else(|| materials.last())
        .copied()
        .unwrap_or_default()
}

/// GPU triangle: positions and normals, padded to 16-byte rows (96 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GpuTriangle {
    pub v0: [f32; 3],
    pub material: u32,
    pub v1: [f32; 3],
    pub _pad0: u32,
    pub v2: [f32; 3],
    pub _pad1: u32,
    pub n0: [f32; 3],
    pub _pad2: u32,
    pub n1: [f32; 3],
    pub _pad3: u32,
    pub n2: [f32; 3],
    pub _pad4: u32,
}

impl GpuTriangle {
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

impl From<&Triangle> for GpuTriangle {
    fn from(tri: &Triangle) -> Self {
        let [p0, p1, p2] = tri.positions;
        let [n0, n1, n2] = tri.normals;
        Self {
            v0: p0.to_array(),
            material: tri.material,
            v1: p1.to_array(),
            v2: p2.to_array(),
            n0: n0.to_array(),
            n1: n1.to_array(),
            n2: n2.to_array(),
            ..Self::zeroed()
        }
    }
}

/// GPU material (48 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GpuMaterial {
    /// rgb = base color, a = metallic
    pub base_color_metallic: [f32; 4],
    /// rgb = emitted radiance, a = roughness
    pub emission_roughness: [f32; 4],
    /// x = opacity, y = ior
    pub opacity_ior_pad: [f32; 4],
}

impl GpuMaterial {
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

impl From<&Material> for GpuMaterial {
    fn from(m: &Material) -> Self {
        let emission = m.emission();
        Self {
            base_color_metallic: m.base_color.extend(m.metallic).to_array(),
            emission_roughness: emission.extend(m.roughness).to_array(),
            opacity_ior_pad: [m.opacity, m.ior, 0.0, 0.0],
        }
    }
}

/// GPU light (32 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GpuLight {
    /// xyz = position or direction, w = 0 point / 1 directional
    pub position_kind: [f32; 4],
    /// rgb = color, a = intensity
    pub color_intensity: [f32; 4],
}

impl GpuLight {
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

impl From<&Light> for GpuLight {
    fn from(light: &Light) -> Self {
        let position_kind = match light.kind {
            LightKind::Point { position } => position.extend(0.0),
            LightKind::Directional { direction } => direction.extend(1.0),
        };
        Self {
            position_kind: position_kind.to_array(),
            color_intensity: light.color.extend(light.intensity).to_array(),
        }
    }
}

/// Pack triangles in the given order (BVH leaf order for the compute tracer).
pub fn pack_triangles(triangles: &[Triangle], order: Option<&[u32]>) -> Vec<GpuTriangle> {
    match order {
        Some(order) => order
            .iter()
            .map(|&i| GpuTriangle::from(&triangles[i as usize]))
            .collect(),
        None => triangles.iter().map(GpuTriangle::from).collect(),
    }
}

/// Pack materials, always producing at least one entry.
pub fn pack_materials(materials: &[Material]) -> Vec<GpuMaterial> {
    if materials.is_empty() {
        return vec![GpuMaterial::from(&Material::default())];
    }
    materials.iter().map(GpuMaterial::from).collect()
}

/// Pack the light buffer: one row of environment radiance followed by the lights.
///
/// The shaders only see the constant environment term; equirectangular maps
/// are sampled by the CPU tracer alone.
pub fn pack_lights(lights: &[Light], environment: &Environment) -> Vec<u8> {
    let env = (environment.color * environment.intensity).extend(0.0).to_array();
    let packed: Vec<GpuLight> = lights.iter().map(GpuLight::from).collect();

    let mut bytes = Vec::with_capacity(16 + packed.len() * GpuLight::SIZE);
    bytes.extend_from_slice(bytemuck::bytes_of(&env));
    bytes.extend_from_slice(bytemuck::cast_slice(&packed));
    bytes
}

/// Push constants shared by the compute and hardware tracers (128 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct TracePushConstants {
    pub camera: CameraUniforms,
    /// offset.xy, size.xy
    pub region: [u32; 4],
    /// image size.xy, sample index, flags
    pub frame: [u32; 4],
    /// packed bounce limits, light count, node count, triangle count
    pub limits: [u32; 4],
    /// direct clamp, indirect clamp
    pub clamps: [f32; 4],
}

impl TracePushConstants {
    pub const SIZE: u32 = std::mem::size_of::<Self>() as u32;
    pub const FLAG_TRANSPARENT: u32 = 1;

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        camera: &CameraUniforms,
        params: &TraceParams,
        region: TileRect,
        width: u32,
        height: u32,
        sample_index: u32,
        light_count: u32,
        node_count: u32,
        triangle_count: u32,
    ) -> Self {
        let flags = if params.transparent_background {
            Self::FLAG_TRANSPARENT
        } else {
            0
        };
        Self {
            camera: *camera,
            region: [region.x, region.y, region.width, region.height],
            frame: [width, height, sample_index, flags],
            limits: [params.bounces.pack(), light_count, node_count, triangle_count],
            clamps: [params.clamp_direct, params.clamp_indirect, 0.0, 0.0],
        }
    }
}
