//! Shaders for the Radiant renderer.
//!
//! GLSL sources are always embedded so the material compiler can splice the
//! prelude into generated code. SPIR-V for the fixed pipelines is compiled at
//! build time with shaderc behind the `compile` and `ray_tracing` features.

#[cfg(feature = "compile")]
use std::sync::OnceLock;

/// Descriptor bindings shared by the compute and hardware tracers (set 0).
pub mod bindings {
    /// Accumulation storage image, `rgba32f`.
    pub const ACCUMULATION: u32 = 0;
    /// Flat BVH node buffer (compute tracer only).
    pub const BVH_NODES: u32 = 1;
    /// Top-level acceleration structure (hardware tracer only).
    pub const ACCELERATION_STRUCTURE: u32 = 1;
    pub const TRIANGLES: u32 = 2;
    pub const MATERIALS: u32 = 3;
    /// Environment color followed by the light array.
    pub const LIGHTS: u32 = 4;
}

/// Size in bytes of the `TraceConstants` push constant block.
pub const TRACE_PUSH_CONSTANTS_SIZE: u32 = 128;

/// Local workgroup size of `path_trace.comp` in both dimensions.
pub const COMPUTE_WORKGROUP_SIZE: u32 = 8;

/// GLSL sources.
pub mod glsl {
    pub const COMMON: &str = include_str!("../shaders/common.glsl");
    pub const PATH_TRACE_COMP: &str = include_str!("../shaders/path_trace.comp");
    pub const PATH_TRACE_RGEN: &str = include_str!("../shaders/rt/path_trace.rgen");
    pub const PATH_TRACE_RMISS: &str = include_str!("../shaders/rt/path_trace.rmiss");
    pub const SHADOW_RMISS: &str = include_str!("../shaders/rt/shadow.rmiss");
    pub const PATH_TRACE_RCHIT: &str = include_str!("../shaders/rt/path_trace.rchit");
    pub const SHADOW_RCHIT: &str = include_str!("../shaders/rt/shadow.rchit");
    pub const MATERIAL_MESH_VERT: &str = include_str!("../shaders/material_mesh.vert");
    /// Helper functions spliced into every generated material fragment shader.
    pub const MATERIAL_PRELUDE: &str = include_str!("../shaders/material_prelude.glsl");
}

/// Embedded SPIR-V shader bytecode (raw bytes, may not be aligned).
#[cfg(feature = "compile")]
mod spirv_bytes {
    pub static PATH_TRACE_COMP: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/path_trace.spv"));
    pub static MATERIAL_MESH_VERT: &[u8] =
        include_bytes!(concat!(env!("OUT_DIR"), "/material_mesh_vert.spv"));

    #[cfg(feature = "ray_tracing")]
    pub static PATH_TRACE_RGEN: &[u8] =
        include_bytes!(concat!(env!("OUT_DIR"), "/path_trace_rgen.spv"));
    #[cfg(feature = "ray_tracing")]
    pub static PATH_TRACE_RMISS: &[u8] =
        include_bytes!(concat!(env!("OUT_DIR"), "/path_trace_rmiss.spv"));
    #[cfg(feature = "ray_tracing")]
    pub static SHADOW_RMISS: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/shadow_rmiss.spv"));
    #[cfg(feature = "ray_tracing")]
    pub static PATH_TRACE_RCHIT: &[u8] =
        include_bytes!(concat!(env!("OUT_DIR"), "/path_trace_rchit.spv"));
    #[cfg(feature = "ray_tracing")]
    pub static SHADOW_RCHIT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/shadow_rchit.spv"));
}

/// Convert a byte slice to aligned SPIR-V words.
///
/// Trailing bytes that do not form a full word are dropped; shaderc output is
/// always word-sized.
pub fn bytes_to_spirv(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(feature = "compile")]
static PATH_TRACE_SPIRV: OnceLock<Vec<u32>> = OnceLock::new();
#[cfg(feature = "compile")]
static MATERIAL_MESH_VERT_SPIRV: OnceLock<Vec<u32>> = OnceLock::new();

/// Compute path tracer as SPIR-V words.
#[cfg(feature = "compile")]
pub fn path_trace_shader() -> &'static [u32] {
    PATH_TRACE_SPIRV.get_or_init(|| bytes_to_spirv(spirv_bytes::PATH_TRACE_COMP))
}

/// Material mesh vertex stage as SPIR-V words.
#[cfg(feature = "compile")]
pub fn material_mesh_vertex_shader() -> &'static [u32] {
    MATERIAL_MESH_VERT_SPIRV.get_or_init(|| bytes_to_spirv(spirv_bytes::MATERIAL_MESH_VERT))
}

/// SPIR-V for every stage of the hardware ray tracing pipeline.
#[cfg(feature = "ray_tracing")]
pub struct RayTracingShaders {
    pub raygen: &'static [u32],
    pub miss: &'static [u32],
    pub shadow_miss: &'static [u32],
    pub closest_hit: &'static [u32],
    pub shadow_closest_hit: &'static [u32],
}

#[cfg(feature = "ray_tracing")]
static RAY_TRACING_SPIRV: OnceLock<[Vec<u32>; 5]> = OnceLock::new();

/// Get the hardware ray tracing stages.
#[cfg(feature = "ray_tracing")]
pub fn ray_tracing_shaders() -> RayTracingShaders {
    let [raygen, miss, shadow_miss, closest_hit, shadow_closest_hit] =
        RAY_TRACING_SPIRV.get_or_init(|| {
            [
                bytes_to_spirv(spirv_bytes::PATH_TRACE_RGEN),
                bytes_to_spirv(spirv_bytes::PATH_TRACE_RMISS),
                bytes_to_spirv(spirv_bytes::SHADOW_RMISS),
                bytes_to_spirv(spirv_bytes::PATH_TRACE_RCHIT),
                bytes_to_spirv(spirv_bytes::SHADOW_RCHIT),
            ]
        });
    RayTracingShaders {
        raygen,
        miss,
        shadow_miss,
        closest_hit,
        shadow_closest_hit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_to_spirv_is_little_endian() {
        let words = bytes_to_spirv(&[0x03, 0x02, 0x23, 0x07, 0xFF]);
        assert_eq!(words, vec![0x0723_0203]);
    }

    #[test]
    fn sources_declare_shared_bindings() {
        for binding in [
            bindings::ACCUMULATION,
            bindings::TRIANGLES,
            bindings::MATERIALS,
            bindings::LIGHTS,
        ] {
            assert!(
                glsl::COMMON.contains(&format!("binding = {binding}")),
                "common.glsl lacks binding {binding}"
            );
        }
        assert!(glsl::PATH_TRACE_COMP.contains(&format!("binding = {}", bindings::BVH_NODES)));
        assert!(glsl::PATH_TRACE_RGEN
            .contains(&format!("binding = {}", bindings::ACCELERATION_STRUCTURE)));
    }

    #[test]
    fn compute_workgroup_size_matches_source() {
        let decl = format!(
            "local_size_x = {0}, local_size_y = {0}",
            COMPUTE_WORKGROUP_SIZE
        );
        assert!(glsl::PATH_TRACE_COMP.contains(&decl));
    }

    #[test]
    fn prelude_defines_surface_helpers() {
        for name in ["surface_emission", "mix_surface", "shade_surface", "shade_volume"] {
            assert!(glsl::MATERIAL_PRELUDE.contains(name), "missing {name}");
        }
    }

    #[cfg(feature = "compile")]
    #[test]
    fn path_trace_shader_loads() {
        let shader = path_trace_shader();
        assert_eq!(shader[0], 0x0723_0203, "Invalid SPIR-V magic number");
        assert!(shader.len() > 100, "Shader too small");
    }

    #[cfg(feature = "ray_tracing")]
    #[test]
    fn ray_tracing_shaders_load() {
        let shaders = ray_tracing_shaders();
        for stage in [
            shaders.raygen,
            shaders.miss,
            shaders.shadow_miss,
            shaders.closest_hit,
            shaders.shadow_closest_hit,
        ] {
            assert_eq!(stage[0], 0x0723_0203, "Invalid SPIR-V magic number");
        }
    }
}
