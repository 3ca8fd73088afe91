//! CPU reference path tracer.
//!
//! Runs the same path construction as the GPU shaders: identical RNG,
//! bounce bookkeeping, next-event estimation and Russian roulette. Rows are
//! traced in parallel with rayon.

use crate::bvh::Bvh;
use crate::frame::{HdrImage, RenderedImage};
use crate::scene::{resolve_material, SceneData};
use crate::settings::TraceParams;
use crate::tiles::TileRect;
use crate::tracer::{
    AccumulationImage, ProgressiveTracer, Result, TraceError, TraceRequest, TracerBackend,
};
use glam::{Vec3, Vec4};
use hashbrown::HashMap;
use radiant_core::constants::{RAY_EPSILON, T_MAX};
use radiant_core::{Environment, Light, LightKind, Material, Ray, Triangle};
use rayon::prelude::*;
use std::f32::consts::PI;
use tracing::{debug, info};

/// PCG hash used by every tracer for per-pixel random streams.
#[inline]
pub fn pcg_hash(v: u32) -> u32 {
    let state = v.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    let word = ((state >> ((state >> 28) + 4)) ^ state).wrapping_mul(277_803_737);
    (word >> 22) ^ word
}

struct Rng(u32);

impl Rng {
    fn for_pixel(x: u32, y: u32, width: u32, sample_index: u32) -> Self {
        Self(pcg_hash(y.wrapping_mul(width).wrapping_add(x) ^ pcg_hash(sample_index)))
    }

    #[inline]
    fn next_f32(&mut self) -> f32 {
        self.0 = pcg_hash(self.0);
        (self.0 >> 8) as f32 * (1.0 / 16_777_216.0)
    }
}

fn clamp_contribution(c: Vec3, limit: f32) -> Vec3 {
    if limit <= 0.0 {
        return c;
    }
    let m = c.max_element();
    if m > limit {
        c * (limit / m)
    } else {
        c
    }
}

fn sample_cosine(n: Vec3, rng: &mut Rng) -> Vec3 {
    let r1 = rng.next_f32();
    let r2 = rng.next_f32();
    let phi = 2.0 * PI * r1;
    let r = r2.sqrt();
    let t = if n.x.abs() > 0.9 {
        n.cross(Vec3::Y)
    } else {
        n.cross(Vec3::X)
    }
    .normalize();
    let b = n.cross(t);
    (t * (r * phi.cos()) + b * (r * phi.sin()) + n * (1.0 - r2).max(0.0).sqrt()).normalize()
}

fn random_in_sphere(rng: &mut Rng) -> Vec3 {
    let z = 1.0 - 2.0 * rng.next_f32();
    let phi = 2.0 * PI * rng.next_f32();
    let r = (1.0 - z * z).max(0.0).sqrt();
    Vec3::new(r * phi.cos(), r * phi.sin(), z) * rng.next_f32()
}

#[derive(Default)]
struct CpuScene {
    bvh: Bvh,
    triangles: Vec<Triangle>,
    materials: Vec<Material>,
    lights: Vec<Light>,
    environment: Environment,
}

impl CpuScene {
    fn direct_light(&self, p: Vec3, n: Vec3, albedo: Vec3) -> Vec3 {
        let mut sum = Vec3::ZERO;
        for light in &self.lights {
            let (dir, dist, falloff) = match light.kind {
                LightKind::Point { position } => {
                    let d = position - p;
                    let dist = d.length();
                    (d / dist.max(1.0e-6), dist, 1.0 / (dist * dist).max(1.0e-6))
                }
                LightKind::Directional { direction } => {
                    (-direction.normalize_or_zero(), T_MAX, 1.0)
                }
            };
            let cos_theta = n.dot(dir);
            if cos_theta <= 0.0 {
                continue;
            }
            let shadow = Ray::new(p + n * RAY_EPSILON, dir);
            if self.bvh.occluded(&self.triangles, &shadow, dist - RAY_EPSILON) {
                continue;
            }
            sum += albedo * (1.0 / PI) * cos_theta * light.color * light.intensity * falloff;
        }
        sum
    }

    /// Trace one path through pixel `(x, y)`; returns radiance and alpha.
    fn trace_pixel(
        &self,
        request: &TraceRequest,
        x: u32,
        y: u32,
        sample_index: u32,
    ) -> Vec4 {
        let params = &request.params;
        let limits = params.bounces;
        let mut rng = Rng::for_pixel(x, y, request.width, sample_index);

        let u = (x as f32 + rng.next_f32()) / request.width as f32;
        let v = (y as f32 + rng.next_f32()) / request.height as f32;
        let mut ray = request.camera.ray(u, v);

        let mut radiance = Vec3::ZERO;
        let mut throughput = Vec3::ONE;
        let mut alpha = 1.0;
        let (mut diffuse, mut glossy, mut transmission) = (0u32, 0u32, 0u32);

        for bounce in 0..=limits.total.min(255) {
            let limit = if bounce == 0 {
                params.clamp_direct
            } else {
                params.clamp_indirect
            };

            let Some(hit) = self.bvh.intersect(&self.triangles, &ray, T_MAX) else {
                if bounce == 0 && params.transparent_background {
                    alpha = 0.0;
                } else {
                    radiance += clamp_contribution(
                        throughput * self.environment.radiance(ray.direction),
                        limit,
                    );
                }
                break;
            };

            let tri = &self.triangles[hit.triangle as usize];
            let material = resolve_material(&self.materials, tri.material);
            let p = ray.at(hit.t);
            let mut n = tri.shading_normal(hit.u, hit.v);
            if n.dot(ray.direction) > 0.0 {
                n = -n;
            }

            radiance += clamp_contribution(throughput * material.emission(), limit);
            if bounce >= limits.total.min(255) {
                break;
            }

            if material.opacity < 1.0 && rng.next_f32() > material.opacity {
                if transmission >= limits.transmission {
                    break;
                }
                transmission += 1;
                ray = Ray::new(p + ray.direction * RAY_EPSILON, ray.direction);
                continue;
            }

            let albedo = material.base_color * (1.0 - material.metallic);
            radiance += clamp_contribution(throughput * self.direct_light(p, n, albedo), limit);

            let direction = if rng.next_f32() < material.metallic {
                if glossy >= limits.glossy {
                    break;
                }
                glossy += 1;
                let reflected = ray.direction - 2.0 * ray.direction.dot(n) * n;
                let d = (reflected + material.roughness * random_in_sphere(&mut rng)).normalize();
                if d.dot(n) <= 0.0 {
                    break;
                }
                d
            } else {
                if diffuse >= limits.diffuse {
                    break;
                }
                diffuse += 1;
                sample_cosine(n, &mut rng)
            };
            throughput *= material.base_color;
            ray = Ray::new(p + n * RAY_EPSILON, direction);

            if throughput.max_element() <= 0.0 {
                break;
            }
            if bounce >= 3 {
                let q = throughput.max_element().clamp(0.05, 1.0);
                if rng.next_f32() > q {
                    break;
                }
                throughput /= q;
            }
        }

        radiance.extend(alpha)
    }
}

struct AccumBuffer {
    width: u32,
    height: u32,
    pixels: Vec<[f32; 4]>,
    needs_clear: bool,
}

impl AccumBuffer {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![[0.0; 4]; width as usize * height as usize],
            needs_clear: false,
        }
    }

    fn clear_if_pending(&mut self) {
        if self.needs_clear {
            self.pixels.fill([0.0; 4]);
            self.needs_clear = false;
        }
    }
}

const INTERNAL_IMAGE: u64 = 0;

/// Path tracer running on the CPU.
///
/// Always ready; supports regions and external accumulation images.
pub struct CpuPathTracer {
    scene: CpuScene,
    images: HashMap<u64, AccumBuffer>,
    external: Option<AccumulationImage>,
    next_image_id: u64,
    sample_count: u32,
    presented: Option<RenderedImage>,
}

impl Default for CpuPathTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuPathTracer {
    pub fn new() -> Self {
        let mut images = HashMap::new();
        images.insert(INTERNAL_IMAGE, AccumBuffer::new(0, 0));
        Self {
            scene: CpuScene::default(),
            images,
            external: None,
            next_image_id: INTERNAL_IMAGE + 1,
            sample_count: 0,
            presented: None,
        }
    }

    /// The last image passed to `present`.
    pub fn presented(&self) -> Option<&RenderedImage> {
        self.presented.as_ref()
    }

    fn active_id(&self) -> u64 {
        self.external.as_ref().map_or(INTERNAL_IMAGE, AccumulationImage::id)
    }

    /// Active image sized for `request`. The internal image follows the
    /// request size; external images must already match.
    fn active_image(&mut self, request: &TraceRequest) -> Result<&mut AccumBuffer> {
        let id = self.active_id();
        let is_internal = id == INTERNAL_IMAGE;
        let image = self.images.get_mut(&id).ok_or(TraceError::UnknownImage(id))?;
        if image.width != request.width || image.height != request.height {
            if !is_internal {
                return Err(TraceError::SizeMismatch {
                    expected: (request.width, request.height),
                    actual: (image.width, image.height),
                });
            }
            debug!(width = request.width, height = request.height, "Resizing accumulation image");
            *image = AccumBuffer::new(request.width, request.height);
            self.sample_count = 0;
        }
        image.clear_if_pending();
        Ok(image)
    }

    fn accumulate(&mut self, request: &TraceRequest, region: TileRect, sample_index: u32) -> Result<()> {
        request.check_region(region)?;
        if self.scene.triangles.is_empty() {
            return Ok(());
        }

        // Split borrows: the scene is read while the image is written
        let id = self.active_id();
        self.active_image(request)?;
        let scene = &self.scene;
        let image = self.images.get_mut(&id).ok_or(TraceError::UnknownImage(id))?;
        let width = image.width as usize;

        image
            .pixels
            .par_chunks_mut(width)
            .enumerate()
            .skip(region.y as usize)
            .take(region.height as usize)
            .for_each(|(y, row)| {
                for x in region.x..region.x + region.width {
                    let sample = scene.trace_pixel(request, x, y as u32, sample_index);
                    let px = &mut row[x as usize];
                    for (acc, s) in px.iter_mut().zip(sample.to_array()) {
                        *acc += s;
                    }
                }
            });
        Ok(())
    }
}

impl ProgressiveTracer for CpuPathTracer {
    fn backend(&self) -> TracerBackend {
        TracerBackend::Cpu
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn supports_regions(&self) -> bool {
        true
    }

    fn supports_external_accumulation(&self) -> bool {
        true
    }

    #[tracing::instrument(skip_all, fields(triangles = scene.triangles.len()))]
    fn update_scene(&mut self, scene: &SceneData) -> Result<()> {
        let bvh = Bvh::build(&scene.triangles);
        self.scene = CpuScene {
            bvh,
            triangles: scene.triangles.clone(),
            materials: scene.materials.clone(),
            lights: scene.lights.clone(),
            environment: scene.environment.clone(),
        };
        info!(
            triangles = scene.triangles.len(),
            materials = scene.materials.len(),
            lights = scene.lights.len(),
            "CPU tracer scene updated"
        );
        self.reset_accumulation();
        Ok(())
    }

    fn update_lights(&mut self, lights: &[Light], environment: &Environment) -> Result<()> {
        self.scene.lights = lights.to_vec();
        self.scene.environment = environment.clone();
        self.reset_accumulation();
        Ok(())
    }

    fn trace(&mut self, request: &TraceRequest) -> Result<()> {
        let sample_index = self.sample_count;
        self.accumulate(request, request.full_region(), sample_index)?;
        if !self.scene.triangles.is_empty() {
            self.sample_count += 1;
        }
        Ok(())
    }

    fn trace_region(
        &mut self,
        request: &TraceRequest,
        region: TileRect,
        sample_index: u32,
    ) -> Result<()> {
        self.accumulate(request, region, sample_index)
    }

    fn reset_accumulation(&mut self) {
        let id = self.active_id();
        if let Some(image) = self.images.get_mut(&id) {
            image.needs_clear = true;
        }
        self.sample_count = 0;
    }

    fn sample_count(&self) -> u32 {
        self.sample_count
    }

    fn create_accumulation_image(&mut self, width: u32, height: u32) -> Result<AccumulationImage> {
        let id = self.next_image_id;
        self.next_image_id += 1;
        self.images.insert(id, AccumBuffer::new(width, height));
        Ok(AccumulationImage::new(id, width, height))
    }

    fn destroy_accumulation_image(&mut self, image: AccumulationImage) {
        self.images.remove(&image.id());
    }

    fn set_external_accumulation(
        &mut self,
        image: Option<AccumulationImage>,
    ) -> Result<Option<AccumulationImage>> {
        if let Some(image) = &image {
            if !self.images.contains_key(&image.id()) || image.id() == INTERNAL_IMAGE {
                return Err(TraceError::UnknownImage(image.id()));
            }
        }
        Ok(std::mem::replace(&mut self.external, image))
    }

    fn has_external_accumulation(&self) -> bool {
        self.external.is_some()
    }

    fn read_accumulation(&mut self) -> Result<HdrImage> {
        let id = self.active_id();
        let image = self.images.get_mut(&id).ok_or(TraceError::UnknownImage(id))?;
        image.clear_if_pending();
        Ok(HdrImage {
            width: image.width,
            height: image.height,
            pixels: image.pixels.clone(),
        })
    }

    fn present(&mut self, image: &RenderedImage) -> Result<()> {
        self.presented = Some(image.clone());
        Ok(())
    }
}
