//! Live preview driver: one progressive sample per frame.

use crate::camera::{Camera, CameraUniforms};
use crate::settings::{RenderMode, RenderSettings, TraceParams};
use crate::tracer::{ProgressiveTracer, Result, TraceRequest};
use tracing::trace;

/// Drives a tracer from the frame loop and restarts accumulation when the
/// view changes.
#[derive(Debug, Default)]
pub struct ViewportRenderer {
    last_camera: Option<CameraUniforms>,
    last_size: (u32, u32),
}

impl ViewportRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the last view so the next frame restarts accumulation.
    pub fn invalidate(&mut self) {
        self.last_camera = None;
    }

    /// Run one frame. Returns `true` when a sample was traced.
    ///
    /// A tracer with no geometry accumulates nothing, so the frame does not
    /// count toward the viewport target.
    pub fn render_frame(
        &mut self,
        tracer: &mut dyn ProgressiveTracer,
        settings: &mut RenderSettings,
        camera: &Camera,
        width: u32,
        height: u32,
    ) -> Result<bool> {
        if width == 0 || height == 0 {
            return Ok(false);
        }

        let uniforms = camera.with_image_size(width, height).uniforms();
        if self.last_camera != Some(uniforms) || self.last_size != (width, height) {
            self.last_camera = Some(uniforms);
            self.last_size = (width, height);
            settings.request_reset();
        }

        if settings.take_reset() {
            tracer.reset_accumulation();
        }

        if settings.mode() == RenderMode::Simple || settings.is_converged() || !tracer.is_ready() {
            return Ok(false);
        }

        let request = TraceRequest::new(uniforms, width, height, TraceParams::from_settings(settings));
        let before = tracer.sample_count();
        tracer.trace(&request)?;
        if tracer.sample_count() == before {
            return Ok(false);
        }
        settings.record_sample();
        trace!(samples = settings.accumulated_samples(), "Viewport sample traced");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuPathTracer;
    use crate::scene::SceneData;
    use crate::settings::BounceLimits;
    use glam::Vec3;
    use radiant_core::{Material, Triangle};

    fn setup() -> (CpuPathTracer, RenderSettings, Camera) {
        let mut tracer = CpuPathTracer::new();
        let scene = SceneData::new(
            vec![Triangle::flat(
                Vec3::new(-50.0, -50.0, -1.0),
                Vec3::new(50.0, -50.0, -1.0),
                Vec3::new(0.0, 50.0, -1.0),
                0,
            )],
            vec![Material::emissive(Vec3::ONE)],
        );
        tracer.update_scene(&scene).unwrap();
        let settings = RenderSettings::new().with_viewport_samples(3);
        let camera = Camera::look_at(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y, 0.5, 1.0);
        (tracer, settings, camera)
    }

    #[test]
    fn stops_when_converged() {
        let (mut tracer, mut settings, camera) = setup();
        let mut viewport = ViewportRenderer::new();
        let mut traced = 0;
        for _ in 0..6 {
            if viewport.render_frame(&mut tracer, &mut settings, &camera, 8, 8).unwrap() {
                traced += 1;
            }
        }
        assert_eq!(traced, 3);
        assert!(settings.is_converged());
        assert_eq!(tracer.sample_count(), 3);
    }

    #[test]
    fn camera_move_restarts_accumulation() {
        let (mut tracer, mut settings, mut camera) = setup();
        let mut viewport = ViewportRenderer::new();
        for _ in 0..3 {
            viewport.render_frame(&mut tracer, &mut settings, &camera, 8, 8).unwrap();
        }
        assert!(settings.is_converged());

        camera.position.x += 0.1;
        assert!(viewport.render_frame(&mut tracer, &mut settings, &camera, 8, 8).unwrap());
        assert_eq!(settings.accumulated_samples(), 1);
        assert_eq!(tracer.sample_count(), 1);
    }

    #[test]
    fn settings_change_restarts_accumulation() {
        let (mut tracer, mut settings, camera) = setup();
        let mut viewport = ViewportRenderer::new();
        viewport.render_frame(&mut tracer, &mut settings, &camera, 8, 8).unwrap();
        viewport.render_frame(&mut tracer, &mut settings, &camera, 8, 8).unwrap();
        assert_eq!(tracer.sample_count(), 2);

        settings.set_bounces(BounceLimits::uniform(2));
        viewport.render_frame(&mut tracer, &mut settings, &camera, 8, 8).unwrap();
        assert_eq!(tracer.sample_count(), 1);
    }

    #[test]
    fn empty_scene_does_not_advance_progress() {
        let mut tracer = CpuPathTracer::new();
        let mut settings = RenderSettings::new().with_viewport_samples(3);
        let camera = Camera::look_at(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y, 0.5, 1.0);
        let mut viewport = ViewportRenderer::new();
        for _ in 0..5 {
            assert!(!viewport.render_frame(&mut tracer, &mut settings, &camera, 8, 8).unwrap());
        }
        assert_eq!(settings.accumulated_samples(), 0);
        assert!(!settings.is_converged());

        let (mut loaded, _, _) = setup();
        assert!(viewport.render_frame(&mut loaded, &mut settings, &camera, 8, 8).unwrap());
        assert_eq!(settings.accumulated_samples(), 1);
    }

    #[test]
    fn simple_mode_never_traces() {
        let (mut tracer, mut settings, camera) = setup();
        settings.set_mode(RenderMode::Simple);
        let mut viewport = ViewportRenderer::new();
        assert!(!viewport.render_frame(&mut tracer, &mut settings, &camera, 8, 8).unwrap());
        assert_eq!(tracer.sample_count(), 0);
    }
}
