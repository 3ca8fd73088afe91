//! Final (offline) renders driven one unit of work per call.
//!
//! A [`FinalRenderJob`] is reused across runs. The caller drives it with
//! [`FinalRenderJob::render_sample`] once per frame (or in a loop) until it
//! returns `false`.

use crate::camera::Camera;
use crate::export::save_image;
use crate::frame::RenderedImage;
use crate::post::{self, PostSettings};
use crate::scene::SceneData;
use crate::settings::{BounceLimits, Denoiser, RenderSettings, Tonemap, TraceParams};
use crate::tiles::{TileGrid, TILE_SIZE};
use crate::tracer::{AccumulationImage, ProgressiveTracer, TraceError, TraceRequest};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Lifecycle of a final render.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JobStatus {
    #[default]
    Idle,
    Rendering,
    Completed,
    Cancelled,
    Failed,
}

/// Settings for one final render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalRenderConfig {
    pub width: u32,
    pub height: u32,
    pub samples: u32,
    pub max_bounces: u32,
    pub exposure: f32,
    pub tonemap: Tonemap,
    pub gamma: f32,
    pub denoiser: Denoiser,
    pub denoise_strength: f32,
    pub denoise_radius: u32,
    /// Written when the render completes; PNG unless the extension says otherwise.
    pub output_path: Option<PathBuf>,
    pub prefer_hardware: bool,
    pub transparent_background: bool,
}

impl Default for FinalRenderConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            samples: 128,
            max_bounces: 8,
            exposure: 1.0,
            tonemap: Tonemap::Aces,
            gamma: 2.2,
            denoiser: Denoiser::None,
            denoise_strength: 1.0,
            denoise_radius: 2,
            output_path: None,
            prefer_hardware: true,
            transparent_background: false,
        }
    }
}

impl FinalRenderConfig {
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_samples(mut self, samples: u32) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_max_bounces(mut self, bounces: u32) -> Self {
        self.max_bounces = bounces;
        self
    }

    pub fn with_exposure(mut self, exposure: f32) -> Self {
        self.exposure = exposure;
        self
    }

    pub fn with_tonemap(mut self, tonemap: Tonemap) -> Self {
        self.tonemap = tonemap;
        self
    }

    pub fn with_gamma(mut self, gamma: f32) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn with_denoiser(mut self, denoiser: Denoiser, strength: f32, radius: u32) -> Self {
        self.denoiser = denoiser;
        self.denoise_strength = strength;
        self.denoise_radius = radius;
        self
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn with_prefer_hardware(mut self, prefer: bool) -> Self {
        self.prefer_hardware = prefer;
        self
    }

    pub fn with_transparent_background(mut self, transparent: bool) -> Self {
        self.transparent_background = transparent;
        self
    }

    pub fn validate(&self) -> Result<(), TraceError> {
        let invalid = |msg: &str| Err(TraceError::InvalidConfig(msg.to_string()));
        if self.width == 0 || self.height == 0 {
            return invalid("image size must be non-zero");
        }
        if self.samples == 0 {
            return invalid("sample count must be non-zero");
        }
        if self.max_bounces > 255 {
            return invalid("at most 255 bounces are supported");
        }
        if !self.exposure.is_finite() || self.exposure < 0.0 {
            return invalid("exposure must be finite and non-negative");
        }
        if !self.gamma.is_finite() || self.gamma <= 0.0 {
            return invalid("gamma must be positive");
        }
        Ok(())
    }

    pub fn trace_params(&self) -> TraceParams {
        let defaults = RenderSettings::default();
        TraceParams {
            bounces: BounceLimits::uniform(self.max_bounces),
            clamp_direct: defaults.clamp_direct(),
            clamp_indirect: defaults.clamp_indirect(),
            transparent_background: self.transparent_background,
        }
    }

    pub fn post_settings(&self) -> PostSettings {
        PostSettings {
            exposure: self.exposure,
            tonemap: self.tonemap,
            gamma: self.gamma,
            denoiser: self.denoiser,
            denoise_strength: self.denoise_strength,
            denoise_radius: self.denoise_radius,
            transparent_background: self.transparent_background,
        }
    }
}

/// The tracer's previous write target while the job owns it.
struct Redirect {
    displaced: Option<AccumulationImage>,
}

/// Tiled, cancellable final render.
pub struct FinalRenderJob {
    status: JobStatus,
    config: FinalRenderConfig,
    request: Option<TraceRequest>,
    cancel_requested: Arc<AtomicBool>,
    redirect: Option<Redirect>,
    tiles: TileGrid,
    use_regions: bool,
    tile_index: usize,
    samples_done: u32,
    progress: f32,
    started: Option<Instant>,
    finished: Option<Instant>,
    last_error: Option<String>,
    result: Option<RenderedImage>,
}

impl Default for FinalRenderJob {
    fn default() -> Self {
        Self::new()
    }
}

impl FinalRenderJob {
    pub fn new() -> Self {
        Self {
            status: JobStatus::Idle,
            config: FinalRenderConfig::default(),
            request: None,
            cancel_requested: Arc::new(AtomicBool::new(false)),
            redirect: None,
            tiles: TileGrid::single(0, 0),
            use_regions: false,
            tile_index: 0,
            samples_done: 0,
            progress: 0.0,
            started: None,
            finished: None,
            last_error: None,
            result: None,
        }
    }

    /// Begin a render. Returns `false` if the job could not start; a job
    /// already rendering is left untouched.
    #[tracing::instrument(skip_all, fields(width = config.width, height = config.height, samples = config.samples))]
    pub fn start(
        &mut self,
        config: FinalRenderConfig,
        camera: &Camera,
        scene: &SceneData,
        tracer: &mut dyn ProgressiveTracer,
    ) -> bool {
        if self.status == JobStatus::Rendering {
            warn!("Final render already in progress");
            return false;
        }

        // 1. Fresh state
        self.cancel_requested.store(false, Ordering::Relaxed);
        self.request = None;
        self.tile_index = 0;
        self.samples_done = 0;
        self.progress = 0.0;
        self.started = Some(Instant::now());
        self.finished = None;
        self.last_error = None;
        self.result = None;
        self.config = config;

        // 2. Preconditions
        if let Err(e) = self.config.validate() {
            return self.fail_start(&e);
        }
        if !tracer.is_ready() {
            return self.fail_start(&TraceError::NotReady);
        }

        // 3. Scene upload
        if let Err(e) = tracer.update_scene(scene) {
            return self.fail_start(&e);
        }

        // 4. Write target
        let (width, height) = (self.config.width, self.config.height);
        if tracer.supports_external_accumulation() {
            let installed = tracer
                .create_accumulation_image(width, height)
                .and_then(|image| tracer.set_external_accumulation(Some(image)));
            match installed {
                Ok(displaced) => self.redirect = Some(Redirect { displaced }),
                Err(e) => return self.fail_start(&e),
            }
        }
        tracer.reset_accumulation();

        // 5. Work layout
        self.use_regions = tracer.supports_regions();
        self.tiles = if self.use_regions {
            TileGrid::new(width, height, TILE_SIZE)
        } else {
            TileGrid::single(width, height)
        };

        let camera = camera.with_image_size(width, height);
        self.request = Some(TraceRequest::new(
            camera.uniforms(),
            width,
            height,
            self.config.trace_params(),
        ));
        self.status = JobStatus::Rendering;

        info!(
            backend = ?tracer.backend(),
            tiles = self.tiles.len(),
            redirected = self.redirect.is_some(),
            "Final render started"
        );
        true
    }

    /// Do one tile (or one full sample). Returns `false` once the job is no
    /// longer rendering.
    pub fn render_sample(&mut self, tracer: &mut dyn ProgressiveTracer) -> bool {
        if self.status != JobStatus::Rendering {
            return false;
        }

        if self.cancel_requested.load(Ordering::Relaxed) {
            self.release_redirect(tracer);
            self.status = JobStatus::Cancelled;
            self.finished = Some(Instant::now());
            info!(samples = self.samples_done, "Final render cancelled");
            return false;
        }

        let Some(request) = self.request else {
            self.fail(tracer, &TraceError::NotReady);
            return false;
        };

        let traced = if self.use_regions {
            match self.tiles.get(self.tile_index) {
                Some(tile) => tracer.trace_region(&request, tile, self.samples_done),
                None => Err(TraceError::InvalidConfig("tile index out of range".to_string())),
            }
        } else {
            tracer.trace(&request)
        };
        if let Err(e) = traced {
            self.fail(tracer, &e);
            return false;
        }

        self.tile_index += 1;
        if self.tile_index >= self.tiles.len() {
            self.tile_index = 0;
            self.samples_done += 1;
            debug!(sample = self.samples_done, total = self.config.samples, "Sample complete");
        }
        self.update_progress();

        if self.samples_done >= self.config.samples {
            self.finish(tracer);
            return false;
        }
        true
    }

    /// Ask the job to stop at the next `render_sample`.
    pub fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::Relaxed);
    }

    /// Shared flag for cancelling from another thread.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel_requested)
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn is_rendering(&self) -> bool {
        self.status == JobStatus::Rendering
    }

    pub fn config(&self) -> &FinalRenderConfig {
        &self.config
    }

    /// Fraction complete in `[0, 1]`; never decreases during a run.
    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn samples_done(&self) -> u32 {
        self.samples_done
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn result(&self) -> Option<&RenderedImage> {
        self.result.as_ref()
    }

    pub fn elapsed(&self) -> Duration {
        match (self.started, self.finished) {
            (Some(start), Some(end)) => end.duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    /// Remaining time extrapolated from progress so far.
    pub fn eta(&self) -> Option<Duration> {
        if self.status != JobStatus::Rendering || self.progress <= 0.0 {
            return None;
        }
        let elapsed = self.elapsed().as_secs_f32();
        Some(Duration::from_secs_f32(
            elapsed * (1.0 - self.progress) / self.progress,
        ))
    }

    fn update_progress(&mut self) {
        let tiles = self.tiles.len().max(1) as f32;
        let done = self.samples_done as f32 + self.tile_index as f32 / tiles;
        let fraction = (done / self.config.samples.max(1) as f32).min(1.0);
        self.progress = self.progress.max(fraction);
    }

    fn finish(&mut self, tracer: &mut dyn ProgressiveTracer) {
        let hdr = match tracer.read_accumulation() {
            Ok(hdr) => hdr,
            Err(e) => {
                self.fail(tracer, &e);
                return;
            }
        };
        let image = post::process(&hdr, self.samples_done, &self.config.post_settings());

        if let Err(e) = tracer.present(&image) {
            warn!(error = %e, "Failed to present final render");
        }

        let redirected = self.redirect.is_some();
        self.release_redirect(tracer);
        if !redirected {
            // The job's samples live in the tracer's own image
            tracer.reset_accumulation();
        }
        self.finished = Some(Instant::now());

        if let Some(path) = &self.config.output_path {
            if let Err(e) = save_image(&image, path) {
                error!(path = %path.display(), error = %e, "Final render export failed");
                self.last_error = Some(e.to_string());
                self.result = Some(image);
                self.status = JobStatus::Failed;
                return;
            }
        }

        self.result = Some(image);
        self.progress = 1.0;
        self.status = JobStatus::Completed;
        info!(
            samples = self.samples_done,
            elapsed_ms = self.elapsed().as_millis() as u64,
            "Final render completed"
        );
    }

    /// Give the tracer back its previous write target and free the job's image.
    fn release_redirect(&mut self, tracer: &mut dyn ProgressiveTracer) {
        let Some(redirect) = self.redirect.take() else {
            return;
        };
        match tracer.set_external_accumulation(redirect.displaced) {
            Ok(Some(own)) => tracer.destroy_accumulation_image(own),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to restore accumulation target"),
        }
    }

    fn fail(&mut self, tracer: &mut dyn ProgressiveTracer, e: &TraceError) {
        error!(error = %e, "Final render failed");
        self.release_redirect(tracer);
        self.last_error = Some(e.to_string());
        self.finished = Some(Instant::now());
        self.status = JobStatus::Failed;
    }

    fn fail_start(&mut self, e: &TraceError) -> bool {
        error!(error = %e, "Final render could not start");
        self.last_error = Some(e.to_string());
        self.finished = Some(Instant::now());
        self.status = JobStatus::Failed;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuPathTracer;
    use crate::frame::HdrImage;
    use crate::tiles::TileRect;
    use crate::tracer::{Result, TracerBackend};
    use glam::Vec3;
    use radiant_core::{Environment, Light, Material, Triangle};

    fn constant_scene(radiance: f32) -> SceneData {
        let a = Vec3::new(-100.0, -100.0, -1.0);
        let b = Vec3::new(100.0, -100.0, -1.0);
        let c = Vec3::new(100.0, 100.0, -1.0);
        let d = Vec3::new(-100.0, 100.0, -1.0);
        SceneData::new(
            vec![Triangle::flat(a, b, c, 0), Triangle::flat(a, c, d, 0)],
            vec![Material::emissive(Vec3::splat(radiance))],
        )
    }

    fn camera() -> Camera {
        Camera::look_at(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y, 1.0, 1.0)
    }

    fn linear_config(width: u32, height: u32, samples: u32) -> FinalRenderConfig {
        FinalRenderConfig::default()
            .with_size(width, height)
            .with_samples(samples)
            .with_tonemap(Tonemap::None)
            .with_gamma(1.0)
    }

    fn run(job: &mut FinalRenderJob, tracer: &mut dyn ProgressiveTracer) {
        let mut guard = 0;
        while job.render_sample(tracer) {
            guard += 1;
            assert!(guard < 10_000, "job never finished");
        }
    }

    /// Full-frame only tracer that records what the job asked of it.
    #[derive(Default)]
    struct RecordingTracer {
        traces: u32,
        resets: u32,
        samples: u32,
        fail_after: Option<u32>,
        presented: bool,
    }

    impl ProgressiveTracer for RecordingTracer {
        fn backend(&self) -> TracerBackend {
            TracerBackend::Hardware
        }
        fn is_ready(&self) -> bool {
            true
        }
        fn supports_regions(&self) -> bool {
            false
        }
        fn supports_external_accumulation(&self) -> bool {
            false
        }
        fn update_scene(&mut self, _: &SceneData) -> Result<()> {
            Ok(())
        }
        fn update_lights(&mut self, _: &[Light], _: &Environment) -> Result<()> {
            Ok(())
        }
        fn trace(&mut self, _: &TraceRequest) -> Result<()> {
            if self.fail_after == Some(self.traces) {
                return Err(TraceError::Unsupported("injected failure"));
            }
            self.traces += 1;
            self.samples += 1;
            Ok(())
        }
        fn trace_region(&mut self, _: &TraceRequest, _: TileRect, _: u32) -> Result<()> {
            Err(TraceError::Unsupported("regions"))
        }
        fn reset_accumulation(&mut self) {
            self.resets += 1;
            self.samples = 0;
        }
        fn sample_count(&self) -> u32 {
            self.samples
        }
        fn create_accumulation_image(&mut self, _: u32, _: u32) -> Result<AccumulationImage> {
            Err(TraceError::Unsupported("external accumulation"))
        }
        fn destroy_accumulation_image(&mut self, _: AccumulationImage) {}
        fn set_external_accumulation(
            &mut self,
            _: Option<AccumulationImage>,
        ) -> Result<Option<AccumulationImage>> {
            Err(TraceError::Unsupported("external accumulation"))
        }
        fn has_external_accumulation(&self) -> bool {
            false
        }
        fn read_accumulation(&mut self) -> Result<HdrImage> {
            let mut image = HdrImage::new(2, 2);
            let v = self.samples as f32;
            image.pixels.fill([v, v, v, v]);
            Ok(image)
        }
        fn present(&mut self, _: &RenderedImage) -> Result<()> {
            self.presented = true;
            Ok(())
        }
    }

    #[test]
    fn constant_radiance_renders_to_128() {
        let mut tracer = CpuPathTracer::new();
        let mut job = FinalRenderJob::new();
        assert!(job.start(linear_config(64, 64, 4), &camera(), &constant_scene(0.5), &mut tracer));
        assert!(tracer.has_external_accumulation());

        run(&mut job, &mut tracer);

        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.progress(), 1.0);
        assert_eq!(job.samples_done(), 4);
        let image = job.result().unwrap();
        assert_eq!((image.width, image.height), (64, 64));
        assert!(image.pixels.chunks(4).all(|p| p == [128, 128, 128, 255]));
        assert_eq!(tracer.presented(), Some(image));
        assert!(!tracer.has_external_accumulation());
    }

    #[test]
    fn cancel_releases_redirection() {
        let mut tracer = CpuPathTracer::new();
        let mut job = FinalRenderJob::new();
        assert!(job.start(linear_config(32, 32, 16), &camera(), &constant_scene(1.0), &mut tracer));
        assert!(job.render_sample(&mut tracer));

        job.cancel();
        assert!(!job.render_sample(&mut tracer));
        assert_eq!(job.status(), JobStatus::Cancelled);
        assert!(!tracer.has_external_accumulation());
        assert!(job.result().is_none());
        assert!(!job.render_sample(&mut tracer));
    }

    #[test]
    fn displaced_image_is_restored() {
        let mut tracer = CpuPathTracer::new();
        let viewport_image = tracer.create_accumulation_image(8, 8).unwrap();
        tracer.set_external_accumulation(Some(viewport_image)).unwrap();

        let mut job = FinalRenderJob::new();
        assert!(job.start(linear_config(16, 16, 2), &camera(), &constant_scene(1.0), &mut tracer));
        run(&mut job, &mut tracer);

        assert_eq!(job.status(), JobStatus::Completed);
        assert!(tracer.has_external_accumulation());
        let restored = tracer.read_accumulation().unwrap();
        assert_eq!((restored.width, restored.height), (8, 8));
    }

    #[test]
    fn progress_is_monotonic_across_tiles() {
        let mut tracer = CpuPathTracer::new();
        let mut job = FinalRenderJob::new();
        assert!(job.start(linear_config(300, 260, 2), &camera(), &constant_scene(1.0), &mut tracer));

        let mut previous = job.progress();
        let mut calls = 0;
        while job.render_sample(&mut tracer) {
            calls += 1;
            assert!(job.progress() >= previous);
            assert!(job.progress() < 1.0);
            previous = job.progress();
        }
        // 2x2 tiles per sample; the last call finishes the job
        assert_eq!(calls + 1, 8);
        assert_eq!(job.progress(), 1.0);
    }

    #[test]
    fn second_start_is_refused_while_rendering() {
        let mut tracer = CpuPathTracer::new();
        let mut job = FinalRenderJob::new();
        assert!(job.start(linear_config(16, 16, 4), &camera(), &constant_scene(1.0), &mut tracer));
        assert!(!job.start(linear_config(8, 8, 1), &camera(), &constant_scene(1.0), &mut tracer));
        assert_eq!(job.status(), JobStatus::Rendering);
        assert_eq!(job.config().width, 16);

        run(&mut job, &mut tracer);
        assert_eq!(job.status(), JobStatus::Completed);
        assert!(job.start(linear_config(8, 8, 1), &camera(), &constant_scene(1.0), &mut tracer));
    }

    #[test]
    fn invalid_config_fails_to_start() {
        let mut tracer = CpuPathTracer::new();
        let mut job = FinalRenderJob::new();
        assert!(!job.start(linear_config(0, 16, 4), &camera(), &constant_scene(1.0), &mut tracer));
        assert_eq!(job.status(), JobStatus::Failed);
        assert!(job.last_error().is_some());
        assert!(!tracer.has_external_accumulation());
    }

    #[test]
    fn full_frame_backends_are_paced_per_sample() {
        let mut tracer = RecordingTracer::default();
        let mut job = FinalRenderJob::new();
        assert!(job.start(linear_config(2, 2, 3), &camera(), &constant_scene(1.0), &mut tracer));
        assert_eq!(tracer.resets, 1);

        run(&mut job, &mut tracer);
        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(tracer.traces, 3);
        assert!(tracer.presented);
        // Own image reset after the job so the viewport starts over
        assert_eq!(tracer.resets, 2);
        // Three samples of value 3 average to 1.0
        assert_eq!(job.result().unwrap().pixel(0, 0), [255, 255, 255, 255]);
    }

    #[test]
    fn trace_failure_marks_job_failed() {
        let mut tracer = RecordingTracer {
            fail_after: Some(1),
            ..RecordingTracer::default()
        };
        let mut job = FinalRenderJob::new();
        assert!(job.start(linear_config(2, 2, 4), &camera(), &constant_scene(1.0), &mut tracer));
        run(&mut job, &mut tracer);
        assert_eq!(job.status(), JobStatus::Failed);
        assert!(job.last_error().unwrap().contains("injected failure"));
    }

    #[test]
    fn completed_render_is_exported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("final.png");
        let mut tracer = CpuPathTracer::new();
        let mut job = FinalRenderJob::new();
        let config = linear_config(8, 8, 1).with_output_path(&path);
        assert!(job.start(config, &camera(), &constant_scene(0.5), &mut tracer));
        run(&mut job, &mut tracer);

        assert_eq!(job.status(), JobStatus::Completed);
        let loaded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(loaded.get_pixel(3, 3).0, [128, 128, 128, 255]);
    }

    #[test]
    fn config_validation_and_trace_params() {
        let config = FinalRenderConfig::default();
        assert!(config.validate().is_ok());
        assert!(FinalRenderConfig::default().with_samples(0).validate().is_err());
        assert!(FinalRenderConfig::default().with_gamma(0.0).validate().is_err());
        assert_eq!(config.trace_params().bounces, BounceLimits::uniform(8));
    }
}
