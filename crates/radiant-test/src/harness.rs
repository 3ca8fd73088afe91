//! Headless final renders and visual regression testing.
//!
//! Renders go through the same [`FinalRenderJob`] the application uses, driven
//! to completion on the calling thread.

use image::{ImageBuffer, Rgba, RgbaImage};
use radiant_trace::{
    Camera, CpuPathTracer, FinalRenderConfig, FinalRenderJob, JobStatus, ProgressiveTracer,
    RenderedImage, SceneData, TracerBackend,
};
use tracing::info;

use crate::{Result, TestError, VisualTestConfig};

/// Drives final renders without a window.
pub struct HeadlessRenderer {
    tracer: Box<dyn ProgressiveTracer>,
    job: FinalRenderJob,
}

impl HeadlessRenderer {
    /// Renderer backed by the CPU reference tracer.
    pub fn cpu() -> Self {
        Self::with_tracer(Box::new(CpuPathTracer::new()))
    }

    pub fn with_tracer(tracer: Box<dyn ProgressiveTracer>) -> Self {
        Self {
            tracer,
            job: FinalRenderJob::new(),
        }
    }

    /// Renderer on the first Vulkan device.
    ///
    /// Uses the hardware tracer when `prefer_hardware` is set and the device
    /// supports it, the compute tracer otherwise.
    #[cfg(feature = "vulkan")]
    pub fn gpu(prefer_hardware: bool) -> Result<Self> {
        use std::sync::Arc;

        let context = radiant_gpu::GpuContextBuilder::new()
            .app_name("radiant-test")
            .validation(true)
            .ray_tracing(prefer_hardware)
            .build()
            .map_err(|e| TestError::Gpu(e.to_string()))?;
        let context = Arc::new(context);

        if prefer_hardware {
            let hardware = radiant_rtx::HardwareRayTracer::new(Arc::clone(&context));
            if hardware.is_ready() {
                return Ok(Self::with_tracer(Box::new(hardware)));
            }
        }
        let compute = radiant_trace::ComputePathTracer::new(context);
        if let Some(reason) = compute.failure_reason() {
            tracing::warn!(%reason, "Compute tracer is not ready; renders will fail");
        }
        Ok(Self::with_tracer(Box::new(compute)))
    }

    pub fn backend(&self) -> TracerBackend {
        self.tracer.backend()
    }

    /// The job of the most recent render.
    pub fn job(&self) -> &FinalRenderJob {
        &self.job
    }

    /// Render `scene` to completion and return the final image.
    pub fn render(
        &mut self,
        config: FinalRenderConfig,
        camera: &Camera,
        scene: &SceneData,
    ) -> Result<RenderedImage> {
        self.render_with_progress(config, camera, scene, |_| {})
    }

    /// Like [`render`](Self::render), calling `on_step` after every unit of work.
    pub fn render_with_progress(
        &mut self,
        config: FinalRenderConfig,
        camera: &Camera,
        scene: &SceneData,
        mut on_step: impl FnMut(&FinalRenderJob),
    ) -> Result<RenderedImage> {
        if !self.job.start(config, camera, scene, self.tracer.as_mut()) {
            return Err(self.render_error());
        }
        while self.job.render_sample(self.tracer.as_mut()) {
            on_step(&self.job);
        }

        match (self.job.status(), self.job.result()) {
            (JobStatus::Completed, Some(image)) => Ok(image.clone()),
            _ => Err(self.render_error()),
        }
    }

    fn render_error(&self) -> TestError {
        TestError::Render(
            self.job
                .last_error()
                .map_or_else(|| format!("job ended as {:?}", self.job.status()), str::to_string),
        )
    }
}

/// Convert a final render into an `image` buffer.
pub fn to_rgba(image: &RenderedImage) -> Result<RgbaImage> {
    ImageBuffer::from_raw(image.width, image.height, image.pixels.clone())
        .ok_or_else(|| TestError::Render("Pixel buffer does not match image size".to_string()))
}

/// Normalized RGB difference of two images, in `[0, 1]`.
pub fn image_difference(a: &RgbaImage, b: &RgbaImage) -> Result<f64> {
    if a.dimensions() != b.dimensions() {
        return Err(TestError::ImageComparison(format!(
            "Image dimensions don't match: {:?} vs {:?}",
            a.dimensions(),
            b.dimensions()
        )));
    }

    let total_diff: u64 = a
        .pixels()
        .zip(b.pixels())
        .map(|(pa, pb)| {
            pa.0[..3]
                .iter()
                .zip(&pb.0[..3])
                .map(|(x, y)| u64::from(x.abs_diff(*y)))
                .sum::<u64>()
        })
        .sum();

    let max_diff = u64::from(a.width()) * u64::from(a.height()) * 3 * 255;
    if max_diff == 0 {
        return Ok(0.0);
    }
    Ok(total_diff as f64 / max_diff as f64)
}

/// Image highlighting differing pixels in red over a dimmed copy of `a`.
pub fn diff_image(a: &RgbaImage, b: &RgbaImage) -> RgbaImage {
    let (width, height) = a.dimensions();
    let mut diff = ImageBuffer::new(width, height);

    for (x, y, pixel) in diff.enumerate_pixels_mut() {
        let pa = a.get_pixel(x, y);
        let Some(pb) = b.get_pixel_checked(x, y) else {
            *pixel = Rgba([255, 0, 0, 255]);
            continue;
        };

        let max_diff = (0..3).map(|c| pa[c].abs_diff(pb[c])).max().unwrap_or(0);
        *pixel = if max_diff > 10 {
            Rgba([255, 0, 0, 255])
        } else {
            Rgba([pa[0] / 2, pa[1] / 2, pa[2] / 2, 255])
        };
    }

    diff
}

/// Visual regression test runner.
///
/// Compares renders against baseline images. A missing baseline is created
/// from the current render.
pub struct VisualRegressionTest {
    config: VisualTestConfig,
    renderer: HeadlessRenderer,
}

impl VisualRegressionTest {
    pub fn new(config: VisualTestConfig, renderer: HeadlessRenderer) -> Self {
        Self { config, renderer }
    }

    pub fn renderer(&mut self) -> &mut HeadlessRenderer {
        &mut self.renderer
    }

    /// Render a scene and compare it with the baseline called `name`.
    pub fn run_test(
        &mut self,
        name: &str,
        config: FinalRenderConfig,
        camera: &Camera,
        scene: &SceneData,
    ) -> Result<()> {
        let rendered = self.renderer.render(config, camera, scene)?;
        self.compare_and_save(name, &to_rgba(&rendered)?)
    }

    fn compare_and_save(&self, name: &str, image: &RgbaImage) -> Result<()> {
        std::fs::create_dir_all(&self.config.baseline_dir)?;
        std::fs::create_dir_all(&self.config.output_dir)?;

        let file = format!("{name}.png");
        let baseline_path = self.config.baseline_dir.join(&file);
        let output_path = self.config.output_dir.join(&file);

        image.save(&output_path)?;

        if !baseline_path.exists() {
            image.save(&baseline_path)?;
            info!(path = %baseline_path.display(), "Created new baseline");
            return Ok(());
        }

        let baseline = image::open(&baseline_path)?.to_rgba8();
        let diff = image_difference(&baseline, image)?;
        if diff > self.config.threshold {
            let diff_path = self.config.output_dir.join(format!("{name}_diff.png"));
            diff_image(&baseline, image).save(&diff_path)?;

            return Err(TestError::ImageComparison(format!(
                "Image difference {diff:.4} exceeds threshold {:.4} (see {})",
                self.config.threshold,
                diff_path.display()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenes;
    use radiant_trace::Tonemap;

    fn linear(width: u32, height: u32, samples: u32) -> FinalRenderConfig {
        FinalRenderConfig::default()
            .with_size(width, height)
            .with_samples(samples)
            .with_tonemap(Tonemap::None)
            .with_gamma(1.0)
    }

    #[test]
    fn constant_radiance_end_to_end() {
        let mut renderer = HeadlessRenderer::cpu();
        let image = renderer
            .render(linear(64, 64, 4), &scenes::front_camera(), &scenes::constant_wall(0.5))
            .unwrap();

        assert_eq!((image.width, image.height), (64, 64));
        assert!(image.pixels.chunks(4).all(|p| p == [128, 128, 128, 255]));
        assert_eq!(renderer.job().status(), JobStatus::Completed);
        assert_eq!(renderer.job().samples_done(), 4);
    }

    #[test]
    fn progress_callback_sees_monotonic_progress() {
        let mut renderer = HeadlessRenderer::cpu();
        let mut seen = Vec::new();
        renderer
            .render_with_progress(
                linear(40, 40, 3),
                &scenes::front_camera(),
                &scenes::constant_wall(0.25),
                |job| seen.push(job.progress()),
            )
            .unwrap();

        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert!(seen.iter().all(|p| (0.0..1.0).contains(p)));
    }

    #[test]
    fn flattened_material_matches_hand_built_scene() {
        let graph = scenes::emission_graph([1.0, 1.0, 1.0], 0.5).unwrap();
        let mut renderer = HeadlessRenderer::cpu();
        let camera = scenes::front_camera();

        let from_graph = renderer
            .render(linear(16, 16, 2), &camera, &scenes::material_preview(&graph))
            .unwrap();
        let by_hand = renderer
            .render(linear(16, 16, 2), &camera, &scenes::constant_wall(0.5))
            .unwrap();

        let diff = image_difference(&to_rgba(&from_graph).unwrap(), &to_rgba(&by_hand).unwrap());
        assert_eq!(diff.unwrap(), 0.0);
    }

    #[test]
    fn transparent_background_keeps_coverage_in_alpha() {
        let mut renderer = HeadlessRenderer::cpu();
        let config = linear(8, 8, 2).with_transparent_background(true);
        let image = renderer
            .render(config, &scenes::front_camera(), &scenes::half_wall(1.0))
            .unwrap();

        assert_eq!(image.pixel(0, 4)[3], 255);
        assert_eq!(image.pixel(7, 4)[3], 0);
    }

    #[test]
    fn cornell_box_receives_light() {
        let (scene, camera) = scenes::cornell_box();
        let mut renderer = HeadlessRenderer::cpu();
        let image = renderer
            .render(FinalRenderConfig::default().with_size(32, 32).with_samples(4), &camera, &scene)
            .unwrap();

        let lit = image.pixels.chunks(4).filter(|p| p[..3].iter().any(|&c| c > 0)).count();
        assert!(lit > 0);
        assert!(image.pixels.chunks(4).all(|p| p[3] == 255));
    }

    #[test]
    fn invalid_config_is_reported() {
        let mut renderer = HeadlessRenderer::cpu();
        let result = renderer.render(
            linear(0, 16, 1),
            &scenes::front_camera(),
            &scenes::constant_wall(1.0),
        );
        assert!(matches!(result, Err(TestError::Render(_))));
        assert_eq!(renderer.job().status(), JobStatus::Failed);
    }

    #[test]
    fn image_difference_measures_rgb_only() {
        let a = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255]));
        let mut b = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 0]));
        assert_eq!(image_difference(&a, &b).unwrap(), 0.0);

        b.put_pixel(0, 0, Rgba([255, 255, 255, 0]));
        let diff = image_difference(&a, &b).unwrap();
        assert!((diff - 0.25).abs() < 1e-9);

        let small = RgbaImage::new(1, 1);
        assert!(matches!(
            image_difference(&a, &small),
            Err(TestError::ImageComparison(_))
        ));
        assert_eq!(*diff_image(&a, &b).get_pixel(0, 0), Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn regression_creates_then_checks_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let config = VisualTestConfig {
            threshold: 0.001,
            baseline_dir: dir.path().join("baselines"),
            output_dir: dir.path().join("output"),
        };
        let mut test = VisualRegressionTest::new(config, HeadlessRenderer::cpu());
        let camera = scenes::front_camera();

        test.run_test("wall", linear(8, 8, 1), &camera, &scenes::constant_wall(0.5))
            .unwrap();
        assert!(dir.path().join("baselines/wall.png").exists());
        test.run_test("wall", linear(8, 8, 1), &camera, &scenes::constant_wall(0.5))
            .unwrap();

        let result = test.run_test("wall", linear(8, 8, 1), &camera, &scenes::constant_wall(1.0));
        assert!(matches!(result, Err(TestError::ImageComparison(_))));
        assert!(dir.path().join("output/wall_diff.png").exists());
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    #[cfg(feature = "vulkan")]
    fn gpu_constant_radiance_end_to_end() {
        let mut renderer = HeadlessRenderer::gpu(false).unwrap();
        assert_eq!(renderer.backend(), TracerBackend::Compute);
        let image = renderer
            .render(linear(64, 64, 4), &scenes::front_camera(), &scenes::constant_wall(0.5))
            .unwrap();
        assert!(image.pixels.chunks(4).all(|p| p == [128, 128, 128, 255]));
    }
}
