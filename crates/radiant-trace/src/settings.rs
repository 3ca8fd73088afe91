//! Render settings and progressive accumulation state.

use serde::{Deserialize, Serialize};

/// Which renderer draws the viewport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderMode {
    /// Rasterized preview; never accumulates.
    Simple,
    /// Compute (or CPU) path tracing.
    #[default]
    PathTraced,
    /// Hardware ray tracing.
    RayTraced,
}

/// Tonemapping operator applied after exposure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tonemap {
    /// Clamp to `[0, 1]`.
    None,
    Reinhard,
    #[default]
    Aces,
}

/// CPU denoiser run on the resolved final image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Denoiser {
    #[default]
    None,
    Box,
    /// Edge-aware bilateral filter.
    Bilateral,
}

/// Per-bounce-type path length limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BounceLimits {
    pub diffuse: u32,
    pub glossy: u32,
    pub transmission: u32,
    pub total: u32,
}

impl Default for BounceLimits {
    fn default() -> Self {
        Self {
            diffuse: 4,
            glossy: 4,
            transmission: 8,
            total: 8,
        }
    }
}

impl BounceLimits {
    /// The same limit for every bounce type.
    pub const fn uniform(max: u32) -> Self {
        Self {
            diffuse: max,
            glossy: max,
            transmission: max,
            total: max,
        }
    }

    /// Pack into one word as the shaders read it: total in the low byte, then
    /// diffuse, glossy and transmission. Each limit saturates at 255.
    pub fn pack(&self) -> u32 {
        let byte = |v: u32| v.min(255);
        byte(self.total)
            | (byte(self.diffuse) << 8)
            | (byte(self.glossy) << 16)
            | (byte(self.transmission) << 24)
    }
}

/// Viewport render settings plus the progressive sample counter.
///
/// Fields that invalidate accumulated samples are private and changed
/// through setters that raise the reset flag. Display-only fields are public.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    mode: RenderMode,
    accumulated_samples: u32,
    /// Samples after which the viewport stops tracing.
    pub viewport_samples: u32,
    bounces: BounceLimits,
    clamp_direct: f32,
    clamp_indirect: f32,
    transparent_background: bool,
    pub tonemap: Tonemap,
    pub exposure: f32,
    pub gamma: f32,
    pub denoiser: Denoiser,
    pub denoise_strength: f32,
    pub denoise_radius: u32,
    #[serde(skip)]
    needs_reset: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            mode: RenderMode::default(),
            accumulated_samples: 0,
            viewport_samples: 256,
            bounces: BounceLimits::default(),
            clamp_direct: 0.0,
            clamp_indirect: 10.0,
            transparent_background: false,
            tonemap: Tonemap::default(),
            exposure: 1.0,
            gamma: 2.2,
            denoiser: Denoiser::None,
            denoise_strength: 1.0,
            denoise_radius: 2,
            needs_reset: true,
        }
    }
}

impl RenderSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: RenderMode) -> Self {
        self.set_mode(mode);
        self
    }

    pub fn with_viewport_samples(mut self, samples: u32) -> Self {
        self.viewport_samples = samples;
        self
    }

    pub fn with_bounces(mut self, bounces: BounceLimits) -> Self {
        self.set_bounces(bounces);
        self
    }

    pub fn with_tonemap(mut self, tonemap: Tonemap) -> Self {
        self.tonemap = tonemap;
        self
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    pub fn accumulated_samples(&self) -> u32 {
        self.accumulated_samples
    }

    pub fn bounces(&self) -> BounceLimits {
        self.bounces
    }

    pub fn clamp_direct(&self) -> f32 {
        self.clamp_direct
    }

    pub fn clamp_indirect(&self) -> f32 {
        self.clamp_indirect
    }

    pub fn transparent_background(&self) -> bool {
        self.transparent_background
    }

    pub fn needs_reset(&self) -> bool {
        self.needs_reset
    }

    pub fn set_mode(&mut self, mode: RenderMode) {
        if self.mode != mode {
            self.mode = mode;
            self.needs_reset = true;
        }
    }

    pub fn set_bounces(&mut self, bounces: BounceLimits) {
        if self.bounces != bounces {
            self.bounces = bounces;
            self.needs_reset = true;
        }
    }

    /// Set the per-sample contribution clamps; `0` disables a clamp.
    pub fn set_clamps(&mut self, direct: f32, indirect: f32) {
        let direct = direct.max(0.0);
        let indirect = indirect.max(0.0);
        if self.clamp_direct != direct || self.clamp_indirect != indirect {
            self.clamp_direct = direct;
            self.clamp_indirect = indirect;
            self.needs_reset = true;
        }
    }

    pub fn set_transparent_background(&mut self, transparent: bool) {
        if self.transparent_background != transparent {
            self.transparent_background = transparent;
            self.needs_reset = true;
        }
    }

    /// True once enough samples have accumulated, or always in `Simple` mode.
    pub fn is_converged(&self) -> bool {
        self.mode == RenderMode::Simple || self.accumulated_samples >= self.viewport_samples
    }

    /// Flag that accumulated samples are stale (camera, scene or settings changed).
    pub fn request_reset(&mut self) {
        self.needs_reset = true;
    }

    /// Consume the reset flag. Zeroes the counter and returns true if it was set.
    pub fn take_reset(&mut self) -> bool {
        if self.needs_reset {
            self.needs_reset = false;
            self.accumulated_samples = 0;
            true
        } else {
            false
        }
    }

    pub fn reset_accumulation(&mut self) {
        self.accumulated_samples = 0;
    }

    pub fn record_sample(&mut self) {
        self.accumulated_samples = self.accumulated_samples.saturating_add(1);
    }

    /// Fraction of the viewport target reached, in `[0, 1]`.
    pub fn progress(&self) -> f32 {
        if self.mode == RenderMode::Simple || self.viewport_samples == 0 {
            return 1.0;
        }
        (self.accumulated_samples as f32 / self.viewport_samples as f32).min(1.0)
    }
}

/// Per-trace parameters the tracers read.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TraceParams {
    pub bounces: BounceLimits,
    pub clamp_direct: f32,
    pub clamp_indirect: f32,
    pub transparent_background: bool,
}

impl Default for TraceParams {
    fn default() -> Self {
        Self::from_settings(&RenderSettings::default())
    }
}

impl TraceParams {
    pub fn from_settings(settings: &RenderSettings) -> Self {
        Self {
            bounces: settings.bounces,
            clamp_direct: settings.clamp_direct,
            clamp_indirect: settings.clamp_indirect,
            transparent_background: settings.transparent_background,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_zeroes_counter_and_unconverges() {
        let mut settings = RenderSettings::new().with_viewport_samples(4);
        for _ in 0..4 {
            settings.record_sample();
        }
        assert!(settings.is_converged());

        settings.reset_accumulation();
        assert_eq!(settings.accumulated_samples(), 0);
        assert!(!settings.is_converged());
    }

    #[test]
    fn convergence_threshold() {
        let mut settings = RenderSettings::new().with_viewport_samples(3);
        assert!(!settings.is_converged());
        for expected in [false, false, true, true] {
            settings.record_sample();
            assert_eq!(settings.is_converged(), expected);
        }
    }

    #[test]
    fn simple_mode_is_always_converged() {
        let mut settings = RenderSettings::new()
            .with_mode(RenderMode::Simple)
            .with_viewport_samples(100);
        assert!(settings.is_converged());
        settings.reset_accumulation();
        assert!(settings.is_converged());
        assert_eq!(settings.progress(), 1.0);
    }

    #[test]
    fn sample_invalidating_setters_raise_reset() {
        let mut settings = RenderSettings::new();
        settings.take_reset();
        assert!(!settings.needs_reset());

        settings.set_bounces(BounceLimits::uniform(2));
        assert!(settings.take_reset());
        assert!(!settings.take_reset());

        settings.set_clamps(5.0, 5.0);
        assert!(settings.needs_reset());
        settings.take_reset();

        // Same value: no reset
        settings.set_clamps(5.0, 5.0);
        assert!(!settings.needs_reset());

        // Display-only fields never invalidate samples
        settings.exposure = 3.0;
        settings.tonemap = Tonemap::Reinhard;
        assert!(!settings.needs_reset());
    }

    #[test]
    fn take_reset_zeroes_counter() {
        let mut settings = RenderSettings::new();
        settings.take_reset();
        settings.record_sample();
        settings.record_sample();
        settings.request_reset();
        assert!(settings.take_reset());
        assert_eq!(settings.accumulated_samples(), 0);
    }

    #[test]
    fn bounce_packing() {
        let limits = BounceLimits {
            diffuse: 1,
            glossy: 2,
            transmission: 3,
            total: 300,
        };
        assert_eq!(limits.pack(), 255 | (1 << 8) | (2 << 16) | (3 << 24));
    }

    #[test]
    fn trace_params_follow_settings() {
        let mut settings = RenderSettings::new();
        settings.set_transparent_background(true);
        settings.set_clamps(1.0, 2.0);
        let params = TraceParams::from_settings(&settings);
        assert!(params.transparent_background);
        assert_eq!(params.clamp_direct, 1.0);
        assert_eq!(params.clamp_indirect, 2.0);
    }
}
