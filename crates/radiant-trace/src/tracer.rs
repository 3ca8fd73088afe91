//! The contract shared by every progressive tracing backend.

use crate::camera::CameraUniforms;
use crate::frame::{HdrImage, RenderedImage};
use crate::scene::SceneData;
use crate::settings::TraceParams;
use crate::tiles::TileRect;
use radiant_core::{Environment, Light};
use thiserror::Error;

/// Which implementation sits behind a [`ProgressiveTracer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TracerBackend {
    Cpu,
    Compute,
    Hardware,
}

/// Errors reported by tracer backends.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Tracer is not ready")]
    NotReady,

    #[error("Operation not supported by this backend: {0}")]
    Unsupported(&'static str),

    #[error("GPU error: {0}")]
    Gpu(#[from] radiant_gpu::GpuError),

    #[error("Region {region:?} is outside the {width}x{height} image")]
    InvalidRegion {
        region: TileRect,
        width: u32,
        height: u32,
    },

    #[error("Unknown accumulation image {0}")]
    UnknownImage(u64),

    #[error("Accumulation image is {actual:?}, request needs {expected:?}")]
    SizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("Invalid render configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, TraceError>;

/// One sample's worth of tracing for an image of `width` x `height`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceRequest {
    pub camera: CameraUniforms,
    pub width: u32,
    pub height: u32,
    pub params: TraceParams,
}

impl TraceRequest {
    pub fn new(camera: CameraUniforms, width: u32, height: u32, params: TraceParams) -> Self {
        Self {
            camera,
            width,
            height,
            params,
        }
    }

    pub fn full_region(&self) -> TileRect {
        TileRect::full(self.width, self.height)
    }

    /// Check that `region` is non-empty and inside the image.
    pub fn check_region(&self, region: TileRect) -> Result<()> {
        if region.fits_within(self.width, self.height) {
            Ok(())
        } else {
            Err(TraceError::InvalidRegion {
                region,
                width: self.width,
                height: self.height,
            })
        }
    }
}

/// Move-only token for an accumulation image created by a tracer.
///
/// Whoever holds the token owns the image; installing it with
/// [`ProgressiveTracer::set_external_accumulation`] hands it to the tracer.
#[derive(Debug, PartialEq, Eq)]
pub struct AccumulationImage {
    id: u64,
    width: u32,
    height: u32,
}

impl AccumulationImage {
    /// Mint a token. Only backends call this, for images they allocated.
    pub fn new(id: u64, width: u32, height: u32) -> Self {
        Self { id, width, height }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Work the next recording must do before tracing into an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TargetPrep {
    /// Move the image out of `UNDEFINED` layout.
    pub transition: bool,
    pub clear: bool,
}

/// Content state of a GPU accumulation image.
///
/// Recording reads [`pending`](Self::pending); the flags only drop once
/// [`commit`](Self::commit) is called after a successful submission, so a
/// failed submit repeats the transition and clear next time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetState {
    uninitialized: bool,
    needs_clear: bool,
}

impl TargetState {
    /// State of a freshly allocated image.
    pub const fn new() -> Self {
        Self {
            uninitialized: true,
            needs_clear: true,
        }
    }

    pub const fn pending(&self) -> TargetPrep {
        TargetPrep {
            transition: self.uninitialized,
            clear: self.needs_clear,
        }
    }

    pub fn commit(&mut self, prep: TargetPrep) {
        if prep.transition {
            self.uninitialized = false;
        }
        if prep.clear {
            self.needs_clear = false;
        }
    }

    pub fn request_clear(&mut self) {
        self.needs_clear = true;
    }

    /// The image holds no valid sums yet.
    pub const fn is_blank(&self) -> bool {
        self.uninitialized || self.needs_clear
    }
}

impl Default for TargetState {
    fn default() -> Self {
        Self::new()
    }
}

/// A progressive tracer accumulating radiance sums into an image.
///
/// Calls on a tracer that is not ready are no-ops returning `Ok`. Tracing an
/// empty scene is a no-op as well.
pub trait ProgressiveTracer {
    fn backend(&self) -> TracerBackend;

    fn is_ready(&self) -> bool;

    /// Whether `trace_region` dispatches sub-rectangles.
    fn supports_regions(&self) -> bool;

    /// Whether `set_external_accumulation` can redirect writes.
    fn supports_external_accumulation(&self) -> bool;

    /// Replace geometry, materials and lights; resets accumulation.
    fn update_scene(&mut self, scene: &SceneData) -> Result<()>;

    /// Replace lights and environment only; resets accumulation.
    fn update_lights(&mut self, lights: &[Light], environment: &Environment) -> Result<()>;

    /// Accumulate one full-frame sample and bump the sample counter.
    fn trace(&mut self, request: &TraceRequest) -> Result<()>;

    /// Accumulate one sample inside `region` only; the counter is untouched.
    fn trace_region(
        &mut self,
        request: &TraceRequest,
        region: TileRect,
        sample_index: u32,
    ) -> Result<()>;

    /// Zero the active image before the next trace and reset the counter.
    fn reset_accumulation(&mut self);

    fn sample_count(&self) -> u32;

    fn create_accumulation_image(&mut self, width: u32, height: u32) -> Result<AccumulationImage>;

    fn destroy_accumulation_image(&mut self, image: AccumulationImage);

    /// Install `Some(image)` as the write target, returning any image it
    /// displaced, or pass `None` to restore the internal image and get the
    /// external one back.
    fn set_external_accumulation(
        &mut self,
        image: Option<AccumulationImage>,
    ) -> Result<Option<AccumulationImage>>;

    fn has_external_accumulation(&self) -> bool;

    /// Blocking readback of the active image's sums.
    fn read_accumulation(&mut self) -> Result<HdrImage>;

    /// Show a finished image in the live preview.
    fn present(&mut self, image: &RenderedImage) -> Result<()> {
        let _ = image;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(width: u32, height: u32) -> TraceRequest {
        let camera = CameraUniforms::from(&crate::Camera::default());
        TraceRequest::new(camera, width, height, TraceParams::default())
    }

    #[test]
    fn region_checks() {
        let req = request(100, 50);
        assert!(req.check_region(req.full_region()).is_ok());
        assert!(req.check_region(TileRect::new(90, 40, 10, 10)).is_ok());
        assert!(matches!(
            req.check_region(TileRect::new(95, 0, 10, 10)),
            Err(TraceError::InvalidRegion { .. })
        ));
        assert!(req.check_region(TileRect::new(0, 0, 0, 10)).is_err());
    }

    #[test]
    fn target_prep_survives_failed_submission() {
        let mut state = TargetState::new();
        let prep = state.pending();
        assert_eq!(
            prep,
            TargetPrep {
                transition: true,
                clear: true
            }
        );

        // Recording alone changes nothing; without a commit the work repeats
        assert_eq!(state.pending(), prep);
        assert!(state.is_blank());

        state.commit(prep);
        assert_eq!(state.pending(), TargetPrep::default());
        assert!(!state.is_blank());
    }

    #[test]
    fn clear_requested_after_recording_is_kept() {
        let mut state = TargetState::new();
        state.commit(state.pending());

        let prep = state.pending();
        state.request_clear();
        state.commit(prep);
        assert!(state.pending().clear);
        assert!(!state.pending().transition);
    }

    #[test]
    fn trait_is_object_safe() {
        fn takes(_: Option<&mut dyn ProgressiveTracer>) {}
        takes(None);
    }
}
