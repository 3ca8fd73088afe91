//! [`ProgressiveTracer`] backed by hardware ray tracing.

#[cfg(feature = "rtx")]
use crate::pipeline::RtPipeline;
use crate::support::RayTracingSupport;
use radiant_core::{Environment, Light};
use radiant_gpu::GpuContext;
use radiant_trace::frame::HdrImage;
use radiant_trace::scene::SceneData;
use radiant_trace::tiles::TileRect;
use radiant_trace::tracer::{
    AccumulationImage, ProgressiveTracer, Result, TraceError, TraceRequest, TracerBackend,
};
use std::sync::Arc;
use tracing::warn;

/// State of the hardware tracer, fixed at creation.
pub enum RtBackend {
    /// Every call is a no-op.
    Unsupported(String),
    #[cfg(feature = "rtx")]
    Ready(Box<RtPipeline>),
}

/// Hardware ray tracer. Falls back to a no-op when the device or build
/// cannot run it.
///
/// Traces whole frames only and always writes its own accumulation image.
pub struct HardwareRayTracer {
    backend: RtBackend,
}

impl HardwareRayTracer {
    pub fn new(context: Arc<GpuContext>) -> Self {
        let backend = match RayTracingSupport::detect(&context) {
            RayTracingSupport::Unsupported(reason) => {
                warn!(%reason, "Hardware ray tracing unavailable");
                RtBackend::Unsupported(reason)
            }
            RayTracingSupport::Supported(capabilities) => {
                Self::create_backend(context, &capabilities)
            }
        };
        Self { backend }
    }

    /// A tracer that never traces.
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self {
            backend: RtBackend::Unsupported(reason.into()),
        }
    }

    #[cfg(feature = "rtx")]
    fn create_backend(
        context: Arc<GpuContext>,
        capabilities: &radiant_gpu::RayTracingCapabilities,
    ) -> RtBackend {
        match RtPipeline::new(context, capabilities) {
            Ok(pipeline) => RtBackend::Ready(Box::new(pipeline)),
            Err(e) => {
                warn!(error = %e, "Hardware ray tracer creation failed");
                RtBackend::Unsupported(e.to_string())
            }
        }
    }

    #[cfg(not(feature = "rtx"))]
    fn create_backend(
        _context: Arc<GpuContext>,
        _capabilities: &radiant_gpu::RayTracingCapabilities,
    ) -> RtBackend {
        RtBackend::Unsupported("built without the rtx feature".to_string())
    }

    pub fn backend_state(&self) -> &RtBackend {
        &self.backend
    }

    /// Why the tracer is a no-op, if it is.
    pub fn unsupported_reason(&self) -> Option<&str> {
        match &self.backend {
            RtBackend::Unsupported(reason) => Some(reason),
            #[cfg(feature = "rtx")]
            RtBackend::Ready(_) => None,
        }
    }
}

#[cfg_attr(not(feature = "rtx"), allow(unused_variables))]
impl ProgressiveTracer for HardwareRayTracer {
    fn backend(&self) -> TracerBackend {
        TracerBackend::Hardware
    }

    fn is_ready(&self) -> bool {
        self.unsupported_reason().is_none()
    }

    fn supports_regions(&self) -> bool {
        false
    }

    fn supports_external_accumulation(&self) -> bool {
        false
    }

    fn update_scene(&mut self, scene: &SceneData) -> Result<()> {
        match &mut self.backend {
            RtBackend::Unsupported(_) => Ok(()),
            #[cfg(feature = "rtx")]
            RtBackend::Ready(pipeline) => pipeline.update_scene(scene),
        }
    }

    fn update_lights(&mut self, lights: &[Light], environment: &Environment) -> Result<()> {
        match &mut self.backend {
            RtBackend::Unsupported(_) => Ok(()),
            #[cfg(feature = "rtx")]
            RtBackend::Ready(pipeline) => pipeline.update_lights(lights, environment),
        }
    }

    fn trace(&mut self, request: &TraceRequest) -> Result<()> {
        match &mut self.backend {
            RtBackend::Unsupported(_) => Ok(()),
            #[cfg(feature = "rtx")]
            RtBackend::Ready(pipeline) => pipeline.trace(request),
        }
    }

    /// Only the full frame is accepted.
    fn trace_region(
        &mut self,
        request: &TraceRequest,
        region: TileRect,
        sample_index: u32,
    ) -> Result<()> {
        match &mut self.backend {
            RtBackend::Unsupported(_) => Ok(()),
            #[cfg(feature = "rtx")]
            RtBackend::Ready(pipeline) => {
                request.check_region(region)?;
                if region != request.full_region() {
                    return Err(TraceError::Unsupported("region tracing"));
                }
                pipeline.dispatch(request, sample_index)
            }
        }
    }

    fn reset_accumulation(&mut self) {
        match &mut self.backend {
            RtBackend::Unsupported(_) => {}
            #[cfg(feature = "rtx")]
            RtBackend::Ready(pipeline) => pipeline.reset_accumulation(),
        }
    }

    fn sample_count(&self) -> u32 {
        match &self.backend {
            RtBackend::Unsupported(_) => 0,
            #[cfg(feature = "rtx")]
            RtBackend::Ready(pipeline) => pipeline.sample_count(),
        }
    }

    fn create_accumulation_image(&mut self, _width: u32, _height: u32) -> Result<AccumulationImage> {
        Err(TraceError::Unsupported("external accumulation"))
    }

    fn destroy_accumulation_image(&mut self, _image: AccumulationImage) {}

    fn set_external_accumulation(
        &mut self,
        image: Option<AccumulationImage>,
    ) -> Result<Option<AccumulationImage>> {
        match image {
            None => Ok(None),
            Some(_) => Err(TraceError::Unsupported("external accumulation")),
        }
    }

    fn has_external_accumulation(&self) -> bool {
        false
    }

    fn read_accumulation(&mut self) -> Result<HdrImage> {
        match &mut self.backend {
            RtBackend::Unsupported(_) => Ok(HdrImage::new(0, 0)),
            #[cfg(feature = "rtx")]
            RtBackend::Ready(pipeline) => pipeline.read_accumulation(),
        }
    }
}
