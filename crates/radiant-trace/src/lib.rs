//! Progressive path tracing core for the Radiant renderer.
//!
//! This crate provides:
//! - SAH BVH construction and CPU traversal
//! - The `ProgressiveTracer` contract shared by every backend
//! - A CPU reference tracer and (with `vulkan`) a compute tracer
//! - Render settings and the live viewport driver
//! - Tiled final renders with denoise, tonemap and image export

pub mod bvh;
pub mod camera;
#[cfg(feature = "vulkan")]
pub mod compute;
pub mod cpu;
pub mod export;
pub mod frame;
pub mod job;
pub mod post;
pub mod scene;
pub mod settings;
pub mod tiles;
pub mod tracer;
pub mod viewport;

pub use bvh::{Bvh, BvhHit, BvhNode, LEAF_SIZE};
pub use camera::{Camera, CameraUniforms};
#[cfg(feature = "vulkan")]
pub use compute::ComputePathTracer;
pub use cpu::CpuPathTracer;
pub use export::{save_image, ExportError, ImageFormat};
pub use frame::{HdrImage, RenderedImage};
pub use job::{FinalRenderConfig, FinalRenderJob, JobStatus};
pub use post::PostSettings;
pub use scene::{GpuLight, GpuMaterial, GpuTriangle, SceneData, TracePushConstants};
pub use settings::{BounceLimits, Denoiser, RenderMode, RenderSettings, Tonemap, TraceParams};
pub use tiles::{TileGrid, TileRect, TILE_SIZE};
pub use tracer::{
    AccumulationImage, ProgressiveTracer, TargetPrep, TargetState, TraceError, TraceRequest,
    TracerBackend,
};
pub use viewport::ViewportRenderer;
