//! Seam between compiled materials and the graphics API.

use crate::compiler::CompiledMaterial;
use crate::error::PipelineError;

/// Opaque pipeline issued by a [`PipelineBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle(pub u64);

/// Creates and releases the pipelines materials draw with.
pub trait PipelineBackend {
    fn create_pipeline(&mut self, material: &CompiledMaterial) -> Result<PipelineHandle, PipelineError>;

    /// Release a pipeline. Callers wait for idle first.
    fn destroy_pipeline(&mut self, handle: PipelineHandle);

    /// Block until no submitted work references any pipeline.
    fn wait_idle(&mut self) -> Result<(), PipelineError>;
}
