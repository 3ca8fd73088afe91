//! Error types for the material system.

use crate::graph::{LinkId, NodeId, PinId};
use crate::node::{Domain, NodeKind};
use crate::value::PinType;
use thiserror::Error;

/// Structural edit refused by a [`MaterialGraph`](crate::MaterialGraph).
///
/// A refused edit leaves the graph unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Node {0:?} does not exist")]
    UnknownNode(NodeId),

    #[error("Pin {0:?} does not exist")]
    UnknownPin(PinId),

    #[error("Link {0:?} does not exist")]
    UnknownLink(LinkId),

    #[error("The graph already has a {0:?} output node")]
    DuplicateOutput(Domain),

    #[error("Output node {0:?} cannot be deleted")]
    OutputNode(NodeId),

    #[error("Link must start at an output pin and end at an input pin")]
    Direction,

    #[error("Pins {0:?} and {1:?} belong to the same node")]
    SameNode(PinId, PinId),

    #[error("Sampler pin {0:?} cannot be linked")]
    Sampler(PinId),

    #[error("Link from {start:?} to {end:?} would create a cycle")]
    Cycle { start: PinId, end: PinId },

    #[error("{kind:?} has no parameter {index}")]
    UnknownParam { kind: NodeKind, index: usize },

    #[error("Value of type {actual:?} does not fit a {expected:?} slot")]
    ValueType { expected: PinType, actual: PinType },
}

/// Failure to turn a graph into a shader.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("Graph has no {0:?} output node")]
    NoOutput(Domain),

    #[error("Graph contains a cycle through node {0:?}")]
    Cycle(NodeId),

    #[error("Cannot convert {from:?} to {to:?} on pin {pin:?}")]
    Conversion {
        pin: PinId,
        from: PinType,
        to: PinType,
    },

    #[error("Invalid parameter on node {node:?}: {source}")]
    Param {
        node: NodeId,
        #[source]
        source: ParamError,
    },

    #[error("Graph is inconsistent: {0}")]
    Graph(#[from] GraphError),

    /// Diagnostic text of the shader compiler, unmodified.
    #[error("{0}")]
    Shader(String),

    #[error("Compile task failed: {0}")]
    Task(String),
}

/// Failure to create or release a material pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Pipeline creation failed: {0}")]
    Creation(String),

    #[error("Unknown pipeline handle {0}")]
    UnknownHandle(u64),

    #[error("Device error: {0}")]
    Device(String),
}

#[cfg(feature = "vulkan")]
impl From<radiant_gpu::GpuError> for PipelineError {
    fn from(e: radiant_gpu::GpuError) -> Self {
        Self::Device(e.to_string())
    }
}

/// Failure to load or save a material asset.
#[derive(Error, Debug)]
pub enum AssetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("Unsupported material file version {0}")]
    UnsupportedVersion(u32),

    #[error("Material graph has a cycle through node {0:?}")]
    Cycle(NodeId),

    #[error("Unknown asset {0:?}")]
    UnknownAsset(crate::library::AssetId),
}

/// Malformed compound parameter text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParamError {
    #[error("Expected prefix {expected:?}")]
    Prefix { expected: &'static str },

    #[error("Color ramp has no stops")]
    EmptyRamp,

    #[error("Stop {index} is malformed: {text:?}")]
    Stop { index: usize, text: String },

    #[error("Unknown noise type {0:?}")]
    NoiseType(String),

    #[error("Expected {expected} values, got {actual}")]
    ValueCount { expected: usize, actual: usize },

    #[error("Invalid number {0:?}")]
    Number(String),

    #[error("Parameter holds no text")]
    NotText,
}
