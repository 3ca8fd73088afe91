//! Node-based materials for the Radiant renderer.
//!
//! This crate provides:
//! - The [`MaterialGraph`] data model with typed pins and links
//! - GLSL generation and SPIR-V compilation through [`MaterialCompiler`]
//! - Background compiles that never stall the frame
//! - Material assets, undo history and on-disk persistence
//!
//! # Feature Flags
//!
//! - `shaderc` - Runtime GLSL compilation via [`ShadercCompiler`]
//! - `vulkan` - Graphics pipelines built on `radiant-gpu`
//!
//! # Example
//!
//! ```ignore
//! use radiant_material::{Domain, MaterialLibrary, NodeKind};
//!
//! let mut library = MaterialLibrary::new(backend, Arc::new(ShadercCompiler));
//! let id = library.create("stone", Domain::Surface);
//! library.get_mut(id).unwrap().graph_mut().create_node(NodeKind::NoiseTexture, [0.0, 0.0])?;
//! library.recompile_async(id);
//!
//! // Once per frame
//! library.poll();
//! let pipeline = library.pipeline_for(id);
//! ```

pub mod asset;
pub mod backend;
pub mod compiler;
pub mod constant;
pub mod error;
pub mod graph;
pub mod history;
pub mod library;
pub mod node;
pub mod params;
pub mod task;
pub mod value;
#[cfg(feature = "vulkan")]
pub mod vulkan;

pub use asset::{MaterialAsset, PollStatus, FILE_VERSION};
pub use backend::{PipelineBackend, PipelineHandle};
#[cfg(feature = "shaderc")]
pub use compiler::ShadercCompiler;
pub use compiler::{
    generate_glsl, CompiledMaterial, GeneratedShader, MaterialCompiler, ShaderCompiler,
    TextureBinding,
};
pub use constant::flatten;
pub use error::{AssetError, CompileError, GraphError, ParamError, PipelineError};
pub use graph::{Link, LinkId, MaterialGraph, Node, NodeId, Pin, PinDirection, PinId};
pub use history::{EditHistory, GraphEdit};
pub use library::{AssetId, MaterialLibrary};
pub use node::{Domain, NodeKind};
pub use params::{ColorRamp, NoiseKind, NoiseParams, RampStop};
pub use task::{CompileResult, CompileTask};
pub use value::{PinType, PinValue};
#[cfg(feature = "vulkan")]
pub use vulkan::VulkanPipelineBackend;
