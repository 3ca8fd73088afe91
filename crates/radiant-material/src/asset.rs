//! Material assets: a graph plus the pipeline compiled from it.

use crate::backend::{PipelineBackend, PipelineHandle};
use crate::compiler::{CompiledMaterial, MaterialCompiler};
use crate::error::{AssetError, CompileError};
use crate::graph::MaterialGraph;
use crate::node::Domain;
use crate::task::CompileTask;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Version written to material files.
pub const FILE_VERSION: u32 = 1;

#[derive(Serialize)]
struct MaterialFileRef<'a> {
    version: u32,
    name: &'a str,
    graph: &'a MaterialGraph,
}

#[derive(Deserialize)]
struct MaterialFile {
    version: u32,
    name: String,
    graph: MaterialGraph,
}

/// Outcome of [`MaterialAsset::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// No compile in flight.
    Idle,
    /// Compile still running.
    Pending,
    /// A new pipeline replaced the old one.
    Adopted,
    /// Compile or pipeline creation failed. The previous pipeline stays.
    Failed,
    /// The graph changed while compiling; a fresh compile was started.
    Requeued,
}

/// One editable material.
///
/// The pipeline always belongs to the last successful compile. Failed
/// compiles record an error and leave it in place.
pub struct MaterialAsset {
    name: String,
    graph: MaterialGraph,
    compiled: Option<CompiledMaterial>,
    pipeline: Option<PipelineHandle>,
    last_error: Option<String>,
    task: Option<CompileTask>,
}

impl MaterialAsset {
    /// Blank material with only an output node.
    pub fn new(name: impl Into<String>, domain: Domain) -> Self {
        Self::from_graph(name, MaterialGraph::new(domain))
    }

    pub fn from_graph(name: impl Into<String>, graph: MaterialGraph) -> Self {
        Self {
            name: name.into(),
            graph,
            compiled: None,
            pipeline: None,
            last_error: None,
            task: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub const fn graph(&self) -> &MaterialGraph {
        &self.graph
    }

    /// Mutable graph access. Edits are picked up by the next recompile.
    pub fn graph_mut(&mut self) -> &mut MaterialGraph {
        &mut self.graph
    }

    pub const fn compiled(&self) -> Option<&CompiledMaterial> {
        self.compiled.as_ref()
    }

    pub const fn pipeline(&self) -> Option<PipelineHandle> {
        self.pipeline
    }

    /// Error of the most recent failed compile, cleared on success.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub const fn is_compiling(&self) -> bool {
        self.task.is_some()
    }

    /// Whether the graph differs from what the pipeline was built from.
    pub fn is_dirty(&self) -> bool {
        !self.is_current(self.graph.compute_hash())
    }

    fn is_current(&self, hash: u64) -> bool {
        self.pipeline.is_some() && self.compiled.as_ref().is_some_and(|c| c.hash == hash)
    }

    /// Compile on the calling thread.
    ///
    /// Returns `true` when the asset ends up with a pipeline for the current
    /// graph. Nothing is rebuilt if the content hash is unchanged.
    pub fn recompile(&mut self, compiler: &MaterialCompiler, backend: &mut dyn PipelineBackend) -> bool {
        let hash = self.graph.compute_hash();
        if self.is_current(hash) {
            debug!(asset = %self.name, hash, "Material unchanged, skipping compile");
            return true;
        }
        match compiler.compile(&self.graph) {
            Ok(compiled) => self.adopt(compiled, backend),
            Err(e) => {
                self.fail(&e);
                false
            }
        }
    }

    /// Start compiling a snapshot of the graph in the background.
    ///
    /// Returns `true` if a compile is now in flight. While one is running,
    /// further edits are handled by [`poll`](Self::poll) requeueing.
    pub fn recompile_async(&mut self, compiler: &MaterialCompiler) -> bool {
        if self.task.is_some() {
            return true;
        }
        if self.is_current(self.graph.compute_hash()) {
            return false;
        }
        self.spawn_task(compiler)
    }

    fn spawn_task(&mut self, compiler: &MaterialCompiler) -> bool {
        match CompileTask::spawn(compiler.clone(), self.graph.clone()) {
            Ok(task) => {
                self.task = Some(task);
                true
            }
            Err(e) => {
                self.fail(&e);
                false
            }
        }
    }

    /// Check the background compile without blocking. Call once per frame.
    ///
    /// A result for a graph that has since changed is discarded and a new
    /// compile of the current graph is started.
    pub fn poll(&mut self, compiler: &MaterialCompiler, backend: &mut dyn PipelineBackend) -> PollStatus {
        let Some(task) = self.task.as_mut() else {
            return PollStatus::Idle;
        };
        let Some(result) = task.try_result() else {
            return PollStatus::Pending;
        };
        let snapshot = task.hash();
        self.task = None;

        let current = self.graph.compute_hash();
        if snapshot != current {
            debug!(asset = %self.name, snapshot, current, "Graph changed during compile, requeueing");
            return if self.spawn_task(compiler) {
                PollStatus::Requeued
            } else {
                PollStatus::Failed
            };
        }

        match result {
            Ok(compiled) => {
                if self.adopt(compiled, backend) {
                    PollStatus::Adopted
                } else {
                    PollStatus::Failed
                }
            }
            Err(e) => {
                self.fail(&e);
                PollStatus::Failed
            }
        }
    }

    /// Swap in a pipeline for `compiled`. The old pipeline is released only
    /// after the device is idle.
    fn adopt(&mut self, compiled: CompiledMaterial, backend: &mut dyn PipelineBackend) -> bool {
        let handle = match backend.create_pipeline(&compiled) {
            Ok(handle) => handle,
            Err(e) => {
                error!(asset = %self.name, error = %e, "Failed to create material pipeline");
                self.last_error = Some(e.to_string());
                return false;
            }
        };

        if let Some(old) = self.pipeline.replace(handle) {
            if let Err(e) = backend.wait_idle() {
                warn!(asset = %self.name, error = %e, "Wait for idle failed before pipeline release");
            }
            backend.destroy_pipeline(old);
        }

        info!(asset = %self.name, hash = compiled.hash, "Material pipeline ready");
        self.compiled = Some(compiled);
        self.last_error = None;
        true
    }

    fn fail(&mut self, e: &CompileError) {
        error!(asset = %self.name, error = %e, "Material compile failed");
        self.last_error = Some(e.to_string());
    }

    /// Release the pipeline. Any in-flight compile is abandoned.
    pub fn destroy(&mut self, backend: &mut dyn PipelineBackend) {
        self.task = None;
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = backend.wait_idle() {
                warn!(asset = %self.name, error = %e, "Wait for idle failed before pipeline release");
            }
            backend.destroy_pipeline(pipeline);
        }
        self.compiled = None;
    }

    /// Write the name and graph to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), AssetError> {
        let file = MaterialFileRef {
            version: FILE_VERSION,
            name: &self.name,
            graph: &self.graph,
        };
        let writer = BufWriter::new(File::create(path.as_ref())?);
        bincode::serialize_into(writer, &file)?;
        debug!(asset = %self.name, path = %path.as_ref().display(), "Saved material");
        Ok(())
    }

    /// Read an asset written by [`save`](Self::save). It starts uncompiled.
    ///
    /// Graphs whose links form a cycle are refused.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AssetError> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let file: MaterialFile = bincode::deserialize_from(reader)?;
        if file.version != FILE_VERSION {
            return Err(AssetError::UnsupportedVersion(file.version));
        }
        if let Some(node) = file.graph.find_cycle() {
            warn!(asset = %file.name, ?node, "Refusing cyclic material graph");
            return Err(AssetError::Cycle(node));
        }
        debug!(asset = %file.name, path = %path.as_ref().display(), "Loaded material");
        Ok(Self::from_graph(file.name, file.graph))
    }
}

impl std::fmt::Debug for MaterialAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaterialAsset")
            .field("name", &self.name)
            .field("pipeline", &self.pipeline)
            .field("last_error", &self.last_error)
            .field("compiling", &self.task.is_some())
            .finish_non_exhaustive()
    }
}
