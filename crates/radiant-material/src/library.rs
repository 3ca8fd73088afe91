//! The set of material assets owned by one editor session.

use crate::asset::{MaterialAsset, PollStatus};
use crate::backend::{PipelineBackend, PipelineHandle};
use crate::compiler::{MaterialCompiler, ShaderCompiler};
use crate::error::AssetError;
use crate::graph::MaterialGraph;
use crate::node::Domain;
use hashbrown::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

/// Asset identifier within a [`MaterialLibrary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId(pub u32);

/// Owns the pipeline backend, the compiler and every material asset.
///
/// Pipelines are released when the library is shut down or dropped.
pub struct MaterialLibrary {
    backend: Box<dyn PipelineBackend>,
    compiler: MaterialCompiler,
    assets: HashMap<AssetId, MaterialAsset>,
    next_id: u32,
    /// Drawn for assets without a pipeline of their own.
    placeholder: Option<PipelineHandle>,
}

impl MaterialLibrary {
    pub fn new(backend: Box<dyn PipelineBackend>, shader_compiler: Arc<dyn ShaderCompiler>) -> Self {
        let mut library = Self {
            backend,
            compiler: MaterialCompiler::new(shader_compiler),
            assets: HashMap::new(),
            next_id: 1,
            placeholder: None,
        };
        library.placeholder = library.build_placeholder();
        library
    }

    fn build_placeholder(&mut self) -> Option<PipelineHandle> {
        let compiled = match self.compiler.compile(&MaterialGraph::default()) {
            Ok(compiled) => compiled,
            Err(e) => {
                error!(error = %e, "Placeholder material failed to compile");
                return None;
            }
        };
        match self.backend.create_pipeline(&compiled) {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!(error = %e, "Placeholder pipeline creation failed");
                None
            }
        }
    }

    pub const fn compiler(&self) -> &MaterialCompiler {
        &self.compiler
    }

    pub const fn placeholder(&self) -> Option<PipelineHandle> {
        self.placeholder
    }

    /// Add a blank material.
    pub fn create(&mut self, name: impl Into<String>, domain: Domain) -> AssetId {
        self.insert(MaterialAsset::new(name, domain))
    }

    pub fn insert(&mut self, asset: MaterialAsset) -> AssetId {
        let id = AssetId(self.next_id);
        self.next_id += 1;
        info!(asset = %asset.name(), id = id.0, "Material added");
        self.assets.insert(id, asset);
        id
    }

    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<AssetId, AssetError> {
        Ok(self.insert(MaterialAsset::load(path)?))
    }

    pub fn save(&self, id: AssetId, path: impl AsRef<Path>) -> Result<(), AssetError> {
        self.assets
            .get(&id)
            .ok_or(AssetError::UnknownAsset(id))?
            .save(path)
    }

    pub fn get(&self, id: AssetId) -> Option<&MaterialAsset> {
        self.assets.get(&id)
    }

    pub fn get_mut(&mut self, id: AssetId) -> Option<&mut MaterialAsset> {
        self.assets.get_mut(&id)
    }

    /// Asset IDs in creation order.
    pub fn ids(&self) -> Vec<AssetId> {
        let mut ids: Vec<_> = self.assets.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Compile an asset on the calling thread.
    pub fn recompile(&mut self, id: AssetId) -> bool {
        self.assets
            .get_mut(&id)
            .is_some_and(|asset| asset.recompile(&self.compiler, self.backend.as_mut()))
    }

    /// Start a background compile of an asset.
    pub fn recompile_async(&mut self, id: AssetId) -> bool {
        self.assets
            .get_mut(&id)
            .is_some_and(|asset| asset.recompile_async(&self.compiler))
    }

    /// Poll every in-flight compile. Call once per frame.
    ///
    /// Returns the assets whose compile finished or was requeued.
    pub fn poll(&mut self) -> Vec<(AssetId, PollStatus)> {
        let mut events = Vec::new();
        for (&id, asset) in &mut self.assets {
            match asset.poll(&self.compiler, self.backend.as_mut()) {
                PollStatus::Idle | PollStatus::Pending => {}
                status => events.push((id, status)),
            }
        }
        events.sort_unstable_by_key(|(id, _)| *id);
        events
    }

    /// Pipeline to draw `id` with: its own, else the placeholder.
    pub fn pipeline_for(&self, id: AssetId) -> Option<PipelineHandle> {
        self.assets
            .get(&id)
            .and_then(MaterialAsset::pipeline)
            .or(self.placeholder)
    }

    /// Remove an asset and release its pipeline.
    pub fn remove(&mut self, id: AssetId) -> Option<MaterialAsset> {
        let mut asset = self.assets.remove(&id)?;
        asset.destroy(self.backend.as_mut());
        Some(asset)
    }

    /// Release every pipeline. The library stays usable but empty.
    pub fn shutdown(&mut self) {
        if let Err(e) = self.backend.wait_idle() {
            error!(error = %e, "Wait for idle failed during material shutdown");
        }
        for (_, mut asset) in self.assets.drain() {
            asset.destroy(self.backend.as_mut());
        }
        if let Some(placeholder) = self.placeholder.take() {
            self.backend.destroy_pipeline(placeholder);
        }
    }
}

impl Drop for MaterialLibrary {
    fn drop(&mut self) {
        self.shutdown();
    }
}
