//! Graphics pipelines for compiled materials.
//!
//! Every material pairs the shared mesh vertex stage with its generated
//! fragment stage. Set 0 holds the scene uniforms and is shared by all
//! pipelines; set 1 holds the material's textures when it has any.

use crate::backend::{PipelineBackend, PipelineHandle};
use crate::compiler::CompiledMaterial;
use crate::error::PipelineError;
use ash::vk;
use hashbrown::HashMap;
use radiant_gpu::{DescriptorSetLayoutBuilder, GpuContext, GraphicsPipeline, GraphicsPipelineConfig};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Interleaved position, normal and UV.
pub const VERTEX_STRIDE: u32 = 32;

/// Size of the per-object push constant block (`mat4 model`).
pub const OBJECT_CONSTANTS_SIZE: u32 = 64;

struct MaterialPipeline {
    pipeline: GraphicsPipeline,
    texture_layout: Option<vk::DescriptorSetLayout>,
}

/// [`PipelineBackend`] on top of `radiant-gpu`.
pub struct VulkanPipelineBackend {
    context: Arc<GpuContext>,
    scene_layout: vk::DescriptorSetLayout,
    color_format: vk::Format,
    depth_format: Option<vk::Format>,
    pipelines: HashMap<u64, MaterialPipeline>,
    next_handle: u64,
}

impl VulkanPipelineBackend {
    /// Create a backend rendering to the default HDR color and depth formats.
    pub fn new(context: Arc<GpuContext>) -> Result<Self, PipelineError> {
        let defaults = GraphicsPipelineConfig::default();
        let color_format = defaults
            .color_formats
            .first()
            .copied()
            .unwrap_or(vk::Format::R16G16B16A16_SFLOAT);
        Self::with_formats(context, color_format, defaults.depth_format)
    }

    pub fn with_formats(
        context: Arc<GpuContext>,
        color_format: vk::Format,
        depth_format: Option<vk::Format>,
    ) -> Result<Self, PipelineError> {
        let stages = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;
        let scene_layout = unsafe {
            DescriptorSetLayoutBuilder::new()
                .uniform_buffer(0, stages)
                .build(context.device())?
        };
        info!(?color_format, ?depth_format, "Material pipeline backend created");
        Ok(Self {
            context,
            scene_layout,
            color_format,
            depth_format,
            pipelines: HashMap::new(),
            next_handle: 1,
        })
    }

    /// Layout of set 0, for callers that allocate the scene descriptor set.
    pub const fn scene_layout(&self) -> vk::DescriptorSetLayout {
        self.scene_layout
    }

    /// Raw pipeline and layout for binding at draw time.
    pub fn get(&self, handle: PipelineHandle) -> Option<(vk::Pipeline, vk::PipelineLayout)> {
        self.pipelines
            .get(&handle.0)
            .map(|p| (p.pipeline.pipeline, p.pipeline.layout))
    }

    /// Layout of a material's texture set, if it samples any textures.
    pub fn texture_layout(&self, handle: PipelineHandle) -> Option<vk::DescriptorSetLayout> {
        self.pipelines.get(&handle.0).and_then(|p| p.texture_layout)
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    fn config(&self, material: &CompiledMaterial) -> GraphicsPipelineConfig {
        let float3 = vk::Format::R32G32B32_SFLOAT;
        let attribute = |location: u32, format: vk::Format, offset: u32| {
            vk::VertexInputAttributeDescription::default()
                .location(location)
                .binding(0)
                .format(format)
                .offset(offset)
        };
        GraphicsPipelineConfig {
            vertex_shader: radiant_shaders::material_mesh_vertex_shader().to_vec(),
            fragment_shader: material.spirv.clone(),
            vertex_bindings: vec![vk::VertexInputBindingDescription::default()
                .binding(0)
                .stride(VERTEX_STRIDE)
                .input_rate(vk::VertexInputRate::VERTEX)],
            vertex_attributes: vec![
                attribute(0, float3, 0),
                attribute(1, float3, 12),
                attribute(2, vk::Format::R32G32_SFLOAT, 24),
            ],
            alpha_blend: true,
            color_formats: vec![self.color_format],
            depth_format: self.depth_format,
            ..Default::default()
        }
    }

    unsafe fn destroy_entry(&self, entry: &MaterialPipeline) {
        let device = self.context.device();
        entry.pipeline.destroy(device);
        if let Some(layout) = entry.texture_layout {
            device.destroy_descriptor_set_layout(layout, None);
        }
    }
}

impl PipelineBackend for VulkanPipelineBackend {
    fn create_pipeline(&mut self, material: &CompiledMaterial) -> Result<PipelineHandle, PipelineError> {
        if material.spirv.is_empty() {
            return Err(PipelineError::Creation("Fragment shader is empty".to_string()));
        }
        let device = self.context.device();
        let config = self.config(material);

        unsafe {
            // 1. Texture set, only when the material samples textures
            let texture_layout = if material.textures.is_empty() {
                None
            } else {
                let builder = material
                    .textures
                    .iter()
                    .fold(DescriptorSetLayoutBuilder::new(), |builder, texture| {
                        builder.sampled_image(texture.binding, vk::ShaderStageFlags::FRAGMENT)
                    });
                Some(builder.build(device)?)
            };

            // 2. Pipeline
            let mut set_layouts = vec![self.scene_layout];
            set_layouts.extend(texture_layout);
            let push_constant_range = vk::PushConstantRange::default()
                .stage_flags(vk::ShaderStageFlags::VERTEX)
                .offset(0)
                .size(OBJECT_CONSTANTS_SIZE);
            let pipeline =
                match GraphicsPipeline::new(device, &config, &set_layouts, &[push_constant_range]) {
                    Ok(pipeline) => pipeline,
                    Err(e) => {
                        if let Some(layout) = texture_layout {
                            device.destroy_descriptor_set_layout(layout, None);
                        }
                        return Err(PipelineError::Creation(e.to_string()));
                    }
                };

            let handle = PipelineHandle(self.next_handle);
            self.next_handle += 1;
            self.pipelines.insert(
                handle.0,
                MaterialPipeline {
                    pipeline,
                    texture_layout,
                },
            );
            debug!(
                handle = handle.0,
                hash = material.hash,
                textures = material.textures.len(),
                "Material pipeline created"
            );
            Ok(handle)
        }
    }

    fn destroy_pipeline(&mut self, handle: PipelineHandle) {
        let Some(entry) = self.pipelines.remove(&handle.0) else {
            warn!(handle = handle.0, "Destroying unknown material pipeline");
            return;
        };
        unsafe { self.destroy_entry(&entry) };
        debug!(handle = handle.0, "Material pipeline destroyed");
    }

    fn wait_idle(&mut self) -> Result<(), PipelineError> {
        Ok(self.context.wait_idle()?)
    }
}

impl Drop for VulkanPipelineBackend {
    fn drop(&mut self) {
        if let Err(e) = self.context.wait_idle() {
            warn!(error = %e, "Device wait failed during material backend teardown");
        }
        let entries: Vec<_> = self.pipelines.drain().map(|(_, entry)| entry).collect();
        unsafe {
            for entry in &entries {
                self.destroy_entry(entry);
            }
            self.context
                .device()
                .destroy_descriptor_set_layout(self.scene_layout, None);
        }
    }
}

#[cfg(all(test, feature = "shaderc"))]
mod tests {
    use super::*;
    use crate::compiler::{MaterialCompiler, ShadercCompiler};
    use crate::graph::MaterialGraph;
    use crate::node::NodeKind;
    use radiant_gpu::GpuContextBuilder;

    fn backend() -> VulkanPipelineBackend {
        let context = Arc::new(GpuContextBuilder::new().build().unwrap());
        VulkanPipelineBackend::new(context).unwrap()
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn creates_and_destroys_material_pipelines() {
        let compiler = MaterialCompiler::new(Arc::new(ShadercCompiler));
        let mut backend = backend();

        let plain = compiler.compile(&MaterialGraph::default()).unwrap();
        let handle = backend.create_pipeline(&plain).unwrap();
        assert!(backend.get(handle).is_some());
        assert!(backend.texture_layout(handle).is_none());

        let mut graph = MaterialGraph::default();
        graph.create_node(NodeKind::ImageTexture, [0.0, 0.0]).unwrap();
        let textured = compiler.compile(&graph).unwrap();
        let second = backend.create_pipeline(&textured).unwrap();
        assert_ne!(handle, second);

        backend.wait_idle().unwrap();
        backend.destroy_pipeline(handle);
        assert!(backend.get(handle).is_none());
        assert_eq!(backend.len(), 1);
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn rejects_empty_fragment_shader() {
        let mut backend = backend();
        let compiler = MaterialCompiler::new(Arc::new(ShadercCompiler));
        let mut material = compiler.compile(&MaterialGraph::default()).unwrap();
        material.spirv.clear();
        assert!(matches!(
            backend.create_pipeline(&material),
            Err(PipelineError::Creation(_))
        ));
        assert!(backend.is_empty());
    }
}
