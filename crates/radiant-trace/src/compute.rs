//! Vulkan compute path tracer.
//!
//! Traverses a flat BVH in `path_trace.comp` and accumulates one sample per
//! dispatch into an `rgba32f` storage image. Submissions are fenced so that
//! `trace` returns as soon as the work is queued; readback blocks.

use crate::bvh::{Bvh, BvhNode};
use crate::frame::{HdrImage, RenderedImage};
use crate::scene::{pack_lights, pack_materials, pack_triangles, SceneData, TracePushConstants};
use crate::tiles::TileRect;
use crate::tracer::{
    AccumulationImage, ProgressiveTracer, Result, TargetPrep, TargetState, TraceError,
    TraceRequest, TracerBackend,
};
use ash::vk;
use bytemuck::Zeroable;
use gpu_allocator::MemoryLocation;
use hashbrown::HashMap;
use radiant_core::{Environment, Light};
use radiant_gpu::command::{begin_command_buffer, end_command_buffer, submit_command_buffer};
use radiant_gpu::{
    create_fence, execute_single_time_commands, image_barrier, memory_barrier, reset_fence,
    wait_for_fence, write_storage_buffer, write_storage_image, CommandPool, ComputePipeline,
    CreationGuard, DescriptorPool, DescriptorSetLayoutBuilder, GpuAllocator, GpuBuffer,
    GpuContext, StorageImage, VkObject,
};
use radiant_shaders::{bindings, COMPUTE_WORKGROUP_SIZE};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const ACCUMULATION_FORMAT: vk::Format = vk::Format::R32G32B32A32_SFLOAT;
const INTERNAL_IMAGE: u64 = 0;

/// An accumulation target and the state of its contents.
struct GpuAccumulation {
    storage: StorageImage,
    state: TargetState,
}

impl GpuAccumulation {
    fn new(allocator: &mut GpuAllocator, width: u32, height: u32, name: &str) -> Result<Self> {
        let storage = allocator.create_storage_image(
            width,
            height,
            ACCUMULATION_FORMAT,
            vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST,
            name,
        )?;
        Ok(Self {
            storage,
            state: TargetState::new(),
        })
    }

    fn size(&self) -> (u32, u32) {
        (self.storage.width(), self.storage.height())
    }
}

/// Device copies of the scene, in BVH leaf order.
struct SceneBuffers {
    nodes: GpuBuffer,
    triangles: GpuBuffer,
    materials: GpuBuffer,
    lights: GpuBuffer,
    node_count: u32,
    triangle_count: u32,
    light_count: u32,
}

impl SceneBuffers {
    fn upload(allocator: &mut GpuAllocator, scene: &SceneData) -> Result<Self> {
        let bvh = Bvh::build(&scene.triangles);
        let triangles = pack_triangles(&scene.triangles, Some(&bvh.indices));
        let placeholder = [BvhNode::zeroed()];
        let nodes: &[BvhNode] = if bvh.nodes.is_empty() {
            &placeholder
        } else {
            &bvh.nodes
        };

        let usage = vk::BufferUsageFlags::STORAGE_BUFFER;
        Ok(Self {
            nodes: allocator.create_buffer_with_data(nodes, usage, "bvh_nodes")?,
            triangles: allocator.create_buffer_with_data(&triangles, usage, "triangles")?,
            materials: allocator.create_buffer_with_data(
                &pack_materials(&scene.materials),
                usage,
                "materials",
            )?,
            lights: allocator.create_buffer_with_data(
                &pack_lights(&scene.lights, &scene.environment),
                usage,
                "lights",
            )?,
            node_count: bvh.nodes.len() as u32,
            triangle_count: triangles.len() as u32,
            light_count: scene.lights.len() as u32,
        })
    }

    fn free(&mut self, allocator: &mut GpuAllocator) -> radiant_gpu::Result<()> {
        allocator.free_buffer(&mut self.nodes)?;
        allocator.free_buffer(&mut self.triangles)?;
        allocator.free_buffer(&mut self.materials)?;
        allocator.free_buffer(&mut self.lights)?;
        Ok(())
    }
}

/// Device state of a compute tracer that was created successfully.
struct ComputeState {
    context: Arc<GpuContext>,
    pipeline: ComputePipeline,
    descriptor_set_layout: vk::DescriptorSetLayout,
    descriptor_pool: DescriptorPool,
    descriptor_set: vk::DescriptorSet,
    descriptors_dirty: bool,

    command_pool: CommandPool,
    cmd: vk::CommandBuffer,
    /// Signalled when the last trace submission has finished.
    fence: vk::Fence,

    scene: SceneBuffers,
    internal: GpuAccumulation,
    external_images: HashMap<u64, GpuAccumulation>,
    external: Option<AccumulationImage>,
    next_image_id: u64,
    sample_count: u32,

    /// RGBA8 copy of the last presented final render.
    preview: Option<StorageImage>,
}

impl ComputeState {
    fn new(context: Arc<GpuContext>) -> Result<Self> {
        let device = context.device();

        unsafe {
            let mut created = CreationGuard::new(device);

            // 1. Descriptor set layout
            let stages = vk::ShaderStageFlags::COMPUTE;
            let layout_builder = DescriptorSetLayoutBuilder::new()
                .storage_image(bindings::ACCUMULATION, stages)
                .storage_buffer(bindings::BVH_NODES, stages)
                .storage_buffer(bindings::TRIANGLES, stages)
                .storage_buffer(bindings::MATERIALS, stages)
                .storage_buffer(bindings::LIGHTS, stages);
            let descriptor_set_layout = layout_builder.build(device)?;
            created.push(VkObject::DescriptorSetLayout(descriptor_set_layout));

            // 2. Pipeline with the shared push constant block
            let push_constant_range = vk::PushConstantRange::default()
                .stage_flags(stages)
                .offset(0)
                .size(TracePushConstants::SIZE);
            let pipeline = ComputePipeline::new(
                device,
                radiant_shaders::path_trace_shader(),
                &[descriptor_set_layout],
                &[push_constant_range],
            )?;
            created.push(VkObject::PipelineLayout(pipeline.layout));
            created.push(VkObject::Pipeline(pipeline.pipeline));

            // 3. Descriptor set
            let descriptor_pool = DescriptorPool::new(device, 1, &layout_builder.pool_sizes())?;
            created.push(VkObject::DescriptorPool(descriptor_pool.handle()));
            let descriptor_set = descriptor_pool.allocate(device, &[descriptor_set_layout])?[0];

            // 4. Command buffer and fence
            let command_pool = CommandPool::new(
                device,
                context.compute_queue_family(),
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            )?;
            created.push(VkObject::CommandPool(command_pool.handle()));
            let cmd = command_pool.allocate_command_buffer(device)?;
            let fence = create_fence(device, true)?;
            created.push(VkObject::Fence(fence));

            // 5. Empty scene and a placeholder accumulation image
            let (scene, internal) = {
                let mut allocator = context.allocator().lock();
                let mut scene = SceneBuffers::upload(&mut allocator, &SceneData::default())?;
                match GpuAccumulation::new(&mut allocator, 1, 1, "accumulation") {
                    Ok(internal) => (scene, internal),
                    Err(e) => {
                        if let Err(free_err) = scene.free(&mut allocator) {
                            warn!(error = %free_err, "Failed to free scene buffers");
                        }
                        return Err(e);
                    }
                }
            };
            created.disarm();

            info!(
                device = %context.capabilities().device_name,
                "Compute path tracer created"
            );

            Ok(Self {
                context,
                pipeline,
                descriptor_set_layout,
                descriptor_pool,
                descriptor_set,
                descriptors_dirty: true,
                command_pool,
                cmd,
                fence,
                scene,
                internal,
                external_images: HashMap::new(),
                external: None,
                next_image_id: INTERNAL_IMAGE + 1,
                sample_count: 0,
                preview: None,
            })
        }
    }

    fn preview_image(&self) -> Option<&StorageImage> {
        self.preview.as_ref()
    }

    fn active_id(&self) -> u64 {
        self.external
            .as_ref()
            .map_or(INTERNAL_IMAGE, AccumulationImage::id)
    }

    fn active(&mut self) -> Result<&mut GpuAccumulation> {
        match self.external.as_ref().map(AccumulationImage::id) {
            None => Ok(&mut self.internal),
            Some(id) => self
                .external_images
                .get_mut(&id)
                .ok_or(TraceError::UnknownImage(id)),
        }
    }

    fn wait_for_submission(&self) -> Result<()> {
        unsafe { wait_for_fence(self.context.device(), self.fence, u64::MAX)? };
        Ok(())
    }

    /// Match the active image to the request; the internal image follows the
    /// request size, external images must already fit.
    fn prepare_target(&mut self, request: &TraceRequest) -> Result<()> {
        let wanted = (request.width, request.height);
        if self.external.is_none() {
            if self.internal.size() != wanted {
                debug!(width = wanted.0, height = wanted.1, "Resizing accumulation image");
                let mut allocator = self.context.allocator().lock();
                let replacement =
                    GpuAccumulation::new(&mut allocator, wanted.0, wanted.1, "accumulation")?;
                let mut old = std::mem::replace(&mut self.internal, replacement);
                allocator.free_storage_image(&mut old.storage)?;
                self.descriptors_dirty = true;
                self.sample_count = 0;
            }
            return Ok(());
        }

        let actual = self.active()?.size();
        if actual != wanted {
            return Err(TraceError::SizeMismatch {
                expected: wanted,
                actual,
            });
        }
        Ok(())
    }

    /// Point the descriptor set at the active image and current scene.
    /// The set must not be in use.
    fn write_descriptors(&mut self) -> Result<()> {
        if !self.descriptors_dirty {
            return Ok(());
        }
        let view = self.active()?.storage.view;
        let device = self.context.device();
        unsafe {
            write_storage_image(device, self.descriptor_set, bindings::ACCUMULATION, view);
            write_storage_buffer(device, self.descriptor_set, bindings::BVH_NODES, self.scene.nodes.buffer);
            write_storage_buffer(device, self.descriptor_set, bindings::TRIANGLES, self.scene.triangles.buffer);
            write_storage_buffer(device, self.descriptor_set, bindings::MATERIALS, self.scene.materials.buffer);
            write_storage_buffer(device, self.descriptor_set, bindings::LIGHTS, self.scene.lights.buffer);
        }
        self.descriptors_dirty = false;
        Ok(())
    }

    /// See [`ComputePathTracer::record_trace`].
    unsafe fn record_trace(
        &mut self,
        cmd: vk::CommandBuffer,
        request: &TraceRequest,
        region: TileRect,
    ) -> Result<()> {
        request.check_region(region)?;
        if self.scene.triangle_count == 0 {
            return Ok(());
        }
        self.wait_for_submission()?;
        self.prepare_target(request)?;
        self.write_descriptors()?;

        let sample_index = self.sample_count;
        let prep = self.record_commands(cmd, request, region, sample_index)?;
        self.active()?.state.commit(prep);
        self.sample_count += 1;
        Ok(())
    }

    /// Record clear (if pending) and one dispatch over `region`. Returns the
    /// preparation that was recorded; the target state is left untouched.
    unsafe fn record_commands(
        &mut self,
        cmd: vk::CommandBuffer,
        request: &TraceRequest,
        region: TileRect,
        sample_index: u32,
    ) -> Result<TargetPrep> {
        let constants = TracePushConstants::new(
            &request.camera,
            &request.params,
            region,
            request.width,
            request.height,
            sample_index,
            self.scene.light_count,
            self.scene.node_count,
            self.scene.triangle_count,
        );
        let (pipeline, layout, set) = (
            self.pipeline.pipeline,
            self.pipeline.layout,
            self.descriptor_set,
        );
        let device = self.context.device_arc();
        let target = self.active()?;
        let image = target.storage.image.image;
        let prep = target.state.pending();

        if prep.transition {
            image_barrier(
                &device,
                cmd,
                image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::GENERAL,
                (vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE),
                (
                    vk::PipelineStageFlags2::CLEAR | vk::PipelineStageFlags2::COMPUTE_SHADER,
                    vk::AccessFlags2::TRANSFER_WRITE | vk::AccessFlags2::SHADER_STORAGE_READ,
                ),
            );
        }

        if prep.clear {
            let clear = vk::ClearColorValue { float32: [0.0; 4] };
            device.cmd_clear_color_image(
                cmd,
                image,
                vk::ImageLayout::GENERAL,
                &clear,
                &[radiant_gpu::memory::color_subresource_range()],
            );
            memory_barrier(
                &device,
                cmd,
                (vk::PipelineStageFlags2::CLEAR, vk::AccessFlags2::TRANSFER_WRITE),
                (
                    vk::PipelineStageFlags2::COMPUTE_SHADER,
                    vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE,
                ),
            );
        }

        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, pipeline);
        device.cmd_bind_descriptor_sets(cmd, vk::PipelineBindPoint::COMPUTE, layout, 0, &[set], &[]);
        device.cmd_push_constants(
            cmd,
            layout,
            vk::ShaderStageFlags::COMPUTE,
            0,
            bytemuck::bytes_of(&constants),
        );
        device.cmd_dispatch(
            cmd,
            region.width.div_ceil(COMPUTE_WORKGROUP_SIZE),
            region.height.div_ceil(COMPUTE_WORKGROUP_SIZE),
            1,
        );

        // Next dispatch or a readback copy reads what this one wrote
        memory_barrier(
            &device,
            cmd,
            (
                vk::PipelineStageFlags2::COMPUTE_SHADER,
                vk::AccessFlags2::SHADER_STORAGE_WRITE,
            ),
            (
                vk::PipelineStageFlags2::COMPUTE_SHADER | vk::PipelineStageFlags2::COPY,
                vk::AccessFlags2::SHADER_STORAGE_READ
                    | vk::AccessFlags2::SHADER_STORAGE_WRITE
                    | vk::AccessFlags2::TRANSFER_READ,
            ),
        );
        Ok(prep)
    }

    fn dispatch(&mut self, request: &TraceRequest, region: TileRect, sample_index: u32) -> Result<()> {
        request.check_region(region)?;

        // 1. The previous submission owns the command buffer and descriptor set
        self.wait_for_submission()?;

        // 2. Target image and bindings
        self.prepare_target(request)?;
        self.write_descriptors()?;

        // 3. Record, then submit; the fence stays signalled if recording fails
        let prep = unsafe {
            let cmd = self.cmd;
            begin_command_buffer(
                self.context.device(),
                cmd,
                vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            )?;
            let prep = self.record_commands(cmd, request, region, sample_index)?;
            end_command_buffer(self.context.device(), cmd)?;
            let device = self.context.device();
            reset_fence(device, self.fence)?;
            if let Err(e) =
                submit_command_buffer(device, self.context.compute_queue(), self.cmd, self.fence)
            {
                // Nothing will signal the old fence now
                device.destroy_fence(self.fence, None);
                self.fence = create_fence(device, true)?;
                return Err(e.into());
            }
            prep
        };

        // 4. The transition and clear are on the queue now
        self.active()?.state.commit(prep);
        Ok(())
    }

    fn mark_active_for_clear(&mut self) {
        if let Ok(target) = self.active() {
            target.state.request_clear();
        }
        self.sample_count = 0;
    }

    fn replace_scene(&mut self, scene: &SceneData) -> Result<()> {
        self.context.wait_idle()?;
        let mut allocator = self.context.allocator().lock();
        let replacement = SceneBuffers::upload(&mut allocator, scene)?;
        let mut old = std::mem::replace(&mut self.scene, replacement);
        old.free(&mut allocator)?;
        self.descriptors_dirty = true;
        Ok(())
    }
}

impl ProgressiveTracer for ComputeState {
    fn backend(&self) -> TracerBackend {
        TracerBackend::Compute
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn supports_regions(&self) -> bool {
        true
    }

    fn supports_external_accumulation(&self) -> bool {
        true
    }

    #[tracing::instrument(skip_all, fields(triangles = scene.triangles.len()))]
    fn update_scene(&mut self, scene: &SceneData) -> Result<()> {
        self.replace_scene(scene)?;
        info!(
            triangles = self.scene.triangle_count,
            nodes = self.scene.node_count,
            lights = self.scene.light_count,
            "Scene uploaded"
        );
        self.mark_active_for_clear();
        Ok(())
    }

    fn update_lights(&mut self, lights: &[Light], environment: &Environment) -> Result<()> {
        self.context.wait_idle()?;
        let mut allocator = self.context.allocator().lock();
        let replacement = allocator.create_buffer_with_data(
            &pack_lights(lights, environment),
            vk::BufferUsageFlags::STORAGE_BUFFER,
            "lights",
        )?;
        let mut old = std::mem::replace(&mut self.scene.lights, replacement);
        allocator.free_buffer(&mut old)?;
        drop(allocator);

        self.scene.light_count = lights.len() as u32;
        self.descriptors_dirty = true;
        self.mark_active_for_clear();
        Ok(())
    }

    fn trace(&mut self, request: &TraceRequest) -> Result<()> {
        if self.scene.triangle_count == 0 {
            return Ok(());
        }
        let sample_index = self.sample_count;
        self.dispatch(request, request.full_region(), sample_index)?;
        self.sample_count += 1;
        Ok(())
    }

    fn trace_region(
        &mut self,
        request: &TraceRequest,
        region: TileRect,
        sample_index: u32,
    ) -> Result<()> {
        if self.scene.triangle_count == 0 {
            return request.check_region(region);
        }
        self.dispatch(request, region, sample_index)
    }

    fn reset_accumulation(&mut self) {
        self.mark_active_for_clear();
    }

    fn sample_count(&self) -> u32 {
        self.sample_count
    }

    fn create_accumulation_image(&mut self, width: u32, height: u32) -> Result<AccumulationImage> {
        let id = self.next_image_id;
        let image = {
            let mut allocator = self.context.allocator().lock();
            GpuAccumulation::new(&mut allocator, width, height, &format!("accumulation_{id}"))?
        };
        self.next_image_id += 1;
        self.external_images.insert(id, image);
        debug!(id, width, height, "Accumulation image created");
        Ok(AccumulationImage::new(id, width, height))
    }

    fn destroy_accumulation_image(&mut self, image: AccumulationImage) {
        let Some(mut target) = self.external_images.remove(&image.id()) else {
            return;
        };
        if let Err(e) = self.wait_for_submission() {
            warn!(error = %e, "Wait before freeing accumulation image failed");
        }
        if let Err(e) = self
            .context
            .allocator()
            .lock()
            .free_storage_image(&mut target.storage)
        {
            warn!(error = %e, "Failed to free accumulation image");
        }
    }

    fn set_external_accumulation(
        &mut self,
        image: Option<AccumulationImage>,
    ) -> Result<Option<AccumulationImage>> {
        if let Some(image) = &image {
            if !self.external_images.contains_key(&image.id()) {
                return Err(TraceError::UnknownImage(image.id()));
            }
        }
        if self.active_id() != image.as_ref().map_or(INTERNAL_IMAGE, AccumulationImage::id) {
            self.descriptors_dirty = true;
        }
        Ok(std::mem::replace(&mut self.external, image))
    }

    fn has_external_accumulation(&self) -> bool {
        self.external.is_some()
    }

    #[tracing::instrument(skip_all)]
    fn read_accumulation(&mut self) -> Result<HdrImage> {
        self.wait_for_submission()?;

        let context = Arc::clone(&self.context);
        let target = self.active()?;
        let (width, height) = target.size();
        if target.state.is_blank() {
            return Ok(HdrImage::new(width, height));
        }
        let image = target.storage.image.image;

        let pixel_count = width as usize * height as usize;
        let mut readback = context.allocator().lock().create_buffer(
            (pixel_count * std::mem::size_of::<[f32; 4]>()) as u64,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
            "accumulation_readback",
        )?;

        let copy = vk::BufferImageCopy::default()
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            });

        let device = context.device();
        let copied = unsafe {
            execute_single_time_commands(
                device,
                &self.command_pool,
                context.compute_queue(),
                |cmd| {
                    device.cmd_copy_image_to_buffer(
                        cmd,
                        image,
                        vk::ImageLayout::GENERAL,
                        readback.buffer,
                        &[copy],
                    );
                },
            )
        };

        let pixels = copied.and_then(|()| readback.read::<[f32; 4]>(pixel_count));
        context.allocator().lock().free_buffer(&mut readback)?;

        Ok(HdrImage {
            width,
            height,
            pixels: pixels?,
        })
    }

    fn present(&mut self, image: &RenderedImage) -> Result<()> {
        let context = Arc::clone(&self.context);
        context.wait_idle()?;
        let mut allocator = context.allocator().lock();

        if let Some(mut old) = self.preview.take() {
            allocator.free_storage_image(&mut old)?;
        }
        let preview = allocator.create_storage_image(
            image.width,
            image.height,
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            "final_render_preview",
        )?;
        let mut staging = allocator.create_buffer_with_data(
            &image.pixels,
            vk::BufferUsageFlags::TRANSFER_SRC,
            "preview_staging",
        )?;
        drop(allocator);

        let copy = vk::BufferImageCopy::default()
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_extent(vk::Extent3D {
                width: image.width,
                height: image.height,
                depth: 1,
            });

        let device = context.device();
        let uploaded = unsafe {
            execute_single_time_commands(device, &self.command_pool, context.compute_queue(), |cmd| {
                image_barrier(
                    device,
                    cmd,
                    preview.image.image,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    (vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE),
                    (vk::PipelineStageFlags2::COPY, vk::AccessFlags2::TRANSFER_WRITE),
                );
                device.cmd_copy_buffer_to_image(
                    cmd,
                    staging.buffer,
                    preview.image.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[copy],
                );
                image_barrier(
                    device,
                    cmd,
                    preview.image.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    (vk::PipelineStageFlags2::COPY, vk::AccessFlags2::TRANSFER_WRITE),
                    (
                        vk::PipelineStageFlags2::FRAGMENT_SHADER,
                        vk::AccessFlags2::SHADER_SAMPLED_READ,
                    ),
                );
            })
        };

        context.allocator().lock().free_buffer(&mut staging)?;
        self.preview = Some(preview);
        uploaded.map_err(TraceError::from)
    }
}

impl Drop for ComputeState {
    fn drop(&mut self) {
        let context = Arc::clone(&self.context);
        if let Err(e) = context.wait_idle() {
            warn!(error = %e, "Device wait failed during tracer teardown");
        }

        let mut allocator = context.allocator().lock();
        let mut freed = self.scene.free(&mut allocator);
        freed = freed.and(allocator.free_storage_image(&mut self.internal.storage));
        for (_, mut target) in self.external_images.drain() {
            freed = freed.and(allocator.free_storage_image(&mut target.storage));
        }
        if let Some(mut preview) = self.preview.take() {
            freed = freed.and(allocator.free_storage_image(&mut preview));
        }
        drop(allocator);
        if let Err(e) = freed {
            warn!(error = %e, "Failed to free tracer resources");
        }

        let device = context.device();
        unsafe {
            device.destroy_fence(self.fence, None);
            self.command_pool.destroy(device);
            self.descriptor_pool.destroy(device);
            device.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
            self.pipeline.destroy(device);
        }
    }
}

/// State of the compute tracer, fixed at creation.
enum ComputeBackend {
    /// Creation failed; every call is a no-op.
    Failed(String),
    Ready(Box<ComputeState>),
}

/// Progressive path tracer running as a Vulkan compute shader.
///
/// Creation never fails outright: if the device objects cannot be built the
/// error is logged and the tracer stays permanently not ready.
pub struct ComputePathTracer {
    backend: ComputeBackend,
}

impl ComputePathTracer {
    /// Create the tracer with an empty scene.
    pub fn new(context: Arc<GpuContext>) -> Self {
        Self::from_creation(ComputeState::new(context))
    }

    fn from_creation(created: Result<ComputeState>) -> Self {
        let backend = match created {
            Ok(state) => ComputeBackend::Ready(Box::new(state)),
            Err(e) => {
                error!(error = %e, "Compute path tracer creation failed");
                ComputeBackend::Failed(e.to_string())
            }
        };
        Self { backend }
    }

    /// Why creation failed, if it did.
    pub fn failure_reason(&self) -> Option<&str> {
        match &self.backend {
            ComputeBackend::Failed(reason) => Some(reason),
            ComputeBackend::Ready(_) => None,
        }
    }

    /// The last presented final render, if any.
    pub fn preview_image(&self) -> Option<&StorageImage> {
        match &self.backend {
            ComputeBackend::Failed(_) => None,
            ComputeBackend::Ready(state) => state.preview_image(),
        }
    }

    /// Record one sample over `region` into a caller-owned command buffer,
    /// e.g. a live preview frame. Advances the sample count. Records nothing
    /// when the tracer is not ready or the scene is empty.
    ///
    /// # Safety
    /// `cmd` must be in the recording state and belong to a queue family with
    /// compute support. The caller submits it and must let it complete before
    /// the scene or accumulation target changes.
    pub unsafe fn record_trace(
        &mut self,
        cmd: vk::CommandBuffer,
        request: &TraceRequest,
        region: TileRect,
    ) -> Result<()> {
        match &mut self.backend {
            ComputeBackend::Failed(_) => Ok(()),
            ComputeBackend::Ready(state) => state.record_trace(cmd, request, region),
        }
    }
}

impl ProgressiveTracer for ComputePathTracer {
    fn backend(&self) -> TracerBackend {
        TracerBackend::Compute
    }

    fn is_ready(&self) -> bool {
        matches!(self.backend, ComputeBackend::Ready(_))
    }

    fn supports_regions(&self) -> bool {
        true
    }

    fn supports_external_accumulation(&self) -> bool {
        true
    }

    fn update_scene(&mut self, scene: &SceneData) -> Result<()> {
        match &mut self.backend {
            ComputeBackend::Failed(_) => Ok(()),
            ComputeBackend::Ready(state) => state.update_scene(scene),
        }
    }

    fn update_lights(&mut self, lights: &[Light], environment: &Environment) -> Result<()> {
        match &mut self.backend {
            ComputeBackend::Failed(_) => Ok(()),
            ComputeBackend::Ready(state) => state.update_lights(lights, environment),
        }
    }

    fn trace(&mut self, request: &TraceRequest) -> Result<()> {
        match &mut self.backend {
            ComputeBackend::Failed(_) => Ok(()),
            ComputeBackend::Ready(state) => state.trace(request),
        }
    }

    fn trace_region(
        &mut self,
        request: &TraceRequest,
        region: TileRect,
        sample_index: u32,
    ) -> Result<()> {
        match &mut self.backend {
            ComputeBackend::Failed(_) => Ok(()),
            ComputeBackend::Ready(state) => state.trace_region(request, region, sample_index),
        }
    }

    fn reset_accumulation(&mut self) {
        if let ComputeBackend::Ready(state) = &mut self.backend {
            state.reset_accumulation();
        }
    }

    fn sample_count(&self) -> u32 {
        match &self.backend {
            ComputeBackend::Failed(_) => 0,
            ComputeBackend::Ready(state) => state.sample_count(),
        }
    }

    fn create_accumulation_image(&mut self, width: u32, height: u32) -> Result<AccumulationImage> {
        match &mut self.backend {
            ComputeBackend::Failed(_) => Err(TraceError::NotReady),
            ComputeBackend::Ready(state) => state.create_accumulation_image(width, height),
        }
    }

    fn destroy_accumulation_image(&mut self, image: AccumulationImage) {
        if let ComputeBackend::Ready(state) = &mut self.backend {
            state.destroy_accumulation_image(image);
        }
    }

    fn set_external_accumulation(
        &mut self,
        image: Option<AccumulationImage>,
    ) -> Result<Option<AccumulationImage>> {
        match &mut self.backend {
            ComputeBackend::Failed(_) => match image {
                None => Ok(None),
                Some(_) => Err(TraceError::NotReady),
            },
            ComputeBackend::Ready(state) => state.set_external_accumulation(image),
        }
    }

    fn has_external_accumulation(&self) -> bool {
        match &self.backend {
            ComputeBackend::Failed(_) => false,
            ComputeBackend::Ready(state) => state.has_external_accumulation(),
        }
    }

    fn read_accumulation(&mut self) -> Result<HdrImage> {
        match &mut self.backend {
            ComputeBackend::Failed(_) => Ok(HdrImage::new(0, 0)),
            ComputeBackend::Ready(state) => state.read_accumulation(),
        }
    }

    fn present(&mut self, image: &RenderedImage) -> Result<()> {
        match &mut self.backend {
            ComputeBackend::Failed(_) => Ok(()),
            ComputeBackend::Ready(state) => state.present(image),
        }
    }
}
