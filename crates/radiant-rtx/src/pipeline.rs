//! Ray tracing pipeline and the GPU state behind a ready hardware tracer.

use crate::acceleration::SceneAccelerationStructure;
use crate::dirty::DirtyFlags;
use crate::sbt::{SbtLayout, ShaderBindingTable};
use crate::support::RECURSION_DEPTH;
use ash::vk;
use gpu_allocator::MemoryLocation;
use radiant_core::{Environment, Light};
use radiant_gpu::command::{begin_command_buffer, end_command_buffer, submit_command_buffer};
use radiant_gpu::pipeline::{create_pipeline_layout, create_shader_module};
use radiant_gpu::{
    create_fence, execute_single_time_commands, image_barrier, memory_barrier, reset_fence,
    wait_for_fence, write_acceleration_structure, write_storage_buffer, write_storage_image,
    CommandPool, CreationGuard, DescriptorPool, DescriptorSetLayoutBuilder, GpuAllocator,
    GpuBuffer, GpuContext, GpuError, RayTracingCapabilities, StorageImage, VkObject,
};
use radiant_shaders::bindings;
use radiant_trace::frame::HdrImage;
use radiant_trace::scene::{pack_lights, pack_materials, pack_triangles, SceneData, TracePushConstants};
use radiant_trace::tracer::{Result, TargetPrep, TargetState, TraceRequest};
use std::sync::Arc;
use tracing::{debug, info, warn};

const MISS_GROUPS: u32 = 2;
const HIT_GROUPS: u32 = 2;

/// Stages that read the shared push constant block and scene buffers.
fn ray_stages() -> vk::ShaderStageFlags {
    vk::ShaderStageFlags::RAYGEN_KHR
        | vk::ShaderStageFlags::MISS_KHR
        | vk::ShaderStageFlags::CLOSEST_HIT_KHR
}

fn log_free_failure(freed: radiant_gpu::Result<()>) {
    if let Err(e) = freed {
        warn!(error = %e, "Failed to free partially created ray tracer resources");
    }
}

/// Triangles (scene order), materials and lights.
struct RtSceneBuffers {
    triangles: GpuBuffer,
    materials: GpuBuffer,
    lights: GpuBuffer,
    triangle_count: u32,
    light_count: u32,
}

impl RtSceneBuffers {
    fn upload(allocator: &mut GpuAllocator, scene: &SceneData) -> radiant_gpu::Result<Self> {
        let usage = vk::BufferUsageFlags::STORAGE_BUFFER;
        let triangles = pack_triangles(&scene.triangles, None);
        Ok(Self {
            triangles: allocator.create_buffer_with_data(&triangles, usage, "rt_triangles")?,
            materials: allocator.create_buffer_with_data(
                &pack_materials(&scene.materials),
                usage,
                "rt_materials",
            )?,
            lights: allocator.create_buffer_with_data(
                &pack_lights(&scene.lights, &scene.environment),
                usage,
                "rt_lights",
            )?,
            triangle_count: triangles.len() as u32,
            light_count: scene.lights.len() as u32,
        })
    }

    fn free(&mut self, allocator: &mut GpuAllocator) -> radiant_gpu::Result<()> {
        allocator.free_buffer(&mut self.triangles)?;
        allocator.free_buffer(&mut self.materials)?;
        allocator.free_buffer(&mut self.lights)?;
        Ok(())
    }
}

/// Everything a ready hardware tracer owns on the device.
pub struct RtPipeline {
    context: Arc<GpuContext>,
    as_loader: ash::khr::acceleration_structure::Device,
    rt_loader: ash::khr::ray_tracing_pipeline::Device,

    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    descriptor_set_layout: vk::DescriptorSetLayout,
    descriptor_pool: DescriptorPool,
    descriptor_set: vk::DescriptorSet,
    dirty: DirtyFlags,
    sbt: ShaderBindingTable,

    command_pool: CommandPool,
    cmd: vk::CommandBuffer,
    fence: vk::Fence,

    acceleration: Option<SceneAccelerationStructure>,
    scene: RtSceneBuffers,
    accumulation: StorageImage,
    target: TargetState,
    sample_count: u32,
}

impl RtPipeline {
    /// Build the pipeline, shader binding table and an empty scene.
    ///
    /// Objects created before a failing step are destroyed again.
    pub fn new(context: Arc<GpuContext>, capabilities: &RayTracingCapabilities) -> Result<Self> {
        let device = context.device();
        let stages = ray_stages();

        unsafe {
            let mut created = CreationGuard::new(device);

            // 1. Extension loaders
            let as_loader = ash::khr::acceleration_structure::Device::new(context.instance(), device);
            let rt_loader = ash::khr::ray_tracing_pipeline::Device::new(context.instance(), device);

            // 2. Descriptor set layout
            let layout_builder = DescriptorSetLayoutBuilder::new()
                .storage_image(bindings::ACCUMULATION, vk::ShaderStageFlags::RAYGEN_KHR)
                .acceleration_structure(
                    bindings::ACCELERATION_STRUCTURE,
                    vk::ShaderStageFlags::RAYGEN_KHR | vk::ShaderStageFlags::CLOSEST_HIT_KHR,
                )
                .storage_buffer(bindings::TRIANGLES, stages)
                .storage_buffer(bindings::MATERIALS, stages)
                .storage_buffer(bindings::LIGHTS, stages);
            let descriptor_set_layout = layout_builder.build(device)?;
            created.push(VkObject::DescriptorSetLayout(descriptor_set_layout));

            // 3. Pipeline layout with the shared push constant block
            let push_constant_range = vk::PushConstantRange::default()
                .stage_flags(stages)
                .offset(0)
                .size(TracePushConstants::SIZE);
            let layout =
                create_pipeline_layout(device, &[descriptor_set_layout], &[push_constant_range])?;
            created.push(VkObject::PipelineLayout(layout));

            // 4. Shader stages: raygen, miss, shadow miss, closest-hit, shadow closest-hit.
            // Modules only live until the pipeline exists.
            let shaders = radiant_shaders::ray_tracing_shaders();
            let mut module_guard = CreationGuard::new(device);
            let mut modules = Vec::with_capacity(5);
            for (code, name) in [
                (shaders.raygen, "raygen"),
                (shaders.miss, "miss"),
                (shaders.shadow_miss, "shadow miss"),
                (shaders.closest_hit, "closest hit"),
                (shaders.shadow_closest_hit, "shadow closest hit"),
            ] {
                let module = create_shader_module(device, code, name)?;
                module_guard.push(VkObject::ShaderModule(module));
                modules.push(module);
            }
            let kinds = [
                vk::ShaderStageFlags::RAYGEN_KHR,
                vk::ShaderStageFlags::MISS_KHR,
                vk::ShaderStageFlags::MISS_KHR,
                vk::ShaderStageFlags::CLOSEST_HIT_KHR,
                vk::ShaderStageFlags::CLOSEST_HIT_KHR,
            ];
            let entry_point = c"main";
            let shader_stages: Vec<_> = modules
                .iter()
                .zip(kinds)
                .map(|(&module, stage)| {
                    vk::PipelineShaderStageCreateInfo::default()
                        .stage(stage)
                        .module(module)
                        .name(entry_point)
                })
                .collect();

            // 5. Groups in SBT order
            let general = |shader: u32| {
                vk::RayTracingShaderGroupCreateInfoKHR::default()
                    .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
                    .general_shader(shader)
                    .closest_hit_shader(vk::SHADER_UNUSED_KHR)
                    .any_hit_shader(vk::SHADER_UNUSED_KHR)
                    .intersection_shader(vk::SHADER_UNUSED_KHR)
            };
            let hit = |shader: u32| {
                vk::RayTracingShaderGroupCreateInfoKHR::default()
                    .ty(vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP)
                    .general_shader(vk::SHADER_UNUSED_KHR)
                    .closest_hit_shader(shader)
                    .any_hit_shader(vk::SHADER_UNUSED_KHR)
                    .intersection_shader(vk::SHADER_UNUSED_KHR)
            };
            let shader_groups = [general(0), general(1), general(2), hit(3), hit(4)];

            // 6. Pipeline
            let pipeline_info = vk::RayTracingPipelineCreateInfoKHR::default()
                .stages(&shader_stages)
                .groups(&shader_groups)
                .max_pipeline_ray_recursion_depth(RECURSION_DEPTH)
                .layout(layout);
            let created_pipelines = rt_loader.create_ray_tracing_pipelines(
                vk::DeferredOperationKHR::null(),
                vk::PipelineCache::null(),
                &[pipeline_info],
                None,
            );
            drop(module_guard);
            let pipeline = created_pipelines
                .map_err(|(_, e)| GpuError::PipelineCreation(format!("Ray tracing pipeline: {e}")))?
                .into_iter()
                .next()
                .ok_or_else(|| GpuError::PipelineCreation("No ray tracing pipeline".to_string()))?;
            created.push(VkObject::Pipeline(pipeline));

            // 7. Descriptor set
            let descriptor_pool = DescriptorPool::new(device, 1, &layout_builder.pool_sizes())?;
            created.push(VkObject::DescriptorPool(descriptor_pool.handle()));
            let descriptor_set = descriptor_pool.allocate(device, &[descriptor_set_layout])?[0];

            // 8. Command buffer and fence
            let command_pool = CommandPool::new(
                device,
                context.compute_queue_family(),
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            )?;
            created.push(VkObject::CommandPool(command_pool.handle()));
            let cmd = command_pool.allocate_command_buffer(device)?;
            let fence = create_fence(device, true)?;
            created.push(VkObject::Fence(fence));

            // 9. Empty scene, placeholder accumulation image and shader binding table
            let sbt_layout = SbtLayout::new(capabilities, MISS_GROUPS, HIT_GROUPS);
            let (scene, accumulation, sbt) = {
                let mut allocator = context.allocator().lock();
                let mut scene = RtSceneBuffers::upload(&mut allocator, &SceneData::default())?;
                let mut accumulation = match Self::create_accumulation(&mut allocator, 1, 1) {
                    Ok(image) => image,
                    Err(e) => {
                        log_free_failure(scene.free(&mut allocator));
                        return Err(e.into());
                    }
                };
                match ShaderBindingTable::new(device, &rt_loader, &mut allocator, pipeline, sbt_layout)
                {
                    Ok(sbt) => (scene, accumulation, sbt),
                    Err(e) => {
                        log_free_failure(
                            scene
                                .free(&mut allocator)
                                .and(allocator.free_storage_image(&mut accumulation)),
                        );
                        return Err(e.into());
                    }
                }
            };
            created.disarm();

            info!(
                device = %context.capabilities().device_name,
                sbt_bytes = sbt_layout.total_size(),
                "Hardware ray tracer created"
            );

            Ok(Self {
                context,
                as_loader,
                rt_loader,
                pipeline,
                layout,
                descriptor_set_layout,
                descriptor_pool,
                descriptor_set,
                dirty: DirtyFlags::all(),
                sbt,
                command_pool,
                cmd,
                fence,
                acceleration: None,
                scene,
                accumulation,
                target: TargetState::new(),
                sample_count: 0,
            })
        }
    }

    fn create_accumulation(
        allocator: &mut GpuAllocator,
        width: u32,
        height: u32,
    ) -> radiant_gpu::Result<StorageImage> {
        allocator.create_storage_image(
            width,
            height,
            vk::Format::R32G32B32A32_SFLOAT,
            vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST,
            "rt_accumulation",
        )
    }

    pub fn triangle_count(&self) -> u32 {
        self.scene.triangle_count
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    pub fn reset_accumulation(&mut self) {
        self.target.request_clear();
        self.sample_count = 0;
    }

    fn wait_for_submission(&self) -> Result<()> {
        unsafe { wait_for_fence(self.context.device(), self.fence, u64::MAX)? };
        Ok(())
    }

    /// Rebuild acceleration structures and scene buffers.
    pub fn update_scene(&mut self, scene: &SceneData) -> Result<()> {
        self.context.wait_idle()?;

        if let Some(mut old) = self.acceleration.take() {
            unsafe { old.destroy(&self.as_loader, &mut self.context.allocator().lock())? };
        }
        if !scene.triangles.is_empty() {
            let built = unsafe {
                SceneAccelerationStructure::build(
                    &self.context,
                    &self.command_pool,
                    &self.as_loader,
                    &scene.triangles,
                )?
            };
            self.acceleration = Some(built);
        }

        {
            let mut allocator = self.context.allocator().lock();
            let replacement = RtSceneBuffers::upload(&mut allocator, scene)?;
            let mut old = std::mem::replace(&mut self.scene, replacement);
            old.free(&mut allocator)?;
        }

        info!(
            triangles = self.scene.triangle_count,
            lights = self.scene.light_count,
            "Scene uploaded for hardware tracing"
        );
        self.dirty |= DirtyFlags::GEOMETRY | DirtyFlags::LIGHTS;
        self.reset_accumulation();
        Ok(())
    }

    /// Replace only the environment and light buffer.
    pub fn update_lights(&mut self, lights: &[Light], environment: &Environment) -> Result<()> {
        self.context.wait_idle()?;
        let mut allocator = self.context.allocator().lock();
        let replacement = allocator.create_buffer_with_data(
            &pack_lights(lights, environment),
            vk::BufferUsageFlags::STORAGE_BUFFER,
            "rt_lights",
        )?;
        let mut old = std::mem::replace(&mut self.scene.lights, replacement);
        allocator.free_buffer(&mut old)?;
        drop(allocator);

        self.scene.light_count = lights.len() as u32;
        self.dirty |= DirtyFlags::LIGHTS;
        self.reset_accumulation();
        Ok(())
    }

    fn prepare_target(&mut self, width: u32, height: u32) -> Result<()> {
        if (self.accumulation.width(), self.accumulation.height()) == (width, height) {
            return Ok(());
        }
        debug!(width, height, "Resizing hardware accumulation image");
        let mut allocator = self.context.allocator().lock();
        let replacement = Self::create_accumulation(&mut allocator, width, height)?;
        let mut old = std::mem::replace(&mut self.accumulation, replacement);
        allocator.free_storage_image(&mut old)?;
        self.target = TargetState::new();
        self.sample_count = 0;
        self.dirty |= DirtyFlags::IMAGE;
        Ok(())
    }

    /// Rewrite only the bindings whose resources changed.
    fn write_descriptors(&mut self) {
        let dirty = self.dirty.take();
        if dirty.is_empty() {
            return;
        }
        let (device, set) = (self.context.device(), self.descriptor_set);
        unsafe {
            if dirty.contains(DirtyFlags::IMAGE) {
                write_storage_image(device, set, bindings::ACCUMULATION, self.accumulation.view);
            }
            if dirty.contains(DirtyFlags::GEOMETRY) {
                if let Some(acceleration) = &self.acceleration {
                    write_acceleration_structure(
                        device,
                        set,
                        bindings::ACCELERATION_STRUCTURE,
                        acceleration.tlas(),
                    );
                }
                write_storage_buffer(device, set, bindings::TRIANGLES, self.scene.triangles.buffer);
                write_storage_buffer(device, set, bindings::MATERIALS, self.scene.materials.buffer);
            }
            if dirty.contains(DirtyFlags::LIGHTS) {
                write_storage_buffer(device, set, bindings::LIGHTS, self.scene.lights.buffer);
            }
        }
    }

    /// Record clear (if pending) and one full-frame launch. The target state
    /// is committed by the caller once the commands are submitted.
    unsafe fn record_trace(&mut self, request: &TraceRequest, sample_index: u32) -> Result<TargetPrep> {
        let constants = TracePushConstants::new(
            &request.camera,
            &request.params,
            request.full_region(),
            request.width,
            request.height,
            sample_index,
            self.scene.light_count,
            0,
            self.scene.triangle_count,
        );
        let device = self.context.device();
        let (cmd, image) = (self.cmd, self.accumulation.image.image);
        let prep = self.target.pending();

        begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;

        if prep.transition {
            image_barrier(
                device,
                cmd,
                image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::GENERAL,
                (vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE),
                (
                    vk::PipelineStageFlags2::CLEAR | vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
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
                device,
                cmd,
                (vk::PipelineStageFlags2::CLEAR, vk::AccessFlags2::TRANSFER_WRITE),
                (
                    vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
                    vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE,
                ),
            );
        }

        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::RAY_TRACING_KHR, self.pipeline);
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::RAY_TRACING_KHR,
            self.layout,
            0,
            &[self.descriptor_set],
            &[],
        );
        device.cmd_push_constants(cmd, self.layout, ray_stages(), 0, bytemuck::bytes_of(&constants));
        self.rt_loader.cmd_trace_rays(
            cmd,
            &self.sbt.raygen_region,
            &self.sbt.miss_region,
            &self.sbt.hit_region,
            &self.sbt.callable_region,
            request.width,
            request.height,
            1,
        );

        memory_barrier(
            device,
            cmd,
            (
                vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
                vk::AccessFlags2::SHADER_STORAGE_WRITE,
            ),
            (
                vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR | vk::PipelineStageFlags2::COPY,
                vk::AccessFlags2::SHADER_STORAGE_READ
                    | vk::AccessFlags2::SHADER_STORAGE_WRITE
                    | vk::AccessFlags2::TRANSFER_READ,
            ),
        );

        end_command_buffer(device, cmd)?;
        Ok(prep)
    }

    /// Launch one full-frame sample with an explicit sample index.
    /// Returns without submitting for an empty scene.
    pub fn dispatch(&mut self, request: &TraceRequest, sample_index: u32) -> Result<()> {
        if self.acceleration.is_none() {
            return Ok(());
        }

        // 1. The previous submission owns the command buffer and descriptor set
        self.wait_for_submission()?;

        // 2. Target image and bindings
        self.prepare_target(request.width, request.height)?;
        self.write_descriptors();

        // 3. Record, then submit
        let prep = unsafe {
            let prep = self.record_trace(request, sample_index)?;
            let device = self.context.device();
            reset_fence(device, self.fence)?;
            if let Err(e) =
                submit_command_buffer(device, self.context.compute_queue(), self.cmd, self.fence)
            {
                device.destroy_fence(self.fence, None);
                self.fence = create_fence(device, true)?;
                return Err(e.into());
            }
            prep
        };

        // 4. Transition and clear are queued
        self.target.commit(prep);
        Ok(())
    }

    /// One sample that advances the counter.
    pub fn trace(&mut self, request: &TraceRequest) -> Result<()> {
        if self.acceleration.is_none() {
            return Ok(());
        }
        self.dispatch(request, self.sample_count)?;
        self.sample_count += 1;
        Ok(())
    }

    /// Blocking copy of the accumulation sums.
    pub fn read_accumulation(&mut self) -> Result<HdrImage> {
        self.wait_for_submission()?;

        let (width, height) = (self.accumulation.width(), self.accumulation.height());
        if self.target.is_blank() {
            return Ok(HdrImage::new(width, height));
        }

        let pixel_count = width as usize * height as usize;
        let mut readback = self.context.allocator().lock().create_buffer(
            (pixel_count * std::mem::size_of::<[f32; 4]>()) as u64,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
            "rt_readback",
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

        let device = self.context.device();
        let image = self.accumulation.image.image;
        let copied = unsafe {
            execute_single_time_commands(device, &self.command_pool, self.context.compute_queue(), |cmd| {
                device.cmd_copy_image_to_buffer(
                    cmd,
                    image,
                    vk::ImageLayout::GENERAL,
                    readback.buffer,
                    &[copy],
                );
            })
        };

        let pixels = copied.and_then(|()| readback.read::<[f32; 4]>(pixel_count));
        self.context.allocator().lock().free_buffer(&mut readback)?;

        Ok(HdrImage {
            width,
            height,
            pixels: pixels?,
        })
    }
}

impl Drop for RtPipeline {
    fn drop(&mut self) {
        let context = Arc::clone(&self.context);
        if let Err(e) = context.wait_idle() {
            warn!(error = %e, "Device wait failed during ray tracer teardown");
        }

        let mut allocator = context.allocator().lock();
        let mut freed = self.scene.free(&mut allocator);
        if let Some(mut acceleration) = self.acceleration.take() {
            freed = freed.and(unsafe { acceleration.destroy(&self.as_loader, &mut allocator) });
        }
        freed = freed.and(self.sbt.destroy(&mut allocator));
        freed = freed.and(allocator.free_storage_image(&mut self.accumulation));
        drop(allocator);
        if let Err(e) = freed {
            warn!(error = %e, "Failed to free ray tracer resources");
        }

        let device = context.device();
        unsafe {
            device.destroy_fence(self.fence, None);
            self.command_pool.destroy(device);
            self.descriptor_pool.destroy(device);
            device.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
        }
    }
}
