//! Acceleration structures for hardware ray tracing.
//!
//! The scene is one triangle BLAS referenced by a TLAS holding a single
//! identity instance. Triangles keep their scene order, so `gl_PrimitiveID`
//! indexes the triangle buffer directly.

use ash::vk;
use gpu_allocator::MemoryLocation;
use radiant_core::Triangle;
use radiant_gpu::{execute_single_time_commands, CommandPool, GpuAllocator, GpuBuffer, GpuContext, Result};
use tracing::debug;

/// Flatten triangles into a vertex position list and a matching index list.
pub fn triangle_geometry_data(triangles: &[Triangle]) -> (Vec<[f32; 3]>, Vec<u32>) {
    let positions: Vec<[f32; 3]> = triangles
        .iter()
        .flat_map(|tri| tri.positions.map(|p| p.to_array()))
        .collect();
    let indices = (0..positions.len() as u32).collect();
    (positions, indices)
}

/// An acceleration structure and its backing storage.
pub struct AccelerationStructure {
    pub handle: vk::AccelerationStructureKHR,
    pub buffer: GpuBuffer,
    pub device_address: vk::DeviceAddress,
}

impl AccelerationStructure {
    /// Allocate storage and create an (unbuilt) acceleration structure.
    ///
    /// # Safety
    /// The loader must belong to the allocator's device.
    unsafe fn new(
        allocator: &mut GpuAllocator,
        as_loader: &ash::khr::acceleration_structure::Device,
        ty: vk::AccelerationStructureTypeKHR,
        size: vk::DeviceSize,
        name: &str,
    ) -> Result<Self> {
        let mut buffer = allocator.create_buffer(
            size,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::GpuOnly,
            name,
        )?;

        let create_info = vk::AccelerationStructureCreateInfoKHR::default()
            .buffer(buffer.buffer)
            .offset(0)
            .size(size)
            .ty(ty);

        let handle = match as_loader.create_acceleration_structure(&create_info, None) {
            Ok(handle) => handle,
            Err(e) => {
                allocator.free_buffer(&mut buffer)?;
                return Err(e.into());
            }
        };

        let address_info =
            vk::AccelerationStructureDeviceAddressInfoKHR::default().acceleration_structure(handle);
        let device_address = as_loader.get_acceleration_structure_device_address(&address_info);

        Ok(Self {
            handle,
            buffer,
            device_address,
        })
    }

    /// # Safety
    /// The structure must not be in use.
    unsafe fn destroy(
        &mut self,
        as_loader: &ash::khr::acceleration_structure::Device,
        allocator: &mut GpuAllocator,
    ) -> Result<()> {
        as_loader.destroy_acceleration_structure(self.handle, None);
        allocator.free_buffer(&mut self.buffer)
    }
}

/// BLAS + TLAS for one scene, with the build inputs kept alive alongside.
pub struct SceneAccelerationStructure {
    pub blas: AccelerationStructure,
    pub tlas: AccelerationStructure,
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
    instance_buffer: GpuBuffer,
    scratch_buffer: GpuBuffer,
    pub primitive_count: u32,
}

impl SceneAccelerationStructure {
    /// Create and build both levels, blocking until the build has finished.
    ///
    /// `triangles` must not be empty.
    ///
    /// # Safety
    /// - The loader must belong to the context's device.
    /// - `pool` must be a command pool of the compute queue family.
    pub unsafe fn build(
        context: &GpuContext,
        pool: &CommandPool,
        as_loader: &ash::khr::acceleration_structure::Device,
        triangles: &[Triangle],
    ) -> Result<Self> {
        let device = context.device();
        let primitive_count = triangles.len() as u32;
        let (positions, indices) = triangle_geometry_data(triangles);

        let mut allocator = context.allocator().lock();

        // 1. Build inputs
        let input_usage = vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
        let vertex_buffer =
            allocator.create_buffer_with_data(&positions, input_usage, "blas_vertices")?;
        let index_buffer = allocator.create_buffer_with_data(&indices, input_usage, "blas_indices")?;

        let blas_geometry = vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
            .flags(vk::GeometryFlagsKHR::OPAQUE)
            .geometry(vk::AccelerationStructureGeometryDataKHR {
                triangles: vk::AccelerationStructureGeometryTrianglesDataKHR::default()
                    .vertex_format(vk::Format::R32G32B32_SFLOAT)
                    .vertex_data(vk::DeviceOrHostAddressConstKHR {
                        device_address: vertex_buffer.device_address(device),
                    })
                    .vertex_stride(std::mem::size_of::<[f32; 3]>() as u64)
                    .max_vertex(positions.len().saturating_sub(1) as u32)
                    .index_type(vk::IndexType::UINT32)
                    .index_data(vk::DeviceOrHostAddressConstKHR {
                        device_address: index_buffer.device_address(device),
                    }),
            });

        // 2. BLAS
        let blas_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL)
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(std::slice::from_ref(&blas_geometry));
        let mut blas_sizes = vk::AccelerationStructureBuildSizesInfoKHR::default();
        as_loader.get_acceleration_structure_build_sizes(
            vk::AccelerationStructureBuildTypeKHR::DEVICE,
            &blas_info,
            &[primitive_count],
            &mut blas_sizes,
        );
        let blas = AccelerationStructure::new(
            &mut allocator,
            as_loader,
            vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            blas_sizes.acceleration_structure_size,
            "blas",
        )?;

        // 3. Single identity instance (row-major 3x4 transform)
        let instance = vk::AccelerationStructureInstanceKHR {
            transform: vk::TransformMatrixKHR {
                matrix: [
                    1.0, 0.0, 0.0, 0.0, //
                    0.0, 1.0, 0.0, 0.0, //
                    0.0, 0.0, 1.0, 0.0,
                ],
            },
            instance_custom_index_and_mask: vk::Packed24_8::new(0, 0xFF),
            instance_shader_binding_table_record_offset_and_flags: vk::Packed24_8::new(
                0,
                vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw() as u8,
            ),
            acceleration_structure_reference: vk::AccelerationStructureReferenceKHR {
                device_handle: blas.device_address,
            },
        };
        let instance_buffer = allocator.create_buffer(
            std::mem::size_of::<vk::AccelerationStructureInstanceKHR>() as u64,
            input_usage,
            MemoryLocation::CpuToGpu,
            "tlas_instances",
        )?;
        let instance_bytes = std::slice::from_raw_parts(
            std::ptr::addr_of!(instance).cast::<u8>(),
            std::mem::size_of::<vk::AccelerationStructureInstanceKHR>(),
        );
        instance_buffer.write_bytes(0, instance_bytes)?;

        // 4. TLAS
        let tlas_geometry = vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::INSTANCES)
            .flags(vk::GeometryFlagsKHR::OPAQUE)
            .geometry(vk::AccelerationStructureGeometryDataKHR {
                instances: vk::AccelerationStructureGeometryInstancesDataKHR::default()
                    .array_of_pointers(false)
                    .data(vk::DeviceOrHostAddressConstKHR {
                        device_address: instance_buffer.device_address(device),
                    }),
            });
        let tlas_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(vk::AccelerationStructureTypeKHR::TOP_LEVEL)
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(std::slice::from_ref(&tlas_geometry));
        let mut tlas_sizes = vk::AccelerationStructureBuildSizesInfoKHR::default();
        as_loader.get_acceleration_structure_build_sizes(
            vk::AccelerationStructureBuildTypeKHR::DEVICE,
            &tlas_info,
            &[1],
            &mut tlas_sizes,
        );
        let tlas = AccelerationStructure::new(
            &mut allocator,
            as_loader,
            vk::AccelerationStructureTypeKHR::TOP_LEVEL,
            tlas_sizes.acceleration_structure_size,
            "tlas",
        )?;

        // 5. Scratch shared by both builds
        let scratch_buffer = allocator.create_buffer(
            blas_sizes.build_scratch_size.max(tlas_sizes.build_scratch_size),
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::GpuOnly,
            "as_scratch",
        )?;
        drop(allocator);

        let mut scene = Self {
            blas,
            tlas,
            vertex_buffer,
            index_buffer,
            instance_buffer,
            scratch_buffer,
            primitive_count,
        };

        // 6. Record both builds with a barrier between them
        let scratch = vk::DeviceOrHostAddressKHR {
            device_address: scene.scratch_buffer.device_address(device),
        };
        let blas_build = blas_info
            .dst_acceleration_structure(scene.blas.handle)
            .scratch_data(scratch);
        let tlas_build = tlas_info
            .dst_acceleration_structure(scene.tlas.handle)
            .scratch_data(scratch);
        let blas_range =
            vk::AccelerationStructureBuildRangeInfoKHR::default().primitive_count(primitive_count);
        let tlas_range = vk::AccelerationStructureBuildRangeInfoKHR::default().primitive_count(1);

        let built = execute_single_time_commands(device, pool, context.compute_queue(), |cmd| {
            as_loader.cmd_build_acceleration_structures(
                cmd,
                std::slice::from_ref(&blas_build),
                &[std::slice::from_ref(&blas_range)],
            );

            let barrier = vk::MemoryBarrier2::default()
                .src_stage_mask(vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR)
                .src_access_mask(vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR)
                .dst_stage_mask(vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR)
                .dst_access_mask(
                    vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR
                        | vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR,
                );
            let dependency_info =
                vk::DependencyInfo::default().memory_barriers(std::slice::from_ref(&barrier));
            device.cmd_pipeline_barrier2(cmd, &dependency_info);

            as_loader.cmd_build_acceleration_structures(
                cmd,
                std::slice::from_ref(&tlas_build),
                &[std::slice::from_ref(&tlas_range)],
            );
        });

        if let Err(e) = built {
            scene.destroy(as_loader, &mut context.allocator().lock())?;
            return Err(e);
        }

        debug!(
            primitives = primitive_count,
            blas_bytes = blas_sizes.acceleration_structure_size,
            tlas_bytes = tlas_sizes.acceleration_structure_size,
            "Acceleration structures built"
        );
        Ok(scene)
    }

    /// The TLAS to bind for tracing.
    pub fn tlas(&self) -> vk::AccelerationStructureKHR {
        self.tlas.handle
    }

    /// Destroy both levels and free every buffer.
    ///
    /// # Safety
    /// The structures must not be in use.
    pub unsafe fn destroy(
        &mut self,
        as_loader: &ash::khr::acceleration_structure::Device,
        allocator: &mut GpuAllocator,
    ) -> Result<()> {
        self.tlas.destroy(as_loader, allocator)?;
        self.blas.destroy(as_loader, allocator)?;
        allocator.free_buffer(&mut self.vertex_buffer)?;
        allocator.free_buffer(&mut self.index_buffer)?;
        allocator.free_buffer(&mut self.instance_buffer)?;
        allocator.free_buffer(&mut self.scratch_buffer)?;
        Ok(())
    }
}
