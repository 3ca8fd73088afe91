//! Teardown of partially created Vulkan objects.

use ash::vk;

/// A raw Vulkan object owned by a [`CreationGuard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VkObject {
    ShaderModule(vk::ShaderModule),
    DescriptorSetLayout(vk::DescriptorSetLayout),
    PipelineLayout(vk::PipelineLayout),
    Pipeline(vk::Pipeline),
    DescriptorPool(vk::DescriptorPool),
    CommandPool(vk::CommandPool),
    Fence(vk::Fence),
}

impl VkObject {
    /// # Safety
    /// The object must belong to `device` and not be in use.
    pub unsafe fn destroy(self, device: &ash::Device) {
        match self {
            Self::ShaderModule(module) => device.destroy_shader_module(module, None),
            Self::DescriptorSetLayout(layout) => device.destroy_descriptor_set_layout(layout, None),
            Self::PipelineLayout(layout) => device.destroy_pipeline_layout(layout, None),
            Self::Pipeline(pipeline) => device.destroy_pipeline(pipeline, None),
            Self::DescriptorPool(pool) => device.destroy_descriptor_pool(pool, None),
            Self::CommandPool(pool) => device.destroy_command_pool(pool, None),
            Self::Fence(fence) => device.destroy_fence(fence, None),
        }
    }
}

/// Destroys the objects pushed into it, newest first, when dropped.
///
/// Constructors that build several objects in a row push each one as it is
/// created and call [`disarm`](Self::disarm) once the owner holds them all, so
/// an early `?` does not leak the objects made before it.
pub struct CreationGuard<'a> {
    destroy: Box<dyn FnMut(VkObject) + 'a>,
    objects: Vec<VkObject>,
}

impl<'a> CreationGuard<'a> {
    /// Guard objects of `device`.
    ///
    /// # Safety
    /// Every pushed object must belong to `device` and must not be in use by
    /// the GPU when the guard is dropped armed.
    pub unsafe fn new(device: &'a ash::Device) -> Self {
        Self::with_destroy(move |object| unsafe { object.destroy(device) })
    }

    /// Guard with a custom teardown for each object.
    pub fn with_destroy(destroy: impl FnMut(VkObject) + 'a) -> Self {
        Self {
            destroy: Box::new(destroy),
            objects: Vec::new(),
        }
    }

    pub fn push(&mut self, object: VkObject) {
        self.objects.push(object);
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Hand ownership of every pushed object back to the caller.
    pub fn disarm(mut self) {
        self.objects.clear();
    }
}

impl Drop for CreationGuard<'_> {
    fn drop(&mut self) {
        while let Some(object) = self.objects.pop() {
            (self.destroy)(object);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn armed_guard_destroys_newest_first() {
        let layout = VkObject::DescriptorSetLayout(vk::DescriptorSetLayout::from_raw(1));
        let pool = VkObject::CommandPool(vk::CommandPool::from_raw(2));
        let fence = VkObject::Fence(vk::Fence::from_raw(3));

        let mut destroyed = Vec::new();
        {
            let mut guard = CreationGuard::with_destroy(|object| destroyed.push(object));
            guard.push(layout);
            guard.push(pool);
            guard.push(fence);
            assert_eq!(guard.len(), 3);
        }
        assert_eq!(destroyed, [fence, pool, layout]);
    }

    #[test]
    fn disarmed_guard_keeps_objects() {
        let mut destroyed = Vec::new();
        {
            let mut guard = CreationGuard::with_destroy(|object| destroyed.push(object));
            guard.push(VkObject::Pipeline(vk::Pipeline::from_raw(7)));
            guard.disarm();
        }
        assert!(destroyed.is_empty());
    }

    #[test]
    fn early_return_releases_created_objects() {
        fn build(destroyed: &mut Vec<VkObject>, fail_at: usize) -> Result<usize, &'static str> {
            let mut guard = CreationGuard::with_destroy(|object| destroyed.push(object));
            for step in 0..4u64 {
                if step as usize == fail_at {
                    return Err("creation failed");
                }
                guard.push(VkObject::Fence(vk::Fence::from_raw(step + 1)));
            }
            let created = guard.len();
            guard.disarm();
            Ok(created)
        }

        let mut destroyed = Vec::new();
        assert!(build(&mut destroyed, 2).is_err());
        assert_eq!(
            destroyed,
            [
                VkObject::Fence(vk::Fence::from_raw(2)),
                VkObject::Fence(vk::Fence::from_raw(1)),
            ]
        );

        destroyed.clear();
        assert_eq!(build(&mut destroyed, 9), Ok(4));
        assert!(destroyed.is_empty());
    }
}
