//! Descriptor bindings that must be rewritten before the next trace.

use bitflags::bitflags;

bitflags! {
    /// Descriptor groups whose resources changed since they were last written.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DirtyFlags: u8 {
        /// TLAS, triangle and material buffers.
        const GEOMETRY = 1 << 0;
        /// Accumulation image.
        const IMAGE = 1 << 1;
        /// Environment and light buffer.
        const LIGHTS = 1 << 2;
    }
}

impl DirtyFlags {
    /// Remove and return the flags that were set.
    pub fn take(&mut self) -> Self {
        std::mem::replace(self, Self::empty())
    }
}
