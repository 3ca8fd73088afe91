//! Runtime detection of hardware ray tracing support.

use radiant_gpu::{GpuContext, RayTracingCapabilities};

/// Ray recursion depth of the pipeline: primary rays plus shadow rays cast
/// from the closest-hit shader.
pub const RECURSION_DEPTH: u32 = 2;

/// Whether the hardware tracer can run on a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RayTracingSupport {
    Supported(RayTracingCapabilities),
    Unsupported(String),
}

impl RayTracingSupport {
    /// Inspect the device behind `context`.
    pub fn detect(context: &GpuContext) -> Self {
        if !crate::is_available() {
            return Self::Unsupported("built without the rtx feature".to_string());
        }
        Self::from_capabilities(
            &context.capabilities().ray_tracing,
            context.ray_tracing_enabled(),
        )
    }

    /// Decide from a capability set and whether the device was created with
    /// the ray tracing extensions enabled.
    pub fn from_capabilities(capabilities: &RayTracingCapabilities, enabled: bool) -> Self {
        let missing = capabilities.missing(RECURSION_DEPTH);
        if !missing.is_empty() {
            return Self::Unsupported(format!("device lacks {}", missing.join(", ")));
        }
        if !enabled {
            return Self::Unsupported(
                "ray tracing extensions were not enabled on the device".to_string(),
            );
        }
        Self::Supported(*capabilities)
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Supported(_))
    }

    /// Why the tracer cannot run, if it cannot.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Supported(_) => None,
            Self::Unsupported(reason) => Some(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full() -> RayTracingCapabilities {
        RayTracingCapabilities {
            supports_ray_tracing_pipeline: true,
            supports_acceleration_structure: true,
            supports_deferred_host_operations: true,
            supports_buffer_device_address: true,
            max_ray_recursion_depth: 31,
            shader_group_handle_size: 32,
            shader_group_handle_alignment: 32,
            shader_group_base_alignment: 64,
        }
    }

    #[test]
    fn no_capabilities_lists_everything_missing() {
        let support = RayTracingSupport::from_capabilities(&RayTracingCapabilities::NONE, false);
        let reason = support.reason().unwrap();
        assert!(reason.contains("ray tracing pipeline"));
        assert!(reason.contains("acceleration structure"));
        assert!(reason.contains("buffer device address"));
        assert!(!support.is_supported());
    }

    #[test]
    fn shallow_recursion_is_unsupported() {
        let caps = RayTracingCapabilities {
            max_ray_recursion_depth: 1,
            ..full()
        };
        let support = RayTracingSupport::from_capabilities(&caps, true);
        assert_eq!(
            support.reason(),
            Some("device lacks ray recursion depth")
        );
    }

    #[test]
    fn capable_but_disabled_device() {
        let support = RayTracingSupport::from_capabilities(&full(), false);
        assert!(!support.is_supported());
        assert!(support.reason().unwrap().contains("not enabled"));
    }

    #[test]
    fn full_support() {
        assert_eq!(
            RayTracingSupport::from_capabilities(&full(), true),
            RayTracingSupport::Supported(full())
        );
    }
}
