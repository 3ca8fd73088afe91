//! Core types, math, and traits for the Radiant renderer.
//!
//! This crate provides the foundational types shared by the tracers and the
//! material system:
//! - Rays and axis-aligned bounding boxes
//! - Scene primitives (triangles, materials, lights, environment)
//! - Common error types

pub mod error;
pub mod math;
pub mod types;

pub use error::{Error, Result};
pub use math::{Aabb, Ray};
pub use types::{Environment, EnvironmentMap, Light, LightKind, Material, Triangle};

/// Engine-wide constants
pub mod constants {
    /// Offset applied along the surface normal when spawning secondary rays.
    pub const RAY_EPSILON: f32 = 1.0e-4;
    /// Sentinel for "no hit" distances.
    pub const T_MAX: f32 = 1.0e30;
}
