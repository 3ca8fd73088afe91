//! Test harness for the Radiant renderer.
//!
//! Provides headless final renders, canonical scenes and visual regression
//! testing.

pub mod harness;
pub mod scenes;

pub use harness::{diff_image, image_difference, to_rgba, HeadlessRenderer, VisualRegressionTest};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TestError {
    #[error("GPU error: {0}")]
    Gpu(String),
    #[error("Render failed: {0}")]
    Render(String),
    #[error("Image comparison failed: {0}")]
    ImageComparison(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, TestError>;

/// Visual regression test configuration.
#[derive(Debug, Clone)]
pub struct VisualTestConfig {
    /// Maximum allowed pixel difference (0.0-1.0).
    pub threshold: f64,
    /// Directory for baseline images.
    pub baseline_dir: PathBuf,
    /// Directory for test output images.
    pub output_dir: PathBuf,
}

impl Default for VisualTestConfig {
    fn default() -> Self {
        Self {
            threshold: 0.001,
            baseline_dir: PathBuf::from("assets/test_data/baselines"),
            output_dir: PathBuf::from("target/test_output"),
        }
    }
}
