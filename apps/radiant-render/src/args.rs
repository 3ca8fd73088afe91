//! Command-line parsing.

use anyhow::{bail, Context, Result};
use radiant_trace::{Denoiser, FinalRenderConfig, Tonemap};
use std::path::PathBuf;
use std::str::FromStr;

/// Built-in scene to render.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SceneChoice {
    #[default]
    Cornell,
    Wall,
}

/// Which tracer renders the image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackendChoice {
    #[default]
    Cpu,
    Gpu,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderArgs {
    pub config: FinalRenderConfig,
    pub scene: SceneChoice,
    pub backend: BackendChoice,
    /// Material file applied to the scene's main surface.
    pub material: Option<PathBuf>,
    pub help: bool,
}

impl Default for RenderArgs {
    fn default() -> Self {
        Self {
            config: FinalRenderConfig::default()
                .with_size(640, 480)
                .with_prefer_hardware(false)
                .with_output_path("render.png"),
            scene: SceneChoice::default(),
            backend: BackendChoice::default(),
            material: None,
            help: false,
        }
    }
}

impl RenderArgs {
    /// Parse from a slice of arguments; the first is the program name.
    pub fn parse_args(args: &[String]) -> Result<Self> {
        let mut parsed = Self::default();
        let mut config = parsed.config.clone();

        let mut i = 1;
        while i < args.len() {
            let flag = args[i].as_str();
            let mut value = || next_value(args, &mut i, flag);
            match flag {
                "-h" | "--help" => parsed.help = true,
                "-W" | "--width" => config.width = number(flag, value()?)?,
                "-H" | "--height" => config.height = number(flag, value()?)?,
                "-s" | "--samples" => config.samples = number(flag, value()?)?,
                "-b" | "--bounces" => config.max_bounces = number(flag, value()?)?,
                "--exposure" => config.exposure = number(flag, value()?)?,
                "--gamma" => config.gamma = number(flag, value()?)?,
                "--tonemap" => config.tonemap = parse_tonemap(value()?)?,
                "--denoise" => config.denoiser = parse_denoiser(value()?)?,
                "--denoise-strength" => config.denoise_strength = number(flag, value()?)?,
                "--denoise-radius" => config.denoise_radius = number(flag, value()?)?,
                "-o" | "--output" => config.output_path = Some(PathBuf::from(value()?)),
                "--prefer-rt" => config.prefer_hardware = true,
                "--transparent" => config.transparent_background = true,
                "--scene" => {
                    parsed.scene = match value()? {
                        "cornell" => SceneChoice::Cornell,
                        "wall" => SceneChoice::Wall,
                        other => bail!("Unknown scene {other:?} (expected cornell or wall)"),
                    }
                }
                "--backend" => {
                    parsed.backend = match value()? {
                        "cpu" => BackendChoice::Cpu,
                        "gpu" => BackendChoice::Gpu,
                        other => bail!("Unknown backend {other:?} (expected cpu or gpu)"),
                    }
                }
                "-m" | "--material" => parsed.material = Some(PathBuf::from(value()?)),
                other => bail!("Unknown option {other:?}"),
            }
            i += 1;
        }

        if !parsed.help {
            config.validate()?;
        }
        parsed.config = config;
        Ok(parsed)
    }
}

fn next_value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .with_context(|| format!("{flag} needs a value"))
}

fn number<T: FromStr>(flag: &str, text: &str) -> Result<T> {
    text.parse()
        .ok()
        .with_context(|| format!("{flag}: invalid number {text:?}"))
}

fn parse_tonemap(text: &str) -> Result<Tonemap> {
    Ok(match text {
        "none" => Tonemap::None,
        "reinhard" => Tonemap::Reinhard,
        "aces" => Tonemap::Aces,
        other => bail!("Unknown tonemap {other:?} (expected none, reinhard or aces)"),
    })
}

fn parse_denoiser(text: &str) -> Result<Denoiser> {
    Ok(match text {
        "none" => Denoiser::None,
        "box" => Denoiser::Box,
        "bilateral" => Denoiser::Bilateral,
        other => bail!("Unknown denoiser {other:?} (expected none, box or bilateral)"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("radiant-render")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn defaults_without_flags() {
        let parsed = RenderArgs::parse_args(&args(&[])).unwrap();
        assert_eq!(parsed, RenderArgs::default());
        assert_eq!(parsed.config.output_path, Some(PathBuf::from("render.png")));
        assert!(!parsed.config.prefer_hardware);
    }

    #[test]
    fn parses_every_option() {
        let parsed = RenderArgs::parse_args(&args(&[
            "-W", "320", "--height", "200", "-s", "16", "--bounces", "4", "--exposure", "1.5",
            "--gamma", "2.4", "--tonemap", "reinhard", "--denoise", "bilateral",
            "--denoise-strength", "0.5", "--denoise-radius", "3", "-o", "out.jpg", "--prefer-rt",
            "--transparent", "--scene", "wall", "--backend", "gpu", "-m", "stone.mat",
        ]))
        .unwrap();

        let config = &parsed.config;
        assert_eq!((config.width, config.height), (320, 200));
        assert_eq!(config.samples, 16);
        assert_eq!(config.max_bounces, 4);
        assert_eq!(config.exposure, 1.5);
        assert_eq!(config.gamma, 2.4);
        assert_eq!(config.tonemap, Tonemap::Reinhard);
        assert_eq!(config.denoiser, Denoiser::Bilateral);
        assert_eq!(config.denoise_strength, 0.5);
        assert_eq!(config.denoise_radius, 3);
        assert_eq!(config.output_path, Some(PathBuf::from("out.jpg")));
        assert!(config.prefer_hardware);
        assert!(config.transparent_background);
        assert_eq!(parsed.scene, SceneChoice::Wall);
        assert_eq!(parsed.backend, BackendChoice::Gpu);
        assert_eq!(parsed.material, Some(PathBuf::from("stone.mat")));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(RenderArgs::parse_args(&args(&["--samples"])).is_err());
        assert!(RenderArgs::parse_args(&args(&["--samples", "many"])).is_err());
        assert!(RenderArgs::parse_args(&args(&["--tonemap", "filmic"])).is_err());
        assert!(RenderArgs::parse_args(&args(&["--frobnicate"])).is_err());
        // Parsed fine but fails validation
        assert!(RenderArgs::parse_args(&args(&["--samples", "0"])).is_err());
    }

    #[test]
    fn help_skips_validation() {
        let parsed = RenderArgs::parse_args(&args(&["--samples", "0", "--help"])).unwrap();
        assert!(parsed.help);
    }
}
