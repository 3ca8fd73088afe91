//! Radiant command-line renderer
//!
//! Runs a final render of a built-in scene and writes the image to disk.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p radiant-render -- [OPTIONS]
//! ```
//!
//! ## Examples
//!
//! ```bash
//! # Cornell box, 64 samples, denoised
//! cargo run --release -p radiant-render -- -s 64 --denoise bilateral -o box.png
//!
//! # Shade the wall scene with a saved material
//! cargo run --release -p radiant-render -- --scene wall -m stone.mat
//!
//! # GPU render, hardware ray tracing when available
//! cargo run --release -p radiant-render --features vulkan -- --backend gpu --prefer-rt
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod args;

use anyhow::Result;
use radiant_material::{flatten, MaterialAsset};
use radiant_test::{scenes, HeadlessRenderer};
use radiant_trace::{Camera, SceneData};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::args::{BackendChoice, RenderArgs, SceneChoice};

/// Progress is logged every time it crosses another multiple of this.
const PROGRESS_STEP: f32 = 0.1;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let args = RenderArgs::parse_args(&args)?;
    if args.help {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let (scene, camera) = build_scene(&args)?;
    let mut renderer = create_renderer(&args)?;
    info!(
        backend = ?renderer.backend(),
        width = args.config.width,
        height = args.config.height,
        samples = args.config.samples,
        "Rendering"
    );

    let mut next_report = PROGRESS_STEP;
    let image = renderer.render_with_progress(args.config.clone(), &camera, &scene, |job| {
        if job.progress() >= next_report {
            let eta_s = job.eta().map_or(0.0, |eta| eta.as_secs_f32());
            info!(progress = %format!("{:.0}%", job.progress() * 100.0), eta_s, "Rendering");
            while next_report <= job.progress() {
                next_report += PROGRESS_STEP;
            }
        }
    })?;

    let elapsed = renderer.job().elapsed();
    match &args.config.output_path {
        Some(path) => info!(
            path = %path.display(),
            width = image.width,
            height = image.height,
            elapsed_ms = elapsed.as_millis() as u64,
            "Render written"
        ),
        None => info!(elapsed_ms = elapsed.as_millis() as u64, "Render finished"),
    }
    Ok(())
}

fn build_scene(args: &RenderArgs) -> Result<(SceneData, Camera)> {
    let (mut scene, camera) = match args.scene {
        SceneChoice::Cornell => scenes::cornell_box(),
        SceneChoice::Wall => (scenes::constant_wall(0.5), scenes::front_camera()),
    };

    if let Some(path) = &args.material {
        let asset = MaterialAsset::load(path)?;
        let material = flatten(asset.graph());
        info!(material = %asset.name(), path = %path.display(), "Applying material");
        match scene.materials.first_mut() {
            Some(first) => *first = material,
            None => warn!("Scene has no material slot to replace"),
        }
    }
    Ok((scene, camera))
}

fn create_renderer(args: &RenderArgs) -> Result<HeadlessRenderer> {
    match args.backend {
        BackendChoice::Cpu => {
            if args.config.prefer_hardware {
                warn!("--prefer-rt has no effect on the CPU backend");
            }
            Ok(HeadlessRenderer::cpu())
        }
        #[cfg(feature = "vulkan")]
        BackendChoice::Gpu => Ok(HeadlessRenderer::gpu(args.config.prefer_hardware)?),
        #[cfg(not(feature = "vulkan"))]
        BackendChoice::Gpu => anyhow::bail!("GPU rendering requires building with --features vulkan"),
    }
}

fn print_help() {
    eprintln!(
        "Radiant command-line renderer

USAGE:
    radiant-render [OPTIONS]

IMAGE OPTIONS:
    -W, --width <N>             Image width (default: 640)
    -H, --height <N>            Image height (default: 480)
    -s, --samples <N>           Samples per pixel (default: 128)
    -b, --bounces <N>           Maximum path length (default: 8)
    -o, --output <PATH>         Output image; .png, .jpg or .bmp (default: render.png)
    --transparent               Keep escaped rays transparent in the alpha channel

POST-PROCESSING OPTIONS:
    --exposure <X>              Linear exposure multiplier (default: 1.0)
    --tonemap <OP>              none, reinhard or aces (default: aces)
    --gamma <X>                 Display gamma (default: 2.2)
    --denoise <FILTER>          none, box or bilateral (default: none)
    --denoise-strength <X>      Blend towards the filtered image, 0-1
    --denoise-radius <N>        Filter radius in pixels

SCENE OPTIONS:
    --scene <NAME>              cornell or wall (default: cornell)
    -m, --material <PATH>       Material file applied to the scene's first material

BACKEND OPTIONS:
    --backend <NAME>            cpu or gpu (default: cpu; gpu needs the vulkan feature)
    --prefer-rt                 Use hardware ray tracing when the device supports it

OTHER:
    -h, --help                  Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                    Set log level (e.g., info, debug, trace)"
    );
}
