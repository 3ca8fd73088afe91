//! Post-processing of accumulated HDR sums into a displayable image.
//!
//! Order: resolve (divide by sample count), optional denoise, exposure,
//! tonemap, gamma, 8-bit quantization.

use crate::frame::{HdrImage, RenderedImage};
use crate::settings::{Denoiser, RenderSettings, Tonemap};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Range sigma of the bilateral filter, in linear radiance.
const BILATERAL_RANGE_SIGMA: f32 = 0.2;

/// Display transform settings for a resolved image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PostSettings {
    pub exposure: f32,
    pub tonemap: Tonemap,
    pub gamma: f32,
    pub denoiser: Denoiser,
    /// Blend between the noisy (0) and filtered (1) image.
    pub denoise_strength: f32,
    pub denoise_radius: u32,
    pub transparent_background: bool,
}

impl Default for PostSettings {
    fn default() -> Self {
        Self::from_settings(&RenderSettings::default())
    }
}

impl PostSettings {
    pub fn from_settings(settings: &RenderSettings) -> Self {
        Self {
            exposure: settings.exposure,
            tonemap: settings.tonemap,
            gamma: settings.gamma,
            denoiser: settings.denoiser,
            denoise_strength: settings.denoise_strength,
            denoise_radius: settings.denoise_radius,
            transparent_background: settings.transparent_background(),
        }
    }

    /// Identity display transform: no tonemap, linear gamma.
    pub fn linear() -> Self {
        Self {
            exposure: 1.0,
            tonemap: Tonemap::None,
            gamma: 1.0,
            denoiser: Denoiser::None,
            denoise_strength: 0.0,
            denoise_radius: 0,
            transparent_background: false,
        }
    }
}

/// Divide accumulated sums by the sample count.
pub fn resolve(hdr: &HdrImage, samples: u32) -> HdrImage {
    let scale = 1.0 / samples.max(1) as f32;
    HdrImage {
        width: hdr.width,
        height: hdr.height,
        pixels: hdr
            .pixels
            .iter()
            .map(|p| [p[0] * scale, p[1] * scale, p[2] * scale, p[3] * scale])
            .collect(),
    }
}

/// Run the selected denoiser over a resolved image, blending by strength.
///
/// Cost is `O(radius²)` per pixel. Alpha is left untouched.
#[tracing::instrument(skip(image), fields(width = image.width, height = image.height))]
pub fn denoise(image: &HdrImage, denoiser: Denoiser, strength: f32, radius: u32) -> HdrImage {
    let strength = strength.clamp(0.0, 1.0);
    if denoiser == Denoiser::None || radius == 0 || strength <= 0.0 || image.pixels.is_empty() {
        return image.clone();
    }

    let width = image.width as usize;
    let height = image.height as usize;
    let r = radius as i64;
    let spatial_sigma = (radius as f32 * 0.5).max(0.5);
    let inv_spatial = 1.0 / (2.0 * spatial_sigma * spatial_sigma);
    let inv_range = 1.0 / (2.0 * BILATERAL_RANGE_SIGMA * BILATERAL_RANGE_SIGMA);

    let mut out = image.pixels.clone();
    out.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
        for (x, dst) in row.iter_mut().enumerate() {
            let center = image.pixels[y * width + x];
            let mut sum = [0.0f32; 3];
            let mut weight_sum = 0.0f32;

            for dy in -r..=r {
                let sy = y as i64 + dy;
                if sy < 0 || sy >= height as i64 {
                    continue;
                }
                for dx in -r..=r {
                    let sx = x as i64 + dx;
                    if sx < 0 || sx >= width as i64 {
                        continue;
                    }
                    let sample = image.pixels[sy as usize * width + sx as usize];
                    let weight = match denoiser {
                        Denoiser::Bilateral => {
                            let dist2 = (dx * dx + dy * dy) as f32;
                            let diff2 = (0..3)
                                .map(|c| (sample[c] - center[c]).powi(2))
                                .sum::<f32>();
                            (-dist2 * inv_spatial - diff2 * inv_range).exp()
                        }
                        _ => 1.0,
                    };
                    for c in 0..3 {
                        sum[c] += sample[c] * weight;
                    }
                    weight_sum += weight;
                }
            }

            if weight_sum > 0.0 {
                for c in 0..3 {
                    let filtered = sum[c] / weight_sum;
                    dst[c] = center[c] + (filtered - center[c]) * strength;
                }
            }
        }
    });

    HdrImage {
        width: image.width,
        height: image.height,
        pixels: out,
    }
}

/// Map a linear channel value to `[0, 1]`.
pub fn tonemap(x: f32, operator: Tonemap) -> f32 {
    let x = x.max(0.0);
    match operator {
        Tonemap::None => x.min(1.0),
        Tonemap::Reinhard => x / (1.0 + x),
        Tonemap::Aces => {
            const A: f32 = 2.51;
            const B: f32 = 0.03;
            const C: f32 = 2.43;
            const D: f32 = 0.59;
            const E: f32 = 0.14;
            ((x * (A * x + B)) / (x * (C * x + D) + E)).clamp(0.0, 1.0)
        }
    }
}

/// Gamma-encode a display value; gamma close to 1 is a no-op.
pub fn gamma_encode(x: f32, gamma: f32) -> f32 {
    if gamma <= 0.0 || (gamma - 1.0).abs() < 1.0e-4 {
        x
    } else {
        x.powf(1.0 / gamma)
    }
}

#[inline]
fn quantize(x: f32) -> u8 {
    (x.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Resolve, denoise, tonemap and quantize accumulated sums.
pub fn process(hdr: &HdrImage, samples: u32, settings: &PostSettings) -> RenderedImage {
    let resolved = resolve(hdr, samples);
    let filtered = denoise(
        &resolved,
        settings.denoiser,
        settings.denoise_strength,
        settings.denoise_radius,
    );

    let mut pixels = Vec::with_capacity(filtered.pixels.len() * 4);
    for p in &filtered.pixels {
        for c in &p[..3] {
            let mapped = tonemap(c * settings.exposure, settings.tonemap);
            pixels.push(quantize(gamma_encode(mapped, settings.gamma)));
        }
        let alpha = if settings.transparent_background {
            p[3]
        } else {
            1.0
        };
        pixels.push(quantize(alpha));
    }

    RenderedImage {
        width: hdr.width,
        height: hdr.height,
        pixels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn uniform(width: u32, height: u32, value: [f32; 4]) -> HdrImage {
        HdrImage {
            width,
            height,
            pixels: vec![value; (width * height) as usize],
        }
    }

    #[test]
    fn tonemap_is_monotonic_and_bounded() {
        for op in [Tonemap::None, Tonemap::Reinhard, Tonemap::Aces] {
            let mut previous = 0.0;
            for i in 0..200 {
                let v = tonemap(i as f32 * 0.1, op);
                assert!((0.0..=1.0).contains(&v), "{op:?} out of range");
                assert!(v >= previous, "{op:?} not monotonic");
                previous = v;
            }
            assert_eq!(tonemap(0.0, op), 0.0);
            assert_eq!(tonemap(-3.0, op), 0.0);
        }
        assert_relative_eq!(tonemap(1.0, Tonemap::Reinhard), 0.5);
        assert_eq!(tonemap(2.0, Tonemap::None), 1.0);
    }

    #[test]
    fn aces_follows_fitted_curve() {
        let mid = tonemap(1.0, Tonemap::Aces);
        assert!(mid > 0.0 && mid < 1.0);
        assert_relative_eq!(mid, 2.54 / 3.16, epsilon = 1e-6);
        assert_relative_eq!(tonemap(0.5, Tonemap::Aces), 0.6425 / 1.0425, epsilon = 1e-6);
        // Curve tends to 2.51 / 2.43 and is clamped before that
        assert_eq!(tonemap(10.0, Tonemap::Aces), 1.0);
    }

    #[test]
    fn gamma_one_is_identity() {
        assert_eq!(gamma_encode(0.3, 1.0), 0.3);
        assert_relative_eq!(gamma_encode(0.25, 2.0), 0.5);
    }

    #[test]
    fn linear_process_quantizes_half_to_128() {
        let hdr = uniform(2, 2, [2.0, 2.0, 2.0, 4.0]);
        let image = process(&hdr, 4, &PostSettings::linear());
        assert_eq!(image.pixel(1, 1), [128, 128, 128, 255]);
    }

    #[test]
    fn alpha_forced_opaque_unless_transparent() {
        let hdr = uniform(1, 1, [0.0, 0.0, 0.0, 0.0]);
        let opaque = process(&hdr, 1, &PostSettings::linear());
        assert_eq!(opaque.pixel(0, 0)[3], 255);

        let settings = PostSettings {
            transparent_background: true,
            ..PostSettings::linear()
        };
        assert_eq!(process(&hdr, 1, &settings).pixel(0, 0)[3], 0);
    }

    #[test]
    fn denoise_preserves_flat_images() {
        let image = uniform(5, 4, [0.4, 0.2, 0.1, 1.0]);
        for denoiser in [Denoiser::Box, Denoiser::Bilateral] {
            let out = denoise(&image, denoiser, 1.0, 2);
            for (a, b) in out.pixels.iter().zip(&image.pixels) {
                for c in 0..4 {
                    assert_relative_eq!(a[c], b[c], epsilon = 1e-5);
                }
            }
        }
    }

    #[test]
    fn box_filter_spreads_an_impulse() {
        let mut image = uniform(3, 3, [0.0; 4]);
        image.pixels[4] = [9.0, 9.0, 9.0, 1.0];
        let out = denoise(&image, Denoiser::Box, 1.0, 1);
        // Full 3x3 window at the center, clipped 2x2 window at a corner
        assert_relative_eq!(out.pixel(1, 1)[0], 1.0, epsilon = 1e-5);
        assert_relative_eq!(out.pixel(0, 0)[0], 2.25, epsilon = 1e-5);
        assert_eq!(out.pixel(1, 1)[3], 1.0);
    }

    #[test]
    fn zero_strength_is_a_no_op() {
        let mut image = uniform(3, 3, [0.0; 4]);
        image.pixels[4] = [9.0, 9.0, 9.0, 1.0];
        assert_eq!(denoise(&image, Denoiser::Box, 0.0, 2), image);
    }

    #[test]
    fn bilateral_keeps_strong_edges() {
        let mut image = uniform(4, 1, [0.0, 0.0, 0.0, 1.0]);
        image.pixels[2] = [5.0, 5.0, 5.0, 1.0];
        image.pixels[3] = [5.0, 5.0, 5.0, 1.0];
        let out = denoise(&image, Denoiser::Bilateral, 1.0, 1);
        assert!(out.pixels[1][0] < 1.0e-3);
        assert!(out.pixels[2][0] > 4.99);
    }
}
