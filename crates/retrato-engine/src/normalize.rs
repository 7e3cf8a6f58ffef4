use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader, Rgb, RgbImage, RgbaImage};
use thiserror::Error;

/// Width:height ratio every submitted photo is cropped to.
pub const TARGET_RATIO: f64 = 3.0 / 4.0;
/// Photos taller than this are downscaled before submission.
pub const MAX_HEIGHT: u32 = 1200;

const RATIO_TOLERANCE: f64 = 0.01;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("input image not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read image: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to process image: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    /// Opt-out flag: background removal is a best-effort enhancement and
    /// is attempted unless explicitly disabled.
    pub remove_background: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            remove_background: true,
        }
    }
}

/// Best-effort foreground isolation. Implementations return the same-sized
/// image with background pixels made transparent; any error means the
/// original pixels are used unchanged.
pub trait BackgroundSegmenter {
    fn segment(&self, image: &RgbaImage) -> anyhow::Result<RgbaImage>;
}

/// Built-in matte segmenter: samples the border ring to estimate the
/// background color and clears pixels close to it. Refuses to matte when
/// the border is not near-uniform, which makes the fallback path explicit
/// for busy backgrounds.
#[derive(Debug, Clone)]
pub struct EdgeMatteSegmenter {
    /// Max mean deviation of border pixels from their average before the
    /// background is considered non-uniform.
    pub uniformity_limit: u32,
    /// Max per-pixel distance from the background color to be cleared.
    pub matte_distance: u32,
}

impl Default for EdgeMatteSegmenter {
    fn default() -> Self {
        Self {
            uniformity_limit: 24,
            matte_distance: 90,
        }
    }
}

impl BackgroundSegmenter for EdgeMatteSegmenter {
    fn segment(&self, image: &RgbaImage) -> anyhow::Result<RgbaImage> {
        let (width, height) = image.dimensions();
        if width < 4 || height < 4 {
            anyhow::bail!("image too small to matte ({width}x{height})");
        }

        let mut sums = [0u64; 3];
        let mut count = 0u64;
        for (x, y, pixel) in image.enumerate_pixels() {
            if x == 0 || y == 0 || x == width - 1 || y == height - 1 {
                sums[0] += u64::from(pixel[0]);
                sums[1] += u64::from(pixel[1]);
                sums[2] += u64::from(pixel[2]);
                count += 1;
            }
        }
        let mean = [
            (sums[0] / count) as u8,
            (sums[1] / count) as u8,
            (sums[2] / count) as u8,
        ];

        let mut deviation = 0u64;
        for (x, y, pixel) in image.enumerate_pixels() {
            if x == 0 || y == 0 || x == width - 1 || y == height - 1 {
                deviation += u64::from(channel_distance(pixel.0, mean));
            }
        }
        if deviation / count > u64::from(self.uniformity_limit) {
            anyhow::bail!("border is not uniform enough to matte");
        }

        let mut matted = image.clone();
        for pixel in matted.pixels_mut() {
            if u32::from(channel_distance(pixel.0, mean)) <= self.matte_distance {
                pixel[3] = 0;
            }
        }
        Ok(matted)
    }
}

fn channel_distance(pixel: [u8; 4], mean: [u8; 3]) -> u16 {
    let d = |a: u8, b: u8| u16::from(a.abs_diff(b));
    d(pixel[0], mean[0]) + d(pixel[1], mean[1]) + d(pixel[2], mean[2])
}

/// Normalizes raw image bytes for submission to the remote evaluator:
/// EXIF orientation first, then a centered crop to 3:4 (no-op within a 1%
/// ratio tolerance), best-effort background removal, a proportional
/// downscale when taller than [`MAX_HEIGHT`], and a flatten onto an opaque
/// white canvas. The result is re-encoded as PNG; the input is never
/// mutated.
pub fn normalize_image(
    bytes: &[u8],
    options: &NormalizeOptions,
    segmenter: Option<&dyn BackgroundSegmenter>,
) -> Result<Vec<u8>, NormalizeError> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let mut decoder = reader.into_decoder()?;
    let orientation = decoder
        .orientation()
        .unwrap_or(Orientation::NoTransforms);
    let mut decoded = DynamicImage::from_decoder(decoder)?;
    decoded.apply_orientation(orientation);

    let mut rgba = decoded.to_rgba8();
    if options.remove_background {
        if let Some(segmenter) = segmenter {
            if let Ok(matted) = segmenter.segment(&rgba) {
                if matted.dimensions() == rgba.dimensions() {
                    rgba = matted;
                }
            }
        }
    }

    let cropped = crop_to_ratio(&rgba, TARGET_RATIO);
    let resized = downscale_if_needed(cropped, TARGET_RATIO);
    let flattened = flatten_onto_white(&resized);

    let mut out = Vec::new();
    DynamicImage::ImageRgb8(flattened).write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
    Ok(out)
}

/// File-based entry point. A missing input is the only hard failure of the
/// normalization step; the output is written by the caller, never back to
/// the source.
pub fn normalize_file(
    path: &Path,
    options: &NormalizeOptions,
    segmenter: Option<&dyn BackgroundSegmenter>,
) -> Result<Vec<u8>, NormalizeError> {
    if !path.exists() {
        return Err(NormalizeError::NotFound(path.to_path_buf()));
    }
    let bytes = fs::read(path)?;
    normalize_image(&bytes, options, segmenter)
}

fn crop_to_ratio(image: &RgbaImage, ratio: f64) -> RgbaImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }

    let current = f64::from(width) / f64::from(height);
    if (current - ratio).abs() <= RATIO_TOLERANCE {
        return image.clone();
    }

    if current > ratio {
        let target_width = ((f64::from(height) * ratio).round() as u32).clamp(1, width);
        let offset = (width - target_width) / 2;
        imageops::crop_imm(image, offset, 0, target_width, height).to_image()
    } else {
        let target_height = ((f64::from(width) / ratio).round() as u32).clamp(1, height);
        let offset = (height - target_height) / 2;
        imageops::crop_imm(image, 0, offset, width, target_height).to_image()
    }
}

fn downscale_if_needed(image: RgbaImage, ratio: f64) -> RgbaImage {
    let height = image.height();
    if height <= MAX_HEIGHT {
        return image;
    }
    let new_height = MAX_HEIGHT;
    let new_width = ((f64::from(new_height) * ratio).round() as u32).max(1);
    imageops::resize(&image, new_width, new_height, FilterType::Lanczos3)
}

fn flatten_onto_white(image: &RgbaImage) -> RgbImage {
    let mut out = RgbImage::new(image.width(), image.height());
    for (x, y, pixel) in image.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend =
            |channel: u8| -> u8 { (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8 };
        out.put_pixel(x, y, Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
    }
    out
}
