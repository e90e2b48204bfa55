//! Image conditioning module
//!
//! Prepares a scanned prescription for submission to the OCR service:
//! - Size management (adaptive downscale toward the payload target)
//! - Dimension clamping
//! - Contrast-driven enhancement strategy
//! - Final re-compression near the hard limit
//!
//! Everything here is deterministic for a given input and configuration.

use crate::config::ConditionerConfig;
use crate::error::{ImageLoadError, ImageRejection};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use imageproc::contrast::otsu_level;
use imageproc::distance_transform::Norm;
use imageproc::filter::{gaussian_blur_f32, median_filter};
use imageproc::morphology::{close, open};
use std::path::Path;
use tracing::{debug, info, warn};

/// Enhancement path chosen from measured grayscale contrast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContrastStrategy {
    /// Low contrast: denoise, Otsu binarization, morphological cleanup
    Binarize,
    /// High contrast: denoise, local luminance equalization, unsharp mask
    Enhance,
    /// Medium contrast: light denoise only
    Minimal,
}

/// Quality statistics measured on an image
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageStats {
    /// Standard deviation of grayscale intensity
    pub contrast: f32,
    /// Mean grayscale intensity
    pub brightness: f32,
    /// Estimated encoded JPEG size in bytes
    pub encoded_size: usize,
}

/// An image ready for OCR submission
#[derive(Debug, Clone)]
pub struct ConditionedImage {
    pub image: RgbImage,
    /// Statistics measured before enhancement, with the final size estimate
    pub stats: ImageStats,
    pub strategy: ContrastStrategy,
}

impl ConditionedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn pixel_count(&self) -> u64 {
        self.image.width() as u64 * self.image.height() as u64
    }

    /// Encode as JPEG at the given quality
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, image::ImageError> {
        encode_jpeg(&self.image, quality)
    }

    /// Check the OCR service's payload and dimension limits
    pub fn validate(&self, config: &ConditionerConfig) -> Result<(), ImageRejection> {
        let (width, height) = self.image.dimensions();
        let in_range = |side: u32| (config.min_side..=config.max_side).contains(&side);
        if !in_range(width) || !in_range(height) {
            return Err(ImageRejection::BadDimensions {
                width,
                height,
                min: config.min_side,
                max: config.max_side,
            });
        }

        let size = estimate_size(&self.image, config.estimate_quality);
        if size > config.hard_limit_bytes {
            return Err(ImageRejection::TooLarge {
                size,
                limit: config.hard_limit_bytes,
            });
        }
        Ok(())
    }
}

/// Normalizes size, contrast and sharpness of prescription scans
#[derive(Debug, Clone, Default)]
pub struct ImageConditioner {
    config: ConditionerConfig,
}

impl ImageConditioner {
    pub fn new(config: ConditionerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConditionerConfig {
        &self.config
    }

    /// Load and condition the image at `path`
    ///
    /// # Errors
    /// * `ImageLoadError::NotFound` if the file does not exist
    /// * `ImageLoadError::Decode` if it cannot be read as an image
    pub fn condition(&self, path: &Path) -> Result<ConditionedImage, ImageLoadError> {
        if !path.exists() {
            return Err(ImageLoadError::NotFound {
                path: path.to_path_buf(),
            });
        }
        // format comes from the content; the extension is only a fallback
        let input = image::ImageReader::open(path)
            .and_then(|reader| reader.with_guessed_format())
            .map_err(image::ImageError::from)
            .and_then(|reader| reader.decode())
            .map_err(|source| ImageLoadError::Decode {
                path: path.to_path_buf(),
                source,
            })?;
        info!("Original image size: {}x{}", input.width(), input.height());
        Ok(self.condition_image(input))
    }

    /// Condition an already decoded image
    pub fn condition_image(&self, input: DynamicImage) -> ConditionedImage {
        let config = &self.config;

        let image = self.fit_to_target(input.to_rgb8());
        let image = clamp_dimension(image, config.max_dimension);
        debug!("Working size: {}x{}", image.width(), image.height());

        let gray = image::imageops::grayscale(&image);
        let (brightness, contrast) = grayscale_stats(&gray);
        let strategy = self.choose_strategy(contrast);
        info!(
            "Image metrics - contrast: {:.1}, brightness: {:.1}, strategy: {:?}",
            contrast, brightness, strategy
        );

        let mut processed = match strategy {
            ContrastStrategy::Binarize => binarize(&gray),
            ContrastStrategy::Enhance => enhance(&image),
            ContrastStrategy::Minimal => light_denoise(&gray),
        };

        let mut encoded_size = self.estimate(&processed);
        if encoded_size > config.hard_limit_bytes.saturating_sub(config.final_margin_bytes) {
            info!("Final size {} bytes is near the limit; re-compressing", encoded_size);
            processed = scale_image(&processed, config.final_scale);
            encoded_size = self.estimate(&processed);
        }

        ConditionedImage {
            image: processed,
            stats: ImageStats {
                contrast,
                brightness,
                encoded_size,
            },
            strategy,
        }
    }

    /// Select an enhancement strategy from grayscale contrast
    pub fn choose_strategy(&self, contrast: f32) -> ContrastStrategy {
        if contrast < self.config.low_contrast {
            ContrastStrategy::Binarize
        } else if contrast > self.config.high_contrast {
            ContrastStrategy::Enhance
        } else {
            ContrastStrategy::Minimal
        }
    }

    /// Downscale until the encoded size fits the target, never shrinking
    /// the shorter side below the configured floor. Best effort: the last
    /// attempt is returned when the iteration budget runs out.
    fn fit_to_target(&self, image: RgbImage) -> RgbImage {
        let config = &self.config;
        let current = self.estimate(&image);
        if current <= config.target_size_bytes {
            return image;
        }

        let short_side = image.width().min(image.height());
        if short_side <= config.min_dimension {
            debug!("Image already at minimum dimension; skipping downscale");
            return image;
        }

        let floor = config.min_dimension as f32 / short_side as f32;
        let ratio = config.target_size_bytes as f32 / current as f32;
        let mut scale = (ratio * 0.9).sqrt().max(floor);
        let mut resized = scale_image(&image, scale);

        for _ in 0..config.max_resize_iterations {
            if scale <= floor || self.estimate(&resized) <= config.target_size_bytes {
                break;
            }
            scale = (scale * 0.9).max(floor);
            resized = scale_image(&image, scale);
        }

        info!(
            "After size optimization: {}x{} (scale {:.2})",
            resized.width(),
            resized.height(),
            scale
        );
        resized
    }

    fn estimate(&self, image: &RgbImage) -> usize {
        estimate_size(image, self.config.estimate_quality)
    }
}

/// Encode an image as JPEG at the given quality
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(image)?;
    Ok(buf)
}

/// Encoded JPEG size in bytes (0 if encoding fails)
pub fn estimate_size(image: &RgbImage, quality: u8) -> usize {
    match encode_jpeg(image, quality) {
        Ok(buf) => buf.len(),
        Err(e) => {
            warn!("Failed to estimate encoded size: {}", e);
            0
        }
    }
}

/// Mean and standard deviation of grayscale intensity
pub fn grayscale_stats(gray: &GrayImage) -> (f32, f32) {
    let count = gray.as_raw().len();
    if count == 0 {
        return (0.0, 0.0);
    }
    let sum: u64 = gray.as_raw().iter().map(|&p| p as u64).sum();
    let mean = sum as f64 / count as f64;
    let variance = gray
        .as_raw()
        .iter()
        .map(|&p| {
            let d = p as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / count as f64;
    (mean as f32, variance.sqrt() as f32)
}

fn clamp_dimension(image: RgbImage, max_dimension: u32) -> RgbImage {
    let longest = image.width().max(image.height());
    if longest <= max_dimension {
        return image;
    }
    let resized = scale_image(&image, max_dimension as f32 / longest as f32);
    info!("After dimension optimization: {}x{}", resized.width(), resized.height());
    resized
}

fn scale_image(image: &RgbImage, scale: f32) -> RgbImage {
    let width = ((image.width() as f32 * scale).round() as u32).max(1);
    let height = ((image.height() as f32 * scale).round() as u32).max(1);
    image::imageops::resize(image, width, height, FilterType::Triangle)
}

fn binarize(gray: &GrayImage) -> RgbImage {
    let denoised = median_filter(gray, 2, 2);
    let level = otsu_level(&denoised);
    let mut binary = denoised;
    for p in binary.pixels_mut() {
        *p = Luma([if p[0] > level { 255 } else { 0 }]);
    }
    let cleaned = open(&close(&binary, Norm::LInf, 1), Norm::LInf, 1);
    DynamicImage::ImageLuma8(cleaned).to_rgb8()
}

fn enhance(image: &RgbImage) -> RgbImage {
    let denoised = median_filter(image, 1, 1);
    let equalized = equalize_luminance(&denoised);
    unsharp_mask(&equalized, 2.0, 1.5)
}

fn light_denoise(gray: &GrayImage) -> RgbImage {
    DynamicImage::ImageLuma8(median_filter(gray, 1, 1)).to_rgb8()
}

/// Apply CLAHE to the luma channel of a YCbCr decomposition, keeping chroma
fn equalize_luminance(image: &RgbImage) -> RgbImage {
    let (width, height) = image.dimensions();
    let mut luma = GrayImage::new(width, height);
    let mut chroma = Vec::with_capacity((width * height) as usize);

    for (x, y, p) in image.enumerate_pixels() {
        let (r, g, b) = (p[0] as f32, p[1] as f32, p[2] as f32);
        let yv = 0.299 * r + 0.587 * g + 0.114 * b;
        let cb = 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
        let cr = 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
        luma.put_pixel(x, y, Luma([yv.round().clamp(0.0, 255.0) as u8]));
        chroma.push((cb, cr));
    }

    let equalized = clahe(&luma, 2.0, 16);

    let mut out = RgbImage::new(width, height);
    for ((x, y, p), (cb, cr)) in out.enumerate_pixels_mut().zip(chroma) {
        let yv = equalized.get_pixel(x, y)[0] as f32;
        let r = yv + 1.402 * (cr - 128.0);
        let g = yv - 0.344_136 * (cb - 128.0) - 0.714_136 * (cr - 128.0);
        let b = yv + 1.772 * (cb - 128.0);
        *p = Rgb([clip(r), clip(g), clip(b)]);
    }
    out
}

/// Contrast-limited adaptive histogram equalization over a `grid` x `grid`
/// tiling, bilinearly interpolating between tile mappings
fn clahe(channel: &GrayImage, clip_limit: f32, grid: u32) -> GrayImage {
    let (width, height) = channel.dimensions();
    if width == 0 || height == 0 {
        return channel.clone();
    }

    let tile_w = width.div_ceil(grid.min(width));
    let tile_h = height.div_ceil(grid.min(height));
    let tiles_x = width.div_ceil(tile_w);
    let tiles_y = height.div_ceil(tile_h);

    let mut luts = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[channel.get_pixel(x, y)[0] as usize] += 1;
                }
            }
            let count = (x1 - x0) * (y1 - y0);
            luts.push(clipped_lut(&mut hist, count, clip_limit));
        }
    }

    let lut_at = |tx: u32, ty: u32| &luts[(ty * tiles_x + tx) as usize];
    let neighbours = |pos: u32, tile: u32, tiles: u32| {
        let f = (pos as f32 + 0.5) / tile as f32 - 0.5;
        let t0 = (f.floor().max(0.0) as u32).min(tiles - 1);
        let t1 = (t0 + 1).min(tiles - 1);
        let a = (f - t0 as f32).clamp(0.0, 1.0);
        (t0, t1, a)
    };

    let mut out = GrayImage::new(width, height);
    for (x, y, p) in out.enumerate_pixels_mut() {
        let v = channel.get_pixel(x, y)[0] as usize;
        let (tx0, tx1, ax) = neighbours(x, tile_w, tiles_x);
        let (ty0, ty1, ay) = neighbours(y, tile_h, tiles_y);

        let top = lut_at(tx0, ty0)[v] as f32 * (1.0 - ax) + lut_at(tx1, ty0)[v] as f32 * ax;
        let bottom = lut_at(tx0, ty1)[v] as f32 * (1.0 - ax) + lut_at(tx1, ty1)[v] as f32 * ax;
        *p = Luma([clip(top * (1.0 - ay) + bottom * ay)]);
    }
    out
}

fn clipped_lut(hist: &mut [u32; 256], count: u32, clip_limit: f32) -> [u8; 256] {
    let limit = ((clip_limit * count as f32 / 256.0) as u32).max(1);
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }
    let bonus = excess / 256;
    let remainder = (excess % 256) as usize;
    for (i, bin) in hist.iter_mut().enumerate() {
        *bin += bonus + u32::from(i < remainder);
    }

    let mut lut = [0u8; 256];
    let mut cdf = 0u32;
    for (i, bin) in hist.iter().enumerate() {
        cdf += bin;
        lut[i] = clip(cdf as f32 * 255.0 / count as f32);
    }
    lut
}

fn unsharp_mask(image: &RgbImage, sigma: f32, amount: f32) -> RgbImage {
    let blurred = gaussian_blur_f32(image, sigma);
    let mut out = image.clone();
    for (p, b) in out.pixels_mut().zip(blurred.pixels()) {
        for c in 0..3 {
            let v = amount * p[c] as f32 - (amount - 1.0) * b[c] as f32;
            p[c] = clip(v);
        }
    }
    out
}

fn clip(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}
