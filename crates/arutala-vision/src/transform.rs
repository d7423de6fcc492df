//! Image preprocessing matching the model's pretrained configuration
//!
//! The eval path follows timm's inference transform: resize so the shorter
//! side is `size / crop_pct`, center crop to the input size, scale to `[0, 1]`
//! and normalize per channel. The augmented path used for training replaces
//! the resize + center crop with a random resized crop and a random
//! horizontal flip.

use crate::model_config::PretrainedConfig;
use candle_core::{Device, Result, Tensor};
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use rand::Rng;

const CROP_SCALE: (f64, f64) = (0.08, 1.0);
const CROP_RATIO: (f64, f64) = (3.0 / 4.0, 4.0 / 3.0);
const CROP_ATTEMPTS: usize = 10;

/// Deterministic image-to-tensor transform for one model
#[derive(Debug, Clone)]
pub struct Transform {
    height: u32,
    width: u32,
    resize_shorter: u32,
    filter: FilterType,
    mean: [f32; 3],
    std: [f32; 3],
}

impl Transform {
    /// Build the transform described by a model's pretrained configuration
    pub fn from_pretrained(cfg: &PretrainedConfig) -> Self {
        let [_, height, width] = cfg.input_size;
        let crop_pct = if cfg.crop_pct > 0.0 { cfg.crop_pct } else { 1.0 };
        let longest = height.max(width) as f32;

        Self {
            height: height as u32,
            width: width as u32,
            resize_shorter: (longest / crop_pct).floor() as u32,
            filter: filter_from_name(&cfg.interpolation),
            mean: cfg.mean,
            std: cfg.std,
        }
    }

    /// Expected output shape: channels, height, width
    pub fn input_shape(&self) -> [usize; 3] {
        [3, self.height as usize, self.width as usize]
    }

    /// Eval transform: resize, center crop, normalize
    pub fn apply(&self, image: &DynamicImage, device: &Device) -> Result<Tensor> {
        let rgb = flatten_alpha(image);
        let resized = self.resize_shorter_side(&rgb);

        let x = (resized.width() - self.width) / 2;
        let y = (resized.height() - self.height) / 2;
        let cropped = imageops::crop_imm(&resized, x, y, self.width, self.height).to_image();

        self.to_tensor(&cropped, device)
    }

    /// Training transform: random resized crop, random horizontal flip, normalize
    pub fn apply_augmented<R: Rng>(
        &self,
        image: &DynamicImage,
        rng: &mut R,
        device: &Device,
    ) -> Result<Tensor> {
        let rgb = flatten_alpha(image);
        let (x, y, w, h) = random_resized_crop_box(rgb.width(), rgb.height(), rng);

        let crop = imageops::crop_imm(&rgb, x, y, w, h).to_image();
        let mut resized = imageops::resize(&crop, self.width, self.height, self.filter);
        if rng.gen_bool(0.5) {
            imageops::flip_horizontal_in_place(&mut resized);
        }

        self.to_tensor(&resized, device)
    }

    fn resize_shorter_side(&self, rgb: &RgbImage) -> RgbImage {
        let (w, h) = rgb.dimensions();
        let shorter = w.min(h).max(1) as f32;
        let scale = self.resize_shorter as f32 / shorter;

        let new_w = ((w as f32 * scale).round() as u32).max(self.width);
        let new_h = ((h as f32 * scale).round() as u32).max(self.height);

        imageops::resize(rgb, new_w, new_h, self.filter)
    }

    fn to_tensor(&self, rgb: &RgbImage, device: &Device) -> Result<Tensor> {
        let (w, h) = rgb.dimensions();
        let plane = (w * h) as usize;
        let mut data = vec![0f32; 3 * plane];

        for (idx, pixel) in rgb.pixels().enumerate() {
            for c in 0..3 {
                let value = pixel[c] as f32 / 255.0;
                data[c * plane + idx] = (value - self.mean[c]) / self.std[c];
            }
        }

        Tensor::from_vec(data, (3, h as usize, w as usize), device)
    }
}

/// Convert any decoded image to opaque RGB.
///
/// The alpha channel is dropped as-is; transparent pixels keep whatever color
/// they carry rather than being composited over a background.
pub fn flatten_alpha(image: &DynamicImage) -> RgbImage {
    image.to_rgb8()
}

fn filter_from_name(name: &str) -> FilterType {
    match name.to_lowercase().as_str() {
        "bilinear" => FilterType::Triangle,
        "nearest" => FilterType::Nearest,
        "lanczos" => FilterType::Lanczos3,
        _ => FilterType::CatmullRom,
    }
}

/// Pick a crop box covering a random area and aspect ratio of the source
fn random_resized_crop_box<R: Rng>(
    width: u32,
    height: u32,
    rng: &mut R,
) -> (u32, u32, u32, u32) {
    let area = (width as f64) * (height as f64);
    let (log_lo, log_hi) = (CROP_RATIO.0.ln(), CROP_RATIO.1.ln());

    for _ in 0..CROP_ATTEMPTS {
        let target_area = area * rng.gen_range(CROP_SCALE.0..=CROP_SCALE.1);
        let aspect = rng.gen_range(log_lo..=log_hi).exp();

        let w = (target_area * aspect).sqrt().round() as u32;
        let h = (target_area / aspect).sqrt().round() as u32;

        if w > 0 && h > 0 && w <= width && h <= height {
            let x = rng.gen_range(0..=width - w);
            let y = rng.gen_range(0..=height - h);
            return (x, y, w, h);
        }
    }

    // Fall back to the largest centered crop within the ratio bounds
    let in_ratio = width as f64 / height.max(1) as f64;
    let (w, h) = if in_ratio < CROP_RATIO.0 {
        (width, ((width as f64 / CROP_RATIO.0).round() as u32).min(height))
    } else if in_ratio > CROP_RATIO.1 {
        (((height as f64 * CROP_RATIO.1).round() as u32).min(width), height)
    } else {
        (width, height)
    };

    ((width - w) / 2, (height - h) / 2, w.max(1), h.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, Rgba, RgbaImage};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_config() -> PretrainedConfig {
        PretrainedConfig {
            input_size: [3, 32, 32],
            crop_pct: 1.0,
            mean: [0.0, 0.0, 0.0],
            std: [1.0, 1.0, 1.0],
            ..Default::default()
        }
    }

    fn solid(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)))
    }

    #[test]
    fn test_eval_output_shape_and_values() {
        let transform = Transform::from_pretrained(&small_config());
        let tensor = transform
            .apply(&solid(100, 60, [255, 0, 0]), &Device::Cpu)
            .unwrap();

        assert_eq!(tensor.dims(), &[3, 32, 32]);

        let means = tensor.flatten_from(1).unwrap().mean(1).unwrap().to_vec1::<f32>().unwrap();
        assert!((means[0] - 1.0).abs() < 1e-3);
        assert!(means[1].abs() < 1e-3);
        assert!(means[2].abs() < 1e-3);
    }

    #[test]
    fn test_normalization_uses_mean_and_std() {
        let cfg = PretrainedConfig {
            input_size: [3, 8, 8],
            crop_pct: 1.0,
            ..Default::default()
        };
        let transform = Transform::from_pretrained(&cfg);
        let tensor = transform.apply(&solid(8, 8, [0, 0, 0]), &Device::Cpu).unwrap();

        let first = tensor
            .flatten_from(1)
            .and_then(|t| t.narrow(1, 0, 1))
            .and_then(|t| t.flatten_all())
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert!((first[0] + 0.485 / 0.229).abs() < 1e-4);
    }

    #[test]
    fn test_rgba_is_flattened() {
        let rgba = RgbaImage::from_pixel(40, 40, Rgba([0, 255, 0, 0]));
        let transform = Transform::from_pretrained(&small_config());
        let tensor = transform
            .apply(&DynamicImage::ImageRgba8(rgba), &Device::Cpu)
            .unwrap();

        assert_eq!(tensor.dims(), &[3, 32, 32]);
    }

    #[test]
    fn test_grayscale_expands_to_three_channels() {
        let gray = image::GrayImage::from_pixel(50, 50, image::Luma([128]));
        let transform = Transform::from_pretrained(&small_config());
        let tensor = transform
            .apply(&DynamicImage::ImageLuma8(gray), &Device::Cpu)
            .unwrap();

        assert_eq!(tensor.dims(), &[3, 32, 32]);
    }

    #[test]
    fn test_crop_pct_enlarges_resize() {
        let cfg = PretrainedConfig {
            input_size: [3, 224, 224],
            crop_pct: 0.875,
            ..Default::default()
        };
        let transform = Transform::from_pretrained(&cfg);
        assert_eq!(transform.resize_shorter, 256);
    }

    #[test]
    fn test_augmented_output_shape() {
        let transform = Transform::from_pretrained(&small_config());
        let mut rng = StdRng::seed_from_u64(7);

        for (w, h) in [(100, 100), (300, 20), (5, 200), (1, 1)] {
            let tensor = transform
                .apply_augmented(&solid(w, h, [10, 20, 30]), &mut rng, &Device::Cpu)
                .unwrap();
            assert_eq!(tensor.dims(), &[3, 32, 32]);
        }
    }

    #[test]
    fn test_crop_box_stays_inside_image() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let (x, y, w, h) = random_resized_crop_box(120, 80, &mut rng);
            assert!(w > 0 && h > 0);
            assert!(x + w <= 120);
            assert!(y + h <= 80);
        }
    }
}
