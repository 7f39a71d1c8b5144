//! Image preprocessing before text detection
//!
//! Phone photos of cards are large and colorful; the text detector does
//! better (and uploads are smaller) on a downscaled, sharpened grayscale
//! PNG. Decoding and filtering are CPU-bound and run on the blocking pool.

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::sync::Arc;

/// Longest side, in pixels, after downscaling
pub const DEFAULT_MAX_DIMENSION: u32 = 1600;

#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    max_dimension: u32,
    sharpen_sigma: f32,
    sharpen_threshold: i32,
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DIMENSION)
    }
}

impl ImagePreprocessor {
    pub fn new(max_dimension: u32) -> Self {
        Self {
            max_dimension: max_dimension.max(1),
            sharpen_sigma: 1.0,
            sharpen_threshold: 2,
        }
    }

    /// Preprocess encoded image bytes
    ///
    /// Returns the original bytes unchanged when the image cannot be
    /// decoded; the detector may still understand formats we do not.
    pub async fn prepare(&self, bytes: Vec<u8>) -> Vec<u8> {
        let original = Arc::new(bytes);
        let input = original.clone();
        let settings = self.clone();

        match tokio::task::spawn_blocking(move || settings.transform(&input)).await {
            Ok(Ok(processed)) => {
                tracing::debug!(
                    original_bytes = original.len(),
                    processed_bytes = processed.len(),
                    "Image preprocessed"
                );
                processed
            }
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Image not decodable, sending original bytes");
                unwrap_shared(original)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Preprocessing task failed, sending original bytes");
                unwrap_shared(original)
            }
        }
    }

    /// Decode, downscale, grayscale, sharpen, re-encode as PNG
    pub fn transform(&self, bytes: &[u8]) -> Result<Vec<u8>, image::ImageError> {
        let img = image::load_from_memory(bytes)?;
        let img = self.downscale(img);
        let img = img.grayscale().unsharpen(self.sharpen_sigma, self.sharpen_threshold);

        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png)?;
        Ok(out.into_inner())
    }

    fn downscale(&self, img: DynamicImage) -> DynamicImage {
        if img.width().max(img.height()) <= self.max_dimension {
            return img;
        }
        // resize() keeps the aspect ratio within the bounding box
        img.resize(self.max_dimension, self.max_dimension, FilterType::Triangle)
    }
}

fn unwrap_shared(bytes: Arc<Vec<u8>>) -> Vec<u8> {
    Arc::try_unwrap(bytes).unwrap_or_else(|shared| shared.as_ref().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ColorType, Rgb, RgbImage};

    fn encoded_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn test_large_image_downscaled_to_grayscale() {
        let preprocessor = ImagePreprocessor::new(400);
        let processed = preprocessor.prepare(encoded_png(800, 200)).await;

        let decoded = image::load_from_memory(&processed).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (400, 100));
        assert_eq!(decoded.color(), ColorType::L8);
    }

    #[tokio::test]
    async fn test_small_image_keeps_size() {
        let preprocessor = ImagePreprocessor::new(400);
        let processed = preprocessor.prepare(encoded_png(120, 80)).await;

        let decoded = image::load_from_memory(&processed).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (120, 80));
    }

    #[tokio::test]
    async fn test_undecodable_bytes_pass_through() {
        let preprocessor = ImagePreprocessor::default();
        let garbage = b"definitely not an image".to_vec();
        assert_eq!(preprocessor.prepare(garbage.clone()).await, garbage);
    }
}
