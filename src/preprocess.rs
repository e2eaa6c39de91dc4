//! Turns uploaded bytes into something the classifiers can consume.
//!
//! Uploads arrive either as raw multipart bytes or as a base64 string that may
//! carry a `data:image/...;base64,` prefix. Both end up as an oriented RGB
//! image, which is stored under the uploads directory as JPEG and fed to the
//! models as a `[1, 224, 224, 3]` tensor scaled to [0,1].

use std::{
    fs,
    io::Cursor,
    path::{Path, PathBuf},
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{
    codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage, ImageDecoder, ImageError,
    ImageReader, RgbImage,
};
use ndarray::Array4;

use crate::error::ImageDecodeError;

/// Side length of the square model input.
pub const INPUT_SIZE: u32 = 224;
const JPEG_QUALITY: u8 = 90;

/// NHWC batch of one image.
pub type ImageTensor = Array4<f32>;

/// Drops a data-URI header such as `data:image/jpeg;base64,` if present.
pub fn strip_data_uri(payload: &str) -> &str {
    match payload.split_once(',') {
        Some((_, data)) => data,
        None => payload,
    }
}

pub fn decode_base64_image(payload: &str) -> Result<Vec<u8>, ImageDecodeError> {
    let data = strip_data_uri(payload.trim()).trim();
    Ok(STANDARD.decode(data)?)
}

pub fn upload_file_name(user_id: i32, timestamp: i64) -> String {
    format!("prediction_{user_id}_{timestamp}.jpg")
}

/// An upload written to disk, with the JPEG bytes that were written.
#[derive(Debug, Clone)]
pub struct StoredImage {
    pub path: PathBuf,
    pub jpeg: Vec<u8>,
}

impl StoredImage {
    pub fn path_string(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// A decoded, orientation-corrected RGB image.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    rgb: RgbImage,
}

impl PreparedImage {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ImageDecodeError> {
        let mut decoder = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(ImageError::IoError)?
            .into_decoder()?;
        let orientation = decoder.orientation()?;
        let mut image = DynamicImage::from_decoder(decoder)?;
        image.apply_orientation(orientation);
        Ok(PreparedImage {
            rgb: image.to_rgb8(),
        })
    }

    pub fn from_base64(payload: &str) -> Result<Self, ImageDecodeError> {
        Self::from_bytes(&decode_base64_image(payload)?)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.rgb.dimensions()
    }

    pub fn to_jpeg(&self) -> Result<Vec<u8>, ImageDecodeError> {
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
            .encode_image(&self.rgb)
            .map_err(|e| ImageDecodeError::Persist(e.to_string()))?;
        Ok(jpeg)
    }

    /// Writes the image as `prediction_<user_id>_<timestamp>.jpg` inside `dir`,
    /// creating the directory when needed.
    pub fn persist(
        &self,
        dir: &Path,
        user_id: i32,
        timestamp: i64,
    ) -> Result<StoredImage, ImageDecodeError> {
        fs::create_dir_all(dir).map_err(|e| {
            ImageDecodeError::Persist(format!("cannot create {}: {e}", dir.display()))
        })?;
        let jpeg = self.to_jpeg()?;
        let path = dir.join(upload_file_name(user_id, timestamp));
        fs::write(&path, &jpeg).map_err(|e| {
            ImageDecodeError::Persist(format!("cannot write {}: {e}", path.display()))
        })?;
        log::info!("Image saved to {} ({} bytes)", path.display(), jpeg.len());
        Ok(StoredImage { path, jpeg })
    }

    pub fn to_tensor(&self) -> ImageTensor {
        let resized = image::imageops::resize(&self.rgb, INPUT_SIZE, INPUT_SIZE, FilterType::CatmullRom);
        let side = INPUT_SIZE as usize;
        Array4::from_shape_fn((1, side, side, 3), |(_, y, x, c)| {
            f32::from(resized.get_pixel(x as u32, y as u32)[c]) / 255.0
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};

    fn sample_png() -> Vec<u8> {
        let img = RgbImage::from_fn(8, 6, |x, y| Rgb([(x * 30) as u8, (y * 40) as u8, 128]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn data_uri_prefix_is_optional() {
        let png = sample_png();
        let plain = STANDARD.encode(&png);
        let prefixed = format!("data:image/png;base64,{plain}");

        assert_eq!(decode_base64_image(&plain).unwrap(), png);
        assert_eq!(decode_base64_image(&prefixed).unwrap(), png);
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let err = decode_base64_image("data:image/png;base64,@@not-base64@@").unwrap_err();
        assert!(matches!(err, ImageDecodeError::Base64(_)));
    }

    #[test]
    fn bytes_that_are_not_an_image_are_rejected() {
        let err = PreparedImage::from_bytes(b"definitely not an image").unwrap_err();
        assert!(matches!(err, ImageDecodeError::Image(_)));
    }

    #[test]
    fn tensor_is_batched_square_and_normalized() {
        let image = PreparedImage::from_bytes(&sample_png()).unwrap();
        assert_eq!(image.dimensions(), (8, 6));

        let tensor = image.to_tensor();
        assert_eq!(tensor.shape(), &[1, 224, 224, 3]);
        assert!(tensor.iter().all(|v| (0.0..=1.0).contains(v)));
        // blue channel is constant 128 in the source
        assert!((tensor[[0, 100, 100, 2]] - 128.0 / 255.0).abs() < 0.01);
    }

    #[test]
    fn persist_writes_jpeg_named_after_user_and_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        let image = PreparedImage::from_bytes(&sample_png()).unwrap();

        let stored = image.persist(&uploads, 7, 1_700_000_000).unwrap();

        assert_eq!(stored.path, uploads.join("prediction_7_1700000000.jpg"));
        let on_disk = fs::read(&stored.path).unwrap();
        assert_eq!(on_disk, stored.jpeg);
        assert_eq!(image::guess_format(&on_disk).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn persist_fails_when_uploads_path_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("uploads");
        fs::write(&blocker, b"").unwrap();
        let image = PreparedImage::from_bytes(&sample_png()).unwrap();

        let err = image.persist(&blocker, 1, 1).unwrap_err();
        assert!(matches!(err, ImageDecodeError::Persist(_)));
    }
}
