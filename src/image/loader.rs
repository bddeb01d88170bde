use crate::utils::error::ClassifierError;
use crate::Result;
use image::{DynamicImage, ImageFormat, ImageReader, Limits};
use std::io::Cursor;

/// 解码后宽高的默认上限
pub const DEFAULT_MAX_DIMENSION: u32 = 8192;

pub struct ImageLoader {
    max_dimension: u32,
}

impl ImageLoader {
    pub fn new(max_dimension: u32) -> Self {
        Self { max_dimension }
    }

    /// 解码上传的图片，根据内容识别格式
    pub fn decode(&self, bytes: &[u8]) -> Result<DynamicImage> {
        if bytes.is_empty() {
            return Err(ClassifierError::InvalidImage("Empty image data".to_string()));
        }

        let format = Self::detect_format(bytes).ok_or_else(|| {
            ClassifierError::InvalidImage("Unrecognized image format".to_string())
        })?;
        tracing::debug!("Detected image format: {:?}", format);

        let mut reader = ImageReader::with_format(Cursor::new(bytes), format);
        reader.limits(self.limits());

        let image = reader
            .decode()
            .map_err(|e| ClassifierError::InvalidImage(e.to_string()))?;

        Ok(image)
    }

    /// 通过魔数检测图片格式
    pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
        image::guess_format(bytes).ok()
    }

    fn limits(&self) -> Limits {
        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_dimension);
        limits.max_image_height = Some(self.max_dimension);
        limits
    }
}

impl Default for ImageLoader {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DIMENSION)
    }
}
