use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};

/// 支持的图片格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Webp,
    Gif,
}

impl ImageFormat {
    /// 从文件扩展名获取图片格式
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::Webp),
            "gif" => Some(Self::Gif),
            _ => None,
        }
    }

    fn from_image_type(image_type: imagesize::ImageType) -> Option<Self> {
        match image_type {
            imagesize::ImageType::Jpeg => Some(Self::Jpeg),
            imagesize::ImageType::Png => Some(Self::Png),
            imagesize::ImageType::Webp => Some(Self::Webp),
            imagesize::ImageType::Gif => Some(Self::Gif),
            _ => None,
        }
    }

    pub fn to_mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Webp => "image/webp",
            Self::Gif => "image/gif",
        }
    }

    pub fn to_extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Webp => "webp",
            Self::Gif => "gif",
        }
    }
}

/// 图片格式与尺寸
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub format: ImageFormat,
    pub width: usize,
    pub height: usize,
}

const NOT_AN_IMAGE: &str =
    "Upload a valid image. The file you uploaded was either not an image or a corrupted image.";

/// 根据文件头识别图片并读取尺寸
pub fn inspect(data: &[u8]) -> Result<ImageInfo> {
    let format = imagesize::image_type(data)
        .ok()
        .and_then(ImageFormat::from_image_type)
        .ok_or_else(|| AppError::FileUpload(NOT_AN_IMAGE.to_string()))?;

    let size = imagesize::blob_size(data).map_err(|_| AppError::FileUpload(NOT_AN_IMAGE.to_string()))?;
    if size.width == 0 || size.height == 0 {
        return Err(AppError::FileUpload(NOT_AN_IMAGE.to_string()));
    }

    Ok(ImageInfo {
        format,
        width: size.width,
        height: size.height,
    })
}

/// 取文件名的扩展名（小写）
pub fn file_extension(filename: &str) -> Option<String> {
    std::path::Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// 1x1 的透明 PNG
    pub const TINY_PNG: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
        0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
        0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
        0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
        0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inspect_png() {
        let info = inspect(fixtures::TINY_PNG).unwrap();
        assert_eq!(info.format, ImageFormat::Png);
        assert_eq!((info.width, info.height), (1, 1));
        assert_eq!(info.format.to_mime_type(), "image/png");
    }

    #[test]
    fn test_inspect_rejects_non_images() {
        assert!(matches!(inspect(b"plain text, not an image"), Err(AppError::FileUpload(_))));
        assert!(inspect(&[]).is_err());
    }

    #[test]
    fn test_extensions() {
        assert_eq!(ImageFormat::from_extension("JPEG"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_extension("bmp"), None);
        assert_eq!(file_extension("photo.PNG").as_deref(), Some("png"));
        assert_eq!(file_extension("README"), None);
    }
}
