use crate::{
    config::Config,
    error::{AppError, Result},
    utils::image::{file_extension, inspect, ImageFormat},
};
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 上传文件的归属，决定 MEDIA_ROOT 下的子目录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Post,
    Profile,
}

impl MediaKind {
    fn directory(&self) -> &'static str {
        match self {
            MediaKind::Post => "posts",
            MediaKind::Profile => "profiles",
        }
    }
}

#[derive(Clone)]
pub struct MediaService {
    config: Config,
}

impl MediaService {
    pub async fn new(config: &Config) -> Result<Self> {
        fs::create_dir_all(&config.media_root).await?;
        Ok(Self {
            config: config.clone(),
        })
    }

    pub fn media_root(&self) -> PathBuf {
        PathBuf::from(&self.config.media_root)
    }

    fn url_prefix(&self) -> &str {
        self.config.media_url.trim_end_matches('/')
    }

    /// 校验并保存上传的图片，返回对外访问的 URL，例如 `/media/posts/<uuid>.png`
    pub async fn save_image(&self, kind: MediaKind, filename: Option<&str>, data: &[u8]) -> Result<String> {
        debug!("Saving {:?} image {:?} ({} bytes)", kind, filename, data.len());

        if data.is_empty() {
            return Err(AppError::FileUpload("The submitted file is empty.".to_string()));
        }
        if data.len() > self.config.max_upload_size {
            return Err(AppError::FileUpload(format!(
                "File too large. Maximum size is {} bytes.",
                self.config.max_upload_size
            )));
        }

        let allowed = self.config.allowed_image_extensions();
        if let Some(extension) = filename.and_then(file_extension) {
            if !allowed.contains(&extension) {
                return Err(AppError::FileUpload(format!(
                    "File extension \"{}\" is not allowed. Allowed extensions are: {}.",
                    extension,
                    allowed.join(", ")
                )));
            }
        }

        let info = inspect(data)?;
        let extension = info.format.to_extension();
        if !allowed.iter().any(|ext| ImageFormat::from_extension(ext) == Some(info.format)) {
            return Err(AppError::FileUpload(format!(
                "Images of type {} are not allowed.",
                info.format.to_mime_type()
            )));
        }

        let relative = format!("{}/{}.{}", kind.directory(), Uuid::new_v4(), extension);
        let target = self.media_root().join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&target, data).await?;

        info!(
            "Stored {}x{} {} image at {}",
            info.width,
            info.height,
            info.format.to_mime_type(),
            target.display()
        );

        Ok(format!("{}/{}", self.url_prefix(), relative))
    }

    /// URL 对应的磁盘路径，不属于 MEDIA_URL 或含 `..` 时为 `None`
    pub fn local_path(&self, url: &str) -> Option<PathBuf> {
        let relative = url.strip_prefix(self.url_prefix())?.trim_start_matches('/');
        if relative.is_empty() || relative.split('/').any(|part| part == "..") {
            return None;
        }
        Some(self.media_root().join(relative))
    }

    /// 按 URL 删除之前保存的文件，文件不存在时忽略
    pub async fn remove(&self, url: &str) -> Result<()> {
        let path = match self.local_path(url) {
            Some(path) => path,
            None => {
                warn!("Refusing to remove file outside media root: {}", url);
                return Ok(());
            }
        };

        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Removed media file {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::image::fixtures::TINY_PNG;

    async fn service(config: Config) -> MediaService {
        MediaService::new(&config).await.unwrap()
    }

    #[tokio::test]
    async fn test_save_and_remove_image() {
        let media = service(Config::for_tests()).await;
        let url = media
            .save_image(MediaKind::Post, Some("cat.png"), TINY_PNG)
            .await
            .unwrap();

        assert!(url.starts_with("/media/posts/"));
        assert!(url.ends_with(".png"));
        let on_disk = media.local_path(&url).unwrap();
        assert!(on_disk.starts_with(media.media_root().join("posts")));
        assert!(on_disk.exists());

        media.remove(&url).await.unwrap();
        assert!(!on_disk.exists());
        // 再次删除不报错
        media.remove(&url).await.unwrap();
    }

    #[tokio::test]
    async fn test_local_path_stays_inside_media_root() {
        let media = service(Config::for_tests()).await;
        assert!(media.local_path("/media/../etc/passwd").is_none());
        assert!(media.local_path("/elsewhere/a.png").is_none());
        assert!(media.local_path("/media/").is_none());

        // 不在媒体目录下的 URL 被忽略
        media.remove("/elsewhere/a.png").await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_disallowed_extension() {
        let media = service(Config::for_tests()).await;
        let err = media
            .save_image(MediaKind::Profile, Some("cat.bmp"), TINY_PNG)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::FileUpload(_)));
    }

    #[tokio::test]
    async fn test_rejects_non_image_and_oversized() {
        let mut config = Config::for_tests();
        config.max_upload_size = 16;
        let media = service(config).await;

        assert!(media
            .save_image(MediaKind::Post, Some("notes.png"), b"not an image")
            .await
            .is_err());
        assert!(media
            .save_image(MediaKind::Post, Some("big.png"), TINY_PNG)
            .await
            .is_err());
        assert!(media.save_image(MediaKind::Post, None, &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_format_not_in_allowed_types() {
        let mut config = Config::for_tests();
        config.allowed_image_types = "jpg,jpeg".to_string();
        let media = service(config).await;

        assert!(media.save_image(MediaKind::Post, None, TINY_PNG).await.is_err());
    }
}
