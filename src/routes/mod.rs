pub mod users;
pub mod profiles;
pub mod posts;
pub mod comments;
pub mod likes;
pub mod hashtags;

use crate::{
    error::{AppError, Result},
    services::auth::AuthUser,
    state::AppState,
};
use axum::{extract::Multipart, Router};
use std::sync::Arc;
use tracing::error;

/// `/api/social` 下的全部路由
pub fn social_router() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/profiles", profiles::router())
        .nest("/posts", posts::router())
        .nest("/comments", comments::router())
        .nest("/likes", likes::router())
        .nest("/hashtags", hashtags::router())
}

/// 请求者的资料 ID，匿名或尚未创建资料时为 `None`
pub(crate) async fn viewer_profile_id(state: &AppState, user: Option<&AuthUser>) -> Result<Option<i64>> {
    match user {
        Some(user) => Ok(state
            .profile_service
            .get_by_user(user.user_id)
            .await?
            .map(|profile| profile.id)),
        None => Ok(None),
    }
}

/// 上传的文件：原始文件名和内容
pub(crate) struct UploadedFile {
    pub filename: Option<String>,
    pub data: Vec<u8>,
}

/// 读取 multipart 表单中第一个带文件名的字段，或名为 `field` 的字段
pub(crate) async fn read_upload(mut multipart: Multipart, field: &str) -> Result<UploadedFile> {
    while let Some(part) = multipart.next_field().await.map_err(|e| {
        error!("Failed to process multipart field: {}", e);
        AppError::FileUpload("Could not read the uploaded form data.".to_string())
    })? {
        let filename = part.file_name().map(str::to_string);
        if filename.is_none() && part.name() != Some(field) {
            continue;
        }

        let data = part.bytes().await.map_err(|e| {
            error!("Failed to read file data: {}", e);
            AppError::FileUpload("Could not read the uploaded file.".to_string())
        })?;

        return Ok(UploadedFile {
            filename,
            data: data.to_vec(),
        });
    }

    Err(AppError::invalid_field(field, "No file was submitted."))
}
