use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::collections::HashMap;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate {field}: {message}")]
    Duplicate { field: String, message: String },

    #[error("Invalid {field}: {message}")]
    InvalidField { field: String, message: String },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("File upload error: {0}")]
    FileUpload(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Validation error: {0}")]
    ValidatorError(#[from] validator::ValidationErrors),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, error_code) = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string(), "DATABASE_ERROR")
            }
            AppError::Authentication(msg) => {
                (StatusCode::UNAUTHORIZED, msg.clone(), "AUTHENTICATION_ERROR")
            }
            AppError::Authorization(msg) => {
                (StatusCode::FORBIDDEN, msg.clone(), "AUTHORIZATION_ERROR")
            }
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, msg.clone(), "VALIDATION_ERROR")
            }
            AppError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, msg.clone(), "NOT_FOUND")
            }
            AppError::Duplicate { field, message } => {
                return (
                    StatusCode::CONFLICT,
                    Json(json!({
                        "error": {
                            "code": "CONFLICT",
                            "message": message,
                            "details": { field.as_str(): [message] }
                        }
                    })),
                )
                    .into_response();
            }
            AppError::InvalidField { field, message } => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "error": {
                            "code": "VALIDATION_ERROR",
                            "message": message,
                            "details": { field.as_str(): [message] }
                        }
                    })),
                )
                    .into_response();
            }
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, msg.clone(), "BAD_REQUEST")
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string(), "INTERNAL_ERROR")
            }
            AppError::RateLimitExceeded => {
                (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded".to_string(), "RATE_LIMIT_EXCEEDED")
            }
            AppError::FileUpload(msg) => {
                (StatusCode::BAD_REQUEST, msg.clone(), "FILE_UPLOAD_ERROR")
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "IO error".to_string(), "IO_ERROR")
            }
            AppError::Jwt(e) => {
                tracing::debug!("JWT error: {}", e);
                (StatusCode::UNAUTHORIZED, "Invalid token".to_string(), "JWT_ERROR")
            }
            AppError::ValidatorError(e) => {
                let validation_errors = e
                    .field_errors()
                    .iter()
                    .map(|(field, errors)| {
                        (
                            field.to_string(),
                            errors
                                .iter()
                                .map(|e| {
                                    e.message
                                        .as_ref()
                                        .map(|m| m.to_string())
                                        .unwrap_or_else(|| format!("Invalid value ({})", e.code))
                                })
                                .collect::<Vec<_>>(),
                        )
                    })
                    .collect::<HashMap<String, Vec<String>>>();

                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "error": {
                            "code": "VALIDATION_ERROR",
                            "message": "Validation failed",
                            "details": validation_errors
                        }
                    })),
                )
                    .into_response();
            }
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": error_message
            }
        }));

        (status, body).into_response()
    }
}

// 便利函数，用于创建常见错误
impl AppError {
    pub fn not_found(resource: &str) -> Self {
        Self::NotFound(format!("{} not found", resource))
    }

    pub fn unauthorized(msg: &str) -> Self {
        Self::Authentication(msg.to_string())
    }

    pub fn forbidden(msg: &str) -> Self {
        Self::Authorization(msg.to_string())
    }

    pub fn bad_request(msg: &str) -> Self {
        Self::BadRequest(msg.to_string())
    }

    pub fn internal(msg: &str) -> Self {
        Self::Internal(msg.to_string())
    }

    pub fn duplicate(field: &str, message: &str) -> Self {
        Self::Duplicate {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn invalid_field(field: &str, message: &str) -> Self {
        Self::InvalidField {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    /// 唯一约束冲突转为 409，其余数据库错误原样保留
    pub fn from_unique_violation(err: sqlx::Error, field: &str, message: &str) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::duplicate(field, message)
            }
            _ => Self::Database(err),
        }
    }
}

// 从其他错误类型转换
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// 请求体无法反序列化：缺失或类型错误的字段落到 `details.<field>`
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonDataError(e) => json_data_error(&e.body_text()),
            other => AppError::BadRequest(other.body_text()),
        }
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        match rejection {
            PathRejection::FailedToDeserializePathParams(e) => AppError::BadRequest(e.body_text()),
            other => AppError::Internal(other.body_text()),
        }
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

/// 解析 serde 的错误文本，例如
/// `Failed to deserialize ...: missing field `password` at line 1 column 27`
/// 或 `Failed to deserialize ...: email: invalid type: integer `3`, expected a string at ...`
fn json_data_error(text: &str) -> AppError {
    if let Some(rest) = text.split("missing field `").nth(1) {
        if let Some(field) = rest.split('`').next() {
            return AppError::invalid_field(field, "This field is required.");
        }
    }

    let detail = text.split_once("target type: ").map(|(_, d)| d).unwrap_or(text);
    if let Some((path, message)) = detail.split_once(": ") {
        let is_field_path = !path.is_empty()
            && path
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '[' | ']'));
        if is_field_path {
            let message = message.split(" at line ").next().unwrap_or(message);
            return AppError::invalid_field(path, message);
        }
    }

    AppError::Validation(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = vec![
            (AppError::unauthorized("no token"), StatusCode::UNAUTHORIZED),
            (AppError::forbidden("not yours"), StatusCode::FORBIDDEN),
            (AppError::not_found("Post"), StatusCode::NOT_FOUND),
            (AppError::duplicate("email", "taken"), StatusCode::CONFLICT),
            (AppError::bad_request("bad"), StatusCode::BAD_REQUEST),
            (AppError::invalid_field("hashtags", "missing"), StatusCode::BAD_REQUEST),
            (AppError::RateLimitExceeded, StatusCode::TOO_MANY_REQUESTS),
            (AppError::internal("boom"), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }

    #[test]
    fn test_missing_json_field_maps_to_field_details() {
        let err = json_data_error(
            "Failed to deserialize the JSON body into the target type: missing field `password` at line 1 column 27",
        );
        assert!(matches!(
            err,
            AppError::InvalidField { ref field, ref message }
                if field == "password" && message == "This field is required."
        ));
    }

    #[test]
    fn test_wrong_json_type_maps_to_field_details() {
        let err = json_data_error(
            "Failed to deserialize the JSON body into the target type: email: invalid type: integer `3`, expected a string at line 1 column 11",
        );
        match err {
            AppError::InvalidField { field, message } => {
                assert_eq!(field, "email");
                assert_eq!(message, "invalid type: integer `3`, expected a string");
            }
            other => panic!("unexpected error: {:?}", other),
        }

        assert!(matches!(json_data_error("something odd"), AppError::Validation(_)));
    }

    #[test]
    fn test_not_found_message() {
        match AppError::not_found("Profile") {
            AppError::NotFound(msg) => assert_eq!(msg, "Profile not found"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_non_unique_database_error_is_kept() {
        let err = AppError::from_unique_violation(sqlx::Error::RowNotFound, "email", "taken");
        assert!(matches!(err, AppError::Database(sqlx::Error::RowNotFound)));
    }
}
