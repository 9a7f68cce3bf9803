use crate::error::{AppError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use validator::ValidationError;

static USERNAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap()
});

/// 规范化邮箱：去掉首尾空白，域名部分小写
pub fn normalize_email(email: &str) -> String {
    let email = email.trim();
    match email.rsplit_once('@') {
        Some((local, domain)) => format!("{}@{}", local, domain.to_lowercase()),
        None => email.to_string(),
    }
}

/// 验证用户名格式
pub fn validate_username(username: &str) -> Result<()> {
    if username.trim().is_empty() {
        return Err(AppError::Validation("Username must not be empty".to_string()));
    }

    if username.len() < 3 {
        return Err(AppError::Validation("Username must be at least 3 characters".to_string()));
    }

    if username.len() > 30 {
        return Err(AppError::Validation("Username must be at most 30 characters".to_string()));
    }

    if !USERNAME_REGEX.is_match(username) {
        return Err(AppError::Validation(
            "Username may only contain letters, digits, underscores and hyphens".to_string(),
        ));
    }

    Ok(())
}

/// `#[validate(custom = ...)]` 用的用户名校验
pub fn validate_username_field(username: &str) -> std::result::Result<(), ValidationError> {
    validate_username(username).map_err(|e| {
        let mut error = ValidationError::new("username");
        if let AppError::Validation(msg) = e {
            error.message = Some(Cow::Owned(msg));
        }
        error
    })
}

/// 规范化标签名：去掉 `#` 前缀并小写，不允许空白字符
pub fn normalize_hashtag(name: &str) -> Result<String> {
    let name = name.trim().trim_start_matches('#').to_lowercase();

    if name.is_empty() {
        return Err(AppError::Validation("Hashtag name must not be empty".to_string()));
    }

    if name.chars().any(char::is_whitespace) {
        return Err(AppError::Validation("Hashtag name must not contain spaces".to_string()));
    }

    Ok(name)
}

/// 解析逗号分隔的整数 ID 列表，例如 `1,2,3`
pub fn parse_id_list(raw: &str) -> Result<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>()
                .map_err(|_| AppError::BadRequest(format!("Invalid id '{}'", part)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  John.Doe@Example.COM "), "John.Doe@example.com");
        assert_eq!(normalize_email("no-at-sign"), "no-at-sign");
    }

    #[test]
    fn test_validate_username() {
        assert!(validate_username("user123").is_ok());
        assert!(validate_username("test_user").is_ok());
        assert!(validate_username("user-name").is_ok());

        assert!(validate_username("").is_err());
        assert!(validate_username("ab").is_err());
        assert!(validate_username("user@name").is_err());
        assert!(validate_username(&"a".repeat(31)).is_err());
    }

    #[test]
    fn test_validate_username_field_carries_message() {
        let err = validate_username_field("ab").unwrap_err();
        assert_eq!(err.code, "username");
        assert!(err.message.is_some());
    }

    #[test]
    fn test_normalize_hashtag() {
        assert_eq!(normalize_hashtag("#RustLang").unwrap(), "rustlang");
        assert!(normalize_hashtag("#").is_err());
        assert!(normalize_hashtag("two words").is_err());
    }

    #[test]
    fn test_parse_id_list() {
        assert_eq!(parse_id_list("1, 2,3").unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_id_list("").unwrap(), Vec::<i64>::new());
        assert!(parse_id_list("1,abc").is_err());
    }
}
