use serde::{Deserialize, Serialize};
use validator::Validate;

/// Registration payload. Required fields are `Option` so that a single
/// validation pass can report every missing or malformed field at once;
/// `password` arrives already hashed by the handler.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UserCreateDto {
    #[validate(
        required(message = "is required"),
        length(min = 2, max = 30, message = "must be 2 to 30 characters")
    )]
    pub username: Option<String>,
    #[validate(required(message = "is required"), email(message = "must be a valid email"))]
    pub email: Option<String>,
    #[validate(required(message = "is required"))]
    pub password: Option<String>,
    #[validate(url(message = "must be a valid URL"))]
    pub avatar: Option<String>,
    pub location: Option<String>,
    pub birth_date: Option<String>,
    #[validate(length(max = 500, message = "must be at most 500 characters"))]
    pub bio: Option<String>,
}

/// Partial-update payload; every field optional.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdateDto {
    #[validate(length(min = 2, max = 30, message = "must be 2 to 30 characters"))]
    pub username: Option<String>,
    #[validate(email(message = "must be a valid email"))]
    pub email: Option<String>,
    pub password: Option<String>,
    #[validate(url(message = "must be a valid URL"))]
    pub avatar: Option<String>,
    pub location: Option<String>,
    pub birth_date: Option<String>,
    #[validate(length(max = 500, message = "must be at most 500 characters"))]
    pub bio: Option<String>,
}

/// Login accepts either identifier; email wins when both are present.
#[derive(Debug, Deserialize)]
pub struct LoginDto {
    pub email: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crud::validate_schema;

    #[test]
    fn create_dto_reports_every_missing_field() {
        let dto: UserCreateDto = serde_json::from_str("{}").unwrap();
        let err = validate_schema(&dto).unwrap_err();
        assert!(err.message.contains("\"username\" is required"));
        assert!(err.message.contains("\"email\" is required"));
        assert!(err.message.contains("\"password\" is required"));
    }

    #[test]
    fn create_dto_accepts_a_full_payload() {
        let dto: UserCreateDto = serde_json::from_value(serde_json::json!({
            "username": "ann",
            "email": "ann@example.com",
            "password": "$argon2id$hashed",
            "avatar": "https://img.example.com/avatars/ann.png",
            "birthDate": "1990-05-01",
        }))
        .unwrap();
        assert!(validate_schema(&dto).is_ok());
        assert_eq!(dto.birth_date.as_deref(), Some("1990-05-01"));
    }

    #[test]
    fn update_dto_allows_sparse_payloads() {
        let dto: UserUpdateDto = serde_json::from_value(serde_json::json!({
            "bio": "hi there",
        }))
        .unwrap();
        assert!(validate_schema(&dto).is_ok());
        assert!(dto.username.is_none());
    }

    #[test]
    fn update_dto_still_checks_present_fields() {
        let dto: UserUpdateDto = serde_json::from_value(serde_json::json!({
            "email": "not-an-email",
            "username": "x",
        }))
        .unwrap();
        let err = validate_schema(&dto).unwrap_err();
        assert!(err.message.contains("\"email\" must be a valid email"));
        assert!(err.message.contains("\"username\" must be 2 to 30 characters"));
    }
}
