use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::rate_limit::UserId;
use crate::utils::{hash_password, normalize_secret_answer, verify_password};

pub const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub secret_question: String,
    #[serde(skip_serializing)]
    pub secret_answer_hash: String,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirm_password: String,
    #[serde(default)]
    pub secret_question: String,
    #[serde(default)]
    pub secret_answer: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SecretQuestionQuery {
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub secret_answer: String,
    #[serde(default)]
    pub new_password: String,
    #[serde(default)]
    pub confirm_password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub user_id: UserId,
    pub username: String,
    pub token: String,
    pub expires_at: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretQuestionResponse {
    pub username: String,
    pub secret_question: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentSessionResponse {
    pub user_id: UserId,
    pub username: String,
}

/// 用户名和邮箱统一去空格、转小写后再比较和存储
pub fn normalize_identity(value: &str) -> String {
    value.trim().to_lowercase()
}

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid")
});

pub fn is_valid_email(email: &str) -> bool {
    EMAIL.is_match(email)
}

pub fn validate_password(password: &str, confirm_password: &str) -> Result<(), String> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        ));
    }
    if !password.chars().any(|c| c.is_ascii_alphabetic())
        || !password.chars().any(|c| c.is_ascii_digit())
    {
        return Err("Password must contain at least one letter and one number".into());
    }
    if password != confirm_password {
        return Err("Passwords do not match".into());
    }
    Ok(())
}

impl RegisterRequest {
    pub fn validate(&self) -> Result<(), String> {
        let required = [
            &self.username,
            &self.email,
            &self.password,
            &self.confirm_password,
            &self.secret_question,
            &self.secret_answer,
        ];
        if required.iter().any(|field| field.trim().is_empty()) {
            return Err("All fields are required".into());
        }
        if !is_valid_email(self.email.trim()) {
            return Err("Invalid email address".into());
        }
        validate_password(&self.password, &self.confirm_password)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("Username or email already exists")]
    AlreadyExists,

    #[error("failed to hash secret: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

const USER_COLUMNS: &str = "id, username, email, password_hash, secret_question, secret_answer_hash, created_at, last_login_at";

impl User {
    pub async fn create(pool: &PgPool, req: &RegisterRequest) -> Result<Self, UserError> {
        let password_hash = hash_password(&req.password)?;
        let secret_answer_hash = hash_password(&normalize_secret_answer(&req.secret_answer))?;

        let result = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (username, email, password_hash, secret_question, secret_answer_hash) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            USER_COLUMNS
        ))
        .bind(normalize_identity(&req.username))
        .bind(normalize_identity(&req.email))
        .bind(password_hash)
        .bind(req.secret_question.trim())
        .bind(secret_answer_hash)
        .fetch_one(pool)
        .await;

        match result {
            Ok(user) => Ok(user),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(UserError::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find_by_username(pool: &PgPool, username: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE username = $1", USER_COLUMNS))
            .bind(normalize_identity(username))
            .fetch_optional(pool)
            .await
    }

    pub async fn touch_last_login(&self, pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = $1")
            .bind(self.id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn update_password(&self, pool: &PgPool, new_password: &str) -> Result<(), UserError> {
        let password_hash = hash_password(new_password)?;
        sqlx::query("UPDATE users SET password_hash = $1 WHERE id = $2")
            .bind(password_hash)
            .bind(self.id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub fn verify_password(&self, password: &str) -> bool {
        verify_password(password, &self.password_hash).unwrap_or(false)
    }

    pub fn verify_secret_answer(&self, answer: &str) -> bool {
        verify_password(&normalize_secret_answer(answer), &self.secret_answer_hash).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register_request() -> RegisterRequest {
        RegisterRequest {
            username: "alice".into(),
            email: "alice@example.com".into(),
            password: "secret123".into(),
            confirm_password: "secret123".into(),
            secret_question: "First pet?".into(),
            secret_answer: "Rex".into(),
        }
    }

    #[test]
    fn test_email_format() {
        assert!(is_valid_email("a@b.c"));
        assert!(is_valid_email("first.last@mail.example.org"));
        assert!(!is_valid_email("no-at-sign.com"));
        assert!(!is_valid_email("two@@example.com"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("alice@localhost"));
        assert!(!is_valid_email("alice@example."));
        assert!(!is_valid_email("ali ce@example.com"));
        assert!(!is_valid_email("alice@exa mple.com"));
        assert!(!is_valid_email(""));
        // 点号只需出现在 @ 之后，末尾多余的点也算合法
        assert!(is_valid_email("a@b.c."));
        assert!(is_valid_email("a@b..c"));
        assert!(is_valid_email("a.b@c.d.e"));
    }

    #[test]
    fn test_password_rules() {
        assert!(validate_password("abcdefg1", "abcdefg1").is_ok());
        assert!(validate_password("abc1", "abc1").is_err());
        assert!(validate_password("abcdefgh", "abcdefgh").is_err());
        assert!(validate_password("12345678", "12345678").is_err());
        assert_eq!(
            validate_password("abcdefg1", "abcdefg2").unwrap_err(),
            "Passwords do not match"
        );
    }

    #[test]
    fn test_register_requires_every_field() {
        assert!(register_request().validate().is_ok());

        let mut req = register_request();
        req.secret_answer = "  ".into();
        assert_eq!(req.validate().unwrap_err(), "All fields are required");

        let mut req = register_request();
        req.email = "alice".into();
        assert_eq!(req.validate().unwrap_err(), "Invalid email address");
    }

    #[test]
    fn test_identity_is_case_insensitive() {
        assert_eq!(normalize_identity("  Alice "), "alice");
    }

    #[test]
    fn test_secret_answer_ignores_case_and_padding() {
        let user = User {
            id: 1,
            username: "alice".into(),
            email: "alice@example.com".into(),
            password_hash: hash_password("secret123").unwrap(),
            secret_question: "First pet?".into(),
            secret_answer_hash: hash_password(&normalize_secret_answer("Rex")).unwrap(),
            created_at: Utc::now(),
            last_login_at: None,
        };
        assert!(user.verify_secret_answer("  rEX "));
        assert!(!user.verify_secret_answer("Max"));
        assert!(user.verify_password("secret123"));
        assert!(!user.verify_password("secret124"));
    }
}
