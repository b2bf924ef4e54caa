use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::info;
use utoipa::ToSchema;

use crate::{
    auth::{TokenError, TokenManager},
    config::AppSettings,
    model::{NewStudent, Page, Session, SessionRotation, Student, StudentUpdate, Tokens},
    repository::{Repository, StorageError},
};

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;
const PASSWORD_LEN: std::ops::RangeInclusive<usize> = 8..=64;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("student already exists")]
    AlreadyExists,
    #[error("student not found")]
    NotFound,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("invalid refresh token")]
    InvalidRefreshToken,
    #[error("refresh token expired")]
    RefreshTokenExpired,
    #[error("password salt cannot key the hasher")]
    InvalidSalt,
    #[error(transparent)]
    Storage(StorageError),
    #[error(transparent)]
    Token(#[from] TokenError),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict => ServiceError::AlreadyExists,
            other => ServiceError::Storage(other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SignUpInput {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SignInInput {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefreshInput {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateStudentInput {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
}

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 password hasher keyed with the configured salt.
#[derive(Clone)]
pub struct PasswordHasher {
    mac: HmacSha256,
}

impl std::fmt::Debug for PasswordHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordHasher").finish_non_exhaustive()
    }
}

impl PasswordHasher {
    pub fn new(salt: &str) -> Result<Self, ServiceError> {
        let mac = <HmacSha256 as Mac>::new_from_slice(salt.as_bytes())
            .map_err(|_| ServiceError::InvalidSalt)?;
        Ok(Self { mac })
    }

    pub fn hash(&self, password: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(password.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Business logic over the storage layer.
pub struct Service {
    repository: Arc<dyn Repository>,
    token_manager: Arc<TokenManager>,
    hasher: PasswordHasher,
    access_token_ttl: Duration,
    refresh_token_ttl: chrono::Duration,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .finish_non_exhaustive()
    }
}

impl Service {
    pub fn new(
        repository: Arc<dyn Repository>,
        token_manager: Arc<TokenManager>,
        config: &AppSettings,
    ) -> Result<Self, ServiceError> {
        let refresh_token_ttl = Duration::from_secs(config.jwt.refresh_token_ttl_secs);
        Ok(Self {
            repository,
            token_manager,
            hasher: PasswordHasher::new(&config.auth.password_salt)?,
            access_token_ttl: Duration::from_secs(config.jwt.access_token_ttl_secs),
            refresh_token_ttl: chrono::Duration::from_std(refresh_token_ttl)
                .map_err(|_| TokenError::LifetimeOutOfRange(refresh_token_ttl))?,
        })
    }

    pub fn repository(&self) -> &dyn Repository {
        self.repository.as_ref()
    }

    pub async fn sign_up(&self, input: SignUpInput) -> Result<Student, ServiceError> {
        let new = NewStudent {
            first_name: required_name("first_name", &input.first_name)?,
            last_name: required_name("last_name", &input.last_name)?,
            email: normalize_email(&input.email)?,
            password_hash: self.hasher.hash(validate_password(&input.password)?),
        };

        let student = self.repository.create_student(new).await?;
        info!(student_id = student.id, "student signed up");
        Ok(student)
    }

    pub async fn sign_in(&self, input: SignInInput) -> Result<Tokens, ServiceError> {
        let email = normalize_email(&input.email).map_err(|_| ServiceError::InvalidCredentials)?;
        let hash = self.hasher.hash(&input.password);

        let student = self
            .repository
            .student_by_credentials(&email, &hash)
            .await?
            .ok_or(ServiceError::InvalidCredentials)?;

        self.create_session(student.id).await
    }

    /// Exchanges a refresh token for a new pair, rotating the refresh token.
    pub async fn refresh_tokens(&self, refresh_token: &str) -> Result<Tokens, ServiceError> {
        let session = self.new_session()?;
        let rotation = self
            .repository
            .rotate_session(refresh_token.trim(), session.clone(), Utc::now())
            .await?;

        match rotation {
            SessionRotation::Rotated(student) => self.issue_tokens(student.id, session),
            SessionRotation::Expired => Err(ServiceError::RefreshTokenExpired),
            SessionRotation::Unknown => Err(ServiceError::InvalidRefreshToken),
        }
    }

    pub async fn student(&self, id: i64) -> Result<Student, ServiceError> {
        self.repository
            .student_by_id(id)
            .await?
            .ok_or(ServiceError::NotFound)
    }

    pub async fn students(
        &self,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<Student>, ServiceError> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE);
        let offset = offset.unwrap_or(0);
        if limit < 1 {
            return Err(ServiceError::Validation("limit must be positive".to_string()));
        }
        if offset < 0 {
            return Err(ServiceError::Validation(
                "offset must not be negative".to_string(),
            ));
        }

        let page = Page {
            limit: limit.min(MAX_PAGE_SIZE),
            offset,
        };
        Ok(self.repository.list_students(page).await?)
    }

    pub async fn update_student(
        &self,
        id: i64,
        input: UpdateStudentInput,
    ) -> Result<Student, ServiceError> {
        let update = StudentUpdate {
            first_name: input
                .first_name
                .as_deref()
                .map(|v| required_name("first_name", v))
                .transpose()?,
            last_name: input
                .last_name
                .as_deref()
                .map(|v| required_name("last_name", v))
                .transpose()?,
            email: input.email.as_deref().map(normalize_email).transpose()?,
        };

        self.repository
            .update_student(id, update)
            .await?
            .ok_or(ServiceError::NotFound)
    }

    pub async fn delete_student(&self, id: i64) -> Result<(), ServiceError> {
        if self.repository.delete_student(id).await? {
            info!(student_id = id, "student deleted");
            Ok(())
        } else {
            Err(ServiceError::NotFound)
        }
    }

    async fn create_session(&self, student_id: i64) -> Result<Tokens, ServiceError> {
        let session = self.new_session()?;
        self.repository.set_session(student_id, session.clone()).await?;
        self.issue_tokens(student_id, session)
    }

    fn new_session(&self) -> Result<Session, ServiceError> {
        let expires_at = Utc::now()
            .checked_add_signed(self.refresh_token_ttl)
            .ok_or_else(|| {
                TokenError::LifetimeOutOfRange(self.refresh_token_ttl.to_std().unwrap_or_default())
            })?;
        Ok(Session {
            refresh_token: self.token_manager.new_refresh_token(),
            expires_at,
        })
    }

    fn issue_tokens(&self, student_id: i64, session: Session) -> Result<Tokens, ServiceError> {
        let access_token = self
            .token_manager
            .new_jwt(&student_id.to_string(), self.access_token_ttl)?;
        Ok(Tokens {
            access_token,
            refresh_token: session.refresh_token,
        })
    }
}

fn required_name(field: &str, value: &str) -> Result<String, ServiceError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ServiceError::Validation(format!("{field} must not be empty")));
    }
    Ok(value.to_string())
}

fn normalize_email(email: &str) -> Result<String, ServiceError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {
            Ok(email)
        }
        _ => Err(ServiceError::Validation("email is invalid".to_string())),
    }
}

fn validate_password(password: &str) -> Result<&str, ServiceError> {
    if PASSWORD_LEN.contains(&password.chars().count()) {
        Ok(password)
    } else {
        Err(ServiceError::Validation(format!(
            "password must be {} to {} characters long",
            PASSWORD_LEN.start(),
            PASSWORD_LEN.end()
        )))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::repository::memory::MemoryRepository;
    use std::collections::HashMap;

    pub(crate) fn settings() -> AppSettings {
        let vars: HashMap<String, String> = [
            ("DB_DRIVER", "postgres"),
            ("DB_DSN", "postgres://localhost/students"),
            ("JWT_SIGNING_KEY", "test-signing-key"),
            ("PASSWORD_SALT", "test-salt"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        AppSettings::from_vars(&vars).expect("test settings")
    }

    fn service() -> Service {
        let settings = settings();
        let tokens = Arc::new(TokenManager::new(&settings.jwt.signing_key).unwrap());
        Service::new(Arc::new(MemoryRepository::default()), tokens, &settings).unwrap()
    }

    fn sign_up_input(email: &str) -> SignUpInput {
        SignUpInput {
            first_name: " Ada ".to_string(),
            last_name: "Lovelace".to_string(),
            email: email.to_string(),
            password: "correct horse".to_string(),
        }
    }

    #[test]
    fn hashing_depends_on_salt() {
        let a = PasswordHasher::new("one").unwrap().hash("password");
        let b = PasswordHasher::new("two").unwrap().hash("password");
        assert_ne!(a, b);
        assert_eq!(a, PasswordHasher::new("one").unwrap().hash("password"));
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn sign_up_normalizes_input() {
        let student = service()
            .sign_up(sign_up_input("Ada@Example.COM"))
            .await
            .unwrap();
        assert_eq!(student.first_name, "Ada");
        assert_eq!(student.email, "ada@example.com");
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let service = service();
        service.sign_up(sign_up_input("ada@example.com")).await.unwrap();
        let err = service
            .sign_up(sign_up_input("ADA@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyExists));
    }

    #[tokio::test]
    async fn short_password_fails_validation() {
        let mut input = sign_up_input("ada@example.com");
        input.password = "short".to_string();
        let err = service().sign_up(input).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn malformed_email_fails_validation() {
        for email in ["", "ada", "@example.com", "ada@", "a@b@c"] {
            let err = service().sign_up(sign_up_input(email)).await.unwrap_err();
            assert!(matches!(err, ServiceError::Validation(_)), "{email}");
        }
    }

    #[tokio::test]
    async fn sign_in_issues_tokens_for_the_student() {
        let service = service();
        let student = service.sign_up(sign_up_input("ada@example.com")).await.unwrap();
        let tokens = service
            .sign_in(SignInInput {
                email: "ada@example.com".to_string(),
                password: "correct horse".to_string(),
            })
            .await
            .unwrap();

        let claims = service.token_manager.parse(&tokens.access_token).unwrap();
        assert_eq!(claims.sub, student.id.to_string());
    }

    #[tokio::test]
    async fn wrong_password_is_invalid_credentials() {
        let service = service();
        service.sign_up(sign_up_input("ada@example.com")).await.unwrap();
        let err = service
            .sign_in(SignInInput {
                email: "ada@example.com".to_string(),
                password: "wrong horse".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidCredentials));
    }

    #[tokio::test]
    async fn refresh_rotates_the_refresh_token() {
        let service = service();
        service.sign_up(sign_up_input("ada@example.com")).await.unwrap();
        let first = service
            .sign_in(SignInInput {
                email: "ada@example.com".to_string(),
                password: "correct horse".to_string(),
            })
            .await
            .unwrap();

        let second = service.refresh_tokens(&first.refresh_token).await.unwrap();
        assert_ne!(first.refresh_token, second.refresh_token);

        let err = service
            .refresh_tokens(&first.refresh_token)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRefreshToken));
    }

    #[tokio::test]
    async fn concurrent_refreshes_with_one_token_succeed_once() {
        let service = service();
        service.sign_up(sign_up_input("ada@example.com")).await.unwrap();
        let tokens = service
            .sign_in(SignInInput {
                email: "ada@example.com".to_string(),
                password: "correct horse".to_string(),
            })
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            service.refresh_tokens(&tokens.refresh_token),
            service.refresh_tokens(&tokens.refresh_token)
        );
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        let err = a.err().or(b.err()).unwrap();
        assert!(matches!(err, ServiceError::InvalidRefreshToken));
    }

    #[tokio::test]
    async fn huge_refresh_lifetime_is_an_error_not_a_panic() {
        let mut settings = settings();
        settings.jwt.refresh_token_ttl_secs = 9_000_000_000_000;
        let tokens = Arc::new(TokenManager::new(&settings.jwt.signing_key).unwrap());
        let service =
            Service::new(Arc::new(MemoryRepository::default()), tokens, &settings).unwrap();
        service.sign_up(sign_up_input("ada@example.com")).await.unwrap();

        let err = service
            .sign_in(SignInInput {
                email: "ada@example.com".to_string(),
                password: "correct horse".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Token(TokenError::LifetimeOutOfRange(_))
        ));
    }

    #[tokio::test]
    async fn expired_session_is_rejected() {
        let service = service();
        let student = service.sign_up(sign_up_input("ada@example.com")).await.unwrap();
        service
            .repository
            .set_session(
                student.id,
                Session {
                    refresh_token: "stale".to_string(),
                    expires_at: Utc::now() - chrono::Duration::seconds(1),
                },
            )
            .await
            .unwrap();

        let err = service.refresh_tokens("stale").await.unwrap_err();
        assert!(matches!(err, ServiceError::RefreshTokenExpired));
    }

    #[tokio::test]
    async fn listing_clamps_limit_and_rejects_negative_offset() {
        let service = service();
        for i in 0..3 {
            service
                .sign_up(sign_up_input(&format!("s{i}@example.com")))
                .await
                .unwrap();
        }
        assert_eq!(service.students(Some(1000), None).await.unwrap().len(), 3);
        assert_eq!(service.students(Some(2), Some(2)).await.unwrap().len(), 1);
        assert!(matches!(
            service.students(None, Some(-1)).await,
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            service.students(Some(0), None).await,
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn update_and_delete_missing_student_are_not_found() {
        let service = service();
        assert!(matches!(
            service
                .update_student(7, UpdateStudentInput::default())
                .await,
            Err(ServiceError::NotFound)
        ));
        assert!(matches!(
            service.delete_student(7).await,
            Err(ServiceError::NotFound)
        ));
    }

    #[tokio::test]
    async fn update_rejects_blank_names() {
        let service = service();
        let student = service.sign_up(sign_up_input("ada@example.com")).await.unwrap();
        let err = service
            .update_student(
                student.id,
                UpdateStudentInput {
                    last_name: Some("  ".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }
}
