use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use thiserror::Error;
use tracing::info;

use crate::model::{NewStudent, Page, Session, SessionRotation, Student, StudentUpdate};

const STUDENT_COLUMNS: &str = "id, first_name, last_name, email, created_at, updated_at";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("unique constraint violated")]
    Conflict,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

fn classify(err: sqlx::Error) -> StorageError {
    match err.as_database_error() {
        Some(db) if db.is_unique_violation() => StorageError::Conflict,
        _ => StorageError::Database(err),
    }
}

#[async_trait]
pub trait Repository: Send + Sync + 'static {
    async fn health_check(&self) -> bool;
    async fn migrate(&self) -> Result<(), StorageError>;

    async fn create_student(&self, student: NewStudent) -> Result<Student, StorageError>;
    async fn student_by_id(&self, id: i64) -> Result<Option<Student>, StorageError>;
    async fn student_by_credentials(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<Option<Student>, StorageError>;
    async fn list_students(&self, page: Page) -> Result<Vec<Student>, StorageError>;
    async fn update_student(
        &self,
        id: i64,
        update: StudentUpdate,
    ) -> Result<Option<Student>, StorageError>;
    async fn delete_student(&self, id: i64) -> Result<bool, StorageError>;

    async fn set_session(&self, id: i64, session: Session) -> Result<(), StorageError>;
    /// Replaces `current` with `next` in a single step, provided `current`
    /// has not expired at `now`. A token can be rotated at most once.
    async fn rotate_session(
        &self,
        current: &str,
        next: Session,
        now: DateTime<Utc>,
    ) -> Result<SessionRotation, StorageError>;
}

#[derive(Debug, Clone)]
pub struct PostgresRepository {
    pub pool: Pool<Postgres>,
}

impl PostgresRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn create_student(&self, student: NewStudent) -> Result<Student, StorageError> {
        sqlx::query_as::<_, Student>(&format!(
            "INSERT INTO students (first_name, last_name, email, password_hash) \
             VALUES ($1, $2, $3, $4) RETURNING {STUDENT_COLUMNS}"
        ))
        .bind(student.first_name)
        .bind(student.last_name)
        .bind(student.email)
        .bind(student.password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(classify)
    }

    async fn student_by_id(&self, id: i64) -> Result<Option<Student>, StorageError> {
        Ok(sqlx::query_as::<_, Student>(&format!(
            "SELECT {STUDENT_COLUMNS} FROM students WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn student_by_credentials(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<Option<Student>, StorageError> {
        Ok(sqlx::query_as::<_, Student>(&format!(
            "SELECT {STUDENT_COLUMNS} FROM students WHERE email = $1 AND password_hash = $2"
        ))
        .bind(email)
        .bind(password_hash)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn list_students(&self, page: Page) -> Result<Vec<Student>, StorageError> {
        Ok(sqlx::query_as::<_, Student>(&format!(
            "SELECT {STUDENT_COLUMNS} FROM students ORDER BY id LIMIT $1 OFFSET $2"
        ))
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn update_student(
        &self,
        id: i64,
        update: StudentUpdate,
    ) -> Result<Option<Student>, StorageError> {
        sqlx::query_as::<_, Student>(&format!(
            "UPDATE students SET \
               first_name = COALESCE($2, first_name), \
               last_name = COALESCE($3, last_name), \
               email = COALESCE($4, email), \
               updated_at = now() \
             WHERE id = $1 RETURNING {STUDENT_COLUMNS}"
        ))
        .bind(id)
        .bind(update.first_name)
        .bind(update.last_name)
        .bind(update.email)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)
    }

    async fn delete_student(&self, id: i64) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM students WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_session(&self, id: i64, session: Session) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE students SET refresh_token = $2, refresh_expires_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(session.refresh_token)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await
        .map_err(classify)?;
        Ok(())
    }

    async fn rotate_session(
        &self,
        current: &str,
        next: Session,
        now: DateTime<Utc>,
    ) -> Result<SessionRotation, StorageError> {
        let rotated = sqlx::query_as::<_, Student>(&format!(
            "UPDATE students SET refresh_token = $2, refresh_expires_at = $3 \
             WHERE refresh_token = $1 AND refresh_expires_at > $4 \
             RETURNING {STUDENT_COLUMNS}"
        ))
        .bind(current)
        .bind(next.refresh_token)
        .bind(next.expires_at)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;
        if let Some(student) = rotated {
            return Ok(SessionRotation::Rotated(student));
        }

        let known: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM students WHERE refresh_token = $1)")
                .bind(current)
                .fetch_one(&self.pool)
                .await?;
        Ok(if known {
            SessionRotation::Expired
        } else {
            SessionRotation::Unknown
        })
    }
}
