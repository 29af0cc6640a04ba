use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{
    Issue, IssueChange, IssueId, IssuePriority, IssueStatus, NewIssue, PhotoId, User, UserId,
    UserRole,
};

mod memory;
pub mod seed;

pub use memory::MemoryStore;

/// Repository over issue records. Implementations own persistence only; the
/// workflow rules live with the caller.
#[async_trait]
pub trait IssueStore: Send + Sync {
    async fn create_issue(&self, created_by: UserId, new_issue: NewIssue) -> Result<Issue>;

    /// Newest first.
    async fn list_issues(&self) -> Result<Vec<Issue>>;

    async fn get_issue(&self, issue_id: IssueId) -> Result<Option<Issue>>;

    /// Returns `None` when no issue has this id.
    async fn update_issue(&self, issue_id: IssueId, change: IssueChange)
        -> Result<Option<Issue>>;

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(&self, new_user: NewUser) -> Result<User>;
    async fn get_user(&self, user_id: UserId) -> Result<Option<User>>;
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>>;
    async fn list_users(&self) -> Result<Vec<User>>;
}

#[async_trait]
pub trait PhotoStore: Send + Sync {
    async fn store_photo(
        &self,
        uploader_id: UserId,
        bytes: &[u8],
        mime_type: Option<&str>,
    ) -> Result<PhotoId>;
    async fn load_photo(&self, photo_id: PhotoId) -> Result<Option<StoredPhoto>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub full_name: String,
    pub role: UserRole,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StoredPhoto {
    pub photo_id: PhotoId,
    pub uploader_id: UserId,
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

const ISSUE_COLUMNS: &str = "id, title, description, status, priority, location, assigned_to, \
     created_by, created_at, updated_at, photo_url_before, photo_url_after";

const USER_COLUMNS: &str = "id, username, full_name, role, avatar_url";

/// SQLite-backed store.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        // every connection to `sqlite::memory:` is a separate database, so
        // the single connection must never be recycled
        let pool_options = if database_url.starts_with("sqlite::memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open database '{database_url}'"))?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run migrations")?;
        Ok(Self { pool })
    }

    /// Inserts the demo users and issues unless the database already has
    /// users. Returns whether anything was written.
    pub async fn seed_demo_data(&self) -> Result<bool> {
        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        if existing > 0 {
            return Ok(false);
        }

        let mut user_ids = Vec::new();
        for user in seed::demo_users() {
            user_ids.push(self.create_user(user).await?.id);
        }
        let [admin, field] = user_ids.as_slice() else {
            return Err(anyhow!("demo data must define exactly two users"));
        };

        for issue in seed::demo_issues(*admin, *field, Utc::now()) {
            sqlx::query(
                "INSERT INTO issues (title, description, status, priority, location, assigned_to,
                     created_by, created_at, updated_at, photo_url_before, photo_url_after)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&issue.title)
            .bind(&issue.description)
            .bind(issue.status.as_str())
            .bind(issue.priority.as_str())
            .bind(&issue.location)
            .bind(issue.assigned_to.map(|id| id.0))
            .bind(issue.created_by.0)
            .bind(issue.created_at)
            .bind(issue.updated_at)
            .bind(issue.photo_url_before.as_deref())
            .bind(issue.photo_url_after.as_deref())
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to seed issue '{}'", issue.title))?;
        }
        Ok(true)
    }
}

#[async_trait]
impl IssueStore for Storage {
    async fn create_issue(&self, created_by: UserId, new_issue: NewIssue) -> Result<Issue> {
        let now = Utc::now();
        let row = sqlx::query(&format!(
            "INSERT INTO issues (title, description, status, priority, location, created_by,
                 created_at, updated_at, photo_url_before)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING {ISSUE_COLUMNS}"
        ))
        .bind(&new_issue.title)
        .bind(&new_issue.description)
        .bind(IssueStatus::Open.as_str())
        .bind(new_issue.priority.as_str())
        .bind(&new_issue.location)
        .bind(created_by.0)
        .bind(now)
        .bind(now)
        .bind(new_issue.photo_url_before.as_deref())
        .fetch_one(&self.pool)
        .await
        .context("failed to insert issue")?;
        issue_from_row(&row)
    }

    async fn list_issues(&self) -> Result<Vec<Issue>> {
        let rows = sqlx::query(&format!(
            "SELECT {ISSUE_COLUMNS} FROM issues ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(issue_from_row).collect()
    }

    async fn get_issue(&self, issue_id: IssueId) -> Result<Option<Issue>> {
        let row = sqlx::query(&format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?"))
            .bind(issue_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(issue_from_row).transpose()
    }

    async fn update_issue(
        &self,
        issue_id: IssueId,
        change: IssueChange,
    ) -> Result<Option<Issue>> {
        let row = sqlx::query(&format!(
            "UPDATE issues
             SET status = ?, assigned_to = ?, photo_url_after = ?, updated_at = ?
             WHERE id = ?
             RETURNING {ISSUE_COLUMNS}"
        ))
        .bind(change.status.as_str())
        .bind(change.assigned_to.map(|id| id.0))
        .bind(change.photo_url_after.as_deref())
        .bind(change.updated_at)
        .bind(issue_id.0)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to update issue {issue_id}"))?;
        row.as_ref().map(issue_from_row).transpose()
    }

    async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for Storage {
    async fn create_user(&self, new_user: NewUser) -> Result<User> {
        let row = sqlx::query(&format!(
            "INSERT INTO users (username, full_name, role, avatar_url) VALUES (?, ?, ?, ?)
             RETURNING {USER_COLUMNS}"
        ))
        .bind(&new_user.username)
        .bind(&new_user.full_name)
        .bind(new_user.role.as_str())
        .bind(new_user.avatar_url.as_deref())
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to create user '{}'", new_user.username))?;
        user_from_row(&row)
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = ?"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let rows = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id ASC"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(user_from_row).collect()
    }
}

#[async_trait]
impl PhotoStore for Storage {
    async fn store_photo(
        &self,
        uploader_id: UserId,
        bytes: &[u8],
        mime_type: Option<&str>,
    ) -> Result<PhotoId> {
        let rec = sqlx::query(
            "INSERT INTO photos (uploader_user_id, bytes, mime_type, created_at)
             VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(uploader_id.0)
        .bind(bytes)
        .bind(mime_type)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .context("failed to store photo")?;
        Ok(PhotoId(rec.try_get::<i64, _>(0)?))
    }

    async fn load_photo(&self, photo_id: PhotoId) -> Result<Option<StoredPhoto>> {
        let row = sqlx::query(
            "SELECT id, uploader_user_id, bytes, mime_type, created_at FROM photos WHERE id = ?",
        )
        .bind(photo_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| -> Result<StoredPhoto> {
            Ok(StoredPhoto {
                photo_id: PhotoId(r.try_get::<i64, _>(0)?),
                uploader_id: UserId(r.try_get::<i64, _>(1)?),
                bytes: r.try_get::<Vec<u8>, _>(2)?,
                mime_type: r.try_get::<Option<String>, _>(3)?,
                created_at: r.try_get::<DateTime<Utc>, _>(4)?,
            })
        })
        .transpose()
    }
}

fn issue_from_row(r: &SqliteRow) -> Result<Issue> {
    let status: String = r.try_get(3)?;
    let priority: String = r.try_get(4)?;
    Ok(Issue {
        id: IssueId(r.try_get::<i64, _>(0)?),
        title: r.try_get(1)?,
        description: r.try_get(2)?,
        status: IssueStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown issue status '{status}' in database"))?,
        priority: IssuePriority::parse(&priority)
            .ok_or_else(|| anyhow!("unknown issue priority '{priority}' in database"))?,
        location: r.try_get(5)?,
        assigned_to: r.try_get::<Option<i64>, _>(6)?.map(UserId),
        created_by: UserId(r.try_get::<i64, _>(7)?),
        created_at: r.try_get::<DateTime<Utc>, _>(8)?,
        updated_at: r.try_get::<DateTime<Utc>, _>(9)?,
        photo_url_before: r.try_get(10)?,
        photo_url_after: r.try_get(11)?,
    })
}

fn user_from_row(r: &SqliteRow) -> Result<User> {
    let role: String = r.try_get(3)?;
    Ok(User {
        id: UserId(r.try_get::<i64, _>(0)?),
        username: r.try_get(1)?,
        full_name: r.try_get(2)?,
        role: UserRole::parse(&role).ok_or_else(|| anyhow!("unknown role '{role}' in database"))?,
        avatar_url: r.try_get(4)?,
    })
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
