use std::{collections::BTreeMap, sync::Arc};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use shared::domain::{Issue, IssueChange, IssueId, IssueStatus, NewIssue, PhotoId, User, UserId};
use tokio::sync::RwLock;

use crate::{seed, IssueStore, NewUser, PhotoStore, StoredPhoto, UserStore};

/// Process-local store. Contents are lost when the last clone is dropped.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    users: BTreeMap<UserId, User>,
    issues: BTreeMap<IssueId, Issue>,
    photos: BTreeMap<PhotoId, StoredPhoto>,
    last_user_id: i64,
    last_issue_id: i64,
    last_photo_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with the demo users and issues.
    pub fn seeded() -> Self {
        let mut inner = Inner::default();
        let ids: Vec<UserId> = seed::demo_users()
            .into_iter()
            .map(|user| inner.insert_user(user).id)
            .collect();
        if let [admin, field] = ids.as_slice() {
            for issue in seed::demo_issues(*admin, *field, Utc::now()) {
                inner.last_issue_id += 1;
                let id = IssueId(inner.last_issue_id);
                inner.issues.insert(id, Issue { id, ..issue });
            }
        }
        Self {
            inner: Arc::new(RwLock::new(inner)),
        }
    }
}

impl Inner {
    fn insert_user(&mut self, new_user: NewUser) -> User {
        self.last_user_id += 1;
        let user = User {
            id: UserId(self.last_user_id),
            username: new_user.username,
            full_name: new_user.full_name,
            role: new_user.role,
            avatar_url: new_user.avatar_url,
        };
        self.users.insert(user.id, user.clone());
        user
    }
}

#[async_trait]
impl IssueStore for MemoryStore {
    async fn create_issue(&self, created_by: UserId, new_issue: NewIssue) -> Result<Issue> {
        let mut inner = self.inner.write().await;
        inner.last_issue_id += 1;
        let now = Utc::now();
        let issue = Issue {
            id: IssueId(inner.last_issue_id),
            title: new_issue.title,
            description: new_issue.description,
            status: IssueStatus::Open,
            priority: new_issue.priority,
            location: new_issue.location,
            assigned_to: None,
            created_by,
            created_at: now,
            updated_at: now,
            photo_url_before: new_issue.photo_url_before,
            photo_url_after: None,
        };
        inner.issues.insert(issue.id, issue.clone());
        Ok(issue)
    }

    async fn list_issues(&self) -> Result<Vec<Issue>> {
        let inner = self.inner.read().await;
        let mut issues: Vec<Issue> = inner.issues.values().cloned().collect();
        issues.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(issues)
    }

    async fn get_issue(&self, issue_id: IssueId) -> Result<Option<Issue>> {
        Ok(self.inner.read().await.issues.get(&issue_id).cloned())
    }

    async fn update_issue(
        &self,
        issue_id: IssueId,
        change: IssueChange,
    ) -> Result<Option<Issue>> {
        let mut inner = self.inner.write().await;
        let Some(issue) = inner.issues.get_mut(&issue_id) else {
            return Ok(None);
        };
        issue.status = change.status;
        issue.assigned_to = change.assigned_to;
        issue.photo_url_after = change.photo_url_after;
        issue.updated_at = change.updated_at;
        Ok(Some(issue.clone()))
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, new_user: NewUser) -> Result<User> {
        let mut inner = self.inner.write().await;
        if inner
            .users
            .values()
            .any(|user| user.username == new_user.username)
        {
            bail!("username '{}' is already taken", new_user.username);
        }
        Ok(inner.insert_user(new_user))
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<User>> {
        Ok(self.inner.read().await.users.get(&user_id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self
            .inner
            .read()
            .await
            .users
            .values()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        Ok(self.inner.read().await.users.values().cloned().collect())
    }
}

#[async_trait]
impl PhotoStore for MemoryStore {
    async fn store_photo(
        &self,
        uploader_id: UserId,
        bytes: &[u8],
        mime_type: Option<&str>,
    ) -> Result<PhotoId> {
        let mut inner = self.inner.write().await;
        inner.last_photo_id += 1;
        let photo_id = PhotoId(inner.last_photo_id);
        inner.photos.insert(
            photo_id,
            StoredPhoto {
                photo_id,
                uploader_id,
                bytes: bytes.to_vec(),
                mime_type: mime_type.map(str::to_string),
                created_at: Utc::now(),
            },
        );
        Ok(photo_id)
    }

    async fn load_photo(&self, photo_id: PhotoId) -> Result<Option<StoredPhoto>> {
        Ok(self.inner.read().await.photos.get(&photo_id).cloned())
    }
}
