use serde::{Deserialize, Serialize};

use crate::domain::{Issue, IssueStatus, PhotoId, TransitionKind, User, UserId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitForReviewRequest {
    #[serde(default)]
    pub photo_url_after: Option<String>,
}

/// List filter shared by the issue list and the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<IssueStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueDetail {
    pub issue: Issue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<User>,
    pub allowed_actions: Vec<TransitionKind>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total: usize,
    pub open: usize,
    pub in_progress: usize,
    pub review: usize,
    pub approved: usize,
    pub rejected: usize,
    pub recent: Vec<Issue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoUploadResponse {
    pub photo_id: PhotoId,
    pub url: String,
    pub size_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum IssueEvent {
    IssueCreated {
        issue: Issue,
    },
    IssueUpdated {
        issue: Issue,
        action: TransitionKind,
        actor: UserId,
    },
}
