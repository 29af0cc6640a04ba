use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(IssueId);
id_newtype!(PhotoId);

/// `Admin` is engineering (reviews and approves), `Field` is the site foreman
/// who performs the work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Admin,
    Field,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            UserRole::Admin => "ADMIN",
            UserRole::Field => "FIELD",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ADMIN" => Some(UserRole::Admin),
            "FIELD" => Some(UserRole::Field),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueStatus {
    Open,
    InProgress,
    Review,
    Approved,
    Rejected,
}

impl IssueStatus {
    pub const ALL: [IssueStatus; 5] = [
        IssueStatus::Open,
        IssueStatus::InProgress,
        IssueStatus::Review,
        IssueStatus::Approved,
        IssueStatus::Rejected,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            IssueStatus::Open => "OPEN",
            IssueStatus::InProgress => "IN_PROGRESS",
            IssueStatus::Review => "REVIEW",
            IssueStatus::Approved => "APPROVED",
            IssueStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(raw.trim()))
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, IssueStatus::Approved | IssueStatus::Rejected)
    }
}

impl std::fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssuePriority {
    Low,
    #[default]
    Medium,
    High,
}

impl IssuePriority {
    pub fn as_str(self) -> &'static str {
        match self {
            IssuePriority::Low => "LOW",
            IssuePriority::Medium => "MEDIUM",
            IssuePriority::High => "HIGH",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "LOW" => Some(IssuePriority::Low),
            "MEDIUM" => Some(IssuePriority::Medium),
            "HIGH" => Some(IssuePriority::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub full_name: String,
    pub role: UserRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: IssueId,
    pub title: String,
    pub description: String,
    pub status: IssueStatus,
    pub priority: IssuePriority,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<UserId>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url_before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url_after: Option<String>,
}

impl Issue {
    /// Fields a lifecycle transition is allowed to touch.
    pub fn change(&self) -> IssueChange {
        IssueChange {
            status: self.status,
            assigned_to: self.assigned_to,
            photo_url_after: self.photo_url_after.clone(),
            updated_at: self.updated_at,
        }
    }
}

/// Creation payload; the store fills in id, author, status and timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIssue {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub location: String,
    #[serde(default)]
    pub priority: IssuePriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url_before: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueChange {
    pub status: IssueStatus,
    pub assigned_to: Option<UserId>,
    pub photo_url_after: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Edge names of the issue workflow, without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Start,
    SubmitForReview,
    Approve,
    Reject,
}

impl TransitionKind {
    pub const ALL: [TransitionKind; 4] = [
        TransitionKind::Start,
        TransitionKind::SubmitForReview,
        TransitionKind::Approve,
        TransitionKind::Reject,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TransitionKind::Start => "start",
            TransitionKind::SubmitForReview => "submit_for_review",
            TransitionKind::Approve => "approve",
            TransitionKind::Reject => "reject",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "start" => Some(TransitionKind::Start),
            "submit" | "submit_for_review" => Some(TransitionKind::SubmitForReview),
            "approve" => Some(TransitionKind::Approve),
            "reject" => Some(TransitionKind::Reject),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TransitionAction {
    Start,
    SubmitForReview {
        #[serde(default)]
        photo_url_after: Option<String>,
    },
    Approve,
    Reject,
}

impl TransitionAction {
    pub fn kind(&self) -> TransitionKind {
        match self {
            TransitionAction::Start => TransitionKind::Start,
            TransitionAction::SubmitForReview { .. } => TransitionKind::SubmitForReview,
            TransitionAction::Approve => TransitionKind::Approve,
            TransitionAction::Reject => TransitionKind::Reject,
        }
    }
}
