use std::sync::Arc;

use chrono::Utc;
use shared::{
    domain::{Issue, IssueId, NewIssue, PhotoId, TransitionAction, User, UserId, UserRole},
    error::{ApiError, ErrorCode},
    protocol::{DashboardStats, IssueDetail, IssueQuery},
};
use storage::{IssueStore, PhotoStore, StoredPhoto, UserStore};
use tracing::{info, warn};

pub mod lifecycle;
pub mod session;
pub mod views;

pub use session::Session;

#[derive(Clone)]
pub struct ApiContext {
    pub issues: Arc<dyn IssueStore>,
    pub users: Arc<dyn UserStore>,
    pub photos: Arc<dyn PhotoStore>,
}

impl ApiContext {
    /// Wires all three repositories to one backing store.
    pub fn new<S>(store: S) -> Self
    where
        S: IssueStore + UserStore + PhotoStore + 'static,
    {
        let store = Arc::new(store);
        Self {
            issues: store.clone(),
            users: store.clone(),
            photos: store,
        }
    }
}

pub async fn login(ctx: &ApiContext, username: &str) -> Result<User, ApiError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "username is required"));
    }
    let user = ctx
        .users
        .find_user_by_username(username)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "unknown username"))?;
    info!(user_id = %user.id, role = user.role.as_str(), "user logged in");
    Ok(user)
}

pub async fn list_users(ctx: &ApiContext) -> Result<Vec<User>, ApiError> {
    ctx.users.list_users().await.map_err(internal)
}

pub async fn list_issues(
    ctx: &ApiContext,
    viewer_id: UserId,
    query: &IssueQuery,
) -> Result<Vec<Issue>, ApiError> {
    let viewer = resolve_actor(ctx, viewer_id).await?;
    let issues = ctx.issues.list_issues().await.map_err(internal)?;
    Ok(views::filter_issues(issues, &viewer, query))
}

pub async fn get_issue(
    ctx: &ApiContext,
    viewer_id: UserId,
    issue_id: IssueId,
) -> Result<IssueDetail, ApiError> {
    let viewer = resolve_actor(ctx, viewer_id).await?;
    let issue = load_issue(ctx, issue_id).await?;
    if !views::is_visible_to(&issue, &viewer) {
        return Err(issue_not_found(issue_id));
    }

    let created_by = ctx.users.get_user(issue.created_by).await.map_err(internal)?;
    let assigned_to = match issue.assigned_to {
        Some(user_id) => ctx.users.get_user(user_id).await.map_err(internal)?,
        None => None,
    };
    let allowed_actions = lifecycle::allowed_actions(&issue, &viewer);
    Ok(IssueDetail {
        issue,
        created_by,
        assigned_to,
        allowed_actions,
    })
}

pub async fn create_issue(
    ctx: &ApiContext,
    actor_id: UserId,
    new_issue: NewIssue,
) -> Result<Issue, ApiError> {
    let actor = resolve_actor(ctx, actor_id).await?;
    if actor.role != UserRole::Admin {
        return Err(ApiError::new(
            ErrorCode::Forbidden,
            "only engineering may register issues",
        ));
    }

    let new_issue = NewIssue {
        title: new_issue.title.trim().to_string(),
        description: new_issue.description.trim().to_string(),
        location: new_issue.location.trim().to_string(),
        priority: new_issue.priority,
        photo_url_before: new_issue
            .photo_url_before
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty()),
    };
    if new_issue.title.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "title is required"));
    }
    if new_issue.description.is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "description is required",
        ));
    }
    if new_issue.location.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "location is required"));
    }

    let issue = ctx
        .issues
        .create_issue(actor.id, new_issue)
        .await
        .map_err(internal)?;
    info!(issue_id = %issue.id, actor = %actor.id, "issue created");
    Ok(issue)
}

/// Loads the issue, runs the workflow rule for `action` and persists the
/// result.
///
/// An issue hidden from the actor is `NotFound` for any action its status
/// allows, the same answer [`get_issue`] gives. Actions its status does not
/// allow still fail with the workflow error, so a second `start` is always
/// `InvalidTransition`.
pub async fn transition_issue(
    ctx: &ApiContext,
    actor_id: UserId,
    issue_id: IssueId,
    action: TransitionAction,
) -> Result<Issue, ApiError> {
    let actor = resolve_actor(ctx, actor_id).await?;
    let mut issue = load_issue(ctx, issue_id).await?;
    let from = issue.status;
    if !views::is_visible_to(&issue, &actor)
        && lifecycle::target_status(from, action.kind()).is_some()
    {
        return Err(issue_not_found(issue_id));
    }

    lifecycle::apply(&mut issue, &actor, &action, Utc::now()).map_err(|error| {
        warn!(
            issue_id = %issue_id,
            actor = %actor.id,
            action = %action.kind(),
            %error,
            "transition rejected"
        );
        ApiError::from(error)
    })?;

    let updated = ctx
        .issues
        .update_issue(issue_id, issue.change())
        .await
        .map_err(internal)?
        .ok_or_else(|| issue_not_found(issue_id))?;
    info!(
        issue_id = %issue_id,
        actor = %actor.id,
        from = %from,
        to = %updated.status,
        "issue transitioned"
    );
    Ok(updated)
}

pub async fn start_issue(
    ctx: &ApiContext,
    actor_id: UserId,
    issue_id: IssueId,
) -> Result<Issue, ApiError> {
    transition_issue(ctx, actor_id, issue_id, TransitionAction::Start).await
}

pub async fn submit_issue_for_review(
    ctx: &ApiContext,
    actor_id: UserId,
    issue_id: IssueId,
    photo_url_after: Option<String>,
) -> Result<Issue, ApiError> {
    transition_issue(
        ctx,
        actor_id,
        issue_id,
        TransitionAction::SubmitForReview { photo_url_after },
    )
    .await
}

pub async fn approve_issue(
    ctx: &ApiContext,
    actor_id: UserId,
    issue_id: IssueId,
) -> Result<Issue, ApiError> {
    transition_issue(ctx, actor_id, issue_id, TransitionAction::Approve).await
}

pub async fn reject_issue(
    ctx: &ApiContext,
    actor_id: UserId,
    issue_id: IssueId,
) -> Result<Issue, ApiError> {
    transition_issue(ctx, actor_id, issue_id, TransitionAction::Reject).await
}

pub async fn dashboard(ctx: &ApiContext, viewer_id: UserId) -> Result<DashboardStats, ApiError> {
    let visible = list_issues(ctx, viewer_id, &IssueQuery::default()).await?;
    Ok(views::dashboard_stats(visible))
}

pub async fn upload_photo(
    ctx: &ApiContext,
    actor_id: UserId,
    bytes: &[u8],
    mime_type: Option<&str>,
) -> Result<PhotoId, ApiError> {
    let actor = resolve_actor(ctx, actor_id).await?;
    if bytes.is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "photo body cannot be empty",
        ));
    }
    let mime_type = mime_type.map(str::trim).filter(|mime| !mime.is_empty());
    let photo_id = ctx
        .photos
        .store_photo(actor.id, bytes, mime_type)
        .await
        .map_err(internal)?;
    info!(%photo_id, actor = %actor.id, size_bytes = bytes.len(), "photo stored");
    Ok(photo_id)
}

pub async fn load_photo(ctx: &ApiContext, photo_id: PhotoId) -> Result<StoredPhoto, ApiError> {
    ctx.photos
        .load_photo(photo_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "photo not found"))
}

/// The caller-supplied identity; there is no credential check behind it.
pub async fn resolve_actor(ctx: &ApiContext, user_id: UserId) -> Result<User, ApiError> {
    ctx.users
        .get_user(user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "unknown user"))
}

async fn load_issue(ctx: &ApiContext, issue_id: IssueId) -> Result<Issue, ApiError> {
    ctx.issues
        .get_issue(issue_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| issue_not_found(issue_id))
}

fn issue_not_found(issue_id: IssueId) -> ApiError {
    ApiError::new(ErrorCode::NotFound, format!("issue {issue_id} not found"))
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, format!("{err:#}"))
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
