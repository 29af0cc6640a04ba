//! Issue workflow: which status edges exist and which role may take them.
//!
//! ```text
//! OPEN --start(FIELD)--> IN_PROGRESS --submit_for_review(FIELD, photo)--> REVIEW
//! REVIEW --approve(ADMIN)--> APPROVED
//! REVIEW --reject(ADMIN)--> REJECTED
//! ```
//!
//! `APPROVED` and `REJECTED` have no outgoing edges. Every operation either
//! applies the whole change or leaves the issue untouched.

use chrono::{DateTime, Utc};
use shared::{
    domain::{Issue, IssueStatus, TransitionAction, TransitionKind, User, UserRole},
    error::LifecycleError,
};

/// Destination status and the only role allowed to take the edge.
pub fn target_status(from: IssueStatus, action: TransitionKind) -> Option<(IssueStatus, UserRole)> {
    match (from, action) {
        (IssueStatus::Open, TransitionKind::Start) => Some((IssueStatus::InProgress, UserRole::Field)),
        (IssueStatus::InProgress, TransitionKind::SubmitForReview) => {
            Some((IssueStatus::Review, UserRole::Field))
        }
        (IssueStatus::Review, TransitionKind::Approve) => {
            Some((IssueStatus::Approved, UserRole::Admin))
        }
        (IssueStatus::Review, TransitionKind::Reject) => {
            Some((IssueStatus::Rejected, UserRole::Admin))
        }
        _ => None,
    }
}

/// Actions `actor` could take on `issue` right now. Evidence for a review
/// submission is not checked here.
pub fn allowed_actions(issue: &Issue, actor: &User) -> Vec<TransitionKind> {
    if issue.status.is_terminal() {
        return Vec::new();
    }
    TransitionKind::ALL
        .into_iter()
        .filter(|action| {
            target_status(issue.status, *action).is_some_and(|(_, role)| role == actor.role)
        })
        .collect()
}

pub fn start(issue: &mut Issue, actor: &User, now: DateTime<Utc>) -> Result<(), LifecycleError> {
    let next = authorize(issue, actor, TransitionKind::Start)?;
    issue.status = next;
    if issue.assigned_to.is_none() {
        issue.assigned_to = Some(actor.id);
    }
    touch(issue, now);
    Ok(())
}

pub fn submit_for_review(
    issue: &mut Issue,
    actor: &User,
    after_photo: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), LifecycleError> {
    let photo = after_photo
        .map(str::trim)
        .filter(|photo| !photo.is_empty())
        .ok_or(LifecycleError::MissingEvidence)?;
    let next = authorize(issue, actor, TransitionKind::SubmitForReview)?;
    issue.status = next;
    issue.photo_url_after = Some(photo.to_string());
    touch(issue, now);
    Ok(())
}

pub fn approve(issue: &mut Issue, actor: &User, now: DateTime<Utc>) -> Result<(), LifecycleError> {
    let next = authorize(issue, actor, TransitionKind::Approve)?;
    issue.status = next;
    touch(issue, now);
    Ok(())
}

pub fn reject(issue: &mut Issue, actor: &User, now: DateTime<Utc>) -> Result<(), LifecycleError> {
    let next = authorize(issue, actor, TransitionKind::Reject)?;
    issue.status = next;
    touch(issue, now);
    Ok(())
}

pub fn apply(
    issue: &mut Issue,
    actor: &User,
    action: &TransitionAction,
    now: DateTime<Utc>,
) -> Result<(), LifecycleError> {
    match action {
        TransitionAction::Start => start(issue, actor, now),
        TransitionAction::SubmitForReview { photo_url_after } => {
            submit_for_review(issue, actor, photo_url_after.as_deref(), now)
        }
        TransitionAction::Approve => approve(issue, actor, now),
        TransitionAction::Reject => reject(issue, actor, now),
    }
}

fn authorize(
    issue: &Issue,
    actor: &User,
    action: TransitionKind,
) -> Result<IssueStatus, LifecycleError> {
    let (next, role) =
        target_status(issue.status, action).ok_or(LifecycleError::InvalidTransition {
            from: issue.status,
            action,
        })?;
    if actor.role != role {
        return Err(LifecycleError::Forbidden {
            role: actor.role,
            action,
        });
    }
    Ok(next)
}

// updated_at must never move backwards, even if the clock does
fn touch(issue: &mut Issue, now: DateTime<Utc>) {
    issue.updated_at = issue.updated_at.max(now);
}
