use shared::{
    domain::{Issue, IssueStatus, User, UserRole},
    protocol::{DashboardStats, IssueQuery},
};

pub const RECENT_ISSUES: usize = 5;

/// Field workers only see issues that are still open or that they own.
pub fn is_visible_to(issue: &Issue, viewer: &User) -> bool {
    match viewer.role {
        UserRole::Admin => true,
        UserRole::Field => {
            issue.status == IssueStatus::Open || issue.assigned_to == Some(viewer.id)
        }
    }
}

pub fn matches_query(issue: &Issue, query: &IssueQuery) -> bool {
    let matches_status = query.status.map_or(true, |status| issue.status == status);
    let matches_search = match query.search.as_deref().map(str::trim) {
        Some(term) if !term.is_empty() => {
            let term = term.to_lowercase();
            issue.title.to_lowercase().contains(&term)
                || issue.location.to_lowercase().contains(&term)
        }
        _ => true,
    };
    matches_status && matches_search
}

pub fn filter_issues(issues: Vec<Issue>, viewer: &User, query: &IssueQuery) -> Vec<Issue> {
    issues
        .into_iter()
        .filter(|issue| is_visible_to(issue, viewer) && matches_query(issue, query))
        .collect()
}

pub fn dashboard_stats(mut issues: Vec<Issue>) -> DashboardStats {
    let count = |status: IssueStatus| issues.iter().filter(|i| i.status == status).count();
    let mut stats = DashboardStats {
        total: issues.len(),
        open: count(IssueStatus::Open),
        in_progress: count(IssueStatus::InProgress),
        review: count(IssueStatus::Review),
        approved: count(IssueStatus::Approved),
        rejected: count(IssueStatus::Rejected),
        recent: Vec::new(),
    };
    issues.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    issues.truncate(RECENT_ISSUES);
    stats.recent = issues;
    stats
}
