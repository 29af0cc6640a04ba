//! Demo users and punch-list items used to populate a fresh store.

use chrono::{DateTime, Duration, Utc};
use shared::domain::{Issue, IssueId, IssuePriority, IssueStatus, UserId, UserRole};

use crate::NewUser;

pub const DEMO_ADMIN_USERNAME: &str = "eng.carlos";
pub const DEMO_FIELD_USERNAME: &str = "enc.joao";

pub fn demo_users() -> Vec<NewUser> {
    vec![
        NewUser {
            username: DEMO_ADMIN_USERNAME.into(),
            full_name: "Eng. Carlos Silva".into(),
            role: UserRole::Admin,
            avatar_url: Some("https://picsum.photos/100/100?random=1".into()),
        },
        NewUser {
            username: DEMO_FIELD_USERNAME.into(),
            full_name: "João Pedro (Encarregado)".into(),
            role: UserRole::Field,
            avatar_url: Some("https://picsum.photos/100/100?random=2".into()),
        },
    ]
}

/// One issue in each non-rejected status. Ids are positional placeholders;
/// stores assign their own.
pub fn demo_issues(admin: UserId, field: UserId, now: DateTime<Utc>) -> Vec<Issue> {
    let photo = |n: u32| Some(format!("https://picsum.photos/400/300?random={n}"));
    let days = Duration::days;

    vec![
        Issue {
            id: IssueId(1),
            title: "Infiltração no Teto".into(),
            description: "Mancha de umidade aparecendo no canto da sala.".into(),
            status: IssueStatus::Open,
            priority: IssuePriority::High,
            location: "Bloco A - Apto 101".into(),
            assigned_to: None,
            created_by: admin,
            created_at: now - days(2),
            updated_at: now - days(2),
            photo_url_before: photo(10),
            photo_url_after: None,
        },
        Issue {
            id: IssueId(2),
            title: "Rodapé Solto".into(),
            description: "Rodapé de madeira descolando na parede da cozinha.".into(),
            status: IssueStatus::InProgress,
            priority: IssuePriority::Medium,
            location: "Bloco B - Hall".into(),
            assigned_to: Some(field),
            created_by: admin,
            created_at: now - days(1),
            updated_at: now - Duration::seconds(4_000),
            photo_url_before: photo(11),
            photo_url_after: None,
        },
        Issue {
            id: IssueId(3),
            title: "Pintura Manchada".into(),
            description: "Retocar pintura da porta principal.".into(),
            status: IssueStatus::Review,
            priority: IssuePriority::Low,
            location: "Bloco A - Corredor".into(),
            assigned_to: Some(field),
            created_by: admin,
            created_at: now - days(5),
            updated_at: now,
            photo_url_before: photo(12),
            photo_url_after: photo(13),
        },
        Issue {
            id: IssueId(4),
            title: "Lâmpada Queimada".into(),
            description: "Trocar lâmpada da escada de incêndio.".into(),
            status: IssueStatus::Approved,
            priority: IssuePriority::Low,
            location: "Bloco C - Escada".into(),
            assigned_to: Some(field),
            created_by: admin,
            created_at: now - days(10),
            updated_at: now - days(8),
            photo_url_before: photo(14),
            photo_url_after: photo(15),
        },
    ]
}
