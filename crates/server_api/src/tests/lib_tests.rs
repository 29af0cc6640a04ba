use super::*;
use shared::domain::{IssuePriority, IssueStatus, TransitionKind};
use storage::{seed, MemoryStore, NewUser, Storage};

struct Fixture {
    ctx: ApiContext,
    admin: User,
    field: User,
}

async fn fixture(ctx: ApiContext) -> Fixture {
    let admin = login(&ctx, seed::DEMO_ADMIN_USERNAME).await.expect("admin");
    let field = login(&ctx, seed::DEMO_FIELD_USERNAME).await.expect("field");
    Fixture { ctx, admin, field }
}

async fn setup() -> Fixture {
    fixture(ApiContext::new(MemoryStore::seeded())).await
}

async fn setup_sqlite() -> Fixture {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.seed_demo_data().await.expect("seed");
    fixture(ApiContext::new(storage)).await
}

fn new_issue(title: &str) -> NewIssue {
    NewIssue {
        title: title.into(),
        description: "Azulejo quebrado atrás da pia".into(),
        location: "Bloco B - Apto 12".into(),
        priority: IssuePriority::Medium,
        photo_url_before: Some("https://photos.example/before.jpg".into()),
    }
}

async fn open_issue(fx: &Fixture) -> Issue {
    create_issue(&fx.ctx, fx.admin.id, new_issue("Azulejo quebrado"))
        .await
        .expect("create")
}

#[tokio::test]
async fn full_workflow_from_open_to_approved() {
    let fx = setup().await;
    let issue = open_issue(&fx).await;
    assert_eq!(issue.status, IssueStatus::Open);
    assert_eq!(issue.created_by, fx.admin.id);

    let started = start_issue(&fx.ctx, fx.field.id, issue.id)
        .await
        .expect("start");
    assert_eq!(started.status, IssueStatus::InProgress);
    assert_eq!(started.assigned_to, Some(fx.field.id));

    let submitted =
        submit_issue_for_review(&fx.ctx, fx.field.id, issue.id, Some("p1".into()))
            .await
            .expect("submit");
    assert_eq!(submitted.status, IssueStatus::Review);
    assert_eq!(submitted.photo_url_after.as_deref(), Some("p1"));

    let approved = approve_issue(&fx.ctx, fx.admin.id, issue.id)
        .await
        .expect("approve");
    assert_eq!(approved.status, IssueStatus::Approved);
    assert_eq!(approved.assigned_to, Some(fx.field.id));
    assert!(approved.updated_at >= submitted.updated_at);
    assert!(submitted.updated_at >= started.updated_at);
    assert!(started.updated_at >= issue.created_at);
}

#[tokio::test]
async fn rejected_issue_cannot_be_moved_again() {
    let fx = setup_sqlite().await;
    let issue = open_issue(&fx).await;
    start_issue(&fx.ctx, fx.field.id, issue.id).await.expect("start");
    submit_issue_for_review(&fx.ctx, fx.field.id, issue.id, Some("p2".into()))
        .await
        .expect("submit");
    let rejected = reject_issue(&fx.ctx, fx.admin.id, issue.id)
        .await
        .expect("reject");
    assert_eq!(rejected.status, IssueStatus::Rejected);

    for action in [TransitionAction::Start, TransitionAction::Approve] {
        let actor = if action == TransitionAction::Start {
            fx.field.id
        } else {
            fx.admin.id
        };
        let err = transition_issue(&fx.ctx, actor, issue.id, action)
            .await
            .expect_err("terminal");
        assert!(matches!(err.code, ErrorCode::InvalidTransition));
    }
}

#[tokio::test]
async fn second_start_fails_and_keeps_first_assignee() {
    let fx = setup().await;
    let other_field = fx
        .ctx
        .users
        .create_user(NewUser {
            username: "enc.maria".into(),
            full_name: "Maria (Encarregada)".into(),
            role: UserRole::Field,
            avatar_url: None,
        })
        .await
        .expect("user");
    let issue = open_issue(&fx).await;
    start_issue(&fx.ctx, fx.field.id, issue.id).await.expect("start");

    let err = start_issue(&fx.ctx, other_field.id, issue.id)
        .await
        .expect_err("second start");
    assert!(matches!(err.code, ErrorCode::InvalidTransition));

    let stored = fx
        .ctx
        .issues
        .get_issue(issue.id)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(stored.assigned_to, Some(fx.field.id));
}

#[tokio::test]
async fn admin_start_is_forbidden() {
    let fx = setup().await;
    let issue = open_issue(&fx).await;
    let err = start_issue(&fx.ctx, fx.admin.id, issue.id)
        .await
        .expect_err("admin start");
    assert!(matches!(err.code, ErrorCode::Forbidden));
}

#[tokio::test]
async fn field_cannot_approve_issue_in_review() {
    let fx = setup().await;
    let in_review = fx
        .ctx
        .issues
        .list_issues()
        .await
        .expect("issues")
        .into_iter()
        .find(|issue| issue.status == IssueStatus::Review)
        .expect("seeded review issue");
    let err = approve_issue(&fx.ctx, fx.field.id, in_review.id)
        .await
        .expect_err("field approve");
    assert!(matches!(err.code, ErrorCode::Forbidden));
    let err = reject_issue(&fx.ctx, fx.field.id, in_review.id)
        .await
        .expect_err("field reject");
    assert!(matches!(err.code, ErrorCode::Forbidden));
}

#[tokio::test]
async fn submit_without_photo_reports_missing_evidence() {
    let fx = setup().await;
    let issue = open_issue(&fx).await;
    start_issue(&fx.ctx, fx.field.id, issue.id).await.expect("start");
    let err = submit_issue_for_review(&fx.ctx, fx.field.id, issue.id, None)
        .await
        .expect_err("no photo");
    assert!(matches!(err.code, ErrorCode::MissingEvidence));

    let stored = fx
        .ctx
        .issues
        .get_issue(issue.id)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(stored.status, IssueStatus::InProgress);
}

#[tokio::test]
async fn unknown_issue_and_unknown_actor_are_reported() {
    let fx = setup().await;
    let err = start_issue(&fx.ctx, fx.field.id, IssueId(9_999))
        .await
        .expect_err("missing issue");
    assert!(matches!(err.code, ErrorCode::NotFound));

    let issue = open_issue(&fx).await;
    let err = start_issue(&fx.ctx, UserId(9_999), issue.id)
        .await
        .expect_err("unknown actor");
    assert!(matches!(err.code, ErrorCode::Unauthorized));
}

#[tokio::test]
async fn only_admins_create_issues_and_input_is_validated() {
    let fx = setup().await;
    let err = create_issue(&fx.ctx, fx.field.id, new_issue("Vidro trincado"))
        .await
        .expect_err("field create");
    assert!(matches!(err.code, ErrorCode::Forbidden));

    let mut blank = new_issue("   ");
    blank.location = "Bloco C".into();
    let err = create_issue(&fx.ctx, fx.admin.id, blank)
        .await
        .expect_err("blank title");
    assert!(matches!(err.code, ErrorCode::Validation));

    let mut no_description = new_issue("Vidro trincado");
    no_description.description = " ".into();
    let err = create_issue(&fx.ctx, fx.admin.id, no_description)
        .await
        .expect_err("blank description");
    assert!(matches!(err.code, ErrorCode::Validation));

    let mut untrimmed = new_issue("  Vidro trincado  ");
    untrimmed.photo_url_before = Some("  ".into());
    let issue = create_issue(&fx.ctx, fx.admin.id, untrimmed)
        .await
        .expect("create");
    assert_eq!(issue.title, "Vidro trincado");
    assert_eq!(issue.photo_url_before, None);
}

#[tokio::test]
async fn field_worker_list_hides_issues_assigned_to_others() {
    let fx = setup_sqlite().await;
    let visible = list_issues(&fx.ctx, fx.field.id, &IssueQuery::default())
        .await
        .expect("field list");
    assert!(visible
        .iter()
        .all(|i| i.status == IssueStatus::Open || i.assigned_to == Some(fx.field.id)));

    let all = list_issues(&fx.ctx, fx.admin.id, &IssueQuery::default())
        .await
        .expect("admin list");
    assert_eq!(all.len(), 4);

    let searched = list_issues(
        &fx.ctx,
        fx.admin.id,
        &IssueQuery {
            search: Some("escada".into()),
            status: None,
        },
    )
    .await
    .expect("search");
    assert_eq!(searched.len(), 1);
    assert_eq!(searched[0].title, "Lâmpada Queimada");
}

#[tokio::test]
async fn issue_detail_resolves_people_and_actions() {
    let fx = setup().await;
    let issue = open_issue(&fx).await;

    let detail = get_issue(&fx.ctx, fx.field.id, issue.id)
        .await
        .expect("detail");
    assert_eq!(detail.allowed_actions, vec![TransitionKind::Start]);
    assert_eq!(detail.created_by.map(|u| u.id), Some(fx.admin.id));
    assert!(detail.assigned_to.is_none());

    start_issue(&fx.ctx, fx.field.id, issue.id).await.expect("start");
    let detail = get_issue(&fx.ctx, fx.admin.id, issue.id)
        .await
        .expect("detail");
    assert!(detail.allowed_actions.is_empty());
    assert_eq!(detail.assigned_to.map(|u| u.id), Some(fx.field.id));
}

#[tokio::test]
async fn dashboard_reflects_viewer_visibility() {
    let fx = setup().await;
    let admin_stats = dashboard(&fx.ctx, fx.admin.id).await.expect("admin");
    assert_eq!(admin_stats.total, 4);
    assert_eq!(admin_stats.open, 1);
    assert_eq!(admin_stats.in_progress, 1);
    assert_eq!(admin_stats.review, 1);
    assert_eq!(admin_stats.approved, 1);
    assert_eq!(admin_stats.recent.len(), 4);

    let field_stats = dashboard(&fx.ctx, fx.field.id).await.expect("field");
    assert_eq!(field_stats.total, 4);

    let outsider = fx
        .ctx
        .users
        .create_user(NewUser {
            username: "enc.paulo".into(),
            full_name: "Paulo".into(),
            role: UserRole::Field,
            avatar_url: None,
        })
        .await
        .expect("user");
    let outsider_stats = dashboard(&fx.ctx, outsider.id).await.expect("outsider");
    assert_eq!(outsider_stats.total, 1);
    assert_eq!(outsider_stats.open, 1);
}

#[tokio::test]
async fn photos_round_trip_and_empty_uploads_are_rejected() {
    let fx = setup().await;
    let err = upload_photo(&fx.ctx, fx.field.id, b"", Some("image/png"))
        .await
        .expect_err("empty");
    assert!(matches!(err.code, ErrorCode::Validation));

    let photo_id = upload_photo(&fx.ctx, fx.field.id, b"png-bytes", Some(" image/png "))
        .await
        .expect("upload");
    let photo = load_photo(&fx.ctx, photo_id).await.expect("load");
    assert_eq!(photo.bytes, b"png-bytes");
    assert_eq!(photo.mime_type.as_deref(), Some("image/png"));

    let err = load_photo(&fx.ctx, PhotoId(photo_id.0 + 1))
        .await
        .expect_err("missing");
    assert!(matches!(err.code, ErrorCode::NotFound));
}

#[tokio::test]
async fn blank_login_is_a_validation_error() {
    let fx = setup().await;
    let err = login(&fx.ctx, "  ").await.expect_err("blank");
    assert!(matches!(err.code, ErrorCode::Validation));
    assert_eq!(list_users(&fx.ctx).await.expect("users").len(), 2);
}

async fn second_field_user(fx: &Fixture) -> User {
    fx.ctx
        .users
        .create_user(NewUser {
            username: "enc.maria".into(),
            full_name: "Maria (Encarregada)".into(),
            role: UserRole::Field,
            avatar_url: None,
        })
        .await
        .expect("user")
}

#[tokio::test]
async fn issue_assigned_to_another_field_user_is_hidden() {
    let fx = setup().await;
    let maria = second_field_user(&fx).await;
    let issue = open_issue(&fx).await;
    start_issue(&fx.ctx, maria.id, issue.id).await.expect("start");
    submit_issue_for_review(&fx.ctx, maria.id, issue.id, Some("p3".into()))
        .await
        .expect("submit");

    let err = get_issue(&fx.ctx, fx.field.id, issue.id)
        .await
        .expect_err("hidden detail");
    assert!(matches!(err.code, ErrorCode::NotFound));

    let listed = list_issues(&fx.ctx, fx.field.id, &IssueQuery::default())
        .await
        .expect("list");
    assert!(listed.iter().all(|i| i.id != issue.id));
    let stats = dashboard(&fx.ctx, fx.field.id).await.expect("dashboard");
    assert_eq!(stats.total, 4);
    assert_eq!(stats.review, 1);
    assert!(stats.recent.iter().all(|i| i.id != issue.id));

    let detail = get_issue(&fx.ctx, maria.id, issue.id)
        .await
        .expect("assignee detail");
    assert_eq!(detail.issue.status, IssueStatus::Review);
    let admin_stats = dashboard(&fx.ctx, fx.admin.id).await.expect("admin");
    assert_eq!(admin_stats.review, 2);
}

#[tokio::test]
async fn hidden_issue_cannot_be_transitioned_by_other_field_user() {
    let fx = setup_sqlite().await;
    let maria = second_field_user(&fx).await;
    let issue = open_issue(&fx).await;
    start_issue(&fx.ctx, maria.id, issue.id).await.expect("start");

    let err = submit_issue_for_review(&fx.ctx, fx.field.id, issue.id, Some("p4".into()))
        .await
        .expect_err("hidden submit");
    assert!(matches!(err.code, ErrorCode::NotFound));

    let err = start_issue(&fx.ctx, fx.field.id, issue.id)
        .await
        .expect_err("second start");
    assert!(matches!(err.code, ErrorCode::InvalidTransition));

    let stored = fx
        .ctx
        .issues
        .get_issue(issue.id)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(stored.status, IssueStatus::InProgress);
    assert_eq!(stored.assigned_to, Some(maria.id));
    assert_eq!(stored.photo_url_after, None);
}
