use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use server_api::{transition_issue, ApiContext, Session};
use shared::{
    domain::{Issue, IssueId, TransitionAction, TransitionKind, UserRole},
    protocol::IssueQuery,
};
use storage::{IssueStore, NewUser, Storage, UserStore};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://./data/punchlist.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Insert the demo users and issues into an empty database.
    Seed,
    CreateUser {
        username: String,
        full_name: String,
        role: String,
    },
    ListIssues {
        /// List as this user, applying field visibility rules.
        #[arg(long = "as")]
        as_user: Option<String>,
    },
    Transition {
        issue_id: i64,
        action: String,
        #[arg(long = "as")]
        as_user: String,
        /// After photo, required for submit.
        #[arg(long)]
        photo: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url)
        .await
        .with_context(|| format!("failed to open {}", cli.database_url))?;

    match cli.command {
        Command::Seed => {
            if storage.seed_demo_data().await? {
                println!("seeded demo users and issues");
            } else {
                println!("database already has users; nothing seeded");
            }
        }
        Command::CreateUser {
            username,
            full_name,
            role,
        } => {
            let role =
                UserRole::parse(&role).ok_or_else(|| anyhow!("unknown role '{role}'"))?;
            let user = storage
                .create_user(NewUser {
                    username,
                    full_name,
                    role,
                    avatar_url: None,
                })
                .await?;
            println!(
                "created user_id={} username={} role={}",
                user.id,
                user.username,
                user.role.as_str()
            );
        }
        Command::ListIssues { as_user } => {
            let issues = match as_user {
                Some(username) => {
                    let ctx = ApiContext::new(storage);
                    let mut session = Session::new();
                    let viewer = session.login(&ctx, &username).await?.id;
                    server_api::list_issues(&ctx, viewer, &IssueQuery::default()).await?
                }
                None => storage.list_issues().await?,
            };
            for issue in &issues {
                print_issue(issue);
            }
        }
        Command::Transition {
            issue_id,
            action,
            as_user,
            photo,
        } => {
            let kind = TransitionKind::parse(&action)
                .ok_or_else(|| anyhow!("unknown action '{action}'"))?;
            let action = match kind {
                TransitionKind::Start => TransitionAction::Start,
                TransitionKind::SubmitForReview => TransitionAction::SubmitForReview {
                    photo_url_after: photo,
                },
                TransitionKind::Approve => TransitionAction::Approve,
                TransitionKind::Reject => TransitionAction::Reject,
            };

            let ctx = ApiContext::new(storage);
            let mut session = Session::new();
            let actor = session.login(&ctx, &as_user).await?.id;
            let issue = transition_issue(&ctx, actor, IssueId(issue_id), action).await?;
            print_issue(&issue);
        }
    }

    Ok(())
}

fn print_issue(issue: &Issue) {
    let assignee = issue
        .assigned_to
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".into());
    println!(
        "#{} [{}] {} {} @ {} assigned_to={}",
        issue.id,
        issue.status,
        issue.priority.as_str(),
        issue.title,
        issue.location,
        assignee
    );
}
