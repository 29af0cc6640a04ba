use shared::{
    domain::User,
    error::{ApiError, ErrorCode},
};
use tracing::info;

use crate::ApiContext;

/// The user a client is acting as. Lives as long as the client does.
#[derive(Debug, Default, Clone)]
pub struct Session {
    user: Option<User>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn login(&mut self, ctx: &ApiContext, username: &str) -> Result<&User, ApiError> {
        let user = crate::login(ctx, username).await?;
        Ok(&*self.user.insert(user))
    }

    pub fn logout(&mut self) -> Option<User> {
        let user = self.user.take();
        if let Some(user) = &user {
            info!(user_id = %user.id, "user logged out");
        }
        user
    }

    pub fn current(&self) -> Result<&User, ApiError> {
        self.user
            .as_ref()
            .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "not logged in"))
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::{seed, MemoryStore};

    #[tokio::test]
    async fn login_then_logout_clears_current_user() {
        let ctx = ApiContext::new(MemoryStore::seeded());
        let mut session = Session::new();
        assert!(session.current().is_err());

        let user = session
            .login(&ctx, seed::DEMO_FIELD_USERNAME)
            .await
            .expect("login")
            .clone();
        assert_eq!(session.current().expect("current").id, user.id);
        assert!(session.is_authenticated());

        assert_eq!(session.logout().map(|u| u.id), Some(user.id));
        let err = session.current().expect_err("logged out");
        assert!(matches!(err.code, ErrorCode::Unauthorized));
    }

    #[tokio::test]
    async fn unknown_username_leaves_session_empty() {
        let ctx = ApiContext::new(MemoryStore::seeded());
        let mut session = Session::new();
        let err = session
            .login(&ctx, "nobody")
            .await
            .expect_err("unknown user");
        assert!(matches!(err.code, ErrorCode::Unauthorized));
        assert!(!session.is_authenticated());
    }
}
