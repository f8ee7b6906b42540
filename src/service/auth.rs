use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    entities::users,
    repo::users::{InsertUserError, NewUser, UsersRepo},
    service::{
        email::{self, MailService, OutgoingMail},
        password::{self, PasswordError, PasswordHasher},
        token::{self, Claims, TokenKind, TokenService},
    },
};

#[derive(Debug)]
pub struct AuthError {
    pub code: &'static str,
    pub message: String,
}

impl AuthError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn invalid_credentials() -> Self {
        Self::new("invalid_credentials", "invalid credentials")
    }

    fn invalid_token() -> Self {
        Self::new("invalid_token", "token is invalid or expired")
    }

    fn db(err: sea_orm::DbErr) -> Self {
        Self::new("db_error", err.to_string())
    }

    fn email_taken() -> Self {
        Self::new("email_taken", "email already registered")
    }
}

impl From<InsertUserError> for AuthError {
    fn from(err: InsertUserError) -> Self {
        match err {
            InsertUserError::EmailTaken => Self::email_taken(),
            InsertUserError::Db(err) => Self::db(err),
        }
    }
}

impl From<PasswordError> for AuthError {
    fn from(err: PasswordError) -> Self {
        match err {
            PasswordError::TooShort | PasswordError::TooWeak => {
                Self::new("invalid_password", err.to_string())
            }
            PasswordError::Hash(_) | PasswordError::Task(_) => {
                Self::new("password_hash_failed", err.to_string())
            }
        }
    }
}

#[derive(Debug)]
pub struct LoginOutput {
    pub access_token: String,
    pub refresh_token: String,
    pub needs_password_change: bool,
}

#[async_trait]
pub trait AuthService: Send + Sync {
    async fn register(&self, email: &str, password: &str) -> Result<users::Model, AuthError>;
    async fn login(&self, email: &str, password: &str) -> Result<LoginOutput, AuthError>;
    async fn refresh(&self, refresh_token: &str) -> Result<String, AuthError>;
    async fn change_password(
        &self,
        access_token: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError>;
    async fn forgot_password(&self, email: &str) -> Result<(), AuthError>;
    async fn reset_password(
        &self,
        reset_token: &str,
        email: &str,
        new_password: &str,
    ) -> Result<(), AuthError>;
    fn refresh_token_ttl(&self) -> std::time::Duration;
}

pub struct AuthServiceImpl {
    users_repo: Arc<dyn UsersRepo>,
    mailer: Arc<dyn MailService>,
    tokens: TokenService,
    hasher: PasswordHasher,
    reset_pass_ui_link: Option<String>,
}

impl AuthServiceImpl {
    pub fn new(
        users_repo: Arc<dyn UsersRepo>,
        mailer: Arc<dyn MailService>,
        tokens: TokenService,
        hasher: PasswordHasher,
        reset_pass_ui_link: Option<String>,
    ) -> Self {
        Self {
            users_repo,
            mailer,
            tokens,
            hasher,
            reset_pass_ui_link,
        }
    }

    fn normalize_email(email: &str) -> Result<String, AuthError> {
        let value = email.trim().to_lowercase();
        if value.is_empty() || !value.contains('@') {
            return Err(AuthError::new("invalid_email", "invalid email"));
        }
        Ok(value)
    }

    fn ensure_active(user: &users::Model) -> Result<(), AuthError> {
        if !user.is_active() {
            return Err(AuthError::new("user_blocked", "user is blocked"));
        }
        Ok(())
    }

    /// Verifies a token and loads its still-valid owner.
    async fn authenticate(
        &self,
        kind: TokenKind,
        token: &str,
    ) -> Result<(Claims, users::Model), AuthError> {
        let claims = self
            .tokens
            .verify(kind, token)
            .map_err(|_| AuthError::invalid_token())?;
        let uid = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::invalid_token())?;
        let user = self
            .users_repo
            .find_by_uid(uid)
            .await
            .map_err(AuthError::db)?
            .ok_or_else(AuthError::invalid_token)?;
        Self::ensure_active(&user)?;
        if token::issued_before_password_change(&claims, &user) {
            return Err(AuthError::invalid_token());
        }
        Ok((claims, user))
    }

    fn issue(&self, kind: TokenKind, user: &users::Model) -> Result<String, AuthError> {
        self.tokens
            .issue(kind, user)
            .map_err(|err| AuthError::new("token_error", err.to_string()))
    }
}

#[async_trait]
impl AuthService for AuthServiceImpl {
    async fn register(&self, email: &str, password: &str) -> Result<users::Model, AuthError> {
        let email = Self::normalize_email(email)?;
        password::validate_policy(password)?;

        let existing = self
            .users_repo
            .find_by_email(&email)
            .await
            .map_err(AuthError::db)?;
        if existing.is_some() {
            return Err(AuthError::email_taken());
        }

        let password_hash = self.hasher.hash(password).await?;
        let user = self
            .users_repo
            .insert(NewUser {
                email,
                password_hash,
                role: users::ROLE_USER.to_string(),
            })
            .await?;
        tracing::info!(user_uid = %user.uid, "user registered");
        Ok(user)
    }

    async fn login(&self, email: &str, password: &str) -> Result<LoginOutput, AuthError> {
        let Ok(email) = Self::normalize_email(email) else {
            return Err(AuthError::invalid_credentials());
        };
        let Some(user) = self
            .users_repo
            .find_by_email(&email)
            .await
            .map_err(AuthError::db)?
        else {
            return Err(AuthError::invalid_credentials());
        };

        if !self.hasher.verify(password, &user.password_hash).await? {
            return Err(AuthError::invalid_credentials());
        }
        Self::ensure_active(&user)?;

        Ok(LoginOutput {
            access_token: self.issue(TokenKind::Access, &user)?,
            refresh_token: self.issue(TokenKind::Refresh, &user)?,
            needs_password_change: user.needs_password_change,
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<String, AuthError> {
        let (_, user) = self.authenticate(TokenKind::Refresh, refresh_token).await?;
        self.issue(TokenKind::Access, &user)
    }

    async fn change_password(
        &self,
        access_token: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let (_, user) = self.authenticate(TokenKind::Access, access_token).await?;
        if !self.hasher.verify(old_password, &user.password_hash).await? {
            return Err(AuthError::new(
                "invalid_credentials",
                "old password does not match",
            ));
        }
        password::validate_policy(new_password)?;

        let password_hash = self.hasher.hash(new_password).await?;
        self.users_repo
            .update_password(user.id, password_hash, false)
            .await
            .map_err(AuthError::db)?;
        tracing::info!(user_uid = %user.uid, "password changed");
        Ok(())
    }

    async fn forgot_password(&self, email: &str) -> Result<(), AuthError> {
        let Some(ui_link) = self.reset_pass_ui_link.as_deref() else {
            return Err(AuthError::new(
                "reset_unavailable",
                "password reset is not configured",
            ));
        };
        let email = Self::normalize_email(email)?;

        // Unknown or inactive accounts get the same answer as real ones.
        let user = self
            .users_repo
            .find_by_email(&email)
            .await
            .map_err(AuthError::db)?;
        let Some(user) = user.filter(users::Model::is_active) else {
            tracing::debug!("password reset requested for unknown or inactive account");
            return Ok(());
        };

        let token = self.issue(TokenKind::Reset, &user)?;
        let reset_url = email::build_reset_password_url(ui_link, &user.email, &token);
        self.mailer
            .send(OutgoingMail {
                to: user.email.clone(),
                subject: "Reset your password".to_string(),
                html: email::build_reset_password_email_html(&reset_url),
            })
            .await
            .map_err(|err| AuthError::new("mail_error", err.to_string()))?;
        tracing::info!(user_uid = %user.uid, "password reset link sent");
        Ok(())
    }

    async fn reset_password(
        &self,
        reset_token: &str,
        email: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let (claims, user) = self.authenticate(TokenKind::Reset, reset_token).await?;
        let email = Self::normalize_email(email)?;
        if claims.email != email || user.email != email {
            return Err(AuthError::new(
                "invalid_token",
                "token does not belong to this account",
            ));
        }
        password::validate_policy(new_password)?;

        let password_hash = self.hasher.hash(new_password).await?;
        self.users_repo
            .update_password(user.id, password_hash, false)
            .await
            .map_err(AuthError::db)?;
        tracing::info!(user_uid = %user.uid, "password reset");
        Ok(())
    }

    fn refresh_token_ttl(&self) -> std::time::Duration {
        self.tokens.ttl(TokenKind::Refresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::test_config, repo::users::memory::InMemoryUsersRepo,
        service::email::recording::RecordingMailService,
    };

    struct Fixture {
        auth: AuthServiceImpl,
        repo: Arc<InMemoryUsersRepo>,
        mailer: Arc<RecordingMailService>,
    }

    fn fixture() -> Fixture {
        let config = test_config();
        let repo = Arc::new(InMemoryUsersRepo::default());
        let mailer = Arc::new(RecordingMailService::default());
        let auth = AuthServiceImpl::new(
            repo.clone(),
            mailer.clone(),
            TokenService::new(&config),
            PasswordHasher::new(config.bcrypt_cost),
            config.reset_pass_ui_link.clone(),
        );
        Fixture { auth, repo, mailer }
    }

    fn token_from_url(html: &str) -> String {
        let start = html.find("token=").unwrap() + "token=".len();
        let rest = &html[start..];
        let end = rest.find('"').unwrap();
        rest[..end].to_string()
    }

    #[tokio::test]
    async fn register_normalizes_and_rejects_duplicates() {
        let f = fixture();
        let user = f.auth.register("  Ada@X.test ", "Abcdef1!").await.unwrap();
        assert_eq!(user.email, "ada@x.test");
        assert_ne!(user.password_hash, "Abcdef1!");

        let err = f.auth.register("ada@x.test", "Abcdef1!").await.unwrap_err();
        assert_eq!(err.code, "email_taken");
    }

    #[tokio::test]
    async fn register_validates_input() {
        let f = fixture();
        let err = f.auth.register("nope", "Abcdef1!").await.unwrap_err();
        assert_eq!(err.code, "invalid_email");
        let err = f.auth.register("a@x.test", "weak").await.unwrap_err();
        assert_eq!(err.code, "invalid_password");
    }

    #[tokio::test]
    async fn login_issues_tokens_and_hides_which_part_failed() {
        let f = fixture();
        f.auth.register("a@x.test", "Abcdef1!").await.unwrap();

        let output = f.auth.login("A@x.test", "Abcdef1!").await.unwrap();
        assert!(!output.needs_password_change);
        assert!(f.auth.refresh(&output.refresh_token).await.is_ok());

        let wrong_password = f.auth.login("a@x.test", "Abcdef1?").await.unwrap_err();
        let unknown = f.auth.login("b@x.test", "Abcdef1!").await.unwrap_err();
        assert_eq!(wrong_password.code, "invalid_credentials");
        assert_eq!(unknown.code, wrong_password.code);
        assert_eq!(unknown.message, wrong_password.message);
    }

    #[tokio::test]
    async fn blocked_user_cannot_login_or_refresh() {
        let f = fixture();
        f.auth.register("a@x.test", "Abcdef1!").await.unwrap();
        let output = f.auth.login("a@x.test", "Abcdef1!").await.unwrap();

        f.repo.set_status("a@x.test", "blocked").await;
        let err = f.auth.login("a@x.test", "Abcdef1!").await.unwrap_err();
        assert_eq!(err.code, "user_blocked");
        let err = f.auth.refresh(&output.refresh_token).await.unwrap_err();
        assert_eq!(err.code, "user_blocked");
    }

    #[tokio::test]
    async fn refresh_rejects_access_tokens() {
        let f = fixture();
        f.auth.register("a@x.test", "Abcdef1!").await.unwrap();
        let output = f.auth.login("a@x.test", "Abcdef1!").await.unwrap();
        let err = f.auth.refresh(&output.access_token).await.unwrap_err();
        assert_eq!(err.code, "invalid_token");
    }

    #[tokio::test]
    async fn change_password_requires_old_password() {
        let f = fixture();
        f.auth.register("a@x.test", "Abcdef1!").await.unwrap();
        let output = f.auth.login("a@x.test", "Abcdef1!").await.unwrap();

        let err = f
            .auth
            .change_password(&output.access_token, "Wrong1!x", "Newpass1!")
            .await
            .unwrap_err();
        assert_eq!(err.code, "invalid_credentials");

        f.auth
            .change_password(&output.access_token, "Abcdef1!", "Newpass1!")
            .await
            .unwrap();
        assert!(f.auth.login("a@x.test", "Abcdef1!").await.is_err());
        assert!(f.auth.login("a@x.test", "Newpass1!").await.is_ok());
    }

    #[tokio::test]
    async fn forgot_then_reset_password() {
        let f = fixture();
        f.auth.register("a@x.test", "Abcdef1!").await.unwrap();
        f.auth.forgot_password("a@x.test").await.unwrap();

        let sent = f.mailer.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "a@x.test");
        assert!(sent[0]
            .html
            .contains("http://ui.test/reset-password?email=a%40x.test&amp;token="));
        let token = token_from_url(&sent[0].html);

        let err = f
            .auth
            .reset_password(&token, "b@x.test", "Newpass1!")
            .await
            .unwrap_err();
        assert_eq!(err.code, "invalid_token");

        f.auth
            .reset_password(&token, "a@x.test", "Newpass1!")
            .await
            .unwrap();
        assert!(f.auth.login("a@x.test", "Newpass1!").await.is_ok());
    }

    #[tokio::test]
    async fn forgot_password_is_silent_for_unknown_accounts() {
        let f = fixture();
        f.auth.forgot_password("ghost@x.test").await.unwrap();
        assert!(f.mailer.sent().await.is_empty());
    }

    #[tokio::test]
    async fn forgot_password_needs_reset_link() {
        let config = test_config();
        let auth = AuthServiceImpl::new(
            Arc::new(InMemoryUsersRepo::default()),
            Arc::new(RecordingMailService::default()),
            TokenService::new(&config),
            PasswordHasher::new(config.bcrypt_cost),
            None,
        );
        let err = auth.forgot_password("a@x.test").await.unwrap_err();
        assert_eq!(err.code, "reset_unavailable");
    }

    #[tokio::test]
    async fn change_password_revokes_tokens_issued_in_the_same_second() {
        let f = fixture();
        f.auth.register("a@x.test", "Abcdef1!").await.unwrap();
        let old = f.auth.login("a@x.test", "Abcdef1!").await.unwrap();

        f.auth
            .change_password(&old.access_token, "Abcdef1!", "Newpass1!")
            .await
            .unwrap();

        let err = f.auth.refresh(&old.refresh_token).await.unwrap_err();
        assert_eq!(err.code, "invalid_token");
        let err = f
            .auth
            .change_password(&old.access_token, "Newpass1!", "Other1pass!")
            .await
            .unwrap_err();
        assert_eq!(err.code, "invalid_token");

        let fresh = f.auth.login("a@x.test", "Newpass1!").await.unwrap();
        assert!(f.auth.refresh(&fresh.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn reset_token_works_once() {
        let f = fixture();
        f.auth.register("a@x.test", "Abcdef1!").await.unwrap();
        let before = f.auth.login("a@x.test", "Abcdef1!").await.unwrap();
        f.auth.forgot_password("a@x.test").await.unwrap();
        let token = token_from_url(&f.mailer.sent().await[0].html);

        f.auth
            .reset_password(&token, "a@x.test", "Newpass1!")
            .await
            .unwrap();
        let err = f
            .auth
            .reset_password(&token, "a@x.test", "Attack3r!")
            .await
            .unwrap_err();
        assert_eq!(err.code, "invalid_token");
        assert!(f.auth.login("a@x.test", "Newpass1!").await.is_ok());

        let err = f.auth.refresh(&before.refresh_token).await.unwrap_err();
        assert_eq!(err.code, "invalid_token");
    }

    /// Lookups miss, as when two registrations race past the existence check.
    struct RacingRepo(InMemoryUsersRepo);

    #[async_trait]
    impl UsersRepo for RacingRepo {
        async fn insert(&self, user: NewUser) -> Result<users::Model, InsertUserError> {
            self.0.insert(user).await
        }

        async fn find_by_email(&self, _: &str) -> Result<Option<users::Model>, sea_orm::DbErr> {
            Ok(None)
        }

        async fn find_by_uid(&self, uid: Uuid) -> Result<Option<users::Model>, sea_orm::DbErr> {
            self.0.find_by_uid(uid).await
        }

        async fn update_password(
            &self,
            id: i64,
            password_hash: String,
            needs_password_change: bool,
        ) -> Result<users::Model, sea_orm::DbErr> {
            self.0
                .update_password(id, password_hash, needs_password_change)
                .await
        }
    }

    #[tokio::test]
    async fn register_race_on_unique_email_is_email_taken() {
        let config = test_config();
        let auth = AuthServiceImpl::new(
            Arc::new(RacingRepo(InMemoryUsersRepo::default())),
            Arc::new(RecordingMailService::default()),
            TokenService::new(&config),
            PasswordHasher::new(config.bcrypt_cost),
            None,
        );
        auth.register("a@x.test", "Abcdef1!").await.unwrap();
        let err = auth.register("a@x.test", "Abcdef1!").await.unwrap_err();
        assert_eq!(err.code, "email_taken");
    }
}
