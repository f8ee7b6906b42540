use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::{
    config::Config,
    repo::users::{SeaOrmUsersRepo, UsersRepo},
    service::{
        auth::{AuthService, AuthServiceImpl},
        config::{ConfigService, ConfigServiceImpl},
        email::{self, MailService},
        password::PasswordHasher,
        token::TokenService,
    },
};

pub trait DatabaseClient: Send + Sync {
    fn conn(&self) -> &DatabaseConnection;
}

pub struct SeaOrmDatabaseClient {
    conn: DatabaseConnection,
}

impl SeaOrmDatabaseClient {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let conn = crate::db::connect(database_url).await?;
        crate::schema::apply(&conn).await?;
        Ok(Self { conn })
    }
}

impl DatabaseClient for SeaOrmDatabaseClient {
    fn conn(&self) -> &DatabaseConnection {
        &self.conn
    }
}

pub struct AppState {
    config: Arc<dyn ConfigService>,
    auth: Arc<dyn AuthService>,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Arc<Self>> {
        let db = Arc::new(SeaOrmDatabaseClient::connect(&config.database_url).await?);
        let users_repo = Arc::new(SeaOrmUsersRepo::new(db));
        let mailer = email::mailer_from_config(&config)?;
        Ok(Self::with_parts(config, users_repo, mailer))
    }

    pub fn with_parts(
        config: Config,
        users_repo: Arc<dyn UsersRepo>,
        mailer: Arc<dyn MailService>,
    ) -> Arc<Self> {
        let auth = Arc::new(AuthServiceImpl::new(
            users_repo,
            mailer,
            TokenService::new(&config),
            PasswordHasher::new(config.bcrypt_cost),
            config.reset_pass_ui_link.clone(),
        ));
        let config = Arc::new(ConfigServiceImpl::new(config));

        Arc::new(Self { config, auth })
    }

    pub fn config(&self) -> &dyn ConfigService {
        self.config.as_ref()
    }

    pub fn auth(&self) -> &dyn AuthService {
        self.auth.as_ref()
    }
}
