use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, DbErr, EntityTrait, QueryFilter, Set, SqlErr};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::{entities::users, state::DatabaseClient};

pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub role: String,
}

#[derive(Debug, Error)]
pub enum InsertUserError {
    #[error("email already registered")]
    EmailTaken,
    #[error(transparent)]
    Db(DbErr),
}

impl InsertUserError {
    fn from_db(err: DbErr) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => Self::EmailTaken,
            _ => Self::Db(err),
        }
    }
}

#[async_trait]
pub trait UsersRepo: Send + Sync {
    /// Fails with `EmailTaken` when a live row already holds the email.
    async fn insert(&self, user: NewUser) -> Result<users::Model, InsertUserError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<users::Model>, sea_orm::DbErr>;
    async fn find_by_uid(&self, uid: Uuid) -> Result<Option<users::Model>, sea_orm::DbErr>;
    /// Stores a new hash, stamps `password_changed_at` and bumps
    /// `password_version`.
    async fn update_password(
        &self,
        id: i64,
        password_hash: String,
        needs_password_change: bool,
    ) -> Result<users::Model, sea_orm::DbErr>;
}

pub struct SeaOrmUsersRepo {
    db: Arc<dyn DatabaseClient>,
}

impl SeaOrmUsersRepo {
    pub fn new(db: Arc<dyn DatabaseClient>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UsersRepo for SeaOrmUsersRepo {
    async fn insert(&self, user: NewUser) -> Result<users::Model, InsertUserError> {
        let model = users::ActiveModel {
            uid: Set(Uuid::new_v4()),
            email: Set(user.email),
            password_hash: Set(user.password_hash),
            role: Set(user.role),
            status: Set(users::STATUS_ACTIVE.to_string()),
            needs_password_change: Set(false),
            password_changed_at: Set(None),
            password_version: Set(0),
            created_at: Set(Utc::now().into()),
            updated_at: Set(Utc::now().into()),
            deleted_at: Set(None),
            ..Default::default()
        };
        model
            .insert(self.db.conn())
            .await
            .map_err(InsertUserError::from_db)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<users::Model>, sea_orm::DbErr> {
        users::Entity::find()
            .filter(users::Column::Email.eq(email))
            .filter(users::Column::DeletedAt.is_null())
            .one(self.db.conn())
            .await
    }

    async fn find_by_uid(&self, uid: Uuid) -> Result<Option<users::Model>, sea_orm::DbErr> {
        users::Entity::find()
            .filter(users::Column::Uid.eq(uid))
            .filter(users::Column::DeletedAt.is_null())
            .one(self.db.conn())
            .await
    }

    async fn update_password(
        &self,
        id: i64,
        password_hash: String,
        needs_password_change: bool,
    ) -> Result<users::Model, sea_orm::DbErr> {
        let Some(model) = users::Entity::find_by_id(id).one(self.db.conn()).await? else {
            return Err(sea_orm::DbErr::RecordNotFound("user not found".to_string()));
        };

        let version = model.password_version.wrapping_add(1);
        let mut active: users::ActiveModel = model.into();
        active.password_version = Set(version);
        active.password_hash = Set(password_hash);
        active.needs_password_change = Set(needs_password_change);
        active.password_changed_at = Set(Some(Utc::now().into()));
        active.update(self.db.conn()).await
    }
}
