use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub uid: Uuid,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub status: String,
    pub needs_password_change: bool,
    pub password_changed_at: Option<DateTimeWithTimeZone>,
    pub password_version: i32,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
    pub deleted_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

pub const ROLE_USER: &str = "user";
pub const STATUS_ACTIVE: &str = "active";

impl Model {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none() && self.status == STATUS_ACTIVE
    }
}
