use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend, Statement};
use sea_orm_migration::prelude::*;

pub async fn apply(
    manager: &SchemaManager<'_>,
    conn: &DatabaseConnection,
) -> Result<(), DbErr> {
    if manager.has_table("users").await? {
        return add_missing_columns(conn).await;
    }

    manager
        .create_table(
            Table::create()
                .table(Users::Table)
                .if_not_exists()
                .col(
                    ColumnDef::new(Users::Id)
                        .big_integer()
                        .not_null()
                        .auto_increment()
                        .primary_key(),
                )
                .col(
                    ColumnDef::new(Users::Uid)
                        .uuid()
                        .not_null()
                        .default(SimpleExpr::Custom("gen_random_uuid()".into())),
                )
                .col(ColumnDef::new(Users::Email).string().not_null())
                .col(ColumnDef::new(Users::PasswordHash).string().not_null())
                .col(
                    ColumnDef::new(Users::Role)
                        .string()
                        .not_null()
                        .default("user"),
                )
                .col(
                    ColumnDef::new(Users::Status)
                        .string()
                        .not_null()
                        .default("active"),
                )
                .col(
                    ColumnDef::new(Users::NeedsPasswordChange)
                        .boolean()
                        .not_null()
                        .default(false),
                )
                .col(ColumnDef::new(Users::PasswordChangedAt).timestamp_with_time_zone())
                .col(
                    ColumnDef::new(Users::PasswordVersion)
                        .integer()
                        .not_null()
                        .default(0),
                )
                .col(
                    ColumnDef::new(Users::CreatedAt)
                        .timestamp_with_time_zone()
                        .not_null()
                        .default(SimpleExpr::Custom("now()".into())),
                )
                .col(
                    ColumnDef::new(Users::UpdatedAt)
                        .timestamp_with_time_zone()
                        .not_null()
                        .default(SimpleExpr::Custom("now()".into())),
                )
                .col(ColumnDef::new(Users::DeletedAt).timestamp_with_time_zone())
                .to_owned(),
        )
        .await?;

    for statement in [
        "ALTER TABLE users ADD CONSTRAINT users_role_check \
         CHECK (role IN ('user','admin'))",
        "ALTER TABLE users ADD CONSTRAINT users_status_check \
         CHECK (status IN ('active','blocked'))",
        "CREATE UNIQUE INDEX IF NOT EXISTS users_uid_unique ON users (uid)",
        "CREATE UNIQUE INDEX IF NOT EXISTS users_email_unique \
         ON users (lower(email)) WHERE deleted_at IS NULL",
    ] {
        conn.execute(Statement::from_string(
            DbBackend::Postgres,
            statement.to_string(),
        ))
        .await?;
    }

    Ok(())
}

async fn add_missing_columns(conn: &DatabaseConnection) -> Result<(), DbErr> {
    conn.execute(Statement::from_string(
        DbBackend::Postgres,
        "ALTER TABLE users ADD COLUMN IF NOT EXISTS password_version integer NOT NULL DEFAULT 0"
            .to_string(),
    ))
    .await?;
    Ok(())
}

#[derive(Iden)]
enum Users {
    Table,
    Id,
    Uid,
    Email,
    PasswordHash,
    Role,
    Status,
    NeedsPasswordChange,
    PasswordChangedAt,
    PasswordVersion,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}
