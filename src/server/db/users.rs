//! User database operations

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;
use crate::models::{User, UserRole};

pub async fn get_by_email(pool: &PgPool, email: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(
        r#"
        SELECT id, organization_id, email, name, role, password_hash
        FROM users
        WHERE email = $1
        "#
    )
    .bind(email)
    .fetch_optional(pool)
    .await
}

pub async fn create(
    tx: &mut Transaction<'_, Postgres>,
    organization_id: Uuid,
    email: &str,
    name: &str,
    password_hash: &str,
    role: UserRole,
) -> Result<User, sqlx::Error> {
    sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (id, organization_id, email, name, password_hash, role)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, organization_id, email, name, role, password_hash
        "#
    )
    .bind(Uuid::new_v4())
    .bind(organization_id)
    .bind(email)
    .bind(name)
    .bind(password_hash)
    .bind(role)
    .fetch_one(&mut **tx)
    .await
}
