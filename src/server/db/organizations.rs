//! Organization database operations

use sqlx::{Postgres, Transaction};
use uuid::Uuid;

pub async fn create(tx: &mut Transaction<'_, Postgres>, name: &str) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO organizations (id, name) VALUES ($1, $2)")
        .bind(id)
        .bind(name)
        .execute(&mut **tx)
        .await?;
    Ok(id)
}
