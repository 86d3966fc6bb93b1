//! User directory backed by the `users` table

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::repository::{Result, UserContact, UserDirectory};

#[derive(Debug, Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_user(&self, id: Uuid) -> Result<Option<UserContact>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, name, email, delivery_email FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
    delivery_email: Option<String>,
}

impl From<UserRow> for UserContact {
    fn from(row: UserRow) -> Self {
        UserContact {
            id: row.id,
            name: row.name,
            email: row.email,
            delivery_email: row.delivery_email,
        }
    }
}
