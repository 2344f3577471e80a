use chrono::Utc;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use mailgen_core::ids::UserId;

use crate::database::Database;
use crate::error::StoreError;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserRow {
    pub id: UserId,
    pub email: String,
    pub name: Option<String>,
    pub created_at: String,
}

const COLUMNS: &str = "id, email, name, created_at";

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: UserId::from_raw(row.get::<_, String>(0)?),
        email: row.get(1)?,
        name: row.get(2)?,
        created_at: row.get(3)?,
    })
}

pub struct UserRepo {
    db: Database,
}

impl UserRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Return the user registered under `email`, creating it on first sight.
    /// An existing user's name is left untouched.
    #[instrument(skip(self))]
    pub fn get_or_create(&self, email: &str, name: Option<&str>) -> Result<UserRow, StoreError> {
        self.db.with_conn(|conn| {
            let existing = conn
                .query_row(
                    &format!("SELECT {COLUMNS} FROM users WHERE email = ?1"),
                    [email],
                    map_row,
                )
                .optional()?;
            if let Some(user) = existing {
                return Ok(user);
            }

            let id = UserId::new();
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO users (id, email, name, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id.as_str(), email, name, now],
            )?;

            Ok(UserRow {
                id,
                email: email.to_string(),
                name: name.map(str::to_string),
                created_at: now,
            })
        })
    }

    #[instrument(skip(self), fields(user_id = %id))]
    pub fn get(&self, id: &UserId) -> Result<UserRow, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM users WHERE id = ?1"),
                [id.as_str()],
                map_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))
        })
    }

    #[instrument(skip(self))]
    pub fn find_by_email(&self, email: &str) -> Result<Option<UserRow>, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {COLUMNS} FROM users WHERE email = ?1"),
                    [email],
                    map_row,
                )
                .optional()?)
        })
    }
}
