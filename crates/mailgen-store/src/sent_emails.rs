use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use mailgen_core::ids::{DraftId, SentEmailId, UserId};

use crate::database::Database;
use crate::drafts::{self, DraftStatus};
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SentEmailRow {
    pub id: SentEmailId,
    pub user_id: UserId,
    pub subject: String,
    pub content: String,
    pub recipients: Vec<String>,
    pub sent_at: String,
}

/// Record of every fully delivered send. Append-only.
pub struct SentEmailRepo {
    db: Database,
}

impl SentEmailRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, subject, content, recipients), fields(user_id = %owner, recipients = recipients.len()))]
    pub fn create(
        &self,
        owner: &UserId,
        subject: &str,
        content: &str,
        recipients: &[String],
    ) -> Result<SentEmailRow, StoreError> {
        self.db
            .with_conn(|conn| insert(conn, owner, subject, content, recipients))
    }

    /// Records a delivered send and, when it came from a draft, marks that
    /// draft sent. Both writes commit together or not at all.
    #[instrument(skip(self, subject, content, recipients), fields(user_id = %owner, draft_id = ?draft))]
    pub fn record_send(
        &self,
        owner: &UserId,
        subject: &str,
        content: &str,
        recipients: &[String],
        draft: Option<&DraftId>,
    ) -> Result<SentEmailRow, StoreError> {
        self.db.with_tx(|tx| {
            let row = insert(tx, owner, subject, content, recipients)?;
            if let Some(draft_id) = draft {
                drafts::set_status(tx, draft_id, owner, DraftStatus::Sent)?;
            }
            Ok(row)
        })
    }

    /// Newest first.
    #[instrument(skip(self), fields(user_id = %owner))]
    pub fn list_for_owner(&self, owner: &UserId, limit: u32) -> Result<Vec<SentEmailRow>, StoreError> {
        let raws: Vec<(String, String, String, String, String, String)> = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, subject, content, recipients, sent_at FROM sent_emails
                 WHERE user_id = ?1 ORDER BY sent_at DESC, id DESC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![owner.as_str(), limit], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        raws.into_iter()
            .map(|(id, user_id, subject, content, recipients, sent_at)| {
                Ok(SentEmailRow {
                    id: SentEmailId::from_raw(id),
                    user_id: UserId::from_raw(user_id),
                    subject,
                    content,
                    recipients: row_helpers::parse_json(&recipients, "sent_emails", "recipients")?,
                    sent_at,
                })
            })
            .collect()
    }

    pub fn count_for_owner(&self, owner: &UserId) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sent_emails WHERE user_id = ?1",
                [owner.as_str()],
                |row| row.get(0),
            )?;
            Ok(n as u64)
        })
    }
}

fn insert(
    conn: &rusqlite::Connection,
    owner: &UserId,
    subject: &str,
    content: &str,
    recipients: &[String],
) -> Result<SentEmailRow, StoreError> {
    let id = SentEmailId::new();
    let now = Utc::now().to_rfc3339();
    let recipients_json = serde_json::to_string(recipients)?;

    conn.execute(
        "INSERT INTO sent_emails (id, user_id, subject, content, recipients, sent_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![id.as_str(), owner.as_str(), subject, content, recipients_json, now],
    )?;

    Ok(SentEmailRow {
        id,
        user_id: owner.clone(),
        subject: subject.to_string(),
        content: content.to_string(),
        recipients: recipients.to_vec(),
        sent_at: now,
    })
}
