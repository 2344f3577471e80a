use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use mailgen_core::ids::{DraftId, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DraftStatus {
    Draft,
    Sent,
}

impl DraftStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DraftStatus::Draft => "draft",
            DraftStatus::Sent => "sent",
        }
    }
}

impl fmt::Display for DraftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DraftStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(DraftStatus::Draft),
            "sent" => Ok(DraftStatus::Sent),
            other => Err(format!("unknown draft status: {other}")),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DraftRow {
    pub id: DraftId,
    pub user_id: UserId,
    pub prompt: String,
    pub subject: String,
    pub content: String,
    pub recipients: Vec<String>,
    pub status: DraftStatus,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields for a freshly generated draft.
pub struct NewDraft<'a> {
    pub user_id: &'a UserId,
    pub prompt: &'a str,
    pub subject: &'a str,
    pub content: &'a str,
    pub recipients: &'a [String],
}

const COLUMNS: &str =
    "id, user_id, prompt, subject, content, recipients, status, created_at, updated_at";

struct RawDraft {
    id: String,
    user_id: String,
    prompt: String,
    subject: String,
    content: String,
    recipients: String,
    status: String,
    created_at: String,
    updated_at: String,
}

fn read_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawDraft> {
    Ok(RawDraft {
        id: row.get(0)?,
        user_id: row.get(1)?,
        prompt: row.get(2)?,
        subject: row.get(3)?,
        content: row.get(4)?,
        recipients: row.get(5)?,
        status: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

impl RawDraft {
    fn decode(self) -> Result<DraftRow, StoreError> {
        Ok(DraftRow {
            id: DraftId::from_raw(self.id),
            user_id: UserId::from_raw(self.user_id),
            prompt: self.prompt,
            subject: self.subject,
            content: self.content,
            recipients: row_helpers::parse_json(&self.recipients, "email_drafts", "recipients")?,
            status: row_helpers::parse_enum(&self.status, "email_drafts", "status")?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub struct DraftRepo {
    db: Database,
}

impl DraftRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, draft), fields(user_id = %draft.user_id))]
    pub fn create(&self, draft: NewDraft<'_>) -> Result<DraftRow, StoreError> {
        let id = DraftId::new();
        let now = Utc::now().to_rfc3339();
        let recipients_json = serde_json::to_string(draft.recipients)?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO email_drafts
                 (id, user_id, prompt, subject, content, recipients, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                rusqlite::params![
                    id.as_str(),
                    draft.user_id.as_str(),
                    draft.prompt,
                    draft.subject,
                    draft.content,
                    recipients_json,
                    DraftStatus::Draft.as_str(),
                    now,
                ],
            )?;
            Ok(())
        })?;

        Ok(DraftRow {
            id,
            user_id: draft.user_id.clone(),
            prompt: draft.prompt.to_string(),
            subject: draft.subject.to_string(),
            content: draft.content.to_string(),
            recipients: draft.recipients.to_vec(),
            status: DraftStatus::Draft,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Fetch a draft owned by `owner`. Drafts owned by someone else are
    /// reported as not found.
    #[instrument(skip(self), fields(draft_id = %id, user_id = %owner))]
    pub fn get(&self, id: &DraftId, owner: &UserId) -> Result<DraftRow, StoreError> {
        let raw = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {COLUMNS} FROM email_drafts WHERE id = ?1 AND user_id = ?2"),
                    [id.as_str(), owner.as_str()],
                    read_raw,
                )
                .optional()?)
        })?;
        raw.ok_or_else(|| StoreError::NotFound(format!("draft {id}")))?
            .decode()
    }

    /// Newest first.
    #[instrument(skip(self), fields(user_id = %owner))]
    pub fn list_for_owner(&self, owner: &UserId, limit: u32) -> Result<Vec<DraftRow>, StoreError> {
        let raws = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM email_drafts WHERE user_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![owner.as_str(), limit], read_raw)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        raws.into_iter().map(RawDraft::decode).collect()
    }

    /// Update status of a draft owned by `owner`.
    #[instrument(skip(self), fields(draft_id = %id, user_id = %owner))]
    pub fn update_status(
        &self,
        id: &DraftId,
        owner: &UserId,
        status: DraftStatus,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| set_status(conn, id, owner, status))
    }
}

/// Status write on an existing connection, so callers can fold it into a
/// larger transaction.
pub(crate) fn set_status(
    conn: &rusqlite::Connection,
    id: &DraftId,
    owner: &UserId,
    status: DraftStatus,
) -> Result<(), StoreError> {
    let changed = conn.execute(
        "UPDATE email_drafts SET status = ?1, updated_at = ?2
         WHERE id = ?3 AND user_id = ?4",
        rusqlite::params![status.as_str(), Utc::now().to_rfc3339(), id.as_str(), owner.as_str()],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound(format!("draft {id}")));
    }
    Ok(())
}
