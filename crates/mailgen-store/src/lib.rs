pub mod database;
pub mod drafts;
pub mod error;
pub mod row_helpers;
pub mod schema;
pub mod sent_emails;
pub mod sessions;
pub mod users;

pub use database::Database;
pub use drafts::{DraftRepo, DraftRow, DraftStatus, NewDraft};
pub use error::StoreError;
pub use sent_emails::{SentEmailRepo, SentEmailRow};
pub use sessions::{SessionRepo, DEFAULT_SESSION_TTL_DAYS};
pub use users::{UserRepo, UserRow};
