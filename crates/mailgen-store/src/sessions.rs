use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rusqlite::OptionalExtension;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::database::Database;
use crate::error::StoreError;

/// Default lifetime of an issued bearer token, in days.
pub const DEFAULT_SESSION_TTL_DAYS: i64 = 30;

/// Bearer-token sessions. Only the SHA-256 of a token is stored; the raw
/// token is returned once from [`SessionRepo::issue`].
pub struct SessionRepo {
    db: Database,
}

fn hash_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

impl SessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Issue a new token for `email`, valid for `ttl`.
    #[instrument(skip(self))]
    pub fn issue(&self, email: &str, ttl: Duration) -> Result<String, StoreError> {
        let token = generate_token();
        let now = Utc::now();
        let expires = now + ttl;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO auth_sessions (token_hash, email, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    hash_token(&token),
                    email,
                    now.to_rfc3339(),
                    expires.to_rfc3339()
                ],
            )?;
            Ok(())
        })?;
        Ok(token)
    }

    /// Resolve a raw token to its session email. Unknown and expired tokens
    /// both resolve to `None`.
    #[instrument(skip_all)]
    pub fn resolve(&self, token: &str) -> Result<Option<String>, StoreError> {
        let found: Option<(String, String)> = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT email, expires_at FROM auth_sessions WHERE token_hash = ?1",
                    [hash_token(token)],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?)
        })?;

        let Some((email, expires_at)) = found else {
            return Ok(None);
        };

        let expires = DateTime::parse_from_rfc3339(&expires_at).map_err(|e| StoreError::CorruptRow {
            table: "auth_sessions",
            column: "expires_at",
            detail: e.to_string(),
        })?;
        if expires.with_timezone(&Utc) <= Utc::now() {
            debug!("session expired");
            return Ok(None);
        }
        Ok(Some(email))
    }

    /// Returns whether a session was removed.
    #[instrument(skip_all)]
    pub fn revoke(&self, token: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM auth_sessions WHERE token_hash = ?1",
                [hash_token(token)],
            )?;
            Ok(n > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> SessionRepo {
        SessionRepo::new(Database::in_memory().unwrap())
    }

    #[test]
    fn issue_and_resolve() {
        let repo = repo();
        let token = repo.issue("ana@example.com", Duration::days(DEFAULT_SESSION_TTL_DAYS)).unwrap();
        assert!(token.len() >= 40);
        assert_eq!(repo.resolve(&token).unwrap().as_deref(), Some("ana@example.com"));
    }

    #[test]
    fn unknown_token_resolves_none() {
        assert!(repo().resolve("nope").unwrap().is_none());
    }

    #[test]
    fn expired_token_resolves_none() {
        let repo = repo();
        let token = repo.issue("ana@example.com", Duration::seconds(-1)).unwrap();
        assert!(repo.resolve(&token).unwrap().is_none());
    }

    #[test]
    fn raw_token_not_stored() {
        let repo = repo();
        let token = repo.issue("ana@example.com", Duration::days(DEFAULT_SESSION_TTL_DAYS)).unwrap();
        let stored: String = repo
            .db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT token_hash FROM auth_sessions", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_ne!(stored, token);
        assert_eq!(stored, hash_token(&token));
        assert_eq!(stored.len(), 64);
    }

    #[test]
    fn revoke_removes_session() {
        let repo = repo();
        let token = repo.issue("ana@example.com", Duration::days(DEFAULT_SESSION_TTL_DAYS)).unwrap();
        assert!(repo.revoke(&token).unwrap());
        assert!(!repo.revoke(&token).unwrap());
        assert!(repo.resolve(&token).unwrap().is_none());
    }

    #[test]
    fn token_hash_is_lowercase_sha256_hex() {
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn tokens_are_unique() {
        let repo = repo();
        let a = repo.issue("ana@example.com", Duration::days(DEFAULT_SESSION_TTL_DAYS)).unwrap();
        let b = repo.issue("ana@example.com", Duration::days(DEFAULT_SESSION_TTL_DAYS)).unwrap();
        assert_ne!(a, b);
    }
}
