//! Request bodies and their shape checks.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

pub const MAX_PROMPT_CHARS: usize = 1000;
pub const MAX_SUBJECT_CHARS: usize = 200;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$")
        .unwrap()
});

pub fn is_valid_email(addr: &str) -> bool {
    EMAIL_PATTERN.is_match(addr)
}

#[derive(Debug, Deserialize)]
pub struct GenerateEmailRequest {
    pub prompt: String,
    pub recipients: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEmailRequest {
    pub subject: String,
    pub content: String,
    pub recipients: Vec<String>,
    #[serde(default)]
    pub draft_id: Option<String>,
}

fn check_recipients(recipients: &[String]) -> Result<(), String> {
    if recipients.is_empty() {
        return Err("At least one recipient is required".into());
    }
    if let Some(bad) = recipients.iter().find(|r| !is_valid_email(r)) {
        return Err(format!("Invalid email address: {bad}"));
    }
    Ok(())
}

impl GenerateEmailRequest {
    pub fn validate(&self) -> Result<(), String> {
        let len = self.prompt.chars().count();
        if len == 0 {
            return Err("Prompt is required".into());
        }
        if len > MAX_PROMPT_CHARS {
            return Err("Prompt too long".into());
        }
        check_recipients(&self.recipients)
    }
}

impl SendEmailRequest {
    pub fn validate(&self) -> Result<(), String> {
        let len = self.subject.chars().count();
        if len == 0 {
            return Err("Subject is required".into());
        }
        if len > MAX_SUBJECT_CHARS {
            return Err("Subject too long".into());
        }
        if self.content.is_empty() {
            return Err("Content is required".into());
        }
        check_recipients(&self.recipients)
    }
}

/// Parse and validate a JSON body. Every failure is a plain message.
pub fn parse_body<T, F>(raw: &[u8], validate: F) -> Result<T, String>
where
    T: serde::de::DeserializeOwned,
    F: FnOnce(&T) -> Result<(), String>,
{
    let parsed: T = serde_json::from_slice(raw).map_err(|e| e.to_string())?;
    validate(&parsed)?;
    Ok(parsed)
}
