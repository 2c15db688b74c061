// Key and value encoding for task records
//
// Keys are ids as 8 big-endian bytes so byte order matches numeric order.
// Values are newline-joined strings: `text\ncreated_at\ndone` when created,
// `text\ncreated_at` after an update. Both shapes are on disk in the wild,
// so the parser accepts either.

use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const KEY_LEN: usize = 8;

/// RFC1123 layout, e.g. `Mon, 02 Jan 2006 15:04:05 GMT`
pub const RFC1123: &str = "%a, %d %b %Y %H:%M:%S GMT";

const FIELD_SEP: char = '\n';

pub fn encode_key(id: u64) -> [u8; KEY_LEN] {
    id.to_be_bytes()
}

pub fn decode_key(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; KEY_LEN] = bytes.try_into().map_err(|_| StoreError::CorruptKey(bytes.len()))?;
    Ok(u64::from_be_bytes(raw))
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(RFC1123).to_string()
}

pub fn timestamp_now() -> String {
    format_timestamp(Utc::now())
}

/// Value written by `create_task`: three fields, `done` always `false`.
pub fn encode_created(text: &str, created_at: &str) -> String {
    format!("{text}{FIELD_SEP}{created_at}{FIELD_SEP}false")
}

/// Value written by `update_task`: two fields, no `done` flag.
pub fn encode_updated(text: &str, created_at: &str) -> String {
    format!("{text}{FIELD_SEP}{created_at}")
}

/// Structured view over a raw task value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskFields {
    pub text: String,
    pub created_at: String,
    /// `None` when the value was last written by an update
    pub done: Option<bool>,
}

impl TaskFields {
    /// Parse a raw value, working from the end so that task text may itself
    /// contain newlines.
    pub fn parse(raw: &str) -> Self {
        let parts: Vec<&str> = raw.rsplitn(3, FIELD_SEP).collect();
        if let [flag, created_at, text] = parts.as_slice() {
            let done = match *flag {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            };
            if done.is_some() {
                return Self {
                    text: text.to_string(),
                    created_at: created_at.to_string(),
                    done,
                };
            }
        }

        match raw.rsplit_once(FIELD_SEP) {
            Some((text, created_at)) => Self {
                text: text.to_string(),
                created_at: created_at.to_string(),
                done: None,
            },
            None => Self {
                text: raw.to_string(),
                created_at: String::new(),
                done: None,
            },
        }
    }

    /// `done` with the update shape read as not done
    pub fn is_done(&self) -> bool {
        self.done.unwrap_or(false)
    }
}
