//! Pagination cursor decoding

use crate::error::{EnforcerError, Result};

/// Decoded node-event cursor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventCursor {
    pub transaction_hash: String,
    pub transaction_index: u32,
    pub log_index: u32,
}

impl EventCursor {
    /// Split `"{hash}:{tx_index}:{log_index}"`
    pub fn parse(cursor: &str) -> Result<Self> {
        let invalid = || EnforcerError::InvalidCursor { cursor: cursor.into() };

        let parts: Vec<&str> = cursor.split(':').collect();
        if parts.len() != 3 || parts[0].is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            transaction_hash: parts[0].to_string(),
            transaction_index: parts[1].parse().map_err(|_| invalid())?,
            log_index: parts[2].parse().map_err(|_| invalid())?,
        })
    }
}
