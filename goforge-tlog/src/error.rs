// SPDX-FileCopyrightText: 2026 goforge contributors
// SPDX-License-Identifier: MIT

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LogError {
    #[error("{message}: {source}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// The records/hashes pair disagrees, or a partial append occurred.
    /// Fatal: the log refuses further writes.
    #[error("log consistency violation: {reason}")]
    Consistency { reason: String },

    #[error("record range [{id}, {id}+{n}) outside log of size {size}")]
    OutOfRange { id: u64, n: u64, size: u64 },

    #[error("malformed record: {reason}")]
    BadRecord { reason: String },

    #[error("record too large: {len} bytes exceeds payload limit")]
    RecordTooLarge { len: usize },

    #[error("store directory {dir} already exists")]
    StoreDirExists { dir: String },

    #[error("tile request outside log: {reason}")]
    BadTile { reason: String },

    #[error("inclusion proof rejected: {reason}")]
    BadProof { reason: String },

    #[error("signing key: {reason}")]
    BadKey { reason: String },

    #[error("note verification failed: {reason}")]
    BadNote { reason: String },

    #[error("build spec: {0}")]
    Spec(#[from] goforge_spec::SpecError),
}

impl LogError {
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    pub fn consistency(reason: impl Into<String>) -> Self {
        Self::Consistency {
            reason: reason.into(),
        }
    }

    /// Whether this error is the fatal kind that poisons the log.
    pub fn is_consistency(&self) -> bool {
        matches!(self, LogError::Consistency { .. })
    }
}

/// Helper trait for adding context to IO errors
pub trait IoContext<T> {
    fn io_context<F>(self, f: F) -> Result<T, LogError>
    where
        F: FnOnce() -> String;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F>(self, f: F) -> Result<T, LogError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| LogError::io(f(), e))
    }
}
