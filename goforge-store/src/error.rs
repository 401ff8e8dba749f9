// SPDX-FileCopyrightText: 2026 goforge contributors
// SPDX-License-Identifier: MIT

use thiserror::Error;

use goforge_tlog::LogError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{message}: {source}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transparency log: {0}")]
    Log(#[from] LogError),

    #[error("unparsable record number in {dir}: {contents:?}")]
    BadRecordNumber { dir: String, contents: String },

    #[error("record {record_number} holds {got}, store directory belongs to {want}")]
    SpecMismatch {
        record_number: u64,
        want: String,
        got: String,
    },

    #[error("{spec} did not fail; refusing to purge")]
    NotFailed { spec: String },
}

impl StoreError {
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }
}

/// Helper trait for adding context to IO errors
pub(crate) trait IoContext<T> {
    fn io_context<F>(self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce() -> String;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F>(self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| StoreError::io(f(), e))
    }
}
