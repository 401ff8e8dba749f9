// SPDX-FileCopyrightText: 2026 goforge contributors
// SPDX-License-Identifier: MIT

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    /// The requested module, version, package or toolchain does not exist,
    /// or the package cannot be built (not a main package, needs cgo).
    #[error("{reason}")]
    NotExist { reason: String },

    /// The proxy, toolchain distribution site or a subprocess misbehaved
    /// in a way that may succeed on retry.
    #[error("{reason}")]
    Temporary { reason: String },

    /// Classification for errors originating at the remote services.
    #[error("remote: {reason}")]
    Remote { reason: String },

    #[error("{message}: {source}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command {cmd} failed ({status}): {stderr}")]
    Command {
        cmd: String,
        status: String,
        stderr: String,
    },

    #[error("invalid url {url}: {reason}")]
    BadUrl { url: String, reason: String },

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
}

impl FetchError {
    pub fn not_exist(reason: impl Into<String>) -> Self {
        Self::NotExist {
            reason: reason.into(),
        }
    }

    pub fn temporary(reason: impl Into<String>) -> Self {
        Self::Temporary {
            reason: reason.into(),
        }
    }

    pub fn remote(reason: impl Into<String>) -> Self {
        Self::Remote {
            reason: reason.into(),
        }
    }

    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Absence-class errors surface as not-found to callers; everything
    /// else is worth retrying or alarming on.
    pub fn is_not_exist(&self) -> bool {
        matches!(self, FetchError::NotExist { .. })
    }
}

/// Helper trait for adding context to IO errors
pub(crate) trait IoContext<T> {
    fn io_context<F>(self, f: F) -> Result<T, FetchError>
    where
        F: FnOnce() -> String;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F>(self, f: F) -> Result<T, FetchError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| FetchError::io(f(), e))
    }
}
