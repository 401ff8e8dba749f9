// SPDX-FileCopyrightText: 2026 goforge contributors
// SPDX-License-Identifier: MIT

use thiserror::Error;

use goforge_fetch::FetchError;
use goforge_spec::SpecError;
use goforge_store::StoreError;
use goforge_tlog::LogError;

/// Classification the edge maps to responses and the coordinator maps to
/// update variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Module, version, package, target or toolchain unknown, or the
    /// package is unbuildable. A 404 at the edge.
    NotExist,
    /// Non-canonical path or unparsable spec. No side effects.
    BadRequest,
    /// May succeed on retry: network, peer disagreement, resource limits.
    Temporary,
    /// The compile failed; persisted in the store until an explicit retry.
    PermanentBuildFailure,
    /// The proxy, a peer or the toolchain distribution site misbehaved.
    Remote,
    /// An internal invariant failed. A 500 at the edge.
    Server,
    /// The transparency log files disagree. Fatal; writes are refused.
    Consistency,
}

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("{0}")]
    Spec(#[from] SpecError),

    #[error("{0}")]
    Fetch(#[from] FetchError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("transparency log: {0}")]
    Log(#[from] LogError),

    #[error("{message}: {source}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{reason}")]
    NotExist { reason: String },

    #[error("{reason}")]
    Temporary { reason: String },

    #[error("build failed: {reason}")]
    PermanentBuild { reason: String },

    #[error("{reason}")]
    Server { reason: String },

    #[error("configuration: {reason}")]
    Config { reason: String },

    #[error("toml: {0}")]
    Toml(#[from] toml::de::Error),
}

impl DaemonError {
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

    pub fn permanent_build(reason: impl Into<String>) -> Self {
        Self::PermanentBuild {
            reason: reason.into(),
        }
    }

    pub fn server(reason: impl Into<String>) -> Self {
        Self::Server {
            reason: reason.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DaemonError::Spec(_) => ErrorKind::BadRequest,
            DaemonError::Fetch(e) => match e {
                FetchError::NotExist { .. } => ErrorKind::NotExist,
                FetchError::Remote { .. } | FetchError::Http(_) => ErrorKind::Remote,
                FetchError::Temporary { .. }
                | FetchError::Io { .. }
                | FetchError::Command { .. } => ErrorKind::Temporary,
                FetchError::BadUrl { .. } => ErrorKind::Server,
            },
            DaemonError::Store(e) => match e {
                StoreError::Log(log) if log.is_consistency() => ErrorKind::Consistency,
                _ => ErrorKind::Server,
            },
            DaemonError::Log(e) if e.is_consistency() => ErrorKind::Consistency,
            DaemonError::Log(_) => ErrorKind::Server,
            DaemonError::Io { .. } => ErrorKind::Server,
            DaemonError::NotExist { .. } => ErrorKind::NotExist,
            DaemonError::Temporary { .. } => ErrorKind::Temporary,
            DaemonError::PermanentBuild { .. } => ErrorKind::PermanentBuildFailure,
            DaemonError::Server { .. } => ErrorKind::Server,
            DaemonError::Config { .. } | DaemonError::Toml(_) => ErrorKind::Server,
        }
    }
}

/// Helper trait for adding context to IO errors
pub trait IoContext<T> {
    fn io_context<F>(self, f: F) -> Result<T, DaemonError>
    where
        F: FnOnce() -> String;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F>(self, f: F) -> Result<T, DaemonError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| DaemonError::io(f(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(
            DaemonError::not_exist("no such module").kind(),
            ErrorKind::NotExist
        );
        assert_eq!(
            DaemonError::temporary("peer disagreed").kind(),
            ErrorKind::Temporary
        );
        assert_eq!(
            DaemonError::permanent_build("exit status 1").kind(),
            ErrorKind::PermanentBuildFailure
        );
        assert_eq!(
            DaemonError::Fetch(FetchError::not_exist("gone")).kind(),
            ErrorKind::NotExist
        );
        assert_eq!(
            DaemonError::Log(LogError::consistency("size mismatch")).kind(),
            ErrorKind::Consistency
        );
    }
}
