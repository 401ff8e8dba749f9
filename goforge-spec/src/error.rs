// SPDX-FileCopyrightText: 2026 goforge contributors
// SPDX-License-Identifier: MIT

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum SpecError {
    #[error("invalid module path {module:?}: {reason}")]
    BadModule { module: String, reason: &'static str },

    #[error("invalid module version {version:?}: {reason}")]
    BadVersion {
        version: String,
        reason: &'static str,
    },

    #[error("invalid package directory {dir:?}: {reason}")]
    BadDir { dir: String, reason: &'static str },

    #[error("unsupported target {goos}/{goarch}")]
    UnknownTarget { goos: String, goarch: String },

    #[error("invalid toolchain version {goversion:?}: {reason}")]
    BadGoversion {
        goversion: String,
        reason: &'static str,
    },

    #[error("invalid sum {sum:?}: {reason}")]
    BadSum { sum: String, reason: &'static str },

    #[error("invalid request path: {reason}")]
    BadPath { reason: &'static str },
}
