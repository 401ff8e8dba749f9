// SPDX-FileCopyrightText: 2026 goforge contributors
// SPDX-License-Identifier: MIT

//! Adapters around the module proxy and the toolchain.
//!
//! Everything the build pipeline needs from the outside world goes through
//! this crate: resolving and fetching module source from the proxy,
//! interrogating packages via toolchain subprocesses, and installing
//! toolchain releases. Auxiliary subprocesses and downloads share a small
//! concurrency budget ([`AuxCommands`]) so they can never starve actual
//! builds, which are scheduled separately by the coordinator.

mod cmd;
mod error;
mod proxy;
mod sdk;
mod toolchain;

pub use cmd::AuxCommands;
pub use error::FetchError;
pub use proxy::{LatestInfo, ModuleProxy, escape_module_path};
pub use sdk::{SdkList, SdkManager, host_goarch, host_goos};
pub use toolchain::Toolchain;
