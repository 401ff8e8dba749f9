// SPDX-FileCopyrightText: 2026 goforge contributors
// SPDX-License-Identifier: MIT

//! The verifier-protocol server: the transparency log's capability set
//! wired to the store, the adapters and the coordinator.
//!
//! `signed`, `read_records` and `read_tile_data` pass straight through to
//! the log. `lookup` is the end-to-end path: it resolves symbolic
//! toolchain and module versions, consults the store, and falls back to
//! scheduling a build, returning the record number the commit assigned.

use std::sync::Arc;

use log::{error, info};

use goforge_fetch::{ModuleProxy, SdkManager};
use goforge_spec::{BuildSpec, SpecError};
use goforge_store::{LookupOutcome, Store};
use goforge_tlog::{Log, LogServer, Tile};

use crate::coordinator::{BuildFn, Coordinator, StoredFn, Update};
use crate::error::DaemonError;
use crate::executor::BuildExecutor;

/// Wire the result store into the coordinator: a prior terminal outcome
/// answers a registration without building. Restores (expected sum set)
/// always build.
pub fn stored_fn(store: Arc<Store>, tlog: Arc<Log>) -> Arc<StoredFn> {
    Arc::new(move |spec, expected_sum| {
        if expected_sum.is_some() {
            return None;
        }
        match store.lookup(&tlog, spec) {
            Ok(LookupOutcome::Success {
                record_number,
                result,
                ..
            }) => Some(Update::Success {
                record_number,
                result,
            }),
            Ok(LookupOutcome::Failed) => {
                let error = match store.read_log(spec) {
                    Ok(output) => String::from_utf8_lossy(&output)
                        .lines()
                        .next()
                        .unwrap_or("build failed")
                        .to_string(),
                    Err(_) => "build failed".to_string(),
                };
                Some(Update::PermFailed { error })
            }
            Ok(LookupOutcome::Absent) => None,
            Err(e) => {
                error!("store lookup for {spec}: {e}");
                None
            }
        }
    })
}

pub fn build_fn(executor: Arc<BuildExecutor>) -> Arc<BuildFn> {
    Arc::new(move |spec, expected_sum| {
        let executor = executor.clone();
        Box::pin(async move { executor.build(spec, expected_sum).await })
    })
}

pub struct DaemonServer {
    pub log: Arc<Log>,
    pub store: Arc<Store>,
    pub sdk: Arc<SdkManager>,
    pub proxy: Arc<ModuleProxy>,
    pub executor: Arc<BuildExecutor>,
    pub coordinator: Coordinator,
}

impl LogServer for DaemonServer {
    type Error = DaemonError;

    async fn signed(&self) -> Result<String, DaemonError> {
        Ok(self.log.signed()?)
    }

    async fn read_records(&self, id: u64, n: u64) -> Result<Vec<Vec<u8>>, DaemonError> {
        Ok(self.log.read_records(id, n)?)
    }

    async fn read_tile_data(&self, tile: Tile) -> Result<Vec<u8>, DaemonError> {
        Ok(self.log.read_tile_data(tile)?)
    }

    async fn lookup(&self, key: &str) -> Result<u64, DaemonError> {
        let spec = self.resolve_key(key).await?;

        match self.store.lookup(&self.log, &spec)? {
            LookupOutcome::Success { record_number, .. } => return Ok(record_number),
            LookupOutcome::Failed => {
                return Err(DaemonError::not_exist(format!(
                    "{spec} failed to build; retry explicitly to rebuild"
                )));
            }
            LookupOutcome::Absent => {}
        }

        self.executor.prepare(&spec).await?;
        info!("lookup of {spec} triggers a build");
        let mut subscription = self.coordinator.register(spec.clone(), None);
        match subscription.wait().await {
            Some(Update::Success { record_number, .. }) => Ok(record_number),
            Some(Update::PermFailed { error }) => Err(DaemonError::not_exist(error)),
            Some(Update::TempFailed { error }) => Err(DaemonError::temporary(error)),
            Some(Update::QueuePosition { .. }) => unreachable!("wait discards queue positions"),
            None => Err(DaemonError::server("coordinator stopped")),
        }
    }
}

impl DaemonServer {
    /// Parse a lookup key, resolving the symbolic tokens a canonical spec
    /// may not carry: `latest` toolchain versions and non-canonical module
    /// versions. Malformed keys are not-exist, per the verifier protocol.
    async fn resolve_key(&self, key: &str) -> Result<BuildSpec, DaemonError> {
        let (module, version, dir, goos, goarch, goversion) =
            split_key(key).map_err(|e| DaemonError::not_exist(e.to_string()))?;

        let goversion = if goversion == "latest" {
            self.sdk.resolve_latest().await?
        } else {
            goversion.to_string()
        };
        let version = if version == "latest" {
            self.proxy.resolve_module_latest(module).await?.version
        } else {
            version.to_string()
        };

        match BuildSpec::new(module, &version, &dir, goos, goarch, &goversion) {
            Ok(spec) => Ok(spec),
            Err(SpecError::BadVersion { .. }) => {
                // A tag, branch or version query: expand through the
                // toolchain against the proxy, then re-validate.
                let gobin = self.executor.ensure_sdk(&goversion).await?;
                let resolved = self
                    .executor
                    .toolchain_at(gobin)
                    .resolve_module_version(module, &version)
                    .await?;
                BuildSpec::new(module, &resolved, &dir, goos, goarch, &goversion)
                    .map_err(|e| DaemonError::not_exist(e.to_string()))
            }
            Err(e) => Err(DaemonError::not_exist(e.to_string())),
        }
    }
}

/// Split a lookup key into its six raw fields without validating the
/// symbolic ones.
fn split_key(key: &str) -> Result<(&str, &str, String, &str, &str, &str), SpecError> {
    let bad = |reason| SpecError::BadPath { reason };

    let (module, rest) = key.split_once('@').ok_or(bad("missing @version"))?;
    let mut segments: Vec<&str> = rest.split('/').collect();
    match segments.pop() {
        Some("") => {}
        _ => return Err(bad("missing trailing slash")),
    }
    if segments.len() < 2 {
        return Err(bad("missing target segment"));
    }
    let version = segments.remove(0);
    let target = segments.pop().expect("len checked above");
    let mut parts = target.splitn(3, '-');
    let (Some(goos), Some(goarch), Some(goversion)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(bad("malformed goos-goarch-goversion segment"));
    };

    let dir = if segments.is_empty() {
        "/".to_string()
    } else {
        if segments.iter().any(|seg| seg.is_empty()) {
            return Err(bad("empty directory segment"));
        }
        format!("/{}", segments.join("/"))
    };
    Ok((module, version, dir, goos, goarch, goversion))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_key() {
        let (module, version, dir, goos, goarch, goversion) =
            split_key("example.com/cmd/hello@v1.0.0/linux-amd64-go1.22.1/").unwrap();
        assert_eq!(module, "example.com/cmd/hello");
        assert_eq!(version, "v1.0.0");
        assert_eq!(dir, "/");
        assert_eq!((goos, goarch), ("linux", "amd64"));
        assert_eq!(goversion, "go1.22.1");

        // Symbolic tokens split fine; resolution happens later.
        let (_, version, dir, _, _, goversion) =
            split_key("example.com/m@main/cmd/x/linux-amd64-latest/").unwrap();
        assert_eq!(version, "main");
        assert_eq!(dir, "/cmd/x");
        assert_eq!(goversion, "latest");

        assert!(split_key("example.com/m@v1.0.0/linux-amd64-go1.22.1").is_err());
        assert!(split_key("no-version/").is_err());
    }
}
