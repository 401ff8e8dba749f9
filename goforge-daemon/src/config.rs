// SPDX-FileCopyrightText: 2026 goforge contributors
// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DaemonError, IoContext};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Root of the on-disk state: results, transparency log, SDKs and the
    /// process-managed home all live under here by default.
    pub data_dir: PathBuf,

    /// Directory of per-build result directories.
    pub result_dir: Option<PathBuf>,

    /// Directory holding the transparency log's records/hashes pair.
    pub log_dir: Option<PathBuf>,

    /// Directory toolchain releases install into.
    pub sdk_dir: Option<PathBuf>,

    /// The process-managed home builds run under.
    pub home_dir: Option<PathBuf>,

    /// Module proxy base URL.
    pub module_proxy: String,

    /// Toolchain distribution site base URL.
    pub toolchain_dist: String,

    /// Path to the `name:base64(key)` signing key for tree heads.
    /// Generated on first start when absent.
    pub sign_key_path: Option<PathBuf>,

    /// Signer identity written into generated keys and signed notes.
    pub sign_name: String,

    /// Base URLs of peer verifier instances. Every successful build is
    /// cross-checked against all of them before it enters the log.
    pub verifier_urls: Vec<String>,

    /// Maximum concurrent builds. Defaults to logical cores plus one.
    pub max_builds: Option<usize>,

    /// Oldest toolchain minor version the service will install.
    pub min_goversion_minor: u32,

    /// Pass `-ldflags=-s` to strip symbol tables from binaries.
    pub strip_binaries: bool,

    /// Days a stored binary survives before the GC sweep may reclaim it.
    /// Zero disables the sweep.
    pub binary_gc_days: u32,

    /// Run a toolchain cache clean after this many successful builds.
    pub clean_cache_every: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/goforge"),
            result_dir: None,
            log_dir: None,
            sdk_dir: None,
            home_dir: None,
            module_proxy: "https://proxy.golang.org".to_string(),
            toolchain_dist: "https://go.dev/dl".to_string(),
            sign_key_path: None,
            sign_name: "goforge.log".to_string(),
            verifier_urls: Vec::new(),
            max_builds: None,
            min_goversion_minor: 13,
            strip_binaries: false,
            binary_gc_days: 0,
            clean_cache_every: 20,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, DaemonError> {
        let contents = std::fs::read_to_string(path)
            .io_context(|| format!("reading config file {}", path.display()))?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), DaemonError> {
        if let Some(0) = self.max_builds {
            return Err(DaemonError::config("max_builds must be greater than 0"));
        }
        if self.clean_cache_every == 0 {
            return Err(DaemonError::config(
                "clean_cache_every must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn result_dir(&self) -> PathBuf {
        self.result_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("result"))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("log"))
    }

    pub fn sdk_dir(&self) -> PathBuf {
        self.sdk_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("sdk"))
    }

    pub fn home_dir(&self) -> PathBuf {
        self.home_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("home"))
    }

    pub fn sign_key_path(&self) -> PathBuf {
        self.sign_key_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("sign.key"))
    }

    pub fn max_builds(&self) -> usize {
        self.max_builds.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                + 1
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.result_dir(), PathBuf::from("/var/lib/goforge/result"));
        assert_eq!(config.log_dir(), PathBuf::from("/var/lib/goforge/log"));
        assert!(config.max_builds() >= 2);
        assert_eq!(config.clean_cache_every, 20);
    }

    #[test]
    fn test_parse() {
        let config: Config = toml::from_str(
            r#"
            data_dir = "/srv/goforge"
            module_proxy = "https://proxy.example.org"
            verifier_urls = ["https://peer1.example.org", "https://peer2.example.org"]
            max_builds = 4
            strip_binaries = true
            "#,
        )
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/goforge"));
        assert_eq!(config.verifier_urls.len(), 2);
        assert_eq!(config.max_builds(), 4);
        assert!(config.strip_binaries);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(toml::from_str::<Config>("no_such_option = 1").is_err());
    }
}
