// SPDX-FileCopyrightText: 2026 goforge contributors
// SPDX-License-Identifier: MIT

//! Toolchain release management.
//!
//! Releases install under `<sdk_dir>/<goversion>/go/`, downloaded from the
//! distribution site as `{goversion}.{host_goos}-{host_goarch}.tar.gz` and
//! unpacked once. Install failures for versions the site does not serve
//! are memoized as permanent; the supported-release list is refreshed at
//! most hourly.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use flate2::read::GzDecoder;
use log::info;
use serde::Deserialize;
use tokio::sync::Mutex;

use goforge_spec::GoVersion;

use crate::cmd::AuxCommands;
use crate::error::IoContext;
use crate::FetchError;

/// How long a fetched release list stays fresh.
const LIST_TTL: Duration = Duration::from_secs(3600);

/// The host as the toolchain names it.
pub fn host_goos() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        os => os,
    }
}

pub fn host_goarch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "x86" => "386",
        "aarch64" => "arm64",
        "arm" => "arm",
        "riscv64" => "riscv64",
        "s390x" => "s390x",
        "powerpc64" => "ppc64le",
        arch => arch,
    }
}

/// The distribution site's view of available releases.
#[derive(Debug, Clone, Default)]
pub struct SdkList {
    /// Newest stable release meeting the version floor; what `latest`
    /// resolves to.
    pub newest_allowed: Option<String>,
    /// All stable releases.
    pub supported: Vec<String>,
    /// Pre-releases and anything else the site lists.
    pub remaining: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DistRelease {
    version: String,
    #[serde(default)]
    stable: bool,
}

#[derive(Default)]
struct SdkState {
    permanent_failures: HashSet<String>,
    list: Option<(Instant, SdkList)>,
}

pub struct SdkManager {
    sdk_dir: PathBuf,
    dist_url: String,
    min_minor: u32,
    client: reqwest::Client,
    state: Mutex<SdkState>,
}

impl SdkManager {
    pub fn new(sdk_dir: impl Into<PathBuf>, dist_url: impl Into<String>, min_minor: u32) -> SdkManager {
        let mut dist_url = dist_url.into();
        while dist_url.ends_with('/') {
            dist_url.pop();
        }
        SdkManager {
            sdk_dir: sdk_dir.into(),
            dist_url,
            min_minor,
            client: reqwest::Client::new(),
            state: Mutex::new(SdkState::default()),
        }
    }

    /// Path of the `go` binary for an installed release.
    pub fn gobin(&self, goversion: &str) -> PathBuf {
        self.sdk_dir.join(goversion).join("go").join("bin").join("go")
    }

    /// Ensure the release is installed, returning its `go` binary path and
    /// whether this call had to download and unpack the archive (false
    /// when the release was already on disk).
    pub async fn ensure(
        &self,
        aux: &AuxCommands,
        goversion: &str,
    ) -> Result<(PathBuf, bool), FetchError> {
        let parsed = GoVersion::parse(goversion)
            .map_err(|e| FetchError::not_exist(e.to_string()))?;
        if parsed.minor < self.min_minor {
            return Err(FetchError::not_exist(format!(
                "{goversion} is older than the configured minimum go1.{}",
                self.min_minor
            )));
        }

        let gobin = self.gobin(goversion);
        if gobin.exists() {
            return Ok((gobin, false));
        }

        {
            let state = self.state.lock().await;
            if state.permanent_failures.contains(goversion) {
                return Err(FetchError::not_exist(format!(
                    "{goversion} is not served by {}",
                    self.dist_url
                )));
            }
        }

        let _permit = aux.throttle().await;
        // Re-check: another task may have finished the install while we
        // waited for the permit.
        if gobin.exists() {
            return Ok((gobin, false));
        }
        self.install(goversion).await?;
        if !gobin.exists() {
            return Err(FetchError::temporary(format!(
                "{goversion} archive did not contain go/bin/go"
            )));
        }
        Ok((gobin, true))
    }

    async fn install(&self, goversion: &str) -> Result<(), FetchError> {
        let url = format!(
            "{}/{goversion}.{}-{}.tar.gz",
            self.dist_url,
            host_goos(),
            host_goarch()
        );
        info!("installing toolchain {goversion} from {url}");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::remote(format!("downloading {url}: {e}")))?;
        match response.status() {
            s if s.is_success() => {}
            reqwest::StatusCode::NOT_FOUND | reqwest::StatusCode::GONE => {
                self.state
                    .lock()
                    .await
                    .permanent_failures
                    .insert(goversion.to_string());
                return Err(FetchError::not_exist(format!("{url} does not exist")));
            }
            s => return Err(FetchError::remote(format!("{url} returned status {s}"))),
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::remote(format!("downloading {url}: {e}")))?;

        // Unpack into a staging directory, rename when complete, so a
        // half-unpacked SDK never looks installed.
        let target = self.sdk_dir.join(goversion);
        let stage = self.sdk_dir.join(format!("{goversion}.tmp"));
        if stage.exists() {
            std::fs::remove_dir_all(&stage)
                .io_context(|| format!("removing stale {}", stage.display()))?;
        }
        std::fs::create_dir_all(&stage)
            .io_context(|| format!("creating {}", stage.display()))?;
        let mut archive = tar::Archive::new(GzDecoder::new(&body[..]));
        archive
            .unpack(&stage)
            .io_context(|| format!("unpacking {url}"))?;
        std::fs::rename(&stage, &target).io_context(|| {
            format!("renaming {} to {}", stage.display(), target.display())
        })?;
        Ok(())
    }

    /// The distribution site's release list, refreshed at most hourly.
    pub async fn list(&self) -> Result<SdkList, FetchError> {
        let mut state = self.state.lock().await;
        if let Some((fetched_at, list)) = &state.list {
            if fetched_at.elapsed() < LIST_TTL {
                return Ok(list.clone());
            }
        }

        let url = format!("{}/?mode=json&include=all", self.dist_url);
        let releases: Vec<DistRelease> = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::remote(format!("querying {url}: {e}")))?
            .json()
            .await
            .map_err(|e| FetchError::remote(format!("decoding {url}: {e}")))?;

        let list = partition_releases(&releases, self.min_minor);
        state.list = Some((Instant::now(), list.clone()));
        Ok(list)
    }

    /// Resolve the symbolic `latest` toolchain token.
    pub async fn resolve_latest(&self) -> Result<String, FetchError> {
        self.list()
            .await?
            .newest_allowed
            .ok_or_else(|| FetchError::not_exist("no allowed toolchain release"))
    }

    pub fn sdk_dir(&self) -> &Path {
        &self.sdk_dir
    }
}

/// Split the site's newest-first release list into the stable set (with
/// the newest allowed one) and the rest.
fn partition_releases(releases: &[DistRelease], min_minor: u32) -> SdkList {
    let mut list = SdkList::default();
    for release in releases {
        if !release.stable {
            list.remaining.push(release.version.clone());
            continue;
        }
        if list.newest_allowed.is_none() {
            if let Ok(v) = GoVersion::parse(&release.version) {
                if v.minor >= min_minor {
                    list.newest_allowed = Some(release.version.clone());
                }
            }
        }
        list.supported.push(release.version.clone());
    }
    list
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_mapping() {
        // Whatever the host, the mapped names must be in the known table
        // when the host is a supported build platform.
        assert!(!host_goos().is_empty());
        assert!(!host_goarch().is_empty());
    }

    #[test]
    fn test_partition_releases() {
        let releases = vec![
            DistRelease { version: "go1.24rc1".into(), stable: false },
            DistRelease { version: "go1.23.4".into(), stable: true },
            DistRelease { version: "go1.22.10".into(), stable: true },
            DistRelease { version: "go1.12".into(), stable: true },
        ];
        let list = partition_releases(&releases, 13);
        assert_eq!(list.newest_allowed.as_deref(), Some("go1.23.4"));
        assert_eq!(list.supported.len(), 3);
        assert_eq!(list.remaining, vec!["go1.24rc1".to_string()]);
    }

    #[test]
    fn test_gobin_layout() {
        let sdk = SdkManager::new("/var/lib/goforge/sdk", "https://dist.invalid", 13);
        assert_eq!(
            sdk.gobin("go1.22.1"),
            PathBuf::from("/var/lib/goforge/sdk/go1.22.1/go/bin/go")
        );
    }

    #[test]
    fn test_dist_release_decodes() {
        let releases: Vec<DistRelease> = serde_json::from_str(
            r#"[{"version":"go1.23.4","stable":true,"files":[]},{"version":"go1.24rc1","stable":false}]"#,
        )
        .unwrap();
        assert_eq!(releases.len(), 2);
        assert!(releases[0].stable);
    }
}
