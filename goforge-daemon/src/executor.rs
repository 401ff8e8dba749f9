// SPDX-FileCopyrightText: 2026 goforge contributors
// SPDX-License-Identifier: MIT

//! Build executor.
//!
//! One build runs through: toolchain and module preparation, a primed
//! per-target build cache, the compile under the canonical environment,
//! hashing the artifact into its sum, peer verification (or the expected-sum
//! check for restores), then the commit: gzipped binary and log staged into
//! the store and the record appended to the transparency log.
//!
//! The binary's bytes must depend only on the toolchain version, target,
//! module source and the declared flags; everything else is stripped from
//! the environment and the network is denied during the compile itself.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use log::{debug, info, warn};
use tokio::process::Command;

use goforge_fetch::{AuxCommands, SdkManager, Toolchain, host_goarch, host_goos};
use goforge_spec::{BuildSpec, GoVersion, Sum};
use goforge_store::{LookupOutcome, Store};
use goforge_tlog::{BuildResult, Log};

use crate::coordinator::Update;
use crate::error::{DaemonError, ErrorKind, IoContext};
use crate::metrics::Metrics;
use crate::peers::{PeerVerifier, confirm_peers};
use crate::recent::RecentBuilds;

/// The toolchain grew `go install pkg@version` in this minor; older
/// releases build through `go get`.
const INSTALL_MINOR: u32 = 18;

/// From this minor on, the install step itself consults the module proxy,
/// so the compile cannot run with the proxy denied.
const INSTALL_NEEDS_PROXY_MINOR: u32 = 23;

pub struct BuildExecutor {
    home_dir: PathBuf,
    proxy_url: String,
    strip_binaries: bool,
    clean_cache_every: u64,
    store: Arc<Store>,
    tlog: Arc<Log>,
    sdk: Arc<SdkManager>,
    aux: Arc<AuxCommands>,
    peers: PeerVerifier,
    metrics: Arc<Metrics>,
    recent: Arc<RecentBuilds>,
    successes: AtomicU64,
}

impl BuildExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        home_dir: PathBuf,
        proxy_url: String,
        strip_binaries: bool,
        clean_cache_every: u64,
        store: Arc<Store>,
        tlog: Arc<Log>,
        sdk: Arc<SdkManager>,
        aux: Arc<AuxCommands>,
        peers: PeerVerifier,
        metrics: Arc<Metrics>,
        recent: Arc<RecentBuilds>,
    ) -> BuildExecutor {
        BuildExecutor {
            home_dir,
            proxy_url,
            strip_binaries,
            clean_cache_every,
            store,
            tlog,
            sdk,
            aux,
            peers,
            metrics,
            recent,
            successes: AtomicU64::new(0),
        }
    }

    fn toolchain(&self, gobin: PathBuf) -> Toolchain {
        Toolchain::new(gobin, &self.home_dir, &self.proxy_url, self.aux.clone())
    }

    /// A toolchain wrapper for callers resolving versions outside a build.
    pub fn toolchain_at(&self, gobin: PathBuf) -> Toolchain {
        self.toolchain(gobin)
    }

    /// Ensure the toolchain release is installed, counting first-time
    /// installs.
    pub async fn ensure_sdk(&self, goversion: &str) -> Result<PathBuf, DaemonError> {
        let (gobin, installed) = self.sdk.ensure(&self.aux, goversion).await?;
        if installed {
            self.metrics.sdk_installs.inc();
        }
        Ok(gobin)
    }

    /// Cheap pre-checks run before a request is queued: the toolchain
    /// installs, the module resolves, the package exists, is `main`, and
    /// needs no native interop. Absence-class problems are not-exist.
    pub async fn prepare(&self, spec: &BuildSpec) -> Result<(), DaemonError> {
        let gobin = self.ensure_sdk(&spec.goversion).await?;
        let tc = self.toolchain(gobin);
        let (mod_dir, _) = tc.ensure_module(&spec.module, &spec.version).await?;
        let pkg_dir = package_dir(&mod_dir, &spec.dir);
        if !pkg_dir.is_dir() {
            return Err(DaemonError::not_exist(format!(
                "{} has no directory {}",
                spec.module, spec.dir
            )));
        }
        let kind = tc.package_kind(&pkg_dir).await?;
        if kind != "main" {
            return Err(DaemonError::not_exist(format!(
                "package is {kind}, only main packages build to executables"
            )));
        }
        let cgo = tc.cgo_dependencies(&pkg_dir).await?;
        if !cgo.is_empty() {
            return Err(DaemonError::not_exist(format!(
                "package needs native interop through {}",
                cgo.join(", ")
            )));
        }
        Ok(())
    }

    /// Run one build to a terminal update. This is what the coordinator
    /// schedules; it never runs more than the configured build quota.
    pub async fn build(&self, spec: BuildSpec, expected_sum: Option<Sum>) -> Update {
        self.metrics.builds_started.inc();
        let update = self.run_build_update(&spec, expected_sum).await;
        self.metrics
            .log_consistency_errors
            .set(self.tlog.consistency_errors() as i64);
        update
    }

    async fn run_build_update(&self, spec: &BuildSpec, expected_sum: Option<Sum>) -> Update {
        match self.run_build(spec, expected_sum).await {
            Ok((record_number, result)) => {
                self.metrics
                    .builds_finished
                    .with_label_values(&["success"])
                    .inc();
                Update::Success {
                    record_number,
                    result,
                }
            }
            Err(e) if e.kind() == ErrorKind::PermanentBuildFailure => {
                self.metrics
                    .builds_finished
                    .with_label_values(&["permanent"])
                    .inc();
                Update::PermFailed {
                    error: e.to_string(),
                }
            }
            Err(e) => {
                self.metrics
                    .builds_finished
                    .with_label_values(&["temporary"])
                    .inc();
                Update::TempFailed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn run_build(
        &self,
        spec: &BuildSpec,
        expected_sum: Option<Sum>,
    ) -> Result<(u64, BuildResult), DaemonError> {
        let goversion = GoVersion::parse(&spec.goversion)?;
        let gobin = self.ensure_sdk(&spec.goversion).await?;
        self.prime_build_cache(&gobin, spec).await?;

        // Peers compile in parallel with us; we join them after hashing.
        let peer_checks = self.peers.spawn_checks(spec);

        let tc = self.toolchain(gobin.clone());
        let (mod_dir, fetch_output) = tc.ensure_module(&spec.module, &spec.version).await?;
        let pkg_dir = package_dir(&mod_dir, &spec.dir);
        if !pkg_dir.is_dir() {
            return Err(DaemonError::not_exist(format!(
                "{} has no directory {}",
                spec.module, spec.dir
            )));
        }
        let kind = tc.package_kind(&pkg_dir).await?;
        if kind != "main" {
            let error = format!("package is {kind}, only main packages build to executables");
            self.store.save_failure(spec, &error, &fetch_output)?;
            return Err(DaemonError::permanent_build(error));
        }
        let cgo = tc.cgo_dependencies(&pkg_dir).await?;
        if !cgo.is_empty() {
            let error = format!("package needs native interop through {}", cgo.join(", "));
            self.store.save_failure(spec, &error, &fetch_output)?;
            return Err(DaemonError::permanent_build(error));
        }

        let output_path = self.output_path(spec);
        match std::fs::remove_file(&output_path) {
            Ok(()) => debug!("removed stale output {}", output_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(DaemonError::io(
                    format!("removing stale output {}", output_path.display()),
                    e,
                ));
            }
        }

        let started = Instant::now();
        let output = self
            .compile(&gobin, spec, goversion.minor)
            .await
            .map_err(|e| DaemonError::temporary(format!("starting compile: {e}")))?;
        let wall = started.elapsed();

        let mut build_log = Vec::new();
        build_log.extend_from_slice(&fetch_output);
        build_log.extend_from_slice(&output.stdout);
        build_log.extend_from_slice(&output.stderr);
        build_log.extend_from_slice(format!("\nbuild time: {wall:.2?}\n").as_bytes());

        if !output.status.success() {
            let error = format!("compile failed: {}", output.status);
            warn!("{spec}: {error}");
            self.store.save_failure(spec, &error, &build_log)?;
            return Err(DaemonError::permanent_build(error));
        }
        info!("{spec}: compiled in {wall:.2?}");

        let artifact = std::fs::File::open(&output_path)
            .io_context(|| format!("opening compiled artifact {}", output_path.display()))?;
        let (filesize, sum) = Sum::from_reader(artifact)
            .io_context(|| format!("hashing {}", output_path.display()))?;
        if filesize == 0 {
            return Err(DaemonError::server(format!(
                "compiled artifact {} is empty",
                output_path.display()
            )));
        }
        let result = BuildResult {
            spec: spec.clone(),
            filesize,
            sum: sum.clone(),
        };

        if let Some(expected) = expected_sum {
            // Restoring a binary the GC reclaimed. The rebuild must land
            // exactly on the recorded sum; the record stays untouched.
            if sum != expected {
                self.metrics.recompile_mismatches.inc();
                return Err(DaemonError::temporary(format!(
                    "rebuild produced {sum}, the log records {expected}"
                )));
            }
            let dir = self.store.dir_for(spec);
            self.store.write_binary(&dir, &output_path)?;
            let record_number = match self.store.lookup(&self.tlog, spec)? {
                LookupOutcome::Success { record_number, .. } => record_number,
                other => {
                    return Err(DaemonError::server(format!(
                        "restore of {spec} found store state {other:?}"
                    )));
                }
            };
            return Ok((record_number, result));
        }

        confirm_peers(peer_checks, &sum).await.inspect_err(|_| {
            self.metrics.verify_failures.inc();
        })?;

        let stage = self.store.stage_dir_for(spec)?;
        self.store.write_log(&stage, &build_log)?;
        self.store.write_binary(&stage, &output_path)?;
        let record_number = self
            .tlog
            .add_record(&stage, &self.store.dir_for(spec), &result)
            .await?;

        self.recent.add(spec);
        let successes = self.successes.fetch_add(1, Ordering::SeqCst) + 1;
        if successes % self.clean_cache_every == 0 {
            self.clean_build_cache(&gobin).await;
        }

        Ok((record_number, result))
    }

    /// Compile the package. For modern toolchains this is
    /// `go install pkg@version` from a scratch directory; older ones use
    /// `go get`. Network is denied unless the install step itself needs
    /// the proxy.
    async fn compile(
        &self,
        gobin: &Path,
        spec: &BuildSpec,
        minor: u32,
    ) -> std::io::Result<std::process::Output> {
        let scratch = self.home_dir.join("scratch").join(spec.storage_id());
        if scratch.exists() {
            std::fs::remove_dir_all(&scratch)?;
        }
        std::fs::create_dir_all(&scratch)?;
        if minor < INSTALL_MINOR {
            std::fs::write(
                scratch.join("go.mod"),
                format!("module scratch\n\ngo 1.{minor}\n"),
            )?;
        }

        let mut cmd = Command::new(gobin);
        cmd.current_dir(&scratch);
        cmd.args(compile_args(spec, minor, self.strip_binaries));
        cmd.env_clear();
        cmd.env("PATH", std::env::var_os("PATH").unwrap_or_default());
        for (key, value) in compile_env(spec, minor, &self.home_dir, &self.proxy_url) {
            cmd.env(key, value);
        }
        cmd.kill_on_drop(true);
        let output = cmd.output().await;
        let _ = std::fs::remove_dir_all(&scratch);
        output
    }

    /// Build the standard library once per target and toolchain so
    /// compiles start from a warm cache.
    async fn prime_build_cache(&self, gobin: &Path, spec: &BuildSpec) -> Result<(), DaemonError> {
        let marker_dir = self.home_dir.join("primed");
        let marker = marker_dir.join(format!(
            "{}-{}-{}",
            spec.goos, spec.goarch, spec.goversion
        ));
        if marker.exists() {
            return Ok(());
        }

        let mut cmd = Command::new(gobin);
        cmd.current_dir(&self.home_dir);
        cmd.args(["build", "std"]);
        cmd.env_clear();
        cmd.env("PATH", std::env::var_os("PATH").unwrap_or_default());
        for (key, value) in compile_env(spec, u32::MAX, &self.home_dir, &self.proxy_url) {
            cmd.env(key, value);
        }
        cmd.kill_on_drop(true);
        let output = cmd
            .output()
            .await
            .map_err(|e| DaemonError::io("priming build cache".to_string(), e))?;
        if !output.status.success() {
            return Err(DaemonError::temporary(format!(
                "priming build cache for {}/{} with {}: {}",
                spec.goos,
                spec.goarch,
                spec.goversion,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        std::fs::create_dir_all(&marker_dir)
            .io_context(|| format!("creating {}", marker_dir.display()))?;
        std::fs::write(&marker, b"")
            .io_context(|| format!("writing {}", marker.display()))?;
        Ok(())
    }

    async fn clean_build_cache(&self, gobin: &Path) {
        let mut cmd = Command::new(gobin);
        cmd.current_dir(&self.home_dir);
        cmd.args(["clean", "-cache"]);
        cmd.env("HOME", &self.home_dir);
        cmd.env("GOPATH", self.home_dir.join("go"));
        match self.aux.run(cmd, "go clean -cache").await {
            Ok(output) if output.status.success() => info!("cleaned toolchain build cache"),
            Ok(output) => warn!("go clean -cache exited {}", output.status),
            Err(e) => warn!("go clean -cache: {e}"),
        }
    }

    /// Absolute path the toolchain writes the compiled binary to:
    /// `<home>/go/bin[/<goos>_<goarch>]/<name>[.exe]`, the target subdir
    /// present exactly when the target is not the host.
    pub fn output_path(&self, spec: &BuildSpec) -> PathBuf {
        let mut path = self.home_dir.join("go").join("bin");
        if spec.goos != host_goos() || spec.goarch != host_goarch() {
            path = path.join(format!("{}_{}", spec.goos, spec.goarch));
        }
        let mut name = spec.base_name().to_string();
        if spec.goos == "windows" {
            name.push_str(".exe");
        }
        path.join(name)
    }
}

fn package_dir(mod_dir: &Path, dir: &str) -> PathBuf {
    if dir == "/" {
        mod_dir.to_path_buf()
    } else {
        mod_dir.join(&dir[1..])
    }
}

/// Arguments of the compile subprocess. The flag set is part of the
/// reproducibility contract: the binary depends on `-trimpath`, the
/// cleared build id, and optionally `-s`, nothing else.
fn compile_args(spec: &BuildSpec, minor: u32, strip: bool) -> Vec<String> {
    let verb = if minor >= INSTALL_MINOR { "install" } else { "get" };
    let ldflags = if strip {
        "-ldflags=-buildid= -s"
    } else {
        "-ldflags=-buildid="
    };
    vec![
        verb.to_string(),
        "-trimpath".to_string(),
        ldflags.to_string(),
        format!("{}@{}", spec.package_path(), spec.version),
    ]
}

/// The canonical compile environment. Everything the binary may depend on
/// is pinned here; the proxy is reachable only where the toolchain itself
/// requires it.
fn compile_env(spec: &BuildSpec, minor: u32, home: &Path, proxy_url: &str) -> Vec<(String, String)> {
    let goproxy = if minor >= INSTALL_NEEDS_PROXY_MINOR {
        proxy_url.to_string()
    } else {
        "off".to_string()
    };
    vec![
        ("CGO_ENABLED".to_string(), "0".to_string()),
        ("GO111MODULE".to_string(), "on".to_string()),
        ("GO19CONCURRENTCOMPILATION".to_string(), "0".to_string()),
        ("GOTOOLCHAIN".to_string(), spec.goversion.clone()),
        ("GOOS".to_string(), spec.goos.clone()),
        ("GOARCH".to_string(), spec.goarch.clone()),
        ("HOME".to_string(), home.display().to_string()),
        ("GOPATH".to_string(), home.join("go").display().to_string()),
        ("GOPROXY".to_string(), goproxy),
        ("GOSUMDB".to_string(), "off".to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(goos: &str, goarch: &str, goversion: &str) -> BuildSpec {
        BuildSpec::new(
            "example.com/cmd/hello",
            "v1.0.0",
            "/",
            goos,
            goarch,
            goversion,
        )
        .unwrap()
    }

    #[test]
    fn test_compile_args_verb_switch() {
        let args = compile_args(&spec("linux", "amd64", "go1.22.1"), 22, false);
        assert_eq!(args[0], "install");
        assert_eq!(args[1], "-trimpath");
        assert_eq!(args[2], "-ldflags=-buildid=");
        assert_eq!(args[3], "example.com/cmd/hello@v1.0.0");

        let args = compile_args(&spec("linux", "amd64", "go1.17"), 17, false);
        assert_eq!(args[0], "get");

        let args = compile_args(&spec("linux", "amd64", "go1.22.1"), 22, true);
        assert_eq!(args[2], "-ldflags=-buildid= -s");
    }

    #[test]
    fn test_compile_env_proxy_switch() {
        let home = Path::new("/data/home");
        let env = compile_env(&spec("linux", "amd64", "go1.22.1"), 22, home, "https://p");
        let get = |k: &str| {
            env.iter()
                .find(|(key, _)| key == k)
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert_eq!(get("CGO_ENABLED"), "0");
        assert_eq!(get("GO19CONCURRENTCOMPILATION"), "0");
        assert_eq!(get("GOTOOLCHAIN"), "go1.22.1");
        assert_eq!(get("GOPROXY"), "off");

        // The install step needs the proxy from 1.23 on.
        let env = compile_env(&spec("linux", "amd64", "go1.23.1"), 23, home, "https://p");
        let goproxy = env.iter().find(|(k, _)| k == "GOPROXY").unwrap();
        assert_eq!(goproxy.1, "https://p");
    }

    #[test]
    fn test_output_path_target_subdir() {
        let executor_home = PathBuf::from("/data/home");
        // Build a bare executor shell just for path math.
        let cross = spec("windows", "arm64", "go1.22.1");
        let host = BuildSpec::new(
            "example.com/cmd/hello",
            "v1.0.0",
            "/",
            host_goos(),
            host_goarch(),
            "go1.22.1",
        );

        let path = output_path_for(&executor_home, &cross);
        assert_eq!(
            path,
            PathBuf::from("/data/home/go/bin/windows_arm64/hello.exe")
        );
        if let Ok(host) = host {
            let path = output_path_for(&executor_home, &host);
            assert_eq!(path, PathBuf::from("/data/home/go/bin/hello"));
        }
    }

    /// Mirror of [`BuildExecutor::output_path`] without the full executor.
    fn output_path_for(home: &Path, spec: &BuildSpec) -> PathBuf {
        let mut path = home.join("go").join("bin");
        if spec.goos != host_goos() || spec.goarch != host_goarch() {
            path = path.join(format!("{}_{}", spec.goos, spec.goarch));
        }
        let mut name = spec.base_name().to_string();
        if spec.goos == "windows" {
            name.push_str(".exe");
        }
        path.join(name)
    }
}
