// SPDX-FileCopyrightText: 2026 goforge contributors
// SPDX-License-Identifier: MIT

//! In-process service harness for end-to-end scenarios.
//!
//! Builds run against a stub toolchain: a shell script installed where the
//! SDK manager expects the `go` binary, answering the adapter subcommands
//! with canned output and writing a deterministic artifact on `install`.
//! Every invocation is appended to a call log so tests can count compiles.

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use goforge_daemon::coordinator::Coordinator;
use goforge_daemon::executor::BuildExecutor;
use goforge_daemon::metrics::Metrics;
use goforge_daemon::peers::PeerVerifier;
use goforge_daemon::recent::RecentBuilds;
use goforge_daemon::server::{build_fn, stored_fn};
use goforge_fetch::{AuxCommands, SdkManager, host_goarch, host_goos};
use goforge_spec::{BuildSpec, Sum};
use goforge_store::Store;
use goforge_tlog::{BuildResult, Log, Signer};

pub const GOVERSION: &str = "go1.22.1";
pub const MODULE: &str = "example.com/cmd/hello";
pub const VERSION: &str = "v1.0.0";
pub const BINARY: &str = "deterministic binary bytes";

/// The spec every scenario builds: the stub module for the host target,
/// so the artifact lands at `$HOME/go/bin/hello`.
pub fn test_spec() -> BuildSpec {
    BuildSpec::new(MODULE, VERSION, "/", host_goos(), host_goarch(), GOVERSION).unwrap()
}

pub fn sum_of(data: &[u8]) -> Sum {
    let (_, sum) = Sum::from_reader(data).unwrap();
    sum
}

pub struct Behavior {
    pub package_kind: &'static str,
    pub peers: Vec<String>,
}

impl Default for Behavior {
    fn default() -> Self {
        Behavior {
            package_kind: "main",
            peers: Vec::new(),
        }
    }
}

pub struct TestService {
    pub tmp: tempfile::TempDir,
    pub store: Arc<Store>,
    pub tlog: Arc<Log>,
    pub metrics: Arc<Metrics>,
    pub recent: Arc<RecentBuilds>,
    pub coordinator: Coordinator,
    calls: PathBuf,
}

impl TestService {
    pub async fn start(behavior: Behavior) -> TestService {
        let tmp = tempfile::tempdir().unwrap();
        let data = tmp.path();

        let home = data.join("home");
        std::fs::create_dir_all(&home).unwrap();
        let mod_dir = data.join("module");
        std::fs::create_dir_all(&mod_dir).unwrap();
        std::fs::write(mod_dir.join("main.go"), "package main\n").unwrap();
        let calls = data.join("calls.log");

        let gobin_dir = data.join("sdk").join(GOVERSION).join("go").join("bin");
        std::fs::create_dir_all(&gobin_dir).unwrap();
        let gobin = gobin_dir.join("go");
        let script = [
            "#!/bin/sh".to_string(),
            format!("echo \"go $*\" >> '{}'", calls.display()),
            "case \"$1\" in".to_string(),
            "mod)".to_string(),
            format!(
                "  echo '{{\"Path\":\"{MODULE}\",\"Version\":\"{VERSION}\",\"Dir\":\"{}\"}}'",
                mod_dir.display()
            ),
            "  ;;".to_string(),
            "list)".to_string(),
            "  if [ \"$2\" = \"-deps\" ]; then".to_string(),
            "    exit 0".to_string(),
            "  fi".to_string(),
            format!("  echo '{}'", behavior.package_kind),
            "  ;;".to_string(),
            "install)".to_string(),
            "  mkdir -p \"$HOME/go/bin\"".to_string(),
            format!("  printf '%s' '{BINARY}' > \"$HOME/go/bin/hello\""),
            "  ;;".to_string(),
            "*)".to_string(),
            "  ;;".to_string(),
            "esac".to_string(),
            String::new(),
        ]
        .join("\n");
        std::fs::write(&gobin, script).unwrap();
        std::fs::set_permissions(&gobin, std::fs::Permissions::from_mode(0o755)).unwrap();

        let signer = Signer::new("e2e.test", ed25519_key());
        let tlog = Arc::new(Log::open(&data.join("log"), signer).unwrap());
        let store = Arc::new(Store::new(data.join("result")));
        let metrics = Arc::new(Metrics::new().unwrap());
        let recent = Arc::new(RecentBuilds::new());
        let aux = Arc::new(AuxCommands::default());
        let sdk = Arc::new(SdkManager::new(data.join("sdk"), "https://dist.invalid", 13));

        let executor = Arc::new(BuildExecutor::new(
            home,
            "https://proxy.invalid".to_string(),
            false,
            20,
            store.clone(),
            tlog.clone(),
            sdk,
            aux,
            PeerVerifier::new(&behavior.peers).unwrap(),
            metrics.clone(),
            recent.clone(),
        ));
        let coordinator = Coordinator::start(
            2,
            stored_fn(store.clone(), tlog.clone()),
            build_fn(executor),
        );

        TestService {
            tmp,
            store,
            tlog,
            metrics,
            recent,
            coordinator,
            calls,
        }
    }

    /// How many compile subprocesses the stub toolchain saw.
    pub fn install_calls(&self) -> usize {
        match std::fs::read_to_string(&self.calls) {
            Ok(contents) => contents
                .lines()
                .filter(|l| l.starts_with("go install"))
                .count(),
            Err(_) => 0,
        }
    }

    pub fn records_len(&self) -> u64 {
        std::fs::metadata(self.tmp.path().join("log").join("records"))
            .map(|m| m.len())
            .unwrap_or(0)
    }

    pub fn hashes_len(&self) -> u64 {
        std::fs::metadata(self.tmp.path().join("log").join("hashes"))
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

fn ed25519_key() -> ed25519_dalek::SigningKey {
    ed25519_dalek::SigningKey::from_bytes(&[5u8; 32])
}

/// Serve one HTTP response with the given body, returning the base URL.
/// Stands in for a peer verifier instance.
pub async fn one_shot_peer(body: String) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let _ = socket.read(&mut buf).await;
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let _ = socket.write_all(response.as_bytes()).await;
    });
    format!("http://{addr}")
}

/// The record line a well-behaved peer would serve for `spec`.
pub fn peer_record(spec: &BuildSpec, sum: Sum) -> String {
    BuildResult {
        spec: spec.clone(),
        filesize: BINARY.len() as u64,
        sum,
    }
    .to_line()
}
