// SPDX-FileCopyrightText: 2026 goforge contributors
// SPDX-License-Identifier: MIT

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::SigningKey;
use log::{error, info, warn};
use tokio::signal;

use goforge_daemon::config::Config;
use goforge_daemon::coordinator::Coordinator;
use goforge_daemon::error::{DaemonError, IoContext};
use goforge_daemon::executor::BuildExecutor;
use goforge_daemon::metrics::Metrics;
use goforge_daemon::peers::PeerVerifier;
use goforge_daemon::recent::RecentBuilds;
use goforge_daemon::server::{DaemonServer, build_fn, stored_fn};
use goforge_fetch::{AuxCommands, ModuleProxy, SdkManager};
use goforge_store::Store;
use goforge_tlog::{Log, LogServer, Signer};

#[tokio::main]
async fn main() -> Result<(), DaemonError> {
    env_logger::init();

    let config = match std::env::var("GOFORGE_CONFIG") {
        Ok(path) => Config::from_file(&PathBuf::from(path))?,
        Err(_) => Config::default(),
    };

    info!("starting goforge-daemon");
    info!("data directory: {}", config.data_dir.display());
    info!("module proxy: {}", config.module_proxy);
    info!("max parallel builds: {}", config.max_builds());

    std::fs::create_dir_all(&config.data_dir)
        .io_context(|| format!("creating {}", config.data_dir.display()))?;

    let signer = load_or_create_signer(&config.sign_key_path(), &config.sign_name)?;
    let tlog = Arc::new(Log::open(&config.log_dir(), signer)?);
    let metrics = Arc::new(
        Metrics::new().map_err(|e| DaemonError::server(format!("creating metrics: {e}")))?,
    );
    let store = Arc::new(Store::new(config.result_dir()));
    let aux = Arc::new(AuxCommands::default());
    let sdk = Arc::new(SdkManager::new(
        config.sdk_dir(),
        config.toolchain_dist.clone(),
        config.min_goversion_minor,
    ));
    let recent = Arc::new(RecentBuilds::new());
    recent.seed_from_log(&tlog);

    let peers = PeerVerifier::new(&config.verifier_urls)?;
    if !peers.is_empty() {
        info!(
            "cross-checking builds against {} verifier(s)",
            config.verifier_urls.len()
        );
    }

    let executor = Arc::new(BuildExecutor::new(
        config.home_dir(),
        config.module_proxy.clone(),
        config.strip_binaries,
        config.clean_cache_every,
        store.clone(),
        tlog.clone(),
        sdk.clone(),
        aux.clone(),
        peers,
        metrics.clone(),
        recent.clone(),
    ));

    let coordinator = Coordinator::start(
        config.max_builds(),
        stored_fn(store.clone(), tlog.clone()),
        build_fn(executor.clone()),
    );

    let server = DaemonServer {
        log: tlog.clone(),
        store: store.clone(),
        sdk,
        proxy: Arc::new(ModuleProxy::new(&config.module_proxy)?),
        executor,
        coordinator,
    };
    // Surface a broken signer or log before accepting any work.
    let head = server.signed().await?;
    info!(
        "publishing tree head:\n{}",
        head.lines().take(3).collect::<Vec<_>>().join("\n")
    );

    if config.binary_gc_days > 0 {
        let store = store.clone();
        let metrics = metrics.clone();
        let max_age = Duration::from_secs(u64::from(config.binary_gc_days) * 24 * 3600);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(3600));
            loop {
                tick.tick().await;
                match store.gc_binaries(max_age) {
                    Ok(reclaimed) => metrics.binaries_reclaimed.inc_by(reclaimed),
                    Err(e) => error!("binary gc sweep: {e}"),
                }
            }
        });
    }

    shutdown_signal().await;
    info!("received shutdown signal");

    // Never tear down mid-append; the records/hashes pair must stay in
    // step across restarts.
    tlog.quiesce().await;
    if tlog.consistency_errors() > 0 {
        warn!(
            "log saw {} consistency error(s); operator attention required",
            tlog.consistency_errors()
        );
    }
    info!("goforge-daemon stopped");
    Ok(())
}

/// Load the tree-head signing key, generating one on first start.
fn load_or_create_signer(path: &Path, name: &str) -> Result<Signer, DaemonError> {
    if !path.exists() {
        let key = SigningKey::generate(&mut rand::rngs::OsRng);
        let contents = format!("{name}:{}\n", STANDARD.encode(key.to_bytes()));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .io_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(path, contents)
            .io_context(|| format!("writing signing key {}", path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .io_context(|| format!("restricting {}", path.display()))?;
        }
        info!("generated signing key {name} at {}", path.display());
    }
    Ok(Signer::from_key_file(path)?)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
