// SPDX-FileCopyrightText: 2026 goforge contributors
// SPDX-License-Identifier: MIT

//! Peer verification.
//!
//! Before a new build enters the log, every configured peer instance is
//! asked for the record of the same spec; their sums must all equal ours.
//! The peer tasks run alongside the local compile and never cancel it; the
//! local build joins them only once it has its own sum. Any peer error or
//! disagreement fails the build as temporary, before anything is
//! committed, so there is no state to roll back.

use std::time::Duration;

use log::warn;
use tokio::task::JoinHandle;
use url::Url;

use goforge_spec::{BuildSpec, Sum};
use goforge_tlog::BuildResult;

use crate::error::DaemonError;

/// Transport-level ceiling per peer request. A peer building from
/// scratch can legitimately take this long.
const PEER_TIMEOUT: Duration = Duration::from_secs(30 * 60);

pub struct PeerVerifier {
    client: reqwest::Client,
    peers: Vec<Url>,
}

impl PeerVerifier {
    /// Parse and validate the configured peer base URLs. A malformed
    /// verifier URL is a configuration error surfaced at startup, not a
    /// per-build failure.
    pub fn new(peers: &[String]) -> Result<PeerVerifier, DaemonError> {
        let mut parsed = Vec::with_capacity(peers.len());
        for raw in peers {
            let url = Url::parse(raw)
                .map_err(|e| DaemonError::config(format!("invalid verifier url {raw}: {e}")))?;
            if url.cannot_be_a_base() {
                return Err(DaemonError::config(format!(
                    "invalid verifier url {raw}: not a base url"
                )));
            }
            parsed.push(url);
        }
        let client = reqwest::Client::builder()
            .timeout(PEER_TIMEOUT)
            .build()
            .expect("building a client from static options");
        Ok(PeerVerifier {
            client,
            peers: parsed,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Ask every peer for its record of `spec`, one task per peer.
    pub fn spawn_checks(&self, spec: &BuildSpec) -> Vec<JoinHandle<Result<Sum, DaemonError>>> {
        self.peers
            .iter()
            .map(|peer| {
                let client = self.client.clone();
                let url = record_url(peer, spec);
                let spec = spec.clone();
                tokio::spawn(async move { fetch_record_sum(client, url, spec).await })
            })
            .collect()
    }
}

/// The peer's record link for a spec: the canonical spec path with the
/// `record` page appended.
fn record_url(base: &Url, spec: &BuildSpec) -> Url {
    let mut url = base.clone();
    url.path_segments_mut()
        .expect("verifier urls are validated as base urls")
        .pop_if_empty()
        .extend(format!("{spec}record").split('/'));
    url
}

/// Join all peer checks and require every sum to equal `local_sum`.
pub async fn confirm_peers(
    checks: Vec<JoinHandle<Result<Sum, DaemonError>>>,
    local_sum: &Sum,
) -> Result<(), DaemonError> {
    for check in checks {
        let sum = check
            .await
            .map_err(|e| DaemonError::temporary(format!("peer verification task failed: {e}")))??;
        if sum != *local_sum {
            warn!("peer verifier disagreed: local {local_sum}, peer {sum}");
            return Err(DaemonError::temporary(format!(
                "peer verifier disagreed: local sum {local_sum}, peer sum {sum}"
            )));
        }
    }
    Ok(())
}

async fn fetch_record_sum(
    client: reqwest::Client,
    url: Url,
    spec: BuildSpec,
) -> Result<Sum, DaemonError> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| DaemonError::temporary(format!("peer {url}: {e}")))?;
    if !response.status().is_success() {
        return Err(DaemonError::temporary(format!(
            "peer {url} returned status {}",
            response.status()
        )));
    }
    let body = response
        .text()
        .await
        .map_err(|e| DaemonError::temporary(format!("peer {url}: {e}")))?;
    let record = BuildResult::parse_line(&body)
        .map_err(|e| DaemonError::temporary(format!("peer {url} sent a bad record: {e}")))?;
    if record.spec != spec {
        return Err(DaemonError::temporary(format!(
            "peer {url} answered for {}, asked about {spec}",
            record.spec
        )));
    }
    Ok(record.sum)
}
