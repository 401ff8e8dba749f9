// SPDX-FileCopyrightText: 2026 goforge contributors
// SPDX-License-Identifier: MIT

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Service counters. The registry renders in the text exposition format;
/// serving it is left to the edge.
pub struct Metrics {
    pub registry: Registry,
    pub builds_started: IntCounter,
    pub builds_finished: IntCounterVec,
    pub recompile_mismatches: IntCounter,
    pub verify_failures: IntCounter,
    pub sdk_installs: IntCounter,
    pub binaries_reclaimed: IntCounter,
    /// Mirrors the transparency log's fatal counter; non-zero is an alarm.
    pub log_consistency_errors: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Metrics, prometheus::Error> {
        let registry = Registry::new();

        let builds_started = IntCounter::with_opts(Opts::new(
            "goforge_builds_started_total",
            "Builds handed to the executor",
        ))?;
        let builds_finished = IntCounterVec::new(
            Opts::new(
                "goforge_builds_finished_total",
                "Builds finished, by outcome",
            ),
            &["outcome"],
        )?;
        let recompile_mismatches = IntCounter::with_opts(Opts::new(
            "goforge_recompile_mismatch_total",
            "Rebuilds whose sum disagreed with the recorded sum",
        ))?;
        let verify_failures = IntCounter::with_opts(Opts::new(
            "goforge_verify_failure_total",
            "Peer verifications that errored or disagreed",
        ))?;
        let sdk_installs = IntCounter::with_opts(Opts::new(
            "goforge_sdk_install_total",
            "Toolchain releases installed",
        ))?;
        let binaries_reclaimed = IntCounter::with_opts(Opts::new(
            "goforge_binaries_reclaimed_total",
            "Stored binaries removed by the gc sweep",
        ))?;
        let log_consistency_errors = IntGauge::with_opts(Opts::new(
            "goforge_log_consistency_errors",
            "Transparency log consistency errors since startup",
        ))?;

        registry.register(Box::new(builds_started.clone()))?;
        registry.register(Box::new(builds_finished.clone()))?;
        registry.register(Box::new(recompile_mismatches.clone()))?;
        registry.register(Box::new(verify_failures.clone()))?;
        registry.register(Box::new(sdk_installs.clone()))?;
        registry.register(Box::new(binaries_reclaimed.clone()))?;
        registry.register(Box::new(log_consistency_errors.clone()))?;

        Ok(Metrics {
            registry,
            builds_started,
            builds_finished,
            recompile_mismatches,
            verify_failures,
            sdk_installs,
            binaries_reclaimed,
            log_consistency_errors,
        })
    }

    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = vec![];
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .expect("encoding metrics to a Vec cannot fail");
        String::from_utf8(buffer).expect("text exposition format is utf-8")
    }
}
