// SPDX-FileCopyrightText: 2026 goforge contributors
// SPDX-License-Identifier: MIT

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use log::warn;

use goforge_spec::BuildSpec;
use goforge_tlog::Log;

/// Links kept in the recent-builds ring.
const RECENT_MAX: usize = 10;

/// How far back startup replay looks to seed the ring and the counters.
const SEED_RECORDS: u64 = 1000;

/// The last few successful builds plus per-target popularity counters,
/// which seed hot-target ordering. Rebuilt at startup by replaying the
/// tail of the transparency log.
#[derive(Default)]
pub struct RecentBuilds {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    links: VecDeque<String>,
    popularity: HashMap<String, u64>,
}

impl RecentBuilds {
    pub fn new() -> RecentBuilds {
        RecentBuilds::default()
    }

    pub fn add(&self, spec: &BuildSpec) {
        let mut inner = self.inner.lock().expect("recent builds lock");
        inner.links.push_front(format!("/{spec}"));
        inner.links.truncate(RECENT_MAX);
        let target = format!("{}/{}", spec.goos, spec.goarch);
        *inner.popularity.entry(target).or_insert(0) += 1;
    }

    /// Most recent first.
    pub fn links(&self) -> Vec<String> {
        self.inner
            .lock()
            .expect("recent builds lock")
            .links
            .iter()
            .cloned()
            .collect()
    }

    /// Targets ordered by build count, busiest first.
    pub fn popular_targets(&self) -> Vec<(String, u64)> {
        let inner = self.inner.lock().expect("recent builds lock");
        let mut targets: Vec<(String, u64)> = inner
            .popularity
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        targets.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        targets
    }

    /// Replay the log tail so restarts keep their ring and counters.
    pub fn seed_from_log(&self, log: &Log) {
        let count = match log.count() {
            Ok(count) => count,
            Err(e) => {
                warn!("not seeding recent builds: {e}");
                return;
            }
        };
        let start = count.saturating_sub(SEED_RECORDS);
        for id in start..count {
            match log.read_result(id) {
                Ok(result) => self.add(&result.spec),
                Err(e) => warn!("skipping record {id} while seeding recent builds: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(module: &str, goarch: &str) -> BuildSpec {
        BuildSpec::new(module, "v1.0.0", "/", "linux", goarch, "go1.22.1").unwrap()
    }

    #[test]
    fn test_ring_capped() {
        let recent = RecentBuilds::new();
        for i in 0..15 {
            recent.add(&spec(&format!("example.com/m{i}"), "amd64"));
        }
        let links = recent.links();
        assert_eq!(links.len(), RECENT_MAX);
        // Newest first.
        assert!(links[0].starts_with("/example.com/m14@"));
    }

    #[test]
    fn test_popularity_counts_goarch() {
        let recent = RecentBuilds::new();
        recent.add(&spec("example.com/a", "amd64"));
        recent.add(&spec("example.com/b", "amd64"));
        recent.add(&spec("example.com/c", "arm64"));

        let targets = recent.popular_targets();
        assert_eq!(targets[0], ("linux/amd64".to_string(), 2));
        assert_eq!(targets[1], ("linux/arm64".to_string(), 1));
    }
}
