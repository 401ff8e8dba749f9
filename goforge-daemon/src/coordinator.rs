// SPDX-FileCopyrightText: 2026 goforge contributors
// SPDX-License-Identifier: MIT

//! Build coordinator.
//!
//! A single-threaded event loop owns all scheduling state: the in-flight
//! table, the FIFO queue, the set of busy output paths and the active
//! counter. Registration, unregistration and build completions arrive as
//! messages; worker tasks only ever talk back over the same channel, so no
//! state is shared.
//!
//! A build stays in the queue while it runs; its output path is busy, so
//! the scheduler's skip rule never picks it twice, and queue positions
//! count everything ahead of a waiter. Fan-out to subscribers is
//! non-blocking: a stalled subscriber loses intermediate queue positions
//! but never blocks scheduling, and can always recover the terminal state
//! by re-registering, which replays `final`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::pin::Pin;
use std::sync::Arc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use goforge_spec::{BuildSpec, Sum};
use goforge_tlog::BuildResult;

/// Buffered updates per subscriber before fan-out starts dropping
/// intermediates.
const SUBSCRIBER_BUFFER: usize = 32;

/// Progress of one build, as delivered to subscribers. Terminal variants
/// are delivered exactly once per subscription; positions may be dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Update {
    /// Index in the queue; 0 means the build is running.
    QueuePosition { position: usize },
    /// The attempt failed but may succeed on retry.
    TempFailed { error: String },
    /// The compile failed; the failure is persisted in the store.
    PermFailed { error: String },
    /// The build entered the transparency log.
    Success {
        record_number: u64,
        result: BuildResult,
    },
}

impl Update {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Update::QueuePosition { .. })
    }
}

type BuildFuture = Pin<Box<dyn Future<Output = Update> + Send>>;

/// Runs one build to its terminal update. The coordinator never inspects
/// the work, only schedules it.
pub type BuildFn = dyn Fn(BuildSpec, Option<Sum>) -> BuildFuture + Send + Sync;

/// Consulted once per fresh registration: a prior terminal outcome in the
/// result store pre-populates the entry's final update. A registration
/// carrying an expected sum is a restore; it must build even though the
/// store already holds a terminal outcome, so the consult sees the sum.
pub type StoredFn = dyn Fn(&BuildSpec, Option<&Sum>) -> Option<Update> + Send + Sync;

enum Msg {
    Register {
        spec: BuildSpec,
        expected_sum: Option<Sum>,
        subscriber: mpsc::Sender<Update>,
    },
    Unregister {
        spec: BuildSpec,
        subscriber: mpsc::Sender<Update>,
    },
    Completed {
        spec: BuildSpec,
        update: Update,
    },
}

/// Handle to the coordinator loop. Cheap to clone.
#[derive(Clone)]
pub struct Coordinator {
    tx: mpsc::UnboundedSender<Msg>,
}

/// One subscriber's view of a build. Dropping it unregisters; if it was
/// the last subscriber of a pending build the work is discarded, though a
/// build already running completes and commits regardless.
pub struct Subscription {
    spec: BuildSpec,
    sender: mpsc::Sender<Update>,
    rx: mpsc::Receiver<Update>,
    coordinator: mpsc::UnboundedSender<Msg>,
}

impl Subscription {
    /// Next update, in order. `None` after the coordinator shuts down.
    pub async fn recv(&mut self) -> Option<Update> {
        self.rx.recv().await
    }

    /// Wait for the terminal update, discarding queue positions.
    pub async fn wait(&mut self) -> Option<Update> {
        while let Some(update) = self.rx.recv().await {
            if update.is_terminal() {
                return Some(update);
            }
        }
        None
    }

    pub fn spec(&self) -> &BuildSpec {
        &self.spec
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.coordinator.send(Msg::Unregister {
            spec: self.spec.clone(),
            subscriber: self.sender.clone(),
        });
    }
}

impl Coordinator {
    /// Spawn the coordinator loop. At most `max_builds` builds run at
    /// once; `stored` seeds final updates from the result store; `build`
    /// executes one build.
    pub fn start(max_builds: usize, stored: Arc<StoredFn>, build: Arc<BuildFn>) -> Coordinator {
        assert!(max_builds > 0, "max_builds must be positive");
        let (tx, rx) = mpsc::unbounded_channel();
        let state = LoopState {
            max_builds,
            stored,
            build,
            tx: tx.clone(),
            in_progress: HashMap::new(),
            queue: VecDeque::new(),
            output_busy: HashSet::new(),
            active: 0,
        };
        tokio::spawn(state.run(rx));
        Coordinator { tx }
    }

    /// Subscribe to the build of `spec`, scheduling it if necessary.
    /// `expected_sum` is set when restoring a binary the GC reclaimed: the
    /// rebuild must reproduce exactly that sum.
    pub fn register(&self, spec: BuildSpec, expected_sum: Option<Sum>) -> Subscription {
        let (sub_tx, sub_rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let _ = self.tx.send(Msg::Register {
            spec: spec.clone(),
            expected_sum,
            subscriber: sub_tx.clone(),
        });
        Subscription {
            spec,
            sender: sub_tx,
            rx: sub_rx,
            coordinator: self.tx.clone(),
        }
    }
}

struct InProgress {
    subscribers: Vec<mpsc::Sender<Update>>,
    final_update: Option<Update>,
    expected_sum: Option<Sum>,
    building: bool,
}

struct LoopState {
    max_builds: usize,
    stored: Arc<StoredFn>,
    build: Arc<BuildFn>,
    tx: mpsc::UnboundedSender<Msg>,
    in_progress: HashMap<BuildSpec, InProgress>,
    queue: VecDeque<BuildSpec>,
    output_busy: HashSet<String>,
    active: usize,
}

/// The toolchain-relative path the compiled binary lands at. Two specs
/// with the same output path must not build concurrently.
fn output_key(spec: &BuildSpec) -> String {
    let ext = if spec.goos == "windows" { ".exe" } else { "" };
    format!("{}_{}/{}{}", spec.goos, spec.goarch, spec.base_name(), ext)
}

impl LoopState {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Msg>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                Msg::Register {
                    spec,
                    expected_sum,
                    subscriber,
                } => self.handle_register(spec, expected_sum, subscriber),
                Msg::Unregister { spec, subscriber } => self.handle_unregister(spec, subscriber),
                Msg::Completed { spec, update } => self.handle_completed(spec, update),
            }
        }
        debug!("coordinator loop stopped");
    }

    fn handle_register(
        &mut self,
        spec: BuildSpec,
        expected_sum: Option<Sum>,
        subscriber: mpsc::Sender<Update>,
    ) {
        let fresh = !self.in_progress.contains_key(&spec);
        if fresh {
            let final_update = (self.stored)(&spec, expected_sum.as_ref());
            self.in_progress.insert(
                spec.clone(),
                InProgress {
                    subscribers: Vec::new(),
                    final_update,
                    expected_sum,
                    building: false,
                },
            );
        }
        let entry = self
            .in_progress
            .get_mut(&spec)
            .expect("entry inserted above");
        entry.subscribers.push(subscriber.clone());

        if let Some(final_update) = &entry.final_update {
            let _ = subscriber.try_send(final_update.clone());
            return;
        }

        if fresh {
            self.queue.push_back(spec.clone());
            self.kick(false);
        }

        let building = self
            .in_progress
            .get(&spec)
            .map(|e| e.building)
            .unwrap_or(false);
        let position = if building {
            0
        } else {
            self.queue.iter().position(|s| s == &spec).unwrap_or(0)
        };
        let _ = subscriber.try_send(Update::QueuePosition { position });
    }

    fn handle_unregister(&mut self, spec: BuildSpec, subscriber: mpsc::Sender<Update>) {
        let entry = self
            .in_progress
            .get_mut(&spec)
            .unwrap_or_else(|| panic!("unregister for unknown spec {spec}"));
        let idx = entry
            .subscribers
            .iter()
            .position(|s| s.same_channel(&subscriber))
            .unwrap_or_else(|| panic!("unregister of unknown subscriber for {spec}"));
        entry.subscribers.remove(idx);

        if entry.subscribers.is_empty() && entry.final_update.is_some() {
            self.in_progress.remove(&spec);
            self.queue.retain(|s| s != &spec);
        }
    }

    fn handle_completed(&mut self, spec: BuildSpec, update: Update) {
        let Some(entry) = self.in_progress.get_mut(&spec) else {
            warn!("completion for unknown spec {spec}");
            return;
        };
        entry.building = false;
        entry.final_update = Some(update.clone());
        for sub in &entry.subscribers {
            let _ = sub.try_send(update.clone());
        }
        if entry.subscribers.is_empty() {
            self.in_progress.remove(&spec);
        }

        self.queue.retain(|s| s != &spec);
        self.output_busy.remove(&output_key(&spec));
        self.active -= 1;
        self.kick(true);
    }

    /// Start queued builds while capacity remains, skipping entries whose
    /// output path is busy (running builds among them) and dropping
    /// entries nobody waits for. Whenever the queue moved, re-broadcast
    /// positions to everything still waiting.
    fn kick(&mut self, mut moved: bool) {
        while self.active < self.max_builds {
            let Some(at) = self
                .queue
                .iter()
                .position(|spec| !self.output_busy.contains(&output_key(spec)))
            else {
                break;
            };
            let spec = self.queue[at].clone();

            let abandoned = self
                .in_progress
                .get(&spec)
                .map(|e| e.subscribers.is_empty())
                .unwrap_or(true);
            if abandoned {
                debug!("dropping queued build {spec}: no subscribers left");
                self.queue.remove(at);
                self.in_progress.remove(&spec);
                moved = true;
                continue;
            }

            self.output_busy.insert(output_key(&spec));
            self.active += 1;
            moved = true;
            let entry = self
                .in_progress
                .get_mut(&spec)
                .expect("abandoned check found the entry");
            entry.building = true;
            for sub in &entry.subscribers {
                let _ = sub.try_send(Update::QueuePosition { position: 0 });
            }

            let fut = (self.build)(spec.clone(), entry.expected_sum.clone());
            let tx = self.tx.clone();
            let worker_spec = spec;
            tokio::spawn(async move {
                let update = fut.await;
                let _ = tx.send(Msg::Completed {
                    spec: worker_spec,
                    update,
                });
            });
        }

        if moved {
            for (position, spec) in self.queue.iter().enumerate() {
                let Some(entry) = self.in_progress.get(spec) else {
                    continue;
                };
                if entry.building {
                    continue;
                }
                for sub in &entry.subscribers {
                    let _ = sub.try_send(Update::QueuePosition { position });
                }
            }
        }
    }
}
