use atomic::Atomic;
use fxhash::FxHashMap;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::*;

use crate::load_balancing::{LatencyAwarenessConfig, PlanContext, PlanStage, Tier};

const NO_AVERAGE: f64 = -1.0;

/// Exponentially decayed latency average of a single node.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LatencyScore {
    average: f64,
    sample_count: u64,
    timestamp: Instant,
}

impl LatencyScore {
    /// Average latency in nanoseconds, if already computed.
    #[inline]
    pub fn average(&self) -> Option<f64> {
        if self.average < 0.0 {
            None
        } else {
            Some(self.average)
        }
    }

    #[inline]
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    /// Time of the last measurement.
    #[inline]
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }
}

/// Tracks per-node latency and decides which nodes perform poorly compared to the rest of the
/// cluster.
///
/// Averages are decayed over time: the weight of the previous average shrinks the longer it
/// has been since the last measurement, according to the configured scale. The first few
/// samples only warm the score up and don't contribute to the average. A node is penalized
/// when its trusted average exceeds the best trusted average in the cluster times the
/// exclusion threshold; the best average is refreshed periodically by
/// [`refresh_min_average`](LatencyTracker::refresh_min_average). Nodes not measured for the
/// retry period are never penalized, so they get a chance to prove themselves again.
#[derive(Debug)]
pub struct LatencyTracker {
    config: LatencyAwarenessConfig,
    threshold_to_account: u64,
    scores: Mutex<FxHashMap<SocketAddr, LatencyScore>>,
    min_average: Atomic<f64>,
}

impl LatencyTracker {
    pub fn new(config: LatencyAwarenessConfig) -> Self {
        LatencyTracker {
            threshold_to_account: config.min_measured() * 3 / 10,
            config,
            scores: Default::default(),
            min_average: Atomic::new(NO_AVERAGE),
        }
    }

    #[inline]
    pub fn config(&self) -> &LatencyAwarenessConfig {
        &self.config
    }

    /// Records a latency measurement of a completed request.
    pub fn record(&self, node: SocketAddr, latency: Duration) {
        self.record_at(node, latency, Instant::now());
    }

    pub fn record_at(&self, node: SocketAddr, latency: Duration, now: Instant) {
        let latency = latency.as_nanos() as f64;
        let mut scores = self.scores();

        let score = scores.entry(node).or_insert(LatencyScore {
            average: NO_AVERAGE,
            sample_count: 0,
            timestamp: now,
        });

        if score.sample_count < self.threshold_to_account {
            score.average = NO_AVERAGE;
        } else if score.average < 0.0 {
            score.average = latency;
        } else {
            let delay = now.saturating_duration_since(score.timestamp).as_nanos() as f64;
            let scaled_delay = delay / self.config.scale().as_nanos() as f64;
            let weight = if scaled_delay > 0.0 {
                (scaled_delay + 1.0).ln() / scaled_delay
            } else {
                1.0
            };

            score.average = (1.0 - weight) * latency + weight * score.average;
        }

        score.sample_count += 1;
        score.timestamp = now;
    }

    /// Returns current score of given node.
    pub fn score(&self, node: SocketAddr) -> Option<LatencyScore> {
        self.scores().get(&node).copied()
    }

    /// Drops measurements of given node.
    pub fn forget(&self, node: SocketAddr) {
        self.scores().remove(&node);
    }

    /// The lowest trusted average in the cluster, as of the last refresh.
    pub fn min_average(&self) -> Option<f64> {
        let min_average = self.min_average.load(Ordering::Relaxed);
        if min_average < 0.0 {
            None
        } else {
            Some(min_average)
        }
    }

    pub fn is_penalized(&self, node: SocketAddr) -> bool {
        self.is_penalized_at(node, Instant::now())
    }

    pub fn is_penalized_at(&self, node: SocketAddr, now: Instant) -> bool {
        let min_average = match self.min_average() {
            Some(min_average) => min_average,
            None => return false,
        };

        let score = match self.score(node) {
            Some(score) => score,
            None => return false,
        };

        if score.average < 0.0
            || score.sample_count < self.config.min_measured()
            || now.saturating_duration_since(score.timestamp) > self.config.retry_period()
        {
            return false;
        }

        score.average > min_average * self.config.exclusion_threshold()
    }

    /// Recomputes the lowest average among trusted, recently measured nodes. The previous value is
    /// kept if no node qualifies.
    pub fn refresh_min_average(&self) {
        self.refresh_min_average_at(Instant::now());
    }

    pub fn refresh_min_average_at(&self, now: Instant) {
        let min_average = self
            .scores()
            .values()
            .filter(|score| {
                score.average >= 0.0
                    && score.sample_count >= self.config.min_measured()
                    && now.saturating_duration_since(score.timestamp)
                        <= self.config.retry_period()
            })
            .map(|score| score.average)
            .fold(None, |min: Option<f64>, average| {
                Some(min.map_or(average, |min| min.min(average)))
            });

        if let Some(min_average) = min_average {
            trace!(min_average, "Refreshed minimum latency average.");
            self.min_average.store(min_average, Ordering::Relaxed);
        }
    }

    #[inline]
    fn scores(&self) -> MutexGuard<'_, FxHashMap<SocketAddr, LatencyScore>> {
        // scores stay consistent even if a holder panicked
        self.scores.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Moves penalized candidates to the back of their tier, keeping relative order otherwise.
pub struct LatencyAwareStage {
    tracker: Arc<LatencyTracker>,
}

impl LatencyAwareStage {
    pub fn new(tracker: Arc<LatencyTracker>) -> Self {
        LatencyAwareStage { tracker }
    }
}

impl PlanStage for LatencyAwareStage {
    fn narrow(&self, tier: &mut Tier, _context: &PlanContext) {
        let now = Instant::now();
        let (mut good, penalized): (Vec<_>, Vec<_>) = tier.nodes.drain(..).partition(|node| {
            !self
                .tracker
                .is_penalized_at(node.broadcast_rpc_address(), now)
        });

        if !penalized.is_empty() {
            trace!(
                penalized = penalized.len(),
                "Moving slow nodes to the back of the plan."
            );
        }

        good.extend(penalized);
        tier.nodes = good;
    }
}
