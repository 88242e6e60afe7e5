//! Heartbeat and idle timeout tracking of pooled connections.
//!
//! Every pooled connection carries a [`ConnectionHealth`] record. Application traffic and
//! heartbeat answers are reported to it, and [`ConnectionHealth::poll`] tells the owner what to
//! do next: send a heartbeat, tear the connection down, or nothing. Time is always passed in
//! explicitly, so the state machine can be driven by a timer task or directly by tests.
use atomic::Atomic;
use bytemuck::NoUninit;
use derive_more::Display;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::*;

use crate::error::Error;
use crate::transport::CdrsTransport;

const DEFAULT_HEARTBEAT_INTERVAL: u64 = 30;
const DEFAULT_IDLE_TIMEOUT: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum IdleTimeout {
    Unset,
    Disabled,
    After(Duration),
}

/// Heartbeat settings of pooled connections.
///
/// Unless set explicitly, the idle timeout follows the heartbeat interval: it is twice the
/// interval (but at least 60 seconds) when heartbeats are enabled, and absent otherwise, since
/// an idle connection without heartbeats never gets a chance to prove it's alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeartbeatConfig {
    interval: Option<Duration>,
    idle_timeout: IdleTimeout,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        HeartbeatConfig::new(Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL))
    }
}

impl HeartbeatConfig {
    /// Creates a configuration with given heartbeat interval and no explicit idle timeout. Zero
    /// interval disables heartbeats.
    pub fn new(interval: Duration) -> Self {
        HeartbeatConfig {
            interval: Some(interval).filter(|interval| !interval.is_zero()),
            idle_timeout: IdleTimeout::Unset,
        }
    }

    /// Creates a configuration with given heartbeat interval and explicit idle timeout, in
    /// seconds. Zero disables the corresponding behavior.
    pub fn from_secs(interval: u64, idle_timeout: u64) -> Self {
        HeartbeatConfig::new(Duration::from_secs(interval))
            .with_idle_timeout(Duration::from_secs(idle_timeout))
    }

    /// Never sends heartbeats and never times out.
    pub fn disabled() -> Self {
        HeartbeatConfig {
            interval: None,
            idle_timeout: IdleTimeout::Disabled,
        }
    }

    /// Sets the idle timeout explicitly, enforcing it even without heartbeats. Zero disables it.
    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = if idle_timeout.is_zero() {
            IdleTimeout::Disabled
        } else {
            IdleTimeout::After(idle_timeout)
        };
        self
    }

    /// Time without application traffic after which a heartbeat is sent.
    #[inline]
    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Time without any successful response after which the connection is considered dead.
    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.idle_timeout {
            IdleTimeout::After(idle_timeout) => Some(idle_timeout),
            IdleTimeout::Disabled => None,
            IdleTimeout::Unset => self.interval.map(|interval| {
                interval
                    .saturating_mul(2)
                    .max(Duration::from_secs(DEFAULT_IDLE_TIMEOUT))
            }),
        }
    }

    #[inline]
    pub fn is_disabled(&self) -> bool {
        self.interval.is_none() && self.idle_timeout().is_none()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display, NoUninit)]
#[repr(u8)]
pub enum HealthState {
    Healthy,
    AwaitingHeartbeatResponse,
    /// Terminal. The connection should be torn down.
    TimedOut,
}

/// What the owner of a connection should do after polling its health.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum HealthAction {
    None,
    SendHeartbeat,
    Teardown,
}

#[derive(Debug)]
struct Timestamps {
    last_activity: Instant,
    last_response: Instant,
}

/// Health record of a single connection.
#[derive(Debug)]
pub struct ConnectionHealth {
    config: HeartbeatConfig,
    state: Atomic<HealthState>,
    timestamps: Mutex<Timestamps>,
}

impl ConnectionHealth {
    /// Creates a record for a connection established at given time.
    pub fn new(config: HeartbeatConfig, now: Instant) -> Self {
        ConnectionHealth {
            config,
            state: Atomic::new(HealthState::Healthy),
            timestamps: Mutex::new(Timestamps {
                last_activity: now,
                last_response: now,
            }),
        }
    }

    #[inline]
    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    #[inline]
    pub fn state(&self) -> HealthState {
        self.state.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_timed_out(&self) -> bool {
        self.state() == HealthState::TimedOut
    }

    /// Records a response to an application request.
    pub fn record_activity(&self, now: Instant) {
        let mut timestamps = self.timestamps();
        timestamps.last_activity = now;
        timestamps.last_response = now;
    }

    /// Records that a heartbeat has been sent.
    pub fn heartbeat_sent(&self, now: Instant) {
        if self.transition(HealthState::Healthy, HealthState::AwaitingHeartbeatResponse) {
            self.timestamps().last_activity = now;
        }
    }

    /// Records a successful heartbeat response.
    pub fn heartbeat_succeeded(&self, now: Instant) {
        if self.transition(HealthState::AwaitingHeartbeatResponse, HealthState::Healthy) {
            self.timestamps().last_response = now;
        }
    }

    /// Records a failed heartbeat. Another one will be sent after the interval, while the idle
    /// timeout keeps running.
    pub fn heartbeat_failed(&self) {
        self.transition(HealthState::AwaitingHeartbeatResponse, HealthState::Healthy);
    }

    /// Advances the state machine to given time.
    pub fn poll(&self, now: Instant) -> HealthAction {
        let state = self.state();
        if state == HealthState::TimedOut {
            return HealthAction::Teardown;
        }

        let timestamps = self.timestamps();

        if let Some(idle_timeout) = self.config.idle_timeout() {
            if now.saturating_duration_since(timestamps.last_response) >= idle_timeout {
                self.state.store(HealthState::TimedOut, Ordering::Release);
                return HealthAction::Teardown;
            }
        }

        match self.config.interval {
            Some(interval)
                if state == HealthState::Healthy
                    && now.saturating_duration_since(timestamps.last_activity) >= interval =>
            {
                HealthAction::SendHeartbeat
            }
            _ => HealthAction::None,
        }
    }

    /// Returns the time at which [`poll`](ConnectionHealth::poll) should be called next, if
    /// ever.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.is_timed_out() {
            return None;
        }

        let timestamps = self.timestamps();
        let idle_deadline = self
            .config
            .idle_timeout()
            .map(|idle_timeout| timestamps.last_response + idle_timeout);

        let heartbeat_deadline = if self.state() == HealthState::Healthy {
            self.config
                .interval
                .map(|interval| timestamps.last_activity + interval)
        } else {
            None
        };

        match (idle_deadline, heartbeat_deadline) {
            (Some(idle_deadline), Some(heartbeat_deadline)) => {
                Some(idle_deadline.min(heartbeat_deadline))
            }
            (idle_deadline, heartbeat_deadline) => idle_deadline.or(heartbeat_deadline),
        }
    }

    fn transition(&self, from: HealthState, to: HealthState) -> bool {
        self.state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    fn timestamps(&self) -> MutexGuard<'_, Timestamps> {
        self.timestamps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Spawns a timer task driving the health of given connection. The task stops when the
/// connection goes away, breaks, or times out. A timed out connection is closed and reported to
/// `error_sender`, so the pool can replace it.
pub(crate) fn monitor_connection<T: CdrsTransport + 'static>(
    transport: Weak<T>,
    health: Arc<ConnectionHealth>,
    broadcast_rpc_address: SocketAddr,
    error_sender: mpsc::Sender<Error>,
) {
    if health.config().is_disabled() {
        return;
    }

    tokio::spawn(async move {
        while let Some(deadline) = health.next_deadline() {
            sleep_until(deadline).await;

            let transport = match transport.upgrade() {
                Some(transport) if !transport.is_broken() => transport,
                _ => break,
            };

            match health.poll(Instant::now()) {
                HealthAction::None => {}
                HealthAction::SendHeartbeat => {
                    trace!(%broadcast_rpc_address, "Sending heartbeat.");
                    health.heartbeat_sent(Instant::now());

                    // a heartbeat never waits longer than the next one would
                    let wait = health
                        .config()
                        .interval()
                        .unwrap_or(Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL));

                    match timeout(wait, transport.send_heartbeat()).await {
                        Ok(Ok(())) => health.heartbeat_succeeded(Instant::now()),
                        Ok(Err(error)) => {
                            debug!(%broadcast_rpc_address, %error, "Heartbeat failed.");
                            health.heartbeat_failed();
                        }
                        Err(_) => {
                            debug!(%broadcast_rpc_address, "Heartbeat response timed out.");
                            health.heartbeat_failed();
                        }
                    }
                }
                HealthAction::Teardown => {
                    warn!(%broadcast_rpc_address, "Connection idle timeout - closing.");
                    transport.close();

                    let _ = error_sender
                        .send(Error::HeartbeatTimeout(broadcast_rpc_address))
                        .await;
                    break;
                }
            }
        }

        trace!(%broadcast_rpc_address, "Connection health monitoring stopped.");
    });
}
