//! The per-(customer, supplier) connector state machine.
//!
//! ```text
//! AtStartup → Offline → Request → Connected ⇄ Disconnected
//!                          ↓
//!                       Refused (terminal)
//! ```
//!
//! The machine is a pure transition function: `(state, event)` yields the
//! next state plus a list of actions. Actions are requests to whoever
//! drives the machine (send this packet, arm that timer); the machine
//! never touches the network itself. At most one connector exists per
//! (customer, supplier) pair — the controller's arena enforces it.

use std::time::Duration;

use garner_types::IdUrl;
use rand::Rng;
use tracing::debug;

/// Connector states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectorState {
    /// Created, nothing decided yet.
    AtStartup,
    /// No service requested; the resting state.
    Offline,
    /// `RequestService` sent, waiting for the answer.
    Request,
    /// Service granted; liveness pings run.
    Connected,
    /// Lost contact; retrying with backoff.
    Disconnected,
    /// Service refused; terminal until the supplier is replaced.
    Refused,
}

/// Events fed into the machine by its driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectorEvent {
    /// Ask the supplier to start providing storage.
    Connect,
    /// The supplier granted the service.
    ServiceAccepted,
    /// The supplier refused the service.
    ServiceRejected,
    /// A request or ping went unanswered.
    Timeout,
    /// A liveness ping was answered.
    PingOk,
    /// A liveness ping failed.
    PingFailed,
    /// Ask the supplier to stop providing storage.
    Disconnect,
    /// The supplier acknowledged the cancellation.
    CancelAcked,
    /// The retry backoff timer fired.
    RetryTimer,
}

/// Actions the machine asks its driver to perform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectorAction {
    /// Send `RequestService(service_supplier)` to the supplier.
    SendRequestService,
    /// Send `CancelService` to the supplier.
    SendCancelService,
    /// Arm the periodic liveness ping.
    SchedulePing,
    /// Arm a retry after the given backoff.
    ScheduleRetry(Duration),
    /// Tell the controller the state changed.
    PublishState(ConnectorState),
}

/// Tuning knobs of one connector.
#[derive(Clone, Debug)]
pub struct ConnectorConfig {
    /// Consecutive ping failures that drop the connection.
    pub ping_failure_threshold: u32,
    /// First retry backoff; doubles per attempt.
    pub base_backoff: Duration,
    /// Backoff cap.
    pub max_backoff: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            ping_failure_threshold: 3,
            base_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(300),
        }
    }
}

/// One supplier relation of one customer.
#[derive(Debug)]
pub struct SupplierConnector {
    supplier: IdUrl,
    state: ConnectorState,
    config: ConnectorConfig,
    ping_failures: u32,
    retry_attempt: u32,
}

impl SupplierConnector {
    /// Create a connector for a supplier, in `AtStartup`.
    pub fn new(supplier: IdUrl, config: ConnectorConfig) -> Self {
        Self {
            supplier,
            state: ConnectorState::AtStartup,
            config,
            ping_failures: 0,
            retry_attempt: 0,
        }
    }

    /// The supplier this connector manages.
    pub fn supplier(&self) -> &IdUrl {
        &self.supplier
    }

    /// Current state.
    pub fn state(&self) -> ConnectorState {
        self.state
    }

    /// Feed one event; returns the actions the driver must perform.
    pub fn handle(&mut self, event: ConnectorEvent) -> Vec<ConnectorAction> {
        use ConnectorEvent as E;
        use ConnectorState as S;

        let before = self.state;
        let mut actions = Vec::new();

        match (self.state, event) {
            (S::AtStartup, E::Connect) | (S::Offline, E::Connect) => {
                self.state = S::Request;
                actions.push(ConnectorAction::SendRequestService);
            }
            (S::Request, E::ServiceAccepted) => {
                self.state = S::Connected;
                self.ping_failures = 0;
                self.retry_attempt = 0;
                actions.push(ConnectorAction::SchedulePing);
            }
            (S::Request, E::ServiceRejected) => {
                self.state = S::Refused;
            }
            (S::Request, E::Timeout) => {
                self.state = S::Disconnected;
                actions.push(ConnectorAction::ScheduleRetry(self.next_backoff()));
            }
            (S::Connected, E::PingOk) => {
                self.ping_failures = 0;
                actions.push(ConnectorAction::SchedulePing);
            }
            (S::Connected, E::PingFailed) | (S::Connected, E::Timeout) => {
                self.ping_failures += 1;
                if self.ping_failures >= self.config.ping_failure_threshold {
                    self.state = S::Disconnected;
                    actions.push(ConnectorAction::ScheduleRetry(self.next_backoff()));
                } else {
                    actions.push(ConnectorAction::SchedulePing);
                }
            }
            (S::Connected, E::Disconnect) => {
                actions.push(ConnectorAction::SendCancelService);
            }
            (S::Connected, E::CancelAcked) | (S::Request, E::CancelAcked) => {
                self.state = S::Offline;
            }
            (S::Disconnected, E::RetryTimer) | (S::Disconnected, E::Connect) => {
                self.state = S::Request;
                actions.push(ConnectorAction::SendRequestService);
            }
            (S::Disconnected, E::Disconnect) => {
                self.state = S::Offline;
                self.retry_attempt = 0;
            }
            _ => {
                debug!(
                    supplier = %self.supplier,
                    state = ?self.state,
                    event = ?event,
                    "connector event ignored"
                );
            }
        }

        if self.state != before {
            actions.push(ConnectorAction::PublishState(self.state));
        }
        actions
    }

    /// Exponential backoff with jitter, capped.
    fn next_backoff(&mut self) -> Duration {
        let exp = self.retry_attempt.min(16);
        self.retry_attempt += 1;
        let base = self
            .config
            .base_backoff
            .saturating_mul(1u32 << exp.min(16))
            .min(self.config.max_backoff);
        let jitter = rand::thread_rng().gen_range(0.0..0.25);
        base.mul_f64(1.0 + jitter).min(self.config.max_backoff)
    }
}
