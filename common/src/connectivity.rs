use std::sync::Arc;

use log::{info, warn};

use crate::{
    config::{ConnectivityConfig, WifiCredentials},
    driver::{Delay, InputLine, NetworkDriver, SessionDriver},
    publisher::{InputEdgePublisher, PublishOutcome},
    state::ConnectivityState,
    types::{FailureKind, SessionFault, SessionStatus},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Associating,
    /// `restart` tears the current session down before starting it again,
    /// used when the transport refused data while still claiming a session.
    AwaitingSession { restart: bool },
    SessionActive,
    TerminalFailure(FailureKind),
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Associating => "ASSOCIATING",
            Self::AwaitingSession { .. } => "AWAITING_SESSION",
            Self::SessionActive => "SESSION_ACTIVE",
            Self::TerminalFailure(_) => "TERMINAL_FAILURE",
        }
    }
}

/// Sequences association, session start and the steady publish loop using
/// flat poll-and-sleep budgets. Link status is only ever read here.
pub struct ConnectivityMachine<N, S, I, D> {
    config: ConnectivityConfig,
    credentials: WifiCredentials,
    state: Arc<ConnectivityState>,
    network: N,
    session: S,
    publisher: InputEdgePublisher<I>,
    delay: D,
}

impl<N, S, I, D> ConnectivityMachine<N, S, I, D>
where
    N: NetworkDriver,
    S: SessionDriver,
    I: InputLine,
    D: Delay,
{
    pub fn new(
        config: ConnectivityConfig,
        credentials: WifiCredentials,
        state: Arc<ConnectivityState>,
        network: N,
        session: S,
        publisher: InputEdgePublisher<I>,
        delay: D,
    ) -> Self {
        Self {
            config,
            credentials,
            state,
            network,
            session,
            publisher,
            delay,
        }
    }

    pub fn state(&self) -> &ConnectivityState {
        &self.state
    }

    /// Drives the machine until it reaches a terminal failure. Returns only
    /// then; the caller hands the kind to failure escalation.
    pub fn run(&mut self) -> FailureKind {
        let mut phase = Phase::Associating;
        loop {
            let next = self.step(phase);
            if next != phase {
                info!("connectivity {} -> {}", phase.as_str(), next.as_str());
            }
            if let Phase::TerminalFailure(kind) = next {
                return kind;
            }
            phase = next;
        }
    }

    pub fn step(&mut self, phase: Phase) -> Phase {
        match phase {
            Phase::Associating => self.associate(),
            Phase::AwaitingSession { restart } => self.await_session(restart),
            Phase::SessionActive => self.serve(),
            Phase::TerminalFailure(kind) => Phase::TerminalFailure(kind),
        }
    }

    fn associate(&mut self) -> Phase {
        let snapshot = self.state.snapshot();
        if snapshot.has_address() {
            self.state.mark_associated();
            return if snapshot.session.is_connected() {
                Phase::SessionActive
            } else {
                Phase::AwaitingSession { restart: false }
            };
        }

        let attempt = self.state.note_association_attempt();
        info!(
            "associating with `{}` (attempt {attempt}, budget {}ms)",
            self.credentials.ssid,
            self.config.association_budget_ms()
        );
        self.network.begin_association(&self.credentials);

        for _ in 0..self.config.association_attempts {
            self.delay.delay_ms(self.config.poll_interval_ms);
            if self.state.snapshot().has_address() {
                self.state.mark_associated();
                info!("network address acquired");
                return Phase::AwaitingSession { restart: false };
            }
        }

        if self.state.ever_associated() {
            warn!(
                "association wait expired after previous success (transport associated={}); restarting",
                self.network.is_associated()
            );
            Phase::Associating
        } else {
            warn!(
                "association wait expired without ever acquiring an address (transport associated={})",
                self.network.is_associated()
            );
            Phase::TerminalFailure(FailureKind::NoNetwork)
        }
    }

    fn await_session(&mut self, restart: bool) -> Phase {
        if restart {
            info!("restarting broker session");
            self.session.stop_session();
        }
        self.session.start_session();

        for _ in 0..self.config.session_attempts {
            self.delay.delay_ms(self.config.poll_interval_ms);
            let snapshot = self.state.snapshot();
            if !snapshot.has_address() {
                warn!("network lost while waiting for broker session");
                return Phase::Associating;
            }
            if snapshot.session.is_connected() {
                info!("broker session established");
                return Phase::SessionActive;
            }
        }

        let last = self.state.snapshot().session;
        warn!(
            "broker session wait expired after {}ms (last status {})",
            self.config.session_budget_ms(),
            last.as_str()
        );
        Phase::TerminalFailure(session_failure_kind(last))
    }

    fn serve(&mut self) -> Phase {
        let snapshot = self.state.snapshot();
        if !snapshot.is_online() {
            if !snapshot.has_address() {
                warn!("network lost while session active");
                return Phase::Associating;
            }
            warn!("broker session lost ({})", snapshot.session.as_str());
            return Phase::AwaitingSession { restart: false };
        }

        if self.publisher.poll(&self.state, &mut self.session) == PublishOutcome::SessionLost {
            return Phase::AwaitingSession { restart: true };
        }

        self.delay.delay_ms(self.config.steady_interval_ms);
        Phase::SessionActive
    }
}

/// Picks the terminal kind for an expired session wait from the last
/// reported session status.
pub fn session_failure_kind(last: SessionStatus) -> FailureKind {
    match last {
        SessionStatus::Error(SessionFault::Refused) => FailureKind::NoSessionAuth,
        _ => FailureKind::NoSessionUnreachable,
    }
}
