use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use log::debug;

use crate::types::{LinkSnapshot, NetworkEvent, NetworkStatus, SessionEvent, SessionStatus};

/// Link status shared between transport callbacks, the control loop and the
/// indicator thread. Every field is its own atomic; there is no lock to hold.
#[derive(Debug)]
pub struct ConnectivityState {
    network_status: AtomicU8,
    session_status: AtomicU8,
    ever_associated: AtomicBool,
    association_attempt_count: AtomicU32,
    input_level: AtomicBool,
    pending_notify: AtomicBool,
}

impl ConnectivityState {
    pub fn new(released_level: bool) -> Self {
        Self {
            network_status: AtomicU8::new(NetworkStatus::Disconnected.to_bits()),
            session_status: AtomicU8::new(SessionStatus::Disconnected.to_bits()),
            ever_associated: AtomicBool::new(false),
            association_attempt_count: AtomicU32::new(0),
            input_level: AtomicBool::new(released_level),
            pending_notify: AtomicBool::new(false),
        }
    }

    pub fn record_network_event(&self, event: NetworkEvent) {
        let status = event.status();
        self.network_status.store(status.to_bits(), Ordering::SeqCst);
        debug!("network status -> {}", status.as_str());
    }

    pub fn record_session_event(&self, event: SessionEvent) {
        let status = event.status();
        self.session_status.store(status.to_bits(), Ordering::SeqCst);
        debug!("session status -> {}", status.as_str());
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            network: NetworkStatus::from_bits(self.network_status.load(Ordering::SeqCst)),
            session: SessionStatus::from_bits(self.session_status.load(Ordering::SeqCst)),
        }
    }

    /// Local downgrade after the transport refused outbound data before any
    /// disconnect notification arrived.
    pub fn force_session_disconnected(&self) {
        self.record_session_event(SessionEvent::Disconnected);
    }

    pub fn ever_associated(&self) -> bool {
        self.ever_associated.load(Ordering::SeqCst)
    }

    pub fn mark_associated(&self) {
        self.ever_associated.store(true, Ordering::SeqCst);
    }

    /// Returns the attempt number just started.
    pub fn note_association_attempt(&self) -> u32 {
        self.association_attempt_count
            .fetch_add(1, Ordering::Relaxed)
            .saturating_add(1)
    }

    pub fn association_attempts(&self) -> u32 {
        self.association_attempt_count.load(Ordering::Relaxed)
    }

    pub fn input_level(&self) -> bool {
        self.input_level.load(Ordering::SeqCst)
    }

    pub fn set_input_level(&self, level: bool) {
        self.input_level.store(level, Ordering::SeqCst);
    }

    pub fn set_pending_notify(&self) {
        self.pending_notify.store(true, Ordering::SeqCst);
    }

    /// Consumes the pending publish notification, if any.
    pub fn take_pending_notify(&self) -> bool {
        self.pending_notify.swap(false, Ordering::SeqCst)
    }
}

impl Default for ConnectivityState {
    fn default() -> Self {
        Self::new(false)
    }
}
