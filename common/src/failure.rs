use log::error;

use crate::{
    driver::{Delay, OutputLine},
    indicator::{BlinkPattern, FailureIndicator},
    state::ConnectivityState,
    types::FailureKind,
};

pub fn failure_pattern(kind: FailureKind) -> BlinkPattern {
    match kind {
        FailureKind::NoNetwork => BlinkPattern {
            toggle_ms: 5,
            toggles: 20,
            rest_ms: 1_000,
        },
        FailureKind::NoSessionUnreachable => BlinkPattern {
            toggle_ms: 20,
            toggles: 20,
            rest_ms: 1_000,
        },
        FailureKind::NoSessionAuth => BlinkPattern {
            toggle_ms: 500,
            toggles: 4,
            rest_ms: 1_000,
        },
    }
}

/// Hands a terminal connectivity outcome to the failure indicator.
pub fn escalate<O: OutputLine, D: Delay>(
    kind: FailureKind,
    state: &ConnectivityState,
    indicator: FailureIndicator<O, D>,
) -> ! {
    let snapshot = state.snapshot();
    error!(
        "connectivity gave up: {} (network {}, session {}, {} association attempt(s))",
        kind.as_str(),
        snapshot.network.as_str(),
        snapshot.session.as_str(),
        state.association_attempts()
    );
    indicator.enter_failure_mode(kind, failure_pattern(kind))
}
