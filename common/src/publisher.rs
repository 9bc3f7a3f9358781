use log::{info, warn};

use crate::{
    driver::{InputLine, SessionDriver},
    state::ConnectivityState,
    types::{MessageId, QoS},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Unchanged,
    /// Level moved away from the released polarity; nothing is sent.
    Pressed,
    Published(MessageId),
    /// The transport refused the message; the session has been marked down.
    SessionLost,
}

/// Emits one retained message each time the button returns to its released
/// level. Never retries: a refused enqueue is handed back to the connectivity
/// loop as a lost session.
pub struct InputEdgePublisher<I> {
    input: I,
    topic: String,
    payload: Vec<u8>,
    released_level: bool,
}

impl<I: InputLine> InputEdgePublisher<I> {
    pub fn new(input: I, topic: String, payload: Vec<u8>, released_level: bool) -> Self {
        Self {
            input,
            topic,
            payload,
            released_level,
        }
    }

    pub fn poll<S: SessionDriver>(
        &mut self,
        state: &ConnectivityState,
        session: &mut S,
    ) -> PublishOutcome {
        let level = self.input.read_line();
        if level == state.input_level() {
            return PublishOutcome::Unchanged;
        }

        state.set_input_level(level);
        if level != self.released_level {
            return PublishOutcome::Pressed;
        }

        match session.enqueue(&self.topic, &self.payload, QoS::AtMostOnce, true) {
            Ok(id) => {
                info!("button released; queued message {id} on `{}`", self.topic);
                state.set_pending_notify();
                PublishOutcome::Published(id)
            }
            Err(err) => {
                warn!("button publish failed ({err}); forcing session reconnect");
                state.force_session_disconnected();
                PublishOutcome::SessionLost
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        config::RuntimeConfig,
        input::{InputSampler, SampledLevel},
        testing::{Call, FakeSession, RecordingDelay, ScriptedInput, World},
        types::{NetworkEvent, SessionEvent, SessionStatus},
    };

    fn online_state() -> Arc<ConnectivityState> {
        let state = Arc::new(ConnectivityState::new(false));
        state.record_network_event(NetworkEvent::AddressAcquired);
        state.record_session_event(SessionEvent::Connected);
        state
    }

    fn publisher(levels: &[bool]) -> InputEdgePublisher<ScriptedInput> {
        InputEdgePublisher::new(
            ScriptedInput::new(levels),
            "button/hall/event".to_string(),
            b"pressed".to_vec(),
            false,
        )
    }

    #[test]
    fn publishes_once_per_release() {
        let state = online_state();
        let world = World::new(state.clone());
        let mut session = FakeSession::new(&world);
        let mut publisher = publisher(&[false, true, true, true, false, false, true, false]);

        let outcomes: Vec<PublishOutcome> = (0..8)
            .map(|_| publisher.poll(&state, &mut session))
            .collect();

        assert_eq!(
            outcomes,
            vec![
                PublishOutcome::Unchanged,
                PublishOutcome::Pressed,
                PublishOutcome::Unchanged,
                PublishOutcome::Unchanged,
                PublishOutcome::Published(1),
                PublishOutcome::Unchanged,
                PublishOutcome::Pressed,
                PublishOutcome::Published(2),
            ]
        );
        assert_eq!(world.borrow().enqueues().len(), 2);
    }

    #[test]
    fn enqueues_retained_at_most_once() {
        let state = online_state();
        let world = World::new(state.clone());
        let mut session = FakeSession::new(&world);
        let mut publisher = publisher(&[true, false]);

        publisher.poll(&state, &mut session);
        publisher.poll(&state, &mut session);

        assert_eq!(
            world.borrow().enqueues(),
            vec![Call::Enqueue {
                topic: "button/hall/event".to_string(),
                payload: b"pressed".to_vec(),
                qos: QoS::AtMostOnce,
                retain: true,
                session: SessionStatus::Connected,
            }]
        );
        assert!(state.take_pending_notify());
    }

    #[test]
    fn failed_enqueue_downgrades_session_without_retry() {
        let state = online_state();
        let world = World::new(state.clone());
        let mut session = FakeSession::new(&world).fail_next_enqueue();
        let mut publisher = publisher(&[true, false, false]);

        assert_eq!(publisher.poll(&state, &mut session), PublishOutcome::Pressed);
        assert_eq!(publisher.poll(&state, &mut session), PublishOutcome::SessionLost);
        assert_eq!(publisher.poll(&state, &mut session), PublishOutcome::Unchanged);

        assert_eq!(state.snapshot().session, SessionStatus::Disconnected);
        assert_eq!(world.borrow().enqueues().len(), 1);
        assert!(!state.take_pending_notify());
    }

    #[test]
    fn honours_active_low_wiring() {
        let state = Arc::new(ConnectivityState::new(true));
        state.record_network_event(NetworkEvent::AddressAcquired);
        state.record_session_event(SessionEvent::Connected);
        let world = World::new(state.clone());
        let mut session = FakeSession::new(&world);
        let mut publisher = InputEdgePublisher::new(
            ScriptedInput::new(&[true, false, true]),
            "button/hall/event".to_string(),
            b"pressed".to_vec(),
            true,
        );

        assert_eq!(publisher.poll(&state, &mut session), PublishOutcome::Unchanged);
        assert_eq!(publisher.poll(&state, &mut session), PublishOutcome::Pressed);
        assert_eq!(publisher.poll(&state, &mut session), PublishOutcome::Published(1));
    }

    #[test]
    fn sanitized_timing_publishes_the_shortest_debounced_click() {
        let mut runtime = RuntimeConfig::default();
        runtime.button.sample_interval_ms = 5;
        runtime.button.stable_samples = 1;
        runtime.connectivity.steady_interval_ms = 40;
        runtime.sanitize();
        let button = &runtime.button;
        let steady_ms = runtime.connectivity.steady_interval_ms;

        // Press starts just after a poll and lasts only as long as debouncing allows.
        let mut raw = vec![false, false];
        raw.extend(std::iter::repeat(true).take(usize::from(button.stable_samples)));
        raw.push(false);

        let level = SampledLevel::new(false);
        let mut sampler = InputSampler::new(
            ScriptedInput::new(&raw),
            RecordingDelay::default(),
            level.clone(),
            button.sample_interval_ms,
            button.stable_samples,
        );
        let state = online_state();
        let world = World::new(state.clone());
        let mut session = FakeSession::new(&world);
        let mut publisher = InputEdgePublisher::new(
            level,
            "button/hall/event".to_string(),
            b"pressed".to_vec(),
            false,
        );

        let mut now_ms = 0;
        while now_ms < 400 {
            sampler.sample_once();
            if now_ms % steady_ms == 0 {
                publisher.poll(&state, &mut session);
            }
            now_ms += button.sample_interval_ms;
        }

        assert_eq!(world.borrow().enqueues().len(), 1);
    }
}
