//! Scripted transports on a virtual clock for exercising the control loop.

use std::{cell::RefCell, collections::VecDeque, rc::Rc, sync::Arc};

use crate::{
    config::WifiCredentials,
    driver::{Delay, EnqueueFailure, InputLine, NetworkDriver, OutputLine, SessionDriver},
    state::ConnectivityState,
    types::{MessageId, NetworkEvent, QoS, SessionEvent, SessionStatus},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scripted {
    Network(NetworkEvent),
    Session(SessionEvent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    BeginAssociation { ssid: String },
    StartSession,
    StopSession,
    Enqueue {
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
        session: SessionStatus,
    },
}

pub(crate) struct World {
    pub now_ms: u64,
    pub state: Arc<ConnectivityState>,
    pub calls: Vec<Call>,
    pending: Vec<(u64, Scripted)>,
}

impl World {
    pub fn new(state: Arc<ConnectivityState>) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            now_ms: 0,
            state,
            calls: Vec::new(),
            pending: Vec::new(),
        }))
    }

    /// Schedules an event `after_ms` from the current virtual time.
    pub fn schedule(&mut self, after_ms: u64, event: Scripted) {
        let at = self.now_ms.saturating_add(after_ms);
        self.pending.push((at, event));
    }

    pub fn advance(&mut self, ms: u64) {
        self.now_ms = self.now_ms.saturating_add(ms);
        let now = self.now_ms;
        let mut due: Vec<(u64, Scripted)> = Vec::new();
        self.pending.retain(|entry| {
            if entry.0 <= now {
                due.push(*entry);
                false
            } else {
                true
            }
        });
        due.sort_by_key(|entry| entry.0);

        for (_, event) in due {
            match event {
                Scripted::Network(event) => self.state.record_network_event(event),
                Scripted::Session(event) => self.state.record_session_event(event),
            }
        }
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|call| predicate(call)).count()
    }

    pub fn begin_count(&self) -> usize {
        self.count(|call| matches!(call, Call::BeginAssociation { .. }))
    }

    pub fn start_count(&self) -> usize {
        self.count(|call| matches!(call, Call::StartSession))
    }

    pub fn stop_count(&self) -> usize {
        self.count(|call| matches!(call, Call::StopSession))
    }

    pub fn enqueues(&self) -> Vec<Call> {
        self.calls
            .iter()
            .filter(|call| matches!(call, Call::Enqueue { .. }))
            .cloned()
            .collect()
    }
}

pub(crate) type SharedWorld = Rc<RefCell<World>>;

/// Replies to each `begin_association` with the next script, if any.
pub(crate) struct FakeNetwork {
    pub world: SharedWorld,
    pub replies: VecDeque<Vec<(u64, NetworkEvent)>>,
}

impl FakeNetwork {
    pub fn new(world: &SharedWorld) -> Self {
        Self {
            world: world.clone(),
            replies: VecDeque::new(),
        }
    }

    pub fn reply(mut self, script: Vec<(u64, NetworkEvent)>) -> Self {
        self.replies.push_back(script);
        self
    }
}

impl NetworkDriver for FakeNetwork {
    fn begin_association(&mut self, credentials: &WifiCredentials) {
        let mut world = self.world.borrow_mut();
        world.calls.push(Call::BeginAssociation {
            ssid: credentials.ssid.clone(),
        });
        if let Some(script) = self.replies.pop_front() {
            for (after_ms, event) in script {
                world.schedule(after_ms, Scripted::Network(event));
            }
        }
    }

    fn is_associated(&self) -> bool {
        self.world.borrow().state.snapshot().has_address()
    }
}

/// Replies to each `start_session` with the next script and answers
/// `enqueue` from a queue of outcomes (success when empty).
pub(crate) struct FakeSession {
    pub world: SharedWorld,
    pub replies: VecDeque<Vec<(u64, SessionEvent)>>,
    pub outcomes: VecDeque<Result<(), EnqueueFailure>>,
    next_id: MessageId,
}

impl FakeSession {
    pub fn new(world: &SharedWorld) -> Self {
        Self {
            world: world.clone(),
            replies: VecDeque::new(),
            outcomes: VecDeque::new(),
            next_id: 1,
        }
    }

    pub fn reply(mut self, script: Vec<(u64, SessionEvent)>) -> Self {
        self.replies.push_back(script);
        self
    }

    pub fn fail_next_enqueue(mut self) -> Self {
        self.outcomes
            .push_back(Err(EnqueueFailure::Rejected("link down".to_string())));
        self
    }
}

impl SessionDriver for FakeSession {
    fn start_session(&mut self) {
        let mut world = self.world.borrow_mut();
        world.calls.push(Call::StartSession);
        if let Some(script) = self.replies.pop_front() {
            for (after_ms, event) in script {
                world.schedule(after_ms, Scripted::Session(event));
            }
        }
    }

    fn stop_session(&mut self) {
        self.world.borrow_mut().calls.push(Call::StopSession);
    }

    fn enqueue(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<MessageId, EnqueueFailure> {
        let mut world = self.world.borrow_mut();
        let session = world.state.snapshot().session;
        world.calls.push(Call::Enqueue {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retain,
            session,
        });

        match self.outcomes.pop_front() {
            Some(Err(err)) => Err(err),
            Some(Ok(())) | None => {
                let id = self.next_id;
                self.next_id = self.next_id.wrapping_add(1);
                Ok(id)
            }
        }
    }
}

pub(crate) struct FakeDelay {
    pub world: SharedWorld,
}

impl FakeDelay {
    pub fn new(world: &SharedWorld) -> Self {
        Self {
            world: world.clone(),
        }
    }
}

impl Delay for FakeDelay {
    fn delay_ms(&mut self, ms: u64) {
        self.world.borrow_mut().advance(ms);
    }
}

/// Plays back levels one read at a time and then holds the last one.
pub(crate) struct ScriptedInput {
    levels: VecDeque<bool>,
    last: bool,
}

impl ScriptedInput {
    pub fn new(levels: &[bool]) -> Self {
        Self {
            levels: levels.iter().copied().collect(),
            last: false,
        }
    }
}

impl InputLine for ScriptedInput {
    fn read_line(&mut self) -> bool {
        if let Some(level) = self.levels.pop_front() {
            self.last = level;
        }
        self.last
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingLine {
    pub writes: Vec<bool>,
}

impl OutputLine for RecordingLine {
    fn write_line(&mut self, level: bool) {
        self.writes.push(level);
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingDelay {
    pub sleeps: Vec<u64>,
}

impl Delay for RecordingDelay {
    fn delay_ms(&mut self, ms: u64) {
        self.sleeps.push(ms);
    }
}
