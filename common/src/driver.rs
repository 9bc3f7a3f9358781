//! Command surfaces the connectivity core drives. Targets implement these on
//! top of their transports; completion is always reported back through
//! [`ConnectivityState`](crate::state::ConnectivityState), never through a
//! return value.

use thiserror::Error;

use crate::{
    config::WifiCredentials,
    types::{MessageId, QoS},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnqueueFailure {
    #[error("session has not been started")]
    NotStarted,
    #[error("outbound queue rejected message: {0}")]
    Rejected(String),
}

pub trait NetworkDriver {
    /// Requests the transport to associate. Must not block and must tolerate
    /// being called while an earlier attempt is still in flight.
    fn begin_association(&mut self, credentials: &WifiCredentials);

    fn is_associated(&self) -> bool;
}

pub trait SessionDriver {
    fn start_session(&mut self);

    fn stop_session(&mut self);

    fn enqueue(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<MessageId, EnqueueFailure>;
}

pub trait InputLine {
    fn read_line(&mut self) -> bool;
}

pub trait OutputLine {
    fn write_line(&mut self, level: bool);
}

pub trait Delay {
    fn delay_ms(&mut self, ms: u64);
}
