pub mod config;
pub mod connectivity;
pub mod driver;
pub mod failure;
pub mod indicator;
pub mod input;
pub mod publisher;
pub mod state;
pub mod topics;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{
    ButtonConfig, ConfigError, ConnectivityConfig, IndicatorConfig, NetworkConfig, RuntimeConfig,
    WifiCredentials,
};
pub use connectivity::{ConnectivityMachine, Phase};
pub use driver::{Delay, EnqueueFailure, InputLine, NetworkDriver, OutputLine, SessionDriver};
pub use failure::{escalate, failure_pattern};
pub use indicator::{BlinkPattern, DoorAlarm, FailureIndicator, Led, PublishPulser};
pub use input::{Debouncer, InputSampler, SampledLevel};
pub use publisher::{InputEdgePublisher, PublishOutcome};
pub use state::ConnectivityState;
pub use topics::*;
pub use types::{
    FailureKind, LinkSnapshot, MessageId, NetworkEvent, NetworkStatus, QoS, SessionEvent,
    SessionFault, SessionStatus,
};
