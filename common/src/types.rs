pub type MessageId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    NotStarted,
    Started,
    Associated,
    Disconnected,
    AddressAcquired,
}

impl NetworkStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "NOT_STARTED",
            Self::Started => "STARTED",
            Self::Associated => "ASSOCIATED",
            Self::Disconnected => "DISCONNECTED",
            Self::AddressAcquired => "ADDRESS_ACQUIRED",
        }
    }

    pub(crate) fn to_bits(self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::Started => 1,
            Self::Associated => 2,
            Self::Disconnected => 3,
            Self::AddressAcquired => 4,
        }
    }

    pub(crate) fn from_bits(bits: u8) -> Self {
        match bits {
            0 => Self::NotStarted,
            1 => Self::Started,
            2 => Self::Associated,
            4 => Self::AddressAcquired,
            _ => Self::Disconnected,
        }
    }
}

/// Why the broker session last failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFault {
    /// Transport loss or an event this node never expects (subscribe acks, inbound data).
    Transport,
    /// The broker answered and refused the session (bad credentials, not authorized).
    Refused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Disconnected,
    Connected,
    Error(SessionFault),
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connected => "CONNECTED",
            Self::Error(SessionFault::Transport) => "ERROR",
            Self::Error(SessionFault::Refused) => "REFUSED",
        }
    }

    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    pub(crate) fn to_bits(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connected => 1,
            Self::Error(SessionFault::Transport) => 2,
            Self::Error(SessionFault::Refused) => 3,
        }
    }

    pub(crate) fn from_bits(bits: u8) -> Self {
        match bits {
            1 => Self::Connected,
            2 => Self::Error(SessionFault::Transport),
            3 => Self::Error(SessionFault::Refused),
            _ => Self::Disconnected,
        }
    }
}

/// Status notification delivered by the wireless transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    Started,
    Associated,
    Disconnected,
    AddressAcquired,
}

impl NetworkEvent {
    pub fn status(self) -> NetworkStatus {
        match self {
            Self::Started => NetworkStatus::Started,
            Self::Associated => NetworkStatus::Associated,
            Self::Disconnected => NetworkStatus::Disconnected,
            Self::AddressAcquired => NetworkStatus::AddressAcquired,
        }
    }
}

/// Status notification delivered by the MQTT client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    Refused,
    Error,
}

impl SessionEvent {
    pub fn status(self) -> SessionStatus {
        match self {
            Self::Connected => SessionStatus::Connected,
            Self::Disconnected => SessionStatus::Disconnected,
            Self::Refused => SessionStatus::Error(SessionFault::Refused),
            Self::Error => SessionStatus::Error(SessionFault::Transport),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// Terminal outcome of the connectivity loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    NoNetwork,
    NoSessionUnreachable,
    NoSessionAuth,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoNetwork => "NO_NETWORK",
            Self::NoSessionUnreachable => "NO_SESSION_UNREACHABLE",
            Self::NoSessionAuth => "NO_SESSION_AUTH",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub network: NetworkStatus,
    pub session: SessionStatus,
}

impl LinkSnapshot {
    pub fn has_address(&self) -> bool {
        self.network == NetworkStatus::AddressAcquired
    }

    /// Session is only trusted while the network still holds an address.
    pub fn is_online(&self) -> bool {
        self.has_address() && self.session.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_bits_cover_every_variant() {
        let network = [
            NetworkStatus::NotStarted,
            NetworkStatus::Started,
            NetworkStatus::Associated,
            NetworkStatus::Disconnected,
            NetworkStatus::AddressAcquired,
        ];
        for status in network {
            assert_eq!(NetworkStatus::from_bits(status.to_bits()), status);
        }

        let session = [
            SessionStatus::Disconnected,
            SessionStatus::Connected,
            SessionStatus::Error(SessionFault::Transport),
            SessionStatus::Error(SessionFault::Refused),
        ];
        for status in session {
            assert_eq!(SessionStatus::from_bits(status.to_bits()), status);
        }
    }

    #[test]
    fn unknown_bits_read_as_disconnected() {
        assert_eq!(NetworkStatus::from_bits(200), NetworkStatus::Disconnected);
        assert_eq!(SessionStatus::from_bits(200), SessionStatus::Disconnected);
    }

    #[test]
    fn connected_session_without_address_is_not_online() {
        let snapshot = LinkSnapshot {
            network: NetworkStatus::Associated,
            session: SessionStatus::Connected,
        };
        assert!(!snapshot.is_online());
    }
}
