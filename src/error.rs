use thiserror::Error;

/// Invalid configuration, reported once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: u64,
        max: u64,
        value: u64,
    },

    #[error("{0} cannot be empty")]
    Empty(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Refused,
    Disconnected,
    Protocol,
    /// controller answered with a Modbus exception code
    Exception(u8),
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Refused => write!(f, "refused"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Protocol => write!(f, "protocol"),
            Self::Exception(code) => write!(f, "exception {:#04x}", code),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transport {kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn refused(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Refused, message)
    }

    pub fn disconnected(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Disconnected, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Protocol, message)
    }

    /// Whether the session survived this error. Only exception replies
    /// leave the connection usable.
    pub fn keeps_session(&self) -> bool {
        matches!(self.kind, TransportErrorKind::Exception(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("{0} is not supported by this configuration")]
    Unsupported(String),

    #[error("invalid command: {0}")]
    Invalid(String),

    #[error("controller is configured read-only")]
    ReadOnly,

    #[error("controller rejected write to register {address}: exception {code:#04x}")]
    Rejected { address: u16, code: u8 },

    #[error(transparent)]
    Transport(#[from] TransportError),
}
