use thiserror::Error;

/// Startup failures. Nothing runs when one of these is returned.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigurationError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ConfigurationError::Invalid(message.into())
    }
}

/// Failures reported to the caller of a register operation.
///
/// None of these touch radar state: a rejected request leaves every radar exactly
/// as it was before the request arrived.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("register {address} is not inside any writable radar field")]
    Address { address: u16 },

    #[error("register {address} ({field}) is read-only")]
    ReadOnlyViolation { address: u16, field: &'static str },

    #[error("write to {field} at register {address} must cover all {width} words")]
    PartialWrite {
        address: u16,
        field: &'static str,
        width: u16,
    },

    #[error("no radar at protocol address {0}")]
    UnknownRadar(u16),
}

/// Failures that stop the simulator daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("failed to bind {service} listener on {address}: {source}")]
    Bind {
        service: &'static str,
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("simulation task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
