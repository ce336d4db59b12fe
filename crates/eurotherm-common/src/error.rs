use thiserror::Error;

/// Error kinds surfaced across the acquisition, fieldbus and RPC layers.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EurothermError {
    /// A Quantity string could not be parsed, or used the wrong dimension.
    #[error("bad unit: {0}")]
    BadUnit(String),

    /// Duplicate device name, unknown driver, or other static configuration problem.
    #[error("configuration error: {0}")]
    Config(String),

    /// A device name was not found in a running `IOManager`.
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// Modbus transport failure: timeout, CRC mismatch, or exception response.
    #[error("bus error: {0}")]
    Bus(String),

    /// A value could not be coerced into the instrument's register width.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// Client-observed RPC failure.
    #[error("rpc failed: {0}")]
    RpcFailed(String),

    /// `IOManager::start` called while the manager was already running.
    #[error("already running")]
    AlreadyRunning,

    /// An operation required a running `IOManager` that was not running.
    #[error("not running")]
    NotRunning,
}

/// Convenience alias for results across this workspace.
pub type EurothermResult<T> = Result<T, EurothermError>;
