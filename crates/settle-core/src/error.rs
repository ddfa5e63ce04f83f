use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettleError {
    /// The config file or environment could not be read or parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Config parsed but holds a value the queue cannot run with.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SettleError {
    /// Short, stable error code for CLI output and structured logs.
    pub fn code(&self) -> &'static str {
        match self {
            SettleError::Config(_) => "CONFIG_ERROR",
            SettleError::InvalidConfig(_) => "INVALID_CONFIG",
        }
    }
}

pub type Result<T> = std::result::Result<T, SettleError>;
