use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CheckError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("inference endpoint returned {status}: {message}")]
    RemoteService { status: u16, message: String },
    #[error("network failure: {message}")]
    Network { message: String, timed_out: bool },
    #[error("the plan text is empty")]
    EmptyInput,
    #[error("invalid {name}: {message}")]
    InvalidParameter { name: &'static str, message: String },
}

impl CheckError {
    /// Stable snake_case code used in API payloads and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "authentication_error",
            Self::RemoteService { .. } => "remote_service_error",
            Self::Network { .. } => "network_error",
            Self::EmptyInput => "empty_input",
            Self::InvalidParameter { .. } => "invalid_parameter",
        }
    }

    pub fn remote(status: u16, message: impl Into<String>) -> Self {
        Self::RemoteService {
            status,
            message: message.into(),
        }
    }
}
