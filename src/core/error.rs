use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// A computation has no real-valued answer for the given inputs,
    /// e.g. compounding an annual rate at or below -100%.
    #[error("undefined computation: {message}")]
    DomainUndefined { message: String },

    #[error("{what} of {requested} exceeds the configured limit of {limit}")]
    ResourceExceeded {
        what: &'static str,
        requested: u64,
        limit: u64,
    },
}

impl EngineError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn domain_undefined(message: impl Into<String>) -> Self {
        Self::DomainUndefined {
            message: message.into(),
        }
    }

    pub fn resource_exceeded(what: &'static str, requested: u64, limit: u64) -> Self {
        Self::ResourceExceeded {
            what,
            requested,
            limit,
        }
    }
}
