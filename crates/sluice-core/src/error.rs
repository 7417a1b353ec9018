use thiserror::Error;

/// Core error type for the Sluice engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A definition or instance could not be found
    #[error("Not found: {0}")]
    NotFound(String),

    /// The instance status does not permit the requested operation
    #[error("Invalid status transition: {0}")]
    InvalidTransition(String),

    /// No outgoing transition matched the instance context
    #[error("No matching transition: {0}")]
    NoMatchingTransition(String),

    /// Not all expected branches arrived at a synchronization activity in time
    #[error("Partial join timeout: {0}")]
    PartialJoinTimeout(String),

    /// A ReRun directive exceeded the configured retry budget
    #[error("Fatal retry budget exceeded: {0}")]
    FatalRetryExceeded(String),

    /// A function invocation failed at the engine level
    #[error("Function execution error: {0}")]
    FunctionExecutionError(String),

    /// The persistence layer rejected a read or write
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A workflow definition failed structural validation
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::PersistenceError(err.to_string())
    }
}
