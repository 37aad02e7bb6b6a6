use thiserror::Error;

/// Error taxonomy shared by every component of the materials RAG subsystem.
///
/// Variants map 1:1 onto the kinds in the error-handling design: inputs are
/// never retried, dependency failures degrade gracefully where a partial
/// result still makes sense, state errors are surfaced as-is.
#[derive(Error, Debug)]
pub enum Error {
    #[error("input error: {0}")]
    Input(String),

    #[error("dependency error: {0}")]
    Dependency(String),

    #[error("state error: {0}")]
    State(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("transient error: {0}")]
    Transient(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn input(msg: impl Into<String>) -> Self {
        Error::Input(msg.into())
    }
    pub fn dependency(msg: impl Into<String>) -> Self {
        Error::Dependency(msg.into())
    }
    pub fn state(msg: impl Into<String>) -> Self {
        Error::State(msg.into())
    }
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }
    pub fn transient(msg: impl Into<String>) -> Self {
        Error::Transient(msg.into())
    }

    /// Category label used when an error is attached to a response's
    /// metadata rather than allowed to escape to the caller.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Input(_) => "input",
            Error::Dependency(_) => "dependency",
            Error::State(_) => "state",
            Error::Storage(_) => "storage",
            Error::Transient(_) => "transient",
            Error::Io(_) => "storage",
            Error::Serialization(_) => "storage",
        }
    }
}
