use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Store operation `{op}` failed: {message}")]
    Store { op: &'static str, message: String },

    #[error("Failed to spawn worker {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn store(op: &'static str, message: impl Into<String>) -> Self {
        Error::Store {
            op,
            message: message.into(),
        }
    }

    pub fn error_code(&self) -> i32 {
        match self {
            Error::Io(_) => -1,
            Error::Config(_) => -2,
            Error::Connection(_) => -3,
            Error::Schema(_) => -4,
            Error::Store { .. } => -5,
            Error::Spawn { .. } => -6,
        }
    }
}
