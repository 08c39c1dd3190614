use thiserror::Error;

#[derive(Error, Debug)]
pub enum WardenError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for WardenError {
    fn from(err: serde_json::Error) -> Self {
        WardenError::Serialize(err.to_string())
    }
}
