use thiserror::Error;

/// Errors raised while building or loading SongGen configuration records.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The composite config was built without one of its required sub-configs.
    #[error("Config has to be initialized with text_encoder and decoder config, missing '{0}'")]
    MissingSubConfig(&'static str),

    /// A sub-config payload does not carry its `model_type` discriminator.
    #[error("The '{0}' config does not specify a model_type")]
    MissingModelType(&'static str),

    /// No text encoder schema is registered under this `model_type`.
    #[error("Unknown text encoder model_type '{model_type}', expected one of: {known}")]
    UnknownModelType { model_type: String, known: String },

    /// A payload could not be mapped onto the record it describes.
    #[error("Invalid config payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// A value is well-formed JSON but not acceptable for its field.
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    /// No persisted config was found at the given location.
    #[error("No config found at '{0}'")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
