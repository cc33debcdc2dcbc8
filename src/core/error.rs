use thiserror::Error;

/// Construction-time failure of a controller.
///
/// Every variant is raised before the first control step runs. Evaluation
/// itself never fails; a run whose controller cannot be built is reported to
/// the optimizer as a failed evaluation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown connection kind `{0}`")]
    UnknownConnection(String),

    #[error("unknown activation function `{0}`")]
    UnknownActivation(String),

    #[error("unknown sensor type `{0}`")]
    UnknownSensorType(String),

    #[error("unknown layer `{0}`")]
    UnknownLayer(String),

    #[error("layer `{0}` is declared twice")]
    DuplicateLayer(String),

    #[error("no actuator named `{0}`")]
    UnknownActuator(String),

    #[error("no degree of freedom named `{0}`")]
    UnknownDof(String),

    #[error("node `{target}` cannot take input from `{source_node}`: sources must be constructed first")]
    ForwardReference { target: String, source_node: String },

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed configuration: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = core::result::Result<T, ConfigError>;
