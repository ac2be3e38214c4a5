/// Core error type for the moderation agent.
///
/// Adapter crates should map their transport-specific failures into this type
/// so the pipeline can handle them consistently (per-message outcome tag vs
/// fatal condition).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("classification error: {0}")]
    Classification(String),

    #[error("ledger submission error: {0}")]
    Ledger(String),

    #[error("reply delivery error: {0}")]
    Delivery(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
