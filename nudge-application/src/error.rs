use nudge_domain::error::DomainError;

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("domain: {0}")]
    Domain(#[from] DomainError),

    #[error("validation: {0}")]
    Validation(String),

    #[error("config: {0}")]
    Config(#[from] serde_json::Error),

    #[error("timer not found: {0}")]
    TimerNotFound(String),

    #[error("timer already exists: {0}")]
    TimerAlreadyExists(String),
}
