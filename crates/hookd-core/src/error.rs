use thiserror::Error;

#[derive(Debug, Error)]
pub enum HookdError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("unknown procedure: {0}")]
    UnknownProcedure(String),

    #[error("deployment already in progress: {0}")]
    AlreadyRunning(String),

    #[error("duplicate procedure id: {0}")]
    DuplicateProcedure(String),

    #[error("procedure '{0}' has no steps")]
    NoSteps(String),

    #[error("procedure '{procedure}' step {step} has an empty command")]
    EmptyCommand { procedure: String, step: usize },

    #[error("auth credential must not be empty")]
    EmptyCredential,

    #[error("invalid listen address '{0}': expected host:port")]
    InvalidListenAddr(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, HookdError>;
