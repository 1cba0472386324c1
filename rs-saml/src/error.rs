use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Reasons an authentication attempt is abandoned.
#[derive(Debug, Error)]
pub enum Error {
    #[error("sasl: missing server payload")]
    MissingPayload,

    #[error("sasl: too many steps")]
    TooManySteps,

    /// The server never reported `done` within the allowed continue rounds.
    #[error("sasl: conversation not done after {rounds} rounds")]
    ProtocolExhausted { rounds: usize },

    #[error("sasl: malformed server payload: {0}")]
    MalformedPayload(String),

    #[error("sasl: server response is missing `{0}`")]
    MalformedResponse(&'static str),

    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}
