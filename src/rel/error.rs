use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelError {
    #[error("REL transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("REL rejected the request: {status} {message}")]
    Api { status: u16, message: String },
    #[error("REL returned no matching object")]
    NotFound,
}
