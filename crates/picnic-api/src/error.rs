/// Errors raised by the storefront client.
#[derive(Debug, thiserror::Error)]
pub enum PicnicError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("authentication error: {0}")]
    Auth(String),
    #[error("backend returned error code {0}")]
    ErrorCode(String),
    #[error("login response did not carry an auth token")]
    MissingToken,
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
}
