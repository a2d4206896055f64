pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Completion backend error: {0}")]
    Completion(String),

    #[error("HTTP error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Errors that a caller could fix by changing the request rather than retrying.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::BadRequest(_) | Error::Validation(_) | Error::TemplateNotFound(_)
        )
    }
}
