use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("no station found")]
    NotFound,
    #[error("every search returned the excluded station")]
    OnlyExcluded,
    #[error("search request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum IdentifyError {
    #[error("could not read sample {path}: {source}")]
    Sample {
        path: String,
        source: std::io::Error,
    },
    #[error("identify request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("identify API responded with {0}")]
    Status(u16),
    #[error("no match")]
    NoMatch,
}

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("token refresh failed: {0}")]
    Token(String),
    #[error("library request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("library API responded with {0}")]
    Status(u16),
}
