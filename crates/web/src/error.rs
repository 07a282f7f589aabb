use std::io;
use std::path::PathBuf;

use ember_http::protocol::{HttpError, ParseError, SendError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("can't read config file {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session storage error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("session backend error: {reason}")]
    Backend { reason: String },
}

impl SessionError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub fn backend<S: ToString>(str: S) -> Self {
        Self::Backend { reason: str.to_string() }
    }
}

/// Errors ending the processing of one connection.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("http error: {0}")]
    Http(#[from] HttpError),

    #[error("session persistence failed: {0}")]
    Session(#[from] SessionError),
}

impl From<ParseError> for PipelineError {
    fn from(e: ParseError) -> Self {
        Self::Http(e.into())
    }
}

impl From<SendError> for PipelineError {
    fn from(e: SendError) -> Self {
        Self::Http(e.into())
    }
}

#[derive(Error, Debug)]
pub enum ServerBuildError {
    #[error("handler must be set")]
    MissingHandler,
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("can't bind {address}: {source}")]
    Bind { address: String, source: io::Error },

    #[error("server build error: {0}")]
    Build(#[from] ServerBuildError),
}
