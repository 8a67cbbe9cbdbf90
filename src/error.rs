use thiserror::Error;

/// A probe that never produced an HTTP response.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("connection failed: {0}")]
    Unreachable(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid url {value:?}: {source}")]
    InvalidUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("status strategies need --status-api or --page-url to locate the status endpoint")]
    MissingStatusApi,
    #[error("unknown strategy {0:?}")]
    UnknownStrategy(String),
    #[error("unknown probe method {0:?}")]
    UnknownMethod(String),
    #[error("invalid header name {name:?}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: reqwest::header::InvalidHeaderName,
    },
    #[error("invalid value for {flag}: {reason}")]
    InvalidValue { flag: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum NavigateError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write redirect: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum WakeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Navigate(#[from] NavigateError),
}
