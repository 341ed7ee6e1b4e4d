use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    #[error("{0}")]
    UserInput(String),

    #[error("failed to launch `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("process `{program}` failed: {source}")]
    Process {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server returned an error (status {status}): {message}")]
    Server { status: u16, message: String },

    #[error("could not determine the home directory")]
    NoHomeDir,

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
