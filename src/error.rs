use std::path::PathBuf;

use crate::oid::Oid;

/// error type for twig operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("repository not found at {0}")]
    NoRepo(PathBuf),

    #[error("repository already exists at {0}")]
    RepoExists(PathBuf),

    #[error("operation not allowed on a bare repository")]
    BareRepo,

    #[error("ref not found: {0}")]
    RefNotFound(String),

    #[error("invalid ref name: {0}")]
    InvalidRef(String),

    #[error("path not found in tree: {0}")]
    PathNotFound(String),

    #[error("tree entry not found: {0}")]
    EntryNotFound(String),

    #[error("no status for path: {0}")]
    StatusPathNotFound(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("object not found: {0}")]
    ObjectNotFound(Oid),

    #[error("no object matches prefix: {0}")]
    PrefixNotFound(String),

    #[error("ambiguous: {0}")]
    Ambiguous(String),

    #[error("corrupt object {oid}: {message}")]
    CorruptObject { oid: Oid, message: String },

    #[error("corrupt object: {0}")]
    CorruptObjectMessage(String),

    #[error("object {oid} is a {actual}, expected {expected}")]
    InvalidObjectType {
        oid: Oid,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("cannot peel {0} to a commit")]
    PeelFailed(Oid),

    #[error("invalid tree entry name: {0}")]
    InvalidEntryName(String),

    #[error("invalid file mode: {0}")]
    InvalidFileMode(String),

    #[error("invalid pathspec: {0}")]
    InvalidPathspec(String),

    #[error("operation cancelled by callback")]
    UserCancelled,

    #[error("operation cancelled")]
    Cancelled,

    #[error("lock contention on repository")]
    LockContention,

    #[error("remote not found: {0}")]
    RemoteNotFound(String),

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("push rejected for {reference}: {reason}")]
    PushRejected { reference: String, reason: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cbor serialization error: {0}")]
    CborEncode(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("cbor deserialization error: {0}")]
    CborDecode(#[from] ciborium::de::Error<std::io::Error>),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("invalid oid hex: {0}")]
    InvalidOidHex(String),
}

impl Error {
    /// true for every "missing object/path/ref" variant
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::RefNotFound(_)
                | Error::PathNotFound(_)
                | Error::EntryNotFound(_)
                | Error::StatusPathNotFound(_)
                | Error::ObjectNotFound(_)
                | Error::PrefixNotFound(_)
        )
    }

    /// true for both callback aborts and external cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::UserCancelled | Error::Cancelled)
    }

    pub(crate) fn transport(message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// helper to wrap io errors with path context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}
