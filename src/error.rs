use crate::config::ConfigError;
use crate::namespace::NamespaceError;
use crate::rdb::RdbError;
use crate::store::StorageError;

/// Every failure a command can surface to its session.
///
/// The `Display` form is the complete RESP error line, prefix included.
#[derive(Debug, thiserror::Error)]
pub enum NsError {
    #[error("ERR {0}")]
    Generic(String),

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArgCount(String),

    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    #[error("ERR syntax error")]
    SyntaxError,

    #[error("ERR unknown command '{0}', with args beginning with: {1}")]
    UnknownCommand(String, String),

    #[error("NOAUTH Authentication required.")]
    NoAuth,

    #[error("ERR admin permission required to perform the command")]
    AdminRequired,

    #[error("ERR namespace is read-only for slave")]
    NamespaceReadOnly,

    #[error("NOPROTO unsupported protocol version")]
    NoProto,

    #[error("ERR invalid password")]
    InvalidPassword,

    #[error("ERR Client sent AUTH, but no password is set")]
    NoPasswordSet,

    #[error("ERR target key name already exists.")]
    KeyExists,

    #[error("ERR invalid cursor")]
    InvalidCursor,

    #[error("ERR only keys prefix match was supported")]
    PrefixMatchOnly,

    #[error("ERR {0}")]
    Namespace(#[from] NamespaceError),

    #[error("ERR {0}")]
    Rdb(#[from] RdbError),

    #[error("ERR {0}")]
    Storage(#[from] StorageError),

    #[error("ERR {0}")]
    Config(#[from] ConfigError),

    #[error("ERR {0}")]
    Io(#[from] std::io::Error),
}

impl From<crate::cursor::InvalidCursor> for NsError {
    fn from(_: crate::cursor::InvalidCursor) -> Self {
        NsError::InvalidCursor
    }
}

impl NsError {
    pub fn generic(msg: impl Into<String>) -> Self {
        NsError::Generic(msg.into())
    }

    pub fn to_resp_error(&self) -> String {
        self.to_string()
    }
}

pub type NsResult<T> = Result<T, NsError>;
