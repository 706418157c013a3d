use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Wire error codes sent to clients in `error_message` frames.
pub mod wire_code {
    pub const AUTHENTICATION_ERROR: u32 = 1001;
    pub const USER_ALREADY_EXISTS: u32 = 1002;
    pub const USER_NOT_FOUND: u32 = 1003;
    pub const CHAT_GROUP_NOT_FOUND: u32 = 1004;
    pub const PERMISSION_DENIED: u32 = 1005;
    pub const FILE_NOT_FOUND: u32 = 1006;
    pub const FILE_TOO_LARGE: u32 = 1007;
    pub const INVALID_COMMAND: u32 = 1008;
    pub const SERVER_ERROR: u32 = 1009;
    pub const NETWORK_ERROR: u32 = 1010;
    pub const STORE_ERROR: u32 = 1011;
    pub const AI_BACKEND_ERROR: u32 = 1012;
}

#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("authentication failed")]
    Authentication,

    #[error("user already exists")]
    UserAlreadyExists,

    #[error("user not found")]
    UserNotFound,

    #[error("chat group not found")]
    ChatGroupNotFound,

    #[error("chat group already exists")]
    ChatGroupAlreadyExists,

    #[error("permission denied")]
    PermissionDenied,

    #[error("file not found")]
    FileNotFound,

    #[error("file too large")]
    FileTooLarge,

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("ai backend error: {0}")]
    AiBackend(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<tokio_postgres::Error> for AppError {
    fn from(e: tokio_postgres::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for AppError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        AppError::Database(e.to_string())
    }
}

impl AppError {
    /// Wire code sent to the client for this error.
    pub fn wire_code(&self) -> u32 {
        use wire_code::*;
        match self {
            AppError::Authentication => AUTHENTICATION_ERROR,
            AppError::UserAlreadyExists => USER_ALREADY_EXISTS,
            AppError::UserNotFound => USER_NOT_FOUND,
            AppError::ChatGroupNotFound | AppError::ChatGroupAlreadyExists => {
                CHAT_GROUP_NOT_FOUND
            }
            AppError::PermissionDenied => PERMISSION_DENIED,
            AppError::FileNotFound => FILE_NOT_FOUND,
            AppError::FileTooLarge => FILE_TOO_LARGE,
            AppError::Validation(_) | AppError::InvalidCommand(_) => INVALID_COMMAND,
            AppError::Database(_) => STORE_ERROR,
            AppError::AiBackend(_) => AI_BACKEND_ERROR,
            AppError::Config(_) | AppError::StartServer(_) | AppError::Internal(_) => {
                SERVER_ERROR
            }
        }
    }

    /// Whether `self.to_string()` is safe to put on the wire verbatim.
    /// Backend/internal failures are replaced with a generic message instead;
    /// the real text is only ever logged.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            AppError::Database(_)
                | AppError::AiBackend(_)
                | AppError::Config(_)
                | AppError::StartServer(_)
                | AppError::Internal(_)
        )
    }

    /// Message safe to send to the client.
    pub fn wire_message(&self) -> String {
        if self.is_internal() {
            "internal server error".to_string()
        } else {
            self.to_string()
        }
    }
}
