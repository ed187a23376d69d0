use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;

/// Broad failure-handling bucket a [`SMBError`] falls into, per the error
/// taxonomy: transient errors are retried locally, protocol errors kill the
/// offending message but not the connection, auth errors become access-denied
/// responses, resource errors surface as insufficient-resources, and fatal
/// errors tear the connection down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transient,
    Protocol,
    Auth,
    Resource,
    Fatal,
}

#[derive(Debug)]
pub enum SMBError {
    Allocator(AllocatorError),
    Ipc(IpcError),
    Auth(AuthError),
    Handle(HandleError),
    Config(ConfigError),
    Protocol(ProtocolError),
    IOError(SMBIOError),
    ServerError(SMBServerError),
}

impl SMBError {
    pub fn allocator_error(error: AllocatorError) -> Self {
        Self::Allocator(error)
    }

    pub fn ipc_error(error: IpcError) -> Self {
        Self::Ipc(error)
    }

    pub fn auth_error(error: AuthError) -> Self {
        Self::Auth(error)
    }

    pub fn handle_error(error: HandleError) -> Self {
        Self::Handle(error)
    }

    pub fn config_error<T: Into<ConfigError>>(error: T) -> Self {
        Self::Config(error.into())
    }

    pub fn protocol_error<T: Into<ProtocolError>>(error: T) -> Self {
        Self::Protocol(error.into())
    }

    pub fn io_error<T: Into<SMBIOError>>(error: T) -> Self {
        Self::IOError(error.into())
    }

    pub fn server_error<T: Into<SMBServerError>>(error: T) -> Self {
        Self::ServerError(error.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Allocator(AllocatorError::Exhausted) => ErrorCategory::Resource,
            Self::Allocator(AllocatorError::InvalidRelease) => ErrorCategory::Fatal,
            Self::Ipc(IpcError::Timeout) => ErrorCategory::Transient,
            Self::Ipc(IpcError::VersionMismatch { .. }) => ErrorCategory::Protocol,
            Self::Ipc(IpcError::TypeMismatch { .. }) => ErrorCategory::Protocol,
            Self::Ipc(IpcError::DaemonUnavailable) => ErrorCategory::Fatal,
            Self::Auth(_) => ErrorCategory::Auth,
            Self::Handle(HandleError::TooManyOpen) => ErrorCategory::Resource,
            Self::Handle(HandleError::Vetoed) => ErrorCategory::Auth,
            Self::Handle(HandleError::Invalid | HandleError::NotFound) => ErrorCategory::Protocol,
            Self::Config(_) => ErrorCategory::Protocol,
            Self::Protocol(_) => ErrorCategory::Protocol,
            Self::IOError(e) => e.category(),
            Self::ServerError(_) => ErrorCategory::Fatal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorError {
    /// Bitmap has no free slot left in its non-reserved range.
    Exhausted,
    /// Caller released an id that was never outstanding.
    InvalidRelease,
}

impl Display for AllocatorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exhausted => write!(f, "id allocator exhausted"),
            Self::InvalidRelease => write!(f, "released an id that was not outstanding"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpcError {
    VersionMismatch { expected: u32, actual: u32 },
    TypeMismatch { expected: u32, actual: u32 },
    Timeout,
    DaemonUnavailable,
}

impl Display for IpcError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VersionMismatch { expected, actual } => write!(
                f,
                "ipc message version mismatch: expected {expected}, got {actual}"
            ),
            Self::TypeMismatch { expected, actual } => write!(
                f,
                "ipc response type mismatch: expected {expected}, got {actual}"
            ),
            Self::Timeout => write!(f, "ipc request timed out waiting for a response"),
            Self::DaemonUnavailable => write!(f, "no user-space daemon is registered"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    HostDenied,
    UserDenied,
}

impl Display for AuthError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HostDenied => write!(f, "peer host is not permitted on this share"),
            Self::UserDenied => write!(f, "user is not permitted on this share"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleError {
    TooManyOpen,
    Invalid,
    NotFound,
    Vetoed,
}

impl Display for HandleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooManyOpen => write!(f, "handle table exhausted"),
            Self::Invalid => write!(f, "volatile id and persistent id disagree"),
            Self::NotFound => write!(f, "no handle for the given id"),
            Self::Vetoed => write!(f, "name matched a veto file filter"),
        }
    }
}

#[derive(Debug)]
pub struct ConfigError {
    message: String,
}

impl<T: Into<String>> From<T> for ConfigError {
    fn from(value: T) -> Self {
        Self { message: value.into() }
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

#[derive(Debug)]
pub struct ProtocolError {
    message: String,
}

impl<T: Into<String>> From<T> for ProtocolError {
    fn from(value: T) -> Self {
        Self { message: value.into() }
    }
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "protocol error: {}", self.message)
    }
}

#[derive(Debug)]
pub struct SMBIOError {
    error: io::Error,
}

impl SMBIOError {
    pub fn category(&self) -> ErrorCategory {
        match self.error.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => ErrorCategory::Transient,
            _ => ErrorCategory::Fatal,
        }
    }

    pub fn kind(&self) -> io::ErrorKind {
        self.error.kind()
    }
}

impl<T: Into<io::Error>> From<T> for SMBIOError {
    fn from(value: T) -> Self {
        Self { error: value.into() }
    }
}

impl Display for SMBIOError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "i/o error: {}", self.error)
    }
}

#[derive(Debug)]
pub struct SMBServerError {
    error: Box<dyn Error + Send + Sync>,
}

impl<T: Into<Box<dyn Error + Send + Sync>>> From<T> for SMBServerError {
    fn from(value: T) -> Self {
        Self { error: value.into() }
    }
}

impl Display for SMBServerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "server error: {}", self.error)
    }
}

impl Display for SMBError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allocator(e) => write!(f, "{e}"),
            Self::Ipc(e) => write!(f, "{e}"),
            Self::Auth(e) => write!(f, "{e}"),
            Self::Handle(e) => write!(f, "{e}"),
            Self::Config(e) => write!(f, "{e}"),
            Self::Protocol(e) => write!(f, "{e}"),
            Self::IOError(e) => write!(f, "{e}"),
            Self::ServerError(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SMBError {}
