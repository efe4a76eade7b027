use thiserror::Error;

pub type Result<T> = std::result::Result<T, LucidError>;

#[derive(Debug, Error)]
pub enum LucidError {
    #[error("solver error: {0}")]
    Solve(#[from] SolveError),
    #[error("oracle error: {0}")]
    Oracle(#[from] OracleError),
    #[error("collector error: {0}")]
    Collect(#[from] CollectError),
    #[error("vm error: {0}")]
    Vm(#[from] VmError),
}

#[derive(Debug, Error)]
pub enum SolveError {
    #[error("base solver operation failed: {0}")]
    Base(String),
    #[error("expression not encodable by the base solver: {0}")]
    Unencodable(String),
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("invalid URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("oracle returned non-2xx status: {0}")]
    Status(u16),
    #[error("oracle returned empty body")]
    EmptyBody,
    #[error("malformed oracle reply: {0}")]
    Malformed(String),
}

impl OracleError {
    /// Transport-level failures degrade to the base-solver verdict; anything
    /// protocol-level is reported as a DONT_KNOW reply instead.
    pub fn is_transport(&self) -> bool {
        matches!(self, OracleError::Transport(_) | OracleError::InvalidUrl { .. })
    }
}

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("no current thread available")]
    NoThread,
    #[error("no method under analysis and no stack frame to fall back to")]
    NoMethod,
    #[error("source unavailable for class {0}")]
    NoSource(String),
    #[error("source read failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum VmError {
    #[error("unknown class: {0}")]
    UnknownClass(String),
    #[error("class not resolved: {0}")]
    NotResolved(String),
    #[error("class initialization failed for {class}: {reason}")]
    InitFailed { class: String, reason: String },
    #[error("dangling object reference: {0}")]
    DanglingRef(u32),
    #[error("field {field} not present on {class}")]
    NoSuchField { class: String, field: String },
}
