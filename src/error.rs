use std::fmt;

/// Domain error kinds surfaced by drivers, the reconciliation engine, and the
/// HTTP façade. Orchestration code wraps these in `anyhow::Result` and adds
/// context; only call sites that need to branch on the kind (façade status
/// mapping, retry policy) match on the enum directly.
#[derive(Debug)]
pub enum SyncerError {
    /// Validation failed while loading or reloading configuration.
    Configuration(String),
    /// A target referenced a discovery or gateway driver name that isn't registered.
    DriverNotFound { kind: &'static str, name: String },
    /// A registry or gateway HTTP call failed (status >= 400 or transport error).
    Remote(String),
    /// A driver does not implement an optional operation (export/restore/migrate).
    Unrealized { driver: String, operation: &'static str },
    /// The manual registration endpoint would leave fewer than `alive_num` instances enabled.
    MinimumAliveGuard { required: u32, would_remain: u32 },
}

impl fmt::Display for SyncerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncerError::Configuration(msg) => write!(f, "configuration error: {msg}"),
            SyncerError::DriverNotFound { kind, name } => {
                write!(f, "{kind} driver not found: {name}")
            }
            SyncerError::Remote(msg) => write!(f, "remote error: {msg}"),
            SyncerError::Unrealized { driver, operation } => {
                write!(f, "{driver} does not implement {operation}")
            }
            SyncerError::MinimumAliveGuard {
                required,
                would_remain,
            } => write!(
                f,
                "minimum alive instances not satisfied: required={required}, would_remain={would_remain}"
            ),
        }
    }
}

impl std::error::Error for SyncerError {}

impl SyncerError {
    /// HTTP status this error maps to at the façade boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            SyncerError::DriverNotFound { .. } => 404,
            SyncerError::Configuration(_)
            | SyncerError::Remote(_)
            | SyncerError::Unrealized { .. }
            | SyncerError::MinimumAliveGuard { .. } => 500,
        }
    }
}
