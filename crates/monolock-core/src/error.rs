//! Engine error types.

use std::fmt;
use std::io;

/// Engine error codes.
pub mod codes {
    /// A `package.json` could not be parsed.
    pub const LOCK_MANIFEST_INVALID: &str = "LOCK_MANIFEST_INVALID";
    /// A `yarn.lock` could not be parsed.
    pub const LOCK_LOCKFILE_INVALID: &str = "LOCK_LOCKFILE_INVALID";
    /// Reading or writing project files failed.
    pub const LOCK_IO_ERROR: &str = "LOCK_IO_ERROR";
    /// The registry client exited unsuccessfully.
    pub const LOCK_CLIENT_FAILED: &str = "LOCK_CLIENT_FAILED";
    /// The registry client produced output we could not understand.
    pub const LOCK_CLIENT_OUTPUT_INVALID: &str = "LOCK_CLIENT_OUTPUT_INVALID";
    /// Frozen synchronization would have changed a lockfile.
    pub const LOCK_FROZEN_MISMATCH: &str = "LOCK_FROZEN_MISMATCH";
}

/// Engine error.
///
/// Cloneable so that a failed install can be handed to every task awaiting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncError {
    code: &'static str,
    message: String,
}

impl SyncError {
    /// Create a new error with the given code and message.
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Get the error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Get the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn manifest_invalid(msg: impl Into<String>) -> Self {
        Self::new(codes::LOCK_MANIFEST_INVALID, msg)
    }

    pub fn lockfile_invalid(msg: impl Into<String>) -> Self {
        Self::new(codes::LOCK_LOCKFILE_INVALID, msg)
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(codes::LOCK_IO_ERROR, msg)
    }

    pub fn client_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::LOCK_CLIENT_FAILED, msg)
    }

    pub fn client_output_invalid(msg: impl Into<String>) -> Self {
        Self::new(codes::LOCK_CLIENT_OUTPUT_INVALID, msg)
    }

    /// Create the frozen-lockfile error for the project at `dir`.
    #[must_use]
    pub fn frozen_mismatch(dir: &std::path::Path) -> Self {
        Self::new(
            codes::LOCK_FROZEN_MISMATCH,
            format!(
                "Updating lockfile is not allowed with frozen lockfile ({}). \
                 This error is most likely happening if you have committed \
                 out-of-date lockfiles and tried to install deps in CI. \
                 Install your deps again locally.",
                dir.display()
            ),
        )
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for SyncError {}

impl From<io::Error> for SyncError {
    fn from(e: io::Error) -> Self {
        Self::io(e.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        Self::manifest_invalid(format!("Invalid JSON: {e}"))
    }
}
