pub mod check;
pub mod lockfile;
pub mod version;

use miette::Result;
use monolock_core::SyncError;
use serde::Serialize;

/// Exit code for engine failures reported as JSON.
pub const EXIT_ERROR: i32 = 1;

#[derive(Debug, Serialize)]
pub struct ErrorInfo {
    pub code: &'static str,
    pub message: String,
}

impl From<&SyncError> for ErrorInfo {
    fn from(err: &SyncError) -> Self {
        Self {
            code: err.code(),
            message: err.message().to_string(),
        }
    }
}

/// Report an engine error: `{"ok":false,"error":{..}}` on stdout with `--json`,
/// a diagnostic otherwise.
pub fn fail(err: &SyncError, json: bool) -> Result<()> {
    if json {
        let body = serde_json::json!({ "ok": false, "error": ErrorInfo::from(err) });
        println!("{body}");
        std::process::exit(EXIT_ERROR);
    }
    Err(miette::miette!(code = err.code(), "{}", err.message()))
}

/// Print a serializable value as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| miette::miette!("failed to serialize output: {e}"))?;
    println!("{text}");
    Ok(())
}
