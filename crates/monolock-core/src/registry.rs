//! Registry client contract and the `yarn`-backed implementation.

use crate::error::SyncError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Environment variable to override the `yarn` binary.
pub const YARN_ENV: &str = "MONOLOCK_YARN";

/// Default client binary.
pub const DEFAULT_YARN: &str = "yarn";

/// Per-invocation registry configuration file.
pub const YARNRC_NAME: &str = ".yarnrc";

/// External package-manager operations the engine depends on.
///
/// `install` and `add` run inside a scratch directory holding a
/// `package.json` and a [`YARNRC_NAME`] file, and must leave the resolved
/// `package.json` and `yarn.lock` behind in that directory.
#[allow(async_fn_in_trait)]
pub trait RegistryClient {
    /// Latest published version of `name`.
    async fn latest_version(&self, name: &str) -> Result<String, SyncError>;

    /// Effective registry URL for `dir`, or an empty string if none is configured.
    async fn registry_url(&self, dir: &Path) -> Result<String, SyncError>;

    /// Install the manifest in `dir`.
    async fn install(&self, dir: &Path) -> Result<(), SyncError>;

    /// Add `specs` (`name@range`) to the project in `dir`.
    async fn add(&self, dir: &Path, specs: &[String]) -> Result<(), SyncError>;
}

/// Contents of the scratch [`YARNRC_NAME`] for a given registry URL.
#[must_use]
pub fn yarnrc(registry: &str) -> String {
    let mut lines = vec![r#""--install.frozen-lockfile" false"#.to_string()];
    if !registry.is_empty() {
        lines.push(format!("--registry \"{registry}\""));
    }
    lines.join("\n")
}

/// [`RegistryClient`] that shells out to `yarn` (v1).
#[derive(Debug, Clone)]
pub struct YarnClient {
    program: PathBuf,
}

#[derive(Deserialize)]
struct InfoOutput {
    data: serde_json::Value,
}

impl Default for YarnClient {
    fn default() -> Self {
        Self::new(DEFAULT_YARN)
    }
}

impl YarnClient {
    /// Create a client running `program`.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Create a client using the binary from [`YARN_ENV`] or `yarn`.
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var_os(YARN_ENV) {
            Some(program) if !program.is_empty() => Self::new(program),
            _ => Self::default(),
        }
    }

    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Run the client with `args` in `dir`, returning stdout.
    async fn run(&self, dir: Option<&Path>, args: &[&str]) -> Result<String, SyncError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }

        let command_line = format!("{} {}", self.program.display(), args.join(" "));
        debug!(command = %command_line, dir = ?dir, "running registry client");

        let output = cmd.output().await.map_err(|e| {
            SyncError::client_failed(format!("Failed to spawn `{command_line}`: {e}"))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SyncError::client_failed(format!(
                "`{command_line}` exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        String::from_utf8(output.stdout).map_err(|e| {
            SyncError::client_output_invalid(format!("`{command_line}` printed non-UTF-8: {e}"))
        })
    }
}

impl RegistryClient for YarnClient {
    async fn latest_version(&self, name: &str) -> Result<String, SyncError> {
        let stdout = self
            .run(None, &["info", name, "version", "--json"])
            .await?;

        // yarn may print warnings as extra JSON lines; the answer is the
        // line carrying `data`
        stdout
            .lines()
            .filter_map(|line| serde_json::from_str::<InfoOutput>(line).ok())
            .find_map(|info| info.data.as_str().map(str::to_string))
            .ok_or_else(|| {
                SyncError::client_output_invalid(format!(
                    "No version in `yarn info {name}` output: {}",
                    stdout.trim()
                ))
            })
    }

    async fn registry_url(&self, dir: &Path) -> Result<String, SyncError> {
        let stdout = self.run(Some(dir), &["config", "get", "registry"]).await?;
        let url = match stdout.trim() {
            "undefined" => "",
            url => url,
        };
        Ok(url.to_string())
    }

    async fn install(&self, dir: &Path) -> Result<(), SyncError> {
        self.run(Some(dir), &["install", "--ignore-scripts", "--ignore-engines"])
            .await?;
        Ok(())
    }

    async fn add(&self, dir: &Path, specs: &[String]) -> Result<(), SyncError> {
        let mut args = vec!["add"];
        args.extend(specs.iter().map(String::as_str));
        args.push("--ignore-engines");
        self.run(Some(dir), &args).await?;
        Ok(())
    }
}
