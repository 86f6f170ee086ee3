use std::path::PathBuf;

/// Options shared by every lockfile operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Package names never installed or resolved (usually local projects).
    pub ignore: Vec<String>,

    /// Root for scratch directories handed to the registry client.
    pub tmp: PathBuf,

    /// Verify only: fail instead of changing any lockfile, and never write.
    pub frozen: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            ignore: Vec::new(),
            tmp: std::env::temp_dir(),
            frozen: false,
        }
    }
}

impl SyncOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ignore list.
    #[must_use]
    pub fn with_ignore<I, S>(mut self, ignore: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore = ignore.into_iter().map(Into::into).collect();
        self
    }

    /// Set the scratch directory root.
    #[must_use]
    pub fn with_tmp(mut self, tmp: impl Into<PathBuf>) -> Self {
        self.tmp = tmp.into();
        self
    }

    /// Set frozen mode.
    #[must_use]
    pub fn with_frozen(mut self, frozen: bool) -> Self {
        self.frozen = frozen;
        self
    }

    #[must_use]
    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignore.iter().any(|ignored| ignored == name)
    }
}
