//! Reproduction run configuration.

use std::time::Duration;

/// Wall-clock budget for the whole reproduction run: 7 days.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 3_600);

/// Stall threshold: no log growth for this long triggers a restart.
pub const DEFAULT_RETRY_THRESHOLD: Duration = Duration::from_secs(3_600);

/// How often the orchestrator observes the running entrypoint.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Script the submission is expected to ship at its root.
pub const DEFAULT_ENTRYPOINT: &str = "reproduce.sh";

/// Default provisioning command: the transfer layer depends on `tar`, `gzip`
/// and `find` inside the sandbox, so make sure they exist before anything is
/// uploaded. A missing tool then fails the run as a provisioning error
/// instead of a late transfer one.
pub const DEFAULT_INSTALL_COMMAND: &str = "command -v tar > /dev/null \
     && command -v gzip > /dev/null \
     && command -v find > /dev/null \
     || (apt-get update -qq && apt-get install -y -qq tar gzip findutils)";

/// Tunables for one reproduction run.
#[derive(Debug, Clone)]
pub struct ReproductionConfig {
    /// Hard wall-clock limit, restarts included.
    pub timeout: Duration,
    /// Kill and restart the entrypoint once if its log grows by nothing
    /// for this long.
    pub retry_threshold: Duration,
    /// Interval between observations of the running entrypoint.
    pub poll_interval: Duration,
    /// Script run from the submission root.
    pub entrypoint: String,
    /// Commands run once before the submission is uploaded. The default
    /// verifies the archive tooling and installs it when missing.
    pub install_commands: Vec<String>,
    /// Per-file size threshold for artifact collection.
    pub max_file_bytes: u64,
}

impl Default for ReproductionConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            retry_threshold: DEFAULT_RETRY_THRESHOLD,
            poll_interval: DEFAULT_POLL_INTERVAL,
            entrypoint: DEFAULT_ENTRYPOINT.to_string(),
            install_commands: vec![DEFAULT_INSTALL_COMMAND.to_string()],
            max_file_bytes: crate::transfer::DEFAULT_MAX_FILE_BYTES,
        }
    }
}

impl ReproductionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_threshold(mut self, threshold: Duration) -> Self {
        self.retry_threshold = threshold;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_entrypoint(mut self, entrypoint: impl Into<String>) -> Self {
        self.entrypoint = entrypoint.into();
        self
    }

    pub fn with_install_commands(mut self, commands: Vec<String>) -> Self {
        self.install_commands = commands;
        self
    }

    pub fn with_max_file_bytes(mut self, max_file_bytes: u64) -> Self {
        self.max_file_bytes = max_file_bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReproductionConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(604_800));
        assert_eq!(config.retry_threshold, Duration::from_secs(3_600));
        assert_eq!(config.entrypoint, "reproduce.sh");
        assert_eq!(
            config.install_commands,
            vec![DEFAULT_INSTALL_COMMAND.to_string()]
        );
    }

    #[test]
    fn test_default_install_command_covers_archive_tooling() {
        for tool in ["tar", "gzip", "find"] {
            assert!(DEFAULT_INSTALL_COMMAND.contains(tool));
        }
    }

    #[test]
    fn test_builder_chain() {
        let config = ReproductionConfig::new()
            .with_timeout(Duration::from_secs(60))
            .with_entrypoint("run.sh")
            .with_install_commands(vec!["pip install -r requirements.txt".to_string()]);
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.entrypoint, "run.sh");
        assert_eq!(config.install_commands.len(), 1);
    }
}
