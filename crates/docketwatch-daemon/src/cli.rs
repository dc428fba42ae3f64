use clap::Parser;
use docketwatch_core::notify::{DEFAULT_MAIL_FROM, DEFAULT_SENDMAIL_PATH};
use docketwatch_core::paths::default_state_dir;
use docketwatch_core::session::SessionConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Driver URL that selects the in-memory backend.
pub const MEMORY_DRIVER: &str = "memory:";

#[derive(Parser, Debug)]
#[command(name = "docketwatch-daemon")]
#[command(about = "Portal automation service: session API, operation routing and change monitoring")]
#[command(version)]
pub struct Cli {
    /// Address to bind the HTTP server to
    #[arg(long, env = "DOCKETWATCH_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind the HTTP server to
    #[arg(long, env = "DOCKETWATCH_PORT", default_value_t = 8710)]
    pub port: u16,

    /// Browser-automation driver endpoint, or `memory:` for a dry run
    #[arg(long, env = "DOCKETWATCH_DRIVER_URL", default_value = "http://127.0.0.1:4455")]
    pub driver_url: String,

    /// Deadline for each call into the automation driver
    #[arg(long, env = "DOCKETWATCH_AUTOMATION_TIMEOUT_SECS", default_value_t = 60)]
    pub automation_timeout_secs: u64,

    /// Idle time after which an API session is closed
    #[arg(long, env = "DOCKETWATCH_SESSION_IDLE_TIMEOUT_SECS", default_value_t = 1800)]
    pub session_idle_timeout_secs: u64,

    /// How often idle sessions are swept
    #[arg(long, env = "DOCKETWATCH_SESSION_SWEEP_INTERVAL_SECS", default_value_t = 300)]
    pub session_sweep_interval_secs: u64,

    /// Directory for daemon baselines (defaults to ~/.docketwatch)
    #[arg(long, env = "DOCKETWATCH_STATE_DIR", value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    /// Keep daemon baselines in memory only
    #[arg(long, env = "DOCKETWATCH_NO_PERSIST_BASELINES")]
    pub no_persist_baselines: bool,

    /// Bearer token required by every route except /health
    #[arg(long, env = "DOCKETWATCH_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// sendmail-compatible binary used for email notifications
    #[arg(long, env = "DOCKETWATCH_SENDMAIL_PATH", default_value = DEFAULT_SENDMAIL_PATH)]
    pub sendmail_path: PathBuf,

    /// From address on notification emails
    #[arg(long, env = "DOCKETWATCH_MAIL_FROM", default_value = DEFAULT_MAIL_FROM)]
    pub mail_from: String,

    /// Deadline for each notification delivery
    #[arg(long, env = "DOCKETWATCH_NOTIFY_TIMEOUT_SECS", default_value_t = 15)]
    pub notify_timeout_secs: u64,

    /// Log filter (e.g. `debug`, `docketwatch_core=trace`); overrides RUST_LOG
    #[arg(long, env = "DOCKETWATCH_LOG_LEVEL")]
    pub log_level: Option<String>,
}

/// Where portal calls go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Driver(String),
}

/// Everything the process needs to wire its services.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub backend: Backend,
    pub automation_timeout: Duration,
    pub session: SessionConfig,
    /// `None` when baselines are not persisted.
    pub state_dir: Option<PathBuf>,
    pub api_token: Option<String>,
    pub sendmail_path: PathBuf,
    pub mail_from: String,
    pub notify_timeout: Duration,
}

impl Cli {
    pub fn into_service_config(self) -> Result<ServiceConfig, String> {
        for (flag, secs) in [
            ("--automation-timeout-secs", self.automation_timeout_secs),
            ("--session-idle-timeout-secs", self.session_idle_timeout_secs),
            ("--session-sweep-interval-secs", self.session_sweep_interval_secs),
            ("--notify-timeout-secs", self.notify_timeout_secs),
        ] {
            if secs == 0 {
                return Err(format!("{} must be greater than zero", flag));
            }
        }

        let backend = match self.driver_url.trim() {
            "" => return Err("--driver-url must not be empty".to_string()),
            MEMORY_DRIVER => Backend::Memory,
            url if url.starts_with("http://") || url.starts_with("https://") => Backend::Driver(url.to_string()),
            other => return Err(format!("Unsupported driver URL: {}", other)),
        };

        let state_dir = match (self.no_persist_baselines, self.state_dir) {
            (true, _) => None,
            (false, Some(dir)) => Some(dir),
            (false, None) => Some(default_state_dir()?),
        };

        Ok(ServiceConfig {
            host: self.host,
            port: self.port,
            backend,
            automation_timeout: Duration::from_secs(self.automation_timeout_secs),
            session: SessionConfig {
                idle_timeout: Duration::from_secs(self.session_idle_timeout_secs),
                sweep_interval: Duration::from_secs(self.session_sweep_interval_secs),
            },
            state_dir,
            api_token: self.api_token.filter(|t| !t.is_empty()),
            sendmail_path: self.sendmail_path,
            mail_from: self.mail_from,
            notify_timeout: Duration::from_secs(self.notify_timeout_secs),
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["docketwatch-daemon"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults() {
        let config = parse(&["--state-dir", "/tmp/dw"]).into_service_config().unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8710);
        assert_eq!(config.backend, Backend::Driver("http://127.0.0.1:4455".into()));
        assert_eq!(config.automation_timeout, Duration::from_secs(60));
        assert_eq!(config.session.idle_timeout, Duration::from_secs(1800));
        assert_eq!(config.session.sweep_interval, Duration::from_secs(300));
        assert_eq!(config.notify_timeout, Duration::from_secs(15));
        assert_eq!(config.sendmail_path, PathBuf::from(DEFAULT_SENDMAIL_PATH));
        assert_eq!(config.mail_from, DEFAULT_MAIL_FROM);
        assert_eq!(config.state_dir, Some(PathBuf::from("/tmp/dw")));
        assert!(config.api_token.is_none());
    }

    #[test]
    fn memory_driver() {
        let config = parse(&["--driver-url", "memory:", "--no-persist-baselines"])
            .into_service_config()
            .unwrap();
        assert_eq!(config.backend, Backend::Memory);
        assert!(config.state_dir.is_none());
    }

    #[test]
    fn rejects_unknown_driver_scheme() {
        let err = parse(&["--driver-url", "ftp://x", "--no-persist-baselines"])
            .into_service_config()
            .unwrap_err();
        assert!(err.contains("ftp://x"));
    }

    #[test]
    fn rejects_zero_timeouts() {
        let err = parse(&["--session-idle-timeout-secs", "0", "--no-persist-baselines"])
            .into_service_config()
            .unwrap_err();
        assert!(err.contains("--session-idle-timeout-secs"));
    }

    #[test]
    fn empty_api_token_disables_auth() {
        let config = parse(&["--api-token", "", "--no-persist-baselines"])
            .into_service_config()
            .unwrap();
        assert!(config.api_token.is_none());
    }

    #[test]
    fn rejects_bad_port() {
        let argv = ["docketwatch-daemon", "--port", "70000"];
        assert!(Cli::try_parse_from(argv).is_err());
    }
}
