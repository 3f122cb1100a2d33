use anyhow::{bail, Context, Result};
use clap::Parser;
use lib_relay::{ClassifierOptions, UpstreamConfig};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "server_relay.conf";
const DEFAULT_PORT: u16 = 10000;
const DEFAULT_STREAMER: &str = "rest_in_peace";
const DEFAULT_CREDENTIAL_URL: &str = "https://www.aparat.com/api/fa/v2/Live/LiveStream/";
const DEFAULT_UPSTREAM_URL: &str = "wss://lws.aparat.com/v1";
const DEFAULT_SOURCE_TAG: &str = "aparat";
const DEFAULT_RECONNECT_DELAY_MS: u64 = 5000;
const DEFAULT_FOLLOW_COOLDOWN_SECS: u64 = 30 * 60;
const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 45 * 60;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_GREETING: &str = "Welcome!";
const DEFAULT_LOG_DIR: &str = "./logs";
const DEFAULT_LOG_LEVEL: &str = "info";

/// Raw configuration as any single layer sees it. `None` means "not set here".
#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Aparat live-event relay", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "RELAY_PORT", help = "Port to listen on for subscriber connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "RELAY_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "RELAY_STREAMER_NAME", help = "Broadcaster whose live events are relayed.")]
    pub streamer_name: Option<String>,

    #[clap(long, env = "RELAY_CREDENTIAL_URL", help = "Base URL of the live stream credential API.")]
    pub credential_url: Option<String>,

    #[clap(long, env = "RELAY_UPSTREAM_URL", help = "Upstream live event WebSocket URL.")]
    pub upstream_url: Option<String>,

    #[clap(long, env = "RELAY_SOURCE_TAG", help = "Value of the `source` query parameter on the upstream socket.")]
    pub source_tag: Option<String>,

    #[clap(long, env = "RELAY_RECONNECT_DELAY_MS", help = "Fixed delay in milliseconds between upstream attempts.")]
    pub reconnect_delay_ms: Option<u64>,

    #[clap(long, env = "RELAY_FOLLOW_COOLDOWN_SECS", help = "Seconds during which a repeat follow by the same viewer is suppressed.")]
    pub follow_cooldown_secs: Option<u64>,

    #[clap(long, env = "RELAY_CLEANUP_INTERVAL_SECS", help = "Seconds between follow dedup cache sweeps.")]
    pub cleanup_interval_secs: Option<u64>,

    #[clap(long, env = "RELAY_HTTP_TIMEOUT_SECS", help = "Timeout in seconds for the credential request.")]
    pub http_timeout_secs: Option<u64>,

    #[clap(long, env = "RELAY_CONNECT_TIMEOUT_SECS", help = "Seconds allowed for the upstream socket handshake.")]
    pub connect_timeout_secs: Option<u64>,

    #[clap(long, env = "RELAY_GREETING", help = "Text frame sent to every new subscriber.")]
    pub greeting: Option<String>,

    #[clap(long, env = "RELAY_LEGACY_DONATE_TAG", help = "Emit donations under the new_follow tag (true/false).")]
    pub legacy_donate_tag: Option<bool>,

    #[clap(long, env = "RELAY_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "RELAY_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            streamer_name: other.streamer_name.or(self.streamer_name),
            credential_url: other.credential_url.or(self.credential_url),
            upstream_url: other.upstream_url.or(self.upstream_url),
            source_tag: other.source_tag.or(self.source_tag),
            reconnect_delay_ms: other.reconnect_delay_ms.or(self.reconnect_delay_ms),
            follow_cooldown_secs: other.follow_cooldown_secs.or(self.follow_cooldown_secs),
            cleanup_interval_secs: other.cleanup_interval_secs.or(self.cleanup_interval_secs),
            http_timeout_secs: other.http_timeout_secs.or(self.http_timeout_secs),
            connect_timeout_secs: other.connect_timeout_secs.or(self.connect_timeout_secs),
            greeting: other.greeting.or(self.greeting),
            legacy_donate_tag: other.legacy_donate_tag.or(self.legacy_donate_tag),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
        }
    }

    fn resolve(self, config_file: Option<PathBuf>) -> Result<Settings> {
        let cleanup_interval_secs = self.cleanup_interval_secs.unwrap_or(DEFAULT_CLEANUP_INTERVAL_SECS);
        if cleanup_interval_secs == 0 {
            bail!("cleanupIntervalSecs must be greater than zero");
        }
        let connect_timeout_secs = self.connect_timeout_secs.unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS);
        if connect_timeout_secs == 0 {
            bail!("connectTimeoutSecs must be greater than zero");
        }

        Ok(Settings {
            port: self.port.unwrap_or(DEFAULT_PORT),
            streamer_name: self.streamer_name.unwrap_or_else(|| DEFAULT_STREAMER.to_string()),
            credential_url: self.credential_url.unwrap_or_else(|| DEFAULT_CREDENTIAL_URL.to_string()),
            upstream_url: self.upstream_url.unwrap_or_else(|| DEFAULT_UPSTREAM_URL.to_string()),
            source_tag: self.source_tag.unwrap_or_else(|| DEFAULT_SOURCE_TAG.to_string()),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms.unwrap_or(DEFAULT_RECONNECT_DELAY_MS)),
            follow_cooldown: Duration::from_secs(self.follow_cooldown_secs.unwrap_or(DEFAULT_FOLLOW_COOLDOWN_SECS)),
            cleanup_interval: Duration::from_secs(cleanup_interval_secs),
            http_timeout: Duration::from_secs(self.http_timeout_secs.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS)),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            greeting: self.greeting.unwrap_or_else(|| DEFAULT_GREETING.to_string()),
            legacy_donate_tag: self.legacy_donate_tag.unwrap_or(false),
            log_dir: self.log_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR)),
            log_level: self.log_level.unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            config_file,
        })
    }
}

/// Fully resolved settings the process runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub port: u16,
    pub streamer_name: String,
    pub credential_url: String,
    pub upstream_url: String,
    pub source_tag: String,
    pub reconnect_delay: Duration,
    pub follow_cooldown: Duration,
    pub cleanup_interval: Duration,
    pub http_timeout: Duration,
    pub connect_timeout: Duration,
    pub greeting: String,
    pub legacy_donate_tag: bool,
    pub log_dir: PathBuf,
    pub log_level: String,
    /// The JSON file that contributed to these settings, if one was found.
    pub config_file: Option<PathBuf>,
}

impl Settings {
    pub fn upstream(&self) -> UpstreamConfig {
        UpstreamConfig {
            streamer_name: self.streamer_name.clone(),
            socket_url: self.upstream_url.clone(),
            source_tag: self.source_tag.clone(),
            reconnect_delay: self.reconnect_delay,
        }
    }

    pub fn classifier_options(&self) -> ClassifierOptions {
        ClassifierOptions {
            legacy_donate_tag: self.legacy_donate_tag,
        }
    }
}

/// Loads settings from defaults, the JSON file, the environment and the
/// process arguments, in increasing order of precedence. `--help` and
/// `--version` exit the process here.
pub fn load_config() -> Result<Settings> {
    layer(Config::parse())
}

/// Like [`load_config`] but parses `args` and reports argument errors
/// instead of exiting.
pub fn load_config_from<I, T>(args: I) -> Result<Settings>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    layer(Config::try_parse_from(args)?)
}

// `cli` already carries the environment underneath the flags.
fn layer(cli: Config) -> Result<Settings> {
    let explicit_path = cli.config_path.clone();
    let config_file_path = explicit_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::default();
    let mut config_file = None;

    if config_file_path.exists() {
        let config_str = fs::read_to_string(&config_file_path)
            .with_context(|| format!("Failed to read config file {}", config_file_path.display()))?;
        let file_config: Config = serde_json::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file {}", config_file_path.display()))?;
        current_config = current_config.merge(file_config);
        config_file = Some(config_file_path);
    } else if explicit_path.is_some() {
        bail!("Config file not found at {}", config_file_path.display());
    }

    current_config.merge(cli).resolve(config_file)
}
