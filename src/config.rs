use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{GatewayError, Result};

/// `stdio` or `http` transport, selected by the `TRANSPORT` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Stdio,
    Http,
}

/// Startup configuration, read entirely from the process environment — no
/// config file, no CLI flags beyond `--check`/`--help`.
#[derive(Debug, Clone)]
pub struct Config {
    pub transport: Transport,
    pub http_port: u16,
    pub auth_token: Option<String>,
    pub jwt_secret: Vec<u8>,
    pub jwt_expires_in: Duration,
    pub enable_https: bool,
    pub ssl_cert_path: Option<PathBuf>,
    pub ssl_key_path: Option<PathBuf>,
    pub rate_limit_enabled: bool,
    pub rate_limit_window_ms: u64,
    pub rate_limit_max_requests: u32,
    pub data_dir: PathBuf,
}

impl Config {
    /// Load from the environment, applying defaults for anything unset.
    pub fn load() -> Result<Self> {
        let transport = match env_opt("TRANSPORT").as_deref() {
            Some("stdio") => Transport::Stdio,
            Some("http") | None => Transport::Http,
            Some(other) => {
                return Err(GatewayError::Config(format!(
                    "TRANSPORT must be 'stdio' or 'http', got '{other}'"
                )));
            }
        };

        let http_port = env_opt("HTTP_PORT")
            .map(|s| s.parse::<u16>())
            .transpose()
            .map_err(|_| GatewayError::Config("HTTP_PORT must be an integer 1-65535".into()))?
            .unwrap_or(9274);

        let auth_token = env_opt("AUTH_TOKEN");
        if transport == Transport::Stdio && auth_token.is_none() {
            return Err(GatewayError::Config(
                "AUTH_TOKEN is required when TRANSPORT=stdio".into(),
            ));
        }

        let jwt_secret = match env_opt("JWT_SECRET") {
            Some(s) if s.len() >= 32 => s.into_bytes(),
            Some(_) => {
                return Err(GatewayError::Config("JWT_SECRET must be at least 32 characters".into()));
            }
            None => {
                warn!("JWT_SECRET not set; generating an ephemeral development secret");
                use rand::RngCore;
                let mut buf = [0u8; 48];
                rand::rngs::OsRng.fill_bytes(&mut buf);
                data_encoding::BASE64URL_NOPAD.encode(&buf).into_bytes()
            }
        };

        let jwt_expires_in = env_opt("JWT_EXPIRES_IN")
            .map(|s| parse_duration(&s))
            .transpose()?
            .unwrap_or(Duration::from_secs(7 * 24 * 3600));

        let enable_https = env_bool("ENABLE_HTTPS", false);
        let ssl_cert_path = env_opt("SSL_CERT_PATH").map(PathBuf::from);
        let ssl_key_path = env_opt("SSL_KEY_PATH").map(PathBuf::from);
        if enable_https && (ssl_cert_path.is_none() || ssl_key_path.is_none()) {
            return Err(GatewayError::Config(
                "ENABLE_HTTPS=true requires SSL_CERT_PATH and SSL_KEY_PATH".into(),
            ));
        }

        let rate_limit_enabled = env_bool("RATE_LIMIT_ENABLED", true);
        let rate_limit_window_ms = env_opt("RATE_LIMIT_WINDOW_MS")
            .map(|s| s.parse::<u64>())
            .transpose()
            .map_err(|_| GatewayError::Config("RATE_LIMIT_WINDOW_MS must be an integer".into()))?
            .unwrap_or(900_000);
        let rate_limit_max_requests = env_opt("RATE_LIMIT_MAX_REQUESTS")
            .map(|s| s.parse::<u32>())
            .transpose()
            .map_err(|_| GatewayError::Config("RATE_LIMIT_MAX_REQUESTS must be an integer".into()))?
            .unwrap_or(100);

        let data_dir = Self::data_dir();

        info!(?transport, http_port, "configuration loaded");

        Ok(Config {
            transport,
            http_port,
            auth_token,
            jwt_secret,
            jwt_expires_in,
            enable_https,
            ssl_cert_path,
            ssl_key_path,
            rate_limit_enabled,
            rate_limit_window_ms,
            rate_limit_max_requests,
            data_dir,
        })
    }

    /// `data/` directory holding the catalog store file and the master key
    /// file, relative to the current working directory unless `GATEWAY_DATA_DIR`
    /// overrides it.
    pub fn data_dir() -> PathBuf {
        env_opt("GATEWAY_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("data"))
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.data_dir.join("catalog.db")
    }

    pub fn master_key_path(&self) -> PathBuf {
        self.data_dir.join("master.key")
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    match env_opt(key).as_deref() {
        Some("true") | Some("1") | Some("yes") => true,
        Some("false") | Some("0") | Some("no") => false,
        _ => default,
    }
}

/// Parses durations of the form `7d`, `24h`, `30m`, `3600s`, or a bare
/// integer number of seconds.
fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let (num, unit) = s.split_at(s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len()));
    let n: u64 = num
        .parse()
        .map_err(|_| GatewayError::Config(format!("invalid duration: {s}")))?;
    let secs = match unit {
        "" | "s" => n,
        "m" => n * 60,
        "h" => n * 3600,
        "d" => n * 86400,
        other => return Err(GatewayError::Config(format!("unknown duration unit: {other}"))),
    };
    Ok(Duration::from_secs(secs))
}
