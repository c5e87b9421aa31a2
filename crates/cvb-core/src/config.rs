use std::{env, fs, net::IpAddr, path::Path, time::Duration};

use crate::{errors::Error, Result};

pub const DEFAULT_KICK_API_BASE: &str = "https://api.kick.com/public/v1";
pub const DEFAULT_KICK_AUTH_BASE: &str = "https://id.kick.com";
pub const DEFAULT_RATES_API_BASE: &str = "https://api.exchangerate-api.com/v4/latest";

/// Typed process configuration, read from the environment (and `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    // Storage
    pub database_url: String,

    // OAuth client
    pub kick_client_id: String,
    pub kick_client_secret: String,
    pub kick_redirect_uri: String,

    // Listeners
    pub bind_address: IpAddr,
    pub web_port: u16,
    pub webhook_port: u16,

    // Remote endpoints
    pub kick_api_base: String,
    pub kick_auth_base: String,
    pub rates_api_base: String,
    pub http_timeout: Duration,

    // Background work
    pub token_refresh_interval: Duration,
    pub token_refresh_buffer: Duration,
    pub dedup_ttl: Duration,
    pub dedup_sweep_interval: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);
        let required = |key: &str| {
            get(key).ok_or_else(|| {
                Error::Config(format!("{key} environment variable is required"))
            })
        };
        let secs = |key: &str, default: u64| -> Result<Duration> {
            match get(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| Error::Config(format!("{key} must be a number of seconds"))),
                None => Ok(Duration::from_secs(default)),
            }
        };
        let port = |key: &str, default: u16| -> Result<u16> {
            match get(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u16>()
                    .map_err(|_| Error::Config(format!("{key} must be a valid port"))),
                None => Ok(default),
            }
        };

        let kick_client_id = required("KICK_CLIENT_ID")?;
        let kick_client_secret = required("KICK_CLIENT_SECRET")?;
        let kick_redirect_uri = required("KICK_REDIRECT_URI")?;

        let database_url = get("DATABASE_URL").unwrap_or_else(|| "convertbot.db".to_string());

        let bind_address = match get("BIND_ADDRESS") {
            Some(raw) => raw
                .trim()
                .parse::<IpAddr>()
                .map_err(|_| Error::Config(format!("BIND_ADDRESS is not an ip address: {raw}")))?,
            None => IpAddr::from([0, 0, 0, 0]),
        };
        let web_port = port("WEB_PORT", 3000)?;
        let webhook_port = port("WEBHOOK_PORT", 3001)?;
        if web_port == webhook_port {
            return Err(Error::Config(
                "WEB_PORT and WEBHOOK_PORT must differ".to_string(),
            ));
        }

        let kick_api_base = trim_base(get("KICK_API_BASE"), DEFAULT_KICK_API_BASE);
        let kick_auth_base = trim_base(get("KICK_AUTH_BASE"), DEFAULT_KICK_AUTH_BASE);
        let rates_api_base = trim_base(get("RATES_API_BASE"), DEFAULT_RATES_API_BASE);
        let http_timeout = secs("HTTP_TIMEOUT_SECS", 10)?;

        let token_refresh_interval = secs("TOKEN_REFRESH_INTERVAL_SECS", 60 * 60)?;
        let token_refresh_buffer = secs("TOKEN_REFRESH_BUFFER_SECS", 60 * 60)?;
        let dedup_ttl = secs("DEDUP_TTL_SECS", 60)?;
        let dedup_sweep_interval = secs("DEDUP_SWEEP_INTERVAL_SECS", 5 * 60)?;

        Ok(Self {
            database_url,
            kick_client_id,
            kick_client_secret,
            kick_redirect_uri,
            bind_address,
            web_port,
            webhook_port,
            kick_api_base,
            kick_auth_base,
            rates_api_base,
            http_timeout,
            token_refresh_interval,
            token_refresh_buffer,
            dedup_ttl,
            dedup_sweep_interval,
        })
    }
}

fn trim_base(v: Option<String>, default: &str) -> String {
    v.unwrap_or_else(|| default.to_string())
        .trim()
        .trim_end_matches('/')
        .to_string()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
