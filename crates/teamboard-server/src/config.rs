use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};

use teamboard_gateway::lifecycle::DEFAULT_OUTBOUND_BUFFER;

/// How `joinTeam` requests are vetted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinPolicyKind {
    Trust,
    Verify,
}

impl FromStr for JoinPolicyKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trust" => Ok(Self::Trust),
            "verify" => Ok(Self::Verify),
            other => bail!("unknown join policy '{}', expected 'trust' or 'verify'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub join_policy: JoinPolicyKind,
    pub outbound_buffer: usize,
    pub identify_timeout: Duration,
}

impl Config {
    /// Read `TEAMBOARD_*` variables from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Missing keys fall back to defaults;
    /// present but unparsable values are an error.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let port = var("TEAMBOARD_PORT", "3000")
            .parse()
            .context("TEAMBOARD_PORT must be a port number")?;
        let join_policy = var("TEAMBOARD_JOIN_POLICY", "trust").parse()?;
        let outbound_buffer: usize = var("TEAMBOARD_OUTBOUND_BUFFER", &DEFAULT_OUTBOUND_BUFFER.to_string())
            .parse()
            .context("TEAMBOARD_OUTBOUND_BUFFER must be a positive integer")?;
        if outbound_buffer == 0 {
            bail!("TEAMBOARD_OUTBOUND_BUFFER must be at least 1");
        }
        let identify_secs: u64 = var("TEAMBOARD_IDENTIFY_TIMEOUT_SECS", "10")
            .parse()
            .context("TEAMBOARD_IDENTIFY_TIMEOUT_SECS must be a whole number of seconds")?;

        Ok(Self {
            jwt_secret: var("TEAMBOARD_JWT_SECRET", "dev-secret-change-me"),
            db_path: PathBuf::from(var("TEAMBOARD_DB_PATH", "teamboard.db")),
            host: var("TEAMBOARD_HOST", "0.0.0.0"),
            port,
            join_policy,
            outbound_buffer,
            identify_timeout: Duration::from_secs(identify_secs),
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }
}
