use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::{env, net::SocketAddr, str::FromStr};

/// Upper bound for `QUICK_UNDO_MAX_TTL_SECONDS` (one year).
pub const QUICK_UNDO_TTL_CEILING_SECONDS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub bind_addr: SocketAddr,
    /// TTL applied to quick-undo entries staged without an explicit one.
    pub quick_undo_ttl_seconds: u64,
    pub quick_undo_max_ttl_seconds: u64,
    /// Period of the background quick-undo sweep. Zero disables the sweeper.
    pub undo_sweep_interval_seconds: u64,
    pub change_feed_capacity: usize,
    /// Lets admins undo entries recorded by other actors.
    pub admin_undo_any: bool,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/changekeeper".to_string());

        let jwt_secret = env::var("JWT_SECRET")
            .unwrap_or_else(|_| "your-secret-key-change-this-in-production".to_string());

        let bind_addr = parse_var("BIND_ADDR", "0.0.0.0:3000")?;
        let quick_undo_ttl_seconds = parse_var("QUICK_UNDO_TTL_SECONDS", "300")?;
        let quick_undo_max_ttl_seconds = parse_var("QUICK_UNDO_MAX_TTL_SECONDS", "86400")?;
        let undo_sweep_interval_seconds = parse_var("UNDO_SWEEP_INTERVAL_SECONDS", "60")?;
        let change_feed_capacity = parse_var("CHANGE_FEED_CAPACITY", "1024")?;
        let admin_undo_any = parse_bool(
            "ADMIN_UNDO_ANY",
            &env::var("ADMIN_UNDO_ANY").unwrap_or_else(|_| "false".to_string()),
        )?;

        let config = Config {
            database_url,
            jwt_secret,
            bind_addr,
            quick_undo_ttl_seconds,
            quick_undo_max_ttl_seconds,
            undo_sweep_interval_seconds,
            change_feed_capacity,
            admin_undo_any,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.quick_undo_max_ttl_seconds > QUICK_UNDO_TTL_CEILING_SECONDS {
            return Err(anyhow!(
                "QUICK_UNDO_MAX_TTL_SECONDS must not exceed {}",
                QUICK_UNDO_TTL_CEILING_SECONDS
            ));
        }
        if self.quick_undo_ttl_seconds == 0 {
            return Err(anyhow!("QUICK_UNDO_TTL_SECONDS must be greater than zero"));
        }
        if self.quick_undo_ttl_seconds > self.quick_undo_max_ttl_seconds {
            return Err(anyhow!(
                "QUICK_UNDO_TTL_SECONDS ({}) exceeds QUICK_UNDO_MAX_TTL_SECONDS ({})",
                self.quick_undo_ttl_seconds,
                self.quick_undo_max_ttl_seconds
            ));
        }
        if self.change_feed_capacity == 0 {
            return Err(anyhow!("CHANGE_FEED_CAPACITY must be greater than zero"));
        }
        Ok(())
    }
}

fn parse_var<T>(name: &str, default: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.trim()
        .parse()
        .with_context(|| format!("Invalid {} value: {}", name, raw))
}

fn parse_bool(name: &str, raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(anyhow!("Invalid {} value: {}", name, other)),
    }
}
