use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::env;
use std::sync::OnceLock;
use url::Url;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_expiration_minutes: i64,
    pub public_rps: u32,
    pub admin_rps: u32,
    pub uploads_dir: String,
    pub public_base_url: String,
    /// When false candidates may start an attempt without a checkout.
    pub require_payment: bool,
    pub log_format: String,
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub stripe_price_eu: Option<String>,
    pub stripe_price_uk: Option<String>,
    pub stripe_price_us: Option<String>,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        Ok(Self {
            server_address: get_env("SERVER_ADDRESS")?,
            database_url: get_env("DATABASE_URL")?,
            jwt_secret: get_env("JWT_SECRET")?,
            jwt_expiration_minutes: get_env_parse_or("JWT_EXPIRATION_MINUTES", 60)?,
            public_rps: get_env_parse_or("PUBLIC_RPS", 50)?,
            admin_rps: get_env_parse_or("ADMIN_RPS", 20)?,
            uploads_dir: get_env_or("UPLOADS_DIR", "./uploads"),
            public_base_url: parse_base_url(&get_env_or("PUBLIC_BASE_URL", "http://localhost:3000"))?,
            require_payment: get_env_parse_or("REQUIRE_PAYMENT", true)?,
            log_format: get_env_or("LOG_FORMAT", "pretty"),
            stripe_secret_key: get_env_opt("STRIPE_SECRET_KEY"),
            stripe_webhook_secret: get_env_opt("STRIPE_WEBHOOK_SECRET"),
            stripe_price_eu: get_env_opt("STRIPE_PRICE_EU"),
            stripe_price_uk: get_env_opt("STRIPE_PRICE_UK"),
            stripe_price_us: get_env_opt("STRIPE_PRICE_US"),
            admin_email: get_env_opt("ADMIN_EMAIL"),
            admin_password: get_env_opt("ADMIN_PASSWORD"),
        })
    }
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

fn get_env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn get_env_or(name: &str, default: &str) -> String {
    get_env_opt(name).unwrap_or_else(|| default.to_string())
}

fn get_env_parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get_env_opt(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        None => Ok(default),
    }
}

/// Absolute http(s) URL without a trailing slash.
fn parse_base_url(raw: &str) -> Result<String> {
    let parsed = Url::parse(raw.trim())
        .map_err(|e| Error::Config(format!("Invalid value for PUBLIC_BASE_URL: {}", e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::Config("PUBLIC_BASE_URL must be an http(s) URL".to_string()));
    }
    Ok(raw.trim().trim_end_matches('/').to_string())
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn get_config() -> &'static Config {
    CONFIG
        .get()
        .expect("Configuration has not been initialized")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalised() {
        assert_eq!(
            parse_base_url("https://tests.example.com/").unwrap(),
            "https://tests.example.com"
        );
        assert!(parse_base_url("ftp://example.com").is_err());
        assert!(parse_base_url("not a url").is_err());
    }
}
