use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used outside development.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub token_ttl_days: i64,
    pub admin: Option<AdminBootstrap>,
}

#[derive(Debug)]
pub struct AdminBootstrap {
    pub email: String,
    pub password: String,
    pub name: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let host = get("HILEARN_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = get("HILEARN_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("HILEARN_PORT must be a port number")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("bad listen address {}:{}", host, port))?;

        let db_path = get("HILEARN_DB_PATH").unwrap_or_else(|| "hilearn.db".into()).into();

        let allow_dev_secret = get("HILEARN_ALLOW_DEV_SECRET").as_deref() == Some("1");
        let jwt_secret = get("HILEARN_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            if !allow_dev_secret {
                bail!("HILEARN_JWT_SECRET is unset or still a placeholder (set HILEARN_ALLOW_DEV_SECRET=1 for local use)");
            }
        }
        let jwt_secret = if jwt_secret.is_empty() { "dev-secret-change-me".to_string() } else { jwt_secret };

        let token_ttl_days = get("HILEARN_TOKEN_TTL_DAYS")
            .map(|v| v.parse::<i64>())
            .transpose()
            .context("HILEARN_TOKEN_TTL_DAYS must be a whole number")?
            .unwrap_or(30);

        let admin = match (get("HILEARN_ADMIN_EMAIL"), get("HILEARN_ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(AdminBootstrap {
                email,
                password,
                name: get("HILEARN_ADMIN_NAME").unwrap_or_else(|| "Support".into()),
            }),
            (Some(_), None) | (None, Some(_)) => {
                bail!("HILEARN_ADMIN_EMAIL and HILEARN_ADMIN_PASSWORD must be set together")
            }
            (None, None) => None,
        };

        Ok(Self {
            addr,
            db_path,
            jwt_secret,
            token_ttl_days,
            admin,
        })
    }
}
