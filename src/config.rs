use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub max_connections: u32,
    pub log_filter: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL not set")?;
        let port = parse_var("PORT", 8081)?;
        let max_connections = parse_var("DATABASE_MAX_CONNECTIONS", 10)?;
        let log_filter = env::var("RUST_LOG")
            .unwrap_or_else(|_| "lms_progress=info,axum=info,tower_http=info".into());

        Ok(Self {
            database_url,
            port,
            max_connections,
            log_filter,
        })
    }
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_var_falls_back_to_default() {
        let port: u16 = parse_var("LMS_PROGRESS_TEST_UNSET_PORT", 8081).unwrap();
        assert_eq!(port, 8081);
    }

    #[test]
    fn unparsable_var_names_the_key() {
        env::set_var("LMS_PROGRESS_TEST_BAD_PORT", "eighty");
        let err = parse_var::<u16>("LMS_PROGRESS_TEST_BAD_PORT", 8081).unwrap_err();
        assert!(err.to_string().contains("LMS_PROGRESS_TEST_BAD_PORT"));
        env::remove_var("LMS_PROGRESS_TEST_BAD_PORT");
    }
}
