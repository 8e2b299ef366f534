use std::env;
use std::str::FromStr;
use std::time::Duration;

use chrono::FixedOffset;
use thiserror::Error;

use crate::rate_limit::{Calendar, DEFAULT_PER_DAY, DEFAULT_PER_HOUR, DEFAULT_PER_MINUTE, RateLimits};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// 限流计数存放在哪里
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Redis,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" => Ok(StoreBackend::Postgres),
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub jwt_secret: String,
    pub jwt_expiration_secs: u64,
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
    pub rate_limits: RateLimits,
    pub rate_limit_store: StoreBackend,
    /// 计算自然日使用的固定偏移；未配置时跟随宿主机时区
    pub utc_offset: Option<FixedOffset>,
    pub post_max_length: usize,
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

/// 可选变量：未设置时用默认值，设置了但解析失败则报错
fn optional<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => parse(name, &value),
        Err(_) => Ok(default),
    }
}

fn parse<T: FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        value: value.to_string(),
    })
}

/// 分钟为单位的时区偏移
fn parse_utc_offset(value: &str) -> Result<FixedOffset, ConfigError> {
    let invalid = || ConfigError::Invalid {
        name: "RATE_LIMIT_UTC_OFFSET_MINUTES",
        value: value.to_string(),
    };
    let minutes: i32 = value.trim().parse().map_err(|_| invalid())?;
    FixedOffset::east_opt(minutes * 60).ok_or_else(invalid)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let jwt_expiration_hours = match env::var("JWT_EXPIRATION") {
            Ok(value) => parse::<u64>("JWT_EXPIRATION", value.trim_end_matches('h'))?,
            Err(_) => 24,
        };
        let utc_offset = match env::var("RATE_LIMIT_UTC_OFFSET_MINUTES") {
            Ok(value) => Some(parse_utc_offset(&value)?),
            Err(_) => None,
        };
        let rate_limit_store = match env::var("RATE_LIMIT_STORE") {
            Ok(value) => value.parse().map_err(|_| ConfigError::Invalid {
                name: "RATE_LIMIT_STORE",
                value,
            })?,
            Err(_) => StoreBackend::Postgres,
        };
        let redis_url = env::var("REDIS_URL").ok();
        if rate_limit_store == StoreBackend::Redis && redis_url.is_none() {
            return Err(ConfigError::Missing("REDIS_URL"));
        }

        Ok(Config {
            database_url: required("DATABASE_URL")?,
            redis_url,
            jwt_secret: required("JWT_SECRET")?,
            jwt_expiration_secs: jwt_expiration_hours * 3600,
            server_host: required("SERVER_HOST")?,
            server_port: parse("SERVER_PORT", &required("SERVER_PORT")?)?,
            api_base_uri: optional("API_BASE_URI", "/api".to_string())?,
            rate_limits: RateLimits {
                per_minute: optional("RATE_LIMIT_PER_MINUTE", DEFAULT_PER_MINUTE)?,
                per_hour: optional("RATE_LIMIT_PER_HOUR", DEFAULT_PER_HOUR)?,
                per_day: optional("RATE_LIMIT_PER_DAY", DEFAULT_PER_DAY)?,
            },
            rate_limit_store,
            utc_offset,
            post_max_length: optional("POST_MAX_LENGTH", 1000)?,
        })
    }

    pub fn jwt_expiration(&self) -> Duration {
        Duration::from_secs(self.jwt_expiration_secs)
    }

    pub fn calendar(&self) -> Calendar {
        self.utc_offset.map_or_else(Calendar::local, Calendar::new)
    }
}
