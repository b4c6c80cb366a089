use std::env;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow};

use crate::stats::{AttendancePolicy, MAX_EDIT_WINDOW_HOURS};

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub server_addr: String,
    pub access_token_ttl: usize,
    pub refresh_token_ttl: usize,

    // Rate limiting
    pub rate_login_per_min: u32,
    pub rate_refresh_per_min: u32,
    pub rate_protected_per_min: u32,

    pub api_prefix: String,

    // Attendance rules
    pub min_attendance_percentage: f64,
    pub attendance_edit_hours: i64,

    // Login lockout
    pub max_login_attempts: u32,
    pub login_lockout_secs: u64,

    pub db_max_connections: u32,
    pub run_migrations: bool,
    pub log_dir: String,

    /// Created on startup when no admin account exists yet.
    pub bootstrap_admin: Option<(String, String)>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| lookup(key).ok_or_else(|| anyhow!("{key} must be set"));

        let bootstrap_admin = match (
            lookup("BOOTSTRAP_ADMIN_EMAIL"),
            lookup("BOOTSTRAP_ADMIN_PASSWORD"),
        ) {
            (Some(email), Some(password)) => Some((email, password)),
            _ => None,
        };

        let config = Self {
            server_addr: required("SERVER_ADDR")?,
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            access_token_ttl: parse_or(&lookup, "ACCESS_TOKEN_TTL", 900)?, // 15 min
            refresh_token_ttl: parse_or(&lookup, "REFRESH_TOKEN_TTL", 604_800)?, // 7 days

            rate_login_per_min: parse_or(&lookup, "RATE_LOGIN_PER_MIN", 60)?,
            rate_refresh_per_min: parse_or(&lookup, "RATE_REFRESH_PER_MIN", 30)?,
            rate_protected_per_min: parse_or(&lookup, "RATE_PROTECTED_PER_MIN", 1000)?,

            api_prefix: lookup("API_PREFIX").unwrap_or_else(|| "/api".to_string()),

            min_attendance_percentage: parse_or(&lookup, "MIN_ATTENDANCE_PERCENTAGE", 75.0)?,
            attendance_edit_hours: parse_or(&lookup, "ATTENDANCE_EDIT_HOURS", 24)?,

            max_login_attempts: parse_or(&lookup, "MAX_LOGIN_ATTEMPTS", 5)?,
            login_lockout_secs: parse_or(&lookup, "LOGIN_LOCKOUT_SECS", 1800)?, // 30 min

            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 10)?,
            run_migrations: parse_or(&lookup, "RUN_MIGRATIONS", true)?,
            log_dir: lookup("LOG_DIR").unwrap_or_else(|| "logs".to_string()),

            bootstrap_admin,
        };

        if !(0.0..=100.0).contains(&config.min_attendance_percentage) {
            return Err(anyhow!(
                "MIN_ATTENDANCE_PERCENTAGE must be between 0 and 100, got {}",
                config.min_attendance_percentage
            ));
        }
        if !(0..=MAX_EDIT_WINDOW_HOURS).contains(&config.attendance_edit_hours) {
            return Err(anyhow!(
                "ATTENDANCE_EDIT_HOURS must be between 0 and {MAX_EDIT_WINDOW_HOURS}, got {}",
                config.attendance_edit_hours
            ));
        }

        Ok(config)
    }

    pub fn attendance_policy(&self) -> AttendancePolicy {
        AttendancePolicy {
            min_attendance_percentage: self.min_attendance_percentage,
            edit_window_hours: self.attendance_edit_hours,
        }
    }
}

#[cfg(test)]
impl Config {
    pub fn for_tests() -> Self {
        Self::from_lookup(|key| match key {
            "SERVER_ADDR" => Some("127.0.0.1:0".to_string()),
            "DATABASE_URL" => Some("mysql://localhost/attendance_test".to_string()),
            "JWT_SECRET" => Some("test-secret".to_string()),
            _ => None,
        })
        .expect("test config")
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("SERVER_ADDR", "127.0.0.1:8080"),
        ("DATABASE_URL", "mysql://root@localhost/attendance_system"),
        ("JWT_SECRET", "secret"),
    ];

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup_from(&REQUIRED)).unwrap();
        assert_eq!(config.api_prefix, "/api");
        assert_eq!(config.access_token_ttl, 900);
        assert_eq!(config.min_attendance_percentage, 75.0);
        assert_eq!(config.attendance_edit_hours, 24);
        assert_eq!(config.max_login_attempts, 5);
        assert_eq!(config.login_lockout_secs, 1800);
        assert!(config.run_migrations);
        assert!(config.bootstrap_admin.is_none());

        let policy = config.attendance_policy();
        assert_eq!(policy.min_attendance_percentage, 75.0);
        assert_eq!(policy.edit_window_hours, 24);
    }

    #[test]
    fn overrides_are_parsed() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("MIN_ATTENDANCE_PERCENTAGE", "80.5"));
        pairs.push(("ATTENDANCE_EDIT_HOURS", "48"));
        pairs.push(("RUN_MIGRATIONS", "false"));
        pairs.push(("BOOTSTRAP_ADMIN_EMAIL", "admin@school.test"));
        pairs.push(("BOOTSTRAP_ADMIN_PASSWORD", "changeme"));

        let config = Config::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(config.min_attendance_percentage, 80.5);
        assert_eq!(config.attendance_edit_hours, 48);
        assert!(!config.run_migrations);
        assert_eq!(
            config.bootstrap_admin,
            Some(("admin@school.test".to_string(), "changeme".to_string()))
        );
    }

    #[test]
    fn missing_required_key_is_reported() {
        let Err(err) = Config::from_lookup(lookup_from(&REQUIRED[..2])) else {
            panic!("missing JWT_SECRET accepted");
        };
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("MAX_LOGIN_ATTEMPTS", "five"));
        let Err(err) = Config::from_lookup(lookup_from(&pairs)) else {
            panic!("non-numeric MAX_LOGIN_ATTEMPTS accepted");
        };
        assert!(err.to_string().contains("MAX_LOGIN_ATTEMPTS"));

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("MIN_ATTENDANCE_PERCENTAGE", "120"));
        assert!(Config::from_lookup(lookup_from(&pairs)).is_err());
    }

    #[test]
    fn edit_window_must_fit_the_bounds() {
        for raw in ["-1", "9223372036854775807", "876001"] {
            let mut pairs = REQUIRED.to_vec();
            pairs.push(("ATTENDANCE_EDIT_HOURS", raw));
            let Err(err) = Config::from_lookup(lookup_from(&pairs)) else {
                panic!("ATTENDANCE_EDIT_HOURS={raw} accepted");
            };
            assert!(err.to_string().contains("ATTENDANCE_EDIT_HOURS"));
        }

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("ATTENDANCE_EDIT_HOURS", "876000"));
        let config = Config::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(config.attendance_edit_hours, MAX_EDIT_WINDOW_HOURS);
    }
}
