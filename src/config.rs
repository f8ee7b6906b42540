use std::time::Duration;

use thiserror::Error;

/// Raw environment snapshot. Values are kept exactly as read; parsing and
/// defaulting happen in [`Settings::validate`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Settings {
    pub env: Option<String>,
    pub port: Option<String>,
    pub origin: Option<String>,
    pub bcrypt_salt_rounds: Option<String>,
    pub jwt_access_secret: Option<String>,
    pub jwt_refresh_secret: Option<String>,
    pub jwt_access_expires_in: Option<String>,
    pub jwt_refresh_expires_in: Option<String>,
    pub reset_pass_ui_link: Option<String>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<String>,
    pub smtp_mail: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_service: Option<String>,
    pub mail_to: Option<String>,
    pub database_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub env: String,
    pub port: u16,
    pub origins: Vec<String>,
    pub bcrypt_cost: u32,
    pub jwt_access_secret: String,
    pub jwt_refresh_secret: String,
    pub jwt_access_ttl: Duration,
    pub jwt_refresh_ttl: Duration,
    pub reset_pass_ui_link: Option<String>,
    pub smtp: Option<SmtpConfig>,
    // Outside production all outgoing mail is redirected here when set.
    pub mail_to: Option<String>,
    pub database_url: String,
}

#[derive(Clone, Debug)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub mail: String,
    pub password: Option<String>,
    pub service: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

const DEFAULT_PORT: u16 = 3333;
const DEFAULT_BCRYPT_COST: u32 = 12;
const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_ACCESS_EXPIRES_IN: &str = "1d";
const DEFAULT_REFRESH_EXPIRES_IN: &str = "30d";

impl Settings {
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            env: lookup("NODE_ENV"),
            port: lookup("PORT"),
            origin: lookup("ORIGIN"),
            bcrypt_salt_rounds: lookup("BCRYPT_SALT_ROUNDS"),
            jwt_access_secret: lookup("JWT_ACCESS_SECRET"),
            jwt_refresh_secret: lookup("JWT_REFRESH_SECRET"),
            jwt_access_expires_in: lookup("JWT_ACCESS_EXPIRES_IN"),
            jwt_refresh_expires_in: lookup("JWT_REFRESH_EXPIRES_IN"),
            reset_pass_ui_link: lookup("RESET_PASS_UI_LINK"),
            smtp_host: lookup("SMTP_HOST"),
            smtp_port: lookup("SMTP_PORT"),
            smtp_mail: lookup("SMTP_MAIL"),
            smtp_password: lookup("SMTP_PASSWORD"),
            smtp_service: lookup("SMTP_SERVICE"),
            mail_to: lookup("MAIL_TO"),
            database_url: lookup("DATABASE_URL"),
        }
    }

    /// Same answer `Config::is_production` gives once validated.
    pub fn is_production(&self) -> bool {
        self.env.as_deref().is_some_and(is_production_env)
    }

    fn smtp_requested(&self) -> bool {
        nonblank(&self.smtp_host).is_some() || nonblank(&self.smtp_service).is_some()
    }

    /// Checks every required key before parsing anything, so a
    /// misconfigured deployment sees the whole list in one error.
    pub fn validate(&self) -> Result<Config, ConfigError> {
        let mut missing = Vec::new();
        for (key, value) in [
            ("DATABASE_URL", &self.database_url),
            ("JWT_ACCESS_SECRET", &self.jwt_access_secret),
            ("JWT_REFRESH_SECRET", &self.jwt_refresh_secret),
        ] {
            if nonblank(value).is_none() {
                missing.push(key);
            }
        }
        if self.smtp_requested() && nonblank(&self.smtp_mail).is_none() {
            missing.push("SMTP_MAIL");
        }
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let port = match nonblank(&self.port) {
            Some(value) => parse_number::<u16>("PORT", value)?,
            None => DEFAULT_PORT,
        };

        let bcrypt_cost = match nonblank(&self.bcrypt_salt_rounds) {
            Some(value) => parse_number::<u32>("BCRYPT_SALT_ROUNDS", value)?,
            None => DEFAULT_BCRYPT_COST,
        };
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(ConfigError::Invalid {
                key: "BCRYPT_SALT_ROUNDS",
                reason: format!("{bcrypt_cost} is outside 4..=31"),
            });
        }

        let jwt_access_ttl = parse_lifetime(
            "JWT_ACCESS_EXPIRES_IN",
            nonblank(&self.jwt_access_expires_in).unwrap_or(DEFAULT_ACCESS_EXPIRES_IN),
        )?;
        let jwt_refresh_ttl = parse_lifetime(
            "JWT_REFRESH_EXPIRES_IN",
            nonblank(&self.jwt_refresh_expires_in).unwrap_or(DEFAULT_REFRESH_EXPIRES_IN),
        )?;

        let origins = nonblank(&self.origin)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Config {
            env: nonblank(&self.env).unwrap_or("development").to_string(),
            port,
            origins,
            bcrypt_cost,
            jwt_access_secret: required(&self.jwt_access_secret),
            jwt_refresh_secret: required(&self.jwt_refresh_secret),
            jwt_access_ttl,
            jwt_refresh_ttl,
            reset_pass_ui_link: nonblank(&self.reset_pass_ui_link).map(str::to_string),
            smtp: self.smtp_config()?,
            mail_to: nonblank(&self.mail_to).map(str::to_string),
            database_url: required(&self.database_url),
        })
    }

    fn smtp_config(&self) -> Result<Option<SmtpConfig>, ConfigError> {
        let service = nonblank(&self.smtp_service).map(|value| value.to_ascii_lowercase());
        let host = match (nonblank(&self.smtp_host), service.as_deref()) {
            (Some(host), _) => host.to_string(),
            (None, Some(service)) => well_known_relay(service)
                .ok_or_else(|| ConfigError::Invalid {
                    key: "SMTP_SERVICE",
                    reason: format!("unknown service {service}, set SMTP_HOST instead"),
                })?
                .to_string(),
            (None, None) => return Ok(None),
        };
        let port = match nonblank(&self.smtp_port) {
            Some(value) => parse_number::<u16>("SMTP_PORT", value)?,
            None => DEFAULT_SMTP_PORT,
        };

        Ok(Some(SmtpConfig {
            host,
            port,
            mail: required(&self.smtp_mail),
            password: nonblank(&self.smtp_password).map(str::to_string),
            service,
        }))
    }
}

fn is_production_env(env: &str) -> bool {
    env.trim().eq_ignore_ascii_case("production")
}

impl Config {
    pub fn is_production(&self) -> bool {
        is_production_env(&self.env)
    }
}

fn nonblank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|value| !value.is_empty())
}

fn required(value: &Option<String>) -> String {
    nonblank(value).unwrap_or_default().to_string()
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse::<T>().map_err(|_| ConfigError::Invalid {
        key,
        reason: format!("{value:?} is not a valid number"),
    })
}

fn well_known_relay(service: &str) -> Option<&'static str> {
    match service {
        "gmail" => Some("smtp.gmail.com"),
        "outlook" | "hotmail" | "outlook365" => Some("smtp-mail.outlook.com"),
        "yahoo" => Some("smtp.mail.yahoo.com"),
        "zoho" => Some("smtp.zoho.com"),
        _ => None,
    }
}

/// Parses token lifetimes such as `3600`, `15m`, `12h`, `7d`.
/// A bare number is seconds.
pub fn parse_lifetime(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        key,
        reason: format!("{value:?} {reason}"),
    };

    let value = value.trim();
    let split = value
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let amount: u64 = digits
        .parse()
        .map_err(|_| invalid("must start with a whole number"))?;
    let multiplier = match unit.trim() {
        "" | "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 60 * 60 * 24,
        "w" => 60 * 60 * 24 * 7,
        "y" => 60 * 60 * 24 * 365,
        _ => return Err(invalid("has an unknown unit, expected s|m|h|d|w|y")),
    };
    if amount == 0 {
        return Err(invalid("must be greater than zero"));
    }
    amount
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| invalid("is too large"))
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Settings {
        database_url: Some("postgres://localhost/auth".to_string()),
        jwt_access_secret: Some("access-secret".to_string()),
        jwt_refresh_secret: Some("refresh-secret".to_string()),
        jwt_access_expires_in: Some("15m".to_string()),
        bcrypt_salt_rounds: Some("4".to_string()),
        reset_pass_ui_link: Some("http://ui.test/reset-password".to_string()),
        ..Settings::default()
    }
    .validate()
    .expect("test settings are complete")
}
