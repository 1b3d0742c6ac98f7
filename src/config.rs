//! Configuration types, loaded once from environment variables.

use std::time::Duration;

use secrecy::SecretString;

use crate::dispatch::MAX_SEND_DELAY;
use crate::error::ConfigError;

/// RFC 2177: clients re-issue IDLE at least every 29 minutes.
const MAX_IDLE_TIMEOUT: Duration = Duration::from_secs(29 * 60);

/// How the SMTP session is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpSecurity {
    /// Implicit TLS from the first byte (usually port 465).
    Tls,
    /// Plain connection upgraded with STARTTLS (usually port 587).
    StartTls,
}

/// Mailbox account settings. Immutable after load.
#[derive(Debug, Clone)]
pub struct MailboxOptions {
    pub host: String,
    pub imap_port: u16,
    pub smtp_port: u16,
    pub smtp_security: SmtpSecurity,
    /// Display name used on outgoing replies.
    pub sender_name: String,
    /// Address used on outgoing replies.
    pub sender_address: String,
    /// Login name for IMAP and SMTP.
    pub username: String,
    pub password: SecretString,
}

/// Text analysis endpoint settings.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub endpoint: String,
    pub api_key: SecretString,
    pub language: String,
}

/// Timing and reply settings.
#[derive(Debug, Clone)]
pub struct ResponderConfig {
    /// Shortest delay before a reply goes out.
    pub min_delay: Duration,
    /// Longest delay before a reply goes out.
    pub max_delay: Duration,
    /// How long the monitor sleeps between keep-alive checks.
    pub keepalive_interval: Duration,
    /// Upper bound for a single IDLE command before it is re-issued.
    pub idle_timeout: Duration,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    /// Name printed under the signature line.
    pub closing_name: String,
    /// Fixed seed for every random choice, for reproducible runs.
    pub rng_seed: Option<u64>,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(300),  // 5 minutes
            max_delay: Duration::from_secs(3600), // 1 hour
            keepalive_interval: Duration::from_secs(300),
            idle_timeout: Duration::from_secs(1500), // 25 minutes, below the RFC 2177 limit
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(30),
            closing_name: String::new(),
            rng_seed: None,
        }
    }
}

/// Everything the service needs at start.
#[derive(Debug, Clone)]
pub struct AutoreplyConfig {
    pub mailbox: MailboxOptions,
    pub analysis: AnalysisConfig,
    pub responder: ResponderConfig,
}

impl AutoreplyConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup: &lookup };

        let host = vars.required("AUTOREPLY_HOST")?;
        let imap_port = vars.parsed("AUTOREPLY_IMAP_PORT", 993u16)?;
        let smtp_port = vars.parsed("AUTOREPLY_SMTP_PORT", 465u16)?;
        let smtp_security = match vars.optional("AUTOREPLY_SMTP_SECURITY") {
            None if smtp_port == 465 => SmtpSecurity::Tls,
            None => SmtpSecurity::StartTls,
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "tls" | "ssl" => SmtpSecurity::Tls,
                "starttls" => SmtpSecurity::StartTls,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: "AUTOREPLY_SMTP_SECURITY".into(),
                        message: format!("expected 'tls' or 'starttls', got '{other}'"),
                    });
                }
            },
        };

        let sender_address = vars.required("AUTOREPLY_EMAIL")?;
        let sender_name = vars.required("AUTOREPLY_NAME")?;
        let username = vars
            .optional("AUTOREPLY_USERNAME")
            .unwrap_or_else(|| sender_address.clone());
        let password = SecretString::from(vars.required("AUTOREPLY_PASSWORD")?);

        let analysis = AnalysisConfig {
            endpoint: vars
                .required("AUTOREPLY_ANALYSIS_ENDPOINT")?
                .trim_end_matches('/')
                .to_string(),
            api_key: SecretString::from(vars.required("AUTOREPLY_ANALYSIS_KEY")?),
            language: vars
                .optional("AUTOREPLY_ANALYSIS_LANGUAGE")
                .unwrap_or_else(|| "en".to_string()),
        };

        let defaults = ResponderConfig::default();
        let min_delay = vars.seconds("AUTOREPLY_MIN_DELAY_SECS", defaults.min_delay)?;
        let max_delay = vars.seconds("AUTOREPLY_MAX_DELAY_SECS", defaults.max_delay)?;
        if max_delay > MAX_SEND_DELAY {
            return Err(ConfigError::InvalidValue {
                key: "AUTOREPLY_MAX_DELAY_SECS".into(),
                message: format!("must be at most {}s", MAX_SEND_DELAY.as_secs()),
            });
        }
        if min_delay > max_delay {
            return Err(ConfigError::InvalidValue {
                key: "AUTOREPLY_MAX_DELAY_SECS".into(),
                message: format!(
                    "maximum delay ({}s) is shorter than minimum delay ({}s)",
                    max_delay.as_secs(),
                    min_delay.as_secs()
                ),
            });
        }

        let keepalive_interval =
            vars.seconds("AUTOREPLY_KEEPALIVE_SECS", defaults.keepalive_interval)?;
        if keepalive_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "AUTOREPLY_KEEPALIVE_SECS".into(),
                message: "must be greater than zero".into(),
            });
        }

        let idle_timeout = vars.seconds("AUTOREPLY_IDLE_TIMEOUT_SECS", defaults.idle_timeout)?;
        if idle_timeout.is_zero() || idle_timeout > MAX_IDLE_TIMEOUT {
            return Err(ConfigError::InvalidValue {
                key: "AUTOREPLY_IDLE_TIMEOUT_SECS".into(),
                message: format!(
                    "must be between 1 and {}s, got {}s",
                    MAX_IDLE_TIMEOUT.as_secs(),
                    idle_timeout.as_secs()
                ),
            });
        }

        let responder = ResponderConfig {
            min_delay,
            max_delay,
            keepalive_interval,
            idle_timeout,
            reconnect_attempts: vars
                .parsed("AUTOREPLY_RECONNECT_ATTEMPTS", defaults.reconnect_attempts)?,
            reconnect_delay: vars
                .seconds("AUTOREPLY_RECONNECT_DELAY_SECS", defaults.reconnect_delay)?,
            closing_name: vars
                .optional("AUTOREPLY_CLOSING_NAME")
                .unwrap_or_else(|| sender_name.clone()),
            rng_seed: vars
                .optional("AUTOREPLY_RNG_SEED")
                .map(|raw| parse_value("AUTOREPLY_RNG_SEED", &raw))
                .transpose()?,
        };

        Ok(Self {
            mailbox: MailboxOptions {
                host,
                imap_port,
                smtp_port,
                smtp_security,
                sender_name,
                sender_address,
                username,
                password,
            },
            analysis,
            responder,
        })
    }
}

struct Vars<'a, F> {
    lookup: &'a F,
}

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    fn parsed<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            Some(raw) => parse_value(key, &raw),
            None => Ok(default),
        }
    }

    fn seconds(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.parsed(key, default.as_secs()).map(Duration::from_secs)
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{raw}': {e}"),
    })
}
