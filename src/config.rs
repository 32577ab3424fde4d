use std::fs;
use std::path::Path;

use lettre::message::Mailbox;
use log::debug;
use regex::Regex;
use serde::Deserialize;

use crate::error::{DigestError, Result};
use crate::scheduler::Trigger;

/// Configuration for a single RSS feed source.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// SMTP transport settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Upgrade a plaintext connection with STARTTLS.
    #[serde(default = "default_true")]
    pub use_tls: bool,
    /// Implicit TLS from the first byte. Mutually exclusive with `use_tls`.
    #[serde(default)]
    pub use_ssl: bool,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub sender: String,
    pub smtp: SmtpConfig,
}

/// When a delivery fires: exactly one of `cron` or `every_minutes`.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    pub cron: Option<String>,
    pub every_minutes: Option<u32>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// A named recipient group with its own feed subset, window, subject,
/// and optional schedule.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    pub name: String,
    /// Explicit feed id subset; absent means all configured feeds.
    pub feeds: Option<Vec<String>>,
    pub recipients: Vec<String>,
    pub window_hours: Option<u32>,
    pub subject_template: Option<String>,
    pub schedule: Option<ScheduleConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub feeds: Vec<FeedConfig>,
    pub email: EmailConfig,
    pub deliveries: Vec<DeliveryConfig>,
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: u32,
}

fn default_lookback_hours() -> u32 {
    12
}

/// Substitute `${VAR}` expressions with environment variable values.
///
/// Runs over the raw text before YAML parsing, so placeholders may appear
/// anywhere in the file.
fn substitute_env(raw: &str) -> Result<String> {
    let pattern = Regex::new(r"\$\{([^}]+)\}").expect("static pattern");
    let mut result = String::with_capacity(raw.len());
    let mut last = 0;
    for caps in pattern.captures_iter(raw) {
        let whole = caps.get(0).expect("capture 0 always present");
        let name = &caps[1];
        let value = std::env::var(name)
            .map_err(|_| DigestError::MissingEnvVar(name.to_string()))?;
        result.push_str(&raw[last..whole.start()]);
        result.push_str(&value);
        last = whole.end();
    }
    result.push_str(&raw[last..]);
    Ok(result)
}

impl AppConfig {
    /// Load and validate configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DigestError::ConfigNotFound(path.to_path_buf()));
        }
        let raw = fs::read_to_string(path)
            .map_err(|e| DigestError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let substituted = substitute_env(&raw)?;
        let config: AppConfig = serde_yaml::from_str(&substituted)?;
        config.validate()?;
        debug!(
            "Loaded configuration: {} feeds, {} deliveries",
            config.feeds.len(),
            config.deliveries.len()
        );
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut seen_ids = std::collections::HashSet::new();
        for feed in &self.feeds {
            if !seen_ids.insert(feed.id.as_str()) {
                return Err(DigestError::Config(format!(
                    "duplicate feed id '{}'",
                    feed.id
                )));
            }
            let url = url::Url::parse(&feed.url).map_err(|e| {
                DigestError::Config(format!("feed '{}' has invalid url: {}", feed.id, e))
            })?;
            match url.scheme() {
                "http" | "https" => {}
                scheme => {
                    return Err(DigestError::Config(format!(
                        "feed '{}' has unsupported url scheme '{}'",
                        feed.id, scheme
                    )));
                }
            }
        }

        if self.email.smtp.use_tls && self.email.smtp.use_ssl {
            return Err(DigestError::Config(
                "specify only one of use_ssl or use_tls".to_string(),
            ));
        }
        self.email.sender.parse::<Mailbox>().map_err(|e| {
            DigestError::Config(format!("invalid sender address '{}': {}", self.email.sender, e))
        })?;

        if self.lookback_hours == 0 {
            return Err(DigestError::Config(
                "lookback_hours must be positive".to_string(),
            ));
        }

        for delivery in &self.deliveries {
            if delivery.recipients.is_empty() {
                return Err(DigestError::Config(format!(
                    "delivery '{}' has no recipients",
                    delivery.name
                )));
            }
            for recipient in &delivery.recipients {
                recipient.parse::<Mailbox>().map_err(|e| {
                    DigestError::Config(format!(
                        "delivery '{}' has invalid recipient '{}': {}",
                        delivery.name, recipient, e
                    ))
                })?;
            }
            if delivery.window_hours == Some(0) {
                return Err(DigestError::Config(format!(
                    "delivery '{}' has zero window_hours",
                    delivery.name
                )));
            }
            if let Some(schedule) = &delivery.schedule {
                schedule.validate(&delivery.name)?;
            }
        }
        Ok(())
    }

    pub fn feed_by_id(&self, delivery: &str, feed_id: &str) -> Result<&FeedConfig> {
        self.feeds
            .iter()
            .find(|feed| feed.id == feed_id)
            .ok_or_else(|| DigestError::UnknownFeedId {
                delivery: delivery.to_string(),
                feed_id: feed_id.to_string(),
            })
    }

    /// Feeds a delivery draws from: its explicit subset, or all feeds.
    pub fn feeds_for_delivery(&self, delivery: &DeliveryConfig) -> Result<Vec<&FeedConfig>> {
        match &delivery.feeds {
            Some(ids) => ids
                .iter()
                .map(|id| self.feed_by_id(&delivery.name, id))
                .collect(),
            None => Ok(self.feeds.iter().collect()),
        }
    }

    /// Look up a delivery by name and pair it with the configuration.
    pub fn resolve_delivery(&self, name: &str) -> Result<DeliveryContext<'_>> {
        let delivery = self
            .deliveries
            .iter()
            .find(|delivery| delivery.name == name)
            .ok_or_else(|| DigestError::DeliveryNotFound(name.to_string()))?;
        Ok(DeliveryContext {
            config: self,
            delivery,
        })
    }
}

impl ScheduleConfig {
    fn validate(&self, delivery: &str) -> Result<()> {
        match (&self.cron, self.every_minutes) {
            (Some(_), Some(_)) | (None, None) => {
                return Err(DigestError::Config(format!(
                    "delivery '{}': provide exactly one of cron or every_minutes",
                    delivery
                )));
            }
            (None, Some(0)) => {
                return Err(DigestError::Config(format!(
                    "delivery '{}': every_minutes must be positive",
                    delivery
                )));
            }
            _ => {}
        }
        // Surfaces cron syntax errors at load time instead of first firing.
        Trigger::from_schedule(self)?;
        Ok(())
    }
}

/// A delivery resolved against the loaded configuration.
///
/// Created fresh for every orchestration run and discarded afterwards.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryContext<'a> {
    pub config: &'a AppConfig,
    pub delivery: &'a DeliveryConfig,
}

impl DeliveryContext<'_> {
    /// Effective lookback window: the delivery override or the global default.
    pub fn window_hours(&self) -> u32 {
        self.delivery.window_hours.unwrap_or(self.config.lookback_hours)
    }

    pub fn feeds(&self) -> Result<Vec<&FeedConfig>> {
        self.config.feeds_for_delivery(self.delivery)
    }
}
