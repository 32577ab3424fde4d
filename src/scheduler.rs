use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use log::{error, info, warn};

use crate::collector::FeedFetch;
use crate::config::{AppConfig, ScheduleConfig};
use crate::error::{DigestError, Result};
use crate::mailer::Sender;
use crate::service;

/// When a scheduled delivery fires next.
#[derive(Debug, Clone)]
pub enum Trigger {
    Cron { schedule: cron::Schedule, tz: Tz },
    Interval { every: Duration },
}

/// The `cron` crate expects a leading seconds field; crontab-style
/// five-field expressions get a zero-seconds prefix.
fn normalize_cron(expr: &str) -> String {
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

impl Trigger {
    pub fn from_schedule(config: &ScheduleConfig) -> Result<Self> {
        let tz: Tz = config.timezone.parse().unwrap_or_else(|_| {
            warn!("Unknown timezone {}; scheduling in UTC", config.timezone);
            Tz::UTC
        });
        if let Some(expr) = &config.cron {
            let schedule = cron::Schedule::from_str(&normalize_cron(expr)).map_err(|e| {
                DigestError::Config(format!("invalid cron expression '{}': {}", expr, e))
            })?;
            Ok(Trigger::Cron { schedule, tz })
        } else if let Some(minutes) = config.every_minutes {
            Ok(Trigger::Interval {
                every: Duration::minutes(i64::from(minutes)),
            })
        } else {
            Err(DigestError::Config(
                "schedule has neither cron nor every_minutes".to_string(),
            ))
        }
    }

    /// The first instant strictly after `after` at which this trigger fires.
    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Cron { schedule, tz } => schedule
                .after(&after.with_timezone(tz))
                .next()
                .map(|dt| dt.with_timezone(&Utc)),
            Trigger::Interval { every } => Some(after + *every),
        }
    }
}

struct Job {
    delivery: String,
    trigger: Trigger,
    next_fire: Option<DateTime<Utc>>,
}

/// Explicit mapping from delivery name to its registered trigger.
///
/// Registering a name that already exists replaces the prior registration,
/// so reconfiguration can never accumulate duplicate triggers.
#[derive(Default)]
pub struct JobRegistry {
    jobs: Vec<Job>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, delivery: &str, trigger: Trigger, now: DateTime<Utc>) {
        let next_fire = trigger.next_fire(now);
        let job = Job {
            delivery: delivery.to_string(),
            trigger,
            next_fire,
        };
        match self.jobs.iter_mut().find(|j| j.delivery == delivery) {
            Some(existing) => *existing = job,
            None => self.jobs.push(job),
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Delivery name and instant of the soonest pending firing.
    fn earliest(&self) -> Option<(String, DateTime<Utc>)> {
        self.jobs
            .iter()
            .filter_map(|job| job.next_fire.map(|at| (job.delivery.clone(), at)))
            .min_by_key(|(_, at)| *at)
    }

    /// Advance a job past a firing. Anchored at the firing's nominal due
    /// instant, not its completion time, so a slow delivery delays the next
    /// firing without drifting the interval.
    fn advance(&mut self, delivery: &str, fired_at: DateTime<Utc>) {
        if let Some(job) = self.jobs.iter_mut().find(|j| j.delivery == delivery) {
            job.next_fire = job.trigger.next_fire(fired_at);
        }
    }

    #[cfg(test)]
    fn next_fire_of(&self, delivery: &str) -> Option<DateTime<Utc>> {
        self.jobs
            .iter()
            .find(|j| j.delivery == delivery)
            .and_then(|j| j.next_fire)
    }
}

/// Register every scheduled delivery and fire them until the process exits.
///
/// Firings run to completion one at a time; a slow delivery delays later
/// ones but never overlaps them. A failed firing is logged and swallowed so
/// the other deliveries keep their schedules.
pub async fn run<F: FeedFetch, S: Sender>(
    config: &AppConfig,
    fetcher: &F,
    sender: &S,
) -> Result<()> {
    let mut registry = JobRegistry::new();
    let now = Utc::now();
    for delivery in &config.deliveries {
        let Some(schedule) = &delivery.schedule else {
            continue;
        };
        let trigger = Trigger::from_schedule(schedule)?;
        registry.register(&delivery.name, trigger, now);
        info!("Scheduled delivery '{}'", delivery.name);
    }

    if registry.is_empty() {
        warn!("No scheduled deliveries configured; scheduler will exit");
        return Ok(());
    }

    info!("Starting scheduler with {} deliveries", registry.len());
    loop {
        let Some((name, due)) = registry.earliest() else {
            warn!("All schedules exhausted; scheduler will exit");
            return Ok(());
        };
        let wait = due.signed_duration_since(Utc::now());
        if wait > Duration::zero() {
            tokio::time::sleep(wait.to_std().unwrap_or_default()).await;
        }

        info!("Running scheduled delivery '{}'", name);
        match config.resolve_delivery(&name) {
            Ok(context) => {
                if let Err(e) = service::deliver(&context, fetcher, sender).await {
                    error!("Scheduled delivery '{}' failed: {}", name, e);
                }
            }
            Err(e) => error!("Cannot resolve scheduled delivery '{}': {}", name, e),
        }
        registry.advance(&name, due);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeliveryConfig, EmailConfig, FeedConfig, SmtpConfig};
    use lettre::Message;

    struct NeverFetch;

    impl FeedFetch for NeverFetch {
        async fn fetch(&self, feed: &FeedConfig) -> Result<feed_rs::model::Feed> {
            Err(DigestError::Fetch {
                url: feed.url.clone(),
                reason: "unreachable in this test".to_string(),
            })
        }
    }

    struct NeverSend;

    impl Sender for NeverSend {
        async fn send(&self, _smtp: &SmtpConfig, _message: &Message) -> Result<()> {
            Ok(())
        }
    }

    fn unscheduled_config() -> AppConfig {
        AppConfig {
            feeds: vec![FeedConfig {
                id: "sample".to_string(),
                name: "Sample Feed".to_string(),
                url: "https://example.com/rss".to_string(),
                tags: Vec::new(),
            }],
            email: EmailConfig {
                sender: "bot@example.com".to_string(),
                smtp: SmtpConfig {
                    host: "smtp.example.com".to_string(),
                    port: 587,
                    username: None,
                    password: None,
                    use_tls: true,
                    use_ssl: false,
                },
            },
            deliveries: vec![DeliveryConfig {
                name: "Daily".to_string(),
                feeds: None,
                recipients: vec!["editor@example.com".to_string()],
                window_hours: None,
                subject_template: None,
                schedule: None,
            }],
            lookback_hours: 12,
        }
    }

    fn interval_schedule(minutes: u32) -> ScheduleConfig {
        ScheduleConfig {
            cron: None,
            every_minutes: Some(minutes),
            timezone: "UTC".to_string(),
        }
    }

    fn cron_schedule(expr: &str, timezone: &str) -> ScheduleConfig {
        ScheduleConfig {
            cron: Some(expr.to_string()),
            every_minutes: None,
            timezone: timezone.to_string(),
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        "2025-06-01T12:30:00Z".parse().expect("valid timestamp")
    }

    #[test]
    fn interval_next_fire_adds_the_interval() {
        let trigger = Trigger::from_schedule(&interval_schedule(30)).expect("trigger");
        let next = trigger.next_fire(fixed_now()).expect("next");
        assert_eq!(next, fixed_now() + Duration::minutes(30));
    }

    #[test]
    fn five_field_cron_is_accepted() {
        let trigger = Trigger::from_schedule(&cron_schedule("0 8 * * *", "UTC")).expect("trigger");
        let next = trigger.next_fire(fixed_now()).expect("next");
        assert_eq!(
            next,
            "2025-06-02T08:00:00Z".parse::<DateTime<Utc>>().expect("valid")
        );
    }

    #[test]
    fn cron_evaluates_in_named_timezone() {
        // 08:00 in Tokyo is 23:00 UTC the previous day.
        let trigger =
            Trigger::from_schedule(&cron_schedule("0 8 * * *", "Asia/Tokyo")).expect("trigger");
        let next = trigger.next_fire(fixed_now()).expect("next");
        assert_eq!(
            next,
            "2025-06-01T23:00:00Z".parse::<DateTime<Utc>>().expect("valid")
        );
    }

    #[test]
    fn invalid_cron_expression_is_rejected() {
        let err = Trigger::from_schedule(&cron_schedule("not a cron", "UTC")).unwrap_err();
        assert!(matches!(err, DigestError::Config(_)));
    }

    #[test]
    fn registering_same_name_replaces_prior_trigger() {
        let now = fixed_now();
        let mut registry = JobRegistry::new();
        let first = Trigger::from_schedule(&interval_schedule(30)).expect("trigger");
        let second = Trigger::from_schedule(&interval_schedule(60)).expect("trigger");

        registry.register("Daily", first, now);
        registry.register("Daily", second, now);

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.next_fire_of("Daily"),
            Some(now + Duration::minutes(60))
        );
    }

    #[test]
    fn earliest_picks_the_soonest_job() {
        let now = fixed_now();
        let mut registry = JobRegistry::new();
        registry.register(
            "Slow",
            Trigger::from_schedule(&interval_schedule(60)).expect("trigger"),
            now,
        );
        registry.register(
            "Fast",
            Trigger::from_schedule(&interval_schedule(5)).expect("trigger"),
            now,
        );
        let (name, at) = registry.earliest().expect("earliest");
        assert_eq!(name, "Fast");
        assert_eq!(at, now + Duration::minutes(5));
    }

    #[test]
    fn advance_moves_a_job_forward() {
        let now = fixed_now();
        let mut registry = JobRegistry::new();
        registry.register(
            "Daily",
            Trigger::from_schedule(&interval_schedule(5)).expect("trigger"),
            now,
        );
        let later = now + Duration::minutes(5);
        registry.advance("Daily", later);
        assert_eq!(
            registry.next_fire_of("Daily"),
            Some(later + Duration::minutes(5))
        );
    }

    #[test]
    fn interval_advance_anchors_at_due_instant_not_completion() {
        let now = fixed_now();
        let mut registry = JobRegistry::new();
        registry.register(
            "Daily",
            Trigger::from_schedule(&interval_schedule(5)).expect("trigger"),
            now,
        );
        let (_, due) = registry.earliest().expect("earliest");
        // The firing itself ran long; advancing at the due instant keeps
        // the cadence instead of drifting it by the delivery's runtime.
        registry.advance("Daily", due);
        assert_eq!(
            registry.next_fire_of("Daily"),
            Some(due + Duration::minutes(5))
        );
    }

    #[tokio::test]
    async fn run_exits_when_nothing_is_scheduled() {
        let config = unscheduled_config();
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            run(&config, &NeverFetch, &NeverSend),
        )
        .await;
        result
            .expect("scheduler should exit immediately with no schedules")
            .expect("exit is success, not an error");
    }
}
