use chrono::{DateTime, Duration, Utc};
use lettre::Message;
use log::info;

use crate::collector::{self, FeedFetch};
use crate::config::DeliveryContext;
use crate::digest;
use crate::error::Result;
use crate::mailer::{self, Sender};
use crate::models::Article;

/// Collect the articles a delivery would include right now.
pub async fn gather_articles<F: FeedFetch>(
    context: &DeliveryContext<'_>,
    fetcher: &F,
    now: Option<DateTime<Utc>>,
) -> Result<Vec<Article>> {
    let feeds = context.feeds()?;
    let window = Duration::hours(i64::from(context.window_hours()));
    Ok(collector::collect(fetcher, &feeds, window, now).await)
}

/// Run one full delivery: collect, render, assemble, dispatch.
///
/// Returns the article count and the assembled message. Failures in any
/// stage propagate unmodified; this layer adds no failure modes of its own.
pub async fn deliver<F: FeedFetch, S: Sender>(
    context: &DeliveryContext<'_>,
    fetcher: &F,
    sender: &S,
) -> Result<(usize, Message)> {
    let articles = gather_articles(context, fetcher, None).await?;
    let rendered = digest::render(context, &articles, Utc::now());
    let message = mailer::build_message(context, &rendered)?;
    sender.send(&context.config.email.smtp, &message).await?;
    info!(
        "Delivered '{}' with {} articles to {}",
        context.delivery.name,
        articles.len(),
        context.delivery.recipients.join(", "),
    );
    Ok((articles.len(), message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AppConfig, DeliveryConfig, EmailConfig, FeedConfig, SmtpConfig,
    };
    use crate::error::DigestError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct XmlFetch {
        xml: String,
    }

    impl FeedFetch for XmlFetch {
        async fn fetch(&self, feed: &FeedConfig) -> Result<feed_rs::model::Feed> {
            feed_rs::parser::parse(self.xml.as_bytes()).map_err(|e| DigestError::Fetch {
                url: feed.url.clone(),
                reason: e.to_string(),
            })
        }
    }

    #[derive(Default)]
    struct NoopSender {
        sent: AtomicUsize,
    }

    impl Sender for NoopSender {
        async fn send(&self, _smtp: &SmtpConfig, _message: &Message) -> Result<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingSender;

    impl Sender for FailingSender {
        async fn send(&self, _smtp: &SmtpConfig, _message: &Message) -> Result<()> {
            Err(DigestError::Transport("connection refused".to_string()))
        }
    }

    fn one_feed_config() -> AppConfig {
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
                recipients: vec!["e@x.com".to_string()],
                window_hours: Some(1),
                subject_template: None,
                schedule: None,
            }],
            lookback_hours: 12,
        }
    }

    fn recent_entry_xml() -> String {
        let published = (Utc::now() - Duration::minutes(10)).to_rfc2822();
        format!(
            "<rss version=\"2.0\"><channel><title>Sample Feed</title>\
             <link>https://example.com</link><description>test</description>\
             <item><title>Fresh</title><link>https://example.com/fresh</link>\
             <pubDate>{published}</pubDate>\
             <description>a fresh article</description></item>\
             </channel></rss>"
        )
    }

    #[tokio::test]
    async fn end_to_end_with_noop_sender() {
        let config = one_feed_config();
        let context = config.resolve_delivery("Daily").expect("resolve");
        let fetcher = XmlFetch {
            xml: recent_entry_xml(),
        };
        let sender = NoopSender::default();

        let (count, message) = deliver(&context, &fetcher, &sender).await.expect("deliver");
        assert_eq!(count, 1);
        assert_eq!(sender.sent.load(Ordering::SeqCst), 1);
        let formatted = String::from_utf8(message.formatted()).expect("utf8");
        assert!(formatted.contains("To: e@x.com"));
    }

    #[tokio::test]
    async fn transport_failure_propagates() {
        let config = one_feed_config();
        let context = config.resolve_delivery("Daily").expect("resolve");
        let fetcher = XmlFetch {
            xml: recent_entry_xml(),
        };
        let err = deliver(&context, &fetcher, &FailingSender).await.unwrap_err();
        assert!(matches!(err, DigestError::Transport(_)));
    }
}
