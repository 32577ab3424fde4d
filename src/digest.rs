use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use log::warn;

use crate::config::DeliveryContext;
use crate::models::Article;

const DEFAULT_SUBJECT_TEMPLATE: &str = "News digest: {delivery_name}";

/// Rendered digest content for one delivery.
#[derive(Debug, Clone)]
pub struct Digest {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Timezone for rendering timestamps: the delivery schedule's zone, or UTC.
///
/// An unrecognized zone name degrades to UTC with a warning; rendering never
/// fails because of a bad timezone.
pub fn resolve_timezone(context: &DeliveryContext) -> Tz {
    let name = context
        .delivery
        .schedule
        .as_ref()
        .map(|schedule| schedule.timezone.as_str())
        .unwrap_or("UTC");
    name.parse().unwrap_or_else(|_| {
        warn!("Unknown timezone {}; defaulting to UTC", name);
        Tz::UTC
    })
}

fn subject_for(
    context: &DeliveryContext,
    generated_at: DateTime<Tz>,
    article_count: usize,
) -> String {
    let template = context
        .delivery
        .subject_template
        .as_deref()
        .unwrap_or(DEFAULT_SUBJECT_TEMPLATE);
    template
        .replace("{delivery_name}", &context.delivery.name)
        .replace("{window_hours}", &context.window_hours().to_string())
        .replace(
            "{generated_at}",
            &generated_at.format("%Y-%m-%d %H:%M %Z").to_string(),
        )
        .replace("{article_count}", &article_count.to_string())
}

/// Group articles by feed display name, preserving first-seen order.
fn group_articles<'a>(articles: &'a [Article]) -> Vec<(&'a str, Vec<&'a Article>)> {
    let mut grouped: Vec<(&str, Vec<&Article>)> = Vec::new();
    for article in articles {
        match grouped
            .iter_mut()
            .find(|(name, _)| *name == article.feed_name)
        {
            Some((_, entries)) => entries.push(article),
            None => grouped.push((article.feed_name.as_str(), vec![article])),
        }
    }
    grouped
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn render_text(
    context: &DeliveryContext,
    grouped: &[(&str, Vec<&Article>)],
    generated_at: DateTime<Tz>,
) -> String {
    let mut body = format!(
        "News digest for {} generated {} (last {} hours)\n",
        context.delivery.name,
        generated_at.format("%Y-%m-%d %H:%M %Z"),
        context.window_hours(),
    );
    if grouped.is_empty() {
        body.push_str("\nNo new articles in this window.\n");
        return body;
    }
    for (feed_name, articles) in grouped {
        body.push_str(&format!("\n== {} ==\n\n", feed_name));
        for article in articles {
            body.push_str(&format!("- {}\n  {}\n", article.title, article.link));
            if let Some(summary) = &article.summary {
                body.push_str(&format!("  {}\n", summary));
            }
        }
    }
    body
}

fn render_html(
    context: &DeliveryContext,
    grouped: &[(&str, Vec<&Article>)],
    generated_at: DateTime<Tz>,
) -> String {
    let mut body = String::from("<html><body>\n");
    body.push_str(&format!(
        "<p>News digest for <strong>{}</strong>, generated {} (last {} hours)</p>\n",
        escape_html(&context.delivery.name),
        generated_at.format("%Y-%m-%d %H:%M %Z"),
        context.window_hours(),
    ));
    if grouped.is_empty() {
        body.push_str("<p>No new articles in this window.</p>\n");
    }
    for (feed_name, articles) in grouped {
        body.push_str(&format!("<h2>{}</h2>\n<ul>\n", escape_html(feed_name)));
        for article in articles {
            body.push_str(&format!(
                "<li><a href=\"{}\">{}</a>",
                escape_html(&article.link),
                escape_html(&article.title),
            ));
            if let Some(summary) = &article.summary {
                body.push_str(&format!("<br/>{}", escape_html(summary)));
            }
            body.push_str("</li>\n");
        }
        body.push_str("</ul>\n");
    }
    body.push_str("</body></html>\n");
    body
}

/// Render the subject, HTML, and plain text content for a delivery.
///
/// Both bodies describe the same grouped articles; an empty article list is
/// a valid digest.
pub fn render(
    context: &DeliveryContext,
    articles: &[Article],
    generated_at: DateTime<Utc>,
) -> Digest {
    let tz = resolve_timezone(context);
    let local = generated_at.with_timezone(&tz);
    let subject = subject_for(context, local, articles.len());
    let grouped = group_articles(articles);
    Digest {
        subject,
        html: render_html(context, &grouped, local),
        text: render_text(context, &grouped, local),
    }
}
