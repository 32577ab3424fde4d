use chrono::{DateTime, Utc};

/// A single feed entry eligible for a digest.
///
/// Value object with no identity beyond its link within one collection run.
#[derive(Debug, Clone)]
pub struct Article {
    pub feed_id: String,
    pub feed_name: String,
    pub title: String,
    /// Canonical link, used as the dedup key.
    pub link: String,
    pub summary: Option<String>,
    pub published: DateTime<Utc>,
}
