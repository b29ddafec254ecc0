//! ListingEvent (spec §3, §4.6) — a single detected new-pair listing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectionSource {
    Calendar,
    SymbolComparison,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingEvent {
    pub id: Uuid,
    pub symbol: String,
    pub vcoin_id: Option<String>,
    pub detection_source: DetectionSource,
    pub confidence: Confidence,
    pub listing_time: Option<DateTime<Utc>>,
    pub detected_at: DateTime<Utc>,
    pub freshness_deadline: DateTime<Utc>,
    pub processed: bool,
}

impl ListingEvent {
    /// §4.6: an event older than its freshness deadline must not trigger a buy.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now <= self.freshness_deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(detected_at: DateTime<Utc>, deadline_secs: i64) -> ListingEvent {
        ListingEvent {
            id: Uuid::new_v4(),
            symbol: "FOOUSDT".to_string(),
            vcoin_id: None,
            detection_source: DetectionSource::SymbolComparison,
            confidence: Confidence::High,
            listing_time: None,
            detected_at,
            freshness_deadline: detected_at + Duration::seconds(deadline_secs),
            processed: false,
        }
    }

    #[test]
    fn fresh_within_deadline() {
        let detected = Utc::now();
        let event = sample(detected, 30);
        assert!(event.is_fresh(detected + Duration::seconds(10)));
    }

    #[test]
    fn stale_past_deadline() {
        let detected = Utc::now();
        let event = sample(detected, 30);
        assert!(!event.is_fresh(detected + Duration::seconds(31)));
    }
}
