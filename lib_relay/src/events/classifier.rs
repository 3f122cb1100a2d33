//! # Event Classifier
//!
//! Maps one raw upstream frame to zero or one [`NormalizedEvent`]. The
//! classifier never fails towards its caller: anything it cannot make sense of
//! is logged and dropped.
//!
//! Follow notifications are filtered through the shared [`DedupCache`], so a
//! viewer who unfollows and follows again inside the cooldown window is only
//! announced once.

use std::sync::Arc;

use tokio::time::Instant;

use crate::core::dedup::DedupCache;
use crate::error::RelayError;
use crate::events::aparat::{
    actor_or_unknown, Envelope, Payload, PAYLOAD_DONATE_EMOJI, PAYLOAD_NEW_FOLLOW,
    PAYLOAD_NEW_SUB_GIFT, RESPONSE_STAT, RESPONSE_UPDATE_STATUS,
};
use crate::events::normalized::{EventKind, NormalizedEvent};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassifierOptions {
    /// Emit donations under the `new_follow` tag, as older relay builds did.
    pub legacy_donate_tag: bool,
}

#[derive(Clone)]
pub struct EventClassifier {
    dedup: Arc<DedupCache>,
    options: ClassifierOptions,
}

impl EventClassifier {
    pub fn new(dedup: Arc<DedupCache>, options: ClassifierOptions) -> Self {
        Self { dedup, options }
    }

    pub fn dedup(&self) -> &Arc<DedupCache> {
        &self.dedup
    }

    /// Classifies `raw` against the current time.
    pub fn classify(&self, raw: &str) -> Option<NormalizedEvent> {
        self.classify_at(raw, Instant::now())
    }

    /// Classifies `raw` as if it arrived at `now`. Only follow dedup looks at
    /// the clock.
    pub fn classify_at(&self, raw: &str, now: Instant) -> Option<NormalizedEvent> {
        match self.try_classify(raw, now) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding upstream message");
                None
            }
        }
    }

    fn try_classify(&self, raw: &str, now: Instant) -> Result<Option<NormalizedEvent>, RelayError> {
        let envelope: Envelope = serde_json::from_str(raw)?;
        let Some(data) = envelope.response_data else {
            return Ok(None);
        };

        let event = match envelope.response_type.as_str() {
            RESPONSE_STAT => Some(NormalizedEvent::stat(data.live.unwrap_or(0))),
            RESPONSE_UPDATE_STATUS => data
                .payload
                .and_then(|payload| self.classify_payload(payload, now)),
            other => {
                tracing::trace!(response_type = other, "Ignoring upstream response type");
                None
            }
        };
        Ok(event)
    }

    fn classify_payload(&self, payload: Payload, now: Instant) -> Option<NormalizedEvent> {
        let data = payload.data.unwrap_or_default();

        match payload.kind.as_deref()? {
            PAYLOAD_NEW_FOLLOW => {
                let username = actor_or_unknown(data.username.as_deref());
                if !self.dedup.admit(&username, now) {
                    tracing::debug!(username = %username, "Suppressing repeat follow inside cooldown");
                    return None;
                }
                Some(NormalizedEvent::new_follow(username))
            }
            PAYLOAD_DONATE_EMOJI => {
                let event = NormalizedEvent::donate_emoji(
                    actor_or_unknown(data.sponsor_username.as_deref()),
                    data.emoji_coin_count.unwrap_or(0),
                    data.donate_message,
                );
                if self.options.legacy_donate_tag {
                    Some(event.retagged(EventKind::NewFollow))
                } else {
                    Some(event)
                }
            }
            PAYLOAD_NEW_SUB_GIFT => Some(NormalizedEvent::new_sub_gift(
                actor_or_unknown(data.sponsor_username.as_deref()),
                data.gifter,
                data.months.unwrap_or(0),
            )),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    const COOLDOWN: Duration = Duration::from_secs(30 * 60);

    fn classifier() -> EventClassifier {
        EventClassifier::new(Arc::new(DedupCache::new(COOLDOWN)), ClassifierOptions::default())
    }

    fn update(payload: serde_json::Value) -> String {
        json!({"response_type": "update_status", "response_data": {"payload": payload}}).to_string()
    }

    fn follow(username: &str) -> String {
        update(json!({"type": "new_follow", "data": {"username": username}}))
    }

    #[test]
    fn stat_carries_live_count() {
        let event = classifier()
            .classify(r#"{"response_type":"stat","response_data":{"live":42}}"#)
            .unwrap();
        assert_eq!(event, NormalizedEvent::stat(42));
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "stat", "live_count": 42})
        );
    }

    #[test]
    fn stat_without_live_defaults_to_zero() {
        let event = classifier()
            .classify(r#"{"response_type":"stat","response_data":{}}"#)
            .unwrap();
        assert_eq!(event.live_count, Some(0));
    }

    #[test]
    fn unknown_response_types_yield_nothing() {
        let c = classifier();
        for kind in ["chat", "update_stat", "STAT", "", "ping"] {
            let raw = json!({"response_type": kind, "response_data": {"live": 1}}).to_string();
            assert_eq!(c.classify(&raw), None, "type {kind:?}");
        }
    }

    #[test]
    fn malformed_or_empty_frames_yield_nothing() {
        let c = classifier();
        assert_eq!(c.classify("not json"), None);
        assert_eq!(c.classify(r#"{"response_type":"stat"}"#), None);
        assert_eq!(c.classify(r#"{"response_type":"stat","response_data":null}"#), None);
        assert_eq!(c.classify(r#"{"response_data":{"live":3}}"#), None);
        assert_eq!(c.classify(&update(json!({"type": "raid", "data": {}}))), None);
        assert_eq!(c.classify(&update(json!({"data": {"username": "x"}}))), None);
    }

    #[test]
    fn follow_without_username_is_undefined() {
        let event = classifier()
            .classify(&update(json!({"type": "new_follow", "data": {}})))
            .unwrap();
        assert_eq!(event, NormalizedEvent::new_follow("undefined"));

        let event = classifier().classify(&follow("")).unwrap();
        assert_eq!(event.username.as_deref(), Some("undefined"));
    }

    #[test]
    fn repeat_follow_inside_cooldown_is_suppressed() {
        let c = classifier();
        let t0 = Instant::now();

        assert_eq!(c.classify_at(&follow("mina"), t0), Some(NormalizedEvent::new_follow("mina")));
        assert_eq!(c.classify_at(&follow("mina"), t0 + Duration::from_secs(60)), None);
        assert_eq!(c.classify_at(&follow("mina"), t0 + COOLDOWN - Duration::from_millis(1)), None);
        // another viewer is unaffected
        assert!(c.classify_at(&follow("reza"), t0 + Duration::from_secs(60)).is_some());
    }

    #[test]
    fn follow_after_cooldown_is_accepted_and_restamped() {
        let c = classifier();
        let t0 = Instant::now();
        let t1 = t0 + COOLDOWN;

        assert!(c.classify_at(&follow("mina"), t0).is_some());
        assert!(c.classify_at(&follow("mina"), t1).is_some());
        assert_eq!(c.dedup().last_seen("mina"), Some(t1));
        assert_eq!(c.classify_at(&follow("mina"), t1 + Duration::from_secs(1)), None);
    }

    #[test]
    fn suppressed_follow_does_not_extend_the_window() {
        let c = classifier();
        let t0 = Instant::now();

        assert!(c.classify_at(&follow("mina"), t0).is_some());
        assert_eq!(c.classify_at(&follow("mina"), t0 + Duration::from_secs(20 * 60)), None);
        assert!(c.classify_at(&follow("mina"), t0 + COOLDOWN).is_some());
    }

    #[test]
    fn donation_without_coin_count_has_zero_rubies() {
        let raw = update(json!({"type": "donate_emoji", "data": {"sponsor_username": "sam"}}));
        let event = classifier().classify(&raw).unwrap();
        assert_eq!(event, NormalizedEvent::donate_emoji("sam", 0, None));
    }

    #[test]
    fn donation_passes_message_through() {
        let raw = update(json!({
            "type": "donate_emoji",
            "data": {"sponsor_username": "sam", "emoji_coin_count": 50, "donate_message": "gg"}
        }));
        let event = classifier().classify(&raw).unwrap();
        assert_eq!(event.kind, EventKind::DonateEmoji);
        assert_eq!(event.ruby_amount, Some(50));
        assert_eq!(event.donate_message.as_deref(), Some("gg"));
    }

    #[test]
    fn legacy_mode_tags_donations_as_follows() {
        let c = EventClassifier::new(
            Arc::new(DedupCache::new(COOLDOWN)),
            ClassifierOptions { legacy_donate_tag: true },
        );
        let raw = update(json!({"type": "donate_emoji", "data": {"emoji_coin_count": 5}}));
        let value = serde_json::to_value(c.classify(&raw).unwrap()).unwrap();
        // Deliberately mirrors the old relay output: donation data under the follow tag.
        assert_eq!(
            value,
            json!({"type": "new_follow", "username": "undefined", "ruby_amount": 5})
        );
        // Donations are never deduplicated, even under the follow tag.
        assert!(c.classify(&raw).is_some());
    }

    #[test]
    fn sub_gift_maps_sponsor_gifter_and_months() {
        let raw = update(json!({
            "type": "new_sub_gift",
            "data": {"sponsor_username": "alice", "gifter": "bob", "months": 3}
        }));
        let value = serde_json::to_value(classifier().classify(&raw).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "new_sub_gift", "username": "alice", "gifter": "bob", "months": 3})
        );
    }

    #[test]
    fn sub_gift_defaults() {
        let raw = update(json!({"type": "new_sub_gift"}));
        let event = classifier().classify(&raw).unwrap();
        assert_eq!(event, NormalizedEvent::new_sub_gift("undefined", None, 0));
    }

    #[test]
    fn odd_numeric_fields_do_not_drop_the_event() {
        let c = classifier();

        let stat = |live: serde_json::Value| {
            json!({"response_type": "stat", "response_data": {"live": live}}).to_string()
        };
        assert_eq!(c.classify(&stat(json!(42.7))), Some(NormalizedEvent::stat(42)));
        assert_eq!(c.classify(&stat(json!("13"))), Some(NormalizedEvent::stat(13)));
        assert_eq!(c.classify(&stat(json!("n/a"))), Some(NormalizedEvent::stat(0)));

        let raw = update(json!({
            "type": "donate_emoji",
            "data": {"sponsor_username": "sam", "emoji_coin_count": "lots", "donate_message": "gg"}
        }));
        assert_eq!(
            c.classify(&raw),
            Some(NormalizedEvent::donate_emoji("sam", 0, Some("gg".to_string())))
        );

        let raw = update(json!({
            "type": "new_sub_gift",
            "data": {"sponsor_username": "alice", "months": 2.9}
        }));
        assert_eq!(
            c.classify(&raw),
            Some(NormalizedEvent::new_sub_gift("alice", None, 2))
        );
    }
}
