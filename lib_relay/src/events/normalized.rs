//! # Normalized Event
//!
//! The only value that crosses the relay boundary. Each kind has its own
//! constructor so a value only ever carries the fields relevant to its kind;
//! everything else is left out of the serialized JSON.

use serde::{Deserialize, Serialize};

/// Tag written to the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NewFollow,
    DonateEmoji,
    NewSubGift,
    Stat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub donate_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gifter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub months: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ruby_amount: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_count: Option<i64>,
}

impl NormalizedEvent {
    fn bare(kind: EventKind) -> Self {
        Self {
            kind,
            username: None,
            donate_message: None,
            gifter: None,
            months: None,
            ruby_amount: None,
            live_count: None,
        }
    }

    pub fn new_follow(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            ..Self::bare(EventKind::NewFollow)
        }
    }

    pub fn donate_emoji(
        username: impl Into<String>,
        ruby_amount: i64,
        donate_message: Option<String>,
    ) -> Self {
        Self {
            username: Some(username.into()),
            ruby_amount: Some(ruby_amount),
            donate_message,
            ..Self::bare(EventKind::DonateEmoji)
        }
    }

    pub fn new_sub_gift(username: impl Into<String>, gifter: Option<String>, months: i64) -> Self {
        Self {
            username: Some(username.into()),
            gifter,
            months: Some(months),
            ..Self::bare(EventKind::NewSubGift)
        }
    }

    pub fn stat(live_count: i64) -> Self {
        Self {
            live_count: Some(live_count),
            ..Self::bare(EventKind::Stat)
        }
    }

    /// Same payload under a different tag. Only used for the legacy donation
    /// output, which reports donations as `new_follow`.
    pub fn retagged(self, kind: EventKind) -> Self {
        Self { kind, ..self }
    }
}
