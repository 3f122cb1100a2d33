//! Wire model of the frames pushed by the Aparat live socket.
//!
//! Only the parts the classifier branches on are modelled; unknown fields are
//! ignored.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

pub const RESPONSE_STAT: &str = "stat";
pub const RESPONSE_UPDATE_STATUS: &str = "update_status";

pub const PAYLOAD_NEW_FOLLOW: &str = "new_follow";
pub const PAYLOAD_DONATE_EMOJI: &str = "donate_emoji";
pub const PAYLOAD_NEW_SUB_GIFT: &str = "new_sub_gift";

/// Fallback identity used when the upstream omits the actor.
pub const UNKNOWN_USER: &str = "undefined";

#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub response_type: String,
    #[serde(default)]
    pub response_data: Option<ResponseData>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResponseData {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub live: Option<i64>,
    #[serde(default)]
    pub payload: Option<Payload>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Payload {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub data: Option<PayloadData>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PayloadData {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub sponsor_username: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub emoji_coin_count: Option<i64>,
    #[serde(default)]
    pub donate_message: Option<String>,
    #[serde(default)]
    pub gifter: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub months: Option<i64>,
}

/// Counts sometimes arrive as floats or numeric strings. Floats truncate
/// toward zero; anything unreadable becomes `None` instead of failing the
/// whole frame.
fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|value| match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(truncate)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(truncate))
        }
        _ => None,
    }))
}

fn truncate(f: f64) -> Option<i64> {
    // `as` saturates at the i64 bounds.
    f.is_finite().then(|| f.trunc() as i64)
}

/// Empty and missing names both resolve to [`UNKNOWN_USER`].
pub fn actor_or_unknown(name: Option<&str>) -> String {
    match name {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => UNKNOWN_USER.to_string(),
    }
}
