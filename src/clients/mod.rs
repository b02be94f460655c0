//! Typed wrappers over the two upstream REST surfaces. Both upstreams return
//! loosely shaped JSON (a referenced entity may come back nested as an object
//! or flat as a bare id) — [`Ref`] models that directly instead of forcing a
//! single shape, and each client's deserialization normalizes on read so the
//! rest of the crate only ever sees typed internal structs.

pub mod cloud;
pub mod inv;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A loosely-typed upstream payload that identifies a related entity either as
/// a nested object carrying `id` or as a bare id value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Ref {
    Nested { id: serde_json::Value },
    Flat(serde_json::Value),
}

impl Ref {
    pub fn as_str_id(&self) -> Option<String> {
        let value = match self {
            Ref::Nested { id } => id,
            Ref::Flat(v) => v,
        };
        match value {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub fn build_http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .expect("reqwest client with static TLS config always builds")
}
