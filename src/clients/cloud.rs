//! Client for the cloud filament/printer service ("Cloud"). All responses
//! carry a `status` boolean; `status: false` fails with [`SyncError::Upstream`]
//! carrying the upstream message.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{build_http_client, DEFAULT_TIMEOUT};
use crate::error::{Result, SyncError};

const SYSTEM: &str = "cloud";

/// Cloud's `type` field: either a nested `{id, name}` object or a bare id.
/// Modeled directly rather than forced into one shape, per the client
/// boundary's defensive-extractor design note.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CloudTypeRef {
    Nested {
        id: serde_json::Value,
        #[serde(default)]
        name: Option<String>,
    },
    Flat(serde_json::Value),
}

impl CloudTypeRef {
    fn id_string(&self) -> Option<String> {
        let value = match self {
            CloudTypeRef::Nested { id, .. } => id,
            CloudTypeRef::Flat(v) => v,
        };
        match value {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn label(&self) -> &str {
        match self {
            CloudTypeRef::Nested { name: Some(n), .. } => n.as_str(),
            CloudTypeRef::Flat(serde_json::Value::String(s)) => s.as_str(),
            _ => "",
        }
    }
}

/// One filament as returned by `GetFilament`. Field names follow Cloud's wire
/// format (camelCase), not this crate's internal naming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudFilament {
    pub id: Option<serde_json::Value>,
    pub uid: String,
    #[serde(rename = "type")]
    pub type_ref: Option<CloudTypeRef>,
    pub brand: Option<String>,
    #[serde(rename = "colorName")]
    pub color_name: Option<String>,
    #[serde(rename = "colorHex")]
    pub color_hex: Option<String>,
    pub dia: Option<f64>,
    pub density: Option<f64>,
    pub total: Option<f64>,
    pub left: Option<f64>,
    #[serde(rename = "spoolWeight")]
    pub spool_weight: Option<f64>,
}

impl CloudFilament {
    /// The numeric Cloud filament id, used as the `fid` query parameter on
    /// update. Distinct from `uid`, the stable 4-character lot code.
    pub fn numeric_id(&self) -> Option<String> {
        self.id.as_ref().map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// The type id as it should appear in a types-catalog lookup.
    pub fn type_id(&self) -> Option<String> {
        self.type_ref.as_ref().and_then(CloudTypeRef::id_string)
    }

    /// Best-effort human label for material extraction when the types
    /// catalog doesn't resolve the id (a nested `{id, name}` object's name, or
    /// the raw id/string itself).
    pub fn type_label(&self) -> &str {
        self.type_ref.as_ref().map(CloudTypeRef::label).unwrap_or("")
    }
}

/// A resolved entry from the types catalog, keyed by type id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloudTypeInfo {
    pub material_type_name: Option<String>,
    pub brand: Option<String>,
    pub diameter_mm: Option<f64>,
    pub density_g_cm3: Option<f64>,
    pub profile_name: Option<String>,
    pub nozzle_temp_c: Option<f64>,
    pub bed_temp_c: Option<f64>,
    pub price_minor: Option<i64>,
}

pub type TypesCatalog = HashMap<String, CloudTypeInfo>;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    message: Option<String>,
    #[serde(flatten)]
    body: T,
}

#[derive(Debug, Deserialize)]
struct FilamentListBody {
    #[serde(default)]
    filament: HashMap<String, CloudFilament>,
}

#[derive(Debug, Deserialize)]
struct TypesBody {
    #[serde(default)]
    types: TypesCatalog,
}

#[derive(Debug, Deserialize)]
struct StatusOnlyBody {}

/// Payload sent when Inv is authoritative and Cloud's remaining length must
/// be back-propagated. `length_used` deliberately carries *percent
/// remaining*, not percent used — Cloud's own field semantics are inverted,
/// and this struct preserves that inversion rather than silently "fixing" it.
#[derive(Debug, Clone, Serialize)]
pub struct CloudFilamentUpdate {
    pub left: i64,
    pub total_length: i64,
    pub total_length_type: &'static str,
    pub length_used: f64,
    pub left_length_type: &'static str,
    pub color_name: String,
    pub color_hex: String,
    pub width: f64,
    pub density: f64,
    pub brand: String,
    pub filament_type: i64,
}

#[async_trait]
pub trait CloudClient: Send + Sync {
    async fn list_filaments(&self) -> Result<HashMap<String, CloudFilament>>;
    async fn get_filament_types(&self) -> Result<TypesCatalog>;
    async fn update_filament(&self, id: &str, payload: &CloudFilamentUpdate) -> Result<()>;
}

pub struct CloudClientHttp {
    base: String,
    token: String,
}

impl CloudClientHttp {
    pub fn new(base_url: &str, org_id: &str, token: String) -> Self {
        let base = format!("{}/{}", base_url.trim_end_matches('/'), org_id);
        Self { base, token }
    }

    fn headers(&self) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Ok(value) = reqwest::header::HeaderValue::from_str(&self.token) {
            headers.insert("X-API-KEY", value);
        }
        headers
    }

    async fn get_envelope<T>(&self, path: &str) -> Result<Envelope<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let client = build_http_client(DEFAULT_TIMEOUT);
        let url = format!("{}{}", self.base, path);
        let resp = client
            .get(&url)
            .headers(self.headers())
            .send()
            .await
            .map_err(SyncError::from)?;
        if !resp.status().is_success() {
            return Err(SyncError::upstream(SYSTEM, format!("HTTP {}", resp.status())));
        }
        let envelope: Envelope<T> = resp
            .json()
            .await
            .map_err(|e| SyncError::shape(SYSTEM, e))?;
        if !envelope.status {
            return Err(SyncError::upstream(
                SYSTEM,
                envelope.message.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(envelope)
    }

    async fn post_envelope<T>(&self, path: &str, payload: &CloudFilamentUpdate) -> Result<Envelope<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let client = build_http_client(DEFAULT_TIMEOUT);
        let url = format!("{}{}", self.base, path);
        let resp = client
            .post(&url)
            .headers(self.headers())
            .json(payload)
            .send()
            .await
            .map_err(SyncError::from)?;
        if !resp.status().is_success() {
            return Err(SyncError::upstream(SYSTEM, format!("HTTP {}", resp.status())));
        }
        let envelope: Envelope<T> = resp
            .json()
            .await
            .map_err(|e| SyncError::shape(SYSTEM, e))?;
        if !envelope.status {
            return Err(SyncError::upstream(
                SYSTEM,
                envelope.message.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(envelope)
    }
}

#[async_trait]
impl CloudClient for CloudClientHttp {
    async fn list_filaments(&self) -> Result<HashMap<String, CloudFilament>> {
        let envelope: Envelope<FilamentListBody> = self.get_envelope("/filament/GetFilament").await?;
        Ok(envelope.body.filament)
    }

    async fn get_filament_types(&self) -> Result<TypesCatalog> {
        let envelope: Envelope<TypesBody> = self.get_envelope("/filament/type/Get").await?;
        Ok(envelope.body.types)
    }

    async fn update_filament(&self, id: &str, payload: &CloudFilamentUpdate) -> Result<()> {
        let path = format!("/filament/Create?fid={id}");
        let _: Envelope<StatusOnlyBody> = self.post_envelope(&path, payload).await?;
        Ok(())
    }
}
