//! Client for the internal spool-tracking service ("Inv"). Non-2xx responses
//! fail with [`SyncError::Upstream`]; a vendor/filament reference coming back
//! nested or flat is normalized through [`Ref`] at the deserialization
//! boundary so callers only ever see a resolved id.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{build_http_client, Ref, DEFAULT_TIMEOUT};
use crate::error::{Result, SyncError};

const SYSTEM: &str = "inv";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvSpool {
    pub id: i64,
    pub lot_nr: Option<String>,
    pub used_weight: f64,
    pub spool_weight: Option<f64>,
    pub price: Option<f64>,
    #[serde(default)]
    pub archived: bool,
    pub filament: Option<Ref>,
    pub filament_id: Option<i64>,
    pub updated_at: Option<String>,
    pub last_used: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvFilament {
    pub id: i64,
    pub name: String,
    pub material: Option<String>,
    pub diameter: Option<f64>,
    pub density: Option<f64>,
    pub vendor: Option<Ref>,
    pub color_hex: Option<String>,
    pub extruder_temp: Option<f64>,
    pub bed_temp: Option<f64>,
    pub price: Option<f64>,
    pub weight: Option<f64>,
}

impl InvFilament {
    /// The vendor id, resolved whether Inv nested it as `{id}` or returned it
    /// flat — the display name requires a further lookup against vendors.
    pub fn vendor_id(&self) -> Option<i64> {
        self.vendor
            .as_ref()
            .and_then(Ref::as_str_id)
            .and_then(|s| s.parse().ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvVendor {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewVendor {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewFilament {
    pub name: String,
    pub diameter: f64,
    pub density: f64,
    pub material: String,
    pub vendor_id: i64,
    pub color_hex: Option<String>,
    pub extruder_temp: Option<f64>,
    pub bed_temp: Option<f64>,
    pub price: Option<f64>,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewSpool {
    pub filament_id: i64,
    pub lot_nr: String,
    pub initial_weight: f64,
    pub price: f64,
    pub used_weight: f64,
    pub archived: bool,
    pub spool_weight: Option<f64>,
    pub last_used: Option<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct SpoolPatch {
    pub used_weight: Option<f64>,
    pub archived: Option<bool>,
    pub last_used: Option<String>,
}

#[async_trait]
pub trait InvClient: Send + Sync {
    async fn list_spools(&self) -> Result<Vec<InvSpool>>;
    async fn list_filaments(&self) -> Result<Vec<InvFilament>>;
    async fn list_vendors(&self) -> Result<Vec<InvVendor>>;
    async fn create_vendor(&self, vendor: &NewVendor) -> Result<InvVendor>;
    async fn create_filament(&self, filament: &NewFilament) -> Result<InvFilament>;
    async fn create_spool(&self, spool: &NewSpool) -> Result<InvSpool>;
    async fn update_spool(&self, id: i64, patch: &SpoolPatch) -> Result<InvSpool>;
    async fn delete_spool(&self, id: i64) -> Result<()>;
}

pub struct InvClientHttp {
    base: String,
}

impl InvClientHttp {
    pub fn new(base_url: &str) -> Self {
        Self {
            base: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let client = build_http_client(DEFAULT_TIMEOUT);
        let resp = client
            .get(format!("{}{}", self.base, path))
            .send()
            .await?;
        Self::parse(resp).await
    }

    async fn post<B: Serialize + ?Sized, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let client = build_http_client(DEFAULT_TIMEOUT);
        let resp = client
            .post(format!("{}{}", self.base, path))
            .json(body)
            .send()
            .await?;
        Self::parse(resp).await
    }

    async fn put<B: Serialize + ?Sized, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let client = build_http_client(DEFAULT_TIMEOUT);
        let resp = client
            .put(format!("{}{}", self.base, path))
            .json(body)
            .send()
            .await?;
        Self::parse(resp).await
    }

    async fn parse<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        if !resp.status().is_success() {
            return Err(SyncError::upstream(SYSTEM, format!("HTTP {}", resp.status())));
        }
        resp.json().await.map_err(|e| SyncError::shape(SYSTEM, e))
    }
}

#[async_trait]
impl InvClient for InvClientHttp {
    async fn list_spools(&self) -> Result<Vec<InvSpool>> {
        self.get("/spool").await
    }

    async fn list_filaments(&self) -> Result<Vec<InvFilament>> {
        self.get("/filament").await
    }

    async fn list_vendors(&self) -> Result<Vec<InvVendor>> {
        self.get("/vendor").await
    }

    async fn create_vendor(&self, vendor: &NewVendor) -> Result<InvVendor> {
        self.post("/vendor", vendor).await
    }

    async fn create_filament(&self, filament: &NewFilament) -> Result<InvFilament> {
        self.post("/filament", filament).await
    }

    async fn create_spool(&self, spool: &NewSpool) -> Result<InvSpool> {
        self.post("/spool", spool).await
    }

    async fn update_spool(&self, id: i64, patch: &SpoolPatch) -> Result<InvSpool> {
        self.put(&format!("/spool/{id}"), patch).await
    }

    async fn delete_spool(&self, id: i64) -> Result<()> {
        let client = build_http_client(DEFAULT_TIMEOUT);
        let resp = client
            .delete(format!("{}/spool/{id}", self.base))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(SyncError::upstream(SYSTEM, format!("HTTP {}", resp.status())));
        }
        Ok(())
    }
}
