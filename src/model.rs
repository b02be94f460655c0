use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A material profile: brand, material, diameter, density, color. Identity in
/// the cache is the triple (name, material, diameter_mm); two filaments that
/// differ only in color_hex are distinct rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filament {
    pub id: Option<i64>,
    pub name: String,
    pub brand: String,
    pub material: String,
    pub diameter_mm: f64,
    pub density_g_cm3: f64,
    pub color_hex: Option<String>,
    pub nominal_weight_g: Option<f64>,
    pub nozzle_temp_c: Option<f64>,
    pub bed_temp_c: Option<f64>,
    pub price: Option<f64>,
}

/// A physical spool instance, owning exactly one Inv-side spool record.
/// Invariant: `0 <= used_weight_g <= initial_weight_g`; `archived` implies no
/// further updates are accepted from Cloud.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spool {
    pub id: Option<i64>,
    pub filament_id: i64,
    pub lot_nr: String,
    pub spool_weight_g: Option<f64>,
    pub initial_weight_g: f64,
    pub used_weight_g: f64,
    pub price: Option<f64>,
    pub archived: bool,
    pub source: String,
    pub last_used: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Spool {
    /// Clamp a would-be used-weight into `[0, initial_weight_g]`, per the
    /// invariant that must hold at every tick boundary.
    pub fn clamp_used(&self, used_weight_g: f64) -> f64 {
        used_weight_g.max(0.0).min(self.initial_weight_g.max(0.0))
    }
}

/// A (local_type, local_id, system, external_id) tuple resolving stable
/// cross-system identity. External identifiers are weak references: losing
/// one does not invalidate the local entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalLink {
    pub id: Option<i64>,
    pub local_type: String,
    pub local_id: i64,
    pub system: String,
    pub external_id: String,
}

/// Append-only record of a single field-level mutation applied during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub entity: String,
    pub entity_id: i64,
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub source: String,
    pub ts: DateTime<Utc>,
}

/// Which upstream decided a given field's value this tick, per the
/// "source of truth" glossary entry (ties broken in Cloud's favor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Authority {
    Cloud,
    Inv,
}
