//! Pure normalization: turns a raw Cloud filament + its types catalog into the
//! internal [`Filament`] model. No I/O, no upstream calls — everything here is
//! a deterministic function of its inputs, which is what makes it directly
//! testable against the end-to-end scenarios in the spec.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::clients::cloud::{CloudFilament, CloudTypeInfo};
use crate::model::Filament;

const DEFAULT_DIAMETER_MM: f64 = 1.75;
const DEFAULT_DENSITY_G_CM3: f64 = 1.24;

/// Ordered list of recognized material codes. Longest match wins; ties are
/// broken by earlier position in this list.
const KNOWN_MATERIALS: &[&str] = &[
    "PLA+", "PETG-CF", "PLA-CF", "ABS+", "TPU-95A", "TPU-98A", "PETG", "PLA", "ABS", "TPU",
    "NYLON", "ASA", "PC", "PP", "PVA", "HIPS",
];

/// Resolve a material label in three steps: exact catalog match by id, a scan
/// of [`KNOWN_MATERIALS`] against the label, and finally a "last token of
/// plausible length" fallback. Idempotent: feeding the output back in yields
/// the same value (it is itself a recognized material or a passthrough).
pub fn extract_material(raw_label: &str, catalog_name: Option<&str>) -> String {
    if let Some(name) = catalog_name {
        if !name.trim().is_empty() {
            return name.trim().to_string();
        }
    }

    let upper = raw_label.to_ascii_uppercase();
    let words: Vec<&str> = upper.split_whitespace().collect();
    let mut best: Option<&str> = None;
    for candidate in KNOWN_MATERIALS {
        let is_match = upper == *candidate
            || upper.ends_with(&format!(" {candidate}"))
            || upper.starts_with(&format!("{candidate} "))
            || words.contains(candidate);
        if is_match {
            match best {
                None => best = Some(candidate),
                Some(prev) if candidate.len() > prev.len() => best = Some(candidate),
                _ => {}
            }
        }
    }
    if let Some(m) = best {
        return m.to_string();
    }

    if let Some(token) = raw_label
        .split_whitespace()
        .last()
        .filter(|t| (2..=10).contains(&t.len()))
    {
        return token.to_string();
    }

    raw_label.to_string()
}

/// Canonical `#RRGGBB`. Accepts a leading `#` or six bare hex digits; anything
/// else canonicalizes to `None`. A retraction: `canon(canon(x)) == canon(x)`.
pub fn canon_color(raw: Option<&str>) -> Option<String> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    let hex = raw.strip_prefix('#').unwrap_or(raw);
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!("#{}", hex.to_ascii_uppercase()))
}

/// Unix-seconds or an already-ISO-8601 string, both normalized to a UTC
/// `DateTime`. Invalid input yields `None` rather than erroring — timestamp
/// normalization is best-effort per the spec's tie-break rules.
pub fn normalize_timestamp(raw: &Value) -> Option<DateTime<Utc>> {
    match raw {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok(),
        Value::Number(n) => n.as_i64().and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        _ => None,
    }
}

/// Build the internal [`Filament`] from a Cloud record and its resolved type
/// catalog entry, applying brand/diameter/density/name/color/temps/price
/// resolution rules.
pub fn normalize_filament(cloud: &CloudFilament, type_info: Option<&CloudTypeInfo>) -> Filament {
    let material = extract_material(
        cloud.type_label(),
        type_info.and_then(|t| t.material_type_name.as_deref()),
    );

    let brand = cloud
        .brand
        .clone()
        .filter(|b| !b.trim().is_empty())
        .or_else(|| type_info.and_then(|t| t.brand.clone()))
        .unwrap_or_else(|| "Unknown".to_string());

    let diameter_mm = cloud
        .dia
        .or(type_info.and_then(|t| t.diameter_mm))
        .unwrap_or(DEFAULT_DIAMETER_MM);

    let density_g_cm3 = cloud
        .density
        .or(type_info.and_then(|t| t.density_g_cm3))
        .unwrap_or(DEFAULT_DENSITY_G_CM3);

    let color_hex = canon_color(cloud.color_hex.as_deref());

    let profile_name = type_info.and_then(|t| t.profile_name.clone());
    let color_name = cloud.color_name.clone().unwrap_or_default();
    let name = format!(
        "{} {}",
        profile_name.unwrap_or_else(|| material.clone()),
        color_name
    )
    .trim()
    .to_string();

    let (nozzle_temp_c, bed_temp_c, price) = match type_info {
        Some(t) => (t.nozzle_temp_c, t.bed_temp_c, t.price_minor.map(|p| p as f64 / 100.0)),
        None => (None, None, None),
    };

    Filament {
        id: None,
        name,
        brand,
        material,
        diameter_mm,
        density_g_cm3,
        color_hex,
        nominal_weight_g: None,
        nozzle_temp_c,
        bed_temp_c,
        price,
    }
}
