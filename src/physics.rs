//! Length <-> weight conversion and standard-weight rounding.

/// Empirically correct fallback for PLA at 1.75 mm, used whenever density or
/// diameter is unavailable or zero.
pub const FALLBACK_GPM: f64 = 2.98;

const STANDARD_WEIGHTS_G: [f64; 6] = [250.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0];
const JAYO_WEIGHT_G: f64 = 1100.0;

/// Grams per meter of filament for a given density and diameter, rounded to
/// two decimals. Returns `None` if either input is zero or negative — callers
/// substitute `FALLBACK_GPM` in that case.
pub fn grams_per_meter(density_g_cm3: f64, diameter_mm: f64) -> Option<f64> {
    if density_g_cm3 <= 0.0 || diameter_mm <= 0.0 {
        return None;
    }
    let radius_cm = (diameter_mm / 10.0) / 2.0;
    let volume_cm3 = std::f64::consts::PI * radius_cm * radius_cm * 100.0;
    Some(round2(volume_cm3 * density_g_cm3))
}

/// Weight in grams for a given length in millimeters, using `gpm` grams per
/// meter (already resolved by the caller, fallback applied if necessary).
pub fn weight_from_length_mm(length_mm: f64, gpm: f64) -> f64 {
    round2((length_mm / 1000.0) * gpm)
}

/// Length in millimeters corresponding to a weight in grams, the inverse of
/// [`weight_from_length_mm`]. Used when Inv is authoritative and the
/// remaining length must be back-computed for Cloud.
pub fn length_from_weight_mm(weight_g: f64, gpm: f64) -> f64 {
    if gpm <= 0.0 {
        return 0.0;
    }
    (weight_g / gpm) * 1000.0
}

/// Snap a computed full-spool weight to the nearest standard value, but only
/// if that value is within +/-12% of the input; otherwise the input is
/// returned unchanged. `JAYO` gets an extra candidate of 1100 g when the
/// computed weight falls strictly between 1000 and 1200 g.
pub fn round_to_standard_weight(weight_g: f64, brand: &str) -> f64 {
    if weight_g <= 0.0 {
        return weight_g;
    }

    let mut candidates = STANDARD_WEIGHTS_G.to_vec();
    if brand.eq_ignore_ascii_case("JAYO") && weight_g > 1000.0 && weight_g < 1200.0 {
        candidates.push(JAYO_WEIGHT_G);
    }

    let nearest = candidates
        .into_iter()
        .min_by(|a, b| {
            (a - weight_g)
                .abs()
                .partial_cmp(&(b - weight_g).abs())
                .unwrap()
        })
        .expect("candidate list is never empty");

    let tolerance = weight_g * 0.12;
    if (nearest - weight_g).abs() <= tolerance {
        nearest
    } else {
        weight_g
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
