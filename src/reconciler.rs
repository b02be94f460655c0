//! The Reconciler (spec §4.G): the core decision engine. One tick loads a
//! snapshot from both upstreams, normalizes Cloud's view, reconciles each
//! item against Inv using the physical model for unit conversion, mirrors
//! the result into the local cache, and finally cleans up Inv spools whose
//! code has vanished from Cloud. Sequential by construction — see the
//! module-level note on ordering in `scheduler.rs`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::clients::cloud::{CloudClient, CloudFilament, CloudFilamentUpdate};
use crate::clients::inv::{InvClient, InvFilament, InvSpool, NewFilament, NewSpool, NewVendor, SpoolPatch};
use crate::config::ConfigStore;
use crate::db::cache::LocalCache;
use crate::error::{Result, SafeDisplay, SyncError};
use crate::model::{Authority, ChangeLogEntry, Spool};
use crate::normalize::normalize_filament;
use crate::physics::{grams_per_meter, length_from_weight_mm, round_to_standard_weight, weight_from_length_mm, FALLBACK_GPM};
use crate::status::StatusReporter;

pub struct Reconciler {
    inv: Arc<dyn InvClient>,
    cloud: Arc<dyn CloudClient>,
    cache: LocalCache,
    config: ConfigStore,
    status: Arc<StatusReporter>,
}

/// The Inv-side spool state a per-item decision works against, whether it
/// came from this tick's snapshot or was just created.
struct WorkingSpool {
    inv_id: i64,
    cur_used: f64,
    last_used: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    initial_weight_g: f64,
    spool_weight_g: Option<f64>,
    price: Option<f64>,
    archived: bool,
}

fn parse_inv_timestamp(raw: &Option<String>) -> Option<DateTime<Utc>> {
    raw.as_ref()
        .and_then(|s| crate::normalize::normalize_timestamp(&Value::String(s.clone())))
}

impl Reconciler {
    pub fn new(
        inv: Arc<dyn InvClient>,
        cloud: Arc<dyn CloudClient>,
        cache: LocalCache,
        config: ConfigStore,
        status: Arc<StatusReporter>,
    ) -> Self {
        Self {
            inv,
            cloud,
            cache,
            config,
            status,
        }
    }

    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<()> {
        let tick_start = Utc::now();
        let dry_run = self.config.dry_run().await?;
        let epsilon = self.config.epsilon_grams().await?;
        let last_sync = Utc
            .timestamp_opt(self.config.last_sync_time().await?, 0)
            .single()
            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().unwrap());

        self.status.tick_started(tick_start, dry_run);
        info!(dry_run, "tick started");

        let outcome = self.run_tick(tick_start, last_sync, epsilon, dry_run, cancel).await;

        match &outcome {
            Ok(()) => {
                self.status.tick_finished(Utc::now(), None);
                info!("tick finished");
            }
            Err(e) => {
                self.status.record_error();
                self.status.tick_finished(Utc::now(), Some(e.to_safe_string()));
                warn!(error = %e.to_safe_string(), "tick aborted");
            }
        }
        outcome
    }

    async fn run_tick(
        &self,
        tick_start: DateTime<Utc>,
        last_sync: DateTime<Utc>,
        epsilon: f64,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let cloud_filaments = self.cloud.list_filaments().await?;
        let types_catalog = self.cloud.get_filament_types().await?;
        let inv_spools = self.inv.list_spools().await?;
        let inv_filaments = self.inv.list_filaments().await?;
        let inv_vendors = self.inv.list_vendors().await?;

        let vendor_by_id: HashMap<i64, String> = inv_vendors
            .iter()
            .map(|v| (v.id, v.name.clone()))
            .collect();

        let mut code_index: HashMap<String, InvSpool> = HashMap::new();
        for spool in inv_spools {
            if let Some(lot_nr) = spool.lot_nr.clone() {
                code_index.insert(lot_nr, spool);
            }
        }

        let mut ordered: Vec<(&String, &CloudFilament)> = cloud_filaments.iter().collect();
        ordered.sort_by(|a, b| a.0.cmp(b.0));

        for (_key, cloud_filament) in ordered {
            if cancel.is_cancelled() {
                return Ok(());
            }

            if let Err(e) = self
                .reconcile_item(
                    cloud_filament,
                    &types_catalog,
                    &code_index,
                    &inv_filaments,
                    &vendor_by_id,
                    last_sync,
                    epsilon,
                    dry_run,
                )
                .await
            {
                if e.is_item_scoped() {
                    self.status.record_error();
                    warn!(error = %e.to_safe_string(), uid = %cloud_filament.uid, "item failed, continuing");
                } else {
                    return Err(e);
                }
            } else {
                self.status.record_success();
            }
        }

        if cancel.is_cancelled() {
            return Ok(());
        }

        let cloud_codes: std::collections::HashSet<&str> = cloud_filaments
            .values()
            .map(|f| f.uid.as_str())
            .collect();
        self.cleanup(&code_index, &cloud_codes, dry_run).await?;

        self.config.set_last_sync_time(tick_start.timestamp()).await?;
        self.status.record_last_sync_time(tick_start.timestamp());
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn reconcile_item(
        &self,
        cloud_filament: &CloudFilament,
        types_catalog: &crate::clients::cloud::TypesCatalog,
        code_index: &HashMap<String, InvSpool>,
        inv_filaments: &[InvFilament],
        vendor_by_id: &HashMap<i64, String>,
        last_sync: DateTime<Utc>,
        epsilon: f64,
        dry_run: bool,
    ) -> Result<()> {
        let uid = cloud_filament.uid.trim();
        if uid.is_empty() {
            return Ok(());
        }

        let type_info = cloud_filament.type_id().and_then(|id| types_catalog.get(&id));
        let normalized = normalize_filament(cloud_filament, type_info);

        let local_filament_id = self
            .cache
            .upsert_filament(&normalized)
            .await
            .map_err(|_| SyncError::Cache(format!("failed to mirror filament for {uid}")))?;

        let gpm = grams_per_meter(normalized.density_g_cm3, normalized.diameter_mm).unwrap_or(FALLBACK_GPM);
        let total = cloud_filament.total.unwrap_or(0.0).max(0.0);
        let left = cloud_filament.left.unwrap_or(0.0).max(0.0);
        let weight_raw = weight_from_length_mm(total, gpm);
        let rounded_total_weight = round_to_standard_weight(weight_raw, &normalized.brand);

        let existing = code_index.get(uid);

        let mut working = match existing {
            Some(spool) => {
                let local_initial_weight = match self.cache.get_spool_by_lot(uid).await {
                    Ok(Some(row)) => row.initial_weight_g,
                    _ => rounded_total_weight,
                };
                WorkingSpool {
                    inv_id: spool.id,
                    cur_used: spool.used_weight,
                    last_used: parse_inv_timestamp(&spool.last_used),
                    updated_at: parse_inv_timestamp(&spool.updated_at),
                    initial_weight_g: local_initial_weight,
                    spool_weight_g: spool.spool_weight,
                    price: spool.price,
                    archived: spool.archived,
                }
            }
            None if dry_run => {
                info!(uid, "dry-run: would create inv filament and spool");
                return Ok(());
            }
            None => {
                let inv_filament_id = self
                    .resolve_or_create_inv_filament(&normalized, inv_filaments, vendor_by_id, rounded_total_weight)
                    .await?;

                let created = self
                    .inv
                    .create_spool(&NewSpool {
                        filament_id: inv_filament_id,
                        lot_nr: uid.to_string(),
                        initial_weight: rounded_total_weight,
                        price: 0.0,
                        used_weight: 0.0,
                        archived: false,
                        spool_weight: cloud_filament.spool_weight,
                        last_used: None,
                    })
                    .await?;

                WorkingSpool {
                    inv_id: created.id,
                    cur_used: 0.0,
                    last_used: None,
                    updated_at: None,
                    initial_weight_g: rounded_total_weight,
                    spool_weight_g: cloud_filament.spool_weight,
                    price: None,
                    archived: false,
                }
            }
        };

        let length_used_mm = (total - left).max(0.0);
        let used_g = weight_from_length_mm(length_used_mm, gpm);
        let delta = (used_g - working.cur_used).abs();
        let inv_ts = working.last_used.or(working.updated_at);
        let inv_is_newer = inv_ts.map(|t| t > last_sync).unwrap_or(false);

        let final_used;
        let authority;
        if inv_is_newer && delta > epsilon {
            final_used = working.cur_used;
            authority = Authority::Inv;
            let remaining_g = (working.initial_weight_g - working.cur_used).max(0.0);
            let remaining_len_mm = length_from_weight_mm(remaining_g, gpm);
            let percent_remaining = if total > 0.0 {
                ((remaining_len_mm / total) * 100.0).clamp(0.0, 100.0)
            } else {
                0.0
            };

            if dry_run {
                info!(uid, remaining_len_mm, "dry-run: would push Inv correction to cloud");
            } else if let Some(type_id) = cloud_filament.type_id().and_then(|s| s.parse::<i64>().ok()) {
                let payload = CloudFilamentUpdate {
                    left: remaining_len_mm.round() as i64,
                    total_length: total.round() as i64,
                    total_length_type: "m",
                    length_used: percent_remaining,
                    left_length_type: "percent",
                    color_name: cloud_filament.color_name.clone().unwrap_or_default(),
                    color_hex: normalized.color_hex.clone().unwrap_or_default(),
                    width: normalized.diameter_mm,
                    density: normalized.density_g_cm3,
                    brand: normalized.brand.clone(),
                    filament_type: type_id,
                };
                let cloud_id = cloud_filament
                    .numeric_id()
                    .ok_or_else(|| SyncError::validation("id", "cloud filament has no numeric id"))?;
                self.cloud.update_filament(&cloud_id, &payload).await?;

                let refreshed = self.cloud.list_filaments().await?;
                if let Some(verify) = refreshed.values().find(|f| f.uid == uid) {
                    if let Some(new_left) = verify.left {
                        if (new_left.round() as i64 - payload.left).abs() > 1 {
                            warn!(uid, expected = payload.left, actual = new_left, "cloud left mismatch after update");
                        }
                    }
                }
            } else {
                return Err(SyncError::validation(
                    "filament_type",
                    format!("no resolvable cloud type id for {uid}, refusing to guess"),
                ));
            }
        } else if delta <= epsilon {
            final_used = working.cur_used;
            authority = Authority::Cloud;
        } else {
            final_used = used_g;
            authority = Authority::Cloud;
            if dry_run {
                info!(uid, used_g, "dry-run: would update inv spool used_weight");
            } else {
                // Never stamp last_used here: it records a human/scale edit on
                // the Inv side, and this write is the engine's own. Writing
                // Utc::now() would make the next tick's `inv_ts > last_sync`
                // check misread this tick's own Cloud-driven update as a
                // newer Inv-authoritative edit.
                self.inv
                    .update_spool(
                        working.inv_id,
                        &SpoolPatch {
                            used_weight: Some(used_g),
                            archived: None,
                            last_used: None,
                        },
                    )
                    .await?;
            }
        }

        let working_spool = Spool {
            id: None,
            filament_id: local_filament_id,
            lot_nr: uid.to_string(),
            spool_weight_g: working.spool_weight_g,
            initial_weight_g: working.initial_weight_g,
            used_weight_g: 0.0,
            price: working.price,
            archived: working.archived,
            source: "cloud".to_string(),
            last_used: working.last_used,
            updated_at: Some(Utc::now()),
        };
        let final_used = working_spool.clamp_used(final_used);
        working.cur_used = final_used;

        if !dry_run {
            let source = match authority {
                Authority::Cloud => "cloud",
                Authority::Inv => "inv",
            };
            if delta > epsilon {
                self.cache
                    .record_change(&ChangeLogEntry {
                        entity: "spool".to_string(),
                        entity_id: local_filament_id,
                        field: "used_weight_g".to_string(),
                        old_value: existing.map(|s| s.used_weight.to_string()),
                        new_value: Some(final_used.to_string()),
                        source: source.to_string(),
                        ts: Utc::now(),
                    })
                    .await
                    .ok();
            }

            let local_spool_id = self
                .cache
                .upsert_spool(&Spool {
                    used_weight_g: final_used,
                    ..working_spool
                })
                .await
                .map_err(|_| SyncError::Cache(format!("failed to mirror spool for {uid}")))?;

            self.cache
                .upsert_external_link(&crate::model::ExternalLink {
                    id: None,
                    local_type: "spool".to_string(),
                    local_id: local_spool_id,
                    system: "cloud".to_string(),
                    external_id: uid.to_string(),
                })
                .await
                .map_err(|_| SyncError::Cache(format!("failed to record cloud link for {uid}")))?;
        }

        Ok(())
    }

    async fn resolve_or_create_inv_filament(
        &self,
        normalized: &crate::model::Filament,
        inv_filaments: &[InvFilament],
        vendor_by_id: &HashMap<i64, String>,
        rounded_total_weight: f64,
    ) -> Result<i64> {
        for candidate in inv_filaments {
            let material_match = candidate
                .material
                .as_deref()
                .map(|m| m.eq_ignore_ascii_case(&normalized.material))
                .unwrap_or(false);
            let diameter_match = candidate
                .diameter
                .map(|d| (d - normalized.diameter_mm).abs() <= 0.01)
                .unwrap_or(false);
            let vendor_name = candidate.vendor_id().and_then(|id| vendor_by_id.get(&id));
            let vendor_match = vendor_name
                .map(|n| n.eq_ignore_ascii_case(&normalized.brand))
                .unwrap_or(false);
            let color_match = match (&candidate.color_hex, &normalized.color_hex) {
                (None, None) => true,
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                _ => false,
            };

            if material_match && diameter_match && vendor_match && color_match {
                return Ok(candidate.id);
            }
        }

        let vendor_id = match vendor_by_id
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(&normalized.brand))
            .map(|(id, _)| *id)
        {
            Some(id) => id,
            None => {
                self.inv
                    .create_vendor(&NewVendor {
                        name: normalized.brand.clone(),
                    })
                    .await?
                    .id
            }
        };

        let created = self
            .inv
            .create_filament(&NewFilament {
                name: normalized.name.clone(),
                diameter: normalized.diameter_mm,
                density: normalized.density_g_cm3,
                material: normalized.material.clone(),
                vendor_id,
                color_hex: normalized.color_hex.clone(),
                extruder_temp: normalized.nozzle_temp_c,
                bed_temp: normalized.bed_temp_c,
                price: normalized.price,
                weight: rounded_total_weight,
            })
            .await?;

        Ok(created.id)
    }

    async fn cleanup(
        &self,
        code_index: &HashMap<String, InvSpool>,
        cloud_codes: &std::collections::HashSet<&str>,
        dry_run: bool,
    ) -> Result<()> {
        let mut stale: Vec<&String> = code_index
            .keys()
            .filter(|code| !cloud_codes.contains(code.as_str()))
            .collect();
        stale.sort();

        for code in stale {
            let spool = &code_index[code];
            if spool.archived {
                continue;
            }
            if spool.used_weight > 0.0 {
                if dry_run {
                    info!(code, "dry-run: would archive inv spool");
                } else {
                    self.inv
                        .update_spool(
                            spool.id,
                            &SpoolPatch {
                                used_weight: None,
                                archived: Some(true),
                                last_used: None,
                            },
                        )
                        .await?;
                    self.cache.mark_spool_archived(code, true).await.ok();
                }
            } else if dry_run {
                info!(code, "dry-run: would delete inv spool");
            } else {
                self.inv.delete_spool(spool.id).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::cloud::TypesCatalog;
    use crate::clients::inv::InvVendor;
    use async_trait::async_trait;
    use sqlx::SqlitePool;
    use std::sync::Mutex;

    struct FakeCloud {
        filaments: Mutex<HashMap<String, CloudFilament>>,
        types: TypesCatalog,
        updates: Mutex<Vec<(String, CloudFilamentUpdate)>>,
    }

    #[async_trait]
    impl CloudClient for FakeCloud {
        async fn list_filaments(&self) -> Result<HashMap<String, CloudFilament>> {
            Ok(self.filaments.lock().unwrap().clone())
        }
        async fn get_filament_types(&self) -> Result<TypesCatalog> {
            Ok(self.types.clone())
        }
        async fn update_filament(&self, id: &str, payload: &CloudFilamentUpdate) -> Result<()> {
            self.updates.lock().unwrap().push((id.to_string(), payload.clone()));
            let mut filaments = self.filaments.lock().unwrap();
            if let Some(f) = filaments.values_mut().find(|f| f.numeric_id().as_deref() == Some(id)) {
                f.left = Some(payload.left as f64);
            }
            Ok(())
        }
    }

    struct FakeInv {
        spools: Mutex<Vec<InvSpool>>,
        filaments: Mutex<Vec<InvFilament>>,
        vendors: Mutex<Vec<InvVendor>>,
        next_id: Mutex<i64>,
    }

    impl FakeInv {
        fn empty() -> Self {
            Self {
                spools: Mutex::new(vec![]),
                filaments: Mutex::new(vec![]),
                vendors: Mutex::new(vec![]),
                next_id: Mutex::new(1),
            }
        }

        fn next(&self) -> i64 {
            let mut id = self.next_id.lock().unwrap();
            *id += 1;
            *id
        }
    }

    #[async_trait]
    impl InvClient for FakeInv {
        async fn list_spools(&self) -> Result<Vec<InvSpool>> {
            Ok(self.spools.lock().unwrap().clone())
        }
        async fn list_filaments(&self) -> Result<Vec<InvFilament>> {
            Ok(self.filaments.lock().unwrap().clone())
        }
        async fn list_vendors(&self) -> Result<Vec<InvVendor>> {
            Ok(self.vendors.lock().unwrap().clone())
        }
        async fn create_vendor(&self, vendor: &crate::clients::inv::NewVendor) -> Result<InvVendor> {
            let v = InvVendor {
                id: self.next(),
                name: vendor.name.clone(),
            };
            self.vendors.lock().unwrap().push(v.clone());
            Ok(v)
        }
        async fn create_filament(&self, filament: &NewFilament) -> Result<InvFilament> {
            let f = InvFilament {
                id: self.next(),
                name: filament.name.clone(),
                material: Some(filament.material.clone()),
                diameter: Some(filament.diameter),
                density: Some(filament.density),
                vendor: Some(crate::clients::Ref::Flat(serde_json::json!(filament.vendor_id))),
                color_hex: filament.color_hex.clone(),
                extruder_temp: filament.extruder_temp,
                bed_temp: filament.bed_temp,
                price: filament.price,
                weight: Some(filament.weight),
            };
            self.filaments.lock().unwrap().push(f.clone());
            Ok(f)
        }
        async fn create_spool(&self, spool: &NewSpool) -> Result<InvSpool> {
            let s = InvSpool {
                id: self.next(),
                lot_nr: Some(spool.lot_nr.clone()),
                used_weight: spool.used_weight,
                spool_weight: spool.spool_weight,
                price: Some(spool.price),
                archived: spool.archived,
                filament: None,
                filament_id: Some(spool.filament_id),
                updated_at: None,
                last_used: spool.last_used.clone(),
            };
            self.spools.lock().unwrap().push(s.clone());
            Ok(s)
        }
        async fn update_spool(&self, id: i64, patch: &SpoolPatch) -> Result<InvSpool> {
            let mut spools = self.spools.lock().unwrap();
            let spool = spools.iter_mut().find(|s| s.id == id).expect("spool exists");
            if let Some(used) = patch.used_weight {
                spool.used_weight = used;
            }
            if let Some(archived) = patch.archived {
                spool.archived = archived;
            }
            if let Some(last_used) = &patch.last_used {
                spool.last_used = Some(last_used.clone());
            }
            Ok(spool.clone())
        }
        async fn delete_spool(&self, id: i64) -> Result<()> {
            self.spools.lock().unwrap().retain(|s| s.id != id);
            Ok(())
        }
    }

    fn sample_cloud_filament() -> CloudFilament {
        CloudFilament {
            id: Some(serde_json::json!(5637)),
            uid: "PL23".to_string(),
            type_ref: Some(crate::clients::cloud::CloudTypeRef::Nested {
                id: serde_json::json!(5637),
                name: Some("PLA".to_string()),
            }),
            brand: Some("test".to_string()),
            color_name: Some("Natural".to_string()),
            color_hex: None,
            dia: Some(1.75),
            density: Some(1.24),
            total: Some(335284.0),
            left: Some(234699.0),
            spool_weight: None,
        }
    }

    async fn memory_cache() -> LocalCache {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./db/migration/sqlite").run(&pool).await.unwrap();
        LocalCache::new(pool)
    }

    async fn memory_config() -> ConfigStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./db/migration/sqlite").run(&pool).await.unwrap();
        ConfigStore::new(pool)
    }

    #[tokio::test]
    async fn new_item_creation_creates_vendor_filament_and_spool() {
        let cloud = Arc::new(FakeCloud {
            filaments: Mutex::new(HashMap::from([("5637".to_string(), sample_cloud_filament())])),
            types: HashMap::new(),
            updates: Mutex::new(vec![]),
        });
        let inv = Arc::new(FakeInv::empty());
        let cache = memory_cache().await;
        let cache_check = cache.clone();
        let config = memory_config().await;
        let status = Arc::new(StatusReporter::new());

        let reconciler = Reconciler::new(inv.clone(), cloud, cache, config, status);
        reconciler.run_once(&CancellationToken::new()).await.unwrap();

        let spools = inv.spools.lock().unwrap();
        assert_eq!(spools.len(), 1);
        assert_eq!(spools[0].lot_nr.as_deref(), Some("PL23"));
        assert!((spools[0].used_weight - 299.74).abs() < 0.01);

        let vendors = inv.vendors.lock().unwrap();
        assert_eq!(vendors.len(), 1);
        assert_eq!(vendors[0].name, "test");

        assert_eq!(cache_check.external_link_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn second_tick_with_same_inputs_is_a_no_op() {
        let cloud = Arc::new(FakeCloud {
            filaments: Mutex::new(HashMap::from([("5637".to_string(), sample_cloud_filament())])),
            types: HashMap::new(),
            updates: Mutex::new(vec![]),
        });
        let inv = Arc::new(FakeInv::empty());
        let cache = memory_cache().await;
        let config = memory_config().await;
        let status = Arc::new(StatusReporter::new());

        let reconciler = Reconciler::new(inv.clone(), cloud, cache, config, status);
        reconciler.run_once(&CancellationToken::new()).await.unwrap();
        let used_after_first = inv.spools.lock().unwrap()[0].used_weight;
        reconciler.run_once(&CancellationToken::new()).await.unwrap();
        let used_after_second = inv.spools.lock().unwrap()[0].used_weight;

        assert!((used_after_first - used_after_second).abs() < 1e-9);
        assert_eq!(inv.spools.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cloud_authoritative_update_changes_used_weight() {
        let mut first_filament = sample_cloud_filament();
        let cloud = Arc::new(FakeCloud {
            filaments: Mutex::new(HashMap::from([("5637".to_string(), first_filament.clone())])),
            types: HashMap::new(),
            updates: Mutex::new(vec![]),
        });
        let inv = Arc::new(FakeInv::empty());
        let cache = memory_cache().await;
        let config = memory_config().await;
        let status = Arc::new(StatusReporter::new());

        let reconciler = Reconciler::new(inv.clone(), cloud.clone(), cache, config, status);
        reconciler.run_once(&CancellationToken::new()).await.unwrap();

        first_filament.left = Some(200000.0);
        cloud.filaments.lock().unwrap().insert("5637".to_string(), first_filament);

        reconciler.run_once(&CancellationToken::new()).await.unwrap();
        let used = inv.spools.lock().unwrap()[0].used_weight;
        assert!((used - 403.15).abs() < 0.01, "got {used}");
    }

    #[tokio::test]
    async fn cleanup_archives_used_spool_missing_from_cloud() {
        let cloud = Arc::new(FakeCloud {
            filaments: Mutex::new(HashMap::new()),
            types: HashMap::new(),
            updates: Mutex::new(vec![]),
        });
        let inv = Arc::new(FakeInv::empty());
        inv.spools.lock().unwrap().push(InvSpool {
            id: 1,
            lot_nr: Some("PL23".to_string()),
            used_weight: 120.0,
            spool_weight: None,
            price: None,
            archived: false,
            filament: None,
            filament_id: Some(1),
            updated_at: None,
            last_used: None,
        });
        let cache = memory_cache().await;
        let config = memory_config().await;
        let status = Arc::new(StatusReporter::new());

        let reconciler = Reconciler::new(inv.clone(), cloud, cache, config, status);
        reconciler.run_once(&CancellationToken::new()).await.unwrap();

        let spools = inv.spools.lock().unwrap();
        assert_eq!(spools.len(), 1);
        assert!(spools[0].archived);
    }

    #[tokio::test]
    async fn cleanup_deletes_unused_spool_missing_from_cloud() {
        let cloud = Arc::new(FakeCloud {
            filaments: Mutex::new(HashMap::new()),
            types: HashMap::new(),
            updates: Mutex::new(vec![]),
        });
        let inv = Arc::new(FakeInv::empty());
        inv.spools.lock().unwrap().push(InvSpool {
            id: 1,
            lot_nr: Some("PL23".to_string()),
            used_weight: 0.0,
            spool_weight: None,
            price: None,
            archived: false,
            filament: None,
            filament_id: Some(1),
            updated_at: None,
            last_used: None,
        });
        let cache = memory_cache().await;
        let config = memory_config().await;
        let status = Arc::new(StatusReporter::new());

        let reconciler = Reconciler::new(inv.clone(), cloud, cache, config, status);
        reconciler.run_once(&CancellationToken::new()).await.unwrap();

        assert!(inv.spools.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn inv_authoritative_correction_is_pushed_back_to_cloud() {
        let cloud = Arc::new(FakeCloud {
            filaments: Mutex::new(HashMap::from([("5637".to_string(), sample_cloud_filament())])),
            types: HashMap::new(),
            updates: Mutex::new(vec![]),
        });
        let inv = Arc::new(FakeInv::empty());
        let cache = memory_cache().await;
        let config = memory_config().await;
        let status = Arc::new(StatusReporter::new());

        let reconciler = Reconciler::new(inv.clone(), cloud.clone(), cache, config, status);
        reconciler.run_once(&CancellationToken::new()).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let manual_correction = Utc::now();
        {
            let mut spools = inv.spools.lock().unwrap();
            let spool = spools.first_mut().unwrap();
            spool.used_weight = 500.0;
            spool.last_used = Some(manual_correction.to_rfc3339());
        }

        reconciler.run_once(&CancellationToken::new()).await.unwrap();

        let used = inv.spools.lock().unwrap()[0].used_weight;
        assert!((used - 500.0).abs() < 1e-9, "Inv's manual correction must survive, got {used}");

        let updates = cloud.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert!((updates[0].1.left as f64 - 167785.0).abs() < 500.0, "got {}", updates[0].1.left);
    }
}
