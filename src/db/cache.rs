//! The Local Cache (spec §4.B): an embedded, write-ahead-logged mirror of
//! reconciled filaments and spools, used both for observability and as a
//! fallback when an upstream is unreachable. `upsert_filament` matches on
//! `(name, material, diameter)`; `upsert_spool` matches on `lot_nr`. Each
//! call commits its own transaction on success and rolls back on error —
//! `sqlx::Transaction` rolls back automatically when dropped without a
//! commit, giving the guaranteed-release/rollback-on-failure behavior the
//! spec's "session" concept calls for without a bespoke wrapper type.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::Result;
use crate::model::{ChangeLogEntry, ExternalLink, Filament, Spool};

#[derive(Clone)]
pub struct LocalCache {
    pool: SqlitePool,
}

impl LocalCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert_filament(&self, f: &Filament) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().to_rfc3339();

        let existing: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM filament WHERE name = ? AND material = ? AND diameter_mm = ?",
        )
        .bind(&f.name)
        .bind(&f.material)
        .bind(f.diameter_mm)
        .fetch_optional(&mut *tx)
        .await?;

        let id = if let Some((id,)) = existing {
            sqlx::query(
                "UPDATE filament SET brand = ?, density_g_cm3 = ?, color_hex = ?, \
                 nominal_weight_g = ?, nozzle_temp_c = ?, bed_temp_c = ?, price = ?, updated_at = ? \
                 WHERE id = ?",
            )
            .bind(&f.brand)
            .bind(f.density_g_cm3)
            .bind(&f.color_hex)
            .bind(f.nominal_weight_g)
            .bind(f.nozzle_temp_c)
            .bind(f.bed_temp_c)
            .bind(f.price)
            .bind(&now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
            id
        } else {
            let result = sqlx::query(
                "INSERT INTO filament(name, brand, material, diameter_mm, density_g_cm3, \
                 color_hex, nominal_weight_g, nozzle_temp_c, bed_temp_c, price, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&f.name)
            .bind(&f.brand)
            .bind(&f.material)
            .bind(f.diameter_mm)
            .bind(f.density_g_cm3)
            .bind(&f.color_hex)
            .bind(f.nominal_weight_g)
            .bind(f.nozzle_temp_c)
            .bind(f.bed_temp_c)
            .bind(f.price)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            result.last_insert_rowid()
        };

        tx.commit().await?;
        Ok(id)
    }

    pub async fn upsert_spool(&self, s: &Spool) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().to_rfc3339();

        let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM spool WHERE lot_nr = ?")
            .bind(&s.lot_nr)
            .fetch_optional(&mut *tx)
            .await?;

        let last_used = s.last_used.map(|t| t.to_rfc3339());

        let id = if let Some((id,)) = existing {
            sqlx::query(
                "UPDATE spool SET filament_id = ?, spool_weight_g = ?, initial_weight_g = ?, \
                 used_weight_g = ?, price = ?, archived = ?, source = ?, last_used = ?, updated_at = ? WHERE id = ?",
            )
            .bind(s.filament_id)
            .bind(s.spool_weight_g)
            .bind(s.initial_weight_g)
            .bind(s.used_weight_g)
            .bind(s.price)
            .bind(s.archived as i64)
            .bind(&s.source)
            .bind(&last_used)
            .bind(&now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
            id
        } else {
            let result = sqlx::query(
                "INSERT INTO spool(filament_id, lot_nr, spool_weight_g, initial_weight_g, \
                 used_weight_g, price, archived, source, last_used, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(s.filament_id)
            .bind(&s.lot_nr)
            .bind(s.spool_weight_g)
            .bind(s.initial_weight_g)
            .bind(s.used_weight_g)
            .bind(s.price)
            .bind(s.archived as i64)
            .bind(&s.source)
            .bind(&last_used)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            result.last_insert_rowid()
        };

        tx.commit().await?;
        Ok(id)
    }

    pub async fn get_spool_by_lot(&self, lot_nr: &str) -> Result<Option<Spool>> {
        #[allow(clippy::type_complexity)]
        let row: Option<(i64, i64, Option<f64>, f64, f64, Option<f64>, bool, String, Option<String>)> =
            sqlx::query_as(
                "SELECT id, filament_id, spool_weight_g, initial_weight_g, used_weight_g, price, archived, source, last_used \
                 FROM spool WHERE lot_nr = ?",
            )
            .bind(lot_nr)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(
            |(id, filament_id, spool_weight_g, initial_weight_g, used_weight_g, price, archived, source, last_used)| {
                Spool {
                    id: Some(id),
                    filament_id,
                    lot_nr: lot_nr.to_string(),
                    spool_weight_g,
                    initial_weight_g,
                    used_weight_g,
                    price,
                    archived,
                    source,
                    last_used: last_used.and_then(|s| DateTime::parse_from_rfc3339(&s).ok().map(|dt| dt.with_timezone(&Utc))),
                    updated_at: None,
                }
            },
        ))
    }

    pub async fn record_change(&self, entry: &ChangeLogEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO change_log(entity, entity_id, field, old_value, new_value, source, ts) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.entity)
        .bind(entry.entity_id)
        .bind(&entry.field)
        .bind(&entry.old_value)
        .bind(&entry.new_value)
        .bind(&entry.source)
        .bind(entry.ts.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_external_link(&self, link: &ExternalLink) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM external_link WHERE local_type = ? AND local_id = ? AND system = ?",
        )
        .bind(&link.local_type)
        .bind(link.local_id)
        .bind(&link.system)
        .fetch_optional(&mut *tx)
        .await?;

        let now = Utc::now().to_rfc3339();
        let id = if let Some((id,)) = existing {
            sqlx::query("UPDATE external_link SET external_id = ?, last_seen = ? WHERE id = ?")
                .bind(&link.external_id)
                .bind(&now)
                .bind(id)
                .execute(&mut *tx)
                .await?;
            id
        } else {
            let result = sqlx::query(
                "INSERT INTO external_link(local_type, local_id, system, external_id, last_seen) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&link.local_type)
            .bind(link.local_id)
            .bind(&link.system)
            .bind(&link.external_id)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            result.last_insert_rowid()
        };

        tx.commit().await?;
        Ok(id)
    }

    pub async fn mark_spool_archived(&self, lot_nr: &str, archived: bool) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE spool SET archived = ?, updated_at = ? WHERE lot_nr = ?")
            .bind(archived as i64)
            .bind(&now)
            .bind(lot_nr)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn spool_count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM spool")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn filament_count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM filament")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn external_link_count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM external_link")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_cache() -> LocalCache {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./db/migration/sqlite").run(&pool).await.unwrap();
        LocalCache::new(pool)
    }

    fn sample_filament() -> Filament {
        Filament {
            id: None,
            name: "PLA Natural".to_string(),
            brand: "test".to_string(),
            material: "PLA".to_string(),
            diameter_mm: 1.75,
            density_g_cm3: 1.24,
            color_hex: Some("#FFFFFF".to_string()),
            nominal_weight_g: None,
            nozzle_temp_c: None,
            bed_temp_c: None,
            price: None,
        }
    }

    #[tokio::test]
    async fn upsert_filament_is_idempotent_on_identity_triple() {
        let cache = memory_cache().await;
        let f = sample_filament();
        let id1 = cache.upsert_filament(&f).await.unwrap();
        let id2 = cache.upsert_filament(&f).await.unwrap();
        assert_eq!(id1, id2);
        assert_eq!(cache.filament_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_spool_matches_on_lot_nr() {
        let cache = memory_cache().await;
        let filament_id = cache.upsert_filament(&sample_filament()).await.unwrap();
        let spool = Spool {
            id: None,
            filament_id,
            lot_nr: "PL23".to_string(),
            spool_weight_g: None,
            initial_weight_g: 1000.0,
            used_weight_g: 0.0,
            price: None,
            archived: false,
            source: "cloud".to_string(),
            last_used: None,
            updated_at: None,
        };
        let id1 = cache.upsert_spool(&spool).await.unwrap();
        let mut updated = spool.clone();
        updated.used_weight_g = 299.74;
        let id2 = cache.upsert_spool(&updated).await.unwrap();
        assert_eq!(id1, id2);

        let fetched = cache.get_spool_by_lot("PL23").await.unwrap().unwrap();
        assert_eq!(fetched.used_weight_g, 299.74);
    }

    #[tokio::test]
    async fn upsert_external_link_matches_on_local_type_id_system() {
        let cache = memory_cache().await;
        let link = ExternalLink {
            id: None,
            local_type: "spool".to_string(),
            local_id: 1,
            system: "cloud".to_string(),
            external_id: "PL23".to_string(),
        };
        let id1 = cache.upsert_external_link(&link).await.unwrap();

        let mut moved = link.clone();
        moved.external_id = "QX99".to_string();
        let id2 = cache.upsert_external_link(&moved).await.unwrap();
        assert_eq!(id1, id2, "re-linking the same local entity updates in place");
    }
}
