//! The Scheduler (spec §4.H): a single cooperative task driving the
//! Reconciler on a fixed period. Re-entrant `start` is a no-op; overlapping
//! ticks are coalesced, not queued, via a `try_lock` single-flight guard;
//! `reconfigure` tears down and restarts the timer loop with a new period.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{Result, SafeDisplay};
use crate::reconciler::Reconciler;

pub struct Scheduler {
    reconciler: Arc<Reconciler>,
    running_guard: Arc<Mutex<()>>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    cancel: std::sync::Mutex<CancellationToken>,
    started: AtomicBool,
}

impl Scheduler {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self {
            reconciler,
            running_guard: Arc::new(Mutex::new(())),
            handle: std::sync::Mutex::new(None),
            cancel: std::sync::Mutex::new(CancellationToken::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Start the recurring job. Calling this again while already started is a
    /// no-op — there is only ever one job.
    pub fn start(self: &Arc<Self>, interval: Duration) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.spawn_loop(interval);
    }

    /// Tear down the running job (if any) and restart it with a new period.
    pub fn reconfigure(self: &Arc<Self>, interval: Duration) {
        self.stop();
        self.started.store(false, Ordering::SeqCst);
        self.start(interval);
    }

    /// Cancel the in-flight tick cooperatively and stop the timer loop.
    pub fn stop(&self) {
        let mut cancel = self.cancel.lock().expect("cancel lock poisoned");
        cancel.cancel();
        *cancel = CancellationToken::new();
        if let Some(handle) = self.handle.lock().expect("handle lock poisoned").take() {
            handle.abort();
        }
        self.started.store(false, Ordering::SeqCst);
    }

    /// Run one tick immediately, subject to the same single-flight rule as
    /// the timer-driven path: if a tick is already in progress, this call
    /// returns without running a second one.
    pub async fn trigger_now(&self) -> Option<Result<()>> {
        let token = self.cancel.lock().expect("cancel lock poisoned").clone();
        self.try_tick(&token).await
    }

    fn spawn_loop(self: &Arc<Self>, interval: Duration) {
        let this = Arc::clone(self);
        let token = this.cancel.lock().expect("cancel lock poisoned").clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("scheduler loop cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        let _ = this.try_tick(&token).await;
                    }
                }
            }
        });
        *self.handle.lock().expect("handle lock poisoned") = Some(handle);
    }

    /// Attempt to acquire the single-flight guard and run one tick. Returns
    /// `None` if a tick was already in progress (the coalesced case).
    async fn try_tick(&self, token: &CancellationToken) -> Option<Result<()>> {
        let guard = match self.running_guard.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                info!("tick already in progress, dropping this trigger");
                return None;
            }
        };

        let result = self.reconciler.run_once(token).await;
        if let Err(e) = &result {
            warn!(error = %e.to_safe_string(), "reconciler tick failed");
        }
        drop(guard);
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::cloud::{CloudClient, CloudFilament, CloudFilamentUpdate, TypesCatalog};
    use crate::clients::inv::{InvClient, InvFilament, InvSpool, InvVendor, NewFilament, NewSpool, NewVendor, SpoolPatch};
    use crate::config::ConfigStore;
    use crate::db::cache::LocalCache;
    use crate::status::StatusReporter;
    use async_trait::async_trait;
    use sqlx::SqlitePool;
    use std::collections::HashMap;

    struct EmptyCloud;
    #[async_trait]
    impl CloudClient for EmptyCloud {
        async fn list_filaments(&self) -> Result<HashMap<String, CloudFilament>> {
            Ok(HashMap::new())
        }
        async fn get_filament_types(&self) -> Result<TypesCatalog> {
            Ok(HashMap::new())
        }
        async fn update_filament(&self, _id: &str, _payload: &CloudFilamentUpdate) -> Result<()> {
            Ok(())
        }
    }

    struct EmptyInv;
    #[async_trait]
    impl InvClient for EmptyInv {
        async fn list_spools(&self) -> Result<Vec<InvSpool>> {
            Ok(vec![])
        }
        async fn list_filaments(&self) -> Result<Vec<InvFilament>> {
            Ok(vec![])
        }
        async fn list_vendors(&self) -> Result<Vec<InvVendor>> {
            Ok(vec![])
        }
        async fn create_vendor(&self, _vendor: &NewVendor) -> Result<InvVendor> {
            unreachable!("no cloud filaments to react to")
        }
        async fn create_filament(&self, _filament: &NewFilament) -> Result<InvFilament> {
            unreachable!("no cloud filaments to react to")
        }
        async fn create_spool(&self, _spool: &NewSpool) -> Result<InvSpool> {
            unreachable!("no cloud filaments to react to")
        }
        async fn update_spool(&self, _id: i64, _patch: &SpoolPatch) -> Result<InvSpool> {
            unreachable!("no cloud filaments to react to")
        }
        async fn delete_spool(&self, _id: i64) -> Result<()> {
            Ok(())
        }
    }

    async fn test_reconciler() -> Arc<Reconciler> {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./db/migration/sqlite").run(&pool).await.unwrap();
        let cache = LocalCache::new(pool.clone());
        let config = ConfigStore::new(pool);
        Arc::new(Reconciler::new(
            Arc::new(EmptyInv),
            Arc::new(EmptyCloud),
            cache,
            config,
            Arc::new(StatusReporter::new()),
        ))
    }

    #[tokio::test]
    async fn manual_trigger_runs_one_tick() {
        let reconciler = test_reconciler().await;
        let scheduler = Arc::new(Scheduler::new(reconciler));
        let result = scheduler.trigger_now().await;
        assert!(result.is_some());
        assert!(result.unwrap().is_ok());
    }

    #[tokio::test]
    async fn overlapping_triggers_are_coalesced_not_queued() {
        let reconciler = test_reconciler().await;
        let scheduler = Arc::new(Scheduler::new(reconciler));

        let guard = scheduler.running_guard.clone().try_lock_owned().unwrap();
        let result = scheduler.trigger_now().await;
        assert!(result.is_none(), "a tick in progress must coalesce the new trigger");
        drop(guard);

        let result = scheduler.trigger_now().await;
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn repeated_start_is_a_no_op() {
        let reconciler = test_reconciler().await;
        let scheduler = Arc::new(Scheduler::new(reconciler));
        scheduler.start(Duration::from_secs(3600));
        scheduler.start(Duration::from_secs(3600));
        assert!(scheduler.handle.lock().unwrap().is_some());
        scheduler.stop();
    }
}
