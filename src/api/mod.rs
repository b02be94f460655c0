//! Thin HTTP boundary over the Reconciler. Only the three endpoints the
//! Reconciler boundary actually names are exposed here — `/health`,
//! `/sync`, `/status` — everything else (dashboard pages, settings CRUD,
//! log tailing) is a collaborator outside this engine.

pub mod health;
pub mod sync;

use std::sync::Arc;

use poem::Route;
use poem_openapi::{OpenApiService, Tags};

use crate::scheduler::Scheduler;
use crate::status::StatusReporter;

#[derive(Tags)]
enum ApiTags {
    Reconciler,
}

/// Everything a request handler needs, shared behind `Arc`s so cloning this
/// struct is cheap and safe across the poem worker pool.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub status: Arc<StatusReporter>,
}

type ApiServices = (health::HealthApi, sync::SyncApi);

pub fn make_open_api_service(state: &AppState) -> OpenApiService<ApiServices, ()> {
    OpenApiService::new(
        (
            health::HealthApi::new(state.clone()),
            sync::SyncApi::new(state.clone()),
        ),
        "Filament Sync Service",
        env!("CARGO_PKG_VERSION"),
    )
}

pub fn combined_routes(state: &AppState) -> Route {
    let api_service = make_open_api_service(state);
    let ui = api_service.swagger_ui();

    Route::new().nest("/", api_service).nest("/docs", ui)
}
