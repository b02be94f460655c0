use poem_openapi::payload::Json;
use poem_openapi::*;

use crate::api::{ApiTags, AppState};

pub struct HealthApi {
    state: AppState,
}

impl HealthApi {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Object)]
pub struct HealthResponse {
    pub ok: bool,
    pub reconciler_state: String,
}

#[OpenApi(prefix_path = "/", tag = ApiTags::Reconciler)]
impl HealthApi {
    /// Liveness probe. Always `ok: true` once the process can serve requests
    /// at all — it does not reach into either upstream.
    #[oai(path = "/health", method = "get", operation_id = "health")]
    async fn health(&self) -> Json<HealthResponse> {
        let snapshot = self.state.status.snapshot();
        Json(HealthResponse {
            ok: true,
            reconciler_state: format!("{:?}", snapshot.state),
        })
    }
}
