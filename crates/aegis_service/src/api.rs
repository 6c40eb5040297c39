//! REST surface over the Assessment Orchestrator: a health check and the
//! `assess` endpoint, plus the three outcome-recording endpoints learning
//! handlers need. Narrow by design — no auth, no UI, no ancillary CRUD;
//! those are transport/auth concerns this module deliberately does not own.

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

use crate::orchestrator::{AssessmentOutcome, AssessmentRequest, Orchestrator};
use aegis_core::{AegisError, Decision, Severity, Urgency};

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    error: String,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Deserialize)]
pub struct AssessRequestBody {
    pub agent: String,
    pub image_refs: Vec<String>,
    pub property_type: String,
    pub age_bin: String,
    pub region: String,
    pub property_age_years: f64,
    pub lighting_quality: f64,
    pub image_clarity: f64,
    pub num_damage_sites: usize,
    #[serde(default)]
    pub critical_candidate: bool,
    #[serde(default)]
    pub segmentation_enabled: bool,
}

impl From<AssessRequestBody> for AssessmentRequest {
    fn from(body: AssessRequestBody) -> Self {
        AssessmentRequest {
            agent: body.agent,
            image_refs: body.image_refs,
            property_type: body.property_type,
            age_bin: body.age_bin,
            region: body.region,
            property_age_years: body.property_age_years,
            lighting_quality: body.lighting_quality,
            image_clarity: body.image_clarity,
            num_damage_sites: body.num_damage_sites,
            critical_candidate: body.critical_candidate,
            segmentation_enabled: body.segmentation_enabled,
        }
    }
}

fn status_for(err: &AegisError) -> StatusCode {
    match err {
        AegisError::InputInvalid(_) => StatusCode::BAD_REQUEST,
        AegisError::DetectorUnavailable { .. } => StatusCode::BAD_GATEWAY,
        AegisError::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        AegisError::CriticNumerical { .. } | AegisError::MemoryUpdateFailure { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn assess(
    State(state): State<ApiState>,
    Json(body): Json<AssessRequestBody>,
) -> Result<Json<AssessmentOutcome>, (StatusCode, Json<ErrorResponse>)> {
    let request: AssessmentRequest = body.into();
    state.orchestrator.assess(&request).await.map(Json).map_err(|e| {
        error!(error = %e, "assess request failed");
        (status_for(&e), Json(ErrorResponse { error: e.to_string() }))
    })
}

#[derive(Deserialize)]
pub struct ValidationOutcomeBody {
    pub context_keys: Vec<f64>,
    pub original: SimpleAssessment,
    pub validated: SimpleAssessment,
}

/// Flattened wire form of `ProvisionalAssessment`, accepted by the outcome
/// endpoints so callers don't need the full detector/evidence payload to
/// report back what a human validator or contractor observed.
#[derive(Deserialize)]
pub struct SimpleAssessment {
    pub damage_type: String,
    pub severity: Severity,
    pub confidence: f64,
    pub urgency: Urgency,
    pub has_critical_hazard: bool,
    pub cost_recommended: Option<f64>,
}

fn to_provisional(s: &SimpleAssessment) -> aegis_core::ProvisionalAssessment {
    aegis_core::ProvisionalAssessment {
        damage_type: s.damage_type.clone(),
        severity: s.severity,
        confidence: s.confidence,
        urgency: s.urgency,
        has_critical_hazard: s.has_critical_hazard,
        cost_estimate: s.cost_recommended.map(|r| aegis_core::CostEstimate {
            min: r,
            max: r,
            recommended: r,
        }),
        detected_items: Vec::new(),
        evidence: Vec::new(),
    }
}

async fn record_validation(
    State(state): State<ApiState>,
    Json(body): Json<ValidationOutcomeBody>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    let original = to_provisional(&body.original);
    let validated = to_provisional(&body.validated);
    let outcome = crate::learning::ValidationOutcome {
        original: &original,
        validated: &validated,
    };
    state
        .orchestrator
        .record_validation_outcome(&body.context_keys, &outcome)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(|e| (status_for(&e), Json(ErrorResponse { error: e.to_string() })))
}

#[derive(Deserialize)]
pub struct RepairOutcomeBody {
    pub context_keys: Vec<f64>,
    pub predicted_severity: Severity,
    pub actual_severity: Severity,
    pub predicted_cost: f64,
    pub actual_cost: f64,
    pub predicted_urgency: Urgency,
    pub actual_urgency: Urgency,
}

async fn record_repair(
    State(state): State<ApiState>,
    Json(body): Json<RepairOutcomeBody>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    let outcome = crate::learning::RepairOutcome {
        predicted_severity: body.predicted_severity,
        actual_severity: body.actual_severity,
        predicted_cost: body.predicted_cost,
        actual_cost: body.actual_cost,
        predicted_urgency: body.predicted_urgency,
        actual_urgency: body.actual_urgency,
    };
    state
        .orchestrator
        .record_repair_outcome(&body.context_keys, &outcome)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(|e| (status_for(&e), Json(ErrorResponse { error: e.to_string() })))
}

#[derive(Deserialize)]
pub struct ProgressionOutcomeBody {
    pub context_keys: Vec<f64>,
    pub earlier_severity: Severity,
    pub later_severity: Severity,
    pub days_elapsed: f64,
}

async fn record_progression(
    State(state): State<ApiState>,
    Json(body): Json<ProgressionOutcomeBody>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    let outcome = crate::learning::ProgressionOutcome {
        earlier_severity: body.earlier_severity,
        later_severity: body.later_severity,
        days_elapsed: body.days_elapsed,
    };
    state
        .orchestrator
        .record_progression_outcome(&body.context_keys, &outcome)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(|e| (status_for(&e), Json(ErrorResponse { error: e.to_string() })))
}

#[derive(Deserialize)]
pub struct DecisionOutcomeBody {
    pub decision: Decision,
    pub stratum: String,
    pub context_vector: Vec<f64>,
    pub reward: f64,
    pub safety: f64,
}

async fn record_decision(
    State(state): State<ApiState>,
    Json(body): Json<DecisionOutcomeBody>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    let array: [f64; aegis_core::CONTEXT_VECTOR_LEN] = body.context_vector.clone().try_into().map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("context_vector must have exactly {} entries", aegis_core::CONTEXT_VECTOR_LEN),
            }),
        )
    })?;
    let context = aegis_core::ContextVector(array);
    state
        .orchestrator
        .record_decision_outcome(body.decision, &body.stratum, &context, body.reward, body.safety)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(|e| (status_for(&e), Json(ErrorResponse { error: e.to_string() })))
}

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = ApiState { orchestrator };
    Router::new()
        .route("/health", get(health))
        .route("/api/assess", post(assess))
        .route("/api/outcomes/validation", post(record_validation))
        .route("/api/outcomes/repair", post(record_repair))
        .route("/api/outcomes/progression", post(record_progression))
        .route("/api/outcomes/decision", post(record_decision))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

pub async fn run_api_server(port: u16, orchestrator: Arc<Orchestrator>) -> anyhow::Result<()> {
    let app = router(orchestrator);
    let addr = if std::env::var("AEGIS_PUBLIC").is_ok() {
        format!("0.0.0.0:{port}")
    } else {
        format!("127.0.0.1:{port}")
    };
    tracing::info!(address = %addr, "API server listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::detectors::MockDetectorClient;
    use crate::repository::InMemoryRepository;
    use aegis_core::AegisConfig;

    fn test_orchestrator() -> Arc<Orchestrator> {
        Arc::new(Orchestrator::new(
            AegisConfig::default(),
            Arc::new(MockDetectorClient::new(0.85, "water_damage")),
            Arc::new(InMemoryRepository::new()),
            Arc::new(FixedClock(chrono::Utc::now())),
            "site-1",
        ))
    }

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let response = health().await;
        assert_eq!(response.status, "ok");
    }

    #[tokio::test]
    async fn assess_rejects_empty_image_refs_with_bad_request() {
        let state = ApiState {
            orchestrator: test_orchestrator(),
        };
        let body = AssessRequestBody {
            agent: "site-1".to_string(),
            image_refs: vec![],
            property_type: "residential".to_string(),
            age_bin: "20-50".to_string(),
            region: "us-west-2".to_string(),
            property_age_years: 35.0,
            lighting_quality: 0.7,
            image_clarity: 0.8,
            num_damage_sites: 1,
            critical_candidate: false,
            segmentation_enabled: false,
        };
        let result = assess(State(state), Json(body)).await;
        let (status, _) = result.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn assess_succeeds_for_a_well_formed_request() {
        let state = ApiState {
            orchestrator: test_orchestrator(),
        };
        let body = AssessRequestBody {
            agent: "site-1".to_string(),
            image_refs: vec!["https://example.com/a.jpg".to_string()],
            property_type: "residential".to_string(),
            age_bin: "20-50".to_string(),
            region: "us-west-2".to_string(),
            property_age_years: 35.0,
            lighting_quality: 0.7,
            image_clarity: 0.8,
            num_damage_sites: 1,
            critical_candidate: false,
            segmentation_enabled: false,
        };
        let result = assess(State(state), Json(body)).await;
        assert!(result.is_ok());
    }

    #[test]
    fn router_builds_without_panicking() {
        let _ = router(test_orchestrator());
    }
}
