//! # API REST
//!
//! REST API for the clinic visit core.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON bodies, actor headers, error bodies, CORS)
//!
//! Uses `api-shared` for health and actor handling, and `clinic-core` for every operation.

#![warn(rust_2018_idioms)]

pub mod error;
pub mod handlers;

use api_shared::{HealthRes, RolePolicy};
use axum::routing::{get, patch, post};
use axum::Router;
use clinic_core::config::{busy_timeout_from_env_value, max_conflict_retries_from_env_value};
use clinic_core::constants::DEFAULT_DATABASE_PATH;
use clinic_core::{ClinicCore, CoreConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use error::{ApiError, ErrorBody};

/// Default listen address for the REST server.
pub const DEFAULT_REST_ADDR: &str = "0.0.0.0:3000";

/// Application state shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub core: Arc<ClinicCore>,
}

impl AppState {
    pub fn new(core: ClinicCore) -> Self {
        Self {
            core: Arc::new(core),
        }
    }
}

/// Settings the server binaries resolve once at startup.
#[derive(Clone, Debug)]
pub struct ServerSettings {
    pub rest_addr: String,
    pub core: CoreConfig,
    pub policy: RolePolicy,
}

impl ServerSettings {
    /// Resolve settings from the process environment.
    ///
    /// # Environment Variables
    /// - `CLINIC_REST_ADDR`: listen address (default: "0.0.0.0:3000")
    /// - `CLINIC_DATABASE_PATH`: SQLite file (default: "clinic.db")
    /// - `CLINIC_BUSY_TIMEOUT_MS`, `CLINIC_MAX_CONFLICT_RETRIES`: store tuning
    /// - `CLINIC_UNLOCK_ROLES`, `CLINIC_DISCHARGE_ROLES`, `CLINIC_FINAL_DISCHARGE_ROLES`:
    ///   comma-separated role lists
    ///
    /// # Errors
    /// Returns an error if any value is set but invalid.
    pub fn from_env() -> anyhow::Result<Self> {
        let env = |name: &str| std::env::var(name).ok();

        let database_path = env("CLINIC_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH));
        let core = CoreConfig::new(
            database_path,
            busy_timeout_from_env_value(env("CLINIC_BUSY_TIMEOUT_MS"))?,
            max_conflict_retries_from_env_value(env("CLINIC_MAX_CONFLICT_RETRIES"))?,
        )?;
        let policy = RolePolicy::from_env_values(
            env("CLINIC_UNLOCK_ROLES"),
            env("CLINIC_DISCHARGE_ROLES"),
            env("CLINIC_FINAL_DISCHARGE_ROLES"),
        )?;

        Ok(Self {
            rest_addr: env("CLINIC_REST_ADDR").unwrap_or_else(|| DEFAULT_REST_ADDR.into()),
            core,
            policy,
        })
    }

    /// Open the store and build the application state.
    pub fn into_state(self) -> anyhow::Result<AppState> {
        let core = ClinicCore::open(self.core, Arc::new(self.policy))?;
        Ok(AppState::new(core))
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::register_visit,
        handlers::get_visit,
        handlers::begin_examination,
        handlers::update_status,
        handlers::create_room,
        handlers::get_room,
        handlers::set_maintenance,
        handlers::assign_bed,
        handlers::transfer_bed,
        handlers::release_bed,
        handlers::lock_record,
        handlers::unlock_visit,
        handlers::create_billing,
        handlers::record_payment,
        handlers::clinical_discharge,
        handlers::final_discharge,
        handlers::handover,
    ),
    components(schemas(
        HealthRes,
        ErrorBody,
        handlers::RegisterVisitReq,
        handlers::CreateRoomReq,
        handlers::SetMaintenanceReq,
        handlers::AssignBedReq,
        handlers::TransferBedReq,
        handlers::ReleaseBedReq,
        handlers::LockRecordReq,
        handlers::VisitIdReq,
        handlers::BillingItemReq,
        handlers::CreateBillingReq,
        handlers::PaymentReq,
        handlers::DischargeSummaryReq,
        handlers::UpdateStatusReq,
        handlers::HandoverReq,
        clinic_core::Visit,
        clinic_core::VisitType,
        clinic_core::VisitStatus,
        clinic_core::Room,
        clinic_core::RoomStatus,
        clinic_core::RoomOccupancy,
        clinic_core::BedAssignment,
        clinic_core::MedicalRecord,
        clinic_core::Billing,
        clinic_core::BillingItem,
        clinic_core::BillingStatement,
        clinic_core::PaymentStatus,
        clinic_core::DischargeSummary,
        clinic_core::HandoverTarget,
        clinic_core::HandoverRequest,
        clinic_core::HandoverOutcome,
        clinic_core::VisitOverview,
    ))
)]
pub struct ApiDoc;

/// Build the REST router with Swagger UI and permissive CORS.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/visits", post(handlers::register_visit))
        .route("/visits/:id", get(handlers::get_visit))
        .route("/visits/:id/examination", post(handlers::begin_examination))
        .route("/visit/status", patch(handlers::update_status))
        .route("/visit/unlock", post(handlers::unlock_visit))
        .route("/rooms", post(handlers::create_room))
        .route("/rooms/:id", get(handlers::get_room))
        .route("/rooms/:id/maintenance", post(handlers::set_maintenance))
        .route("/bed/assign", post(handlers::assign_bed))
        .route("/bed/transfer", post(handlers::transfer_bed))
        .route("/bed/release", post(handlers::release_bed))
        .route("/record/lock", post(handlers::lock_record))
        .route("/billing", post(handlers::create_billing))
        .route("/billing/payment", post(handlers::record_payment))
        .route("/discharge-summary", post(handlers::clinical_discharge))
        .route("/final-discharge", post(handlers::final_discharge))
        .route("/handover", post(handlers::handover))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
