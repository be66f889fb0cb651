//! HTTP handlers.
//!
//! Core operations block on SQLite, so every handler hands its work to the blocking pool via
//! [`run`]. Request bodies are plain JSON; identifiers are UUID strings.

use crate::error::{ApiError, ErrorBody};
use crate::AppState;
use api_shared::{actor_from_headers, HealthRes, HealthService};
use axum::extract::{Path as AxumPath, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use clinic_core::{
    BedAssignment, Billing, BillingStatement, CareResult, ClinicCore, DischargeSummary,
    HandoverOutcome, HandoverRequest, MedicalRecord, NewBillingItem, NewDischargeSummary,
    NewVisit, NonEmptyText, Room, RoomOccupancy, TriageLevel, Visit, VisitOverview, VisitStatus,
    VisitType,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

async fn run<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&ClinicCore) -> CareResult<T> + Send + 'static,
{
    let core = state.core.clone();
    Ok(tokio::task::spawn_blocking(move || f(&core)).await??)
}

fn text(value: String) -> Result<NonEmptyText, ApiError> {
    Ok(NonEmptyText::new(value).map_err(clinic_core::CareError::from)?)
}

fn optional_text(value: Option<String>) -> Option<NonEmptyText> {
    value.and_then(|v| NonEmptyText::new(v).ok())
}

// ============================================================================
// REQUEST BODIES
// ============================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterVisitReq {
    pub patient_id: String,
    pub visit_type: VisitType,
    #[serde(default)]
    pub poli_id: Option<String>,
    #[serde(default)]
    pub triage_level: Option<u8>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateRoomReq {
    pub name: String,
    pub bed_count: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetMaintenanceReq {
    pub under_maintenance: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignBedReq {
    pub visit_id: Uuid,
    pub room_id: Uuid,
    pub bed_number: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TransferBedReq {
    pub visit_id: Uuid,
    pub room_id: Uuid,
    pub bed_number: i64,
    pub reason: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReleaseBedReq {
    pub assignment_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LockRecordReq {
    pub medical_record_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VisitIdReq {
    pub visit_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BillingItemReq {
    pub description: String,
    pub amount: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateBillingReq {
    pub visit_id: Uuid,
    pub items: Vec<BillingItemReq>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PaymentReq {
    pub visit_id: Uuid,
    pub amount: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DischargeSummaryReq {
    pub visit_id: Uuid,
    pub diagnosis: String,
    pub treatment: String,
    pub condition: String,
    #[serde(default)]
    pub follow_up: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateStatusReq {
    pub visit_id: Uuid,
    pub status: VisitStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct HandoverReq {
    pub visit_id: Uuid,
    #[serde(flatten)]
    pub request: HandoverRequest,
}

// ============================================================================
// HEALTH
// ============================================================================

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for monitoring and load balancers.
pub async fn health() -> Json<HealthRes> {
    Json(HealthService::check_health())
}

// ============================================================================
// VISITS
// ============================================================================

#[utoipa::path(
    post,
    path = "/visits",
    request_body = RegisterVisitReq,
    responses(
        (status = 201, description = "Visit registered", body = Visit),
        (status = 400, description = "Invalid registration", body = ErrorBody)
    )
)]
/// Register a visit in `registered`.
///
/// Outpatient visits need a `poli_id` and receive a queue number; `triage_level` is accepted for
/// emergency visits only.
pub async fn register_visit(
    State(state): State<AppState>,
    Json(req): Json<RegisterVisitReq>,
) -> Result<(StatusCode, Json<Visit>), ApiError> {
    let new_visit = NewVisit {
        patient_id: text(req.patient_id)?,
        visit_type: req.visit_type,
        poli_id: optional_text(req.poli_id),
        triage_level: req
            .triage_level
            .map(TriageLevel::new)
            .transpose()
            .map_err(clinic_core::CareError::from)?,
        notes: req.notes,
    };
    let visit = run(&state, move |core| core.visits.register(&new_visit)).await?;
    Ok((StatusCode::CREATED, Json(visit)))
}

#[utoipa::path(
    get,
    path = "/visits/{id}",
    params(("id" = Uuid, Path, description = "Visit id")),
    responses(
        (status = 200, description = "Visit with its record, billing and bed", body = VisitOverview),
        (status = 404, description = "Visit not found", body = ErrorBody)
    )
)]
pub async fn get_visit(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<Json<VisitOverview>, ApiError> {
    Ok(Json(run(&state, move |core| core.visits.overview(id)).await?))
}

#[utoipa::path(
    post,
    path = "/visits/{id}/examination",
    params(("id" = Uuid, Path, description = "Visit id")),
    responses(
        (status = 201, description = "Examination started, draft record created", body = MedicalRecord),
        (status = 400, description = "Transition refused or record exists", body = ErrorBody),
        (status = 404, description = "Visit not found", body = ErrorBody)
    )
)]
pub async fn begin_examination(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<(StatusCode, Json<MedicalRecord>), ApiError> {
    let record = run(&state, move |core| core.visits.begin_examination(id)).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

#[utoipa::path(
    patch,
    path = "/visit/status",
    request_body = UpdateStatusReq,
    responses(
        (status = 200, description = "Status updated", body = Visit),
        (status = 400, description = "Transition refused", body = ErrorBody),
        (status = 404, description = "Visit not found", body = ErrorBody)
    )
)]
/// Direct status update. Edges owned by a workflow are refused.
pub async fn update_status(
    State(state): State<AppState>,
    Json(req): Json<UpdateStatusReq>,
) -> Result<Json<Visit>, ApiError> {
    let visit = run(&state, move |core| {
        core.visits
            .transition_status(req.visit_id, req.status, req.reason.as_deref())
    })
    .await?;
    Ok(Json(visit))
}

// ============================================================================
// ROOMS AND BEDS
// ============================================================================

#[utoipa::path(
    post,
    path = "/rooms",
    request_body = CreateRoomReq,
    responses(
        (status = 201, description = "Room created", body = Room),
        (status = 400, description = "Invalid room", body = ErrorBody)
    )
)]
pub async fn create_room(
    State(state): State<AppState>,
    Json(req): Json<CreateRoomReq>,
) -> Result<(StatusCode, Json<Room>), ApiError> {
    let name = text(req.name)?;
    let room = run(&state, move |core| core.beds.create_room(&name, req.bed_count)).await?;
    Ok((StatusCode::CREATED, Json(room)))
}

#[utoipa::path(
    get,
    path = "/rooms/{id}",
    params(("id" = Uuid, Path, description = "Room id")),
    responses(
        (status = 200, description = "Room with its occupied beds", body = RoomOccupancy),
        (status = 404, description = "Room not found", body = ErrorBody)
    )
)]
pub async fn get_room(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<Json<RoomOccupancy>, ApiError> {
    Ok(Json(run(&state, move |core| core.beds.room_occupancy(id)).await?))
}

#[utoipa::path(
    post,
    path = "/rooms/{id}/maintenance",
    params(("id" = Uuid, Path, description = "Room id")),
    request_body = SetMaintenanceReq,
    responses(
        (status = 200, description = "Room status updated", body = Room),
        (status = 404, description = "Room not found", body = ErrorBody)
    )
)]
pub async fn set_maintenance(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
    Json(req): Json<SetMaintenanceReq>,
) -> Result<Json<Room>, ApiError> {
    let room = run(&state, move |core| {
        core.beds.set_maintenance(id, req.under_maintenance)
    })
    .await?;
    Ok(Json(room))
}

#[utoipa::path(
    post,
    path = "/bed/assign",
    request_body = AssignBedReq,
    responses(
        (status = 201, description = "Bed assigned", body = BedAssignment),
        (status = 400, description = "Room full, bed occupied or visit not eligible", body = ErrorBody),
        (status = 404, description = "Visit or room not found", body = ErrorBody),
        (status = 409, description = "Storage conflict persisted", body = ErrorBody)
    )
)]
pub async fn assign_bed(
    State(state): State<AppState>,
    Json(req): Json<AssignBedReq>,
) -> Result<(StatusCode, Json<BedAssignment>), ApiError> {
    let assignment = run(&state, move |core| {
        core.beds.assign(req.visit_id, req.room_id, req.bed_number)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

#[utoipa::path(
    post,
    path = "/bed/transfer",
    request_body = TransferBedReq,
    responses(
        (status = 200, description = "Visit moved to the new bed", body = BedAssignment),
        (status = 400, description = "Destination unavailable or visit not assigned", body = ErrorBody),
        (status = 404, description = "Visit or room not found", body = ErrorBody)
    )
)]
pub async fn transfer_bed(
    State(state): State<AppState>,
    Json(req): Json<TransferBedReq>,
) -> Result<Json<BedAssignment>, ApiError> {
    let reason = text(req.reason)?;
    let assignment = run(&state, move |core| {
        core.beds
            .transfer(req.visit_id, req.room_id, req.bed_number, &reason)
    })
    .await?;
    Ok(Json(assignment))
}

#[utoipa::path(
    post,
    path = "/bed/release",
    request_body = ReleaseBedReq,
    responses(
        (status = 200, description = "Bed released", body = BedAssignment),
        (status = 400, description = "Assignment already discharged", body = ErrorBody),
        (status = 404, description = "Assignment not found", body = ErrorBody)
    )
)]
pub async fn release_bed(
    State(state): State<AppState>,
    Json(req): Json<ReleaseBedReq>,
) -> Result<Json<BedAssignment>, ApiError> {
    Ok(Json(
        run(&state, move |core| core.beds.release(req.assignment_id)).await?,
    ))
}

// ============================================================================
// RECORD LOCK
// ============================================================================

#[utoipa::path(
    post,
    path = "/record/lock",
    request_body = LockRecordReq,
    responses(
        (status = 200, description = "Record locked, visit ready for billing", body = MedicalRecord),
        (status = 400, description = "Already locked or transition refused", body = ErrorBody),
        (status = 401, description = "Missing actor headers", body = ErrorBody),
        (status = 404, description = "Record not found", body = ErrorBody)
    )
)]
pub async fn lock_record(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<LockRecordReq>,
) -> Result<Json<MedicalRecord>, ApiError> {
    let actor = actor_from_headers(&headers)?;
    let record = run(&state, move |core| {
        core.records.lock(req.medical_record_id, &actor)
    })
    .await?;
    Ok(Json(record))
}

#[utoipa::path(
    post,
    path = "/visit/unlock",
    request_body = VisitIdReq,
    responses(
        (status = 200, description = "Visit reopened for examination", body = Visit),
        (status = 400, description = "Not locked or payment in progress", body = ErrorBody),
        (status = 401, description = "Missing actor headers", body = ErrorBody),
        (status = 403, description = "Actor may not unlock", body = ErrorBody),
        (status = 404, description = "Visit not found", body = ErrorBody)
    )
)]
/// Reopen a locked visit. Refused once any payment has been taken.
pub async fn unlock_visit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<VisitIdReq>,
) -> Result<Json<Visit>, ApiError> {
    let actor = actor_from_headers(&headers)?;
    Ok(Json(
        run(&state, move |core| core.records.unlock(req.visit_id, &actor)).await?,
    ))
}

// ============================================================================
// BILLING
// ============================================================================

#[utoipa::path(
    post,
    path = "/billing",
    request_body = CreateBillingReq,
    responses(
        (status = 201, description = "Billing created, visit billed", body = BillingStatement),
        (status = 400, description = "Visit not ready for billing, billing exists or invalid items", body = ErrorBody),
        (status = 404, description = "Visit not found", body = ErrorBody)
    )
)]
pub async fn create_billing(
    State(state): State<AppState>,
    Json(req): Json<CreateBillingReq>,
) -> Result<(StatusCode, Json<BillingStatement>), ApiError> {
    let items = req
        .items
        .into_iter()
        .map(|item| {
            Ok(NewBillingItem {
                description: text(item.description)?,
                amount: item.amount,
            })
        })
        .collect::<Result<Vec<_>, ApiError>>()?;
    let statement = run(&state, move |core| {
        core.billing.create_billing(req.visit_id, &items)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(statement)))
}

#[utoipa::path(
    post,
    path = "/billing/payment",
    request_body = PaymentReq,
    responses(
        (status = 200, description = "Payment recorded", body = Billing),
        (status = 400, description = "Invalid amount, overpayment or already paid", body = ErrorBody),
        (status = 404, description = "Visit not found", body = ErrorBody)
    )
)]
pub async fn record_payment(
    State(state): State<AppState>,
    Json(req): Json<PaymentReq>,
) -> Result<Json<Billing>, ApiError> {
    Ok(Json(
        run(&state, move |core| {
            core.billing.record_payment(req.visit_id, req.amount)
        })
        .await?,
    ))
}

// ============================================================================
// DISCHARGE AND HANDOVER
// ============================================================================

#[utoipa::path(
    post,
    path = "/discharge-summary",
    request_body = DischargeSummaryReq,
    responses(
        (status = 201, description = "Summary stored, visit ready for billing", body = DischargeSummary),
        (status = 400, description = "Not inpatient, summary exists or already ready for billing", body = ErrorBody),
        (status = 401, description = "Missing actor headers", body = ErrorBody),
        (status = 403, description = "Actor may not write discharge summaries", body = ErrorBody),
        (status = 404, description = "Visit not found", body = ErrorBody)
    )
)]
pub async fn clinical_discharge(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DischargeSummaryReq>,
) -> Result<(StatusCode, Json<DischargeSummary>), ApiError> {
    let actor = actor_from_headers(&headers)?;
    let summary = NewDischargeSummary {
        diagnosis: text(req.diagnosis)?,
        treatment: text(req.treatment)?,
        condition: text(req.condition)?,
        follow_up: optional_text(req.follow_up),
    };
    let stored = run(&state, move |core| {
        core.discharge
            .clinical_discharge(req.visit_id, &summary, &actor)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

#[utoipa::path(
    post,
    path = "/final-discharge",
    request_body = VisitIdReq,
    responses(
        (status = 200, description = "Bed released and visit completed", body = Visit),
        (status = 400, description = "Summary missing, billing missing or payment incomplete", body = ErrorBody),
        (status = 401, description = "Missing actor headers", body = ErrorBody),
        (status = 403, description = "Actor may not discharge", body = ErrorBody),
        (status = 404, description = "Visit not found", body = ErrorBody)
    )
)]
pub async fn final_discharge(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<VisitIdReq>,
) -> Result<Json<Visit>, ApiError> {
    let actor = actor_from_headers(&headers)?;
    Ok(Json(
        run(&state, move |core| {
            core.discharge.final_discharge(req.visit_id, &actor)
        })
        .await?,
    ))
}

#[utoipa::path(
    post,
    path = "/handover",
    request_body = HandoverReq,
    responses(
        (status = 200, description = "Emergency visit handed over", body = HandoverOutcome),
        (status = 400, description = "Not emergency, missing target or bed unavailable", body = ErrorBody),
        (status = 401, description = "Missing actor headers", body = ErrorBody),
        (status = 404, description = "Visit or room not found", body = ErrorBody)
    )
)]
pub async fn handover(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<HandoverReq>,
) -> Result<Json<HandoverOutcome>, ApiError> {
    let actor = actor_from_headers(&headers)?;
    Ok(Json(
        run(&state, move |core| {
            core.handover.handover(req.visit_id, &req.request, &actor)
        })
        .await?,
    ))
}
