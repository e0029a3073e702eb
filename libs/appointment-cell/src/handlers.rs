// libs/appointment-cell/src/handlers.rs
use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    parse_date, AgendaQuery, AgendaResponse, Appointment, AppointmentStatus, AvailableSlotsQuery,
    AvailableSlotsResponse, BookAppointmentRequest, CascadeResponse, ConfirmOutcome, CopyDayRequest,
    DispatchRemindersRequest, DispatchSummary, EndContractRequest, GenerateAppointmentsRequest, GenerationSummary,
    PatchAppointmentRequest, ReplaceScheduleRequest, RescheduleOptions, RescheduleRequest,
    ScheduleConfig, WeekScheduleResponse,
};
use crate::router::AppointmentCellState;
use crate::services::audit::{self, Actor, AuditAction};
use crate::services::reminder_token::clinic_tomorrow;

// ==============================================================================
// CALLER CONTEXT
// ==============================================================================

/// Who is calling a staff endpoint and which clinic they act for.
struct StaffContext {
    user_id: Uuid,
    clinic_id: Option<Uuid>,
    is_super_admin: bool,
}

impl StaffContext {
    fn from_user(user: &User) -> Result<Self, AppError> {
        if !user.is_professional() && !user.is_super_admin() {
            return Err(AppError::Forbidden("Only professionals and administrators can manage the schedule".to_string()));
        }
        let user_id = Uuid::parse_str(&user.id)
            .map_err(|_| AppError::Auth("Invalid user id in token".to_string()))?;
        let clinic_id = match user.clinic_id.as_deref() {
            Some(raw) => Some(
                Uuid::parse_str(raw).map_err(|_| AppError::Auth("Invalid clinic id in token".to_string()))?,
            ),
            None => None,
        };
        Ok(Self {
            user_id,
            clinic_id,
            is_super_admin: user.is_super_admin(),
        })
    }

    fn clinic(&self) -> Result<Uuid, AppError> {
        self.clinic_id
            .ok_or_else(|| AppError::Forbidden("User is not linked to a clinic".to_string()))
    }

    /// Professionals are confined to their clinic; super admins are not.
    fn clinic_scope(&self) -> Result<Option<Uuid>, AppError> {
        if self.is_super_admin {
            Ok(self.clinic_id)
        } else {
            self.clinic().map(Some)
        }
    }

    /// The professional whose calendar is addressed. Only super admins may
    /// pick someone other than themselves.
    fn professional(&self, requested: Option<Uuid>) -> Result<Uuid, AppError> {
        match requested {
            Some(id) if id != self.user_id && !self.is_super_admin => Err(AppError::Forbidden(
                "Professionals can only act on their own calendar".to_string(),
            )),
            Some(id) => Ok(id),
            None => Ok(self.user_id),
        }
    }

    fn actor(&self) -> Actor {
        if self.is_super_admin {
            Actor::super_admin(self.user_id)
        } else {
            Actor::professional(self.user_id)
        }
    }
}

// ==============================================================================
// SCHEDULE CONFIGURATION HANDLERS
// ==============================================================================

pub async fn get_schedule_config(
    State(state): State<AppointmentCellState>,
    Extension(user): Extension<User>,
) -> Result<Json<WeekScheduleResponse>, AppError> {
    let ctx = StaffContext::from_user(&user)?;
    let days = state.schedule.get_week(ctx.clinic()?).await?;
    Ok(Json(WeekScheduleResponse { days }))
}

pub async fn replace_schedule_config(
    State(state): State<AppointmentCellState>,
    Extension(user): Extension<User>,
    Json(request): Json<ReplaceScheduleRequest>,
) -> Result<Json<WeekScheduleResponse>, AppError> {
    let ctx = StaffContext::from_user(&user)?;
    let clinic_id = ctx.clinic()?;

    let days = state.schedule.replace_week(clinic_id, request).await?;
    audit::record(AuditAction::ScheduleConfigUpdated, &ctx.actor(), clinic_id, &[]);
    Ok(Json(WeekScheduleResponse { days }))
}

pub async fn copy_schedule_day(
    State(state): State<AppointmentCellState>,
    Extension(user): Extension<User>,
    Json(request): Json<CopyDayRequest>,
) -> Result<Json<ScheduleConfig>, AppError> {
    let ctx = StaffContext::from_user(&user)?;
    let clinic_id = ctx.clinic()?;

    let copied = state
        .schedule
        .copy_day(clinic_id, request.from_day, request.to_day)
        .await?;
    audit::record(AuditAction::ScheduleConfigUpdated, &ctx.actor(), clinic_id, &[]);
    Ok(Json(copied))
}

// ==============================================================================
// AVAILABILITY AND BOOKING HANDLERS
// ==============================================================================

pub async fn get_available_slots(
    State(state): State<AppointmentCellState>,
    Extension(user): Extension<User>,
    Query(query): Query<AvailableSlotsQuery>,
) -> Result<Json<AvailableSlotsResponse>, AppError> {
    let ctx = StaffContext::from_user(&user)?;
    let clinic_id = ctx.clinic()?;
    let professional_id = ctx.professional(query.professional_id)?;
    let from = parse_date("from", &query.from)?;
    let to = parse_date("to", &query.to)?;

    let response = state
        .availability
        .available_slots(professional_id, clinic_id, from, to)
        .await?;
    Ok(Json(response))
}

/// Every booked appointment of the caller's clinic in the range, with
/// patient names.
pub async fn list_appointments(
    State(state): State<AppointmentCellState>,
    Extension(user): Extension<User>,
    Query(query): Query<AgendaQuery>,
) -> Result<Json<AgendaResponse>, AppError> {
    let ctx = StaffContext::from_user(&user)?;
    let from = parse_date("from", &query.from)?;
    let to = parse_date("to", &query.to)?;

    let appointments = state.availability.agenda(ctx.clinic()?, from, to).await?;
    Ok(Json(AgendaResponse { appointments }))
}

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<AppointmentCellState>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<(StatusCode, Json<Appointment>), AppError> {
    let ctx = StaffContext::from_user(&user)?;
    let clinic_id = ctx.clinic()?;
    let professional_id = ctx.professional(request.professional_id)?;

    let appointment = state
        .lifecycle
        .book(clinic_id, professional_id, request, &ctx.actor())
        .await?;
    Ok((StatusCode::CREATED, Json(appointment)))
}

pub async fn patch_appointment(
    State(state): State<AppointmentCellState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<PatchAppointmentRequest>,
) -> Result<Json<Appointment>, AppError> {
    let ctx = StaffContext::from_user(&user)?;
    let updated = state
        .lifecycle
        .patch(ctx.clinic()?, appointment_id, request, &ctx.actor())
        .await?;
    Ok(Json(updated))
}

// ==============================================================================
// CONTRACT SERIES HANDLERS
// ==============================================================================

pub async fn generate_contract_appointments(
    State(state): State<AppointmentCellState>,
    Extension(user): Extension<User>,
    Path(contract_id): Path<Uuid>,
    request: Option<Json<GenerateAppointmentsRequest>>,
) -> Result<(StatusCode, Json<GenerationSummary>), AppError> {
    let ctx = StaffContext::from_user(&user)?;
    let request = request.map(|Json(r)| r).unwrap_or_default();

    let summary = state
        .recurrence
        .generate_for_contract(ctx.clinic_scope()?, contract_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

pub async fn promote_contract_appointments(
    State(state): State<AppointmentCellState>,
    Extension(user): Extension<User>,
    Path(contract_id): Path<Uuid>,
) -> Result<Json<CascadeResponse>, AppError> {
    let ctx = StaffContext::from_user(&user)?;
    let affected_ids = state
        .lifecycle
        .promote_contract(ctx.clinic_scope()?, contract_id, &ctx.actor())
        .await?;
    Ok(Json(CascadeResponse {
        contract_id,
        status: AppointmentStatus::Agendado,
        affected_ids,
    }))
}

pub async fn cancel_contract_appointments(
    State(state): State<AppointmentCellState>,
    Extension(user): Extension<User>,
    Path(contract_id): Path<Uuid>,
) -> Result<Json<CascadeResponse>, AppError> {
    let ctx = StaffContext::from_user(&user)?;
    let affected_ids = state
        .lifecycle
        .cancel_by_contract(ctx.clinic_scope()?, contract_id, &ctx.actor())
        .await?;
    Ok(Json(CascadeResponse {
        contract_id,
        status: AppointmentStatus::Cancelled,
        affected_ids,
    }))
}

pub async fn end_contract_appointments(
    State(state): State<AppointmentCellState>,
    Extension(user): Extension<User>,
    Path(contract_id): Path<Uuid>,
    Json(request): Json<EndContractRequest>,
) -> Result<Json<CascadeResponse>, AppError> {
    let ctx = StaffContext::from_user(&user)?;
    let end_date = parse_date("end_date", &request.end_date)?;

    let affected_ids = state
        .lifecycle
        .end_by_date(ctx.clinic_scope()?, contract_id, end_date, &ctx.actor())
        .await?;
    Ok(Json(CascadeResponse {
        contract_id,
        status: AppointmentStatus::SeriesEnded,
        affected_ids,
    }))
}

// ==============================================================================
// REMINDER HANDLERS
// ==============================================================================

/// Sends tomorrow's reminders unless another date is given. Professionals
/// only reach their own patients.
pub async fn dispatch_reminders(
    State(state): State<AppointmentCellState>,
    Extension(user): Extension<User>,
    request: Option<Json<DispatchRemindersRequest>>,
) -> Result<Json<DispatchSummary>, AppError> {
    let ctx = StaffContext::from_user(&user)?;
    let request = request.map(|Json(r)| r).unwrap_or_default();

    let professional_id = if ctx.is_super_admin {
        request.professional_id
    } else {
        Some(ctx.professional(request.professional_id)?)
    };
    let date = match request.date.as_deref() {
        Some(raw) => parse_date("date", raw)?,
        None => clinic_tomorrow(Utc::now(), state.config.clinic_offset()),
    };

    debug!("Dispatching reminders for {} (professional {:?})", date, professional_id);
    let summary = state.reminders.dispatch(date, professional_id).await?;
    Ok(Json(summary))
}

pub async fn get_reschedule_options(
    State(state): State<AppointmentCellState>,
    Path(token): Path<String>,
) -> Result<Json<RescheduleOptions>, AppError> {
    let options = state.reminder_tokens.reschedule_options(&token).await?;
    Ok(Json(options))
}

pub async fn confirm_by_token(
    State(state): State<AppointmentCellState>,
    Path(token): Path<String>,
) -> Result<Json<Value>, AppError> {
    let (outcome, appointment) = state.reminder_tokens.confirm(&token).await.map_err(|e| {
        warn!("Reminder confirmation rejected: {}", e);
        AppError::from(e)
    })?;

    Ok(Json(json!({
        "message": "Presença confirmada.",
        "appointment_id": appointment.id,
        "status": appointment.status,
        "already_confirmed": outcome == ConfirmOutcome::AlreadyConfirmed,
    })))
}

pub async fn reschedule_by_token(
    State(state): State<AppointmentCellState>,
    Path(token): Path<String>,
    Json(request): Json<RescheduleRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.reminder_tokens.reschedule(&token, request).await?;

    Ok(Json(json!({
        "message": "Consulta remarcada com sucesso.",
        "appointment": appointment,
    })))
}
