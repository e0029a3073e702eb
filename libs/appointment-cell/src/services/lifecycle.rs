// libs/appointment-cell/src/services/lifecycle.rs
use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate, NaiveTime, Utc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::models::{
    add_minutes, parse_date, parse_time, wall_clock, Appointment, AppointmentError, AppointmentPatch,
    AppointmentStatus, BookAppointmentRequest, ConfirmOutcome, Contract, NewAppointment,
    PatchAppointmentRequest, StatusCascade, DEFAULT_CONSULTATION_DURATION_MINUTES,
};
use crate::services::audit::{self, Actor, AuditAction};
use crate::services::availability::AvailabilityService;
use crate::services::reservation::SlotReservation;
use crate::store::SchedulingStore;

/// Owns every status change of an appointment after it exists.
pub struct AppointmentLifecycleService {
    store: Arc<dyn SchedulingStore>,
    reservations: Arc<dyn SlotReservation>,
    availability: AvailabilityService,
    clinic_offset: FixedOffset,
}

impl AppointmentLifecycleService {
    pub fn new(
        store: Arc<dyn SchedulingStore>,
        reservations: Arc<dyn SlotReservation>,
        clinic_offset: FixedOffset,
    ) -> Self {
        Self {
            availability: AvailabilityService::new(store.clone()),
            store,
            reservations,
            clinic_offset,
        }
    }

    /// Ad-hoc booking by a professional. The slot is re-checked and written
    /// while the professional's day is reserved.
    #[instrument(skip(self, request, actor))]
    pub async fn book(
        &self,
        clinic_id: Uuid,
        professional_id: Uuid,
        request: BookAppointmentRequest,
        actor: &Actor,
    ) -> Result<Appointment, AppointmentError> {
        let date = parse_date("appointment_date", &request.appointment_date)?;
        let start = parse_time("start_time", &request.start_time)?;

        let duration = self
            .availability
            .week_schedule(clinic_id)
            .await?
            .for_date(date)
            .map(|config| config.effective_duration())
            .unwrap_or(DEFAULT_CONSULTATION_DURATION_MINUTES);
        let end = end_of(start, duration)?;

        let _guard = self.reservations.reserve(professional_id, date).await;
        if !self
            .availability
            .is_slot_free(professional_id, clinic_id, date, start, None)
            .await?
        {
            warn!("Slot {} {} is not available for professional {}", date, start, professional_id);
            return Err(AppointmentError::SlotUnavailable);
        }

        let created = self
            .store
            .create_appointment(NewAppointment {
                clinic_id,
                professional_id,
                patient_id: request.patient_id,
                contract_id: request.contract_id,
                appointment_date: date,
                start_time: start,
                end_time: end,
                status: AppointmentStatus::Confirmed,
                notes: request.notes,
            })
            .await?;

        info!("Booked appointment {} on {} at {}", created.id, date, start);
        audit::record(AuditAction::AppointmentCreated, actor, created.id, &[created.id]);
        Ok(created)
    }

    /// `AGENDADO -> CONFIRMADO`. Confirming twice is a no-op success.
    pub async fn confirm(
        &self,
        appointment: &Appointment,
        actor: &Actor,
    ) -> Result<(ConfirmOutcome, Appointment), AppointmentError> {
        match confirm_transition(appointment.status)? {
            ConfirmOutcome::AlreadyConfirmed => {
                info!("Appointment {} was already confirmed", appointment.id);
                Ok((ConfirmOutcome::AlreadyConfirmed, appointment.clone()))
            }
            ConfirmOutcome::Confirmed => {
                let updated = self
                    .store
                    .update_appointment(
                        appointment.clinic_id,
                        appointment.id,
                        AppointmentPatch::status(AppointmentStatus::Confirmado),
                    )
                    .await?
                    .ok_or(AppointmentError::NotFound)?;

                info!("Attendance confirmed for appointment {}", updated.id);
                audit::record(AuditAction::AttendanceConfirmed, actor, updated.id, &[updated.id]);
                Ok((ConfirmOutcome::Confirmed, updated))
            }
        }
    }

    /// Moves an appointment to a slot currently offered for its professional,
    /// keeping its duration. The result is always `AGENDADO`.
    #[instrument(skip(self, appointment, actor), fields(appointment_id = %appointment.id))]
    pub async fn reschedule(
        &self,
        appointment: &Appointment,
        date: NaiveDate,
        start: NaiveTime,
        actor: &Actor,
    ) -> Result<Appointment, AppointmentError> {
        let today = Utc::now().with_timezone(&self.clinic_offset).date_naive();
        if date < today {
            return Err(AppointmentError::Validation(format!(
                "cannot reschedule to {}, which is before today ({})",
                date, today
            )));
        }
        let end = end_of(start, appointment.duration_minutes())?;

        let _guard = self.reservations.reserve(appointment.professional_id, date).await;
        if !self
            .availability
            .is_slot_free(
                appointment.professional_id,
                appointment.clinic_id,
                date,
                start,
                Some(appointment.id),
            )
            .await?
        {
            warn!("Rejected reschedule of {} to unavailable slot {} {}", appointment.id, date, start);
            return Err(AppointmentError::SlotUnavailable);
        }

        let patch = AppointmentPatch {
            appointment_date: Some(date),
            start_time: Some(start),
            end_time: Some(end),
            status: Some(AppointmentStatus::Agendado),
            notes: None,
        };
        let updated = self
            .store
            .update_appointment(appointment.clinic_id, appointment.id, patch)
            .await?
            .ok_or(AppointmentError::NotFound)?;

        info!(
            "Rescheduled appointment {} from {} {} to {} {}",
            updated.id, appointment.appointment_date, appointment.start_time, date, start
        );
        audit::record(AuditAction::AppointmentRescheduled, actor, updated.id, &[updated.id]);
        Ok(updated)
    }

    /// Administrative edit. No predecessor check on status, only the allow-list.
    pub async fn patch(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
        request: PatchAppointmentRequest,
        actor: &Actor,
    ) -> Result<Appointment, AppointmentError> {
        let patch = patch_from_request(request)?;

        let current = self
            .store
            .get_appointment(clinic_id, appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound)?;
        let start = patch.start_time.unwrap_or(current.start_time);
        let end = patch.end_time.unwrap_or(current.end_time);
        if start >= end {
            return Err(AppointmentError::Validation(format!(
                "start_time {} must be before end_time {}",
                wall_clock::format(start),
                wall_clock::format(end)
            )));
        }

        let updated = self
            .store
            .update_appointment(clinic_id, appointment_id, patch)
            .await?
            .ok_or(AppointmentError::NotFound)?;

        info!("Updated appointment {} (status {})", updated.id, updated.status);
        audit::record(AuditAction::AppointmentUpdated, actor, updated.id, &[updated.id]);
        Ok(updated)
    }

    /// Cancels every appointment of the contract that is neither cancelled nor
    /// completed. Returns the ids that changed.
    pub async fn cancel_by_contract(
        &self,
        clinic_scope: Option<Uuid>,
        contract_id: Uuid,
        actor: &Actor,
    ) -> Result<Vec<Uuid>, AppointmentError> {
        self.contract_in_scope(clinic_scope, contract_id).await?;

        let affected = self
            .store
            .apply_status_cascade(&StatusCascade::cancel_contract(contract_id))
            .await?;

        info!("Cancelled {} appointments of contract {}", affected.len(), contract_id);
        audit::record(AuditAction::ContractCancelled, actor, contract_id, &affected);
        Ok(affected)
    }

    /// Ends a signed contract at `end_date` and the series after it.
    /// Appointments on or before that date keep their status.
    pub async fn end_by_date(
        &self,
        clinic_scope: Option<Uuid>,
        contract_id: Uuid,
        end_date: NaiveDate,
        actor: &Actor,
    ) -> Result<Vec<Uuid>, AppointmentError> {
        self.contract_in_scope(clinic_scope, contract_id)
            .await?
            .ensure_signed("end")?;

        if !self.store.end_contract(contract_id, end_date).await? {
            warn!("Contract {} left SIGNED before it could be ended", contract_id);
            return Err(AppointmentError::Conflict(
                "contract status changed while ending it; reload and try again".to_string(),
            ));
        }

        let affected = self
            .store
            .apply_status_cascade(&StatusCascade::end_series(contract_id, end_date))
            .await?;

        info!(
            "Ended series of contract {} after {}: {} appointments",
            contract_id,
            end_date,
            affected.len()
        );
        audit::record(AuditAction::ContractEnded, actor, contract_id, &[]);
        if !affected.is_empty() {
            audit::record(AuditAction::SeriesEndedBatch, actor, contract_id, &affected);
        }
        Ok(affected)
    }

    /// Signature step: pre-scheduled appointments become scheduled.
    pub async fn promote_contract(
        &self,
        clinic_scope: Option<Uuid>,
        contract_id: Uuid,
        actor: &Actor,
    ) -> Result<Vec<Uuid>, AppointmentError> {
        self.contract_in_scope(clinic_scope, contract_id).await?;

        let affected = self
            .store
            .apply_status_cascade(&StatusCascade::promote_contract(contract_id))
            .await?;

        info!("Promoted {} appointments of contract {}", affected.len(), contract_id);
        audit::record(AuditAction::ContractAppointmentsPromoted, actor, contract_id, &affected);
        Ok(affected)
    }

    async fn contract_in_scope(
        &self,
        clinic_scope: Option<Uuid>,
        contract_id: Uuid,
    ) -> Result<Contract, AppointmentError> {
        self.store
            .get_contract(contract_id)
            .await?
            .filter(|c| clinic_scope.map_or(true, |clinic| clinic == c.clinic_id))
            .ok_or(AppointmentError::ContractNotFound)
    }
}

/// Outcome of confirming attendance from `status`, without side effects.
pub fn confirm_transition(status: AppointmentStatus) -> Result<ConfirmOutcome, AppointmentError> {
    match status {
        AppointmentStatus::Agendado => Ok(ConfirmOutcome::Confirmed),
        AppointmentStatus::Confirmado => Ok(ConfirmOutcome::AlreadyConfirmed),
        from => Err(AppointmentError::InvalidStatusTransition {
            from,
            action: "confirm",
        }),
    }
}

fn end_of(start: NaiveTime, duration: i32) -> Result<NaiveTime, AppointmentError> {
    add_minutes(start, duration).ok_or_else(|| {
        AppointmentError::Validation(format!(
            "a {} minute appointment at {} would end after midnight",
            duration, start
        ))
    })
}

fn patch_from_request(request: PatchAppointmentRequest) -> Result<AppointmentPatch, AppointmentError> {
    let status = match request.status.as_deref() {
        Some(raw) => {
            let status: AppointmentStatus = raw.parse()?;
            if !status.is_patchable() {
                return Err(AppointmentError::Validation(format!(
                    "status {} cannot be set on an appointment",
                    status
                )));
            }
            Some(status)
        }
        None => None,
    };

    let patch = AppointmentPatch {
        appointment_date: request
            .appointment_date
            .as_deref()
            .map(|raw| parse_date("appointment_date", raw))
            .transpose()?,
        start_time: request
            .start_time
            .as_deref()
            .map(|raw| parse_time("start_time", raw))
            .transpose()?,
        end_time: request
            .end_time
            .as_deref()
            .map(|raw| parse_time("end_time", raw))
            .transpose()?,
        status,
        notes: request.notes,
    };

    if patch.is_empty() {
        return Err(AppointmentError::Validation("no fields to update".to_string()));
    }
    Ok(patch)
}
