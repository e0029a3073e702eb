// libs/appointment-cell/src/services/reminder_token.rs
use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use tracing::{debug, error, info};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::models::{
    parse_date, parse_time, Appointment, AppointmentError, ConfirmOutcome, ReminderToken,
    ReminderTokenContext, RescheduleOptions, RescheduleRequest,
};
use crate::services::audit::Actor;
use crate::services::availability::AvailabilityService;
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::reservation::SlotReservation;
use crate::store::SchedulingStore;

/// Public confirm/reschedule flow reached from a reminder link. The token is
/// the only credential; it acts as the guardian it was issued to.
pub struct ReminderTokenService {
    store: Arc<dyn SchedulingStore>,
    availability: AvailabilityService,
    lifecycle: AppointmentLifecycleService,
    token_ttl: Duration,
    window_days: i64,
    clinic_offset: FixedOffset,
}

impl ReminderTokenService {
    pub fn new(
        store: Arc<dyn SchedulingStore>,
        reservations: Arc<dyn SlotReservation>,
        config: &AppConfig,
    ) -> Self {
        Self {
            availability: AvailabilityService::new(store.clone()),
            lifecycle: AppointmentLifecycleService::new(store.clone(), reservations, config.clinic_offset()),
            store,
            token_ttl: Duration::hours(config.reminder_token_ttl_hours),
            window_days: config.reschedule_window_days,
            clinic_offset: config.clinic_offset(),
        }
    }

    /// Creates a fresh token for one (appointment, guardian) pair.
    pub async fn issue(&self, appointment_id: Uuid, guardian_id: Uuid) -> Result<ReminderToken, AppointmentError> {
        let token = ReminderToken {
            appointment_id,
            guardian_id,
            token: Uuid::new_v4().to_string(),
            expires_at: Utc::now() + self.token_ttl,
        };
        let saved = self.store.create_reminder_token(token).await?;
        debug!("Issued reminder token for appointment {} until {}", appointment_id, saved.expires_at);
        Ok(saved)
    }

    pub async fn resolve(&self, token: &str) -> Result<ReminderTokenContext, AppointmentError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AppointmentError::TokenNotFound);
        }
        self.store
            .resolve_reminder_token(token, Utc::now())
            .await?
            .ok_or(AppointmentError::TokenNotFound)
    }

    /// The bound appointment plus the slots it could move to.
    pub async fn reschedule_options(&self, token: &str) -> Result<RescheduleOptions, AppointmentError> {
        let context = self.resolve(token).await?;
        let appointment = &context.appointment;
        let (from, to) = reschedule_window(Utc::now(), self.clinic_offset, self.window_days);

        let slots = match self
            .availability
            .compute_slots(
                appointment.professional_id,
                appointment.clinic_id,
                from,
                to,
                Some(appointment.id),
            )
            .await
        {
            Ok(slots) => slots,
            Err(e) => {
                error!("Failed to list reschedule slots for {}: {}", appointment.id, e);
                Vec::new()
            }
        };

        Ok(RescheduleOptions {
            appointment_id: appointment.id,
            patient_name: context.patient_name.clone(),
            current_date: appointment.appointment_date,
            current_start_time: appointment.start_time,
            status: appointment.status,
            slots,
        })
    }

    pub async fn confirm(&self, token: &str) -> Result<(ConfirmOutcome, Appointment), AppointmentError> {
        let context = self.resolve(token).await?;
        self.lifecycle
            .confirm(&context.appointment, &Actor::guardian(context.guardian_id))
            .await
    }

    pub async fn reschedule(&self, token: &str, request: RescheduleRequest) -> Result<Appointment, AppointmentError> {
        let context = self.resolve(token).await?;
        let date = parse_date("appointment_date", &request.appointment_date)?;
        let start = parse_time("start_time", &request.start_time)?;

        let (from, to) = reschedule_window(Utc::now(), self.clinic_offset, self.window_days);
        if date < from || date > to {
            return Err(AppointmentError::Validation(format!(
                "appointment_date must be between {} and {}",
                from, to
            )));
        }

        let updated = self
            .lifecycle
            .reschedule(&context.appointment, date, start, &Actor::guardian(context.guardian_id))
            .await?;
        info!("Guardian {} rescheduled appointment {}", context.guardian_id, updated.id);
        Ok(updated)
    }
}

pub fn clinic_tomorrow(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    now.with_timezone(&offset).date_naive() + Duration::days(1)
}

/// `[tomorrow, tomorrow + days]` where tomorrow is taken in clinic-local time.
pub fn reschedule_window(now: DateTime<Utc>, offset: FixedOffset, days: i64) -> (NaiveDate, NaiveDate) {
    let tomorrow = clinic_tomorrow(now, offset);
    (tomorrow, tomorrow + Duration::days(days.max(0)))
}
