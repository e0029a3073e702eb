// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, patch},
    middleware,
};
use tracing::warn;

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::availability::AvailabilityService;
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::recurrence::RecurrenceService;
use crate::services::reminder::{NoopReminderSender, ReminderDispatcher, ReminderSender, WhatsAppSender};
use crate::services::reminder_token::ReminderTokenService;
use crate::services::reservation::{InProcessSlotReservation, SlotReservation};
use crate::services::schedule_config::ScheduleConfigService;
use crate::store::{SchedulingStore, SupabaseSchedulingStore};

/// Services shared by every appointment handler. Built once at startup.
#[derive(Clone)]
pub struct AppointmentCellState {
    pub config: Arc<AppConfig>,
    pub schedule: Arc<ScheduleConfigService>,
    pub availability: Arc<AvailabilityService>,
    pub lifecycle: Arc<AppointmentLifecycleService>,
    pub recurrence: Arc<RecurrenceService>,
    pub reminder_tokens: Arc<ReminderTokenService>,
    pub reminders: Arc<ReminderDispatcher>,
}

impl AppointmentCellState {
    /// Production wiring: Supabase store, in-process slot reservation and the
    /// WhatsApp sender when Twilio credentials are present.
    pub fn new(config: Arc<AppConfig>) -> Self {
        let store: Arc<dyn SchedulingStore> = Arc::new(SupabaseSchedulingStore::new(&config));
        let sender: Arc<dyn ReminderSender> = match WhatsAppSender::from_config(&config) {
            Some(sender) => Arc::new(sender),
            None => {
                warn!("Twilio WhatsApp not configured; reminders will be skipped");
                Arc::new(NoopReminderSender)
            }
        };
        Self::with_parts(config, store, Arc::new(InProcessSlotReservation::new()), sender)
    }

    pub fn with_parts(
        config: Arc<AppConfig>,
        store: Arc<dyn SchedulingStore>,
        reservations: Arc<dyn SlotReservation>,
        sender: Arc<dyn ReminderSender>,
    ) -> Self {
        let reminder_tokens = Arc::new(ReminderTokenService::new(store.clone(), reservations.clone(), &config));
        let reminders = Arc::new(ReminderDispatcher::new(
            store.clone(),
            reminder_tokens.clone(),
            sender,
            &config.app_public_url,
        ));

        Self {
            schedule: Arc::new(ScheduleConfigService::new(store.clone())),
            availability: Arc::new(AvailabilityService::new(store.clone())),
            lifecycle: Arc::new(AppointmentLifecycleService::new(
                store.clone(),
                reservations,
                config.clinic_offset(),
            )),
            recurrence: Arc::new(RecurrenceService::new(store)),
            reminder_tokens,
            reminders,
            config,
        }
    }
}

pub fn appointment_routes(state: AppointmentCellState) -> Router {
    // Staff operations require a signed-in professional or super admin
    let protected_routes = Router::new()
        .route("/", get(handlers::list_appointments).post(handlers::book_appointment))
        .route("/{appointment_id}", patch(handlers::patch_appointment))
        .route("/available-slots", get(handlers::get_available_slots))

        // Clinic weekly template
        .route("/schedule-config", get(handlers::get_schedule_config).put(handlers::replace_schedule_config))
        .route("/schedule-config/copy", post(handlers::copy_schedule_day))

        // Contract series
        .route("/contracts/{contract_id}/generate", post(handlers::generate_contract_appointments))
        .route("/contracts/{contract_id}/promote", post(handlers::promote_contract_appointments))
        .route("/contracts/{contract_id}/cancel", post(handlers::cancel_contract_appointments))
        .route("/contracts/{contract_id}/end", post(handlers::end_contract_appointments))

        .route("/reminders/dispatch", post(handlers::dispatch_reminders))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    // Reminder links are opened by guardians without an account; the token is the credential
    let public_routes = Router::new()
        .route("/remarcar/{token}", get(handlers::get_reschedule_options).patch(handlers::reschedule_by_token))
        .route("/remarcar/{token}/confirm", post(handlers::confirm_by_token));

    Router::new()
        .merge(protected_routes)
        .merge(public_routes)
        .with_state(state)
}
