// libs/appointment-cell/src/store/mod.rs
//! Persistence seam for the scheduling engine.
//!
//! Services only talk to [`SchedulingStore`]. The Supabase implementation is
//! used in production; [`memory::InMemorySchedulingStore`] backs unit and
//! integration tests.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::models::{
    AgendaEntry, Appointment, AppointmentError, AppointmentPatch, Contract, NewAppointment, RecurrenceRule,
    ReminderTarget, ReminderToken, ReminderTokenContext, ScheduleConfig, StatusCascade,
};

pub mod memory;
pub mod supabase;

pub use memory::InMemorySchedulingStore;
pub use supabase::SupabaseSchedulingStore;

pub type StoreResult<T> = Result<T, AppointmentError>;

#[async_trait]
pub trait SchedulingStore: Send + Sync {
    // ------------------------------------------------------------------
    // Schedule configuration
    // ------------------------------------------------------------------

    /// All configured weekdays of a clinic, ordered by day of week.
    async fn list_schedule_config(&self, clinic_id: Uuid) -> StoreResult<Vec<ScheduleConfig>>;

    async fn get_schedule_config(&self, clinic_id: Uuid, day_of_week: u8) -> StoreResult<Option<ScheduleConfig>>;

    /// Insert or overwrite the row keyed by (clinic, day of week).
    async fn upsert_schedule_config(&self, config: ScheduleConfig) -> StoreResult<ScheduleConfig>;

    /// Replace the clinic's whole week: listed days are upserted, every other
    /// day is removed.
    async fn replace_schedule_config(
        &self,
        clinic_id: Uuid,
        configs: Vec<ScheduleConfig>,
    ) -> StoreResult<Vec<ScheduleConfig>>;

    // ------------------------------------------------------------------
    // Appointments
    // ------------------------------------------------------------------

    /// Appointments of a professional in `[from, to]` that still occupy their
    /// slot (anything but `CANCELLED` and `SERIES_ENDED`).
    async fn list_active_appointments(
        &self,
        professional_id: Uuid,
        clinic_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
        exclude_appointment_id: Option<Uuid>,
    ) -> StoreResult<Vec<Appointment>>;

    /// Clinic calendar in `[from, to]` with patient names, ordered by date
    /// then start time. Cancelled and ended-series rows are left out.
    async fn list_appointments(&self, clinic_id: Uuid, from: NaiveDate, to: NaiveDate) -> StoreResult<Vec<AgendaEntry>>;

    async fn get_appointment(&self, clinic_id: Uuid, appointment_id: Uuid) -> StoreResult<Option<Appointment>>;

    async fn create_appointment(&self, appointment: NewAppointment) -> StoreResult<Appointment>;

    /// Atomic batch insert: either every appointment is stored or none is.
    async fn create_appointments(&self, appointments: Vec<NewAppointment>) -> StoreResult<Vec<Appointment>>;

    /// Returns `None` when no appointment with that id exists in the clinic.
    async fn update_appointment(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
        patch: AppointmentPatch,
    ) -> StoreResult<Option<Appointment>>;

    /// Applies a contract-wide status transition and returns the ids it touched.
    async fn apply_status_cascade(&self, cascade: &StatusCascade) -> StoreResult<Vec<Uuid>>;

    // ------------------------------------------------------------------
    // Contracts
    // ------------------------------------------------------------------

    async fn get_contract(&self, contract_id: Uuid) -> StoreResult<Option<Contract>>;

    /// Sets `end_date` and moves a `SIGNED` contract to `ENDED`. Returns
    /// `false` when the contract was not signed any more.
    async fn end_contract(&self, contract_id: Uuid, end_date: NaiveDate) -> StoreResult<bool>;

    /// Weekly rules of a contract ordered by day of week, then time.
    async fn list_contract_schedule_rules(&self, contract_id: Uuid) -> StoreResult<Vec<RecurrenceRule>>;

    // ------------------------------------------------------------------
    // Reminder tokens
    // ------------------------------------------------------------------

    async fn create_reminder_token(&self, token: ReminderToken) -> StoreResult<ReminderToken>;

    /// Resolves a token that has not expired at `now`.
    async fn resolve_reminder_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<ReminderTokenContext>>;

    /// `AGENDADO`/`CONFIRMADO` appointments on `date` joined with every
    /// guardian that has a phone number.
    async fn list_reminder_targets(
        &self,
        date: NaiveDate,
        professional_id: Option<Uuid>,
    ) -> StoreResult<Vec<ReminderTarget>>;
}
