// libs/appointment-cell/src/models.rs
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_database::supabase::SupabaseError;
use shared_models::error::AppError;

pub const DEFAULT_CONSULTATION_DURATION_MINUTES: i32 = 50;
pub const DEFAULT_INTERVAL_MINUTES: i32 = 10;
pub const MAX_SLOT_RANGE_DAYS: i64 = 62;
pub const DAYS_PER_WEEK: u8 = 7;

// ==============================================================================
// WALL-CLOCK TIME FORMAT
// ==============================================================================

/// Serde helpers for `HH:MM[:SS]` wall-clock values. Written back as `HH:MM`.
pub mod wall_clock {
    use chrono::NaiveTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn parse(raw: &str) -> Option<NaiveTime> {
        let raw = raw.trim();
        NaiveTime::parse_from_str(raw, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
            .ok()
    }

    pub fn format(time: NaiveTime) -> String {
        time.format("%H:%M").to_string()
    }

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(*time))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid time of day: {}", raw)))
    }

    pub mod option {
        use chrono::NaiveTime;
        use serde::{de, Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(time: &Option<NaiveTime>, serializer: S) -> Result<S::Ok, S::Error> {
            match time {
                Some(t) => serializer.serialize_some(&super::format(*t)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<NaiveTime>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                None => Ok(None),
                Some(raw) if raw.trim().is_empty() => Ok(None),
                Some(raw) => super::parse(&raw)
                    .map(Some)
                    .ok_or_else(|| de::Error::custom(format!("invalid time of day: {}", raw))),
            }
        }
    }
}

pub fn parse_time(field: &str, raw: &str) -> Result<NaiveTime, AppointmentError> {
    wall_clock::parse(raw)
        .ok_or_else(|| AppointmentError::Validation(format!("{} must be HH:MM, got {:?}", field, raw)))
}

pub fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, AppointmentError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| AppointmentError::Validation(format!("{} must be YYYY-MM-DD, got {:?}", field, raw)))
}

/// 0 = Sunday .. 6 = Saturday.
pub fn day_of_week(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

pub fn validate_day_of_week(day: i32) -> Result<u8, AppointmentError> {
    if (0..DAYS_PER_WEEK as i32).contains(&day) {
        Ok(day as u8)
    } else {
        Err(AppointmentError::Validation(format!("day_of_week must be between 0 and 6, got {}", day)))
    }
}

pub fn minutes_since_midnight(time: NaiveTime) -> i32 {
    (time.num_seconds_from_midnight() / 60) as i32
}

/// `start + minutes`, or `None` when the result would spill past midnight.
pub fn add_minutes(start: NaiveTime, minutes: i32) -> Option<NaiveTime> {
    let (end, wrapped) = start.overflowing_add_signed(Duration::minutes(minutes as i64));
    if wrapped != 0 {
        None
    } else {
        Some(end)
    }
}

// ==============================================================================
// APPOINTMENT STATUS
// ==============================================================================

/// Appointment states. Two vocabularies coexist: the Portuguese contract
/// workflow (`PRE_AGENDADO`, `AGENDADO`, `CONFIRMADO`, `SERIES_ENDED`) and the
/// English booking one (`CONFIRMED`). `CANCELLED` and `COMPLETED` are shared.
/// `CONFIRMADO` and `CONFIRMED` are deliberately distinct variants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    PreAgendado,
    Agendado,
    Confirmado,
    Confirmed,
    Cancelled,
    SeriesEnded,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusVocabulary {
    Workflow,
    Booking,
    Shared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusMeaning {
    Tentative,
    Scheduled,
    AttendanceConfirmed,
    Cancelled,
    SeriesEnded,
    Completed,
}

pub static STATUS_VOCABULARY: [(AppointmentStatus, &str, StatusVocabulary, StatusMeaning); 7] = [
    (AppointmentStatus::PreAgendado, "PRE_AGENDADO", StatusVocabulary::Workflow, StatusMeaning::Tentative),
    (AppointmentStatus::Agendado, "AGENDADO", StatusVocabulary::Workflow, StatusMeaning::Scheduled),
    (AppointmentStatus::Confirmado, "CONFIRMADO", StatusVocabulary::Workflow, StatusMeaning::AttendanceConfirmed),
    (AppointmentStatus::Confirmed, "CONFIRMED", StatusVocabulary::Booking, StatusMeaning::AttendanceConfirmed),
    (AppointmentStatus::Cancelled, "CANCELLED", StatusVocabulary::Shared, StatusMeaning::Cancelled),
    (AppointmentStatus::SeriesEnded, "SERIES_ENDED", StatusVocabulary::Workflow, StatusMeaning::SeriesEnded),
    (AppointmentStatus::Completed, "COMPLETED", StatusVocabulary::Shared, StatusMeaning::Completed),
];

/// Statuses an administrator may set through a patch.
pub const PATCHABLE_STATUSES: [AppointmentStatus; 6] = [
    AppointmentStatus::PreAgendado,
    AppointmentStatus::Agendado,
    AppointmentStatus::Confirmado,
    AppointmentStatus::Cancelled,
    AppointmentStatus::Completed,
    AppointmentStatus::SeriesEnded,
];

impl AppointmentStatus {
    fn entry(&self) -> &'static (AppointmentStatus, &'static str, StatusVocabulary, StatusMeaning) {
        let index = match self {
            AppointmentStatus::PreAgendado => 0,
            AppointmentStatus::Agendado => 1,
            AppointmentStatus::Confirmado => 2,
            AppointmentStatus::Confirmed => 3,
            AppointmentStatus::Cancelled => 4,
            AppointmentStatus::SeriesEnded => 5,
            AppointmentStatus::Completed => 6,
        };
        &STATUS_VOCABULARY[index]
    }

    pub fn as_str(&self) -> &'static str {
        self.entry().1
    }

    pub fn vocabulary(&self) -> StatusVocabulary {
        self.entry().2
    }

    pub fn meaning(&self) -> StatusMeaning {
        self.entry().3
    }

    /// Cancelled and ended-series appointments free their slot.
    pub fn occupies_slot(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled | AppointmentStatus::SeriesEnded)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Cancelled | AppointmentStatus::SeriesEnded | AppointmentStatus::Completed
        )
    }

    pub fn is_patchable(&self) -> bool {
        PATCHABLE_STATUSES.contains(self)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = AppointmentError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let wanted = raw.trim();
        STATUS_VOCABULARY
            .iter()
            .find(|(_, wire, _, _)| *wire == wanted)
            .map(|(status, _, _, _)| *status)
            .ok_or_else(|| AppointmentError::Validation(format!("unknown status {:?}", raw)))
    }
}

// ==============================================================================
// SCHEDULE CONFIGURATION
// ==============================================================================

fn default_duration() -> i32 {
    DEFAULT_CONSULTATION_DURATION_MINUTES
}

fn default_interval() -> i32 {
    DEFAULT_INTERVAL_MINUTES
}

/// Per-clinic, per-weekday working template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleConfig {
    pub clinic_id: Uuid,
    pub day_of_week: u8,
    pub enabled: bool,
    #[serde(default, with = "wall_clock::option")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, with = "wall_clock::option")]
    pub end_time: Option<NaiveTime>,
    #[serde(default = "default_duration")]
    pub consultation_duration_minutes: i32,
    #[serde(default = "default_interval")]
    pub interval_minutes: i32,
    #[serde(default, with = "wall_clock::option")]
    pub lunch_start: Option<NaiveTime>,
    #[serde(default, with = "wall_clock::option")]
    pub lunch_end: Option<NaiveTime>,
}

impl ScheduleConfig {
    /// Template used when copying from a day that was never configured.
    pub fn default_for(clinic_id: Uuid, day_of_week: u8) -> Self {
        Self {
            clinic_id,
            day_of_week,
            enabled: true,
            start_time: None,
            end_time: None,
            consultation_duration_minutes: DEFAULT_CONSULTATION_DURATION_MINUTES,
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
            lunch_start: None,
            lunch_end: None,
        }
    }

    pub fn effective_duration(&self) -> i32 {
        if self.consultation_duration_minutes > 0 {
            self.consultation_duration_minutes
        } else {
            DEFAULT_CONSULTATION_DURATION_MINUTES
        }
    }

    pub fn effective_interval(&self) -> i32 {
        if self.interval_minutes > 0 {
            self.interval_minutes
        } else {
            DEFAULT_INTERVAL_MINUTES
        }
    }

    /// Working hours, only when the day is bookable.
    pub fn working_hours(&self) -> Option<(NaiveTime, NaiveTime)> {
        match (self.enabled, self.start_time, self.end_time) {
            (true, Some(start), Some(end)) => Some((start, end)),
            _ => None,
        }
    }

    pub fn lunch_window(&self) -> Option<(NaiveTime, NaiveTime)> {
        self.lunch_start.zip(self.lunch_end)
    }

    pub fn validate(&self) -> Result<(), AppointmentError> {
        validate_day_of_week(self.day_of_week as i32)?;

        if self.consultation_duration_minutes <= 0 {
            return Err(AppointmentError::Validation(
                "consultation_duration_minutes must be positive".to_string(),
            ));
        }
        if self.interval_minutes < 0 {
            return Err(AppointmentError::Validation(
                "interval_minutes must not be negative".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if self.enabled && start >= end {
                return Err(AppointmentError::Validation(format!(
                    "start_time {} must be before end_time {}",
                    wall_clock::format(start),
                    wall_clock::format(end)
                )));
            }
        }
        match (self.lunch_start, self.lunch_end) {
            (Some(start), Some(end)) if start >= end => Err(AppointmentError::Validation(format!(
                "lunch_start {} must be before lunch_end {}",
                wall_clock::format(start),
                wall_clock::format(end)
            ))),
            (Some(_), None) | (None, Some(_)) => Err(AppointmentError::Validation(
                "lunch_start and lunch_end must be set together".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// The clinic's week, keyed by day of week. Built fresh for each computation.
#[derive(Debug, Clone, Default)]
pub struct WeekSchedule {
    days: [Option<ScheduleConfig>; 7],
}

impl WeekSchedule {
    pub fn from_configs(configs: impl IntoIterator<Item = ScheduleConfig>) -> Self {
        let mut week = Self::default();
        for config in configs {
            let day = config.day_of_week as usize;
            if day < week.days.len() {
                week.days[day] = Some(config);
            }
        }
        week
    }

    pub fn day(&self, day_of_week: u8) -> Option<&ScheduleConfig> {
        self.days.get(day_of_week as usize).and_then(Option::as_ref)
    }

    pub fn for_date(&self, date: NaiveDate) -> Option<&ScheduleConfig> {
        self.day(day_of_week(date))
    }

    /// Days that are enabled with both working hours set.
    pub fn configured_days(&self) -> Vec<u8> {
        self.days
            .iter()
            .flatten()
            .filter(|config| config.working_hours().is_some())
            .map(|config| config.day_of_week)
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct ScheduleDayInput {
    pub day_of_week: i32,
    pub enabled: Option<bool>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub consultation_duration_minutes: Option<i32>,
    pub interval_minutes: Option<i32>,
    pub lunch_start: Option<String>,
    pub lunch_end: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReplaceScheduleRequest {
    pub days: Vec<ScheduleDayInput>,
}

#[derive(Debug, Deserialize)]
pub struct CopyDayRequest {
    pub from_day: i32,
    pub to_day: i32,
}

#[derive(Debug, Serialize)]
pub struct WeekScheduleResponse {
    pub days: Vec<ScheduleConfig>,
}

// ==============================================================================
// APPOINTMENTS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub professional_id: Uuid,
    pub patient_id: Uuid,
    #[serde(default)]
    pub contract_id: Option<Uuid>,
    pub appointment_date: NaiveDate,
    #[serde(with = "wall_clock")]
    pub start_time: NaiveTime,
    #[serde(with = "wall_clock")]
    pub end_time: NaiveTime,
    pub status: AppointmentStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Appointment {
    /// Duration fixed at creation; falls back to the default for malformed rows.
    pub fn duration_minutes(&self) -> i32 {
        let minutes = minutes_since_midnight(self.end_time) - minutes_since_midnight(self.start_time);
        if minutes > 0 {
            minutes
        } else {
            DEFAULT_CONSULTATION_DURATION_MINUTES
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewAppointment {
    pub clinic_id: Uuid,
    pub professional_id: Uuid,
    pub patient_id: Uuid,
    pub contract_id: Option<Uuid>,
    pub appointment_date: NaiveDate,
    #[serde(with = "wall_clock")]
    pub start_time: NaiveTime,
    #[serde(with = "wall_clock")]
    pub end_time: NaiveTime,
    pub status: AppointmentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl NewAppointment {
    pub fn into_appointment(self, id: Uuid) -> Appointment {
        Appointment {
            id,
            clinic_id: self.clinic_id,
            professional_id: self.professional_id,
            patient_id: self.patient_id,
            contract_id: self.contract_id,
            appointment_date: self.appointment_date,
            start_time: self.start_time,
            end_time: self.end_time,
            status: self.status,
            notes: self.notes,
        }
    }
}

/// Partial update. Unset fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct AppointmentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appointment_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none", with = "wall_clock::option")]
    pub start_time: Option<NaiveTime>,
    #[serde(skip_serializing_if = "Option::is_none", with = "wall_clock::option")]
    pub end_time: Option<NaiveTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AppointmentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl AppointmentPatch {
    pub fn status(status: AppointmentStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.appointment_date.is_none()
            && self.start_time.is_none()
            && self.end_time.is_none()
            && self.status.is_none()
            && self.notes.is_none()
    }

    pub fn apply(&self, appointment: &mut Appointment) {
        if let Some(date) = self.appointment_date {
            appointment.appointment_date = date;
        }
        if let Some(start) = self.start_time {
            appointment.start_time = start;
        }
        if let Some(end) = self.end_time {
            appointment.end_time = end;
        }
        if let Some(status) = self.status {
            appointment.status = status;
        }
        if let Some(notes) = &self.notes {
            appointment.notes = Some(notes.clone());
        }
    }
}

/// Which statuses a contract-wide cascade touches.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusSelector {
    Only(Vec<AppointmentStatus>),
    Except(Vec<AppointmentStatus>),
}

impl StatusSelector {
    pub fn matches(&self, status: AppointmentStatus) -> bool {
        match self {
            StatusSelector::Only(statuses) => statuses.contains(&status),
            StatusSelector::Except(statuses) => !statuses.contains(&status),
        }
    }
}

/// Batch status transition over every appointment of one contract.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusCascade {
    pub contract_id: Uuid,
    pub selector: StatusSelector,
    pub target: AppointmentStatus,
    /// Only appointments strictly after this date.
    pub after_date: Option<NaiveDate>,
}

impl StatusCascade {
    pub fn cancel_contract(contract_id: Uuid) -> Self {
        Self {
            contract_id,
            selector: StatusSelector::Except(vec![AppointmentStatus::Cancelled, AppointmentStatus::Completed]),
            target: AppointmentStatus::Cancelled,
            after_date: None,
        }
    }

    pub fn end_series(contract_id: Uuid, end_date: NaiveDate) -> Self {
        Self {
            contract_id,
            selector: StatusSelector::Except(vec![
                AppointmentStatus::Cancelled,
                AppointmentStatus::SeriesEnded,
                AppointmentStatus::Completed,
            ]),
            target: AppointmentStatus::SeriesEnded,
            after_date: Some(end_date),
        }
    }

    pub fn promote_contract(contract_id: Uuid) -> Self {
        Self {
            contract_id,
            selector: StatusSelector::Only(vec![AppointmentStatus::PreAgendado]),
            target: AppointmentStatus::Agendado,
            after_date: None,
        }
    }

    pub fn matches(&self, appointment: &Appointment) -> bool {
        appointment.contract_id == Some(self.contract_id)
            && self.selector.matches(appointment.status)
            && self.after_date.map_or(true, |after| appointment.appointment_date > after)
    }
}

#[derive(Debug, Deserialize)]
pub struct BookAppointmentRequest {
    pub patient_id: Uuid,
    /// Super admins may book on behalf of a professional.
    pub professional_id: Option<Uuid>,
    pub contract_id: Option<Uuid>,
    pub appointment_date: String,
    pub start_time: String,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PatchAppointmentRequest {
    pub appointment_date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub status: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AvailableSlotsQuery {
    pub from: String,
    pub to: String,
    /// Super admins may look at another professional's calendar.
    pub professional_id: Option<Uuid>,
}

/// A bookable start, computed on demand and never persisted.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Slot {
    pub date: NaiveDate,
    #[serde(with = "wall_clock")]
    pub start_time: NaiveTime,
}

#[derive(Debug, Deserialize)]
pub struct AgendaQuery {
    pub from: String,
    pub to: String,
}

/// Calendar row: an appointment with its patient's display name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgendaEntry {
    #[serde(flatten)]
    pub appointment: Appointment,
    #[serde(default)]
    pub patient_name: String,
}

#[derive(Debug, Serialize)]
pub struct AgendaResponse {
    pub appointments: Vec<AgendaEntry>,
}

#[derive(Debug, Serialize)]
pub struct AvailableSlotsResponse {
    pub slots: Vec<Slot>,
    pub configured_days: Vec<u8>,
}

// ==============================================================================
// CONTRACTS & RECURRENCE
// ==============================================================================

/// Contract lifecycle as stored by the clinic registry. Only signed contracts
/// may grow or end a series.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractStatus {
    Pending,
    Signed,
    Ended,
    Cancelled,
}

impl fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let wire = match self {
            ContractStatus::Pending => "PENDING",
            ContractStatus::Signed => "SIGNED",
            ContractStatus::Ended => "ENDED",
            ContractStatus::Cancelled => "CANCELLED",
        };
        f.write_str(wire)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Contract {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub professional_id: Uuid,
    pub patient_id: Uuid,
    pub status: ContractStatus,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub num_appointments: Option<i32>,
}

impl Contract {
    pub fn ensure_signed(&self, action: &'static str) -> Result<(), AppointmentError> {
        if self.status == ContractStatus::Signed {
            Ok(())
        } else {
            Err(AppointmentError::ContractNotSigned {
                status: self.status,
                action,
            })
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecurrenceRule {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub day_of_week: u8,
    #[serde(with = "wall_clock")]
    pub slot_time: NaiveTime,
}

/// Input of a rule expansion over `[start_date, end_date]`.
#[derive(Debug, Clone)]
pub struct RecurrencePlan {
    pub contract_id: Uuid,
    pub clinic_id: Uuid,
    pub professional_id: Uuid,
    pub patient_id: Uuid,
    pub rules: Vec<RecurrenceRule>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub duration_minutes: i32,
    pub max_appointments: Option<u32>,
    pub initial_status: AppointmentStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateAppointmentsRequest {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub duration_minutes: Option<i32>,
    pub max_appointments: Option<u32>,
    pub initial_status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GenerationSummary {
    pub contract_id: Uuid,
    pub created: usize,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct EndContractRequest {
    pub end_date: String,
}

#[derive(Debug, Serialize)]
pub struct CascadeResponse {
    pub contract_id: Uuid,
    pub status: AppointmentStatus,
    pub affected_ids: Vec<Uuid>,
}

// ==============================================================================
// REMINDER TOKENS
// ==============================================================================

/// Guardian-bound credential for the public confirm/reschedule flow.
/// Carries no used-at marker: it stays replayable until `expires_at`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReminderToken {
    pub appointment_id: Uuid,
    pub guardian_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReminderTokenContext {
    pub appointment: Appointment,
    pub guardian_id: Uuid,
    pub patient_name: String,
}

#[derive(Debug, Serialize)]
pub struct RescheduleOptions {
    pub appointment_id: Uuid,
    pub patient_name: String,
    pub current_date: NaiveDate,
    #[serde(with = "wall_clock")]
    pub current_start_time: NaiveTime,
    pub status: AppointmentStatus,
    pub slots: Vec<Slot>,
}

#[derive(Debug, Deserialize)]
pub struct RescheduleRequest {
    pub appointment_date: String,
    pub start_time: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Confirmed,
    AlreadyConfirmed,
}

/// One (appointment, guardian) pair due for a reminder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReminderTarget {
    pub appointment_id: Uuid,
    pub professional_id: Uuid,
    pub patient_id: Uuid,
    #[serde(default)]
    pub patient_name: String,
    pub guardian_id: Uuid,
    pub guardian_phone: String,
    pub appointment_date: NaiveDate,
    #[serde(with = "wall_clock")]
    pub start_time: NaiveTime,
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReminderMessage {
    pub phone: String,
    pub patient_name: String,
    /// `dd/mm/yyyy`
    pub date_label: String,
    /// `HH:MM`
    pub time_label: String,
    pub reschedule_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DispatchRemindersRequest {
    pub date: Option<String>,
    pub professional_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct DispatchSummary {
    pub sent: usize,
    pub skipped: usize,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Error, Debug)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Contract not found")]
    ContractNotFound,

    #[error("Reminder link is invalid or expired")]
    TokenNotFound,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Cannot {action} an appointment in status {from}")]
    InvalidStatusTransition {
        from: AppointmentStatus,
        action: &'static str,
    },

    #[error("Cannot {action} a contract in status {status}; it must be SIGNED")]
    ContractNotSigned {
        status: ContractStatus,
        action: &'static str,
    },

    #[error("Requested slot is no longer available")]
    SlotUnavailable,

    #[error("Appointment conflicts with an existing booking: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("External service error: {0}")]
    ExternalService(String),
}

impl From<SupabaseError> for AppointmentError {
    fn from(err: SupabaseError) -> Self {
        match err {
            SupabaseError::Conflict(msg) => AppointmentError::Conflict(msg),
            other => AppointmentError::Database(other.to_string()),
        }
    }
}

impl From<AppointmentError> for AppError {
    fn from(err: AppointmentError) -> Self {
        match err {
            AppointmentError::NotFound
            | AppointmentError::ContractNotFound
            | AppointmentError::TokenNotFound => AppError::NotFound(err.to_string()),
            AppointmentError::Validation(msg) => AppError::ValidationError(msg),
            AppointmentError::InvalidStatusTransition { .. }
            | AppointmentError::ContractNotSigned { .. }
            | AppointmentError::SlotUnavailable
            | AppointmentError::Conflict(_) => AppError::Conflict(err.to_string()),
            AppointmentError::Forbidden(msg) => AppError::Forbidden(msg),
            AppointmentError::Database(msg) => AppError::Database(msg),
            AppointmentError::ExternalService(msg) => AppError::ExternalService(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn time(raw: &str) -> NaiveTime {
        wall_clock::parse(raw).unwrap()
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(serde_json::to_value(AppointmentStatus::PreAgendado).unwrap(), json!("PRE_AGENDADO"));
        assert_eq!(serde_json::to_value(AppointmentStatus::SeriesEnded).unwrap(), json!("SERIES_ENDED"));
        for (status, wire, _, _) in STATUS_VOCABULARY.iter() {
            assert_eq!(status.as_str(), *wire);
            assert_eq!(wire.parse::<AppointmentStatus>().unwrap(), *status);
        }
    }

    #[test]
    fn test_confirmed_spellings_stay_distinct() {
        let workflow = AppointmentStatus::Confirmado;
        let booking = AppointmentStatus::Confirmed;
        assert_ne!(workflow, booking);
        assert_eq!(workflow.meaning(), booking.meaning());
        assert_eq!(workflow.vocabulary(), StatusVocabulary::Workflow);
        assert_eq!(booking.vocabulary(), StatusVocabulary::Booking);
    }

    #[test]
    fn test_patch_allow_list_excludes_confirmed() {
        assert!(!AppointmentStatus::Confirmed.is_patchable());
        assert!(AppointmentStatus::SeriesEnded.is_patchable());
        assert_matches!("confirmed".parse::<AppointmentStatus>(), Err(AppointmentError::Validation(_)));
    }

    #[test]
    fn test_wall_clock_accepts_seconds() {
        assert_eq!(time("09:00:00"), time("09:00"));
        assert!(wall_clock::parse("9h").is_none());
        assert!(wall_clock::parse("25:00").is_none());
    }

    #[test]
    fn test_schedule_config_decodes_postgrest_row() {
        let config: ScheduleConfig = serde_json::from_value(json!({
            "clinic_id": Uuid::new_v4(),
            "day_of_week": 2,
            "enabled": true,
            "start_time": "09:00:00",
            "end_time": "18:00:00",
            "consultation_duration_minutes": 50,
            "interval_minutes": 10,
            "lunch_start": null,
            "lunch_end": null
        }))
        .unwrap();

        assert_eq!(config.working_hours(), Some((time("09:00"), time("18:00"))));
        assert_eq!(config.lunch_window(), None);
    }

    #[test]
    fn test_schedule_config_validation() {
        let clinic = Uuid::new_v4();
        let mut config = ScheduleConfig::default_for(clinic, 1);
        config.start_time = Some(time("12:00"));
        config.end_time = Some(time("09:00"));
        assert_matches!(config.validate(), Err(AppointmentError::Validation(_)));

        config.end_time = Some(time("18:00"));
        config.lunch_start = Some(time("12:00"));
        assert_matches!(config.validate(), Err(AppointmentError::Validation(_)));

        config.lunch_end = Some(time("13:00"));
        assert!(config.validate().is_ok());

        config.day_of_week = 7;
        assert_matches!(config.validate(), Err(AppointmentError::Validation(_)));
    }

    #[test]
    fn test_stored_zero_interval_uses_default() {
        let mut config = ScheduleConfig::default_for(Uuid::new_v4(), 3);
        config.interval_minutes = 0;
        config.consultation_duration_minutes = 0;
        assert_eq!(config.effective_interval(), DEFAULT_INTERVAL_MINUTES);
        assert_eq!(config.effective_duration(), DEFAULT_CONSULTATION_DURATION_MINUTES);
    }

    #[test]
    fn test_week_schedule_configured_days() {
        let clinic = Uuid::new_v4();
        let mut tuesday = ScheduleConfig::default_for(clinic, 2);
        tuesday.start_time = Some(time("09:00"));
        tuesday.end_time = Some(time("12:00"));
        let monday_without_hours = ScheduleConfig::default_for(clinic, 1);

        let week = WeekSchedule::from_configs(vec![tuesday, monday_without_hours]);

        assert_eq!(week.configured_days(), vec![2]);
        let a_tuesday = NaiveDate::from_ymd_opt(2025, 3, 4).unwrap();
        assert_eq!(week.for_date(a_tuesday).map(|c| c.day_of_week), Some(2));
    }

    #[test]
    fn test_add_minutes_refuses_midnight_spill() {
        assert_eq!(add_minutes(time("23:30"), 50), None);
        assert_eq!(add_minutes(time("09:00"), 50), Some(time("09:50")));
    }

    #[test]
    fn test_end_series_cascade_matches_strictly_after() {
        let contract = Uuid::new_v4();
        let cascade = StatusCascade::end_series(contract, NaiveDate::from_ymd_opt(2025, 4, 8).unwrap());
        let mut appointment = Appointment {
            id: Uuid::new_v4(),
            clinic_id: Uuid::new_v4(),
            professional_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            contract_id: Some(contract),
            appointment_date: NaiveDate::from_ymd_opt(2025, 4, 8).unwrap(),
            start_time: time("09:00"),
            end_time: time("09:50"),
            status: AppointmentStatus::Agendado,
            notes: None,
        };
        assert!(!cascade.matches(&appointment));

        appointment.appointment_date = NaiveDate::from_ymd_opt(2025, 4, 15).unwrap();
        assert!(cascade.matches(&appointment));

        appointment.status = AppointmentStatus::Completed;
        assert!(!cascade.matches(&appointment));
    }

    #[test]
    fn test_error_mapping() {
        assert_matches!(AppError::from(AppointmentError::TokenNotFound), AppError::NotFound(_));
        assert_matches!(
            AppError::from(AppointmentError::InvalidStatusTransition {
                from: AppointmentStatus::PreAgendado,
                action: "confirm",
            }),
            AppError::Conflict(_)
        );
        assert_matches!(AppError::from(AppointmentError::Validation("x".into())), AppError::ValidationError(_));
        assert_matches!(
            AppError::from(AppointmentError::ContractNotSigned {
                status: ContractStatus::Pending,
                action: "end",
            }),
            AppError::Conflict(msg) if msg.contains("PENDING")
        );
    }

    #[test]
    fn test_contract_status_wire_names() {
        let contract: Contract = serde_json::from_value(json!({
            "id": Uuid::new_v4(),
            "clinic_id": Uuid::new_v4(),
            "professional_id": Uuid::new_v4(),
            "patient_id": Uuid::new_v4(),
            "status": "SIGNED",
            "start_date": "2025-03-03",
            "end_date": null,
            "num_appointments": 4
        }))
        .unwrap();
        assert_eq!(contract.status, ContractStatus::Signed);
        assert!(contract.ensure_signed("generate").is_ok());

        let ended = Contract { status: ContractStatus::Ended, ..contract };
        assert_matches!(
            ended.ensure_signed("generate"),
            Err(AppointmentError::ContractNotSigned { status: ContractStatus::Ended, action: "generate" })
        );
    }

    #[test]
    fn test_agenda_entry_flattens_appointment() {
        let row = json!({
            "id": Uuid::new_v4(),
            "clinic_id": Uuid::new_v4(),
            "professional_id": Uuid::new_v4(),
            "patient_id": Uuid::new_v4(),
            "contract_id": null,
            "appointment_date": "2025-03-04",
            "start_time": "09:00:00",
            "end_time": "09:50:00",
            "status": "AGENDADO",
            "notes": null,
            "patient_name": "Ana Souza"
        });
        let entry: AgendaEntry = serde_json::from_value(row).unwrap();
        assert_eq!(entry.patient_name, "Ana Souza");
        assert_eq!(entry.appointment.start_time, time("09:00"));

        let out = serde_json::to_value(&entry).unwrap();
        assert_eq!(out["start_time"], "09:00");
        assert_eq!(out["patient_name"], "Ana Souza");
    }
}
