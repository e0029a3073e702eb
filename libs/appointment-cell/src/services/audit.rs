// libs/appointment-cell/src/services/audit.rs
use tracing::info;
use uuid::Uuid;

/// Actions written to the `audit` tracing target. Persisting them is left to
/// whatever subscriber ships that target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    AppointmentCreated,
    AppointmentUpdated,
    AttendanceConfirmed,
    AppointmentRescheduled,
    AppointmentsCreatedBatch,
    ContractCancelled,
    ContractEnded,
    SeriesEndedBatch,
    ContractAppointmentsPromoted,
    ReminderSent,
    ScheduleConfigUpdated,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::AppointmentCreated => "APPOINTMENT_CREATED",
            AuditAction::AppointmentUpdated => "APPOINTMENT_UPDATED",
            AuditAction::AttendanceConfirmed => "APPOINTMENT_ATTENDANCE_CONFIRMED",
            AuditAction::AppointmentRescheduled => "APPOINTMENT_REMARCARED",
            AuditAction::AppointmentsCreatedBatch => "APPOINTMENTS_CREATED_BATCH",
            AuditAction::ContractCancelled => "CONTRACT_CANCELLED",
            AuditAction::ContractEnded => "CONTRACT_ENDED",
            AuditAction::SeriesEndedBatch => "APPOINTMENTS_SERIES_ENDED_BATCH",
            AuditAction::ContractAppointmentsPromoted => "CONTRACT_APPOINTMENTS_PROMOTED",
            AuditAction::ReminderSent => "APPOINTMENT_REMINDER_SENT",
            AuditAction::ScheduleConfigUpdated => "SCHEDULE_CONFIG_UPDATED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    Professional,
    SuperAdmin,
    LegalGuardian,
    System,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::Professional => "PROFESSIONAL",
            ActorType::SuperAdmin => "SUPER_ADMIN",
            ActorType::LegalGuardian => "LEGAL_GUARDIAN",
            ActorType::System => "SYSTEM",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Actor {
    pub actor_type: ActorType,
    pub actor_id: Option<Uuid>,
}

impl Actor {
    pub fn system() -> Self {
        Self {
            actor_type: ActorType::System,
            actor_id: None,
        }
    }

    pub fn professional(professional_id: Uuid) -> Self {
        Self {
            actor_type: ActorType::Professional,
            actor_id: Some(professional_id),
        }
    }

    pub fn super_admin(user_id: Uuid) -> Self {
        Self {
            actor_type: ActorType::SuperAdmin,
            actor_id: Some(user_id),
        }
    }

    pub fn guardian(guardian_id: Uuid) -> Self {
        Self {
            actor_type: ActorType::LegalGuardian,
            actor_id: Some(guardian_id),
        }
    }
}

pub fn record(action: AuditAction, actor: &Actor, resource_id: Uuid, affected: &[Uuid]) {
    info!(
        target: "audit",
        action = action.as_str(),
        actor_type = actor.actor_type.as_str(),
        actor_id = ?actor.actor_id,
        resource_id = %resource_id,
        affected_count = affected.len(),
        affected_ids = ?affected,
        "AUDIT: {}", action.as_str()
    );
}
