// libs/appointment-cell/src/services/recurrence.rs
use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::models::{
    add_minutes, day_of_week, parse_date, AppointmentError, AppointmentStatus,
    GenerateAppointmentsRequest, GenerationSummary, NewAppointment, RecurrencePlan,
    DEFAULT_CONSULTATION_DURATION_MINUTES,
};
use crate::services::audit::{self, Actor, AuditAction};
use crate::store::SchedulingStore;

/// Horizon used when a contract has no end date.
pub const DEFAULT_HORIZON_DAYS: i64 = 365;

/// Status of appointments generated without an explicit initial status.
pub const DEFAULT_GENERATED_STATUS: AppointmentStatus = AppointmentStatus::Confirmed;

pub struct RecurrenceService {
    store: Arc<dyn SchedulingStore>,
}

impl RecurrenceService {
    pub fn new(store: Arc<dyn SchedulingStore>) -> Self {
        Self { store }
    }

    /// Expands the plan and stores every appointment in one atomic batch.
    /// Returns how many were created.
    #[instrument(skip(self, plan), fields(contract_id = %plan.contract_id))]
    pub async fn generate_from_rules(&self, plan: RecurrencePlan) -> Result<usize, AppointmentError> {
        let appointments = expand_rules(&plan)?;
        if appointments.is_empty() {
            debug!("Contract {} produced no appointments", plan.contract_id);
            return Ok(0);
        }

        let created = self.store.create_appointments(appointments).await?;
        let ids: Vec<Uuid> = created.iter().map(|a| a.id).collect();
        info!("Generated {} appointments for contract {}", ids.len(), plan.contract_id);
        audit::record(AuditAction::AppointmentsCreatedBatch, &Actor::system(), plan.contract_id, &ids);
        Ok(ids.len())
    }

    /// Loads a signed contract and its weekly rules, derives the horizon and
    /// materializes the series.
    pub async fn generate_for_contract(
        &self,
        clinic_scope: Option<Uuid>,
        contract_id: Uuid,
        request: GenerateAppointmentsRequest,
    ) -> Result<GenerationSummary, AppointmentError> {
        let contract = self
            .store
            .get_contract(contract_id)
            .await?
            .filter(|c| clinic_scope.map_or(true, |clinic| clinic == c.clinic_id))
            .ok_or(AppointmentError::ContractNotFound)?;
        contract.ensure_signed("generate")?;

        let rules = self.store.list_contract_schedule_rules(contract_id).await?;

        let initial_status = match request.initial_status.as_deref() {
            Some(raw) => raw.parse::<AppointmentStatus>()?,
            None => DEFAULT_GENERATED_STATUS,
        };
        if initial_status.is_terminal() {
            return Err(AppointmentError::Validation(format!(
                "appointments cannot be generated as {}",
                initial_status
            )));
        }

        let start_date = match request.start_date.as_deref() {
            Some(raw) => parse_date("start_date", raw)?,
            None => contract.start_date.unwrap_or_else(|| Utc::now().date_naive()),
        };
        let requested_end = match request.end_date.as_deref() {
            Some(raw) => Some(parse_date("end_date", raw)?),
            None => contract.end_date,
        };
        let max_appointments = request
            .max_appointments
            .or_else(|| contract.num_appointments.filter(|n| *n > 0).map(|n| n as u32))
            .filter(|n| *n > 0);
        let end_date = horizon_end(start_date, requested_end, max_appointments, rules.len());

        if end_date < start_date {
            return Err(AppointmentError::Validation(format!(
                "end_date {} is before start_date {}",
                end_date, start_date
            )));
        }

        let plan = RecurrencePlan {
            contract_id,
            clinic_id: contract.clinic_id,
            professional_id: contract.professional_id,
            patient_id: contract.patient_id,
            rules,
            start_date,
            end_date,
            duration_minutes: request.duration_minutes.unwrap_or(DEFAULT_CONSULTATION_DURATION_MINUTES),
            max_appointments,
            initial_status,
        };

        let created = self.generate_from_rules(plan).await?;
        Ok(GenerationSummary {
            contract_id,
            created,
            start_date,
            end_date,
        })
    }
}

/// End of the generation window: the explicit end, or one year from start.
/// Extended when it is too short to fit a requested appointment count.
pub fn horizon_end(
    start: NaiveDate,
    requested_end: Option<NaiveDate>,
    max_appointments: Option<u32>,
    rule_count: usize,
) -> NaiveDate {
    let end = requested_end.unwrap_or(start + Duration::days(DEFAULT_HORIZON_DAYS));
    match max_appointments {
        Some(max) if rule_count > 0 => {
            let weeks = (max as i64 + rule_count as i64 - 1) / rule_count as i64;
            let needed = start + Duration::weeks(weeks) - Duration::days(1);
            end.max(needed)
        }
        _ => end,
    }
}

/// Walks `[start_date, end_date]` day by day and emits one appointment per
/// matching rule, in (date, rule order) order, stopping at `max_appointments`.
pub fn expand_rules(plan: &RecurrencePlan) -> Result<Vec<NewAppointment>, AppointmentError> {
    let duration = if plan.duration_minutes > 0 {
        plan.duration_minutes
    } else {
        DEFAULT_CONSULTATION_DURATION_MINUTES
    };
    let cap = plan.max_appointments.filter(|m| *m > 0).map(|m| m as usize);

    let mut rules = plan.rules.clone();
    rules.sort_by_key(|r| (r.day_of_week, r.slot_time));
    for rule in &rules {
        if rule.day_of_week > 6 {
            return Err(AppointmentError::Validation(format!(
                "rule {} has invalid day_of_week {}",
                rule.id, rule.day_of_week
            )));
        }
    }

    let mut appointments = Vec::new();
    if rules.is_empty() {
        warn!("Contract {} has no schedule rules", plan.contract_id);
        return Ok(appointments);
    }

    let mut date = plan.start_date;
    'days: while date <= plan.end_date {
        let weekday = day_of_week(date);
        for rule in rules.iter().filter(|r| r.day_of_week == weekday) {
            if cap.map_or(false, |cap| appointments.len() >= cap) {
                break 'days;
            }
            let end_time = add_minutes(rule.slot_time, duration).ok_or_else(|| {
                AppointmentError::Validation(format!(
                    "a {} minute appointment at {} would end after midnight",
                    duration, rule.slot_time
                ))
            })?;
            appointments.push(NewAppointment {
                clinic_id: plan.clinic_id,
                professional_id: plan.professional_id,
                patient_id: plan.patient_id,
                contract_id: Some(plan.contract_id),
                appointment_date: date,
                start_time: rule.slot_time,
                end_time,
                status: plan.initial_status,
                notes: None,
            });
        }
        date += Duration::days(1);
    }
    Ok(appointments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{wall_clock, RecurrenceRule};

    fn d(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
    }

    fn rule(contract_id: Uuid, day: u8, time: &str) -> RecurrenceRule {
        RecurrenceRule {
            id: Uuid::new_v4(),
            contract_id,
            day_of_week: day,
            slot_time: wall_clock::parse(time).unwrap(),
        }
    }

    fn plan(rules: Vec<RecurrenceRule>, start: &str, end: &str, max: Option<u32>) -> RecurrencePlan {
        let contract_id = rules.first().map(|r| r.contract_id).unwrap_or_else(Uuid::new_v4);
        RecurrencePlan {
            contract_id,
            clinic_id: Uuid::new_v4(),
            professional_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            rules,
            start_date: d(start),
            end_date: d(end),
            duration_minutes: 50,
            max_appointments: max,
            initial_status: DEFAULT_GENERATED_STATUS,
        }
    }

    #[test]
    fn test_weekly_rule_over_three_weeks() {
        let contract = Uuid::new_v4();
        let expanded = expand_rules(&plan(vec![rule(contract, 2, "09:00")], "2025-03-03", "2025-03-24", None)).unwrap();

        let dates: Vec<NaiveDate> = expanded.iter().map(|a| a.appointment_date).collect();
        assert_eq!(dates, vec![d("2025-03-04"), d("2025-03-11"), d("2025-03-18")]);
        for appointment in &expanded {
            assert_eq!(wall_clock::format(appointment.start_time), "09:00");
            assert_eq!(wall_clock::format(appointment.end_time), "09:50");
            assert_eq!(appointment.status, AppointmentStatus::Confirmed);
            assert_eq!(appointment.contract_id, Some(contract));
        }
    }

    #[test]
    fn test_cap_follows_date_then_rule_order() {
        let contract = Uuid::new_v4();
        let rules = vec![rule(contract, 4, "14:00"), rule(contract, 2, "09:00"), rule(contract, 2, "08:00")];
        let expanded = expand_rules(&plan(rules, "2025-03-03", "2025-12-31", Some(4))).unwrap();

        let got: Vec<(NaiveDate, String)> = expanded
            .iter()
            .map(|a| (a.appointment_date, wall_clock::format(a.start_time)))
            .collect();
        assert_eq!(
            got,
            vec![
                (d("2025-03-04"), "08:00".to_string()),
                (d("2025-03-04"), "09:00".to_string()),
                (d("2025-03-06"), "14:00".to_string()),
                (d("2025-03-11"), "08:00".to_string()),
            ]
        );
    }

    #[test]
    fn test_no_rules_yield_nothing() {
        let expanded = expand_rules(&plan(Vec::new(), "2025-03-03", "2025-03-24", None)).unwrap();
        assert!(expanded.is_empty());
    }

    #[test]
    fn test_non_positive_duration_falls_back() {
        let contract = Uuid::new_v4();
        let mut p = plan(vec![rule(contract, 1, "10:00")], "2025-03-03", "2025-03-03", None);
        p.duration_minutes = 0;
        let expanded = expand_rules(&p).unwrap();
        assert_eq!(wall_clock::format(expanded[0].end_time), "10:50");
    }

    #[test]
    fn test_late_rule_spilling_past_midnight_is_rejected() {
        let contract = Uuid::new_v4();
        let result = expand_rules(&plan(vec![rule(contract, 1, "23:30")], "2025-03-03", "2025-03-03", None));
        assert!(matches!(result, Err(AppointmentError::Validation(_))));
    }

    #[test]
    fn test_horizon_defaults_and_extension() {
        let start = d("2025-03-03");
        assert_eq!(horizon_end(start, None, None, 1), d("2026-03-03"));
        assert_eq!(horizon_end(start, Some(d("2025-03-10")), None, 1), d("2025-03-10"));
        // 10 sessions at 2 per week need 5 weeks.
        assert_eq!(horizon_end(start, Some(d("2025-03-10")), Some(10), 2), d("2025-04-06"));
        assert_eq!(horizon_end(start, Some(d("2025-12-31")), Some(10), 2), d("2025-12-31"));
    }
}
