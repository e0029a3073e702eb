// libs/appointment-cell/src/services/availability.rs
use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveTime};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::models::{
    minutes_since_midnight, AgendaEntry, Appointment, AppointmentError, AvailableSlotsResponse,
    ScheduleConfig, Slot, WeekSchedule, MAX_SLOT_RANGE_DAYS,
};
use crate::store::SchedulingStore;

/// Computes bookable starts for one professional from the clinic's weekly
/// template and the appointments already on the calendar.
pub struct AvailabilityService {
    store: Arc<dyn SchedulingStore>,
}

impl AvailabilityService {
    pub fn new(store: Arc<dyn SchedulingStore>) -> Self {
        Self { store }
    }

    pub async fn week_schedule(&self, clinic_id: Uuid) -> Result<WeekSchedule, AppointmentError> {
        let configs = self.store.list_schedule_config(clinic_id).await?;
        Ok(WeekSchedule::from_configs(configs))
    }

    /// Slots in `[from, to]` ordered by date then start time. `exclude` lets a
    /// reschedule ignore the appointment being moved.
    #[instrument(skip(self))]
    pub async fn compute_slots(
        &self,
        professional_id: Uuid,
        clinic_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Slot>, AppointmentError> {
        validate_range(from, to)?;
        let week = self.week_schedule(clinic_id).await?;
        self.slots_in_week(&week, professional_id, clinic_id, from, to, exclude).await
    }

    /// Staff view of a calendar: the slots plus the weekdays that have
    /// working hours, from a single read of the template.
    pub async fn available_slots(
        &self,
        professional_id: Uuid,
        clinic_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<AvailableSlotsResponse, AppointmentError> {
        validate_range(from, to)?;
        let week = self.week_schedule(clinic_id).await?;
        let slots = self
            .slots_in_week(&week, professional_id, clinic_id, from, to, None)
            .await?;
        Ok(AvailableSlotsResponse {
            slots,
            configured_days: week.configured_days(),
        })
    }

    /// The clinic's booked appointments in `[from, to]`, for the agenda screen.
    pub async fn agenda(
        &self,
        clinic_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AgendaEntry>, AppointmentError> {
        validate_range(from, to)?;
        let entries = self.store.list_appointments(clinic_id, from, to).await?;
        debug!("Agenda of clinic {} between {} and {} has {} appointments", clinic_id, from, to, entries.len());
        Ok(entries)
    }

    async fn slots_in_week(
        &self,
        week: &WeekSchedule,
        professional_id: Uuid,
        clinic_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Slot>, AppointmentError> {
        let appointments = self
            .store
            .list_active_appointments(professional_id, clinic_id, from, to, exclude)
            .await?;

        let slots = compute_slots(week, &appointments, from, to);
        debug!("Computed {} slots for professional {} between {} and {}", slots.len(), professional_id, from, to);
        Ok(slots)
    }

    /// Whether `start` on `date` is currently offered.
    pub async fn is_slot_free(
        &self,
        professional_id: Uuid,
        clinic_id: Uuid,
        date: NaiveDate,
        start: NaiveTime,
        exclude: Option<Uuid>,
    ) -> Result<bool, AppointmentError> {
        let slots = self.compute_slots(professional_id, clinic_id, date, date, exclude).await?;
        Ok(slots.iter().any(|slot| slot.start_time == start))
    }
}

pub fn validate_range(from: NaiveDate, to: NaiveDate) -> Result<(), AppointmentError> {
    if from > to {
        return Err(AppointmentError::Validation(format!("from {} must not be after to {}", from, to)));
    }
    if (to - from).num_days() > MAX_SLOT_RANGE_DAYS {
        return Err(AppointmentError::Validation(format!(
            "date range may span at most {} days",
            MAX_SLOT_RANGE_DAYS
        )));
    }
    Ok(())
}

/// Greedy scan of every day in `[from, to]`. Appointments are expected to be
/// the professional's slot-occupying ones; their dates select the day they
/// block.
pub fn compute_slots(
    week: &WeekSchedule,
    appointments: &[Appointment],
    from: NaiveDate,
    to: NaiveDate,
) -> Vec<Slot> {
    let mut slots = Vec::new();
    let mut date = from;
    while date <= to {
        if let Some(config) = week.for_date(date) {
            let booked: Vec<&Appointment> = appointments
                .iter()
                .filter(|a| a.appointment_date == date && a.status.occupies_slot())
                .collect();
            slots.extend(
                day_slots(config, &booked)
                    .into_iter()
                    .map(|start_time| Slot { date, start_time }),
            );
        }
        date += Duration::days(1);
    }
    slots
}

fn day_slots(config: &ScheduleConfig, booked: &[&Appointment]) -> Vec<NaiveTime> {
    let Some((start, end)) = config.working_hours() else {
        return Vec::new();
    };
    let duration = config.effective_duration();
    let interval = config.effective_interval();
    let day_end = minutes_since_midnight(end);
    let lunch = config
        .lunch_window()
        .map(|(ls, le)| (minutes_since_midnight(ls), minutes_since_midnight(le)));

    // Each booking blocks its own span widened by the interval on both sides.
    let blocked: Vec<(i32, i32)> = booked
        .iter()
        .map(|a| {
            (
                minutes_since_midnight(a.start_time) - interval,
                minutes_since_midnight(a.end_time) + interval,
            )
        })
        .collect();

    let mut starts = Vec::new();
    let mut cursor = minutes_since_midnight(start);
    while cursor + duration <= day_end {
        let candidate_end = cursor + duration;
        let hits_lunch = lunch.map_or(false, |(ls, le)| cursor < le && candidate_end > ls);
        let hits_booking = blocked
            .iter()
            .any(|&(zone_start, zone_end)| cursor < zone_end && candidate_end > zone_start);

        if !hits_lunch && !hits_booking {
            if let Some(time) = NaiveTime::from_num_seconds_from_midnight_opt(cursor as u32 * 60, 0) {
                starts.push(time);
            }
        }
        cursor += interval;
    }
    starts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{wall_clock, AppointmentStatus};

    fn t(raw: &str) -> NaiveTime {
        wall_clock::parse(raw).unwrap()
    }

    fn d(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
    }

    fn tuesday_config(clinic: Uuid, start: &str, end: &str) -> ScheduleConfig {
        ScheduleConfig {
            start_time: Some(t(start)),
            end_time: Some(t(end)),
            ..ScheduleConfig::default_for(clinic, 2)
        }
    }

    fn booking(date: &str, start: &str, end: &str, status: AppointmentStatus) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            clinic_id: Uuid::new_v4(),
            professional_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            contract_id: None,
            appointment_date: d(date),
            start_time: t(start),
            end_time: t(end),
            status,
            notes: None,
        }
    }

    fn starts(slots: &[Slot]) -> Vec<String> {
        slots.iter().map(|s| wall_clock::format(s.start_time)).collect()
    }

    #[test]
    fn test_morning_template_steps_by_interval() {
        let week = WeekSchedule::from_configs(vec![tuesday_config(Uuid::new_v4(), "09:00", "12:00")]);
        let slots = compute_slots(&week, &[], d("2025-03-04"), d("2025-03-04"));

        let got = starts(&slots);
        assert_eq!(got.first().map(String::as_str), Some("09:00"));
        assert_eq!(got.get(1).map(String::as_str), Some("09:10"));
        assert_eq!(got.last().map(String::as_str), Some("11:10"));
        assert_eq!(got.len(), 14);
        assert!(slots.iter().all(|s| minutes_since_midnight(s.start_time) + 50 <= 12 * 60));
    }

    #[test]
    fn test_disabled_or_unconfigured_days_are_empty() {
        let clinic = Uuid::new_v4();
        let mut disabled = tuesday_config(clinic, "09:00", "12:00");
        disabled.enabled = false;
        let week = WeekSchedule::from_configs(vec![disabled]);
        assert!(compute_slots(&week, &[], d("2025-03-03"), d("2025-03-09")).is_empty());

        let mut missing_end = tuesday_config(clinic, "09:00", "12:00");
        missing_end.end_time = None;
        let week = WeekSchedule::from_configs(vec![missing_end]);
        assert!(compute_slots(&week, &[], d("2025-03-04"), d("2025-03-04")).is_empty());
    }

    #[test]
    fn test_lunch_window_is_never_overlapped() {
        let mut config = tuesday_config(Uuid::new_v4(), "09:00", "15:00");
        config.lunch_start = Some(t("12:00"));
        config.lunch_end = Some(t("13:00"));
        let week = WeekSchedule::from_configs(vec![config]);

        let slots = compute_slots(&week, &[], d("2025-03-04"), d("2025-03-04"));
        let lunch = (12 * 60, 13 * 60);
        for slot in &slots {
            let start = minutes_since_midnight(slot.start_time);
            assert!(!(start < lunch.1 && start + 50 > lunch.0), "{} overlaps lunch", slot.start_time);
        }
        let got = starts(&slots);
        assert!(got.contains(&"11:10".to_string()));
        assert!(!got.contains(&"11:20".to_string()));
        assert!(got.contains(&"13:00".to_string()));
    }

    #[test]
    fn test_bookings_block_with_interval_buffer() {
        let week = WeekSchedule::from_configs(vec![tuesday_config(Uuid::new_v4(), "08:00", "12:00")]);
        let existing = vec![booking("2025-03-04", "10:00", "10:50", AppointmentStatus::Agendado)];

        let got = starts(&compute_slots(&week, &existing, d("2025-03-04"), d("2025-03-04")));

        // [09:50, 11:00) is blocked; candidates must end by 09:50 or start at 11:00.
        assert!(got.contains(&"09:00".to_string()));
        assert!(!got.contains(&"09:10".to_string()));
        assert!(!got.contains(&"10:50".to_string()));
        assert!(got.contains(&"11:00".to_string()));
    }

    #[test]
    fn test_cancelled_bookings_free_the_slot() {
        let week = WeekSchedule::from_configs(vec![tuesday_config(Uuid::new_v4(), "09:00", "10:00")]);
        let existing = vec![
            booking("2025-03-04", "09:00", "09:50", AppointmentStatus::Cancelled),
            booking("2025-03-04", "09:00", "09:50", AppointmentStatus::SeriesEnded),
        ];

        let got = starts(&compute_slots(&week, &existing, d("2025-03-04"), d("2025-03-04")));
        assert_eq!(got, vec!["09:00".to_string(), "09:10".to_string()]);
    }

    #[test]
    fn test_bookings_only_block_their_own_day() {
        let week = WeekSchedule::from_configs(vec![tuesday_config(Uuid::new_v4(), "09:00", "09:50")]);
        let existing = vec![booking("2025-03-04", "09:00", "09:50", AppointmentStatus::Confirmed)];

        let slots = compute_slots(&week, &existing, d("2025-03-04"), d("2025-03-11"));
        assert_eq!(slots, vec![Slot { date: d("2025-03-11"), start_time: t("09:00") }]);
    }

    #[test]
    fn test_range_validation() {
        assert!(validate_range(d("2025-03-04"), d("2025-03-04")).is_ok());
        assert!(validate_range(d("2025-03-05"), d("2025-03-04")).is_err());
        assert!(validate_range(d("2025-01-01"), d("2025-06-01")).is_err());
    }
}
