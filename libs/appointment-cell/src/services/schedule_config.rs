// libs/appointment-cell/src/services/schedule_config.rs
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{
    parse_time, validate_day_of_week, AppointmentError, ReplaceScheduleRequest, ScheduleConfig,
    ScheduleDayInput, DAYS_PER_WEEK, DEFAULT_CONSULTATION_DURATION_MINUTES, DEFAULT_INTERVAL_MINUTES,
};
use crate::store::SchedulingStore;

pub struct ScheduleConfigService {
    store: Arc<dyn SchedulingStore>,
}

impl ScheduleConfigService {
    pub fn new(store: Arc<dyn SchedulingStore>) -> Self {
        Self { store }
    }

    /// Always seven entries, Sunday first. Days never saved come back
    /// disabled with default duration and interval.
    pub async fn get_week(&self, clinic_id: Uuid) -> Result<Vec<ScheduleConfig>, AppointmentError> {
        let stored = self.store.list_schedule_config(clinic_id).await?;
        debug!("Clinic {} has {} configured days", clinic_id, stored.len());

        let week = (0..DAYS_PER_WEEK)
            .map(|day| {
                stored
                    .iter()
                    .find(|c| c.day_of_week == day)
                    .cloned()
                    .unwrap_or_else(|| ScheduleConfig {
                        enabled: false,
                        ..ScheduleConfig::default_for(clinic_id, day)
                    })
            })
            .collect();
        Ok(week)
    }

    /// Replaces the clinic's week with the submitted days. Days outside 0..=6
    /// are ignored; every day that is submitted is saved.
    pub async fn replace_week(
        &self,
        clinic_id: Uuid,
        request: ReplaceScheduleRequest,
    ) -> Result<Vec<ScheduleConfig>, AppointmentError> {
        let mut configs: Vec<ScheduleConfig> = Vec::with_capacity(request.days.len());
        for input in request.days {
            if validate_day_of_week(input.day_of_week).is_err() {
                warn!("Ignoring schedule entry for invalid day {}", input.day_of_week);
                continue;
            }
            let config = config_from_input(clinic_id, input)?;
            config.validate()?;
            configs.retain(|c| c.day_of_week != config.day_of_week);
            configs.push(config);
        }

        let saved = self.store.replace_schedule_config(clinic_id, configs).await?;
        info!("Replaced schedule of clinic {} with {} days", clinic_id, saved.len());
        Ok(saved)
    }

    /// Copies one weekday onto another. A source day that was never saved is
    /// copied as the default template.
    pub async fn copy_day(
        &self,
        clinic_id: Uuid,
        from_day: i32,
        to_day: i32,
    ) -> Result<ScheduleConfig, AppointmentError> {
        let from_day = validate_day_of_week(from_day)?;
        let to_day = validate_day_of_week(to_day)?;

        let source = self
            .store
            .get_schedule_config(clinic_id, from_day)
            .await?
            .unwrap_or_else(|| ScheduleConfig::default_for(clinic_id, from_day));

        let copy = ScheduleConfig {
            day_of_week: to_day,
            ..source
        };
        let saved = self.store.upsert_schedule_config(copy).await?;
        info!("Copied schedule of clinic {} from day {} to day {}", clinic_id, from_day, to_day);
        Ok(saved)
    }
}

fn config_from_input(clinic_id: Uuid, input: ScheduleDayInput) -> Result<ScheduleConfig, AppointmentError> {
    let optional_time = |field: &str, raw: Option<String>| -> Result<_, AppointmentError> {
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(value) => parse_time(field, value).map(Some),
        }
    };

    let duration = input
        .consultation_duration_minutes
        .filter(|d| *d > 0)
        .unwrap_or(DEFAULT_CONSULTATION_DURATION_MINUTES);
    let interval = input
        .interval_minutes
        .filter(|i| *i >= 0)
        .unwrap_or(DEFAULT_INTERVAL_MINUTES);

    Ok(ScheduleConfig {
        clinic_id,
        day_of_week: input.day_of_week as u8,
        enabled: input.enabled.unwrap_or(true),
        start_time: optional_time("start_time", input.start_time)?,
        end_time: optional_time("end_time", input.end_time)?,
        consultation_duration_minutes: duration,
        interval_minutes: interval,
        lunch_start: optional_time("lunch_start", input.lunch_start)?,
        lunch_end: optional_time("lunch_end", input.lunch_end)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use crate::store::InMemorySchedulingStore;

    fn day(day_of_week: i32, start: &str, end: &str) -> ScheduleDayInput {
        ScheduleDayInput {
            day_of_week,
            enabled: Some(true),
            start_time: Some(start.to_string()),
            end_time: Some(end.to_string()),
            consultation_duration_minutes: None,
            interval_minutes: Some(-5),
            lunch_start: None,
            lunch_end: None,
        }
    }

    #[tokio::test]
    async fn test_week_is_always_seven_days() {
        let store = Arc::new(InMemorySchedulingStore::new());
        let service = ScheduleConfigService::new(store);
        let clinic = Uuid::new_v4();

        service
            .replace_week(clinic, ReplaceScheduleRequest { days: vec![day(2, "09:00", "12:00"), day(9, "09:00", "10:00")] })
            .await
            .unwrap();

        let week = service.get_week(clinic).await.unwrap();
        assert_eq!(week.len(), 7);
        assert!(week[2].enabled);
        assert_eq!(week[2].interval_minutes, DEFAULT_INTERVAL_MINUTES);
        assert!(!week[3].enabled);
        assert_eq!(week[3].consultation_duration_minutes, DEFAULT_CONSULTATION_DURATION_MINUTES);
    }

    #[tokio::test]
    async fn test_replace_removes_unlisted_days() {
        let store = Arc::new(InMemorySchedulingStore::new());
        let service = ScheduleConfigService::new(store.clone());
        let clinic = Uuid::new_v4();

        service
            .replace_week(clinic, ReplaceScheduleRequest { days: vec![day(1, "08:00", "12:00"), day(2, "08:00", "12:00")] })
            .await
            .unwrap();
        service
            .replace_week(clinic, ReplaceScheduleRequest { days: vec![day(2, "13:00", "18:00")] })
            .await
            .unwrap();

        let stored = store.list_schedule_config(clinic).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].day_of_week, 2);
    }

    #[tokio::test]
    async fn test_invalid_hours_are_rejected_before_saving() {
        let store = Arc::new(InMemorySchedulingStore::new());
        let service = ScheduleConfigService::new(store.clone());
        let clinic = Uuid::new_v4();

        let result = service
            .replace_week(clinic, ReplaceScheduleRequest { days: vec![day(2, "12:00", "09:00")] })
            .await;
        assert_matches!(result, Err(AppointmentError::Validation(_)));

        let result = service
            .replace_week(clinic, ReplaceScheduleRequest { days: vec![day(2, "9h", "12:00")] })
            .await;
        assert_matches!(result, Err(AppointmentError::Validation(_)));
        assert!(store.list_schedule_config(clinic).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_copy_missing_day_uses_default_template() {
        let store = Arc::new(InMemorySchedulingStore::new());
        let service = ScheduleConfigService::new(store);
        let clinic = Uuid::new_v4();

        let copied = service.copy_day(clinic, 0, 4).await.unwrap();
        assert_eq!(copied.day_of_week, 4);
        assert!(copied.enabled);
        assert_eq!(copied.start_time, None);
        assert_eq!(copied.consultation_duration_minutes, 50);

        assert_matches!(service.copy_day(clinic, 0, 7).await, Err(AppointmentError::Validation(_)));
    }

    #[tokio::test]
    async fn test_copy_keeps_source_hours() {
        let store = Arc::new(InMemorySchedulingStore::new());
        let service = ScheduleConfigService::new(store);
        let clinic = Uuid::new_v4();
        service
            .replace_week(clinic, ReplaceScheduleRequest { days: vec![day(1, "08:00", "17:00")] })
            .await
            .unwrap();

        let copied = service.copy_day(clinic, 1, 3).await.unwrap();
        let week = service.get_week(clinic).await.unwrap();
        assert_eq!(week[3], copied);
        assert_eq!(week[3].start_time, week[1].start_time);
    }
}
