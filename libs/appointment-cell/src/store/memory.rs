// libs/appointment-cell/src/store/memory.rs
//! In-memory [`SchedulingStore`] used by tests and local development.
//!
//! Mirrors the database constraints the engine relies on: the partial unique
//! index on (professional, date, start time) for slot-occupying appointments
//! and all-or-nothing batch inserts.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{
    AgendaEntry, Appointment, AppointmentError, AppointmentPatch, AppointmentStatus, Contract,
    ContractStatus, NewAppointment, RecurrenceRule, ReminderTarget, ReminderToken, ReminderTokenContext, ScheduleConfig, StatusCascade,
};
use crate::store::{SchedulingStore, StoreResult};

#[derive(Debug, Clone)]
struct PatientRecord {
    full_name: String,
    guardians: Vec<(Uuid, Option<String>)>,
}

#[derive(Default)]
struct MemoryData {
    schedule_configs: HashMap<(Uuid, u8), ScheduleConfig>,
    appointments: HashMap<Uuid, Appointment>,
    contracts: HashMap<Uuid, Contract>,
    rules: Vec<RecurrenceRule>,
    reminder_tokens: HashMap<String, ReminderToken>,
    patients: HashMap<Uuid, PatientRecord>,
    fail_writes: bool,
}

impl MemoryData {
    fn check_writable(&self) -> StoreResult<()> {
        if self.fail_writes {
            Err(AppointmentError::Database("store is read-only".to_string()))
        } else {
            Ok(())
        }
    }

    fn slot_taken(
        &self,
        professional_id: Uuid,
        date: NaiveDate,
        start_time: NaiveTime,
        ignore: Option<Uuid>,
    ) -> bool {
        self.appointments.values().any(|existing| {
            Some(existing.id) != ignore
                && existing.professional_id == professional_id
                && existing.appointment_date == date
                && existing.start_time == start_time
                && existing.status.occupies_slot()
        })
    }
}

#[derive(Clone, Default)]
pub struct InMemorySchedulingStore {
    data: Arc<RwLock<MemoryData>>,
}

impl InMemorySchedulingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_contract(&self, contract: Contract) {
        self.data.write().await.contracts.insert(contract.id, contract);
    }

    pub async fn insert_rule(&self, contract_id: Uuid, day_of_week: u8, slot_time: NaiveTime) -> RecurrenceRule {
        let rule = RecurrenceRule {
            id: Uuid::new_v4(),
            contract_id,
            day_of_week,
            slot_time,
        };
        self.data.write().await.rules.push(rule.clone());
        rule
    }

    pub async fn insert_patient(&self, patient_id: Uuid, full_name: &str) {
        self.data.write().await.patients.insert(
            patient_id,
            PatientRecord {
                full_name: full_name.to_string(),
                guardians: Vec::new(),
            },
        );
    }

    pub async fn insert_guardian(&self, patient_id: Uuid, guardian_id: Uuid, phone: Option<&str>) {
        let mut data = self.data.write().await;
        let record = data.patients.entry(patient_id).or_insert_with(|| PatientRecord {
            full_name: String::new(),
            guardians: Vec::new(),
        });
        record.guardians.push((guardian_id, phone.map(str::to_string)));
    }

    /// Stores an appointment as-is, bypassing constraints. Test seeding only.
    pub async fn insert_appointment(&self, appointment: Appointment) {
        self.data.write().await.appointments.insert(appointment.id, appointment);
    }

    pub async fn insert_reminder_token(&self, token: ReminderToken) {
        self.data.write().await.reminder_tokens.insert(token.token.clone(), token);
    }

    pub async fn appointment(&self, appointment_id: Uuid) -> Option<Appointment> {
        self.data.read().await.appointments.get(&appointment_id).cloned()
    }

    pub async fn contract(&self, contract_id: Uuid) -> Option<Contract> {
        self.data.read().await.contracts.get(&contract_id).cloned()
    }

    pub async fn appointments_for_contract(&self, contract_id: Uuid) -> Vec<Appointment> {
        let data = self.data.read().await;
        let mut appointments: Vec<Appointment> = data
            .appointments
            .values()
            .filter(|a| a.contract_id == Some(contract_id))
            .cloned()
            .collect();
        appointments.sort_by_key(|a| (a.appointment_date, a.start_time));
        appointments
    }

    pub async fn reminder_tokens(&self) -> Vec<ReminderToken> {
        self.data.read().await.reminder_tokens.values().cloned().collect()
    }

    /// Makes every subsequent write fail with a database error.
    pub async fn set_fail_writes(&self, fail: bool) {
        self.data.write().await.fail_writes = fail;
    }
}

#[async_trait]
impl SchedulingStore for InMemorySchedulingStore {
    async fn list_schedule_config(&self, clinic_id: Uuid) -> StoreResult<Vec<ScheduleConfig>> {
        let data = self.data.read().await;
        let mut configs: Vec<ScheduleConfig> = data
            .schedule_configs
            .values()
            .filter(|c| c.clinic_id == clinic_id)
            .cloned()
            .collect();
        configs.sort_by_key(|c| c.day_of_week);
        Ok(configs)
    }

    async fn get_schedule_config(&self, clinic_id: Uuid, day_of_week: u8) -> StoreResult<Option<ScheduleConfig>> {
        Ok(self.data.read().await.schedule_configs.get(&(clinic_id, day_of_week)).cloned())
    }

    async fn upsert_schedule_config(&self, config: ScheduleConfig) -> StoreResult<ScheduleConfig> {
        let mut data = self.data.write().await;
        data.check_writable()?;
        data.schedule_configs.insert((config.clinic_id, config.day_of_week), config.clone());
        Ok(config)
    }

    async fn replace_schedule_config(
        &self,
        clinic_id: Uuid,
        configs: Vec<ScheduleConfig>,
    ) -> StoreResult<Vec<ScheduleConfig>> {
        let mut data = self.data.write().await;
        data.check_writable()?;
        data.schedule_configs.retain(|(clinic, _), _| *clinic != clinic_id);
        for config in &configs {
            data.schedule_configs.insert((clinic_id, config.day_of_week), config.clone());
        }
        let mut saved = configs;
        saved.sort_by_key(|c| c.day_of_week);
        Ok(saved)
    }

    async fn list_active_appointments(
        &self,
        professional_id: Uuid,
        clinic_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
        exclude_appointment_id: Option<Uuid>,
    ) -> StoreResult<Vec<Appointment>> {
        let data = self.data.read().await;
        let mut appointments: Vec<Appointment> = data
            .appointments
            .values()
            .filter(|a| {
                a.professional_id == professional_id
                    && a.clinic_id == clinic_id
                    && a.appointment_date >= from
                    && a.appointment_date <= to
                    && a.status.occupies_slot()
                    && Some(a.id) != exclude_appointment_id
            })
            .cloned()
            .collect();
        appointments.sort_by_key(|a| (a.appointment_date, a.start_time));
        Ok(appointments)
    }

    async fn list_appointments(&self, clinic_id: Uuid, from: NaiveDate, to: NaiveDate) -> StoreResult<Vec<AgendaEntry>> {
        let data = self.data.read().await;
        let mut entries: Vec<AgendaEntry> = data
            .appointments
            .values()
            .filter(|a| {
                a.clinic_id == clinic_id
                    && a.appointment_date >= from
                    && a.appointment_date <= to
                    && a.status.occupies_slot()
            })
            .map(|a| AgendaEntry {
                appointment: a.clone(),
                patient_name: data
                    .patients
                    .get(&a.patient_id)
                    .map(|p| p.full_name.clone())
                    .unwrap_or_default(),
            })
            .collect();
        entries.sort_by_key(|e| (e.appointment.appointment_date, e.appointment.start_time));
        Ok(entries)
    }

    async fn get_appointment(&self, clinic_id: Uuid, appointment_id: Uuid) -> StoreResult<Option<Appointment>> {
        let data = self.data.read().await;
        Ok(data
            .appointments
            .get(&appointment_id)
            .filter(|a| a.clinic_id == clinic_id)
            .cloned())
    }

    async fn create_appointment(&self, appointment: NewAppointment) -> StoreResult<Appointment> {
        let mut created = self.create_appointments(vec![appointment]).await?;
        created
            .pop()
            .ok_or_else(|| AppointmentError::Database("insert returned no row".to_string()))
    }

    async fn create_appointments(&self, appointments: Vec<NewAppointment>) -> StoreResult<Vec<Appointment>> {
        let mut data = self.data.write().await;
        data.check_writable()?;

        // Validate the whole batch before touching the map.
        let mut batch_keys = Vec::with_capacity(appointments.len());
        for new in &appointments {
            let key = (new.professional_id, new.appointment_date, new.start_time);
            let clashes_in_batch = new.status.occupies_slot() && batch_keys.contains(&key);
            if clashes_in_batch || (new.status.occupies_slot() && data.slot_taken(key.0, key.1, key.2, None)) {
                return Err(AppointmentError::Conflict(format!(
                    "slot {} {} already booked",
                    new.appointment_date, new.start_time
                )));
            }
            if new.status.occupies_slot() {
                batch_keys.push(key);
            }
        }

        let created: Vec<Appointment> = appointments
            .into_iter()
            .map(|new| new.into_appointment(Uuid::new_v4()))
            .collect();
        for appointment in &created {
            data.appointments.insert(appointment.id, appointment.clone());
        }
        Ok(created)
    }

    async fn update_appointment(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
        patch: AppointmentPatch,
    ) -> StoreResult<Option<Appointment>> {
        let mut data = self.data.write().await;
        data.check_writable()?;

        let mut updated = match data.appointments.get(&appointment_id) {
            Some(existing) if existing.clinic_id == clinic_id => existing.clone(),
            _ => return Ok(None),
        };
        patch.apply(&mut updated);

        if updated.status.occupies_slot()
            && data.slot_taken(
                updated.professional_id,
                updated.appointment_date,
                updated.start_time,
                Some(updated.id),
            )
        {
            return Err(AppointmentError::Conflict(format!(
                "slot {} {} already booked",
                updated.appointment_date, updated.start_time
            )));
        }

        data.appointments.insert(updated.id, updated.clone());
        Ok(Some(updated))
    }

    async fn apply_status_cascade(&self, cascade: &StatusCascade) -> StoreResult<Vec<Uuid>> {
        let mut data = self.data.write().await;
        data.check_writable()?;

        let mut affected = Vec::new();
        for appointment in data.appointments.values_mut() {
            if cascade.matches(appointment) {
                appointment.status = cascade.target;
                affected.push((appointment.appointment_date, appointment.start_time, appointment.id));
            }
        }
        affected.sort();
        Ok(affected.into_iter().map(|(_, _, id)| id).collect())
    }

    async fn get_contract(&self, contract_id: Uuid) -> StoreResult<Option<Contract>> {
        Ok(self.data.read().await.contracts.get(&contract_id).cloned())
    }

    async fn end_contract(&self, contract_id: Uuid, end_date: NaiveDate) -> StoreResult<bool> {
        let mut data = self.data.write().await;
        data.check_writable()?;
        match data.contracts.get_mut(&contract_id) {
            Some(contract) if contract.status == ContractStatus::Signed => {
                contract.end_date = Some(end_date);
                contract.status = ContractStatus::Ended;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_contract_schedule_rules(&self, contract_id: Uuid) -> StoreResult<Vec<RecurrenceRule>> {
        let data = self.data.read().await;
        let mut rules: Vec<RecurrenceRule> = data
            .rules
            .iter()
            .filter(|r| r.contract_id == contract_id)
            .cloned()
            .collect();
        rules.sort_by_key(|r| (r.day_of_week, r.slot_time));
        Ok(rules)
    }

    async fn create_reminder_token(&self, token: ReminderToken) -> StoreResult<ReminderToken> {
        let mut data = self.data.write().await;
        data.check_writable()?;
        data.reminder_tokens.insert(token.token.clone(), token.clone());
        Ok(token)
    }

    async fn resolve_reminder_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<ReminderTokenContext>> {
        let data = self.data.read().await;
        let Some(stored) = data.reminder_tokens.get(token).filter(|t| t.expires_at > now) else {
            return Ok(None);
        };
        let Some(appointment) = data.appointments.get(&stored.appointment_id) else {
            return Ok(None);
        };
        let patient_name = data
            .patients
            .get(&appointment.patient_id)
            .map(|p| p.full_name.clone())
            .unwrap_or_default();

        Ok(Some(ReminderTokenContext {
            appointment: appointment.clone(),
            guardian_id: stored.guardian_id,
            patient_name,
        }))
    }

    async fn list_reminder_targets(
        &self,
        date: NaiveDate,
        professional_id: Option<Uuid>,
    ) -> StoreResult<Vec<ReminderTarget>> {
        let data = self.data.read().await;
        let mut targets = Vec::new();
        for appointment in data.appointments.values() {
            let due = appointment.appointment_date == date
                && matches!(appointment.status, AppointmentStatus::Agendado | AppointmentStatus::Confirmado)
                && professional_id.map_or(true, |p| p == appointment.professional_id);
            if !due {
                continue;
            }
            let Some(patient) = data.patients.get(&appointment.patient_id) else {
                continue;
            };
            for (guardian_id, phone) in &patient.guardians {
                let Some(phone) = phone.as_ref().filter(|p| !p.trim().is_empty()) else {
                    continue;
                };
                targets.push(ReminderTarget {
                    appointment_id: appointment.id,
                    professional_id: appointment.professional_id,
                    patient_id: appointment.patient_id,
                    patient_name: patient.full_name.clone(),
                    guardian_id: *guardian_id,
                    guardian_phone: phone.clone(),
                    appointment_date: appointment.appointment_date,
                    start_time: appointment.start_time,
                    status: appointment.status,
                });
            }
        }
        targets.sort_by_key(|t| (t.start_time, t.appointment_id));
        Ok(targets)
    }
}
