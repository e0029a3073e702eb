// libs/appointment-cell/src/store/supabase.rs
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::{SupabaseClient, PREFER_MINIMAL, PREFER_REPRESENTATION, PREFER_UPSERT};

use crate::models::{
    AgendaEntry, Appointment, AppointmentError, AppointmentPatch, AppointmentStatus, Contract,
    ContractStatus, NewAppointment, RecurrenceRule, ReminderTarget, ReminderToken, ReminderTokenContext, ScheduleConfig, StatusCascade,
    StatusSelector,
};
use crate::store::{SchedulingStore, StoreResult};

const CONTRACT_COLUMNS: &str = "id,clinic_id,professional_id,patient_id,status,start_date,end_date,num_appointments";

/// PostgREST-backed store. Authenticates with the service-role key because the
/// public reminder flow has no signed-in user.
pub struct SupabaseSchedulingStore {
    supabase: SupabaseClient,
}

#[derive(Debug, Deserialize)]
struct IdRow {
    id: Uuid,
}

#[derive(Debug, Deserialize)]
struct ReminderTokenRow {
    guardian_id: Uuid,
    #[serde(default)]
    patient_name: Option<String>,
    #[serde(flatten)]
    appointment: Appointment,
}

impl SupabaseSchedulingStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    async fn fetch<T>(&self, path: &str) -> StoreResult<Vec<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        debug!("Fetching {}", path);
        let rows: Vec<T> = self
            .supabase
            .service_request(Method::GET, path, None, &[])
            .await
            .map_err(|e| {
                error!("Supabase read failed for {}: {}", path, e);
                AppointmentError::from(e)
            })?;
        Ok(rows)
    }

    async fn write<T>(&self, method: Method, path: &str, body: Option<Value>, prefer: &str) -> StoreResult<Vec<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        debug!("Writing {} {}", method, path);
        let rows: Option<Vec<T>> = self
            .supabase
            .service_request(method, path, body, &[("Prefer", prefer)])
            .await
            .map_err(|e| {
                error!("Supabase write failed for {}: {}", path, e);
                AppointmentError::from(e)
            })?;
        Ok(rows.unwrap_or_default())
    }
}

fn to_json<T: Serialize>(value: &T) -> StoreResult<Value> {
    serde_json::to_value(value).map_err(|e| AppointmentError::Database(format!("failed to encode row: {}", e)))
}

fn status_list(statuses: &[AppointmentStatus]) -> String {
    statuses.iter().map(AppointmentStatus::as_str).collect::<Vec<_>>().join(",")
}

fn status_filter(selector: &StatusSelector) -> String {
    match selector {
        StatusSelector::Only(statuses) => format!("status=in.({})", status_list(statuses)),
        StatusSelector::Except(statuses) => format!("status=not.in.({})", status_list(statuses)),
    }
}

#[async_trait]
impl SchedulingStore for SupabaseSchedulingStore {
    async fn list_schedule_config(&self, clinic_id: Uuid) -> StoreResult<Vec<ScheduleConfig>> {
        let path = format!(
            "/rest/v1/clinic_schedule_config?clinic_id=eq.{}&order=day_of_week.asc",
            clinic_id
        );
        self.fetch(&path).await
    }

    async fn get_schedule_config(&self, clinic_id: Uuid, day_of_week: u8) -> StoreResult<Option<ScheduleConfig>> {
        let path = format!(
            "/rest/v1/clinic_schedule_config?clinic_id=eq.{}&day_of_week=eq.{}",
            clinic_id, day_of_week
        );
        Ok(self.fetch::<ScheduleConfig>(&path).await?.into_iter().next())
    }

    async fn upsert_schedule_config(&self, config: ScheduleConfig) -> StoreResult<ScheduleConfig> {
        let body = to_json(&config)?;
        let saved: Vec<ScheduleConfig> = self
            .write(
                Method::POST,
                "/rest/v1/clinic_schedule_config?on_conflict=clinic_id,day_of_week",
                Some(body),
                PREFER_UPSERT,
            )
            .await?;
        saved
            .into_iter()
            .next()
            .ok_or_else(|| AppointmentError::Database("upsert returned no row".to_string()))
    }

    async fn replace_schedule_config(
        &self,
        clinic_id: Uuid,
        configs: Vec<ScheduleConfig>,
    ) -> StoreResult<Vec<ScheduleConfig>> {
        let days: Vec<String> = configs.iter().map(|c| c.day_of_week.to_string()).collect();

        let saved = if configs.is_empty() {
            Vec::new()
        } else {
            self.write(
                Method::POST,
                "/rest/v1/clinic_schedule_config?on_conflict=clinic_id,day_of_week",
                Some(to_json(&configs)?),
                PREFER_UPSERT,
            )
            .await?
        };

        let mut delete_path = format!("/rest/v1/clinic_schedule_config?clinic_id=eq.{}", clinic_id);
        if !days.is_empty() {
            delete_path.push_str(&format!("&day_of_week=not.in.({})", days.join(",")));
        }
        let _: Vec<Value> = self.write(Method::DELETE, &delete_path, None, PREFER_MINIMAL).await?;

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
        let mut path = format!(
            "/rest/v1/appointments?professional_id=eq.{}&clinic_id=eq.{}&appointment_date=gte.{}&appointment_date=lte.{}&status=not.in.({})&order=appointment_date.asc,start_time.asc",
            professional_id,
            clinic_id,
            from,
            to,
            status_list(&[AppointmentStatus::Cancelled, AppointmentStatus::SeriesEnded]),
        );
        if let Some(excluded) = exclude_appointment_id {
            path.push_str(&format!("&id=neq.{}", excluded));
        }
        self.fetch(&path).await
    }

    async fn list_appointments(&self, clinic_id: Uuid, from: NaiveDate, to: NaiveDate) -> StoreResult<Vec<AgendaEntry>> {
        let path = format!(
            "/rest/v1/appointment_agenda?clinic_id=eq.{}&appointment_date=gte.{}&appointment_date=lte.{}&status=not.in.({})&order=appointment_date.asc,start_time.asc",
            clinic_id,
            from,
            to,
            status_list(&[AppointmentStatus::Cancelled, AppointmentStatus::SeriesEnded]),
        );
        self.fetch(&path).await
    }

    async fn get_appointment(&self, clinic_id: Uuid, appointment_id: Uuid) -> StoreResult<Option<Appointment>> {
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&clinic_id=eq.{}",
            appointment_id, clinic_id
        );
        Ok(self.fetch::<Appointment>(&path).await?.into_iter().next())
    }

    async fn create_appointment(&self, appointment: NewAppointment) -> StoreResult<Appointment> {
        let mut created = self.create_appointments(vec![appointment]).await?;
        created
            .pop()
            .ok_or_else(|| AppointmentError::Database("insert returned no row".to_string()))
    }

    async fn create_appointments(&self, appointments: Vec<NewAppointment>) -> StoreResult<Vec<Appointment>> {
        if appointments.is_empty() {
            return Ok(Vec::new());
        }
        // A JSON array body becomes a single multi-row INSERT, so the batch
        // commits or fails as a whole.
        let body = to_json(&appointments)?;
        self.write(Method::POST, "/rest/v1/appointments", Some(body), PREFER_REPRESENTATION)
            .await
    }

    async fn update_appointment(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
        patch: AppointmentPatch,
    ) -> StoreResult<Option<Appointment>> {
        if patch.is_empty() {
            return self.get_appointment(clinic_id, appointment_id).await;
        }
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&clinic_id=eq.{}",
            appointment_id, clinic_id
        );
        let updated: Vec<Appointment> = self
            .write(Method::PATCH, &path, Some(to_json(&patch)?), PREFER_REPRESENTATION)
            .await?;
        Ok(updated.into_iter().next())
    }

    async fn apply_status_cascade(&self, cascade: &StatusCascade) -> StoreResult<Vec<Uuid>> {
        if matches!(&cascade.selector, StatusSelector::Only(statuses) if statuses.is_empty()) {
            return Ok(Vec::new());
        }
        let mut path = format!(
            "/rest/v1/appointments?contract_id=eq.{}&{}",
            cascade.contract_id,
            status_filter(&cascade.selector)
        );
        if let Some(after) = cascade.after_date {
            path.push_str(&format!("&appointment_date=gt.{}", after));
        }
        path.push_str("&select=id");

        let body = to_json(&AppointmentPatch::status(cascade.target))?;
        let rows: Vec<IdRow> = self
            .write(Method::PATCH, &path, Some(body), PREFER_REPRESENTATION)
            .await?;
        Ok(rows.into_iter().map(|row| row.id).collect())
    }

    async fn get_contract(&self, contract_id: Uuid) -> StoreResult<Option<Contract>> {
        let path = format!("/rest/v1/contracts?id=eq.{}&select={}", contract_id, CONTRACT_COLUMNS);
        Ok(self.fetch::<Contract>(&path).await?.into_iter().next())
    }

    async fn end_contract(&self, contract_id: Uuid, end_date: NaiveDate) -> StoreResult<bool> {
        let path = format!(
            "/rest/v1/contracts?id=eq.{}&status=eq.{}&select=id",
            contract_id,
            ContractStatus::Signed
        );
        let body = serde_json::json!({
            "end_date": end_date,
            "status": ContractStatus::Ended,
        });
        let rows: Vec<IdRow> = self
            .write(Method::PATCH, &path, Some(body), PREFER_REPRESENTATION)
            .await?;
        Ok(!rows.is_empty())
    }

    async fn list_contract_schedule_rules(&self, contract_id: Uuid) -> StoreResult<Vec<RecurrenceRule>> {
        let path = format!(
            "/rest/v1/contract_schedule_rules?contract_id=eq.{}&order=day_of_week.asc,slot_time.asc",
            contract_id
        );
        self.fetch(&path).await
    }

    async fn create_reminder_token(&self, token: ReminderToken) -> StoreResult<ReminderToken> {
        let saved: Vec<ReminderToken> = self
            .write(
                Method::POST,
                "/rest/v1/appointment_reminder_tokens",
                Some(to_json(&token)?),
                PREFER_REPRESENTATION,
            )
            .await?;
        Ok(saved.into_iter().next().unwrap_or(token))
    }

    async fn resolve_reminder_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<ReminderTokenContext>> {
        let path = format!(
            "/rest/v1/reminder_token_appointments?token=eq.{}&expires_at=gt.{}",
            urlencoding::encode(token),
            urlencoding::encode(&now.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        let row = self.fetch::<ReminderTokenRow>(&path).await?.into_iter().next();
        Ok(row.map(|row| ReminderTokenContext {
            appointment: row.appointment,
            guardian_id: row.guardian_id,
            patient_name: row.patient_name.unwrap_or_default(),
        }))
    }

    async fn list_reminder_targets(
        &self,
        date: NaiveDate,
        professional_id: Option<Uuid>,
    ) -> StoreResult<Vec<ReminderTarget>> {
        let mut path = format!(
            "/rest/v1/appointment_reminder_targets?appointment_date=eq.{}&status=in.({})",
            date,
            status_list(&[AppointmentStatus::Agendado, AppointmentStatus::Confirmado]),
        );
        if let Some(professional) = professional_id {
            path.push_str(&format!("&professional_id=eq.{}", professional));
        }
        path.push_str("&order=start_time.asc");
        self.fetch(&path).await
    }
}
