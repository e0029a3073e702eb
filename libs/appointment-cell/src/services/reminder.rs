// libs/appointment-cell/src/services/reminder.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::models::{wall_clock, AppointmentError, DispatchSummary, ReminderMessage, ReminderTarget};
use crate::services::audit::{self, Actor, AuditAction};
use crate::services::reminder_token::ReminderTokenService;
use crate::store::SchedulingStore;

pub const TWILIO_API_BASE_URL: &str = "https://api.twilio.com";

/// Delivers one reminder to one phone number.
#[async_trait]
pub trait ReminderSender: Send + Sync {
    async fn send_reminder(&self, message: &ReminderMessage) -> Result<(), AppointmentError>;

    /// An unconfigured sender makes dispatch skip every recipient.
    fn is_configured(&self) -> bool {
        true
    }
}

/// Used when no messaging provider is configured.
pub struct NoopReminderSender;

#[async_trait]
impl ReminderSender for NoopReminderSender {
    async fn send_reminder(&self, message: &ReminderMessage) -> Result<(), AppointmentError> {
        debug!("Reminder sender not configured, dropping message to {}", message.phone);
        Ok(())
    }

    fn is_configured(&self) -> bool {
        false
    }
}

/// Twilio Messages API over WhatsApp.
pub struct WhatsAppSender {
    http_client: Client,
    base_url: String,
    account_sid: String,
    auth_token: String,
    from: String,
}

impl WhatsAppSender {
    /// `None` unless account SID, auth token and sender number are all set.
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        if !config.is_whatsapp_configured() {
            return None;
        }
        Some(Self {
            http_client: Client::new(),
            base_url: TWILIO_API_BASE_URL.to_string(),
            account_sid: config.twilio_account_sid.clone(),
            auth_token: config.twilio_auth_token.clone(),
            from: config.twilio_whatsapp_from.clone(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl ReminderSender for WhatsAppSender {
    async fn send_reminder(&self, message: &ReminderMessage) -> Result<(), AppointmentError> {
        let to = whatsapp_address(&message.phone)
            .ok_or_else(|| AppointmentError::Validation("recipient phone is empty".to_string()))?;
        let from = if self.from.starts_with("whatsapp:") {
            self.from.clone()
        } else {
            format!("whatsapp:{}", self.from)
        };
        let body = reminder_body(message);
        let url = format!("{}/2010-04-01/Accounts/{}/Messages.json", self.base_url, self.account_sid);

        let response = self
            .http_client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("To", to.as_str()), ("From", from.as_str()), ("Body", body.as_str())])
            .send()
            .await
            .map_err(|e| AppointmentError::ExternalService(format!("twilio request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            error!("Twilio rejected message to {}: {} {}", to, status, detail);
            return Err(AppointmentError::ExternalService(format!("twilio returned {}: {}", status, detail)));
        }
        debug!("Twilio accepted message to {}", to);
        Ok(())
    }
}

/// `whatsapp:+<digits>`, or `None` for a blank number.
pub fn whatsapp_address(phone: &str) -> Option<String> {
    let phone = phone.trim();
    if phone.is_empty() {
        return None;
    }
    if phone.starts_with("whatsapp:+") {
        return Some(phone.to_string());
    }
    Some(format!("whatsapp:+{}", phone.trim_start_matches('+')))
}

pub fn reminder_body(message: &ReminderMessage) -> String {
    let mut body = format!(
        "Lembrete: Amanhã ({}) às {} você tem consulta agendada para {}. Confirme sua presença se possível.",
        message.date_label, message.time_label, message.patient_name
    );
    if let Some(url) = &message.reschedule_url {
        body.push_str(&format!(" Para confirmar ou remarcar: {}", url));
    }
    body
}

/// Sends one reminder per (appointment, guardian with phone) due on a date.
pub struct ReminderDispatcher {
    store: Arc<dyn SchedulingStore>,
    tokens: Arc<ReminderTokenService>,
    sender: Arc<dyn ReminderSender>,
    app_public_url: String,
}

impl ReminderDispatcher {
    pub fn new(
        store: Arc<dyn SchedulingStore>,
        tokens: Arc<ReminderTokenService>,
        sender: Arc<dyn ReminderSender>,
        app_public_url: &str,
    ) -> Self {
        Self {
            store,
            tokens,
            sender,
            app_public_url: app_public_url.trim_end_matches('/').to_string(),
        }
    }

    /// Failures for one recipient are logged and counted as skipped; they
    /// never stop the rest of the batch.
    #[instrument(skip(self))]
    pub async fn dispatch(
        &self,
        date: NaiveDate,
        professional_id: Option<Uuid>,
    ) -> Result<DispatchSummary, AppointmentError> {
        let targets = self.store.list_reminder_targets(date, professional_id).await?;
        let mut summary = DispatchSummary::default();

        if !self.sender.is_configured() {
            warn!("Reminder sender not configured, skipping {} reminders for {}", targets.len(), date);
            summary.skipped = targets.len();
            return Ok(summary);
        }

        for target in &targets {
            let message = ReminderMessage {
                phone: target.guardian_phone.clone(),
                patient_name: target.patient_name.clone(),
                date_label: date.format("%d/%m/%Y").to_string(),
                time_label: wall_clock::format(target.start_time),
                reschedule_url: self.reschedule_url(target).await,
            };

            match self.sender.send_reminder(&message).await {
                Ok(()) => {
                    summary.sent += 1;
                    info!("Sent reminder for appointment {} to guardian {}", target.appointment_id, target.guardian_id);
                    audit::record(
                        AuditAction::ReminderSent,
                        &Actor::system(),
                        target.appointment_id,
                        &[target.guardian_id],
                    );
                }
                Err(e) => {
                    summary.skipped += 1;
                    warn!(
                        "Reminder failed for appointment {} guardian {}: {}",
                        target.appointment_id, target.guardian_id, e
                    );
                }
            }
        }

        info!("Reminders for {}: {} sent, {} skipped", date, summary.sent, summary.skipped);
        Ok(summary)
    }

    async fn reschedule_url(&self, target: &ReminderTarget) -> Option<String> {
        if self.app_public_url.is_empty() {
            return None;
        }
        match self.tokens.issue(target.appointment_id, target.guardian_id).await {
            Ok(token) => Some(format!(
                "{}/remarcar?token={}",
                self.app_public_url,
                urlencoding::encode(&token.token)
            )),
            Err(e) => {
                warn!("Could not issue reminder token for {}: {}", target.appointment_id, e);
                None
            }
        }
    }
}
