use std::env;
use std::str::FromStr;

use chrono::{FixedOffset, Offset, Utc};
use tracing::warn;

/// Brasília time, the wall clock most clinics book in.
pub const DEFAULT_CLINIC_UTC_OFFSET_MINUTES: i32 = -180;
pub const DEFAULT_REMINDER_TOKEN_TTL_HOURS: i64 = 168;
pub const DEFAULT_RESCHEDULE_WINDOW_DAYS: i64 = 14;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_role_key: String,
    pub supabase_jwt_secret: String,
    pub app_public_url: String,
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub twilio_whatsapp_from: String,
    pub clinic_utc_offset_minutes: i32,
    pub reminder_token_ttl_hours: i64,
    pub reschedule_window_days: i64,
    pub request_timeout_secs: u64,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_service_role_key: env::var("SUPABASE_SERVICE_ROLE_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_SERVICE_ROLE_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            app_public_url: env::var("APP_PUBLIC_URL")
                .unwrap_or_else(|_| {
                    warn!("APP_PUBLIC_URL not set, reminder links will be relative");
                    String::new()
                }),
            twilio_account_sid: env::var("TWILIO_ACCOUNT_SID").unwrap_or_default(),
            twilio_auth_token: env::var("TWILIO_AUTH_TOKEN").unwrap_or_default(),
            twilio_whatsapp_from: env::var("TWILIO_WHATSAPP_FROM").unwrap_or_default(),
            clinic_utc_offset_minutes: parse_env_or(
                "CLINIC_UTC_OFFSET_MINUTES",
                DEFAULT_CLINIC_UTC_OFFSET_MINUTES,
            ),
            reminder_token_ttl_hours: parse_env_or(
                "REMINDER_TOKEN_TTL_HOURS",
                DEFAULT_REMINDER_TOKEN_TTL_HOURS,
            ),
            reschedule_window_days: parse_env_or(
                "RESCHEDULE_WINDOW_DAYS",
                DEFAULT_RESCHEDULE_WINDOW_DAYS,
            ),
            request_timeout_secs: parse_env_or(
                "REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            ),
            port: parse_env_or("PORT", DEFAULT_PORT),
        };
        
        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }
        if !config.is_whatsapp_configured() {
            warn!("Twilio WhatsApp credentials not set, reminders will be skipped");
        }
        
        config
    }
    
    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty() 
            && !self.supabase_service_role_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }
    
    pub fn is_whatsapp_configured(&self) -> bool {
        !self.twilio_account_sid.is_empty()
            && !self.twilio_auth_token.is_empty()
            && !self.twilio_whatsapp_from.is_empty()
    }

    /// Fixed offset used to turn "now" into the clinic's calendar date.
    pub fn clinic_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.clinic_utc_offset_minutes * 60)
            .unwrap_or_else(|| {
                warn!("Invalid clinic UTC offset {} minutes, falling back to UTC", self.clinic_utc_offset_minutes);
                Utc.fix()
            })
    }
}

fn parse_env_or<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value {:?}, using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_offset(minutes: i32) -> AppConfig {
        AppConfig {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            supabase_service_role_key: String::new(),
            supabase_jwt_secret: String::new(),
            app_public_url: String::new(),
            twilio_account_sid: String::new(),
            twilio_auth_token: String::new(),
            twilio_whatsapp_from: String::new(),
            clinic_utc_offset_minutes: minutes,
            reminder_token_ttl_hours: DEFAULT_REMINDER_TOKEN_TTL_HOURS,
            reschedule_window_days: DEFAULT_RESCHEDULE_WINDOW_DAYS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            port: DEFAULT_PORT,
        }
    }

    #[test]
    fn test_clinic_offset() {
        let config = config_with_offset(-180);
        assert_eq!(config.clinic_offset().local_minus_utc(), -3 * 3600);
    }

    #[test]
    fn test_out_of_range_offset_falls_back_to_utc() {
        let config = config_with_offset(60 * 30);
        assert_eq!(config.clinic_offset().local_minus_utc(), 0);
    }

    #[test]
    fn test_whatsapp_requires_all_credentials() {
        let mut config = config_with_offset(0);
        config.twilio_account_sid = "AC123".to_string();
        config.twilio_auth_token = "secret".to_string();
        assert!(!config.is_whatsapp_configured());

        config.twilio_whatsapp_from = "+14155238886".to_string();
        assert!(config.is_whatsapp_configured());
    }
}
