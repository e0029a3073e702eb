use std::sync::Arc;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use base64::{Engine as _, engine::general_purpose};
use serde_json::json;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_role_key: String,
    pub app_public_url: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            supabase_service_role_key: "test-service-role-key".to_string(),
            app_public_url: "https://app.example.com".to_string(),
        }
    }
}

impl TestConfig {
    pub fn with_supabase_url(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_service_role_key: self.supabase_service_role_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            app_public_url: self.app_public_url.clone(),
            twilio_account_sid: String::new(),
            twilio_auth_token: String::new(),
            twilio_whatsapp_from: String::new(),
            clinic_utc_offset_minutes: shared_config::DEFAULT_CLINIC_UTC_OFFSET_MINUTES,
            reminder_token_ttl_hours: shared_config::DEFAULT_REMINDER_TOKEN_TTL_HOURS,
            reschedule_window_days: shared_config::DEFAULT_RESCHEDULE_WINDOW_DAYS,
            request_timeout_secs: shared_config::DEFAULT_REQUEST_TIMEOUT_SECS,
            port: shared_config::DEFAULT_PORT,
        }
    }
    
    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
    pub clinic_id: Option<String>,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: "test@example.com".to_string(),
            role: "professional".to_string(),
            clinic_id: Some(Uuid::new_v4().to_string()),
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str, clinic_id: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
            clinic_id: clinic_id.map(str::to_string),
        }
    }

    pub fn professional(email: &str, clinic_id: &str) -> Self {
        Self::new(email, "professional", Some(clinic_id))
    }

    pub fn super_admin(email: &str) -> Self {
        Self::new(email, "super_admin", None)
    }

    pub fn guardian(email: &str) -> Self {
        Self::new(email, "legal_guardian", None)
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            clinic_id: self.clinic_id.clone(),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    /// Supabase-shaped token: the application role and clinic live in `app_metadata`.
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));
        
        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });
        
        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": "authenticated",
            "app_metadata": {
                "role": user.role,
                "clinic_id": user.clinic_id,
            },
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });
        
        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());
        
        let signing_input = format!("{}.{}", header_encoded, payload_encoded);
        
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);
        
        format!("{}.{}", signing_input, signature_encoded)
    }
    
    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }
    
    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }
    
    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

/// PostgREST row fixtures for the scheduling tables.
pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    pub fn schedule_config_row(clinic_id: &str, day_of_week: u8, start: &str, end: &str) -> serde_json::Value {
        json!({
            "clinic_id": clinic_id,
            "day_of_week": day_of_week,
            "enabled": true,
            "start_time": start,
            "end_time": end,
            "consultation_duration_minutes": 50,
            "interval_minutes": 10,
            "lunch_start": null,
            "lunch_end": null
        })
    }

    pub fn appointment_row(
        id: &str,
        clinic_id: &str,
        professional_id: &str,
        date: &str,
        start: &str,
        end: &str,
        status: &str,
    ) -> serde_json::Value {
        json!({
            "id": id,
            "clinic_id": clinic_id,
            "professional_id": professional_id,
            "patient_id": Uuid::new_v4(),
            "contract_id": null,
            "appointment_date": date,
            "start_time": start,
            "end_time": end,
            "status": status,
            "notes": null
        })
    }

    pub fn contract_row(id: &str, clinic_id: &str, professional_id: &str, patient_id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "clinic_id": clinic_id,
            "professional_id": professional_id,
            "patient_id": patient_id,
            "status": "SIGNED",
            "start_date": "2025-03-03",
            "end_date": null,
            "num_appointments": null
        })
    }
    
    pub fn error_response(message: &str, code: &str) -> serde_json::Value {
        json!({
            "message": message,
            "code": code,
            "details": null,
            "hint": null
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_config_creation() {
        let config = TestConfig::default();
        let app_config = config.to_app_config();
        
        assert_eq!(app_config.supabase_url, "http://localhost:54321");
        assert_eq!(app_config.supabase_service_role_key, "test-service-role-key");
        assert!(!app_config.supabase_jwt_secret.is_empty());
        assert!(!app_config.is_whatsapp_configured());
    }
    
    #[test]
    fn test_user_creation() {
        let user = TestUser::professional("pro@example.com", "clinic-1");
        assert_eq!(user.role, "professional");
        
        let user_model = user.to_user();
        assert!(user_model.is_professional());
        assert_eq!(user_model.clinic_id.as_deref(), Some("clinic-1"));
        assert_eq!(user_model.id, user.id);
        assert!(!TestUser::guardian("g@example.com").to_user().is_super_admin());
    }
    
    #[test]
    fn test_jwt_token_creation() {
        let user = TestUser::default();
        let token = JwtTestUtils::create_test_token(&user, "test-secret", Some(1));
        
        assert_eq!(token.split('.').count(), 3);
    }
}
