use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const ROLE_PROFESSIONAL: &str = "professional";
pub const ROLE_SUPER_ADMIN: &str = "super_admin";

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtHeader {
    pub alg: String,
    pub typ: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub clinic_id: Option<String>,
    pub app_metadata: Option<serde_json::Value>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

impl JwtClaims {
    /// Application role, preferring `app_metadata.role` over the top-level claim
    /// (Supabase always sets the latter to "authenticated").
    pub fn app_role(&self) -> Option<String> {
        self.app_metadata_str("role").or_else(|| self.role.clone())
    }

    pub fn app_clinic_id(&self) -> Option<String> {
        self.app_metadata_str("clinic_id").or_else(|| self.clinic_id.clone())
    }

    fn app_metadata_str(&self, key: &str) -> Option<String> {
        self.app_metadata
            .as_ref()
            .and_then(|meta| meta.get(key))
            .and_then(|value| value.as_str())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub clinic_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn has_role(&self, role: &str) -> bool {
        self.role.as_deref() == Some(role)
    }

    pub fn is_super_admin(&self) -> bool {
        self.has_role(ROLE_SUPER_ADMIN)
    }

    pub fn is_professional(&self) -> bool {
        self.has_role(ROLE_PROFESSIONAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(role: Option<&str>, app_metadata: Option<serde_json::Value>) -> JwtClaims {
        JwtClaims {
            sub: "user-1".to_string(),
            exp: None,
            email: None,
            role: role.map(str::to_string),
            clinic_id: None,
            app_metadata,
            user_metadata: None,
            aud: None,
            iat: None,
        }
    }

    #[test]
    fn test_app_metadata_role_wins() {
        let claims = claims(
            Some("authenticated"),
            Some(json!({ "role": "professional", "clinic_id": "c-1" })),
        );
        assert_eq!(claims.app_role().as_deref(), Some("professional"));
        assert_eq!(claims.app_clinic_id().as_deref(), Some("c-1"));
    }

    #[test]
    fn test_top_level_claims_are_fallback() {
        let claims = claims(Some("super_admin"), None);
        assert_eq!(claims.app_role().as_deref(), Some("super_admin"));
        assert_eq!(claims.app_clinic_id(), None);
    }
}
