use reqwest::{
    Client, 
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, AUTHORIZATION},
    Method, StatusCode,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use shared_config::AppConfig;
use shared_models::error::AppError;

pub const PREFER_REPRESENTATION: &str = "return=representation";
pub const PREFER_MINIMAL: &str = "return=minimal";
pub const PREFER_UPSERT: &str = "resolution=merge-duplicates,return=representation";

#[derive(Error, Debug)]
pub enum SupabaseError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Unique or exclusion constraint violation reported by PostgREST.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("API error ({status}): {message}")]
    Api { status: StatusCode, message: String },

    #[error("Invalid header value: {0}")]
    InvalidHeader(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<SupabaseError> for AppError {
    fn from(err: SupabaseError) -> Self {
        match err {
            SupabaseError::Auth(msg) => AppError::Auth(msg),
            SupabaseError::NotFound(msg) => AppError::NotFound(msg),
            SupabaseError::Conflict(msg) => AppError::Conflict(msg),
            other => AppError::Database(other.to_string()),
        }
    }
}

pub type SupabaseResult<T> = Result<T, SupabaseError>;

pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
    service_role_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
            service_role_key: config.supabase_service_role_key.clone(),
        }
    }
    
    fn get_headers(&self, auth_token: Option<&str>, extra: &[(&str, &str)]) -> SupabaseResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        
        let api_key = if self.anon_key.is_empty() { &self.service_role_key } else { &self.anon_key };
        headers.insert("apikey", header_value(api_key)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        
        if let Some(token) = auth_token {
            headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", token))?);
        }

        for (name, value) in extra {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| SupabaseError::InvalidHeader(e.to_string()))?;
            headers.insert(name, header_value(value)?);
        }
        
        Ok(headers)
    }
    
    pub async fn request_with_headers<T>(&self, method: Method, path: &str,
                                         auth_token: Option<&str>, body: Option<Value>,
                                         extra_headers: &[(&str, &str)])
                                         -> SupabaseResult<T>
    where T: DeserializeOwned {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);
        
        let headers = self.get_headers(auth_token, extra_headers)?;
        
        let mut req = self.client.request(method, &url)
            .headers(headers);
            
        if let Some(body_data) = body {
            req = req.json(&body_data);
        }
        
        let response = req.send().await?;
        
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            error!("API error ({}): {}", status, text);
            
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SupabaseError::Auth(text),
                StatusCode::NOT_FOUND => SupabaseError::NotFound(text),
                StatusCode::CONFLICT => SupabaseError::Conflict(text),
                _ => SupabaseError::Api { status, message: text },
            });
        }
        
        // `return=minimal` and 204 responses carry no body
        if text.trim().is_empty() {
            return Ok(serde_json::from_value(Value::Null)?);
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// Request authenticated with the service-role key. Used by server-side
    /// flows that act on behalf of the clinic rather than a signed-in user.
    pub async fn service_request<T>(&self, method: Method, path: &str,
                                    body: Option<Value>, extra_headers: &[(&str, &str)])
                                    -> SupabaseResult<T>
    where T: DeserializeOwned {
        let key = self.service_role_key.clone();
        self.request_with_headers(method, path, Some(&key), body, extra_headers).await
    }
}

fn header_value(value: &str) -> SupabaseResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| SupabaseError::InvalidHeader(e.to_string()))
}
