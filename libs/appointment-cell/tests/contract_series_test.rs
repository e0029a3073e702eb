use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::NaiveDate;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use appointment_cell::models::*;
use appointment_cell::router::{appointment_routes, AppointmentCellState};
use appointment_cell::services::reminder::NoopReminderSender;
use appointment_cell::services::reservation::InProcessSlotReservation;
use appointment_cell::store::InMemorySchedulingStore;
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

struct SeriesApp {
    router: Router,
    store: Arc<InMemorySchedulingStore>,
    token: String,
    contract_id: Uuid,
}

/// A contract for three Tuesdays in March 2025 with one weekly rule at 09:00.
async fn series_app() -> SeriesApp {
    let config = TestConfig::default();
    let store = Arc::new(InMemorySchedulingStore::new());
    let clinic = Uuid::new_v4();
    let professional = TestUser::professional("pro@example.com", &clinic.to_string());
    let contract_id = Uuid::new_v4();

    store
        .insert_contract(Contract {
            id: contract_id,
            status: ContractStatus::Signed,
            clinic_id: clinic,
            professional_id: Uuid::parse_str(&professional.id).unwrap(),
            patient_id: Uuid::new_v4(),
            start_date: NaiveDate::from_ymd_opt(2025, 3, 3),
            end_date: NaiveDate::from_ymd_opt(2025, 3, 24),
            num_appointments: None,
        })
        .await;
    store
        .insert_rule(contract_id, 2, wall_clock::parse("09:00").unwrap())
        .await;

    let state = AppointmentCellState::with_parts(
        config.to_arc(),
        store.clone(),
        Arc::new(InProcessSlotReservation::new()),
        Arc::new(NoopReminderSender),
    );

    SeriesApp {
        router: appointment_routes(state),
        store,
        token: JwtTestUtils::create_test_token(&professional, &config.jwt_secret, Some(1)),
        contract_id,
    }
}

impl SeriesApp {
    async fn post(&self, action: &str, body: Option<Value>) -> (StatusCode, Value) {
        let uri = format!("/contracts/{}/{}", self.contract_id, action);
        let builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token));
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn statuses(&self) -> Vec<(NaiveDate, AppointmentStatus)> {
        let mut rows: Vec<_> = self
            .store
            .appointments_for_contract(self.contract_id)
            .await
            .into_iter()
            .map(|a| (a.appointment_date, a.status))
            .collect();
        rows.sort_by_key(|(date, _)| *date);
        rows
    }
}

fn d(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
}

#[tokio::test]
async fn test_series_from_generation_to_cancellation() {
    let app = series_app().await;

    let (status, summary) = app
        .post("generate", Some(json!({ "initial_status": "PRE_AGENDADO" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(summary["created"], 3);
    assert_eq!(summary["end_date"], "2025-03-24");
    assert_eq!(
        app.statuses().await,
        vec![
            (d("2025-03-04"), AppointmentStatus::PreAgendado),
            (d("2025-03-11"), AppointmentStatus::PreAgendado),
            (d("2025-03-18"), AppointmentStatus::PreAgendado),
        ]
    );

    let (status, promoted) = app.post("promote", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(promoted["status"], "AGENDADO");
    assert_eq!(promoted["affected_ids"].as_array().unwrap().len(), 3);

    let (status, ended) = app.post("end", Some(json!({ "end_date": "2025-03-11" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ended["affected_ids"].as_array().unwrap().len(), 1);
    assert_eq!(
        app.statuses().await,
        vec![
            (d("2025-03-04"), AppointmentStatus::Agendado),
            (d("2025-03-11"), AppointmentStatus::Agendado),
            (d("2025-03-18"), AppointmentStatus::SeriesEnded),
        ]
    );

    let contract = app.store.contract(app.contract_id).await.unwrap();
    assert_eq!(contract.status, ContractStatus::Ended);
    assert_eq!(contract.end_date, Some(d("2025-03-11")));

    let (status, _) = app.post("end", Some(json!({ "end_date": "2025-03-04" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, cancelled) = app.post("cancel", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["affected_ids"].as_array().unwrap().len(), 3);

    let (status, again) = app.post("cancel", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["affected_ids"], json!([]));
}

#[tokio::test]
async fn test_generation_defaults_to_confirmed() {
    let app = series_app().await;

    let (status, summary) = app.post("generate", None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(summary["created"], 3);
    assert!(app
        .statuses()
        .await
        .iter()
        .all(|(_, s)| *s == AppointmentStatus::Confirmed));
}

#[tokio::test]
async fn test_generation_rejects_bad_input_without_writing() {
    let app = series_app().await;

    let (status, _) = app
        .post("generate", Some(json!({ "initial_status": "CANCELLED" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post("generate", Some(json!({ "initial_status": "MAYBE" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post("end", Some(json!({ "end_date": "11/03/2025" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(app.statuses().await.is_empty());
}

#[tokio::test]
async fn test_capped_generation_stops_at_count() {
    let app = series_app().await;

    let (status, summary) = app
        .post("generate", Some(json!({ "max_appointments": 2 })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(summary["created"], 2);
    let dates: Vec<_> = app.statuses().await.into_iter().map(|(date, _)| date).collect();
    assert_eq!(dates, vec![d("2025-03-04"), d("2025-03-11")]);
}

#[tokio::test]
async fn test_unsigned_contract_cannot_grow_or_end() {
    let app = series_app().await;
    let signed = app.store.contract(app.contract_id).await.unwrap();
    let pending = Contract {
        status: ContractStatus::Pending,
        ..signed
    };
    app.store.insert_contract(pending.clone()).await;

    let (status, body) = app.post("generate", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("PENDING"));

    let (status, _) = app.post("end", Some(json!({ "end_date": "2025-03-11" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    assert!(app.statuses().await.is_empty());
    assert_eq!(app.store.contract(app.contract_id).await.unwrap(), pending);
}

#[tokio::test]
async fn test_generation_collision_stores_nothing() {
    let app = series_app().await;
    let contract = app.store.contract(app.contract_id).await.unwrap();
    let start = wall_clock::parse("09:00").unwrap();
    let walk_in = Appointment {
        id: Uuid::new_v4(),
        clinic_id: contract.clinic_id,
        professional_id: contract.professional_id,
        patient_id: Uuid::new_v4(),
        contract_id: None,
        appointment_date: d("2025-03-11"),
        start_time: start,
        end_time: add_minutes(start, 50).unwrap(),
        status: AppointmentStatus::Confirmed,
        notes: None,
    };
    app.store.insert_appointment(walk_in.clone()).await;

    // The second Tuesday clashes, so the first and third are not kept either.
    let (status, _) = app.post("generate", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(app.statuses().await.is_empty());
    assert_eq!(app.store.appointment(walk_in.id).await.unwrap(), walk_in);
}

#[tokio::test]
async fn test_generation_write_failure_stores_nothing() {
    let app = series_app().await;
    app.store.set_fail_writes(true).await;

    let (status, _) = app.post("generate", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    app.store.set_fail_writes(false).await;
    assert!(app.statuses().await.is_empty());
}
