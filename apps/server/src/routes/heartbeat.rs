use actix_web::{HttpResponse, post, web};
use chrono::Utc;
use pulse_service::database::Database;
use pulse_service::database::models::HeartbeatReceipt;
use serde_json::json;
use uuid::Uuid;

use crate::error::AppError;

macros_utils::routes! {
    route heartbeat_route,
}

/// Record a heartbeat ping for a heartbeat monitor
#[post("/monitors/{id}/heartbeat")]
pub async fn heartbeat_route(
    path: web::Path<String>,
    database: web::Data<dyn Database>,
) -> Result<HttpResponse, AppError> {
    let raw = path.into_inner();
    let monitor_id = Uuid::parse_str(&raw).map_err(|_| AppError::BadRequest(format!("Invalid monitor id: {raw}")))?;

    let received_at = Utc::now();
    match database.record_heartbeat(monitor_id, received_at).await? {
        HeartbeatReceipt::Recorded => {
            tracing::debug!(%monitor_id, "Heartbeat received");
            Ok(HttpResponse::Ok().json(json!({
                "monitor_id": monitor_id,
                "received_at": received_at,
            })))
        }
        HeartbeatReceipt::NotFound => Err(AppError::NotFound(format!("Monitor {monitor_id} not found"))),
        HeartbeatReceipt::Inactive => Err(AppError::Conflict(format!("Monitor {monitor_id} is not active"))),
        HeartbeatReceipt::NotHeartbeat => {
            Err(AppError::BadRequest(format!("Monitor {monitor_id} is not a heartbeat monitor")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::{App, test};
    use pulse_service::config::Config;
    use pulse_service::database::models::{Monitor, MonitorType};
    use std::sync::Arc;

    async fn store(dir: &tempfile::TempDir) -> Arc<dyn Database> {
        let mut config = Config::default();
        config.database.path = dir.path().join("heartbeat.db").to_string_lossy().into_owned();
        pulse_service::connect_store(&config).await.unwrap()
    }

    async fn post(database: Arc<dyn Database>, id: &str) -> (StatusCode, serde_json::Value) {
        let app = test::init_service(App::new().app_data(web::Data::from(database)).configure(routes)).await;
        let request = test::TestRequest::post().uri(&format!("/monitors/{id}/heartbeat")).to_request();
        let response = test::call_service(&app, request).await;
        let status = response.status();
        let body: serde_json::Value = test::read_body_json(response).await;
        (status, body)
    }

    #[actix_web::test]
    async fn test_heartbeat_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let database = store(&dir).await;
        let monitor = Monitor::new(Uuid::new_v4(), "heartbeat", MonitorType::Heartbeat);
        database.insert_monitor(&monitor).await.unwrap();

        let (status, body) = post(database.clone(), &monitor.id.to_string()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["monitor_id"], monitor.id.to_string());

        let stored = database.get_monitor(monitor.id).await.unwrap().unwrap();
        assert!(stored.last_checked_at.is_some());
    }

    #[actix_web::test]
    async fn test_heartbeat_error_statuses() {
        let dir = tempfile::tempdir().unwrap();
        let database = store(&dir).await;

        let http = Monitor::new(Uuid::new_v4(), "https://example.com", MonitorType::Http);
        let mut inactive = Monitor::new(Uuid::new_v4(), "heartbeat", MonitorType::Heartbeat);
        inactive.is_active = false;
        database.insert_monitor(&http).await.unwrap();
        database.insert_monitor(&inactive).await.unwrap();

        let (status, _) = post(database.clone(), &Uuid::new_v4().to_string()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = post(database.clone(), &inactive.id.to_string()).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = post(database.clone(), &http.id.to_string()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("not a heartbeat monitor"));

        let (status, _) = post(database, "not-a-uuid").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
