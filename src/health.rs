use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let config = &state.config;
    let model = state.sessions.model();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "model": {
            "name": model.name,
            "source": model.source,
            "sample_rate": model.sample_rate
        },
        "connections": {
            "active": state.connections.active(),
            "total": state.connections.total()
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::session::SessionManager;
    use crate::testing::{RecordingObserver, ScriptedFactory};
    use actix_web::{test, App};
    use std::sync::Arc;

    #[actix_web::test]
    async fn test_health_reports_model_and_connections() {
        let config = AppConfig::default();
        let sessions = SessionManager::new(
            Arc::new(ScriptedFactory::new()),
            Arc::new(RecordingObserver::default()),
            config.session.clone(),
        );
        let state = AppState::new(config, sessions);
        state.connections.connection_opened();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"]["port"], 2700);
        assert_eq!(body["model"]["name"], "scripted");
        assert_eq!(body["model"]["sample_rate"], 16_000);
        assert_eq!(body["connections"]["active"], 1);
        assert_eq!(body["connections"]["total"], 1);
    }
}
