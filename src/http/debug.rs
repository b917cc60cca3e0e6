//! `GET /_debug`: runtime information for operators.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct DebugInfo {
    pub server: ServerInfo,
    pub ip: IpInfo,
    pub http: HttpInfo,
    pub tls: TlsInfo,
}

#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub hostname: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct IpInfo {
    pub listen_addr: String,
}

#[derive(Debug, Serialize)]
pub struct HttpInfo {
    pub protocol: String,
    pub content_types: Vec<String>,
    pub registered_types: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct TlsInfo {
    pub active: bool,
    pub termination: String,
}

pub async fn handle(State(state): State<AppState>) -> Json<DebugInfo> {
    let config = state.engine.config();

    Json(DebugInfo {
        server: ServerInfo {
            hostname: config.hostname.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        ip: IpInfo {
            listen_addr: config.listen_addr.clone(),
        },
        http: HttpInfo {
            protocol: "HTTP/1.1".to_string(),
            content_types: vec![
                "application/json".to_string(),
                "text/event-stream".to_string(),
            ],
            registered_types: state.engine.registry().names(),
        },
        tls: TlsInfo {
            // The listener is plaintext; TLS belongs to a fronting proxy.
            active: false,
            termination: "external".to_string(),
        },
    })
}
