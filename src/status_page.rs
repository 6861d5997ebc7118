//! Liveness and readiness JSON endpoints, answered before path resolution.

use serde::Serialize;

pub const HEALTH_TARGET: &str = "/health";
pub const READY_TARGET: &str = "/ready";

pub const STATUS_CONTENT_TYPE: &str = "application/json; charset=utf-8";

#[derive(Serialize)]
struct StatusReport<'a> {
    status: &'a str,
    server: &'a str,
}

fn report(status: &str) -> Vec<u8> {
    serde_json::to_vec(&StatusReport {
        status,
        server: crate::response::SERVER_NAME,
    })
    .unwrap_or_else(|_| br#"{"status":"error"}"#.to_vec())
}

pub fn health_body() -> Vec<u8> {
    report("healthy")
}

pub fn ready_body() -> Vec<u8> {
    report("ready")
}
