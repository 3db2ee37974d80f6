use std::sync::Arc;

use axum::{Json, extract::State};
use chrono::SecondsFormat;
use serde::Serialize;

use crate::{prelude::*, state::AppState, vpn};

#[derive(Debug, Serialize)]
pub struct HealthRes {
  pub status: &'static str,
  pub timestamp: String,
  pub vpn_api: vpn::State,
}

impl HealthRes {
  pub fn new(vpn_api: vpn::State) -> Self {
    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    Self { status: "ok", timestamp, vpn_api }
  }
}

pub async fn health(State(app): State<Arc<AppState>>) -> Json<HealthRes> {
  Json(HealthRes::new(app.vpn.breaker_state()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_health_body() {
    let body = json::to_value(HealthRes::new(vpn::State::HalfOpen)).unwrap();

    assert_eq!(body["status"], "ok");
    assert_eq!(body["vpn_api"], "half_open");
    assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));
  }
}
