use reqwest::{Client, header::RETRY_AFTER};
use serde::Serialize;
use uuid::Uuid;

use super::{
  Provider,
  breaker::{BreakerSettings, CircuitBreaker, State},
  retry::{RetryPolicy, Verdict},
  types::{
    ApiResponse, ConfigItem, CreateConfigs, CreateConfigsReq, RevokeConfigsReq,
  },
};
use crate::prelude::*;

#[derive(Debug, Clone)]
pub struct Settings {
  pub url: String,
  pub token: String,
  /// Per-request network timeout
  pub timeout: Duration,
  pub retry: RetryPolicy,
  pub breaker: BreakerSettings,
}

pub struct VpnApi {
  http: Client,
  base_url: String,
  token: String,
  retry: RetryPolicy,
  breaker: CircuitBreaker,
}

impl VpnApi {
  pub fn new(settings: Settings) -> anyhow::Result<Self> {
    let http = Client::builder()
      .timeout(settings.timeout)
      .build()
      .context("Failed to build VPN API client")?;

    Ok(Self {
      http,
      base_url: settings.url.trim_end_matches('/').to_string(),
      token: settings.token,
      retry: settings.retry,
      breaker: CircuitBreaker::new("VPN-API", settings.breaker),
    })
  }

  async fn fire<B: Serialize + Sync>(
    &self,
    endpoint: &str,
    body: &B,
  ) -> Result<ApiResponse> {
    match self.breaker.call(self.send_with_retry(endpoint, body)).await {
      Some(result) => result,
      None => {
        warn!(endpoint, "VPN API circuit breaker OPEN - returning fallback");
        Ok(ApiResponse::unavailable())
      }
    }
  }

  async fn send_with_retry<B: Serialize + Sync>(
    &self,
    endpoint: &str,
    body: &B,
  ) -> Result<ApiResponse> {
    let url = format!("{}/api/v1{}", self.base_url, endpoint);
    let mut attempt = 0;

    loop {
      attempt += 1;
      let request_id = Uuid::new_v4().to_string();

      let sent = self
        .http
        .post(&url)
        .bearer_auth(&self.token)
        .header("X-Request-Id", &request_id)
        .json(body)
        .send()
        .await;

      let response = match sent {
        Ok(response) => response,
        Err(err) => {
          error!(
            endpoint,
            attempt,
            %request_id,
            "VPN API request failed: {err}"
          );
          if !self.retry.can_retry(attempt) {
            return Err(Error::ProvisioningUnavailable(err.to_string()));
          }
          time::sleep(self.retry.backoff(attempt)).await;
          continue;
        }
      };

      let status = response.status();
      match self.retry.classify(status) {
        Verdict::Congested => {
          let retry_after =
            response.headers().get(RETRY_AFTER).and_then(|v| v.to_str().ok());
          let delay = self.retry.congestion_delay(attempt, retry_after);
          warn!(
            endpoint,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "VPN API 503, retrying after delay"
          );
          if !self.retry.can_retry(attempt) {
            return Err(Error::ProvisioningUnavailable(
              "VPN API is overloaded".into(),
            ));
          }
          time::sleep(delay).await;
          continue;
        }
        Verdict::Transient => {
          error!(endpoint, attempt, %request_id, %status, "VPN API attempt failed");
          if !self.retry.can_retry(attempt) {
            return Err(Error::ProvisioningUnavailable(format!(
              "VPN API responded {status}"
            )));
          }
          time::sleep(self.retry.backoff(attempt)).await;
          continue;
        }
        Verdict::Success | Verdict::Fatal => {}
      }

      let payload = match response.json::<ApiResponse>().await {
        Ok(payload) => payload,
        Err(err) if status.is_success() => {
          error!(endpoint, attempt, %request_id, "VPN API sent bad body: {err}");
          if !self.retry.can_retry(attempt) {
            return Err(Error::ProvisioningUnavailable(err.to_string()));
          }
          time::sleep(self.retry.backoff(attempt)).await;
          continue;
        }
        Err(_) => ApiResponse::default(),
      };

      if status.is_success() && payload.success {
        return Ok(payload);
      }

      let (code, message) = match payload.error {
        Some(err) if !err.code.is_empty() => (err.code, err.message),
        Some(err) => ("VPN_API_ERROR".into(), err.message),
        None => ("VPN_API_ERROR".into(), format!("VPN API error {status}")),
      };
      error!(endpoint, %request_id, %status, %code, "VPN API rejected request");
      return Err(Error::Provider { code, message });
    }
  }
}

#[async_trait]
impl Provider for VpnApi {
  async fn create_configs(
    &self,
    params: CreateConfigs,
  ) -> Result<Vec<ConfigItem>> {
    let body = CreateConfigsReq::from(&params);
    let res = self.fire("/configs/create", &body).await?;

    if !res.success {
      return Err(res.into_error());
    }

    Ok(res.configs)
  }

  async fn revoke_configs(&self, config_ids: &[String], reason: &str) {
    if config_ids.is_empty() {
      return;
    }

    let body = RevokeConfigsReq {
      config_ids,
      reason,
      timestamp: Utc::now().to_rfc3339(),
    };

    match self.fire("/configs/revoke", &body).await {
      Ok(res) if res.success => {
        debug!(?config_ids, reason, "Configs revoked via VPN API");
      }
      Ok(res) => {
        error!(?config_ids, error = ?res.error, "Failed to revoke configs via VPN API");
      }
      Err(err) => {
        error!(?config_ids, "Failed to revoke configs via VPN API: {err}");
      }
    }
  }

  fn breaker_state(&self) -> State {
    self.breaker.state()
  }
}

#[cfg(test)]
mod tests {
  use json::json;
  use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path},
  };

  use super::*;

  fn settings(url: String) -> Settings {
    Settings {
      url,
      token: "secret".into(),
      timeout: Duration::from_secs(2),
      retry: RetryPolicy::new(3, Duration::from_millis(1)),
      breaker: BreakerSettings {
        volume_threshold: 2,
        call_timeout: Duration::from_secs(5),
        ..Default::default()
      },
    }
  }

  fn params() -> CreateConfigs {
    CreateConfigs {
      user_id: 42,
      subscription_id: 7,
      allowed_devices: 1,
      duration_days: 30,
    }
  }

  fn ok_body() -> json::Value {
    json!({
      "success": true,
      "configs": [
        {"protocol": "vless_reality", "config_id": "vl-1", "config_text": "vless://a"},
        {"protocol": "amneziawg", "config_id": "awg-1", "config_text": "[Interface]"}
      ]
    })
  }

  #[tokio::test]
  async fn test_create_configs() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/v1/configs/create"))
      .and(header("authorization", "Bearer secret"))
      .and(body_partial_json(json!({
        "user_id": 42,
        "subscription_id": 7,
        "obfuscation_level": "high"
      })))
      .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
      .expect(1)
      .mount(&server)
      .await;

    let api = VpnApi::new(settings(server.uri())).unwrap();
    let configs = api.create_configs(params()).await.unwrap();

    assert_eq!(configs.len(), 2);
    assert_eq!(configs[0].config_id, "vl-1");
  }

  #[tokio::test]
  async fn test_retries_after_503() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/v1/configs/create"))
      .respond_with(ResponseTemplate::new(503).insert_header("Retry-After", "0"))
      .up_to_n_times(1)
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/api/v1/configs/create"))
      .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
      .expect(1)
      .mount(&server)
      .await;

    let api = VpnApi::new(settings(server.uri())).unwrap();
    let configs = api.create_configs(params()).await.unwrap();

    assert_eq!(configs.len(), 2);
    assert_eq!(api.breaker_state(), State::Closed);
  }

  #[tokio::test]
  async fn test_503_waits_for_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .respond_with(ResponseTemplate::new(503).insert_header("Retry-After", "1"))
      .up_to_n_times(1)
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
      .expect(1)
      .mount(&server)
      .await;

    let api = VpnApi::new(settings(server.uri())).unwrap();
    let started = time::Instant::now();
    api.create_configs(params()).await.unwrap();

    // backoff alone would be a millisecond
    assert!(started.elapsed() >= Duration::from_secs(1));
  }

  #[tokio::test]
  async fn test_stalled_requests_time_out_and_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_json(ok_body())
          .set_delay(Duration::from_millis(500)),
      )
      .mount(&server)
      .await;

    let api = VpnApi::new(Settings {
      timeout: Duration::from_millis(100),
      ..settings(server.uri())
    })
    .unwrap();
    let err = api.create_configs(params()).await.unwrap_err();

    assert!(matches!(err, Error::ProvisioningUnavailable(_)));
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
  }

  #[tokio::test]
  async fn test_fatal_status_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .respond_with(ResponseTemplate::new(400).set_body_json(json!({
        "success": false,
        "error": {"code": "INVALID_DEVICES", "message": "too many devices"}
      })))
      .expect(1)
      .mount(&server)
      .await;

    let api = VpnApi::new(settings(server.uri())).unwrap();
    let err = api.create_configs(params()).await.unwrap_err();

    assert_eq!(err.code(), "INVALID_DEVICES");
  }

  #[tokio::test]
  async fn test_success_false_payload_is_typed_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "success": false,
        "error": {"code": "NO_CAPACITY", "message": "no free slots"}
      })))
      .expect(1)
      .mount(&server)
      .await;

    let api = VpnApi::new(settings(server.uri())).unwrap();
    let err = api.create_configs(params()).await.unwrap_err();

    assert!(matches!(err, Error::Provider { ref code, .. } if code == "NO_CAPACITY"));
  }

  #[tokio::test]
  async fn test_transient_errors_escalate_after_bound() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .respond_with(ResponseTemplate::new(502))
      .expect(3)
      .mount(&server)
      .await;

    let api = VpnApi::new(settings(server.uri())).unwrap();
    let err = api.create_configs(params()).await.unwrap_err();

    assert!(matches!(err, Error::ProvisioningUnavailable(_)));
  }

  #[tokio::test]
  async fn test_open_breaker_skips_network() {
    let server = MockServer::start().await;
    // two failed calls of three attempts each trip the breaker
    Mock::given(method("POST"))
      .respond_with(ResponseTemplate::new(500))
      .expect(6)
      .mount(&server)
      .await;

    let api = VpnApi::new(settings(server.uri())).unwrap();
    api.create_configs(params()).await.unwrap_err();
    api.create_configs(params()).await.unwrap_err();
    assert_eq!(api.breaker_state(), State::Open);

    let err = api.create_configs(params()).await.unwrap_err();
    assert_eq!(err.code(), "SERVICE_UNAVAILABLE");
  }

  #[tokio::test]
  async fn test_revoke_failure_is_swallowed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/v1/configs/revoke"))
      .and(body_partial_json(json!({"config_ids": ["a", "b"], "reason": "test"})))
      .respond_with(ResponseTemplate::new(404))
      .expect(1)
      .mount(&server)
      .await;

    let api = VpnApi::new(settings(server.uri())).unwrap();
    api.revoke_configs(&["a".into(), "b".into()], "test").await;
  }

  #[tokio::test]
  async fn test_revoke_nothing_is_noop() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .respond_with(ResponseTemplate::new(200))
      .expect(0)
      .mount(&server)
      .await;

    let api = VpnApi::new(settings(server.uri())).unwrap();
    api.revoke_configs(&[], "test").await;
  }
}
