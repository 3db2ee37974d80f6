use serde::{Deserialize, Serialize};

use crate::prelude::*;

/// Parameters of a provisioning request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateConfigs {
  pub user_id: i64,
  pub subscription_id: i32,
  pub allowed_devices: i32,
  pub duration_days: i64,
}

#[derive(Debug, Serialize)]
pub(super) struct CreateConfigsReq<'a> {
  pub user_id: i64,
  pub subscription_id: i32,
  pub allowed_devices: i32,
  pub duration_days: i64,
  pub obfuscation_level: &'a str,
}

impl<'a> From<&'a CreateConfigs> for CreateConfigsReq<'a> {
  fn from(params: &'a CreateConfigs) -> Self {
    Self {
      user_id: params.user_id,
      subscription_id: params.subscription_id,
      allowed_devices: params.allowed_devices,
      duration_days: params.duration_days,
      obfuscation_level: "high",
    }
  }
}

#[derive(Debug, Serialize)]
pub(super) struct RevokeConfigsReq<'a> {
  pub config_ids: &'a [String],
  pub reason: &'a str,
  pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigItem {
  pub protocol: String,
  pub config_id: String,
  pub config_text: String,
  #[serde(default)]
  pub qr_data: Option<String>,
  #[serde(default)]
  pub server_ip: Option<String>,
  #[serde(default)]
  pub server_port: Option<u16>,
  #[serde(default)]
  pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
  #[serde(default)]
  pub code: String,
  #[serde(default)]
  pub message: String,
  #[serde(default)]
  pub retry_after: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
  #[serde(default)]
  pub success: bool,
  #[serde(default)]
  pub configs: Vec<ConfigItem>,
  #[serde(default)]
  pub created_at: Option<String>,
  #[serde(default)]
  pub expires_at: Option<String>,
  #[serde(default)]
  pub error: Option<ApiError>,
}

pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";

impl ApiResponse {
  /// Payload returned while the circuit is open.
  pub fn unavailable() -> Self {
    Self {
      success: false,
      error: Some(ApiError {
        code: SERVICE_UNAVAILABLE.into(),
        message: "VPN service temporarily unavailable".into(),
        retry_after: None,
      }),
      ..Default::default()
    }
  }

  /// Converts a failed payload into the matching crate error.
  pub fn into_error(self) -> Error {
    let ApiError { code, message, .. } = self.error.unwrap_or_default();
    match code.as_str() {
      SERVICE_UNAVAILABLE => Error::ProvisioningUnavailable(message),
      "" => Error::Provider {
        code: "VPN_CONFIG_GENERATION_FAILED".into(),
        message: if message.is_empty() {
          "VPN config generation failed".into()
        } else {
          message
        },
      },
      _ => Error::Provider { code, message },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_create_response() {
    let body = r#"{
      "success": true,
      "configs": [
        {"protocol": "amneziawg", "config_id": "awg-1", "config_text": "[Interface]", "qr_data": "data:image/png;base64,AA=="},
        {"protocol": "vless_reality", "config_id": "vl-1", "config_text": "vless://x", "server_port": 443, "connection_limit": 2}
      ],
      "expires_at": "2026-11-17T00:00:00Z"
    }"#;

    let res: ApiResponse = json::from_str(body).unwrap();
    assert!(res.success);
    assert_eq!(res.configs.len(), 2);
    assert_eq!(res.configs[1].server_port, Some(443));
    assert!(res.configs[1].qr_data.is_none());
  }

  #[test]
  fn test_fallback_maps_to_unavailable() {
    assert!(matches!(
      ApiResponse::unavailable().into_error(),
      Error::ProvisioningUnavailable(_)
    ));
  }

  #[test]
  fn test_failure_without_code() {
    let res = ApiResponse { success: false, ..Default::default() };
    assert_eq!(res.into_error().code(), "VPN_CONFIG_GENERATION_FAILED");
  }

  #[test]
  fn test_request_sets_obfuscation() {
    let params = CreateConfigs {
      user_id: 7,
      subscription_id: 3,
      allowed_devices: 2,
      duration_days: 30,
    };
    let value = json::to_value(CreateConfigsReq::from(&params)).unwrap();
    assert_eq!(value["obfuscation_level"], "high");
    assert_eq!(value["duration_days"], 30);
  }
}
