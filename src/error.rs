use sea_orm::{DbErr, SqlErr};

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("Database error: {0}")]
  Database(#[from] DbErr),

  #[error("User not found")]
  UserNotFound,

  #[error("User is blocked")]
  UserBlocked,

  #[error("Tariff not found")]
  TariffNotFound,

  #[error("Tariff is not available")]
  TariffInactive,

  #[error("Subscription not found")]
  SubscriptionNotFound,

  #[error("Trial already used")]
  TrialUsed,

  #[error("Active subscription already exists")]
  AlreadySubscribed,

  #[error("Invalid payment payload: {0}")]
  InvalidPayload(String),

  #[error("{0}")]
  InvalidArgs(String),

  #[error("Provider returned incomplete configs: {0:?}")]
  IncompleteProvisioning(Vec<String>),

  #[error("VPN service unavailable: {0}")]
  ProvisioningUnavailable(String),

  #[error("VPN provider error {code}: {message}")]
  Provider { code: String, message: String },
}

impl Error {
  /// Stable machine-readable code.
  pub fn code(&self) -> &str {
    match self {
      Error::Database(_) => "DATABASE_ERROR",
      Error::UserNotFound => "USER_NOT_FOUND",
      Error::UserBlocked => "USER_BLOCKED",
      Error::TariffNotFound => "TARIFF_NOT_FOUND",
      Error::TariffInactive => "TARIFF_INACTIVE",
      Error::SubscriptionNotFound => "SUBSCRIPTION_NOT_FOUND",
      Error::TrialUsed => "TRIAL_USED",
      Error::AlreadySubscribed => "ALREADY_SUBSCRIBED",
      Error::InvalidPayload(_) => "INVALID_PAYLOAD",
      Error::InvalidArgs(_) => "INVALID_ARGS",
      Error::IncompleteProvisioning(_) => "INCOMPLETE_PROVISIONING",
      Error::ProvisioningUnavailable(_) => "SERVICE_UNAVAILABLE",
      Error::Provider { code, .. } => code,
    }
  }

  pub fn user_message(&self) -> String {
    match self {
      Error::Database(_) => "Internal error, please try again later".into(),
      Error::TariffNotFound | Error::TariffInactive => {
        "This tariff is not available".into()
      }
      Error::ProvisioningUnavailable(_) => {
        "VPN service is temporarily unavailable, please try later. \
         Your payment is saved."
          .into()
      }
      Error::IncompleteProvisioning(_) | Error::Provider { .. } => {
        "Failed to issue VPN configs. Admin will contact you.".into()
      }
      Error::InvalidPayload(_) => "Invalid payment data".into(),
      other => other.to_string(),
    }
  }

  pub fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_codes_are_stable() {
    assert_eq!(Error::TariffNotFound.code(), "TARIFF_NOT_FOUND");
    assert_eq!(Error::TariffInactive.code(), "TARIFF_INACTIVE");
    assert_eq!(
      Error::IncompleteProvisioning(vec!["vless_reality".into()]).code(),
      "INCOMPLETE_PROVISIONING"
    );
    assert_eq!(
      Error::ProvisioningUnavailable("open".into()).code(),
      "SERVICE_UNAVAILABLE"
    );
    let err = Error::Provider { code: "QUOTA".into(), message: "full".into() };
    assert_eq!(err.code(), "QUOTA");
  }

  #[test]
  fn test_user_message_hides_internals() {
    let err = Error::Database(DbErr::Custom("disk I/O".into()));
    assert!(!err.user_message().contains("disk"));
    assert_eq!(Error::TrialUsed.user_message(), "Trial already used");
  }
}
