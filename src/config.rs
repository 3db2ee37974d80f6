use std::{collections::HashSet, env, str::FromStr};

use crate::{
  prelude::*,
  sv::PlanChangePolicy,
  vpn::{self, BreakerSettings, RetryPolicy},
};

#[derive(Debug, Clone)]
pub struct Config {
  pub bot_token: String,
  pub bot_username: String,
  pub admins: HashSet<i64>,
  pub database_url: String,
  pub port: u16,
  pub vpn: vpn::Settings,
  pub trial_days: i64,
  pub plan_change: PlanChangePolicy,
  pub expiry_interval: Duration,
}

fn required(key: &str) -> anyhow::Result<String> {
  env::var(key).with_context(|| format!("{key} not set"))
}

fn parsed<T>(key: &str, default: T) -> anyhow::Result<T>
where
  T: FromStr,
  T::Err: std::fmt::Display,
{
  match env::var(key) {
    Ok(raw) => raw
      .trim()
      .parse()
      .map_err(|err| anyhow::anyhow!("Invalid {key} `{raw}`: {err}")),
    Err(_) => Ok(default),
  }
}

/// Accepts humantime (`15s`, `1h 30m`) or bare seconds.
fn duration(key: &str, default: Duration) -> anyhow::Result<Duration> {
  let Ok(raw) = env::var(key) else {
    return Ok(default);
  };
  let raw = raw.trim();
  if let Ok(secs) = raw.parse::<u64>() {
    return Ok(Duration::from_secs(secs));
  }
  humantime::parse_duration(raw)
    .with_context(|| format!("Invalid duration in {key}: `{raw}`"))
}

pub fn parse_admins(raw: &str) -> anyhow::Result<HashSet<i64>> {
  raw
    .split(',')
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(|id| id.parse().with_context(|| format!("Invalid admin id `{id}`")))
    .collect()
}

impl Config {
  pub fn from_env() -> anyhow::Result<Self> {
    let admins = match env::var("ADMIN_IDS") {
      Ok(raw) => parse_admins(&raw)?,
      Err(_) => HashSet::new(),
    };

    let retry = RetryPolicy::new(
      parsed("VPN_API_RETRIES", 3)?,
      duration("VPN_API_RETRY_DELAY", Duration::from_secs(2))?,
    );

    let defaults = BreakerSettings::default();
    let timeout = duration("VPN_API_TIMEOUT", Duration::from_secs(15))?;
    let breaker = BreakerSettings {
      error_threshold_percent: parsed(
        "VPN_API_ERROR_THRESHOLD",
        defaults.error_threshold_percent,
      )?,
      volume_threshold: parsed(
        "VPN_API_VOLUME_THRESHOLD",
        defaults.volume_threshold,
      )?,
      reset_timeout: duration("VPN_API_RESET_TIMEOUT", defaults.reset_timeout)?,
      rolling_window: duration(
        "VPN_API_ROLLING_WINDOW",
        defaults.rolling_window,
      )?,
      call_timeout: timeout,
    };

    let plan_change = match env::var("PLAN_CHANGE_POLICY") {
      Ok(raw) => raw.parse().map_err(anyhow::Error::msg)?,
      Err(_) => PlanChangePolicy::default(),
    };

    Ok(Self {
      bot_token: required("TELOXIDE_TOKEN")?,
      bot_username: env::var("BOT_USERNAME").unwrap_or_default(),
      admins,
      database_url: env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite:vpn.db?mode=rwc".into()),
      port: parsed("PORT", 3000)?,
      vpn: vpn::Settings {
        url: required("VPN_API_URL")?,
        token: required("VPN_API_TOKEN")?,
        timeout,
        retry,
        breaker,
      },
      trial_days: parsed("TRIAL_DAYS", 1)?,
      plan_change,
      expiry_interval: duration(
        "EXPIRY_CHECK_INTERVAL",
        Duration::from_secs(3600),
      )?,
    })
  }
}

#[cfg(test)]
impl Config {
  pub fn for_tests() -> Self {
    Self {
      bot_token: "token".into(),
      bot_username: "vpn_shop_bot".into(),
      admins: HashSet::new(),
      database_url: "sqlite::memory:".into(),
      port: 0,
      vpn: vpn::Settings {
        url: "http://127.0.0.1:9".into(),
        token: "secret".into(),
        timeout: Duration::from_secs(1),
        retry: RetryPolicy::default(),
        breaker: BreakerSettings::default(),
      },
      trial_days: 1,
      plan_change: PlanChangePolicy::default(),
      expiry_interval: Duration::from_secs(3600),
    }
  }
}
