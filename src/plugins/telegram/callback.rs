use std::sync::Arc;

use teloxide::{
  prelude::*,
  types::{InlineKeyboardButton, InlineKeyboardMarkup},
};

use super::ReplyBot;
use crate::{
  prelude::*,
  state::{AppState, Services},
  sv::Scenario,
};

/// Callback data enum - provides type-safe callback handling
#[derive(Debug, Clone, PartialEq)]
pub enum Callback {
  Buy,
  Tariff(i32),
  MyVpn,
  Configs,
  Trial,
  Invite,
  Back,
}

impl Callback {
  /// Serialize callback to string for Telegram API
  pub fn to_data(&self) -> String {
    match self {
      Callback::Buy => "buy".to_string(),
      Callback::Tariff(id) => format!("tariff:{id}"),
      Callback::MyVpn => "my_vpn".to_string(),
      Callback::Configs => "configs".to_string(),
      Callback::Trial => "trial".to_string(),
      Callback::Invite => "invite".to_string(),
      Callback::Back => "back".to_string(),
    }
  }

  /// Parse callback from string received from Telegram API
  pub fn from_data(data: &str) -> Option<Self> {
    match data {
      "buy" => Some(Callback::Buy),
      "my_vpn" => Some(Callback::MyVpn),
      "configs" => Some(Callback::Configs),
      "trial" => Some(Callback::Trial),
      "invite" => Some(Callback::Invite),
      "back" => Some(Callback::Back),
      _ => {
        let id = data.strip_prefix("tariff:")?;
        id.parse().ok().map(Callback::Tariff)
      }
    }
  }
}

pub const WELCOME: &str = "<b>🛡 Fast and private VPN</b>\n\n\
  VLESS Reality and AmneziaWG configs for all your devices.\n\
  Use the buttons below to navigate.";

pub fn main_menu() -> InlineKeyboardMarkup {
  let button = |text: &str, cb: Callback| {
    vec![InlineKeyboardButton::callback(text.to_string(), cb.to_data())]
  };

  InlineKeyboardMarkup::new(vec![
    button("💳 Buy VPN", Callback::Buy),
    button("🔐 My VPN", Callback::MyVpn),
    button("📥 Get configs", Callback::Configs),
    button("🆓 Free trial", Callback::Trial),
    button("🤝 Invite a friend", Callback::Invite),
  ])
}

fn back_keyboard() -> InlineKeyboardMarkup {
  InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
    "« Back to Menu",
    Callback::Back.to_data(),
  )]])
}

pub async fn handle(
  app: Arc<AppState>,
  bot: ReplyBot,
  data: &str,
) -> ResponseResult<()> {
  let sv = app.sv();

  if super::refuse_blocked(&sv.user, &bot).await {
    return Ok(());
  }

  let Some(callback) = Callback::from_data(data) else {
    return Ok(());
  };

  match callback {
    Callback::Buy => handle_buy(&sv, &bot).await?,
    Callback::Tariff(id) => handle_tariff(&sv, &bot, id).await?,
    Callback::MyVpn => handle_my_vpn(&sv, &bot).await?,
    Callback::Configs => handle_configs(&sv, &bot).await?,
    Callback::Trial => handle_trial(&sv, &bot).await?,
    Callback::Invite => {
      let invited = sv.user.invited_count(bot.user_id).await.unwrap_or(0);
      let text = format!(
        "🤝 <b>Invite friends</b>\n\n\
        Share your personal link:\n\
        <code>https://t.me/{}?start=ref_{}</code>\n\n\
        Friends invited: {invited}",
        app.config.bot_username, bot.user_id
      );
      bot.edit_with_keyboard(text, back_keyboard()).await?;
    }
    Callback::Back => {
      bot.edit_with_keyboard(WELCOME, main_menu()).await?;
    }
  }

  Ok(())
}

async fn handle_buy(sv: &Services<'_>, bot: &ReplyBot) -> ResponseResult<()> {
  let tariffs = match sv.tariff.for_sale().await {
    Ok(tariffs) if !tariffs.is_empty() => tariffs,
    Ok(_) => {
      bot
        .edit_with_keyboard("No tariffs available right now.", back_keyboard())
        .await?;
      return Ok(());
    }
    Err(err) => {
      error!("Failed to load tariffs: {err}");
      bot.edit_with_keyboard(err.user_message(), back_keyboard()).await?;
      return Ok(());
    }
  };

  let mut text = String::from("💳 <b>Choose a plan</b>\n");
  let mut rows = Vec::new();
  for tariff in &tariffs {
    text.push_str(&format!(
      "\n<b>{}</b>: {} days, {} device(s), {} ⭐",
      tariff.name, tariff.duration_days, tariff.allowed_devices, tariff.price
    ));
    rows.push(vec![InlineKeyboardButton::callback(
      format!("{} - {} ⭐", tariff.name, tariff.price),
      Callback::Tariff(tariff.id).to_data(),
    )]);
  }
  rows.push(vec![InlineKeyboardButton::callback(
    "« Back to Menu",
    Callback::Back.to_data(),
  )]);

  bot.edit_with_keyboard(text, InlineKeyboardMarkup::new(rows)).await
}

/// What paying for a tariff will do to the current subscription.
fn scenario_notice(scenario: Scenario) -> Option<&'static str> {
  match scenario {
    Scenario::NewUser => None,
    Scenario::Renew => Some("The payment extends your current subscription."),
    Scenario::Upgrade | Scenario::Downgrade | Scenario::CrossPurchase => Some(
      "⚠️ The payment replaces your current plan. Its remaining time and \
      configs will be dropped.",
    ),
  }
}

async fn handle_tariff(
  sv: &Services<'_>,
  bot: &ReplyBot,
  id: i32,
) -> ResponseResult<()> {
  let tariff = match sv.tariff.by_id(id).await {
    Ok(Some(tariff)) if tariff.is_active => tariff,
    _ => {
      let text = Error::TariffInactive.user_message();
      return bot.edit_with_keyboard(text, back_keyboard()).await;
    }
  };

  let Some(amount) = super::invoice_amount(&tariff) else {
    error!(tariff = tariff.id, price = tariff.price, "Unpayable price");
    let text = Error::TariffInactive.user_message();
    return bot.edit_with_keyboard(text, back_keyboard()).await;
  };

  match sv.subscription.determine_scenario(bot.user_id, tariff.id).await {
    Ok(scenario) => {
      if let Some(notice) = scenario_notice(scenario) {
        bot.reply_html(notice).await?;
      }
    }
    Err(err) => warn!(user = bot.user_id, "Scenario preview failed: {err}"),
  }

  bot.send_invoice(&tariff, amount).await
}

async fn handle_my_vpn(
  sv: &Services<'_>,
  bot: &ReplyBot,
) -> ResponseResult<()> {
  let text = match sv.subscription.current_with_tariff(bot.user_id).await {
    Ok(Some((sub, tariff))) => {
      let plan = tariff.map_or_else(|| "Trial".to_string(), |t| t.name);
      let days = utils::days_left(sub.end_at, utils::now());
      format!(
        "🔐 <b>My VPN</b>\n\n\
        <b>Plan:</b> {plan}\n\
        <b>Active until:</b> {}\n\
        <b>Days left:</b> {days}\n\
        <b>Devices:</b> {}",
        utils::format_date(sub.end_at),
        sub.allowed_devices
      )
    }
    Ok(None) => "You have no active subscription.".to_string(),
    Err(err) => err.user_message(),
  };

  bot.edit_with_keyboard(text, back_keyboard()).await
}

async fn handle_configs(
  sv: &Services<'_>,
  bot: &ReplyBot,
) -> ResponseResult<()> {
  match sv.provision.stored(bot.user_id).await {
    Ok(Some(delivery)) if !delivery.configs.is_empty() => {
      bot.send_configs(&delivery.configs).await?;
    }
    Ok(Some(_)) => {
      bot
        .reply_with_keyboard(
          "Your configs are not ready yet. Admin will contact you.",
          back_keyboard(),
        )
        .await?;
    }
    Ok(None) => {
      bot
        .reply_with_keyboard(
          "You have no active subscription.",
          back_keyboard(),
        )
        .await?;
    }
    Err(err) => {
      bot.reply_with_keyboard(err.user_message(), back_keyboard()).await?;
    }
  }
  Ok(())
}

async fn handle_trial(sv: &Services<'_>, bot: &ReplyBot) -> ResponseResult<()> {
  match sv.provision.trial(bot.user_id).await {
    Ok(delivery) => {
      let text = format!(
        "🎉 <b>Trial activated!</b>\n\nActive until: {}",
        utils::format_date(delivery.subscription.end_at)
      );
      bot.reply_html(text).await?;
      bot.send_configs(&delivery.configs).await?;
    }
    Err(err) => {
      warn!(user = bot.user_id, code = err.code(), "Trial refused: {err}");
      bot.reply_with_keyboard(err.user_message(), back_keyboard()).await?;
    }
  }
  Ok(())
}
