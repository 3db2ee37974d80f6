use std::sync::Arc;

use teloxide::{
  prelude::*,
  utils::{command::BotCommands, html},
};

use super::{ReplyBot, callback};
use crate::{
  prelude::*,
  state::{AppState, Services},
  sv::RegenReport,
};

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
pub enum Command {
  /// Start, optionally with a `ref_<id>` deep link
  Start(String),
  // Admin commands below - users use button interface
  Help,
  Stats,
  User(String),
  Block(String),
  Unblock(String),
  Tariffs,
  /// Enable or disable a tariff by code
  Toggle(String),
  Regen(String),
  RegenAll(String),
}

const ADMIN_HELP: &str = "\
<b>📋 Admin Commands</b>

<b>Users:</b>
/user &lt;tg_id&gt; - Show user and subscription details
/block &lt;tg_id&gt; - Block user, cancel subscriptions, revoke configs
/unblock &lt;tg_id&gt; - Unblock user

<b>Catalog:</b>
/tariffs - List all tariffs
/toggle &lt;code&gt; - Enable or disable a tariff

<b>VPN configs:</b>
/regen &lt;tg_id&gt; [force] - Re-issue configs of a user
/regenall [force] - Re-issue configs of every current subscription

<b>System:</b>
/stats - Users, subscriptions and revenue
/help - Show this message";

/// `ref_<id>` deep-link parameter.
fn referrer(param: &str) -> Option<i64> {
  param.trim().strip_prefix("ref_")?.parse().ok()
}

fn parse_force(arg: Option<&str>, usage: &str) -> Result<bool> {
  match arg {
    None => Ok(false),
    Some("force") => Ok(true),
    Some(_) => Err(Error::InvalidArgs(usage.into())),
  }
}

fn parse_user(args: &str, usage: &str) -> Result<(i64, bool)> {
  let mut parts = args.split_whitespace();
  let user = parts
    .next()
    .and_then(|id| id.parse().ok())
    .ok_or_else(|| Error::InvalidArgs(usage.into()))?;
  let force = parse_force(parts.next(), usage)?;
  Ok((user, force))
}

pub async fn handle(
  app: Arc<AppState>,
  bot: ReplyBot,
  username: Option<String>,
  cmd: Command,
) -> ResponseResult<()> {
  let sv = app.sv();

  if super::refuse_blocked(&sv.user, &bot).await {
    return Ok(());
  }

  match &cmd {
    Command::Start(param) => {
      let inviter = referrer(param);
      if let Err(err) =
        sv.user.register(bot.user_id, username.as_deref(), inviter).await
      {
        error!(user = bot.user_id, "Failed to register user: {err}");
      }
      bot.reply_with_keyboard(callback::WELCOME, callback::main_menu()).await?;
      return Ok(());
    }
    Command::Help if app.is_admin(bot.user_id) => {
      bot.reply_html(ADMIN_HELP).await?;
      return Ok(());
    }
    Command::Help => {
      bot
        .reply_html("Use /start to access the main menu with buttons.")
        .await?;
      return Ok(());
    }
    _ => {}
  }

  if app.is_admin(bot.user_id) {
    handle_admin_command(&sv, &bot, cmd).await?;
  }

  Ok(())
}

fn format_report(report: RegenReport) -> String {
  format!(
    "🔄 <b>Regeneration finished</b>\n\
    Regenerated: {}\nSkipped: {}\nFailed: {}",
    report.regenerated, report.skipped, report.failed
  )
}

async fn process_user_command(
  sv: &Services<'_>,
  bot: &ReplyBot,
  input: &str,
) -> Result<String> {
  let (user_id, _) = parse_user(input, "Usage: /user <tg_id>")?;
  let user = sv.user.by_id(user_id).await?.ok_or(Error::UserNotFound)?;
  let username = bot.infer_username(ChatId(user_id)).await;
  let now = utils::now();

  let mut text = format!(
    "👤 <b>User Info</b>\n\
    ID: <code>{}</code>\n\
    Name: {}\n\
    Registered: {}\n\
    Blocked: {}\n\
    Trial used: {}\n\
    Invited by: {}\n\
    Payments: {}\n\n\
    📅 <b>Subscriptions</b>\n",
    user.tg_user_id,
    username,
    utils::format_date(user.reg_date),
    if user.is_blocked { "yes" } else { "no" },
    if user.trial_used { "yes" } else { "no" },
    user.invited_by.map_or_else(|| "-".to_string(), |id| id.to_string()),
    sv.payment.by_user(user_id).await?.len(),
  );

  let subs = sv.subscription.by_user(user_id).await?;
  if subs.is_empty() {
    text.push_str(" <i>No subscriptions</i>\n");
  }
  for sub in subs {
    let icon = if sub.is_current(now) { "🟢" } else { "⚪" };
    let live = sv.configs.live(sub.id).await?;
    text.push_str(&format!(
      "{icon} #{} {:?}/{:?} until {} ({} live configs)\n",
      sub.id,
      sub.kind,
      sub.status,
      utils::format_date(sub.end_at),
      live.len()
    ));
    if sub.is_current(now) {
      text.push_str(&format!(
        "   ⏳ {}\n",
        utils::format_duration(sub.end_at - now)
      ));
    }
  }

  Ok(text)
}

async fn run_admin_command(
  sv: &Services<'_>,
  bot: &ReplyBot,
  cmd: Command,
) -> Result<Option<String>> {
  let text = match cmd {
    Command::Stats => format!(
      "📊 <b>Stats</b>\n\n\
      Users: {}\n\
      Current subscriptions: {}\n\
      Live configs: {}\n\
      Payments: {}\n\
      Revenue: {} ⭐",
      sv.user.count().await?,
      sv.subscription.count_active().await?,
      sv.configs.count_live().await?,
      sv.payment.count().await?,
      sv.payment.revenue().await?,
    ),

    Command::User(input) => process_user_command(sv, bot, &input).await?,

    Command::Block(input) => {
      let (user_id, _) = parse_user(&input, "Usage: /block <tg_id>")?;
      let revoked = sv.provision.block(user_id).await?;
      format!("🚫 User blocked, {revoked} configs revoked")
    }

    Command::Unblock(input) => {
      let (user_id, _) = parse_user(&input, "Usage: /unblock <tg_id>")?;
      sv.user.set_blocked(user_id, false).await?;
      "✅ User unblocked".to_string()
    }

    Command::Tariffs => {
      let mut text = String::from("<b>Tariffs:</b>\n");
      for t in sv.tariff.all().await? {
        let status = if t.is_active { "✅" } else { "❌" };
        text.push_str(&format!(
          "\n{status} <code>{}</code> {}: {} days, {} ⭐, {} device(s)",
          t.code, t.name, t.duration_days, t.price, t.allowed_devices
        ));
      }
      text
    }

    Command::Toggle(code) => {
      let code = code.trim();
      if code.is_empty() {
        return Err(Error::InvalidArgs("Usage: /toggle <code>".into()));
      }
      let tariff =
        sv.tariff.by_code(code).await?.ok_or(Error::TariffNotFound)?;
      let tariff = sv.tariff.toggle(tariff.id).await?;
      let state = if tariff.is_active { "enabled" } else { "disabled" };
      format!("Tariff <code>{}</code> {state}", tariff.code)
    }

    Command::Regen(input) => {
      let (user_id, force) =
        parse_user(&input, "Usage: /regen <tg_id> [force]")?;
      format_report(sv.provision.regenerate_user(user_id, force).await?)
    }

    Command::RegenAll(input) => {
      let usage = "Usage: /regenall [force]";
      let force = parse_force(input.split_whitespace().next(), usage)?;
      let _ = bot.reply_html("⏳ Regenerating configs...").await;
      format_report(sv.provision.regenerate_all(force).await?)
    }

    Command::Start(_) | Command::Help => return Ok(None),
  };

  Ok(Some(text))
}

async fn handle_admin_command(
  sv: &Services<'_>,
  bot: &ReplyBot,
  cmd: Command,
) -> ResponseResult<()> {
  match run_admin_command(sv, bot, cmd).await {
    Ok(Some(text)) => {
      bot.reply_html_chunked(text).await?;
    }
    Ok(None) => {}
    Err(err) => {
      bot.reply_html(format!("❌ {}", html::escape(&err.to_string()))).await?;
    }
  }
  Ok(())
}
