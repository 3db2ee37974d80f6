mod callback;
mod command;

use std::sync::Arc;

use command::Command;
use teloxide::{
  Bot,
  dispatching::{Dispatcher, HandlerExt, UpdateFilterExt},
  prelude::*,
  types::{
    CallbackQuery, ChatId, InlineKeyboardMarkup, InputFile, LabeledPrice,
    Message, MessageId, ParseMode, PreCheckoutQuery, Update,
  },
  utils::html,
};
use tokio::task::JoinHandle;

use crate::{
  entity::{tariff, vpn_config},
  prelude::*,
  state::AppState,
  sv::{self, PaymentEvent, PurchaseOutcome, Scenario, payment},
};

pub struct Plugin;

#[async_trait]
impl super::Plugin for Plugin {
  async fn start(&self, app: Arc<AppState>) -> anyhow::Result<()> {
    run_bot(app).await;
    Ok(())
  }
}

pub async fn run_bot(app: Arc<AppState>) {
  info!("Starting Telegram bot...");

  let bot = app.bot.clone();

  let handler = teloxide::dptree::entry()
    .branch(Update::filter_pre_checkout_query().endpoint({
      let app = app.clone();
      move |bot: Bot, query: PreCheckoutQuery| {
        let app = app.clone();
        pre_checkout(app, bot, query)
      }
    }))
    .branch(
      Update::filter_message()
        .filter(|msg: Message| msg.successful_payment().is_some())
        .endpoint({
          let app = app.clone();
          move |bot: Bot, msg: Message| {
            let app = app.clone();
            successful_payment(app, bot, msg)
          }
        }),
    )
    .branch(Update::filter_message().filter_command::<Command>().endpoint({
      let app = app.clone();
      move |bot: Bot, msg: Message, cmd: Command| {
        let app = app.clone();
        let username = msg.from.as_ref().and_then(|u| u.username.clone());
        let bot = ReplyBot::new(bot, sender(&msg), msg.chat.id, msg.id);
        command::handle(app, bot, username, cmd)
      }
    }))
    .branch(Update::filter_callback_query().endpoint({
      let app = app.clone();
      move |bot: Bot, query: CallbackQuery| {
        let app = app.clone();
        callback_handle(app, bot, query)
      }
    }));

  Dispatcher::builder(bot, handler).build().dispatch().await;
}

fn sender(msg: &Message) -> i64 {
  msg.from.as_ref().map_or(msg.chat.id.0, |user| user.id.0 as i64)
}

/// Checks the payload format and that the payer is a known, unblocked user,
/// so every accepted charge can be recorded.
async fn checkout_verdict(
  sv: &sv::User<'_>,
  tg_user_id: i64,
  payload: &str,
) -> Result<()> {
  payment::parse_payload(payload)?;
  match sv.by_id(tg_user_id).await? {
    None => Err(Error::UserNotFound),
    Some(user) if user.is_blocked => Err(Error::UserBlocked),
    Some(_) => Ok(()),
  }
}

/// Answered at once, nothing is written.
async fn pre_checkout(
  app: Arc<AppState>,
  bot: Bot,
  query: PreCheckoutQuery,
) -> ResponseResult<()> {
  let user_id = query.from.id.0 as i64;
  let verdict =
    checkout_verdict(&app.sv().user, user_id, &query.invoice_payload).await;

  match verdict {
    Ok(()) => {
      bot.answer_pre_checkout_query(query.id, true).await?;
    }
    Err(err) => {
      warn!(
        user = user_id,
        payload = %query.invoice_payload,
        code = err.code(),
        "Rejected checkout"
      );
      bot
        .answer_pre_checkout_query(query.id, false)
        .error_message(err.user_message())
        .await?;
    }
  }
  Ok(())
}

/// Invoice amount in Stars. Prices outside `1..=u32::MAX` cannot be paid.
fn invoice_amount(tariff: &tariff::Model) -> Option<u32> {
  u32::try_from(tariff.price).ok().filter(|&amount| amount > 0)
}

async fn successful_payment(
  app: Arc<AppState>,
  bot: Bot,
  msg: Message,
) -> ResponseResult<()> {
  let Some(paid) = msg.successful_payment() else {
    return Ok(());
  };
  let user_id = sender(&msg);

  let event = PaymentEvent {
    tg_user_id: user_id,
    charge_id: paid.telegram_payment_charge_id.0.clone(),
    amount: paid.total_amount as i64,
    payload: paid.invoice_payload.clone(),
  };
  info!(user = user_id, charge = %event.charge_id, "Payment received");

  let bot = ReplyBot::new(bot, user_id, msg.chat.id, msg.id);
  spawn_purchase(app, bot, event);

  Ok(())
}

/// Runs the purchase off the dispatcher, provisioning may take several
/// retries. Failing to talk to the user never stops the purchase.
fn spawn_purchase(
  app: Arc<AppState>,
  bot: ReplyBot,
  event: PaymentEvent,
) -> JoinHandle<()> {
  tokio::spawn(async move {
    let ack = "✅ Payment received, preparing your VPN access...";
    if let Err(err) = bot.reply_html(ack).await {
      warn!(user = bot.user_id, "Failed to acknowledge payment: {err}");
    }

    if let Err(err) = process_payment(&app, &bot, event).await {
      error!(user = bot.user_id, "Failed to report purchase: {err}");
    }
  })
}

async fn process_payment(
  app: &AppState,
  bot: &ReplyBot,
  event: PaymentEvent,
) -> ResponseResult<()> {
  let sv = app.sv();
  let charge_id = event.charge_id.clone();

  match sv.provision.purchase(event).await {
    Ok(PurchaseOutcome::Duplicate) => {}
    Ok(PurchaseOutcome::Completed { scenario: Scenario::Renew, delivery }) => {
      let text = format!(
        "✅ <b>Subscription renewed!</b>\n\n\
        Active until: {}\n\
        Your existing VPN configs remain valid.",
        utils::format_date(delivery.subscription.end_at)
      );
      bot.reply_with_keyboard(text, callback::main_menu()).await?;
    }
    Ok(PurchaseOutcome::Completed { delivery, .. }) => {
      let text = format!(
        "✅ <b>Payment successful!</b>\n\n\
        Active until: {}\n\
        Devices: {}",
        utils::format_date(delivery.subscription.end_at),
        delivery.subscription.allowed_devices
      );
      bot.reply_html(text).await?;
      bot.send_configs(&delivery.configs).await?;
    }
    Err(err) => {
      error!(
        user = bot.user_id,
        charge = %charge_id,
        code = err.code(),
        "Purchase failed: {err}"
      );
      bot.reply_html(format!("❌ {}", err.user_message())).await?;
    }
  }

  Ok(())
}

async fn callback_handle(
  app: Arc<AppState>,
  bot: Bot,
  query: CallbackQuery,
) -> ResponseResult<()> {
  if let Some(data) = query.data
    && let Some(msg) = query.message.as_ref()
  {
    let bot =
      ReplyBot::new(bot, query.from.id.0 as i64, msg.chat().id, msg.id());

    // answer callback to remove loading state
    bot.inner.answer_callback_query(query.id.clone()).await?;

    callback::handle(app, bot, &data).await
  } else {
    Ok(())
  }
}

/// Blocked users get a refusal and nothing else.
async fn refuse_blocked(sv: &sv::User<'_>, bot: &ReplyBot) -> bool {
  match sv.by_id(bot.user_id).await {
    Ok(Some(user)) if user.is_blocked => {
      let _ = bot.reply_html(Error::UserBlocked.user_message()).await;
      true
    }
    _ => false,
  }
}

#[derive(Debug, Clone)]
struct ReplyBot {
  inner: Bot,
  pub user_id: i64,
  pub chat_id: ChatId,
  pub message_id: MessageId,
}

impl ReplyBot {
  pub fn new(
    inner: Bot,
    user_id: i64,
    chat_id: ChatId,
    message_id: MessageId,
  ) -> Self {
    Self { inner, user_id, chat_id, message_id }
  }

  async fn reply_html(
    &self,
    text: impl Into<String>,
  ) -> ResponseResult<Message> {
    self
      .inner
      .send_message(self.chat_id, text.into())
      .parse_mode(ParseMode::Html)
      .await
  }

  /// Sends a long message in chunks, returning the last one.
  async fn reply_html_chunked(
    &self,
    text: impl Into<String>,
  ) -> ResponseResult<Option<Message>> {
    let mut last = None;
    for chunk in utils::chunk_message(&text.into(), 0) {
      last = Some(self.reply_html(chunk).await?);
    }
    Ok(last)
  }

  async fn reply_with_keyboard(
    &self,
    text: impl Into<String>,
    keyboard: InlineKeyboardMarkup,
  ) -> ResponseResult<Message> {
    self
      .inner
      .send_message(self.chat_id, text.into())
      .parse_mode(ParseMode::Html)
      .reply_markup(keyboard)
      .await
  }

  pub async fn edit_with_keyboard(
    &self,
    text: impl Into<String>,
    keyboard: InlineKeyboardMarkup,
  ) -> ResponseResult<()> {
    self
      .inner
      .edit_message_text(self.chat_id, self.message_id, text.into())
      .parse_mode(ParseMode::Html)
      .reply_markup(keyboard)
      .await?;
    Ok(())
  }

  async fn send_invoice(
    &self,
    tariff: &tariff::Model,
    amount: u32,
  ) -> ResponseResult<()> {
    let prices = vec![LabeledPrice { label: tariff.name.clone(), amount }];
    let description = tariff
      .description
      .clone()
      .unwrap_or_else(|| format!("{} days of VPN access", tariff.duration_days));

    self
      .inner
      .send_invoice(
        self.chat_id,
        format!("VPN: {}", tariff.name),
        description,
        payment::invoice_payload(tariff.id),
        "XTR",
        prices,
      )
      .await?;
    Ok(())
  }

  /// Config text in a code block plus the QR code when there is one.
  async fn send_configs(
    &self,
    configs: &[vpn_config::Model],
  ) -> ResponseResult<()> {
    for config in configs {
      let text = format!(
        "🔐 <b>{}</b>\n{}",
        html::escape(&config.protocol),
        html::code_block(&config.text())
      );
      self.reply_html_chunked(text).await?;

      if let Some(png) = config.qr_png() {
        let photo = InputFile::memory(png).file_name("qr.png");
        self.inner.send_photo(self.chat_id, photo).await?;
      }
    }
    Ok(())
  }

  async fn infer_username(&self, chat_id: ChatId) -> String {
    match self.inner.get_chat(chat_id).await {
      Ok(chat) => match chat.username() {
        Some(username) => format!("@{username}"),
        None => format!("<a href=\"tg://user?id={chat_id}\">unknown</a>"),
      },
      Err(_) => format!("<code>{chat_id}</code> (API Error)"),
    }
  }
}
