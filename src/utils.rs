use crate::prelude::*;

pub fn now() -> DateTime {
  Utc::now().naive_utc()
}

pub fn days(count: i64) -> TimeDelta {
  TimeDelta::days(count)
}

/// Whole days left until `end`, rounded up.
pub fn days_left(end: DateTime, now: DateTime) -> i64 {
  let secs = (end - now).num_seconds();
  if secs <= 0 { 0 } else { (secs + 86_399) / 86_400 }
}

pub fn format_date(date: DateTime) -> String {
  date.format("%d.%m.%Y %H:%M").to_string()
}

pub fn format_duration(duration: TimeDelta) -> String {
  format!(
    "{}d {}h {}m",
    duration.num_days(),
    duration.num_hours() % 24,
    duration.num_minutes() % 60
  )
}

/// Maximum message length for Telegram Bot API (4096 characters).
/// We use a slightly smaller limit to account for potential HTML entity expansion.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4000;

/// Splits a long message into chunks that fit within Telegram's message limit.
/// Attempts to split at newline boundaries to preserve formatting.
pub fn chunk_message(text: &str, max_len: usize) -> Vec<String> {
  let max_len =
    if max_len == 0 { TELEGRAM_MAX_MESSAGE_LENGTH } else { max_len };

  if text.len() <= max_len {
    return vec![text.to_string()];
  }

  let mut chunks = Vec::new();
  let mut current = String::new();

  for line in text.lines() {
    if !current.is_empty() && current.len() + line.len() + 1 > max_len {
      chunks.push(std::mem::take(&mut current));
    }

    if line.len() > max_len {
      if !current.is_empty() {
        chunks.push(std::mem::take(&mut current));
      }
      // config blobs are ASCII, but never split inside a char
      let mut remaining = line;
      while remaining.len() > max_len {
        let mut cut = max_len;
        while !remaining.is_char_boundary(cut) {
          cut -= 1;
        }
        chunks.push(remaining[..cut].to_string());
        remaining = &remaining[cut..];
      }
      current = remaining.to_string();
    } else {
      if !current.is_empty() {
        current.push('\n');
      }
      current.push_str(line);
    }
  }

  if !current.is_empty() {
    chunks.push(current);
  }

  chunks
}
