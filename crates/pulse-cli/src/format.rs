//! Terminal rendering for deliveries, status, and the user profile.

use pulse_auth::UserProfile;
use pulse_stream::{ConnectionSnapshot, Delivery};

/// One line per delivery: `AAPL     190.50   +0.42%  2026-10-18T14:30:00Z`.
pub fn delivery(delivery: &Delivery) -> String {
    match delivery {
        Delivery::Price(update) => format!(
            "{:<8} {:>10.2} {:>+8.2}%  {}",
            update.ticker, update.price, update.change_percent, update.timestamp
        ),
        Delivery::TickerError(err) => format!("{:<8} unavailable: {err}", err.ticker()),
    }
}

/// Connection status line for stderr.
pub fn snapshot(snapshot: &ConnectionSnapshot) -> String {
    let mut line = format!("[{}]", snapshot.state);
    if !snapshot.active_topics.is_empty() {
        line.push(' ');
        line.push_str(&pulse_stream::encode_topics(&snapshot.active_topics));
    }
    if snapshot.retry_count > 0 {
        line.push_str(&format!(" retry {}", snapshot.retry_count));
    }
    if let Some(err) = &snapshot.last_error {
        line.push_str(&format!(" ({err})"));
    }
    line
}

pub fn profile(user: &UserProfile) -> String {
    match &user.email {
        Some(email) => format!("{} <{email}> [{}]", user.user_id, user.tier),
        None => format!("{} [{}]", user.user_id, user.tier),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
