//! When an automated message may be sent to a session.

use chrono::{DateTime, Utc};

use crate::session::Session;
use crate::settings::Settings;

/// Whether a worker may message `session` at `now`.
///
/// - never messaged: yes
/// - messaged within `min_session_interaction_interval`: no
/// - the remote changed since the last message: yes
/// - silent for longer than `retry_timeout`: yes
pub fn should_interact(session: &Session, settings: &Settings, now: DateTime<Utc>) -> bool {
    let Some(last) = session.last_interaction_at else {
        return true;
    };
    let now_ms = now.timestamp_millis();
    let since_last = now_ms.saturating_sub(last);

    let min_gap = (settings.min_session_interaction_interval as i64).saturating_mul(1000);
    if since_last < min_gap {
        return false;
    }
    if session.update_time.timestamp_millis() > last {
        return true;
    }
    let timeout = (settings.retry_timeout as i64).saturating_mul(1000);
    since_last > timeout
}
