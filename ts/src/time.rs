//! Millisecond Unix timestamps, used as the `updated_at` clock for records.

use chrono::Utc;

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
