// Copyright (C) 2026 Tidesync Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Timestamp helpers: source-format timestamps and week buckets.
//!
//! Non-threaded messages are indexed per week bucket; a bucket is identified
//! by the epoch-milliseconds of its Monday 00:00 UTC start.

const DAY_MS: i64 = 86_400_000;
const WEEK_MS: i64 = 7 * DAY_MS;
// The epoch (1970-01-01) was a Thursday, three days past Monday.
const EPOCH_MONDAY_OFFSET_DAYS: i64 = 3;

/// Parse a source timestamp (`"1699999999.123456"`) into epoch milliseconds.
///
/// Returns `None` for malformed input.
pub fn source_ts_to_ms(ts: &str) -> Option<i64> {
    let (secs, frac) = match ts.split_once('.') {
        Some((secs, frac)) => (secs, frac),
        None => (ts, ""),
    };
    let secs: i64 = secs.parse().ok()?;
    let millis: i64 = if frac.is_empty() {
        0
    } else {
        // Only ASCII digits are valid; this also keeps the truncation below
        // on a character boundary.
        if !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let frac = &frac[..frac.len().min(3)];
        let parsed: i64 = frac.parse().ok()?;
        parsed * 10i64.pow(3 - frac.len() as u32)
    };
    Some(secs * 1000 + millis)
}

/// Epoch milliseconds of the Monday 00:00 UTC starting the week containing `ts_ms`.
pub fn week_start_ms(ts_ms: i64) -> i64 {
    let day = ts_ms.div_euclid(DAY_MS);
    let week_start_day = day - (day + EPOCH_MONDAY_OFFSET_DAYS).rem_euclid(7);
    week_start_day * DAY_MS
}

/// Exclusive end of the week containing `ts_ms`.
pub fn week_end_ms(ts_ms: i64) -> i64 {
    week_start_ms(ts_ms) + WEEK_MS
}
