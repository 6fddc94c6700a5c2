//! One-off grants: the enrollment welcome bonus and the yearly birthday bonus.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use ledger_core::loyalty::{BatchSource, ClientLedger, PointBatch};
use ledger_core::LedgerResult;
use tracing::debug;

pub const WELCOME_LABEL: &str = "Welcome bonus";
pub const BIRTHDAY_LABEL: &str = "Birthday bonus";

/// The client's birthday as it falls in `year`. 29 February maps to
/// 28 February outside leap years.
pub fn birthday_in_year(birthday: NaiveDate, year: i32) -> Option<NaiveDate> {
    birthday
        .with_year(year)
        .or_else(|| NaiveDate::from_ymd_opt(year, birthday.month(), 28))
}

/// Year of the birthday occurrence within `window_days` of `today`, if any.
///
/// Neighbouring years are checked so a window can straddle New Year.
pub fn birthday_grant_year(
    birthday: NaiveDate,
    today: NaiveDate,
    window_days: u32,
) -> Option<i32> {
    let window = i64::from(window_days);
    (today.year() - 1..=today.year() + 1).find(|&year| {
        birthday_in_year(birthday, year)
            .is_some_and(|occurrence| (today - occurrence).num_days().abs() <= window)
    })
}

/// Append the welcome batch unless one was already granted.
pub fn grant_welcome(
    ledger: &mut ClientLedger,
    points: i64,
    expiry_days: u32,
    now: DateTime<Utc>,
) -> LedgerResult<Option<PointBatch>> {
    if ledger.welcome_granted || points <= 0 {
        return Ok(None);
    }
    let batch = PointBatch::new(
        points,
        now,
        Some(expiry_days),
        WELCOME_LABEL,
        BatchSource::Welcome,
    );
    ledger.append_batch(batch.clone(), now)?;
    ledger.welcome_granted = true;
    Ok(Some(batch))
}

/// Append the birthday batch when `now` falls inside the window and this
/// occurrence has not been rewarded yet.
pub fn grant_birthday(
    ledger: &mut ClientLedger,
    birthday: NaiveDate,
    points: i64,
    expiry_days: u32,
    window_days: u32,
    now: DateTime<Utc>,
) -> LedgerResult<Option<PointBatch>> {
    if points <= 0 {
        return Ok(None);
    }
    let Some(year) = birthday_grant_year(birthday, now.date_naive(), window_days) else {
        return Ok(None);
    };
    if ledger.last_birthday_grant_year.is_some_and(|granted| granted >= year) {
        debug!(
            client_id = %ledger.client_id,
            year = year,
            "Birthday bonus already granted"
        );
        return Ok(None);
    }

    let batch = PointBatch::new(
        points,
        now,
        Some(expiry_days),
        BIRTHDAY_LABEL,
        BatchSource::Birthday,
    );
    ledger.append_batch(batch.clone(), now)?;
    ledger.last_birthday_grant_year = Some(year);
    Ok(Some(batch))
}
