use crate::error::EngineError;
use chrono::{FixedOffset, NaiveDate};
use core_types::AccountInfo;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

/// Day-start equity for the loss breaker.
///
/// The venue's own figure wins when it reports one. Otherwise the first equity
/// observed on each session date becomes the baseline, the date being taken at
/// a fixed offset from UTC.
#[derive(Debug)]
pub struct SessionBaseline {
    offset: FixedOffset,
    current: Mutex<Option<(NaiveDate, Decimal)>>,
}

impl SessionBaseline {
    pub fn new(utc_offset_hours: i32) -> Result<Self, EngineError> {
        let offset = FixedOffset::east_opt(utc_offset_hours * 3600).ok_or_else(|| {
            EngineError::Configuration(format!(
                "session_utc_offset_hours out of range: {utc_offset_hours}"
            ))
        })?;
        Ok(Self {
            offset,
            current: Mutex::new(None),
        })
    }

    pub fn session_date(&self, account: &AccountInfo) -> NaiveDate {
        account.as_of.with_timezone(&self.offset).date_naive()
    }

    pub async fn day_start_equity(&self, account: &AccountInfo) -> Decimal {
        if let Some(reported) = account.day_start_equity {
            return reported;
        }

        let today = self.session_date(account);
        let mut current = self.current.lock().await;
        match *current {
            Some((date, equity)) if date == today => equity,
            _ => {
                tracing::info!(session = %today, equity = %account.equity, "New session baseline");
                *current = Some((today, account.equity));
                account.equity
            }
        }
    }
}
