use chrono::{Datelike, NaiveDate};

/// Moves a date forward (or back) by whole calendar months, clamping the day
/// to the last day of the target month. All phase arithmetic goes through
/// here so "31/01 + 1 month" lands on 28/02 instead of skewing into March.
pub fn add_months(date: NaiveDate, months: i32) -> NaiveDate {
    let zero_based = date.year() * 12 + date.month0() as i32 + months;
    let year = zero_based.div_euclid(12);
    let month = zero_based.rem_euclid(12) as u32 + 1;

    let mut day = date.day();
    loop {
        if let Some(result) = NaiveDate::from_ymd_opt(year, month, day) {
            return result;
        }
        day -= 1;
    }
}
