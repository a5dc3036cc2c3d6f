use chrono::{Datelike, Local, NaiveDate};

/// Academic years start on 1 September.
const YEAR_START_MONTH: u32 = 9;

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn start_year(date: NaiveDate) -> i32 {
    if date.month() >= YEAR_START_MONTH {
        date.year()
    } else {
        date.year() - 1
    }
}

pub fn format_year(start: i32) -> String {
    format!("{}-{}", start, start + 1)
}

pub fn current_academic_year(date: NaiveDate) -> String {
    format_year(start_year(date))
}

/// Upper bound on how far back a crawl or demo run may reach.
pub const MAX_YEARS: usize = 20;

/// The last `count` academic years up to the current one, oldest first.
/// `count` is clamped to `1..=MAX_YEARS`.
pub fn academic_years(count: usize, date: NaiveDate) -> Vec<String> {
    let current = start_year(date);
    let count = count.clamp(1, MAX_YEARS) as i32;
    (current - count + 1..=current).map(format_year).collect()
}

/// Course derived from the semester number when the page does not say.
pub fn course_for_semester(semester: u32) -> u32 {
    semester.div_ceil(2).max(1)
}
