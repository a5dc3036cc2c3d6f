use crate::model::{AssessmentType, StudentRecord};

/// Minimum total for "зачёт" on pass/fail sheets.
pub const PASS_THRESHOLD: i64 = 60;

/// Inclusive lower bounds for graded sheets, checked top-down; below all → "2".
const MARK_THRESHOLDS: [(i64, &str); 3] = [(85, "5"), (70, "4"), (55, "3")];

pub const MIN_GRADEBOOK_LEN: usize = 4;

pub fn digits_only(text: &str) -> String {
    text.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Strip everything but digits (keeping a leading minus) and parse.
/// Empty or unparseable input is absent, never zero.
pub fn parse_score(text: &str) -> Option<i64> {
    let trimmed = text.trim();
    let digits = digits_only(trimmed);
    if digits.is_empty() {
        return None;
    }
    let value: i64 = digits.parse().ok()?;
    if trimmed.starts_with('-') {
        Some(-value)
    } else {
        Some(value)
    }
}

/// A cell that holds nothing but a number, as used by the positional rescan.
pub fn is_numeric_cell(text: &str) -> bool {
    let t = text.trim();
    let t = t.strip_prefix('-').unwrap_or(t);
    !t.is_empty() && t.chars().all(|c| c.is_ascii_digit())
}

/// Map grade words onto the canonical vocabulary; unknown text is kept.
pub fn normalize_grade(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_lowercase().replace('ё', "е");
    let canonical = if lower.starts_with("неуд") {
        "2"
    } else if lower.starts_with("удов") {
        "3"
    } else if lower.starts_with("хор") {
        "4"
    } else if lower.starts_with("отл") {
        "5"
    } else if lower.starts_with("не зач") || lower.starts_with("незач") {
        "незачёт"
    } else if lower.starts_with("зач") {
        "зачёт"
    } else {
        return Some(trimmed.to_string());
    };
    Some(canonical.to_string())
}

pub fn derive_grade(total: i64, kind: AssessmentType) -> &'static str {
    if kind.is_pass_fail() {
        return if total >= PASS_THRESHOLD { "зачёт" } else { "незачёт" };
    }
    MARK_THRESHOLDS
        .iter()
        .find(|(min, _)| total >= *min)
        .map(|(_, mark)| *mark)
        .unwrap_or("2")
}

/// Fill in a missing total from the partial scores and a missing grade from
/// the total. Values read from the page are never overwritten.
pub fn normalize_record(record: &mut StudentRecord, kind: AssessmentType) {
    if record.total.is_none() {
        let parts = [record.score1, record.score2, record.score3];
        if parts.iter().any(Option::is_some) {
            // An overflowing sum is garbage input; leave the total absent.
            record.total = parts
                .iter()
                .try_fold(0i64, |acc, p| acc.checked_add(p.unwrap_or(0)));
        }
    }
    if record.grade.is_none() {
        if let Some(total) = record.total {
            record.grade = Some(derive_grade(total, kind).to_string());
        }
    }
}

pub fn has_valid_gradebook(record: &StudentRecord) -> bool {
    record.gradebook_id.len() >= MIN_GRADEBOOK_LEN
}
