//! Synthetic grade sheets with the same shape as extracted ones.
//!
//! Used when the portal is unreachable or yields nothing. Totals and grades go
//! through the same normalizer as live extraction.

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::info;

use crate::calendar;
use crate::model::{AssessmentType, GradeSheet, StudentRecord};
use crate::parser::normalize::normalize_record;

const FACULTIES: &[&str] = &[
    "Информационные технологии",
    "Экономический",
    "Механический",
    "Химическая технология",
    "Строительный",
    "Технологический",
];

const GROUP_PREFIXES: &[&str] = &["ИС", "ПИ", "БИ", "ЭК", "МН", "ТМ", "ХТ", "СТ"];

const SUBJECTS: &[&str] = &[
    "Программирование",
    "Базы данных",
    "Алгоритмы",
    "Математика",
    "Физика",
    "Химия",
    "Английский язык",
    "История",
    "Экономика",
    "Менеджмент",
];

/// Generate demo sheets for `years` and one faculty (or the built-in list).
pub fn generate<R: Rng>(years: &[String], faculty: Option<&str>, rng: &mut R) -> Vec<GradeSheet> {
    let faculties: Vec<&str> = match faculty.map(str::trim).filter(|f| !f.is_empty()) {
        Some(f) => vec![f],
        None => FACULTIES.to_vec(),
    };

    let mut sheets = Vec::new();
    for faculty in &faculties {
        let group_count = rng.gen_range(2..=4);
        for g in 0..group_count {
            let group_name = format!("{}-{}", GROUP_PREFIXES[g % GROUP_PREFIXES.len()], 21 + g);
            for year in years {
                for semester in [1, 2] {
                    let subject_count = rng.gen_range(2..=4);
                    for subject in SUBJECTS.choose_multiple(rng, subject_count) {
                        let kind = if rng.gen_bool(0.5) {
                            AssessmentType::Exam
                        } else {
                            AssessmentType::PassFail
                        };
                        sheets.push(GradeSheet {
                            faculty: faculty.to_string(),
                            group_name: group_name.clone(),
                            course: calendar::course_for_semester(semester),
                            academic_year: year.clone(),
                            semester,
                            subject: subject.to_string(),
                            assessment_type: kind,
                            closed: true,
                            students: students(year, kind, rng),
                        });
                    }
                }
            }
        }
    }

    info!(sheets = sheets.len(), years = ?years, "generated demo data");
    sheets
}

fn students<R: Rng>(year: &str, kind: AssessmentType, rng: &mut R) -> Vec<StudentRecord> {
    let year_prefix = year.split('-').next().unwrap_or("2000");
    let count = rng.gen_range(15..25);
    (0..count)
        .map(|_| {
            let mut record = StudentRecord {
                gradebook_id: format!("{}{}", year_prefix, rng.gen_range(1000..10000)),
                score1: Some(rng.gen_range(1..=30)),
                score2: Some(rng.gen_range(1..=30)),
                score3: Some(rng.gen_range(1..=40)),
                ..Default::default()
            };
            normalize_record(&mut record, kind);
            record
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::normalize::derive_grade;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn years() -> Vec<String> {
        vec!["2024-2025".into(), "2025-2026".into()]
    }

    #[test]
    fn records_satisfy_extraction_invariants() {
        let mut rng = StdRng::seed_from_u64(7);
        let sheets = generate(&years(), None, &mut rng);
        assert!(!sheets.is_empty());
        for sheet in &sheets {
            assert!((15..25).contains(&sheet.students.len()));
            for r in &sheet.students {
                let sum = r.score1.unwrap() + r.score2.unwrap() + r.score3.unwrap();
                assert_eq!(r.total, Some(sum));
                assert_eq!(r.grade.as_deref(), Some(derive_grade(sum, sheet.assessment_type)));
                assert_eq!(r.score4, None);
                assert!(r.gradebook_id.len() >= 4);
                assert!(r.gradebook_id.chars().all(|c| c.is_ascii_digit()));
            }
        }
    }

    #[test]
    fn single_faculty_and_requested_years() {
        let mut rng = StdRng::seed_from_u64(1);
        let sheets = generate(&years(), Some("УИТС"), &mut rng);
        assert!(sheets.iter().all(|s| s.faculty == "УИТС"));
        let seen: HashSet<&str> = sheets.iter().map(|s| s.academic_year.as_str()).collect();
        let requested = years();
        let expected: HashSet<&str> = requested.iter().map(String::as_str).collect();
        assert_eq!(seen, expected);
        assert!(sheets.iter().all(|s| s.course == 1 && (1..=2).contains(&s.semester)));
    }

    #[test]
    fn sheet_identity_is_unique() {
        let mut rng = StdRng::seed_from_u64(42);
        let sheets = generate(&years(), None, &mut rng);
        let keys: HashSet<_> = sheets
            .iter()
            .map(|s| {
                (
                    &s.faculty,
                    &s.group_name,
                    &s.subject,
                    &s.academic_year,
                    s.semester,
                    s.assessment_type,
                )
            })
            .collect();
        assert_eq!(keys.len(), sheets.len());
    }

    #[test]
    fn gradebook_prefix_is_start_year() {
        let mut rng = StdRng::seed_from_u64(3);
        let sheets = generate(&["2023-2024".to_string()], Some("ЭК"), &mut rng);
        assert!(sheets
            .iter()
            .flat_map(|s| &s.students)
            .all(|r| r.gradebook_id.starts_with("2023")));
    }
}
