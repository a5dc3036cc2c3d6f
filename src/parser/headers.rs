/// Semantic role a table column can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Gradebook,
    Score1,
    Score2,
    Score3,
    Total,
    Grade,
}

#[derive(Debug, Clone, Copy)]
enum Pattern {
    Contains(&'static str),
    Exact(&'static str),
}

impl Pattern {
    fn matches(self, header: &str) -> bool {
        match self {
            Pattern::Contains(needle) => header.contains(needle),
            Pattern::Exact(word) => header == word,
        }
    }
}

use Pattern::{Contains, Exact};

/// Keyword tiers per role. Within a role the first tier that matches any
/// column wins; within a tier the leftmost column wins. Roles are resolved in
/// this order and a column is never assigned twice, so "итого" goes to the
/// total before score3 falls back to "итог".
const RULES: &[(Role, &[&[Pattern]])] = &[
    (
        Role::Gradebook,
        &[
            &[Contains("зачётк"), Contains("зачетк")],
            &[Contains("номер")],
            &[Contains("№")],
        ],
    ),
    (Role::Score1, &[&[Contains("кт1"), Contains("кт-1")]]),
    (Role::Score2, &[&[Contains("кт2"), Contains("кт-2")]]),
    (Role::Total, &[&[Contains("сумм"), Contains("всего"), Exact("итого")]]),
    (Role::Grade, &[&[Contains("оценк")]]),
    (
        Role::Score3,
        &[&[Contains("кт3"), Contains("кт-3")], &[Contains("итог")]],
    ),
];

const SCORE_VOCABULARY: &[&str] = &["кт", "балл", "оценк"];
const SHEET_VOCABULARY: &[&str] = &["зачёт", "зачет", "номер"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap {
    pub gradebook: Option<usize>,
    pub score1: Option<usize>,
    pub score2: Option<usize>,
    pub score3: Option<usize>,
    pub total: Option<usize>,
    pub grade: Option<usize>,
}

impl ColumnMap {
    fn set(&mut self, role: Role, idx: usize) {
        let slot = match role {
            Role::Gradebook => &mut self.gradebook,
            Role::Score1 => &mut self.score1,
            Role::Score2 => &mut self.score2,
            Role::Score3 => &mut self.score3,
            Role::Total => &mut self.total,
            Role::Grade => &mut self.grade,
        };
        *slot = Some(idx);
    }

    pub fn is_classified(&self, idx: usize) -> bool {
        [
            self.gradebook,
            self.score1,
            self.score2,
            self.score3,
            self.total,
            self.grade,
        ]
        .contains(&Some(idx))
    }

    fn has_score_role(&self) -> bool {
        self.score1.is_some()
            || self.score2.is_some()
            || self.score3.is_some()
            || self.total.is_some()
            || self.grade.is_some()
    }
}

fn compact(header: &str) -> String {
    header
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

/// Map header cell texts to column roles.
pub fn classify(headers: &[String]) -> ColumnMap {
    let compacted: Vec<String> = headers.iter().map(|h| compact(h)).collect();
    let mut map = ColumnMap::default();
    let mut taken = vec![false; compacted.len()];

    for (role, tiers) in RULES {
        let found = tiers.iter().find_map(|tier| {
            compacted
                .iter()
                .enumerate()
                .find(|(i, h)| !taken[*i] && tier.iter().any(|p| p.matches(h)))
                .map(|(i, _)| i)
        });
        if let Some(idx) = found {
            taken[idx] = true;
            map.set(*role, idx);
        }
    }
    map
}

/// Whether a table looks like a grade sheet rather than layout or navigation.
pub fn looks_like_grade_sheet(headers: &[String], table_text: &str, columns: &ColumnMap) -> bool {
    let text = table_text.to_lowercase();
    if SHEET_VOCABULARY.iter().any(|w| text.contains(w)) {
        return true;
    }
    columns.has_score_role()
        || headers.iter().any(|h| {
            let h = compact(h);
            SCORE_VOCABULARY.iter().any(|w| h.contains(w))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn classic_layout() {
        let map = classify(&headers(&["№", "КТ1", "КТ2", "КТ3", "Оценка"]));
        assert_eq!(map.gradebook, Some(0));
        assert_eq!(map.score1, Some(1));
        assert_eq!(map.score2, Some(2));
        assert_eq!(map.score3, Some(3));
        assert_eq!(map.total, None);
        assert_eq!(map.grade, Some(4));
    }

    #[test]
    fn gradebook_prefers_specific_header() {
        let map = classify(&headers(&["№ п/п", "Номер зачётки", "Сумма баллов"]));
        assert_eq!(map.gradebook, Some(1));
        assert_eq!(map.total, Some(2));
    }

    #[test]
    fn dashed_and_spaced_checkpoints() {
        let map = classify(&headers(&["Зачетка", "КТ-1", "кт 2", "КТ-3", "Всего"]));
        assert_eq!(map.gradebook, Some(0));
        assert_eq!(map.score1, Some(1));
        assert_eq!(map.score2, Some(2));
        assert_eq!(map.score3, Some(3));
        assert_eq!(map.total, Some(4));
    }

    #[test]
    fn itogo_is_total_and_itog_falls_back_to_score3() {
        let map = classify(&headers(&["Номер", "КТ1", "КТ2", "Итоговая", "Итого"]));
        assert_eq!(map.total, Some(4));
        assert_eq!(map.score3, Some(3));
    }

    #[test]
    fn unknown_headers_stay_unmapped() {
        let map = classify(&headers(&["ФИО", "Группа"]));
        assert_eq!(map, ColumnMap::default());
        assert!(!map.is_classified(0));
    }

    #[test]
    fn layout_table_rejected() {
        let h = headers(&["Главная", "Расписание", "Контакты"]);
        let map = classify(&h);
        assert!(!looks_like_grade_sheet(&h, "Главная Расписание Контакты", &map));
    }

    #[test]
    fn pass_fail_text_accepts_table() {
        let h = headers(&["Студент", "Результат"]);
        let map = classify(&h);
        assert!(looks_like_grade_sheet(&h, "Студент Результат 1234567 Зачет", &map));
    }

    #[test]
    fn points_header_accepts_table() {
        let h = headers(&["Студент", "Баллы"]);
        let map = classify(&h);
        assert!(looks_like_grade_sheet(&h, "Студент Баллы", &map));
    }
}
