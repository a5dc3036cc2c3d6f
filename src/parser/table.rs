use std::sync::LazyLock;

use scraper::{ElementRef, Selector};
use tracing::debug;

use super::headers::ColumnMap;
use super::normalize::{
    digits_only, has_valid_gradebook, is_numeric_cell, normalize_grade, normalize_record,
    parse_score,
};
use crate::model::{AssessmentType, StudentRecord};

static ROW_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").unwrap());

/// Gradebook numbers found by the whole-row fallback scan.
const FALLBACK_GRADEBOOK_LEN: std::ops::RangeInclusive<usize> = 6..=12;

/// Text of one `<table>`: header cells, data rows, and everything flattened.
#[derive(Debug, Clone)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub text: String,
}

pub(crate) fn clean_text(el: ElementRef) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Rows that belong to this table and not to a table nested inside it.
fn own_rows(table: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    table
        .select(&ROW_SEL)
        .filter(|row| {
            row.ancestors()
                .filter_map(ElementRef::wrap)
                .find(|a| a.value().name() == "table")
                .map(|a| a.id())
                == Some(table.id())
        })
        .collect()
}

fn row_cells(row: ElementRef) -> Vec<String> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|c| matches!(c.value().name(), "td" | "th"))
        .map(clean_text)
        .collect()
}

/// First row is the header; `None` when there is no data row at all.
pub fn read_table(table: ElementRef) -> Option<RawTable> {
    let rows = own_rows(table);
    if rows.len() < 2 {
        return None;
    }
    let headers = row_cells(rows[0])
        .into_iter()
        .map(|h| h.to_lowercase())
        .collect();
    let rows = rows[1..].iter().map(|r| row_cells(*r)).collect();
    Some(RawTable {
        headers,
        rows,
        text: clean_text(table),
    })
}

/// Read one data row by column roles, then fall back to scanning the row.
fn extract_row(cells: &[String], columns: &ColumnMap) -> StudentRecord {
    let cell = |idx: Option<usize>| idx.and_then(|i| cells.get(i)).map(String::as_str);

    let mut record = StudentRecord {
        gradebook_id: cell(columns.gradebook).map(digits_only).unwrap_or_default(),
        score1: cell(columns.score1).and_then(parse_score),
        score2: cell(columns.score2).and_then(parse_score),
        score3: cell(columns.score3).and_then(parse_score),
        score4: None,
        total: cell(columns.total).and_then(parse_score),
        grade: cell(columns.grade).and_then(normalize_grade),
    };

    let mut gradebook_cell = columns.gradebook;
    if record.gradebook_id.is_empty() {
        let found = cells
            .iter()
            .enumerate()
            .map(|(i, c)| (i, digits_only(c)))
            .find(|(_, d)| FALLBACK_GRADEBOOK_LEN.contains(&d.len()));
        if let Some((i, id)) = found {
            record.gradebook_id = id;
            gradebook_cell = Some(i);
        }
    }

    // Positional rescan. Unguarded against extra numeric columns such as a
    // row counter: those land in score1.
    if record.score1.is_none() && record.score2.is_none() {
        let mut numbers = cells
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != gradebook_cell && !columns.is_classified(*i))
            .filter(|(_, c)| is_numeric_cell(c))
            .filter_map(|(_, c)| parse_score(c));
        for slot in [
            &mut record.score1,
            &mut record.score2,
            &mut record.score3,
            &mut record.total,
        ] {
            if slot.is_none() {
                *slot = numbers.next();
            }
        }
    }

    record
}

/// Extract, normalize and filter the student rows of one accepted table.
pub fn extract_students(
    raw: &RawTable,
    columns: &ColumnMap,
    kind: AssessmentType,
) -> Vec<StudentRecord> {
    let mut students = Vec::new();
    for cells in raw.rows.iter().filter(|c| c.len() >= 2) {
        let mut record = extract_row(cells, columns);
        normalize_record(&mut record, kind);
        if has_valid_gradebook(&record) {
            students.push(record);
        } else {
            debug!(cells = ?cells, "row discarded: no gradebook number");
        }
    }
    students
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::headers::classify;
    use scraper::Html;

    fn first_table(doc: &Html) -> ElementRef<'_> {
        let sel = Selector::parse("table").unwrap();
        doc.select(&sel).next().unwrap()
    }

    fn raw(headers: &[&str], rows: &[&[&str]]) -> RawTable {
        RawTable {
            headers: headers.iter().map(|h| h.to_lowercase()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
            text: String::new(),
        }
    }

    #[test]
    fn reads_header_and_rows() {
        let doc = Html::parse_document(
            "<table><tr><th>№</th><th>КТ1</th></tr><tr><td> 2023001 </td><td>25</td></tr></table>",
        );
        let t = read_table(first_table(&doc)).unwrap();
        assert_eq!(t.headers, vec!["№", "кт1"]);
        assert_eq!(t.rows, vec![vec!["2023001".to_string(), "25".to_string()]]);
    }

    #[test]
    fn nested_table_rows_are_not_own_rows() {
        let doc = Html::parse_document(
            "<table><tr><td>Меню</td></tr><tr><td>\
             <table><tr><th>№</th></tr><tr><td>1234567</td></tr></table>\
             </td></tr></table>",
        );
        let outer = first_table(&doc);
        let t = read_table(outer).unwrap();
        assert_eq!(t.headers, vec!["меню"]);
        assert_eq!(t.rows.len(), 1);
    }

    #[test]
    fn header_only_table_is_skipped() {
        let doc = Html::parse_document("<table><tr><th>№</th><th>КТ1</th></tr></table>");
        assert!(read_table(first_table(&doc)).is_none());
    }

    #[test]
    fn column_extraction_with_reconstruction() {
        let t = raw(
            &["№", "КТ1", "КТ2", "КТ3", "Оценка"],
            &[&["2023001", "25", "20", "30", "5"]],
        );
        let students = extract_students(&t, &classify(&t.headers), AssessmentType::Exam);
        assert_eq!(
            students,
            vec![StudentRecord {
                gradebook_id: "2023001".into(),
                score1: Some(25),
                score2: Some(20),
                score3: Some(30),
                score4: None,
                total: Some(75),
                grade: Some("5".into()),
            }]
        );
    }

    #[test]
    fn short_number_row_is_discarded() {
        let t = raw(&["Студент", "Результат"], &[&["Иванов И.И.", "123"]]);
        let students = extract_students(&t, &classify(&t.headers), AssessmentType::PassFail);
        assert!(students.is_empty());
    }

    #[test]
    fn gradebook_found_in_unclassified_cell() {
        let t = raw(&["Студент", "Шифр"], &[&["Петров П.П.", "1234567"]]);
        let students = extract_students(&t, &classify(&t.headers), AssessmentType::PassFail);
        assert_eq!(students.len(), 1);
        assert_eq!(students[0].gradebook_id, "1234567");
        assert_eq!(students[0].total, None);
    }

    #[test]
    fn positional_rescan_fills_scores_and_total() {
        let t = raw(
            &["Зачётка", "Первая", "Вторая", "Третья", "Результат"],
            &[&["20231234", "10", "20", "30", "61"]],
        );
        let columns = classify(&t.headers);
        assert_eq!(columns.score1, None);
        let students = extract_students(&t, &columns, AssessmentType::PassFail);
        let r = &students[0];
        assert_eq!((r.score1, r.score2, r.score3), (Some(10), Some(20), Some(30)));
        assert_eq!(r.total, Some(61));
        assert_eq!(r.grade.as_deref(), Some("зачёт"));
    }

    #[test]
    fn total_column_value_is_not_synthesized() {
        let t = raw(&["Номер зачётки", "Итого"], &[&["20231234", "58"]]);
        let students = extract_students(&t, &classify(&t.headers), AssessmentType::Exam);
        let r = &students[0];
        assert_eq!(r.total, Some(58));
        assert_eq!((r.score1, r.score2, r.score3), (None, None, None));
        assert_eq!(r.grade.as_deref(), Some("3"));
    }

    #[test]
    fn single_cell_rows_are_ignored() {
        let t = raw(&["№", "КТ1"], &[&["Итого по группе"], &["20231234", "40"]]);
        let students = extract_students(&t, &classify(&t.headers), AssessmentType::Exam);
        assert_eq!(students.len(), 1);
    }
}
