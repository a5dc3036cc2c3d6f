use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::table::clean_text;
use crate::model::AssessmentType;

static SUBJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:предмет|дисциплина)[:\s]*([^\n,;]+)").unwrap());
// Headings in `wide` are newline-separated; a capture must stay on its line.
static FACULTY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:факультет|институт)[: \t]*([^\n,;]+)").unwrap());
static GROUP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)групп[аы][: \t]*([^\s,;]+)").unwrap());

static HEADING_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1, h2, h3, h4, h5, h6, .title, caption").unwrap());
static EDITABLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("input, textarea, select").unwrap());
static TITLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());
static H1_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").unwrap());

/// Preceding headings kept for faculty/group lookup.
const WIDE_HEADINGS: usize = 4;

/// Checked in order; the more specific kinds come first. Graded pass/fail
/// needs the full phrase: a bare "диф" also starts subject names.
const TYPE_KEYWORDS: &[(&str, AssessmentType)] = &[
    ("дифзач", AssessmentType::GradedPassFail),
    ("диф. зач", AssessmentType::GradedPassFail),
    ("диф.зач", AssessmentType::GradedPassFail),
    ("дифференцированный зач", AssessmentType::GradedPassFail),
    ("зачёт с оценкой", AssessmentType::GradedPassFail),
    ("зачет с оценкой", AssessmentType::GradedPassFail),
    ("курсов", AssessmentType::TermPaper),
    ("экзамен", AssessmentType::Exam),
    ("зачёт", AssessmentType::PassFail),
    ("зачет", AssessmentType::PassFail),
];

const CLOSED_MARKERS: &[&str] = &["закрыта", "итого"];

/// Text around a table. `near` is the table's own caption or, failing that,
/// the nearest preceding heading; `wide` adds a few more preceding headings.
#[derive(Debug, Clone, Default)]
pub struct HeadingContext {
    pub near: String,
    pub wide: String,
}

fn own_caption(table: ElementRef) -> Option<String> {
    table
        .children()
        .filter_map(ElementRef::wrap)
        .find(|c| c.value().name() == "caption")
        .map(clean_text)
        .filter(|t| !t.is_empty())
}

/// Heading siblings before the table, nearest first, climbing out through
/// parents. Headings nested inside earlier blocks belong to other sections.
fn preceding_headings(table: ElementRef, limit: usize) -> Vec<String> {
    let mut found = Vec::new();
    let mut node = Some(table);

    while let Some(current) = node {
        for sibling in current.prev_siblings().filter_map(ElementRef::wrap) {
            if !HEADING_SEL.matches(&sibling) {
                continue;
            }
            found.push(clean_text(sibling));
            if found.len() >= limit {
                return found;
            }
        }
        node = current.parent().and_then(ElementRef::wrap);
    }
    found
}

pub fn heading_context(table: ElementRef) -> HeadingContext {
    let caption = own_caption(table);
    let preceding: Vec<String> = preceding_headings(table, WIDE_HEADINGS)
        .into_iter()
        .filter(|t| !t.is_empty())
        .collect();

    let near = caption
        .clone()
        .or_else(|| preceding.first().cloned())
        .unwrap_or_default();
    let wide = caption
        .into_iter()
        .chain(preceding)
        .collect::<Vec<_>>()
        .join("\n");
    HeadingContext { near, wide }
}

/// `<title>`, else the first `<h1>`.
pub fn page_title(doc: &Html) -> Option<String> {
    [&*TITLE_SEL, &*H1_SEL].into_iter().find_map(|sel| {
        doc.select(sel)
            .next()
            .map(clean_text)
            .filter(|t| !t.is_empty())
    })
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn resolve_subject(heading: &HeadingContext, title: Option<&str>, ordinal: usize) -> String {
    capture(&SUBJECT_RE, &heading.near)
        .or_else(|| title.map(str::to_string))
        .unwrap_or_else(|| format!("Предмет {}", ordinal))
}

pub fn resolve_assessment_type(heading: &HeadingContext, has_grade_column: bool) -> AssessmentType {
    let text = heading.near.to_lowercase();
    TYPE_KEYWORDS
        .iter()
        .find(|(kw, _)| text.contains(kw))
        .map(|(_, kind)| *kind)
        .unwrap_or(if has_grade_column {
            AssessmentType::Exam
        } else {
            AssessmentType::PassFail
        })
}

pub fn resolve_faculty(heading: &HeadingContext) -> Option<String> {
    capture(&FACULTY_RE, &heading.wide)
}

pub fn resolve_group(heading: &HeadingContext) -> Option<String> {
    capture(&GROUP_RE, &heading.wide)
}

/// Finalized when marked closed, when a summary row is present, or when the
/// table has nothing left to edit.
pub fn is_closed(table: ElementRef, table_text: &str, heading: &HeadingContext) -> bool {
    let text = format!("{}\n{}", heading.near, table_text).to_lowercase();
    CLOSED_MARKERS.iter().any(|m| text.contains(m)) || table.select(&EDITABLE_SEL).next().is_none()
}
