pub mod headers;
pub mod meta;
pub mod normalize;
pub mod table;

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;

use crate::calendar;
use crate::model::GradeSheet;

pub const DEFAULT_FACULTY: &str = "Факультет";
pub const DEFAULT_GROUP: &str = "Группа";

static TABLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("table").unwrap());
static URL_YEAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"year=(\d{4}-\d{4})").unwrap());
static URL_SEMESTER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"semester=([12])").unwrap());

/// What the caller already knows about the page being extracted.
#[derive(Debug, Clone, Default)]
pub struct ExtractContext {
    pub url: Option<String>,
    pub faculty: Option<String>,
    pub group: Option<String>,
    pub academic_year: Option<String>,
    pub semester: Option<u32>,
    pub course: Option<u32>,
    /// Reference date for the default academic year; `None` means today.
    pub today: Option<NaiveDate>,
}

impl ExtractContext {
    fn academic_year(&self) -> String {
        self.academic_year
            .clone()
            .or_else(|| {
                let url = self.url.as_deref()?;
                URL_YEAR_RE.captures(url).map(|c| c[1].to_string())
            })
            .unwrap_or_else(|| {
                calendar::current_academic_year(self.today.unwrap_or_else(calendar::today))
            })
    }

    fn semester(&self) -> u32 {
        self.semester
            .or_else(|| {
                let url = self.url.as_deref()?;
                URL_SEMESTER_RE.captures(url)?[1].parse().ok()
            })
            .unwrap_or(1)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// HTML → grade sheets. Pure: the same input always yields the same output.
pub fn extract(html: &str, ctx: &ExtractContext) -> Vec<GradeSheet> {
    let doc = Html::parse_document(html);
    let title = meta::page_title(&doc);
    let academic_year = ctx.academic_year();
    let semester = ctx.semester();
    let course = ctx
        .course
        .unwrap_or_else(|| calendar::course_for_semester(semester));

    let mut sheets = Vec::new();
    let mut ordinal = 0;

    for table in doc.select(&TABLE_SEL) {
        let Some(raw) = table::read_table(table) else {
            continue;
        };
        let columns = headers::classify(&raw.headers);
        if !headers::looks_like_grade_sheet(&raw.headers, &raw.text, &columns) {
            continue;
        }
        ordinal += 1;

        let heading = meta::heading_context(table);
        let kind = meta::resolve_assessment_type(&heading, columns.grade.is_some());
        let students = table::extract_students(&raw, &columns, kind);
        if students.is_empty() {
            debug!(ordinal, "grade table without usable rows");
            continue;
        }

        let faculty = non_empty(meta::resolve_faculty(&heading))
            .or_else(|| non_empty(ctx.faculty.clone()))
            .unwrap_or_else(|| DEFAULT_FACULTY.to_string());
        let group_name = non_empty(meta::resolve_group(&heading))
            .or_else(|| non_empty(ctx.group.clone()))
            .unwrap_or_else(|| DEFAULT_GROUP.to_string());

        sheets.push(GradeSheet {
            faculty,
            group_name,
            course,
            academic_year: academic_year.clone(),
            semester,
            subject: meta::resolve_subject(&heading, title.as_deref(), ordinal),
            assessment_type: kind,
            closed: meta::is_closed(table, &raw.text, &heading),
            students,
        });
    }

    debug!(sheets = sheets.len(), "extraction finished");
    sheets
}
