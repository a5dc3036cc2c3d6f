use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::info;

use crate::model::{AssessmentType, GradeSheet, StudentRecord, GRADE_VALUES};

/// What extraction needs from storage. Sheets are keyed by
/// (faculty, group, subject, year, semester, assessment type).
pub trait GradeStore {
    fn upsert_sheet(&self, sheet: &GradeSheet) -> Result<i64>;
    fn delete_students(&self, sheet_id: i64) -> Result<usize>;
    fn insert_students(&self, sheet_id: i64, students: &[StudentRecord]) -> Result<usize>;
    fn clear_all(&self) -> Result<()>;
    fn count_sheets(&self) -> Result<usize>;
    fn count_students(&self) -> Result<usize>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SaveSummary {
    pub saved: usize,
    pub records: usize,
}

/// Re-saving a sheet replaces its students wholesale.
pub fn save_sheets(store: &dyn GradeStore, sheets: &[GradeSheet]) -> Result<SaveSummary> {
    let mut summary = SaveSummary::default();
    for sheet in sheets {
        let id = store.upsert_sheet(sheet)?;
        store.delete_students(id)?;
        summary.records += store.insert_students(id, &sheet.students)?;
        summary.saved += 1;
    }
    info!("Saved {} sheets ({} student records)", summary.saved, summary.records);
    Ok(summary)
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let store = SqliteStore { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sheets (
                id              INTEGER PRIMARY KEY,
                faculty         TEXT NOT NULL,
                group_name      TEXT NOT NULL,
                course          INTEGER NOT NULL,
                academic_year   TEXT NOT NULL,
                semester        INTEGER NOT NULL,
                subject         TEXT NOT NULL,
                assessment_type TEXT NOT NULL,
                closed          BOOLEAN NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at      TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(faculty, group_name, subject, academic_year, semester, assessment_type)
            );
            CREATE INDEX IF NOT EXISTS idx_sheets_faculty ON sheets(faculty);
            CREATE INDEX IF NOT EXISTS idx_sheets_group ON sheets(group_name);
            CREATE INDEX IF NOT EXISTS idx_sheets_year ON sheets(academic_year, semester);

            CREATE TABLE IF NOT EXISTS students (
                id         INTEGER PRIMARY KEY,
                sheet_id   INTEGER NOT NULL REFERENCES sheets(id) ON DELETE CASCADE,
                gradebook  TEXT NOT NULL,
                score1     INTEGER,
                score2     INTEGER,
                score3     INTEGER,
                score4     INTEGER,
                total      INTEGER,
                grade      TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_students_sheet ON students(sheet_id);
            CREATE INDEX IF NOT EXISTS idx_students_gradebook ON students(gradebook);
            ",
        )?;
        Ok(())
    }

    /// Save a whole batch atomically.
    pub fn save_all(&self, sheets: &[GradeSheet]) -> Result<SaveSummary> {
        let tx = self.conn.unchecked_transaction()?;
        let summary = save_sheets(self, sheets)?;
        tx.commit()?;
        Ok(summary)
    }
}

impl GradeStore for SqliteStore {
    fn upsert_sheet(&self, s: &GradeSheet) -> Result<i64> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO sheets
             (faculty, group_name, course, academic_year, semester, subject, assessment_type, closed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(faculty, group_name, subject, academic_year, semester, assessment_type)
             DO UPDATE SET course = excluded.course,
                           closed = excluded.closed,
                           updated_at = datetime('now')
             RETURNING id",
        )?;
        let id = stmt.query_row(
            params![
                s.faculty,
                s.group_name,
                s.course,
                s.academic_year,
                s.semester,
                s.subject,
                s.assessment_type.label(),
                s.closed,
            ],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    fn delete_students(&self, sheet_id: i64) -> Result<usize> {
        Ok(self
            .conn
            .execute("DELETE FROM students WHERE sheet_id = ?1", [sheet_id])?)
    }

    fn insert_students(&self, sheet_id: i64, students: &[StudentRecord]) -> Result<usize> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO students (sheet_id, gradebook, score1, score2, score3, score4, total, grade)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        let mut count = 0;
        for r in students {
            count += stmt.execute(params![
                sheet_id,
                r.gradebook_id,
                r.score1,
                r.score2,
                r.score3,
                r.score4,
                r.total,
                r.grade,
            ])?;
        }
        Ok(count)
    }

    fn clear_all(&self) -> Result<()> {
        self.conn
            .execute_batch("DELETE FROM students; DELETE FROM sheets;")?;
        Ok(())
    }

    fn count_sheets(&self) -> Result<usize> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM sheets", [], |r| r.get(0))?)
    }

    fn count_students(&self) -> Result<usize> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))?)
    }
}

// ── Rows ──

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetRow {
    pub id: i64,
    pub faculty: String,
    pub group_name: String,
    pub course: u32,
    pub academic_year: String,
    pub semester: u32,
    pub subject: String,
    pub assessment_type: AssessmentType,
    pub closed: bool,
    pub updated_at: String,
}

const SHEET_COLUMNS: &str = "s.id, s.faculty, s.group_name, s.course, s.academic_year, s.semester,
     s.subject, s.assessment_type, s.closed, s.updated_at";

fn sheet_from_row(row: &Row, offset: usize) -> rusqlite::Result<SheetRow> {
    let kind: String = row.get(offset + 7)?;
    Ok(SheetRow {
        id: row.get(offset)?,
        faculty: row.get(offset + 1)?,
        group_name: row.get(offset + 2)?,
        course: row.get(offset + 3)?,
        academic_year: row.get(offset + 4)?,
        semester: row.get(offset + 5)?,
        subject: row.get(offset + 6)?,
        assessment_type: AssessmentType::from_label(&kind),
        closed: row.get(offset + 8)?,
        updated_at: row.get(offset + 9)?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudentRow {
    pub id: i64,
    pub gradebook: String,
    pub score1: Option<i64>,
    pub score2: Option<i64>,
    pub score3: Option<i64>,
    pub score4: Option<i64>,
    pub total: Option<i64>,
    pub grade: Option<String>,
}

const STUDENT_COLUMNS: &str =
    "st.id, st.gradebook, st.score1, st.score2, st.score3, st.score4, st.total, st.grade";
const STUDENT_WIDTH: usize = 8;

fn student_from_row(row: &Row) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        id: row.get(0)?,
        gradebook: row.get(1)?,
        score1: row.get(2)?,
        score2: row.get(3)?,
        score3: row.get(4)?,
        score4: row.get(5)?,
        total: row.get(6)?,
        grade: row.get(7)?,
    })
}

/// Counts per canonical grade, in `GRADE_VALUES` order.
pub type GradeCounts = Vec<(&'static str, usize)>;

fn grade_counts<'a>(grades: impl IntoIterator<Item = Option<&'a str>> + Clone) -> GradeCounts {
    GRADE_VALUES
        .iter()
        .map(|g| {
            let n = grades.clone().into_iter().filter(|x| *x == Some(*g)).count();
            (*g, n)
        })
        .collect()
}

fn rounded_mean(sum: i64, n: usize) -> i64 {
    if n == 0 {
        0
    } else {
        (sum as f64 / n as f64).round() as i64
    }
}

// ── Overview ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub sheets: usize,
    pub students: usize,
    pub by_faculty: Vec<(String, usize)>,
    pub by_year: Vec<(String, usize)>,
}

impl SqliteStore {
    fn grouped_counts(&self, column: &str) -> Result<Vec<(String, usize)>> {
        let sql = format!(
            "SELECT {c}, COUNT(*) FROM sheets GROUP BY {c} ORDER BY {c}",
            c = column
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn stats(&self) -> Result<Stats> {
        Ok(Stats {
            sheets: self.count_sheets()?,
            students: self.count_students()?,
            by_faculty: self.grouped_counts("faculty")?,
            by_year: self.grouped_counts("academic_year")?,
        })
    }

    /// Faculty names with their sheet counts.
    pub fn faculties(&self) -> Result<Vec<(String, usize)>> {
        self.grouped_counts("faculty")
    }

    pub fn groups(&self, faculty: Option<&str>) -> Result<Vec<GroupRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT group_name, faculty, COUNT(*) FROM sheets
             WHERE ?1 IS NULL OR faculty = ?1
             GROUP BY group_name, faculty
             ORDER BY group_name, faculty",
        )?;
        let rows = stmt
            .query_map([faculty], |r| {
                Ok(GroupRow {
                    group_name: r.get(0)?,
                    faculty: r.get(1)?,
                    sheets: r.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupRow {
    pub group_name: String,
    pub faculty: String,
    pub sheets: usize,
}

// ── Search ──

#[derive(Debug, Clone, Default)]
pub struct SheetFilter {
    pub faculty: Option<String>,
    pub group: Option<String>,
    pub subject: Option<String>,
    pub course: Option<u32>,
    pub academic_year: Option<String>,
    pub semester: Option<u32>,
    pub assessment_type: Option<AssessmentType>,
    pub closed: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub pages: usize,
}

pub const MAX_PAGE_SIZE: usize = 1000;

impl Pagination {
    fn new(page: usize, limit: usize, total: usize) -> Self {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        Pagination {
            page: page.max(1),
            limit,
            total,
            pages: total.div_ceil(limit),
        }
    }

    /// Saturates so an absurd page number reads past the end instead of
    /// overflowing SQLite's integer range.
    fn offset(&self) -> usize {
        (self.page - 1)
            .saturating_mul(self.limit)
            .min(i64::MAX as usize)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub results: Vec<T>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordHit {
    pub record: StudentRow,
    pub sheet: SheetRow,
}

impl SqliteStore {
    /// Substring match on text fields, exact match on the rest; newest first.
    pub fn search_sheets(&self, filter: &SheetFilter, page: usize, limit: usize) -> Result<Page<SheetRow>> {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        let like = [
            ("s.faculty", &filter.faculty),
            ("s.group_name", &filter.group),
            ("s.subject", &filter.subject),
        ];
        for (column, value) in like {
            if let Some(v) = value {
                conditions.push(format!("instr({}, ?{}) > 0", column, params.len() + 1));
                params.push(Box::new(v.clone()));
            }
        }
        if let Some(c) = filter.course {
            conditions.push(format!("s.course = ?{}", params.len() + 1));
            params.push(Box::new(c));
        }
        if let Some(y) = &filter.academic_year {
            conditions.push(format!("s.academic_year = ?{}", params.len() + 1));
            params.push(Box::new(y.clone()));
        }
        if let Some(s) = filter.semester {
            conditions.push(format!("s.semester = ?{}", params.len() + 1));
            params.push(Box::new(s));
        }
        if let Some(t) = filter.assessment_type {
            conditions.push(format!("s.assessment_type = ?{}", params.len() + 1));
            params.push(Box::new(t.label()));
        }
        if let Some(c) = filter.closed {
            conditions.push(format!("s.closed = ?{}", params.len() + 1));
            params.push(Box::new(c));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let total: usize = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM sheets s{}", where_clause),
            param_refs.as_slice(),
            |r| r.get(0),
        )?;
        let pagination = Pagination::new(page, limit, total);

        let sql = format!(
            "SELECT {} FROM sheets s{}
             ORDER BY s.updated_at DESC, s.id DESC
             LIMIT {} OFFSET {}",
            SHEET_COLUMNS,
            where_clause,
            pagination.limit,
            pagination.offset()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let results = stmt
            .query_map(param_refs.as_slice(), |row| sheet_from_row(row, 0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page { results, pagination })
    }

    /// Student records whose gradebook contains `needle`, newest first.
    pub fn search_records(&self, needle: &str, page: usize, limit: usize) -> Result<Page<RecordHit>> {
        let needle = needle.trim();
        let total: usize = self.conn.query_row(
            "SELECT COUNT(*) FROM students WHERE instr(gradebook, ?1) > 0",
            [needle],
            |r| r.get(0),
        )?;
        let pagination = Pagination::new(page, limit, total);

        let sql = format!(
            "SELECT {}, {} FROM students st JOIN sheets s ON s.id = st.sheet_id
             WHERE instr(st.gradebook, ?1) > 0
             ORDER BY st.id DESC
             LIMIT {} OFFSET {}",
            STUDENT_COLUMNS,
            SHEET_COLUMNS,
            pagination.limit,
            pagination.offset()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let results = stmt
            .query_map([needle], |row| {
                Ok(RecordHit {
                    record: student_from_row(row)?,
                    sheet: sheet_from_row(row, STUDENT_WIDTH)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page { results, pagination })
    }
}

// ── Reports ──

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradebookEntry {
    pub sheet_id: i64,
    pub subject: String,
    pub assessment_type: AssessmentType,
    pub record: StudentRow,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Term {
    pub academic_year: String,
    pub semester: u32,
    pub records: Vec<GradebookEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradebookReport {
    pub gradebook: String,
    pub terms: Vec<Term>,
    pub total_records: usize,
    pub total_points: i64,
    pub avg_points: i64,
    pub grades: GradeCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetDetail {
    pub sheet: SheetRow,
    pub students: Vec<StudentRow>,
    pub avg_total: i64,
    pub min_total: i64,
    pub max_total: i64,
    pub grades: GradeCounts,
}

impl SqliteStore {
    /// Everything recorded for one gradebook, latest term first.
    pub fn gradebook_report(&self, number: &str) -> Result<Option<GradebookReport>> {
        let number = number.trim();
        let sql = format!(
            "SELECT {}, {} FROM students st JOIN sheets s ON s.id = st.sheet_id
             WHERE st.gradebook = ?1
             ORDER BY s.academic_year DESC, s.semester DESC, s.subject, st.id",
            STUDENT_COLUMNS, SHEET_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let hits = stmt
            .query_map([number], |row| {
                Ok((student_from_row(row)?, sheet_from_row(row, STUDENT_WIDTH)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        if hits.is_empty() {
            return Ok(None);
        }

        let total_records = hits.len();
        let total_points: i64 = hits.iter().map(|(r, _)| r.total.unwrap_or(0)).sum();
        let grades = grade_counts(hits.iter().map(|(r, _)| r.grade.as_deref()));

        let mut terms: Vec<Term> = Vec::new();
        for (record, sheet) in hits {
            let entry = GradebookEntry {
                sheet_id: sheet.id,
                subject: sheet.subject,
                assessment_type: sheet.assessment_type,
                record,
            };
            match terms.last_mut() {
                Some(t) if t.academic_year == sheet.academic_year && t.semester == sheet.semester => {
                    t.records.push(entry)
                }
                _ => terms.push(Term {
                    academic_year: sheet.academic_year,
                    semester: sheet.semester,
                    records: vec![entry],
                }),
            }
        }

        Ok(Some(GradebookReport {
            gradebook: number.to_string(),
            terms,
            total_records,
            total_points,
            avg_points: rounded_mean(total_points, total_records),
            grades,
        }))
    }

    pub fn sheet_detail(&self, id: i64) -> Result<Option<SheetDetail>> {
        let sheet = self
            .conn
            .query_row(
                &format!("SELECT {} FROM sheets s WHERE s.id = ?1", SHEET_COLUMNS),
                [id],
                |row| sheet_from_row(row, 0),
            )
            .optional()?;
        let Some(sheet) = sheet else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM students st WHERE st.sheet_id = ?1 ORDER BY st.gradebook, st.id",
            STUDENT_COLUMNS
        ))?;
        let students = stmt
            .query_map([id], student_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let totals: Vec<i64> = students.iter().map(|s| s.total.unwrap_or(0)).collect();
        let grades = grade_counts(students.iter().map(|s| s.grade.as_deref()));
        Ok(Some(SheetDetail {
            avg_total: rounded_mean(totals.iter().sum(), totals.len()),
            min_total: totals.iter().copied().min().unwrap_or(0),
            max_total: totals.iter().copied().max().unwrap_or(0),
            grades,
            sheet,
            students,
        }))
    }
}
