use serde::Serialize;

/// One assessment event (a "ведомость") for a group, subject and term.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradeSheet {
    pub faculty: String,
    pub group_name: String,
    pub course: u32,
    pub academic_year: String,
    pub semester: u32,
    pub subject: String,
    pub assessment_type: AssessmentType,
    pub closed: bool,
    pub students: Vec<StudentRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StudentRecord {
    pub gradebook_id: String,
    pub score1: Option<i64>,
    pub score2: Option<i64>,
    pub score3: Option<i64>,
    /// No source column maps here yet.
    pub score4: Option<i64>,
    pub total: Option<i64>,
    pub grade: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssessmentType {
    Exam,
    PassFail,
    TermPaper,
    GradedPassFail,
    Unknown,
}

impl AssessmentType {
    /// Label stored in the database and shown to users.
    pub fn label(self) -> &'static str {
        match self {
            AssessmentType::Exam => "экзамен",
            AssessmentType::PassFail => "зачёт",
            AssessmentType::TermPaper => "КП",
            AssessmentType::GradedPassFail => "дифзачёт",
            AssessmentType::Unknown => "неизвестно",
        }
    }

    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "экзамен" | "exam" => AssessmentType::Exam,
            "зачёт" | "зачет" | "pass-fail" => AssessmentType::PassFail,
            "кп" | "term-paper" => AssessmentType::TermPaper,
            "дифзачёт" | "дифзачет" | "graded-pass-fail" => AssessmentType::GradedPassFail,
            _ => AssessmentType::Unknown,
        }
    }

    /// Pass/fail sheets get "зачёт"/"незачёт" instead of a 2..5 mark.
    pub fn is_pass_fail(self) -> bool {
        self == AssessmentType::PassFail
    }
}

impl std::fmt::Display for AssessmentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Canonical grade vocabulary, in report order.
pub const GRADE_VALUES: [&str; 6] = ["5", "4", "3", "2", "зачёт", "незачёт"];
