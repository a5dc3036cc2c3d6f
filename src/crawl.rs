use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use regex::Regex;
use reqwest::Url;
use scraper::{Html, Selector};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::calendar;
use crate::config::Settings;
use crate::error::UnitError;
use crate::fetcher::{fetch_with_retry, PageSource};
use crate::model::GradeSheet;
use crate::parser::{self, table::clean_text, ExtractContext};

static GROUP_LINK_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("option, a").unwrap());
static GROUP_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[А-ЯЁA-Z]{1,6}-\d{2,4}[А-ЯЁа-яёA-Za-z]?$").unwrap());

const SEMESTERS: [u32; 2] = [1, 2];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Loading,
    Parsing,
    Done,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub step: String,
    pub current: usize,
    pub total: usize,
    pub status: ProgressStatus,
}

/// One (group, year, semester) page to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub group: String,
    pub academic_year: String,
    pub semester: u32,
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} sem {}", self.group, self.academic_year, self.semester)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlError {
    pub unit: String,
    pub error: UnitError,
}

impl fmt::Display for CrawlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.unit, self.error)
    }
}

#[derive(Debug, Default)]
pub struct CrawlOutcome {
    pub sheets: Vec<GradeSheet>,
    pub errors: Vec<CrawlError>,
    pub units: usize,
}

impl CrawlOutcome {
    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }

    pub fn fetch_failures(&self) -> usize {
        self.errors.iter().filter(|e| e.error.is_fetch()).count()
    }

    /// Nothing could be fetched at all, as opposed to pages without grades.
    pub fn source_unreachable(&self) -> bool {
        let failures = self.fetch_failures();
        if self.units == 0 {
            failures > 0
        } else {
            failures == self.units
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub base_url: String,
    pub timeout: Duration,
    pub retries: u32,
    pub backoff: Duration,
    pub concurrency: usize,
    pub today: NaiveDate,
}

impl CrawlOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        CrawlOptions {
            base_url: settings.base_url.clone(),
            timeout: settings.fetch_timeout(),
            retries: settings.retries,
            backoff: settings.backoff(),
            concurrency: settings.concurrency,
            today: calendar::today(),
        }
    }
}

pub fn faculty_url(base: &str, faculty: &str) -> Result<String> {
    let url = Url::parse_with_params(base, &[("faculty", faculty)])
        .with_context(|| format!("Invalid base URL {}", base))?;
    Ok(url.into())
}

/// The portal takes no session state: every page is addressed by query
/// parameters alone.
pub fn unit_url(base: &str, faculty: &str, unit: &Unit) -> Result<String> {
    let semester = unit.semester.to_string();
    let url = Url::parse_with_params(
        base,
        &[
            ("faculty", faculty),
            ("group", unit.group.as_str()),
            ("year", unit.academic_year.as_str()),
            ("semester", semester.as_str()),
        ],
    )
    .with_context(|| format!("Invalid base URL {}", base))?;
    Ok(url.into())
}

/// Group codes listed on a faculty page, in page order.
pub fn discover_groups(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let mut seen = HashSet::new();
    doc.select(&GROUP_LINK_SEL)
        .map(clean_text)
        .filter(|t| GROUP_CODE_RE.is_match(t))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

type UnitResult = (usize, Unit, Result<Vec<GradeSheet>, UnitError>);

/// Crawl every group × year × semester of one faculty.
///
/// Fetches run concurrently (bounded by `opts.concurrency`); results are
/// collected and reported from this task only, so `on_progress` sees a
/// monotonically increasing counter. A failing unit is recorded and skipped.
pub async fn crawl_and_extract<F>(
    source: Arc<dyn PageSource>,
    opts: &CrawlOptions,
    faculty: &str,
    years_count: usize,
    mut on_progress: F,
) -> Result<CrawlOutcome>
where
    F: FnMut(&Progress),
{
    let mut outcome = CrawlOutcome::default();
    let report = |step: String, current: usize, total: usize, status: ProgressStatus| Progress {
        step,
        current,
        total,
        status,
    };

    on_progress(&report("Discovering groups".into(), 0, 0, ProgressStatus::Loading));
    let listing_url = faculty_url(&opts.base_url, faculty)?;
    let groups = match fetch_with_retry(
        source.as_ref(),
        &listing_url,
        opts.timeout,
        opts.retries,
        opts.backoff,
    )
    .await
    {
        Ok(html) => discover_groups(&html),
        Err(e) => {
            warn!("Group listing for {} failed: {}", faculty, e);
            outcome.errors.push(CrawlError {
                unit: faculty.to_string(),
                error: e.into(),
            });
            on_progress(&report("Source unreachable".into(), 0, 0, ProgressStatus::Error));
            return Ok(outcome);
        }
    };
    if groups.is_empty() {
        outcome.errors.push(CrawlError {
            unit: faculty.to_string(),
            error: UnitError::NoGroupsFound,
        });
        on_progress(&report("No groups found".into(), 0, 0, ProgressStatus::Error));
        return Ok(outcome);
    }

    let years = calendar::academic_years(years_count, opts.today);
    let units: Vec<Unit> = groups
        .iter()
        .flat_map(|g| {
            years.iter().flat_map(move |y| {
                SEMESTERS.iter().map(move |s| Unit {
                    group: g.clone(),
                    academic_year: y.clone(),
                    semester: *s,
                })
            })
        })
        .collect();
    let total = units.len();
    outcome.units = total;
    info!(
        "Crawling {}: {} groups × {} years × {} semesters = {} pages",
        faculty,
        groups.len(),
        years.len(),
        SEMESTERS.len(),
        total
    );

    let concurrency = opts.concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let (tx, mut rx) = tokio::sync::mpsc::channel::<UnitResult>(concurrency * 2);

    for (idx, unit) in units.into_iter().enumerate() {
        let url = unit_url(&opts.base_url, faculty, &unit)?;
        let ctx = ExtractContext {
            url: Some(url.clone()),
            faculty: Some(faculty.to_string()),
            group: Some(unit.group.clone()),
            academic_year: Some(unit.academic_year.clone()),
            semester: Some(unit.semester),
            course: None,
            today: Some(opts.today),
        };
        let source = Arc::clone(&source);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();
        let (timeout, retries, backoff) = (opts.timeout, opts.retries, opts.backoff);

        tokio::spawn(async move {
            let Ok(_permit) = sem.acquire().await else {
                return;
            };
            let result = match fetch_with_retry(source.as_ref(), &url, timeout, retries, backoff).await {
                Ok(html) => {
                    let sheets = parser::extract(&html, &ctx);
                    if sheets.is_empty() {
                        Err(UnitError::NoGradeTablesFound)
                    } else {
                        Ok(sheets)
                    }
                }
                Err(e) => Err(UnitError::Fetch(e)),
            };
            let _ = tx.send((idx, unit, result)).await;
        });
    }

    // Drop our sender so rx closes when all tasks finish
    drop(tx);

    let mut collected: Vec<(usize, Vec<GradeSheet>)> = Vec::new();
    let mut failed: Vec<(usize, CrawlError)> = Vec::new();
    let mut current = 0;

    while let Some((idx, unit, result)) = rx.recv().await {
        current += 1;
        let step = match result {
            Ok(sheets) => {
                let step = format!("{}: {} sheets", unit, sheets.len());
                collected.push((idx, sheets));
                step
            }
            Err(error) => {
                warn!("{}: {}", unit, error);
                let err = CrawlError {
                    unit: unit.to_string(),
                    error,
                };
                let step = err.to_string();
                failed.push((idx, err));
                step
            }
        };
        on_progress(&report(step, current, total, ProgressStatus::Parsing));
    }

    // Completion order depends on the network; report in unit order.
    collected.sort_by_key(|(idx, _)| *idx);
    failed.sort_by_key(|(idx, _)| *idx);
    outcome.sheets = collected.into_iter().flat_map(|(_, s)| s).collect();
    outcome.errors.extend(failed.into_iter().map(|(_, e)| e));

    info!(
        "Crawl finished: {} sheets, {} errors ({} fetch failures)",
        outcome.sheets.len(),
        outcome.errors.len(),
        outcome.fetch_failures()
    );
    on_progress(&report("Finished".into(), current, total, ProgressStatus::Done));
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_BASE_URL;
    use crate::error::FetchError;
    use async_trait::async_trait;
    use std::collections::HashMap;

    const NO_TABLES: &str = "<html><body><p>Ведомости не найдены</p></body></html>";

    struct MapSource {
        pages: HashMap<String, Result<String, FetchError>>,
        fallback: Result<String, FetchError>,
    }

    #[async_trait]
    impl PageSource for MapSource {
        async fn fetch(&self, url: &str, _timeout: Duration) -> Result<String, FetchError> {
            self.pages.get(url).cloned().unwrap_or_else(|| self.fallback.clone())
        }
    }

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
    }

    fn opts(concurrency: usize) -> CrawlOptions {
        CrawlOptions {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(1),
            retries: 0,
            backoff: Duration::ZERO,
            concurrency,
            today: NaiveDate::from_ymd_opt(2025, 10, 1).unwrap(),
        }
    }

    fn unit(group: &str, semester: u32) -> Unit {
        Unit {
            group: group.into(),
            academic_year: "2025-2026".into(),
            semester,
        }
    }

    #[test]
    fn groups_from_options_and_links() {
        assert_eq!(
            discover_groups(&fixture("groups")),
            vec!["УБ-21", "УБ-22", "ИС-221", "ПИ-23"]
        );
        assert!(discover_groups(NO_TABLES).is_empty());
    }

    #[test]
    fn unit_url_encodes_query() {
        let url = unit_url("https://example.org/Ved/Default.aspx", "УИТС", &unit("УБ-21", 2)).unwrap();
        assert!(url.starts_with("https://example.org/Ved/Default.aspx?faculty="));
        assert!(url.ends_with("&year=2025-2026&semester=2"));
        assert!(!url.contains("УБ"));
        assert!(faculty_url("not a url", "УИТС").is_err());
    }

    #[tokio::test]
    async fn crawl_isolates_unit_failures() {
        let o = opts(3);
        let mut pages = HashMap::new();
        pages.insert(faculty_url(&o.base_url, "УИТС").unwrap(), Ok(fixture("groups")));
        pages.insert(
            unit_url(&o.base_url, "УИТС", &unit("УБ-21", 1)).unwrap(),
            Ok(fixture("single_table")),
        );
        pages.insert(
            unit_url(&o.base_url, "УИТС", &unit("УБ-22", 1)).unwrap(),
            Err(FetchError::Timeout(1)),
        );
        let source = Arc::new(MapSource {
            pages,
            fallback: Ok(NO_TABLES.to_string()),
        });

        let mut seen = Vec::new();
        let outcome = crawl_and_extract(source, &o, "УИТС", 1, |p| seen.push(p.clone()))
            .await
            .unwrap();

        assert_eq!(outcome.units, 8);
        assert_eq!(outcome.sheets.len(), 1);
        let sheet = &outcome.sheets[0];
        assert_eq!(sheet.faculty, "УИТС");
        assert_eq!(sheet.group_name, "УБ-21");
        assert_eq!(sheet.academic_year, "2025-2026");
        assert_eq!(sheet.semester, 1);

        assert_eq!(outcome.errors.len(), 7);
        assert_eq!(outcome.fetch_failures(), 1);
        assert!(!outcome.source_unreachable());
        assert_eq!(outcome.errors[0].to_string(), "УБ-21 2025-2026 sem 2: no grade tables found");
        assert_eq!(outcome.errors[1].to_string(), "УБ-22 2025-2026 sem 1: timeout (1s)");

        let counters: Vec<usize> = seen
            .iter()
            .filter(|p| p.status == ProgressStatus::Parsing)
            .map(|p| p.current)
            .collect();
        assert_eq!(counters, (1..=8).collect::<Vec<_>>());
        assert!(seen.iter().all(|p| p.current <= p.total || p.total == 0));
        assert_eq!(seen.last().unwrap().status, ProgressStatus::Done);
    }

    #[tokio::test]
    async fn unreachable_source_is_distinguishable() {
        let o = opts(4);
        let mut pages = HashMap::new();
        pages.insert(faculty_url(&o.base_url, "УИТС").unwrap(), Ok(fixture("groups")));
        let source = Arc::new(MapSource {
            pages,
            fallback: Err(FetchError::Http(502)),
        });
        let outcome = crawl_and_extract(source, &o, "УИТС", 1, |_| {}).await.unwrap();
        assert!(outcome.sheets.is_empty());
        assert!(outcome.source_unreachable());
        assert_eq!(outcome.fetch_failures(), 8);
    }

    #[tokio::test]
    async fn listing_failure_stops_early() {
        let source = Arc::new(MapSource {
            pages: HashMap::new(),
            fallback: Err(FetchError::Timeout(1)),
        });
        let mut last = None;
        let outcome = crawl_and_extract(source, &opts(2), "УИТС", 2, |p| last = Some(p.clone()))
            .await
            .unwrap();
        assert_eq!(outcome.units, 0);
        assert!(outcome.source_unreachable());
        assert_eq!(last.unwrap().status, ProgressStatus::Error);
    }

    #[tokio::test]
    async fn no_groups_is_recorded() {
        let source = Arc::new(MapSource {
            pages: HashMap::new(),
            fallback: Ok(NO_TABLES.to_string()),
        });
        let outcome = crawl_and_extract(source, &opts(2), "УИТС", 1, |_| {}).await.unwrap();
        assert!(outcome.sheets.is_empty());
        assert_eq!(outcome.errors[0].error, UnitError::NoGroupsFound);
        assert!(!outcome.source_unreachable());
    }
}
