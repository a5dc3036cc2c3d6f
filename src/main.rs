mod calendar;
mod config;
mod crawl;
mod db;
mod demo;
mod error;
mod fetcher;
mod model;
mod parser;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::Settings;
use crate::crawl::{CrawlOptions, Progress};
use crate::db::{GradeStore, SheetFilter, SqliteStore};
use crate::fetcher::HttpFetcher;
use crate::model::{AssessmentType, GradeSheet};

const DEFAULT_FACULTY: &str = "УИТС";
const SHOWN_ERRORS: usize = 5;

#[derive(Parser)]
#[command(name = "ved_scraper", about = "Grade sheet scraper for rating.vsuet.ru")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether the rating portal is reachable
    Check,
    /// Crawl one faculty and save its grade sheets
    Crawl {
        #[arg(short, long, default_value = DEFAULT_FACULTY)]
        faculty: String,
        /// Number of academic years back from the current one
        #[arg(short = 'y', long, default_value = "2")]
        years: usize,
        /// Save nothing instead of demo data when the portal yields nothing
        #[arg(long)]
        no_demo: bool,
    },
    /// Generate and save demo data
    Demo {
        /// Single faculty (default: the built-in list)
        #[arg(short, long)]
        faculty: Option<String>,
        #[arg(short = 'y', long, default_value = "2")]
        years: usize,
        /// RNG seed for reproducible data
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Extract grade sheets from saved HTML pages
    Extract {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long)]
        faculty: Option<String>,
        #[arg(long)]
        group: Option<String>,
        /// Academic year, e.g. 2025-2026
        #[arg(long)]
        year: Option<String>,
        #[arg(long)]
        semester: Option<u32>,
        /// Save to the database instead of printing JSON
        #[arg(long)]
        save: bool,
    },
    /// Show database statistics
    Stats,
    /// List faculties with sheet counts
    Faculties,
    /// List groups
    Groups {
        #[arg(short, long)]
        faculty: Option<String>,
    },
    /// Search sheets, or student records when --gradebook is given
    Search {
        #[arg(short, long)]
        gradebook: Option<String>,
        #[arg(long)]
        faculty: Option<String>,
        #[arg(long)]
        group: Option<String>,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        course: Option<u32>,
        #[arg(long)]
        year: Option<String>,
        #[arg(long)]
        semester: Option<u32>,
        /// экзамен, зачёт, КП, дифзачёт
        #[arg(long = "type")]
        kind: Option<String>,
        #[arg(long)]
        closed: Option<bool>,
        #[arg(short, long, default_value = "1")]
        page: usize,
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// All records of one gradebook, by term
    Gradebook { number: String },
    /// One sheet with its students
    Sheet { id: i64 },
    /// Delete all saved sheets and records
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load().context("Invalid VED_* configuration")?;

    let result = match cli.command {
        Commands::Check => {
            let fetcher = HttpFetcher::new()?;
            let a = fetcher::check_availability(
                &fetcher,
                &settings.base_url,
                settings.check_timeout(),
                settings.min_body_chars,
            )
            .await;
            let state = if a.available { "available" } else { "unavailable" };
            println!("{}: {} ({})", settings.base_url, state, a.message);
            Ok(())
        }
        Commands::Crawl {
            faculty,
            years,
            no_demo,
        } => run_crawl(&settings, &faculty, years, no_demo).await,
        Commands::Demo {
            faculty,
            years,
            seed,
        } => {
            let store = SqliteStore::open(&settings.db_path)?;
            let sheets = demo_sheets(faculty.as_deref(), years, seed);
            let s = store.save_all(&sheets)?;
            println!("Generated {} demo sheets, {} records.", s.saved, s.records);
            Ok(())
        }
        Commands::Extract {
            files,
            faculty,
            group,
            year,
            semester,
            save,
        } => {
            let ctx = parser::ExtractContext {
                faculty,
                group,
                academic_year: year,
                semester,
                ..Default::default()
            };
            let sheets = extract_files(&files, &ctx)?;
            if save {
                let store = SqliteStore::open(&settings.db_path)?;
                let s = store.save_all(&sheets)?;
                println!(
                    "Extracted {} sheets from {} files, saved {} records.",
                    s.saved,
                    files.len(),
                    s.records
                );
            } else {
                println!("{}", serde_json::to_string_pretty(&sheets)?);
            }
            Ok(())
        }
        Commands::Stats => {
            let store = SqliteStore::open(&settings.db_path)?;
            let s = store.stats()?;
            println!("Sheets:   {}", s.sheets);
            println!("Students: {}", s.students);
            if !s.by_faculty.is_empty() {
                println!("\n--- By faculty ---");
                for (name, n) in &s.by_faculty {
                    println!("  {:<32} {:>6}", truncate(name, 32), n);
                }
                println!("\n--- By year ---");
                for (year, n) in &s.by_year {
                    println!("  {:<32} {:>6}", year, n);
                }
            }
            Ok(())
        }
        Commands::Faculties => {
            let store = SqliteStore::open(&settings.db_path)?;
            let rows = store.faculties()?;
            if rows.is_empty() {
                println!("No faculties yet. Run 'crawl' or 'demo' first.");
                return Ok(());
            }
            for (name, n) in &rows {
                println!("{:<40} {:>6}", truncate(name, 40), n);
            }
            Ok(())
        }
        Commands::Groups { faculty } => {
            let store = SqliteStore::open(&settings.db_path)?;
            let rows = store.groups(faculty.as_deref())?;
            if rows.is_empty() {
                println!("No groups found.");
                return Ok(());
            }
            println!("{:<12} | {:<32} | {:>6}", "Group", "Faculty", "Sheets");
            println!("{}", "-".repeat(56));
            for r in &rows {
                println!(
                    "{:<12} | {:<32} | {:>6}",
                    r.group_name,
                    truncate(&r.faculty, 32),
                    r.sheets
                );
            }
            Ok(())
        }
        Commands::Search {
            gradebook,
            faculty,
            group,
            subject,
            course,
            year,
            semester,
            kind,
            closed,
            page,
            limit,
        } => {
            let store = SqliteStore::open(&settings.db_path)?;
            match gradebook.filter(|g| !g.trim().is_empty()) {
                Some(g) => print_records(&store.search_records(&g, page, limit)?),
                None => {
                    let filter = SheetFilter {
                        faculty,
                        group,
                        subject,
                        course,
                        academic_year: year,
                        semester,
                        assessment_type: kind.as_deref().map(AssessmentType::from_label),
                        closed,
                    };
                    print_sheets(&store.search_sheets(&filter, page, limit)?);
                }
            }
            Ok(())
        }
        Commands::Gradebook { number } => {
            let store = SqliteStore::open(&settings.db_path)?;
            let Some(report) = store.gradebook_report(&number)? else {
                println!("Gradebook {} not found.", number.trim());
                return Ok(());
            };
            println!("Gradebook {}", report.gradebook);
            for term in &report.terms {
                println!("\n--- {} semester {} ---", term.academic_year, term.semester);
                for e in &term.records {
                    println!(
                        "  {:<32} | {:<10} | {:>5} | {}",
                        truncate(&e.subject, 32),
                        e.assessment_type.label(),
                        opt(e.record.total),
                        e.record.grade.as_deref().unwrap_or("-")
                    );
                }
            }
            println!(
                "\n{} records | {} points | average {}",
                report.total_records, report.total_points, report.avg_points
            );
            println!("{}", format_grades(&report.grades));
            Ok(())
        }
        Commands::Sheet { id } => {
            let store = SqliteStore::open(&settings.db_path)?;
            let Some(d) = store.sheet_detail(id)? else {
                println!("Sheet {} not found.", id);
                return Ok(());
            };
            let s = &d.sheet;
            println!(
                "{} | {} | {} | {} sem {} | {} | {}",
                s.faculty,
                s.group_name,
                s.subject,
                s.academic_year,
                s.semester,
                s.assessment_type,
                if s.closed { "closed" } else { "open" }
            );
            println!(
                "\n{:<12} | {:>4} | {:>4} | {:>4} | {:>4} | {:>5} | {}",
                "Gradebook", "KT1", "KT2", "KT3", "KT4", "Total", "Grade"
            );
            println!("{}", "-".repeat(60));
            for r in &d.students {
                println!(
                    "{:<12} | {:>4} | {:>4} | {:>4} | {:>4} | {:>5} | {}",
                    r.gradebook,
                    opt(r.score1),
                    opt(r.score2),
                    opt(r.score3),
                    opt(r.score4),
                    opt(r.total),
                    r.grade.as_deref().unwrap_or("-")
                );
            }
            println!(
                "\n{} students | avg {} | min {} | max {}",
                d.students.len(),
                d.avg_total,
                d.min_total,
                d.max_total
            );
            println!("{}", format_grades(&d.grades));
            Ok(())
        }
        Commands::Clear => {
            let store = SqliteStore::open(&settings.db_path)?;
            store.clear_all()?;
            println!("All sheets and records deleted.");
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// Check, crawl, fall back to demo data, save.
async fn run_crawl(settings: &Settings, faculty: &str, years: usize, no_demo: bool) -> anyhow::Result<()> {
    use indicatif::{ProgressBar, ProgressStyle};

    let store = SqliteStore::open(&settings.db_path)?;
    let fetcher = Arc::new(HttpFetcher::new()?);

    let availability = fetcher::check_availability(
        fetcher.as_ref(),
        &settings.base_url,
        settings.check_timeout(),
        settings.min_body_chars,
    )
    .await;

    let mut errors = Vec::new();
    let mut sheets = Vec::new();
    if availability.available {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("#>-"),
        );
        let opts = CrawlOptions::from_settings(settings);
        let outcome = crawl::crawl_and_extract(fetcher, &opts, faculty, years, |p: &Progress| {
            pb.set_length(p.total as u64);
            pb.set_position(p.current as u64);
            pb.set_message(truncate(&p.step, 48));
        })
        .await?;
        pb.finish_and_clear();

        println!(
            "Crawled {} pages: {} sheets, {} errors.",
            outcome.units,
            outcome.sheets.len(),
            outcome.errors.len()
        );
        if outcome.source_unreachable() {
            println!("Portal stopped answering during the crawl.");
        }
        errors = outcome.error_messages();
        sheets = outcome.sheets;
    } else {
        println!("Portal unavailable: {}", availability.message);
    }

    if sheets.is_empty() {
        if no_demo {
            println!("Nothing extracted; --no-demo given, saving nothing.");
        } else {
            println!("Nothing extracted; generating demo data instead.");
            sheets = demo_sheets(Some(faculty), years, None);
        }
    }

    let s = store.save_all(&sheets)?;
    println!("Saved {} sheets, {} records.", s.saved, s.records);

    if !errors.is_empty() {
        println!("\n--- First {} of {} errors ---", SHOWN_ERRORS.min(errors.len()), errors.len());
        for e in errors.iter().take(SHOWN_ERRORS) {
            println!("  {}", e);
        }
    }
    Ok(())
}

fn demo_sheets(faculty: Option<&str>, years: usize, seed: Option<u64>) -> Vec<GradeSheet> {
    let years = calendar::academic_years(years, calendar::today());
    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };
    demo::generate(&years, faculty, &mut rng)
}

fn extract_files(files: &[PathBuf], ctx: &parser::ExtractContext) -> anyhow::Result<Vec<GradeSheet>> {
    use rayon::prelude::*;

    let per_file: Vec<Vec<GradeSheet>> = files
        .par_iter()
        .map(|path| {
            let html = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let ctx = parser::ExtractContext {
                url: Some(path.display().to_string()),
                ..ctx.clone()
            };
            Ok(parser::extract(&html, &ctx))
        })
        .collect::<anyhow::Result<_>>()?;
    Ok(per_file.into_iter().flatten().collect())
}

fn print_sheets(page: &db::Page<db::SheetRow>) {
    if page.results.is_empty() {
        println!("No sheets found.");
        return;
    }
    println!(
        "{:>5} | {:<20} | {:<8} | {:<28} | {:<9} | {:>3} | {:<9} | {:<6}",
        "ID", "Faculty", "Group", "Subject", "Year", "Sem", "Type", "Closed"
    );
    println!("{}", "-".repeat(108));
    for s in &page.results {
        println!(
            "{:>5} | {:<20} | {:<8} | {:<28} | {:<9} | {:>3} | {:<9} | {:<6}",
            s.id,
            truncate(&s.faculty, 20),
            s.group_name,
            truncate(&s.subject, 28),
            s.academic_year,
            s.semester,
            s.assessment_type.label(),
            if s.closed { "yes" } else { "no" }
        );
    }
    print_pagination(&page.pagination);
}

fn print_records(page: &db::Page<db::RecordHit>) {
    if page.results.is_empty() {
        println!("No records found.");
        return;
    }
    println!(
        "{:<12} | {:<8} | {:<28} | {:<9} | {:>3} | {:>5} | {}",
        "Gradebook", "Group", "Subject", "Year", "Sem", "Total", "Grade"
    );
    println!("{}", "-".repeat(90));
    for h in &page.results {
        println!(
            "{:<12} | {:<8} | {:<28} | {:<9} | {:>3} | {:>5} | {}",
            h.record.gradebook,
            h.sheet.group_name,
            truncate(&h.sheet.subject, 28),
            h.sheet.academic_year,
            h.sheet.semester,
            opt(h.record.total),
            h.record.grade.as_deref().unwrap_or("-")
        );
    }
    print_pagination(&page.pagination);
}

fn print_pagination(p: &db::Pagination) {
    println!("\nPage {}/{} | {} total", p.page, p.pages.max(1), p.total);
}

fn format_grades(grades: &db::GradeCounts) -> String {
    grades
        .iter()
        .map(|(g, n)| format!("{}: {}", g, n))
        .collect::<Vec<_>>()
        .join(" | ")
}

fn opt(v: Option<i64>) -> String {
    v.map(|n| n.to_string()).unwrap_or_else(|| "-".into())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
