//! Scheduled job: proactively regenerate factoid caches for popular councils.
//!
//! Usage:
//!   warmup_councils                      # warm everything currently due
//!   warmup_councils --priority 1         # only priority-1 schedules
//!   warmup_councils --force              # treat every schedule as due
//!   warmup_councils --dry-run            # list what would be warmed
//!   warmup_councils --create-schedules   # rebuild schedules from usage stats
//!   warmup_councils --max-councils 20    # cap this run's batch

use std::process::ExitCode;

use chrono::Utc;
use council_factoids::bootstrap;
use council_factoids::notify::WebhookNotifier;
use council_factoids::warmup::{schedules_from_usage, CacheWarmer, ScheduleBook};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_SCHEDULES_PATH: &str = "state/warmup_schedules.json";

struct Args {
    priority: Option<u8>,
    force: bool,
    dry_run: bool,
    create_schedules: bool,
    max_councils: Option<usize>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        priority: None,
        force: false,
        dry_run: false,
        create_schedules: false,
        max_councils: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--priority" => {
                let v = iter.next().ok_or("--priority needs a value")?;
                args.priority = Some(v.parse().map_err(|_| "invalid --priority value")?);
            }
            "--max-councils" => {
                let v = iter.next().ok_or("--max-councils needs a value")?;
                args.max_councils = Some(v.parse().map_err(|_| "invalid --max-councils value")?);
            }
            "--force" => args.force = true,
            "--dry-run" => args.dry_run = true,
            "--create-schedules" => args.create_schedules = true,
            other => return Err(format!("unknown flag: {other}")),
        }
    }
    Ok(args)
}

/// Usage statistics: a JSON file of `[[slug, hits], ...]` when configured,
/// otherwise every known council with equal weight.
async fn load_usage(
    repo: &council_factoids::gather::SharedRepository,
) -> anyhow::Result<Vec<(String, u64)>> {
    if let Ok(path) = std::env::var("FACTOID_USAGE_PATH") {
        let raw = std::fs::read_to_string(&path)?;
        return Ok(serde_json::from_str(&raw)?);
    }
    Ok(repo.list_slugs().await?.into_iter().map(|s| (s, 1)).collect())
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().compact())
        .init();

    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match bootstrap::build_runtime() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("bootstrap failed: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let book = ScheduleBook::new(
        std::env::var("FACTOID_WARMUP_SCHEDULES_PATH")
            .unwrap_or_else(|_| DEFAULT_SCHEDULES_PATH.to_string()),
    );

    if args.create_schedules {
        let usage = match load_usage(&runtime.repo).await {
            Ok(u) => u,
            Err(e) => {
                eprintln!("usage stats unavailable: {e:#}");
                return ExitCode::FAILURE;
            }
        };
        return match book.upsert(schedules_from_usage(&usage, Utc::now())) {
            Ok(count) => {
                println!("{count} warmup schedules written");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("schedule write failed: {e:#}");
                ExitCode::FAILURE
            }
        };
    }

    let now = Utc::now();
    let mut all = book.load();
    if all.is_empty() {
        println!("no warmup schedules; run with --create-schedules first");
        return ExitCode::SUCCESS;
    }

    // Warm a selection, but merge its state back into the full book so a
    // --priority run never drops the other tiers' entries.
    let mut selected: Vec<_> = all
        .iter()
        .filter(|s| args.priority.map_or(true, |p| s.priority == p))
        .cloned()
        .collect();
    if args.force {
        for s in &mut selected {
            s.next_warmup = now;
        }
    }

    let mut warmer = CacheWarmer::new(runtime.pipeline, WebhookNotifier::from_env());
    if let Some(max) = args.max_councils {
        warmer = warmer.with_max_councils(max);
    }

    let report = warmer.run(&mut selected, now, args.dry_run).await;
    for updated in selected {
        if let Some(slot) = all.iter_mut().find(|e| e.council == updated.council) {
            *slot = updated;
        }
    }
    if let Err(e) = book.save(&all) {
        eprintln!("schedule state write failed: {e:#}");
    }

    println!(
        "warmed {} councils, {} failed, {} not due",
        report.warmed.len(),
        report.failed.len(),
        report.skipped
    );
    if report.failed.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
