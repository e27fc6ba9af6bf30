//! Scheduled job: regenerate the sitewide (cross-council) factoids.
//!
//! Usage:
//!   update_sitewide --check-schedule   # normal cron tick
//!   update_sitewide --force            # bypass window + change checks
//!   update_sitewide --dry-run          # report without generating
//!   update_sitewide --init-schedule    # write a default schedule file

use std::process::ExitCode;
use std::sync::Arc;

use council_factoids::bootstrap;
use council_factoids::sitewide::{ChangeLog, SitewideGenerator, SitewideScheduler, TickOutcome};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_SCHEDULE_PATH: &str = "state/sitewide_schedule.json";
const DEFAULT_CHANGELOG_PATH: &str = "state/factoid_changes.json";
const DEFAULT_MAX_FIELDS: usize = 8;

struct Args {
    check_schedule: bool,
    force: bool,
    dry_run: bool,
    init_schedule: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        check_schedule: false,
        force: false,
        dry_run: false,
        init_schedule: false,
    };
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--check-schedule" => args.check_schedule = true,
            "--force" => args.force = true,
            "--dry-run" => args.dry_run = true,
            "--init-schedule" => args.init_schedule = true,
            other => return Err(format!("unknown flag: {other}")),
        }
    }
    if !(args.check_schedule || args.force || args.dry_run || args.init_schedule) {
        return Err("pass one of --check-schedule | --force | --dry-run | --init-schedule".into());
    }
    Ok(args)
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

    let schedule_path = std::env::var("FACTOID_SCHEDULE_PATH")
        .unwrap_or_else(|_| DEFAULT_SCHEDULE_PATH.to_string());
    let changelog_path = std::env::var("FACTOID_CHANGELOG_PATH")
        .unwrap_or_else(|_| DEFAULT_CHANGELOG_PATH.to_string());
    let max_fields = std::env::var("FACTOID_SITEWIDE_MAX_FIELDS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_MAX_FIELDS);

    let generator = SitewideGenerator::new(
        runtime.repo,
        runtime.pipeline.llm().clone(),
        runtime.cache.clone(),
        runtime.cache.config().sitewide_limit,
        max_fields,
    );
    let scheduler = SitewideScheduler::new(
        schedule_path,
        Arc::new(ChangeLog::at_path(changelog_path)),
        generator,
    );

    if args.init_schedule {
        return match scheduler.init_schedule() {
            Ok(()) => {
                println!("schedule initialized");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("init failed: {e:#}");
                ExitCode::FAILURE
            }
        };
    }

    match scheduler.tick(args.force, args.dry_run).await {
        TickOutcome::NotInWindow => {
            println!("no trigger window open, nothing to do");
            ExitCode::SUCCESS
        }
        TickOutcome::NoChanges => {
            println!("no data changes since last generation, skipping");
            ExitCode::SUCCESS
        }
        TickOutcome::WouldGenerate(_) => {
            println!("dry run: would regenerate sitewide factoids");
            ExitCode::SUCCESS
        }
        TickOutcome::Generated { factoid_count } => {
            println!("generated {factoid_count} sitewide factoids");
            ExitCode::SUCCESS
        }
        TickOutcome::Failed(reason) => {
            eprintln!("generation failed: {reason}");
            ExitCode::FAILURE
        }
    }
}
