use std::process::ExitCode;
use std::time::Instant;

use chrono::Utc;
use spot_etl::{
    init_logging, log_app_finish, log_app_start, log_store_selected, logging_config_from_env,
    pipeline_config_from_env, DayOutcome, HttpPriceHistoryService, HttpServiceConfig,
    LocalDirObjectStore, MonthSelector, Pipeline,
};

const APP: &str = "monthly_backfill";

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

/// `Ok(false)` when at least one day failed.
fn run() -> Result<bool, Box<dyn std::error::Error>> {
    let Some(raw) = std::env::args().nth(1) else {
        return Err("usage: monthly_backfill <MM-YYYY>".into());
    };
    let month = MonthSelector::parse(&raw)?;

    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(APP, &logging_cfg);
    let started = Instant::now();

    let endpoint = std::env::var("SPOT_ETL_PRICE_HISTORY_URL")
        .map_err(|_| "SPOT_ETL_PRICE_HISTORY_URL must point at the price history gateway")?;
    let service = HttpPriceHistoryService::new(HttpServiceConfig::new(endpoint))?;

    let store_root =
        std::env::var("SPOT_ETL_STORE_ROOT").unwrap_or_else(|_| "data/store".to_string());
    log_store_selected(APP, "local_dir", &store_root);
    let store = LocalDirObjectStore::new(&store_root);

    let pipeline = Pipeline::new(&service, &store, pipeline_config_from_env());
    let report = pipeline.backfill_month(&month, Utc::now().date_naive())?;

    for day in &report.days {
        match &day.result {
            Ok(DayOutcome::Written { events }) => {
                println!("{} | written {} events -> {}", day.date, events, day.key)
            }
            Ok(DayOutcome::AlreadyPresent) => println!("{} | present, skipped", day.date),
            Ok(DayOutcome::NoHistory) => println!("{} | no history available", day.date),
            Err(err) => println!("{} | failed: {err}", day.date),
        }
    }
    if let Some(date) = report.stopped_at {
        println!("stopped at {date}: day not fully elapsed");
    }

    let clean = report.failures().next().is_none();
    log_app_finish(APP, started.elapsed().as_millis() as u64);
    Ok(clean)
}
