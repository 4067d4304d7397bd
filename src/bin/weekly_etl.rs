use std::time::Instant;

use chrono::Utc;
use spot_etl::{
    init_logging, log_app_finish, log_app_start, log_store_selected, logging_config_from_env,
    pipeline_config_from_env, HttpPriceHistoryService, HttpServiceConfig, LocalDirObjectStore,
    Pipeline, PriceWindow, RunOutcome,
};

const APP: &str = "weekly_etl";

fn main() -> Result<(), Box<dyn std::error::Error>> {
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

    let window = PriceWindow::trailing_week(Utc::now())?;
    let pipeline = Pipeline::new(&service, &store, pipeline_config_from_env());

    match pipeline.run_window(&window)? {
        RunOutcome::Completed(report) => println!(
            "window {} | events={} pages={} minutes={} corpus={} rows={}",
            report.window_key,
            report.raw_events,
            report.pages,
            report.minutes,
            report.merge.corpus_key,
            report.merge.total_rows
        ),
        RunOutcome::Resumed { window_key, merge } => println!(
            "window {window_key} | merged stored summary into {} rows={}",
            merge.corpus_key, merge.total_rows
        ),
        RunOutcome::Skipped { window_key } => {
            println!("window {window_key} | already processed, skipped")
        }
    }

    log_app_finish(APP, started.elapsed().as_millis() as u64);
    Ok(())
}
