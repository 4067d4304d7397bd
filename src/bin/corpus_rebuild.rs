use std::time::Instant;

use spot_etl::{
    init_logging, log_app_finish, log_app_start, log_store_selected, logging_config_from_env,
    pipeline_config_from_env, rebuild_corpus_from_quartiles, CorpusConfig, LocalDirObjectStore,
};

const APP: &str = "corpus_rebuild";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(APP, &logging_cfg);
    let started = Instant::now();

    let store_root =
        std::env::var("SPOT_ETL_STORE_ROOT").unwrap_or_else(|_| "data/store".to_string());
    log_store_selected(APP, "local_dir", &store_root);
    let store = LocalDirObjectStore::new(&store_root);

    let pipeline_cfg = pipeline_config_from_env();
    let layout = &pipeline_cfg.layout;
    let corpus_key = std::env::var("SPOT_ETL_CORPUS_KEY")
        .unwrap_or_else(|_| format!("{}trainingData.csv", layout.corpus_prefix));

    let report = rebuild_corpus_from_quartiles(
        &store,
        &layout.quartile_prefix,
        CorpusConfig {
            prefix: layout.corpus_prefix.clone(),
            policy: pipeline_cfg.merge_policy,
        },
        &corpus_key,
    )?;

    println!(
        "corpus {} | sources={} windows={} rows={}",
        report.corpus_key, report.source_files, report.windows, report.total_rows
    );

    log_app_finish(APP, started.elapsed().as_millis() as u64);
    Ok(())
}
