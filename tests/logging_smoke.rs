use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::Value;
use spot_etl::{
    log_app_finish, log_app_start, log_store_selected, logging_config_from_lookup,
    InMemoryObjectStore, LoggingConfig, MonthSelector, Pipeline, PipelineConfig,
    PriceChangeEvent, PriceHistoryPage, PriceHistoryQuery, PriceHistoryService,
    PriceHistoryServiceError, PriceWindow, DEFAULT_INSTANCE_TYPE,
};
use tracing::dispatcher::with_default;
use tracing_subscriber::EnvFilter;

/// Log sink handed to the subscriber through a closure `MakeWriter`.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// One captured JSON log line.
struct Captured {
    target: String,
    fields: Value,
}

impl Captured {
    fn event(&self) -> Option<&str> {
        self.fields.get("event").and_then(Value::as_str)
    }

    fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}

struct Captures(Vec<Captured>);

impl Captures {
    fn events(&self) -> Vec<&str> {
        self.0.iter().filter_map(Captured::event).collect()
    }

    fn find(&self, event: &str) -> Option<&Captured> {
        self.0.iter().find(|line| line.event() == Some(event))
    }
}

fn capture_logs(filter: &str, f: impl FnOnce()) -> Captures {
    let buffer = LogBuffer::default();
    let sink = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_ansi(false)
        .with_target(true)
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(move || sink.clone())
        .finish();
    let dispatch = tracing::Dispatch::new(subscriber);

    with_default(&dispatch, f);

    let bytes = buffer.0.lock().unwrap().clone();
    let lines = String::from_utf8_lossy(&bytes)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let value: Value = serde_json::from_str(line).expect("log line should be JSON");
            Captured {
                target: value["target"].as_str().unwrap_or_default().to_string(),
                fields: value["fields"].clone(),
            }
        })
        .collect();
    Captures(lines)
}

fn crate_filter() -> String {
    LoggingConfig::default().filter_directives()
}

/// Returns every scripted event up to the query end in a single page.
struct SinglePageService {
    events: Vec<PriceChangeEvent>,
}

impl PriceHistoryService for SinglePageService {
    fn query(&self, query: &PriceHistoryQuery) -> Result<PriceHistoryPage, PriceHistoryServiceError> {
        Ok(PriceHistoryPage {
            events: self
                .events
                .iter()
                .filter(|event| event.timestamp <= query.end)
                .cloned()
                .collect(),
            next_token: None,
        })
    }
}

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 10, day, hour, 0, 0).unwrap()
}

fn event(ts: DateTime<Utc>, price: &str) -> PriceChangeEvent {
    PriceChangeEvent {
        timestamp: ts,
        price: price.to_string(),
        instance_class: DEFAULT_INSTANCE_TYPE.to_string(),
        availability_zone: None,
        product_description: None,
    }
}

#[test]
fn successful_window_emits_stage_events() {
    let service = SinglePageService {
        events: vec![event(at(3, 20), "0.5716"), event(at(5, 9), "0.6012")],
    };
    let store = InMemoryObjectStore::new();
    let window = PriceWindow::trailing_week(at(11, 8)).unwrap();

    let logs = capture_logs(&crate_filter(), || {
        let pipeline = Pipeline::new(&service, &store, PipelineConfig::default());
        pipeline
            .run_window(&window)
            .expect("seeded window should complete");
    });

    let events = logs.events();
    for name in [
        "pipeline.window.start",
        "price_history.fetch.finish",
        "pipeline.artifact.written",
        "reconstruct.finish",
        "quartiles.reduce.finish",
        "corpus.merge.finish",
        "pipeline.window.finish",
    ] {
        assert!(events.contains(&name), "missing {name} in {events:?}");
    }
    assert_eq!(events.first(), Some(&"pipeline.window.start"));
    assert_eq!(events.last(), Some(&"pipeline.window.finish"));
}

#[test]
fn unseeded_window_logs_the_failed_window() {
    let service = SinglePageService {
        events: vec![event(at(5, 9), "0.6012")],
    };
    let store = InMemoryObjectStore::new();
    let window = PriceWindow::trailing_week(at(11, 8)).unwrap();

    let logs = capture_logs(&crate_filter(), || {
        let pipeline = Pipeline::new(&service, &store, PipelineConfig::default());
        pipeline
            .run_window(&window)
            .expect_err("window without a seed price should fail");
    });

    let failed = logs
        .find("pipeline.window.error")
        .expect("failed window should be logged");
    assert_eq!(failed.field("window_key"), Some("2021_10_04"));
    assert!(logs.find("pipeline.window.finish").is_none());
}

#[test]
fn backfill_warns_about_days_without_history() {
    let service = SinglePageService { events: Vec::new() };
    let store = InMemoryObjectStore::new();
    let month = MonthSelector::parse("10-2021").unwrap();

    let logs = capture_logs(&crate_filter(), || {
        let pipeline = Pipeline::new(&service, &store, PipelineConfig::default());
        pipeline
            .backfill_month(&month, NaiveDate::from_ymd_opt(2021, 10, 3).unwrap())
            .expect("backfill of elapsed days should run");
    });

    let events = logs.events();
    for name in [
        "price_history.fetch.empty",
        "pipeline.backfill.no_history",
        "pipeline.backfill.incomplete_day",
        "pipeline.backfill.finish",
    ] {
        assert!(events.contains(&name), "missing {name} in {events:?}");
    }
}

#[test]
fn app_lifecycle_helpers_emit_baseline_events() {
    let cfg = logging_config_from_lookup(|name| {
        (name == "SPOT_ETL_LOG_LEVEL").then(|| "debug".to_string())
    });
    let logs = capture_logs(&cfg.filter_directives(), || {
        log_app_start("weekly_etl", &cfg);
        log_store_selected("weekly_etl", "local_dir", "data/store");
        log_app_finish("weekly_etl", 42);
    });

    assert_eq!(logs.events(), ["app.start", "store.selected", "app.finish"]);
    assert!(logs.0.iter().all(|line| line.field("component") == Some("weekly_etl")));
    let start = logs.find("app.start").unwrap();
    assert_eq!(start.field("filter"), Some("warn,spot_etl=debug"));
    assert_eq!(logs.find("store.selected").unwrap().field("kind"), Some("local_dir"));
}

#[test]
fn bare_level_keeps_dependency_chatter_out() {
    let logs = capture_logs(&crate_filter(), || {
        tracing::info!(target: "reqwest::connect", event = "connect.start");
        tracing::warn!(target: "reqwest::connect", event = "connect.retry");
        log_app_finish("corpus_rebuild", 7);
    });

    assert_eq!(logs.events(), ["connect.retry", "app.finish"]);
    assert!(logs.0[1].target.starts_with("spot_etl"));
}
