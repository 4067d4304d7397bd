//! Window orchestration: fetch, reconstruct, reduce, merge.
//!
//! Every artifact is keyed by the window start date, so re-running a window
//! overwrites the same keys. Intermediates are written before the corpus merge
//! and stay in place when a later stage fails.

use std::env;
use std::thread;

use chrono::NaiveDate;
use thiserror::Error;
use tracing::{dispatcher, error, info, warn};

use crate::corpus::{CorpusConfig, CorpusError, CorpusMerger, MergePolicy, MergeReport};
use crate::observability::parse_bool;
use crate::price_history::{
    fetch_price_window, FetchConfig, FetchError, PriceHistoryFilters, PriceHistoryService,
};
use crate::quartiles::{reduce_quartiles, QuartileError, QuartileSummary};
use crate::reconstruct::{reconstruct_series, ReconstructError};
use crate::store::{ObjectStore, StoreError};
use crate::window::{MonthSelector, PriceWindow, WindowError, KEY_DATE_FORMAT, KEY_MONTH_FORMAT};

/// Prefixes under which each artifact kind is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    pub extracted_prefix: String,
    pub daily_extracted_prefix: String,
    pub minute_prefix: String,
    pub quartile_prefix: String,
    pub corpus_prefix: String,
}

impl Default for StoreLayout {
    fn default() -> Self {
        Self {
            extracted_prefix: "extracted/".to_string(),
            daily_extracted_prefix: "extracted/daily/".to_string(),
            minute_prefix: "transformed/weekly/minute/".to_string(),
            quartile_prefix: "transformed/weekly/quartiles/".to_string(),
            corpus_prefix: "train/".to_string(),
        }
    }
}

impl StoreLayout {
    pub fn raw_key(&self, window: &PriceWindow) -> String {
        format!("{}{}.json", self.extracted_prefix, window.key_date())
    }

    pub fn minute_key(&self, window: &PriceWindow) -> String {
        format!("{}{}.csv", self.minute_prefix, window.key_date())
    }

    pub fn quartile_key(&self, window: &PriceWindow) -> String {
        format!("{}{}.csv", self.quartile_prefix, window.key_date())
    }

    pub fn corpus_key(&self, window: &PriceWindow) -> String {
        format!("{}{}.csv", self.corpus_prefix, window.key_date())
    }

    pub fn daily_raw_key(&self, date: NaiveDate) -> String {
        format!(
            "{}{}/{}.json",
            self.daily_extracted_prefix,
            date.format(KEY_MONTH_FORMAT),
            date.format(KEY_DATE_FORMAT)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub filters: PriceHistoryFilters,
    pub fetch: FetchConfig,
    pub layout: StoreLayout,
    pub merge_policy: MergePolicy,
    /// Reuse a window's minute and quartile artifacts when both exist instead
    /// of fetching again.
    pub skip_existing: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            filters: PriceHistoryFilters::default(),
            fetch: FetchConfig::default(),
            layout: StoreLayout::default(),
            merge_policy: MergePolicy::default(),
            skip_existing: false,
        }
    }
}

pub fn pipeline_config_from_env() -> PipelineConfig {
    pipeline_config_from_lookup(|name| env::var(name).ok())
}

/// Folds `SPOT_ETL_*` settings read through `lookup` over the defaults.
pub fn pipeline_config_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    let read = |name: &str| {
        lookup(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    if let Some(value) = read("SPOT_ETL_INSTANCE_TYPE") {
        config.filters.instance_type = value;
    }
    if let Some(value) = read("SPOT_ETL_AVAILABILITY_ZONE") {
        config.filters.availability_zone = value;
    }
    if let Some(value) = read("SPOT_ETL_PRODUCT_DESCRIPTION") {
        config.filters.product_description = value;
    }
    if let Some(policy) = read("SPOT_ETL_MERGE_POLICY").and_then(|raw| MergePolicy::parse(&raw)) {
        config.merge_policy = policy;
    }
    if let Some(skip) = read("SPOT_ETL_SKIP_EXISTING").and_then(|raw| parse_bool(&raw)) {
        config.skip_existing = skip;
    }

    config
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Window(#[from] WindowError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Reconstruct(#[from] ReconstructError),
    #[error("quartile reduction failed for window {window_key}: {source}")]
    Quartiles {
        window_key: String,
        #[source]
        source: QuartileError,
    },
    #[error(transparent)]
    Corpus(#[from] CorpusError),
    #[error("failed to encode artifact {key}: {message}")]
    Encode { key: String, message: String },
    #[error("failed to persist artifact {key}: {source}")]
    Artifact {
        key: String,
        #[source]
        source: StoreError,
    },
    #[error("backfill worker for {date} panicked")]
    WorkerPanicked { date: NaiveDate },
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowRunReport {
    pub window_key: String,
    pub raw_events: usize,
    pub pages: u32,
    pub minutes: usize,
    pub summary: QuartileSummary,
    pub merge: MergeReport,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(WindowRunReport),
    /// Intermediates existed but the corpus lacked the window; only the merge ran.
    Resumed {
        window_key: String,
        merge: MergeReport,
    },
    Skipped { window_key: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayOutcome {
    Written { events: usize },
    AlreadyPresent,
    /// The provider returned nothing, typically outside its retention horizon.
    NoHistory,
}

#[derive(Debug)]
pub struct BackfillDay {
    pub date: NaiveDate,
    pub key: String,
    pub result: Result<DayOutcome, PipelineError>,
}

#[derive(Debug)]
pub struct BackfillReport {
    pub days: Vec<BackfillDay>,
    /// First day of the month left out because it has not fully elapsed.
    pub stopped_at: Option<NaiveDate>,
}

impl BackfillReport {
    pub fn failures(&self) -> impl Iterator<Item = &BackfillDay> {
        self.days.iter().filter(|day| day.result.is_err())
    }
}

pub struct Pipeline<'a> {
    service: &'a dyn PriceHistoryService,
    store: &'a dyn ObjectStore,
    config: PipelineConfig,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        service: &'a dyn PriceHistoryService,
        store: &'a dyn ObjectStore,
        config: PipelineConfig,
    ) -> Self {
        Self {
            service,
            store,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run_window(&self, window: &PriceWindow) -> Result<RunOutcome, PipelineError> {
        let layout = &self.config.layout;
        let window_key = window.key_date();
        let minute_key = layout.minute_key(window);
        let quartile_key = layout.quartile_key(window);

        info!(
            component = "pipeline",
            event = "pipeline.window.start",
            window_key = %window_key,
            window_start = %window.start(),
            window_end = %window.end(),
            minutes = window.minutes()
        );

        let intermediates_present = self.config.skip_existing
            && self.artifact_exists(&minute_key)?
            && self.artifact_exists(&quartile_key)?;
        let result = if intermediates_present {
            self.finish_from_intermediates(window, &quartile_key)
        } else {
            self.process_window(window, &minute_key, &quartile_key)
                .map(RunOutcome::Completed)
        };

        match &result {
            Ok(RunOutcome::Completed(report)) => info!(
                component = "pipeline",
                event = "pipeline.window.finish",
                window_key = %window_key,
                raw_events = report.raw_events,
                pages = report.pages,
                corpus_key = %report.merge.corpus_key,
                corpus_rows = report.merge.total_rows
            ),
            Ok(_) => {}
            Err(err) => error!(
                component = "pipeline",
                event = "pipeline.window.error",
                window_key = %window_key,
                window_start = %window.start(),
                window_end = %window.end(),
                error = %err
            ),
        }

        result
    }

    /// Completes a window whose minute and quartile artifacts already exist:
    /// skipped if the corpus holds its date, otherwise merged from the stored
    /// quartile summary without fetching again.
    fn finish_from_intermediates(
        &self,
        window: &PriceWindow,
        quartile_key: &str,
    ) -> Result<RunOutcome, PipelineError> {
        let window_key = window.key_date();
        let corpus_key = self.config.layout.corpus_key(window);
        let merger = self.corpus_merger();

        if merger.contains_window(window.start_date(), &corpus_key)? {
            info!(
                component = "pipeline",
                event = "pipeline.window.skipped",
                window_key = %window_key,
                quartile_key
            );
            return Ok(RunOutcome::Skipped { window_key });
        }

        let bytes = self
            .store
            .get(quartile_key)
            .and_then(|found| found.ok_or_else(|| StoreError::NotFound(quartile_key.to_string())))
            .map_err(|source| PipelineError::Artifact {
                key: quartile_key.to_string(),
                source,
            })?;
        let summary =
            QuartileSummary::from_csv_bytes(&bytes).map_err(|source| PipelineError::Quartiles {
                window_key: window_key.clone(),
                source,
            })?;
        let merge = merger.merge(&summary, &corpus_key)?;

        info!(
            component = "pipeline",
            event = "pipeline.window.resumed",
            window_key = %window_key,
            quartile_key,
            corpus_key = %merge.corpus_key,
            corpus_rows = merge.total_rows
        );
        Ok(RunOutcome::Resumed { window_key, merge })
    }

    fn corpus_merger(&self) -> CorpusMerger<'a> {
        CorpusMerger::new(
            self.store,
            CorpusConfig {
                prefix: self.config.layout.corpus_prefix.clone(),
                policy: self.config.merge_policy,
            },
        )
    }

    fn process_window(
        &self,
        window: &PriceWindow,
        minute_key: &str,
        quartile_key: &str,
    ) -> Result<WindowRunReport, PipelineError> {
        let layout = &self.config.layout;
        let window_key = window.key_date();

        let raw = fetch_price_window(self.service, &self.config.filters, window, &self.config.fetch)?;
        let raw_key = layout.raw_key(window);
        let audit = raw.to_audit_json().map_err(|err| PipelineError::Encode {
            key: raw_key.clone(),
            message: err.to_string(),
        })?;
        self.put_artifact(&raw_key, audit.as_bytes())?;

        let series = reconstruct_series(
            &raw.events,
            &self.config.filters.instance_type,
            window.start(),
            window.minutes(),
        )?;
        let minute_csv = series.to_csv_bytes().map_err(|err| PipelineError::Encode {
            key: minute_key.to_string(),
            message: err.to_string(),
        })?;
        self.put_artifact(minute_key, &minute_csv)?;

        let summary = reduce_quartiles(&series).map_err(|source| PipelineError::Quartiles {
            window_key: window_key.clone(),
            source,
        })?;
        let quartile_csv = summary.to_csv_bytes().map_err(|err| PipelineError::Encode {
            key: quartile_key.to_string(),
            message: err.to_string(),
        })?;
        self.put_artifact(quartile_key, &quartile_csv)?;

        let merge = self
            .corpus_merger()
            .merge(&summary, &layout.corpus_key(window))?;

        Ok(WindowRunReport {
            window_key,
            raw_events: raw.events.len(),
            pages: raw.pages,
            minutes: series.len(),
            summary,
            merge,
        })
    }

    /// Collects raw daily history for every elapsed day of `month`, one worker
    /// thread per day.
    ///
    /// Each worker skips its day when the destination key already exists. Two
    /// runs racing on the same missing key may both fetch; the later write wins.
    pub fn backfill_month(
        &self,
        month: &MonthSelector,
        today: NaiveDate,
    ) -> Result<BackfillReport, PipelineError> {
        let days = month.elapsed_days(today)?;
        let stopped_at = month.days().into_iter().find(|day| *day >= today);
        if let Some(date) = stopped_at {
            warn!(
                component = "pipeline",
                event = "pipeline.backfill.incomplete_day",
                date = %date
            );
        }

        info!(
            component = "pipeline",
            event = "pipeline.backfill.start",
            year = month.year(),
            month = month.month(),
            days = days.len()
        );

        // Workers log through the caller's subscriber.
        let dispatch = dispatcher::get_default(|current| current.clone());
        let results: Vec<BackfillDay> = thread::scope(|scope| {
            let handles: Vec<_> = days
                .iter()
                .map(|date| {
                    let date = *date;
                    let dispatch = dispatch.clone();
                    let handle = scope.spawn(move || {
                        dispatcher::with_default(&dispatch, || self.collect_day(date))
                    });
                    (date, handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(date, handle)| BackfillDay {
                    date,
                    key: self.config.layout.daily_raw_key(date),
                    result: handle
                        .join()
                        .unwrap_or_else(|_| Err(PipelineError::WorkerPanicked { date })),
                })
                .collect()
        });

        let report = BackfillReport {
            days: results,
            stopped_at,
        };
        info!(
            component = "pipeline",
            event = "pipeline.backfill.finish",
            year = month.year(),
            month = month.month(),
            days = report.days.len(),
            failures = report.failures().count()
        );
        Ok(report)
    }

    fn collect_day(&self, date: NaiveDate) -> Result<DayOutcome, PipelineError> {
        let key = self.config.layout.daily_raw_key(date);
        if self.artifact_exists(&key)? {
            info!(
                component = "pipeline",
                event = "pipeline.backfill.day_exists",
                key = %key
            );
            return Ok(DayOutcome::AlreadyPresent);
        }

        let window = PriceWindow::whole_day(date);
        let raw = fetch_price_window(self.service, &self.config.filters, &window, &self.config.fetch)
            .inspect_err(|err| {
                error!(
                    component = "pipeline",
                    event = "pipeline.backfill.day_error",
                    date = %date,
                    error = %err
                );
            })?;
        if raw.is_empty() {
            warn!(
                component = "pipeline",
                event = "pipeline.backfill.no_history",
                date = %date
            );
            return Ok(DayOutcome::NoHistory);
        }

        let audit = raw.to_audit_json().map_err(|err| PipelineError::Encode {
            key: key.clone(),
            message: err.to_string(),
        })?;
        self.put_artifact(&key, audit.as_bytes())?;
        Ok(DayOutcome::Written {
            events: raw.events.len(),
        })
    }

    fn artifact_exists(&self, key: &str) -> Result<bool, PipelineError> {
        self.store
            .exists(key)
            .map_err(|source| PipelineError::Artifact {
                key: key.to_string(),
                source,
            })
    }

    fn put_artifact(&self, key: &str, bytes: &[u8]) -> Result<(), PipelineError> {
        self.store
            .put(key, bytes)
            .map_err(|source| PipelineError::Artifact {
                key: key.to_string(),
                source,
            })?;
        info!(
            component = "pipeline",
            event = "pipeline.artifact.written",
            key,
            bytes = bytes.len()
        );
        Ok(())
    }
}
