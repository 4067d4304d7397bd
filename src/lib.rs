//! Spot price history ETL.
//!
//! Turns a paginated feed of spot price changes into a weekly quartile
//! training corpus:
//! - fetch every price-change event inside a window
//! - forward-fill the events into one price per minute
//! - reduce the minute series to q1, q2, q3 and max
//! - merge the summary into the corpus held in an object store

mod corpus;
mod observability;
mod pipeline;
mod price_history;
mod quartiles;
mod reconstruct;
mod store;
mod window;

pub use corpus::{
    rebuild_corpus_from_quartiles, AppendStats, CorpusConfig, CorpusError, CorpusMerger,
    MergePolicy, MergeReport, RebuildReport, TrainingCorpus, CORPUS_HEADERS,
};
pub use observability::{
    init_logging, log_app_finish, log_app_start, log_store_selected, logging_config_from_env,
    logging_config_from_lookup, LogFormat, LoggingConfig, LoggingInitError,
};
pub use pipeline::{
    pipeline_config_from_env, pipeline_config_from_lookup, BackfillDay, BackfillReport,
    DayOutcome, Pipeline, PipelineConfig, PipelineError, RunOutcome, StoreLayout,
    WindowRunReport,
};
pub use price_history::{
    fetch_price_window, FetchConfig, FetchError, HttpPriceHistoryService, HttpServiceConfig,
    PriceChangeEvent, PriceHistoryFilters, PriceHistoryPage, PriceHistoryQuery,
    PriceHistoryService, PriceHistoryServiceError, RawWindow, DEFAULT_AVAILABILITY_ZONE,
    DEFAULT_INSTANCE_TYPE, DEFAULT_PRODUCT_DESCRIPTION,
};
pub use quartiles::{
    quantile_linear, reduce_quartiles, QuartileError, QuartileLabel, QuartileRow, QuartileSummary,
};
pub use reconstruct::{
    build_price_map, expand_minute_grid, normalize_events, reconstruct_series, MinutePrice,
    NormalizedChange, ReconstructError, ReconstructedSeries,
};
pub use store::{
    content_version, InMemoryObjectStore, LocalDirObjectStore, ObjectStore, StoreError,
};
pub use window::{
    first_moment, last_moment, MonthSelector, PriceWindow, WindowError, KEY_DATE_FORMAT,
    KEY_MONTH_FORMAT, MINUTES_PER_WEEK, MINUTE_TIMESTAMP_FORMAT,
};
