//! The accumulating training corpus of weekly quartile summaries.
//!
//! The corpus is one CSV blob under the corpus prefix, replaced wholesale on
//! every merge. New rows are appended after existing rows; existing rows are
//! never re-sorted.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::quartiles::{QuartileRow, QuartileSummary};
use crate::store::{content_version, ObjectStore, StoreError};

pub const CORPUS_HEADERS: [&str; 3] = ["Timestamp", "SpotPrice", "q_id"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergePolicy {
    /// Append the new rows unconditionally.
    Append,
    /// Drop existing rows for the same window date before appending.
    #[default]
    ReplaceWindow,
}

impl MergePolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "append" => Some(Self::Append),
            "replace-window" | "replace_window" => Some(Self::ReplaceWindow),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("corpus at {key} is unreadable: {message}")]
    Read { key: String, message: String },
    #[error("failed to write corpus at {key}: {source}")]
    Write {
        key: String,
        #[source]
        source: StoreError,
    },
    #[error("corpus at {key} changed during merge")]
    Conflict { key: String },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingCorpus {
    rows: Vec<QuartileRow>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendStats {
    pub replaced_rows: usize,
    pub appended_rows: usize,
}

impl TrainingCorpus {
    pub fn from_rows(rows: Vec<QuartileRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[QuartileRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = Vec::new();
        for row in &self.rows {
            if dates.last() != Some(&row.date) {
                dates.push(row.date);
            }
        }
        dates
    }

    pub fn append(&mut self, summary: &QuartileSummary, policy: MergePolicy) -> AppendStats {
        let mut stats = AppendStats::default();
        if policy == MergePolicy::ReplaceWindow {
            let before = self.rows.len();
            self.rows.retain(|row| row.date != summary.date());
            stats.replaced_rows = before - self.rows.len();
        }
        self.rows.extend_from_slice(summary.rows());
        stats.appended_rows = summary.rows().len();
        stats
    }

    pub fn from_csv_bytes(bytes: &[u8]) -> Result<Self, String> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(bytes);
        let headers = reader.headers().map_err(|err| err.to_string())?;
        if headers.iter().ne(CORPUS_HEADERS) {
            return Err(format!(
                "unexpected header {:?}, expected {:?}",
                headers.iter().collect::<Vec<_>>(),
                CORPUS_HEADERS
            ));
        }

        let rows = reader
            .deserialize::<QuartileRow>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| err.to_string())?;
        Ok(Self { rows })
    }

    pub fn to_csv_bytes(&self) -> Result<Vec<u8>, csv::Error> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        writer.write_record(CORPUS_HEADERS)?;
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer
            .into_inner()
            .map_err(|err| csv::Error::from(err.into_error()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusConfig {
    pub prefix: String,
    pub policy: MergePolicy,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            prefix: "train/".to_string(),
            policy: MergePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub corpus_key: String,
    /// Key the previous corpus was read from, if any.
    pub source_key: Option<String>,
    pub existing_rows: usize,
    pub replaced_rows: usize,
    pub appended_rows: usize,
    pub total_rows: usize,
    pub removed_keys: Vec<String>,
}

pub struct CorpusMerger<'a> {
    store: &'a dyn ObjectStore,
    cfg: CorpusConfig,
}

impl<'a> CorpusMerger<'a> {
    pub fn new(store: &'a dyn ObjectStore, cfg: CorpusConfig) -> Self {
        Self { store, cfg }
    }

    /// Reads the current corpus, appends `summary` and writes the result at
    /// `corpus_key`. When the corpus was read from another key, that key is
    /// deleted once the new corpus is written; nothing else is removed.
    ///
    /// Every write is conditional on what was read. A writer that touched the
    /// source corpus, or added a corpus under the prefix, makes this call fail
    /// with [`CorpusError::Conflict`] and withdraws the new blob instead of
    /// dropping the other writer's rows.
    pub fn merge(
        &self,
        summary: &QuartileSummary,
        corpus_key: &str,
    ) -> Result<MergeReport, CorpusError> {
        let snapshot = self.corpus_keys()?;
        let existing = self.load_current(corpus_key, &snapshot)?;
        let source_key = existing.as_ref().map(|(key, _)| key.clone());
        let (mut corpus, version) = match &existing {
            Some((key, bytes)) => {
                let corpus =
                    TrainingCorpus::from_csv_bytes(bytes).map_err(|message| CorpusError::Read {
                        key: key.clone(),
                        message,
                    })?;
                (corpus, Some(content_version(bytes)))
            }
            None => (TrainingCorpus::default(), None),
        };
        let existing_rows = corpus.len();
        let stats = corpus.append(summary, self.cfg.policy);
        let bytes = encode(&corpus, corpus_key)?;

        let mut removed_keys = Vec::new();
        match source_key.as_deref() {
            Some(source) if source == corpus_key => {
                self.put_checked(corpus_key, &bytes, version.as_deref())?;
            }
            rolled_from => {
                if let Some(source) = rolled_from {
                    self.ensure_unchanged(source, version.as_deref())?;
                }
                self.put_checked(corpus_key, &bytes, None)?;

                let added = self
                    .corpus_keys()?
                    .into_iter()
                    .find(|key| key != corpus_key && !snapshot.contains(key));
                if let Some(added) = added {
                    self.withdraw(corpus_key, &bytes);
                    return Err(CorpusError::Conflict { key: added });
                }

                if let Some(source) = rolled_from {
                    if let Err(err) = self.ensure_unchanged(source, version.as_deref()) {
                        self.withdraw(corpus_key, &bytes);
                        return Err(err);
                    }
                    self.store
                        .delete(source)
                        .map_err(|source_err| CorpusError::Write {
                            key: source.to_string(),
                            source: source_err,
                        })?;
                    removed_keys.push(source.to_string());
                }
            }
        }

        let leftovers = snapshot
            .iter()
            .filter(|key| key.as_str() != corpus_key && !removed_keys.contains(key))
            .count();
        if leftovers > 0 {
            warn!(
                component = "corpus",
                event = "corpus.leftover_keys",
                corpus_key,
                leftovers
            );
        }

        let report = MergeReport {
            corpus_key: corpus_key.to_string(),
            source_key,
            existing_rows,
            replaced_rows: stats.replaced_rows,
            appended_rows: stats.appended_rows,
            total_rows: corpus.len(),
            removed_keys,
        };

        info!(
            component = "corpus",
            event = "corpus.merge.finish",
            corpus_key,
            source_key = report.source_key.as_deref().unwrap_or("none"),
            policy = ?self.cfg.policy,
            existing_rows = report.existing_rows,
            replaced_rows = report.replaced_rows,
            appended_rows = report.appended_rows,
            total_rows = report.total_rows
        );

        Ok(report)
    }

    /// Whether the current corpus already holds rows for `date`.
    pub fn contains_window(&self, date: NaiveDate, corpus_key: &str) -> Result<bool, CorpusError> {
        let snapshot = self.corpus_keys()?;
        let Some((key, bytes)) = self.load_current(corpus_key, &snapshot)? else {
            return Ok(false);
        };
        let corpus = TrainingCorpus::from_csv_bytes(&bytes)
            .map_err(|message| CorpusError::Read { key, message })?;
        Ok(corpus.rows().iter().any(|row| row.date == date))
    }

    /// Replaces the corpus with `corpus` at `corpus_key` unconditionally and
    /// removes every other object under the corpus prefix.
    pub fn replace(
        &self,
        corpus: &TrainingCorpus,
        corpus_key: &str,
    ) -> Result<Vec<String>, CorpusError> {
        let bytes = encode(corpus, corpus_key)?;
        self.store
            .put(corpus_key, &bytes)
            .map_err(|source| CorpusError::Write {
                key: corpus_key.to_string(),
                source,
            })?;
        self.remove_stale(corpus_key)
    }

    fn corpus_keys(&self) -> Result<Vec<String>, CorpusError> {
        Ok(self
            .store
            .list(&self.cfg.prefix)?
            .into_iter()
            .filter(|key| is_csv_key(key))
            .collect())
    }

    fn load_current(
        &self,
        corpus_key: &str,
        snapshot: &[String],
    ) -> Result<Option<(String, Vec<u8>)>, CorpusError> {
        if let Some(bytes) = self.store.get(corpus_key)? {
            return Ok(Some((corpus_key.to_string(), bytes)));
        }

        // Keys carry the window date, so the newest corpus sorts last.
        let Some(previous) = snapshot.last() else {
            return Ok(None);
        };
        match self.store.get(previous)? {
            Some(bytes) => Ok(Some((previous.clone(), bytes))),
            None => Err(CorpusError::Conflict {
                key: previous.clone(),
            }),
        }
    }

    fn put_checked(
        &self,
        key: &str,
        bytes: &[u8],
        expected: Option<&str>,
    ) -> Result<(), CorpusError> {
        self.store
            .put_if_version(key, bytes, expected)
            .map_err(|err| match err {
                StoreError::VersionConflict { key, .. } => CorpusError::Conflict { key },
                source => CorpusError::Write {
                    key: key.to_string(),
                    source,
                },
            })
    }

    fn ensure_unchanged(&self, key: &str, expected: Option<&str>) -> Result<(), CorpusError> {
        let actual = self.store.get(key)?.map(|bytes| content_version(&bytes));
        if actual.as_deref() == expected {
            Ok(())
        } else {
            Err(CorpusError::Conflict {
                key: key.to_string(),
            })
        }
    }

    /// Removes a blob this merge wrote, unless someone replaced it since.
    fn withdraw(&self, key: &str, bytes: &[u8]) {
        let ours = content_version(bytes);
        let result = match self.store.get(key) {
            Ok(Some(current)) if content_version(&current) == ours => self.store.delete(key),
            Ok(_) => Ok(()),
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            warn!(
                component = "corpus",
                event = "corpus.withdraw_failed",
                key,
                error = %err
            );
        }
    }

    fn remove_stale(&self, corpus_key: &str) -> Result<Vec<String>, CorpusError> {
        let mut removed = Vec::new();
        for key in self.store.list(&self.cfg.prefix)? {
            if key == corpus_key {
                continue;
            }
            self.store
                .delete(&key)
                .map_err(|source| CorpusError::Write {
                    key: key.clone(),
                    source,
                })?;
            removed.push(key);
        }
        if !removed.is_empty() {
            warn!(
                component = "corpus",
                event = "corpus.stale_removed",
                corpus_key,
                removed = removed.len()
            );
        }
        Ok(removed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    pub corpus_key: String,
    pub source_files: usize,
    pub windows: usize,
    pub total_rows: usize,
}

/// Rebuilds the corpus from every persisted weekly quartile file.
///
/// Files are taken in ascending key order; a window present in several files
/// keeps the rows of the last one.
pub fn rebuild_corpus_from_quartiles(
    store: &dyn ObjectStore,
    quartile_prefix: &str,
    cfg: CorpusConfig,
    corpus_key: &str,
) -> Result<RebuildReport, CorpusError> {
    let keys: Vec<String> = store
        .list(quartile_prefix)?
        .into_iter()
        .filter(|key| is_csv_key(key))
        .collect();

    let mut corpus = TrainingCorpus::default();
    for key in &keys {
        let Some(bytes) = store.get(key)? else {
            continue;
        };
        let summary = QuartileSummary::from_csv_bytes(&bytes).map_err(|err| CorpusError::Read {
            key: key.clone(),
            message: err.to_string(),
        })?;
        corpus.append(&summary, MergePolicy::ReplaceWindow);
    }

    let merger = CorpusMerger::new(store, cfg);
    merger.replace(&corpus, corpus_key)?;

    let report = RebuildReport {
        corpus_key: corpus_key.to_string(),
        source_files: keys.len(),
        windows: corpus.dates().len(),
        total_rows: corpus.len(),
    };
    info!(
        component = "corpus",
        event = "corpus.rebuild.finish",
        corpus_key,
        source_files = report.source_files,
        windows = report.windows,
        total_rows = report.total_rows
    );
    Ok(report)
}

fn encode(corpus: &TrainingCorpus, key: &str) -> Result<Vec<u8>, CorpusError> {
    corpus.to_csv_bytes().map_err(|err| CorpusError::Write {
        key: key.to_string(),
        source: StoreError::Io {
            key: key.to_string(),
            source: err.into(),
        },
    })
}

fn is_csv_key(key: &str) -> bool {
    key.ends_with(".csv") || key.ends_with(".CSV")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryObjectStore;
    use std::sync::Mutex;

    type Interleaved = Box<dyn FnOnce(&dyn ObjectStore) + Send>;

    /// Lets another writer run against the same objects just before the first
    /// conditional write goes through.
    struct InterleavingStore {
        inner: InMemoryObjectStore,
        other_writer: Mutex<Option<Interleaved>>,
    }

    impl InterleavingStore {
        fn new(inner: InMemoryObjectStore, other_writer: Interleaved) -> Self {
            Self {
                inner,
                other_writer: Mutex::new(Some(other_writer)),
            }
        }
    }

    impl ObjectStore for InterleavingStore {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            self.inner.get(key)
        }

        fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
            self.inner.put(key, bytes)
        }

        fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
            self.inner.list(prefix)
        }

        fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.inner.delete(key)
        }

        fn put_if_version(
            &self,
            key: &str,
            bytes: &[u8],
            expected: Option<&str>,
        ) -> Result<(), StoreError> {
            let other = self.other_writer.lock().unwrap().take();
            if let Some(other) = other {
                other(&self.inner);
            }
            self.inner.put_if_version(key, bytes, expected)
        }
    }

    fn seeded_store() -> InMemoryObjectStore {
        let store = InMemoryObjectStore::new();
        merger(&store, MergePolicy::ReplaceWindow)
            .merge(&summary(4, 0.5), "train/2021_10_04.csv")
            .unwrap();
        store
    }

    fn concurrent_merge(day: u32, key: &'static str) -> Interleaved {
        Box::new(move |store: &dyn ObjectStore| {
            CorpusMerger::new(store, CorpusConfig::default())
                .merge(&summary(day, 0.75), key)
                .unwrap();
        })
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 10, day).unwrap()
    }

    fn summary(day: u32, base: f64) -> QuartileSummary {
        QuartileSummary::new(date(day), base, base + 0.125, base + 0.25, base + 0.5)
    }

    fn merger(store: &InMemoryObjectStore, policy: MergePolicy) -> CorpusMerger<'_> {
        CorpusMerger::new(
            store,
            CorpusConfig {
                prefix: "train/".to_string(),
                policy,
            },
        )
    }

    fn stored(store: &InMemoryObjectStore, key: &str) -> TrainingCorpus {
        TrainingCorpus::from_csv_bytes(&store.get(key).unwrap().unwrap()).unwrap()
    }

    #[test]
    fn merge_into_empty_store_yields_the_summary() {
        let store = InMemoryObjectStore::new();
        let new = summary(4, 0.5);

        let report = merger(&store, MergePolicy::Append)
            .merge(&new, "train/2021_10_04.csv")
            .unwrap();

        assert_eq!(report.source_key, None);
        assert_eq!(report.total_rows, 4);
        assert_eq!(stored(&store, "train/2021_10_04.csv").rows(), new.rows());
    }

    #[test]
    fn merge_preserves_existing_order_and_appends() {
        let store = InMemoryObjectStore::new();
        let existing = TrainingCorpus::from_rows(
            [summary(11, 0.7), summary(4, 0.5)]
                .iter()
                .flat_map(|s| s.rows().to_vec())
                .collect(),
        );
        store
            .put("train/2021_10_11.csv", &existing.to_csv_bytes().unwrap())
            .unwrap();

        merger(&store, MergePolicy::Append)
            .merge(&summary(18, 0.6), "train/2021_10_11.csv")
            .unwrap();

        let corpus = stored(&store, "train/2021_10_11.csv");
        assert_eq!(corpus.dates(), vec![date(11), date(4), date(18)]);
        assert_eq!(&corpus.rows()[..8], existing.rows());
    }

    #[test]
    fn naive_append_duplicates_a_repeated_window() {
        let store = InMemoryObjectStore::new();
        let m = merger(&store, MergePolicy::Append);
        let new = summary(4, 0.5);

        m.merge(&new, "train/2021_10_04.csv").unwrap();
        m.merge(&new, "train/2021_10_04.csv").unwrap();

        let corpus = stored(&store, "train/2021_10_04.csv");
        assert_eq!(corpus.len(), 8);
        assert_eq!(&corpus.rows()[4..], new.rows());
    }

    #[test]
    fn replace_window_merge_is_idempotent() {
        let store = InMemoryObjectStore::new();
        let m = merger(&store, MergePolicy::ReplaceWindow);

        m.merge(&summary(4, 0.5), "train/2021_10_04.csv").unwrap();
        m.merge(&summary(11, 0.6), "train/2021_10_04.csv").unwrap();
        let report = m.merge(&summary(4, 0.9), "train/2021_10_04.csv").unwrap();

        assert_eq!(report.replaced_rows, 4);
        let corpus = stored(&store, "train/2021_10_04.csv");
        assert_eq!(corpus.len(), 8);
        assert_eq!(corpus.dates(), vec![date(11), date(4)]);
        assert_eq!(corpus.rows()[4].price, 0.9);
    }

    #[test]
    fn rolling_key_reads_previous_corpus_and_removes_it() {
        let store = InMemoryObjectStore::new();
        let m = merger(&store, MergePolicy::ReplaceWindow);

        m.merge(&summary(4, 0.5), "train/2021_10_04.csv").unwrap();
        let report = m.merge(&summary(11, 0.6), "train/2021_10_11.csv").unwrap();

        assert_eq!(report.source_key.as_deref(), Some("train/2021_10_04.csv"));
        assert_eq!(report.removed_keys, vec!["train/2021_10_04.csv".to_string()]);
        assert_eq!(store.list("train/").unwrap(), vec!["train/2021_10_11.csv".to_string()]);
        assert_eq!(
            stored(&store, "train/2021_10_11.csv").dates(),
            vec![date(4), date(11)]
        );
    }

    #[test]
    fn concurrent_rolled_corpus_is_not_deleted() {
        let store = InterleavingStore::new(
            seeded_store(),
            concurrent_merge(18, "train/2021_10_18.csv"),
        );

        let err = CorpusMerger::new(&store, CorpusConfig::default())
            .merge(&summary(11, 0.6), "train/2021_10_11.csv")
            .unwrap_err();

        match err {
            CorpusError::Conflict { key } => assert_eq!(key, "train/2021_10_18.csv"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            store.list("train/").unwrap(),
            vec!["train/2021_10_18.csv".to_string()]
        );
        assert_eq!(
            stored(&store.inner, "train/2021_10_18.csv").dates(),
            vec![date(4), date(18)]
        );
    }

    #[test]
    fn source_rewritten_during_merge_is_kept() {
        let store = InterleavingStore::new(
            seeded_store(),
            concurrent_merge(18, "train/2021_10_04.csv"),
        );

        let err = CorpusMerger::new(&store, CorpusConfig::default())
            .merge(&summary(11, 0.6), "train/2021_10_11.csv")
            .unwrap_err();

        assert!(matches!(err, CorpusError::Conflict { ref key } if key == "train/2021_10_04.csv"));
        assert_eq!(
            store.list("train/").unwrap(),
            vec!["train/2021_10_04.csv".to_string()]
        );
        assert_eq!(
            stored(&store.inner, "train/2021_10_04.csv").dates(),
            vec![date(4), date(18)]
        );
    }

    #[test]
    fn in_place_merge_detects_a_concurrent_rewrite() {
        let store = InterleavingStore::new(
            seeded_store(),
            concurrent_merge(18, "train/2021_10_04.csv"),
        );

        let err = CorpusMerger::new(&store, CorpusConfig::default())
            .merge(&summary(11, 0.6), "train/2021_10_04.csv")
            .unwrap_err();

        assert!(matches!(err, CorpusError::Conflict { ref key } if key == "train/2021_10_04.csv"));
        assert_eq!(
            stored(&store.inner, "train/2021_10_04.csv").dates(),
            vec![date(4), date(18)]
        );
    }

    #[test]
    fn only_the_corpus_that_was_read_is_removed() {
        let store = seeded_store();
        let older = TrainingCorpus::from_rows(summary(1, 0.4).rows().to_vec());
        store
            .put("train/2021_09_27.csv", &older.to_csv_bytes().unwrap())
            .unwrap();

        let report = merger(&store, MergePolicy::ReplaceWindow)
            .merge(&summary(11, 0.6), "train/2021_10_11.csv")
            .unwrap();

        assert_eq!(report.removed_keys, vec!["train/2021_10_04.csv".to_string()]);
        assert_eq!(
            store.list("train/").unwrap(),
            vec![
                "train/2021_09_27.csv".to_string(),
                "train/2021_10_11.csv".to_string()
            ]
        );
    }

    #[test]
    fn contains_window_reads_the_current_corpus() {
        let store = seeded_store();
        let m = merger(&store, MergePolicy::ReplaceWindow);

        assert!(m.contains_window(date(4), "train/2021_10_11.csv").unwrap());
        assert!(!m.contains_window(date(11), "train/2021_10_11.csv").unwrap());
        assert!(!merger(&InMemoryObjectStore::new(), MergePolicy::Append)
            .contains_window(date(4), "train/2021_10_04.csv")
            .unwrap());
    }

    #[test]
    fn unreadable_corpus_is_fatal_and_left_untouched() {
        let store = InMemoryObjectStore::new();
        store.put("train/2021_10_04.csv", b"not,a\ncorpus").unwrap();

        let err = merger(&store, MergePolicy::Append)
            .merge(&summary(11, 0.6), "train/2021_10_11.csv")
            .unwrap_err();

        match err {
            CorpusError::Read { key, .. } => assert_eq!(key, "train/2021_10_04.csv"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            store.get("train/2021_10_04.csv").unwrap(),
            Some(b"not,a\ncorpus".to_vec())
        );
        assert!(!store.exists("train/2021_10_11.csv").unwrap());
    }

    #[test]
    fn corpus_csv_has_header_and_stable_text() {
        let corpus = TrainingCorpus::from_rows(summary(4, 0.5).rows().to_vec());
        let text = String::from_utf8(corpus.to_csv_bytes().unwrap()).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("Timestamp,SpotPrice,q_id"));
        assert_eq!(lines.next(), Some("2021-10-04,0.5,q1"));
        assert_eq!(lines.last(), Some("2021-10-04,1.0,max"));

        assert_eq!(TrainingCorpus::from_csv_bytes(text.as_bytes()).unwrap(), corpus);
        assert!(TrainingCorpus::from_csv_bytes(b"Timestamp,SpotPrice,q_id\n")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn rebuild_concatenates_quartile_files_in_key_order() {
        let store = InMemoryObjectStore::new();
        for (key, s) in [
            ("transformed/weekly/quartiles/2021_10_11.csv", summary(11, 0.6)),
            ("transformed/weekly/quartiles/2021_10_04.csv", summary(4, 0.5)),
        ] {
            store.put(key, &s.to_csv_bytes().unwrap()).unwrap();
        }
        store.put("train/2021_09_27.csv", b"stale").unwrap();

        let report = rebuild_corpus_from_quartiles(
            &store,
            "transformed/weekly/quartiles/",
            CorpusConfig::default(),
            "train/trainingData.csv",
        )
        .unwrap();

        assert_eq!(report.source_files, 2);
        assert_eq!(report.windows, 2);
        assert_eq!(store.list("train/").unwrap(), vec!["train/trainingData.csv".to_string()]);
        assert_eq!(
            stored(&store, "train/trainingData.csv").dates(),
            vec![date(4), date(11)]
        );
    }
}
