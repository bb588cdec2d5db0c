//! One parameterized driver for every enrichment stage.
//!
//! load input → load or seed destination → compute pending → look up each id
//! in order (pacing, checkpoints, quota and interrupt checks) → final save.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info, warn};

use super::{
    checkpoint::CheckpointStore,
    merge::{merge, ProviderColumns},
    progress,
    quota::QuotaTracker,
    schema::{Seed, StageSchema},
    shutdown::Shutdown,
    table::{row_id, Row, Table},
};
use crate::watchlist;

/// A metadata provider seen from the pipeline: one id in, one normalized record
/// (or nothing) out.
///
/// `Ok(None)` covers "not found" and "no usable identifier". `Err` is a failed
/// request; the item is skipped for this run and retried on the next.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn lookup(&self, imdb_id: &str) -> Result<Option<ProviderColumns>>;
}

#[derive(Debug, Clone)]
pub enum StageInput {
    /// The raw IMDb watchlist export.
    Watchlist(PathBuf),
    /// A previous stage's output table.
    Upstream(PathBuf),
}

impl StageInput {
    pub fn path(&self) -> &Path {
        match self {
            StageInput::Watchlist(p) | StageInput::Upstream(p) => p,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Ignore any existing output and reprocess every input row.
    pub force: bool,
    /// Cap on items attempted in this run.
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Completed,
    NothingToDo,
    QuotaExhausted,
    Interrupted,
}

#[derive(Debug, Clone)]
pub struct StageSummary {
    pub stage: &'static str,
    pub stop: StopReason,
    pub pending: usize,
    pub attempted: usize,
    pub found: usize,
    pub absent: usize,
    pub failed: usize,
    pub output: PathBuf,
    pub rows_written: Option<usize>,
    /// `(calls_today, threshold)` for quota-bound stages.
    pub quota: Option<(u32, u32)>,
}

impl StageSummary {
    /// Items whose result made it into the output this run.
    pub fn processed(&self) -> usize {
        self.found + self.absent
    }

    pub fn report(&self) {
        info!("{}", "=".repeat(60));
        match self.stop {
            StopReason::NothingToDo => {
                info!(stage = self.stage, "all items are already enriched")
            }
            StopReason::Completed => info!(stage = self.stage, "enrichment run complete"),
            StopReason::QuotaExhausted => warn!(
                stage = self.stage,
                "daily quota reached; run again tomorrow to continue"
            ),
            StopReason::Interrupted => info!(
                stage = self.stage,
                "interrupted; progress has been saved, run again to resume"
            ),
        }
        info!(
            processed = self.processed(),
            found = self.found,
            not_found = self.absent,
            failed = self.failed,
            pending_before = self.pending,
            "items this run"
        );
        if let Some(rows) = self.rows_written {
            info!(rows, output = %self.output.display(), "enriched data saved");
        } else {
            info!(output = %self.output.display(), "output unchanged");
        }
        if let Some((calls, threshold)) = self.quota {
            info!(
                calls_today = calls,
                threshold,
                remaining = threshold.saturating_sub(calls),
                "quota usage"
            );
        }
        info!("{}", "=".repeat(60));
    }
}

pub struct StageDriver<A> {
    schema: StageSchema,
    input: StageInput,
    store: CheckpointStore,
    adapter: A,
    pacing: Duration,
    quota: Option<QuotaTracker>,
    shutdown: Shutdown,
}

impl<A: SourceAdapter> StageDriver<A> {
    pub fn new(schema: StageSchema, input: StageInput, store: CheckpointStore, adapter: A) -> Self {
        Self {
            schema,
            input,
            store,
            adapter,
            pacing: Duration::ZERO,
            quota: None,
            shutdown: Shutdown::new(),
        }
    }

    /// Fixed delay between consecutive lookups.
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_quota(mut self, quota: QuotaTracker) -> Self {
        self.quota = Some(quota);
        self
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn quota(&self) -> Option<&QuotaTracker> {
        self.quota.as_ref()
    }

    pub async fn run(&mut self, opts: RunOptions) -> Result<StageSummary> {
        let stage = self.schema.name;
        let source = self.load_source()?;
        self.schema.validate_input(&source)?;
        info!(
            stage,
            schema_version = self.schema.version,
            rows = source.len(),
            input = %self.input.path().display(),
            "loaded stage input"
        );

        // The ledger only vouches for rows in the existing output; without it,
        // every id is pending again.
        let resuming = !opts.force && self.store.path().exists();
        if let Some(quota) = self.quota.as_mut() {
            if !resuming && !quota.ledger().is_empty() {
                if !opts.force {
                    warn!(
                        stage,
                        ids = quota.ledger().len(),
                        output = %self.store.path().display(),
                        "output file is missing; discarding the attempted-id ledger"
                    );
                }
                quota.clear_ledger()?;
            }
        }
        let mut dest = self.load_destination(&source, opts.force)?;

        let mut work = progress::pending(
            &source,
            &dest,
            self.schema.completion,
            self.quota.as_ref().map(|q| q.ledger()),
        );
        let pending_total = work.len();
        if let Some(limit) = opts.limit {
            work.truncate(limit);
        }

        let mut summary = StageSummary {
            stage,
            stop: StopReason::Completed,
            pending: pending_total,
            attempted: 0,
            found: 0,
            absent: 0,
            failed: 0,
            output: self.store.path().to_path_buf(),
            rows_written: None,
            quota: self.quota_usage(),
        };

        if work.is_empty() {
            summary.stop = StopReason::NothingToDo;
            return Ok(summary);
        }
        info!(stage, count = work.len(), pending = pending_total, "items to enrich");

        let by_id: HashMap<String, &Row> = source
            .rows()
            .iter()
            .filter_map(|row| row_id(row).map(|id| (id, row)))
            .collect();

        let total = work.len();
        let mut fresh: Vec<Row> = Vec::new();
        for (idx, id) in work.iter().enumerate() {
            if self.shutdown.is_requested() {
                summary.stop = StopReason::Interrupted;
                break;
            }
            if self.quota.as_ref().is_some_and(|q| q.is_exhausted()) {
                warn!(stage, "reached daily API limit; stopping for today");
                summary.stop = StopReason::QuotaExhausted;
                break;
            }
            let Some(base) = by_id.get(id) else {
                continue;
            };

            info!(stage, item = idx + 1, total, imdb_id = %id, "looking up");
            let outcome = self.adapter.lookup(id).await;
            if let Some(quota) = self.quota.as_mut() {
                quota.record_call()?;
            }
            summary.attempted += 1;

            match outcome {
                Ok(Some(columns)) => {
                    summary.found += 1;
                    fresh.push(merge(base, Some(&columns)));
                }
                Ok(None) => {
                    summary.absent += 1;
                    warn!(stage, imdb_id = %id, title = ?base.get("title"), "no match found");
                    let mut row = self.schema.absent.apply(base);
                    row.entry(self.schema.marker.to_string())
                        .or_insert(Value::Null);
                    fresh.push(row);
                }
                Err(err) => {
                    summary.failed += 1;
                    error!(stage, imdb_id = %id, error = ?err, "lookup failed; will retry next run");
                }
            }

            if self.store.is_due(summary.attempted) && !fresh.is_empty() {
                dest = self.persist(&dest, std::mem::take(&mut fresh))?;
                summary.rows_written = Some(dest.len());
            }

            if idx + 1 < total {
                self.shutdown.sleep(self.pacing).await;
            }
        }

        if !fresh.is_empty() {
            dest = self.persist(&dest, std::mem::take(&mut fresh))?;
            summary.rows_written = Some(dest.len());
        }
        if let Some(quota) = self.quota.as_ref() {
            quota.save()?;
        }
        summary.quota = self.quota_usage();
        Ok(summary)
    }

    fn load_source(&self) -> Result<Table> {
        let path = self.input.path();
        if !path.exists() {
            match self.schema.upstream {
                Some(upstream) => bail!(
                    "input file not found: {} (run the {} stage first)",
                    path.display(),
                    upstream
                ),
                None => bail!("input file not found: {}", path.display()),
            }
        }
        match &self.input {
            StageInput::Watchlist(p) => watchlist::load_watchlist(p),
            StageInput::Upstream(p) => Table::read_csv(p),
        }
    }

    fn load_destination(&self, source: &Table, force: bool) -> Result<Table> {
        let path = self.store.path();
        if path.exists() && !force {
            info!(stage = self.schema.name, path = %path.display(), "resuming from existing output");
            return Table::read_csv(path);
        }
        info!(stage = self.schema.name, force, "starting a new enrichment");
        Ok(match self.schema.seed {
            Seed::Empty => Table::new(),
            Seed::CopyOfSource => source.clone(),
        })
    }

    fn persist(&mut self, dest: &Table, fresh: Vec<Row>) -> Result<Table> {
        let snapshot = self.store.checkpoint(dest, &fresh)?;
        if let Some(quota) = self.quota.as_mut() {
            quota.commit_ids(fresh.iter().filter_map(row_id))?;
        }
        Ok(snapshot)
    }

    fn quota_usage(&self) -> Option<(u32, u32)> {
        self.quota
            .as_ref()
            .map(|q| (q.calls_today(), q.limits().threshold()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{
        quota::{QuotaLimits, QuotaState},
        schema::{DDD, OMDB, TMDB},
    };
    use anyhow::anyhow;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::{fs, sync::Mutex};

    #[derive(Clone)]
    enum Reply {
        Found(&'static str),
        Absent,
        Fail,
    }

    /// In-memory provider: replies per id, records every lookup.
    struct FakeAdapter {
        prefix: &'static str,
        replies: HashMap<String, Reply>,
        calls: Mutex<Vec<String>>,
        interrupt_after: Option<(usize, Shutdown)>,
    }

    impl FakeAdapter {
        fn new(prefix: &'static str, replies: &[(&str, Reply)]) -> Self {
            Self {
                prefix,
                replies: replies
                    .iter()
                    .map(|(id, r)| (id.to_string(), r.clone()))
                    .collect(),
                calls: Mutex::new(Vec::new()),
                interrupt_after: None,
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SourceAdapter for FakeAdapter {
        async fn lookup(&self, imdb_id: &str) -> Result<Option<ProviderColumns>> {
            let count = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(imdb_id.to_string());
                calls.len()
            };
            if let Some((n, shutdown)) = &self.interrupt_after {
                if count >= *n {
                    shutdown.trigger();
                }
            }
            match self.replies.get(imdb_id).cloned().unwrap_or(Reply::Absent) {
                Reply::Found(title) => {
                    let mut cols = ProviderColumns::new(self.prefix);
                    match self.prefix {
                        "ddd" => cols.set("id", 77).set("a_dog_dies", "No"),
                        "omdb" => cols.set("title", title),
                        _ => cols.set("id", 100).set("title", title),
                    };
                    Ok(Some(cols))
                }
                Reply::Absent => Ok(None),
                Reply::Fail => Err(anyhow!("connection reset")),
            }
        }
    }

    fn write_source(dir: &Path, ids: &[&str]) -> PathBuf {
        write_rows(dir, ids, |_, _| Vec::new())
    }

    /// Stand-in for the previous stage's output: core columns plus whatever
    /// upstream markers `schema` requires.
    fn write_input(dir: &Path, schema: StageSchema, ids: &[&str]) -> PathBuf {
        write_rows(dir, ids, |n, id| {
            schema
                .required_columns
                .iter()
                .filter_map(|column| match *column {
                    "tmdb_id" => Some(("tmdb_id", json!(n + 1))),
                    "omdb_title" => Some(("omdb_title", json!(format!("Title {id}")))),
                    _ => None,
                })
                .collect()
        })
    }

    fn write_rows(
        dir: &Path,
        ids: &[&str],
        extra: impl Fn(usize, &str) -> Vec<(&'static str, Value)>,
    ) -> PathBuf {
        let path = dir.join("source.csv");
        let rows = ids.iter().enumerate().map(|(n, id)| {
            let mut row: Row = [
                ("const".to_string(), json!(id)),
                ("title".to_string(), json!(format!("Title {id}"))),
                ("title_type".to_string(), json!("Movie")),
            ]
            .into_iter()
            .collect();
            for (column, value) in extra(n, id) {
                row.insert(column.to_string(), value);
            }
            row
        });
        Table::from_rows(rows).write_csv(&path).unwrap();
        path
    }

    fn driver(
        schema: StageSchema,
        dir: &Path,
        every: usize,
        adapter: FakeAdapter,
    ) -> StageDriver<FakeAdapter> {
        StageDriver::new(
            schema,
            StageInput::Upstream(dir.join("source.csv")),
            CheckpointStore::new(dir.join("out.csv"), every),
            adapter,
        )
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn quota_at(dir: &Path, calls: u32, day: &str, today: &str) -> QuotaTracker {
        let path = dir.join("status.json");
        let state = QuotaState {
            calls_today: calls,
            last_run_date: date(day),
            enriched_ids: Vec::new(),
        };
        fs::write(&path, serde_json::to_string(&state).unwrap()).unwrap();
        QuotaTracker::load(path, QuotaLimits::new(980, 1000).unwrap(), date(today)).unwrap()
    }

    fn cell<'a>(table: &'a Table, id: &str, column: &str) -> Option<&'a Value> {
        table
            .rows()
            .iter()
            .find(|r| row_id(r).as_deref() == Some(id))
            .and_then(|r| r.get(column))
    }

    #[tokio::test]
    async fn not_found_row_is_kept_and_counts_as_processed() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path(), &["tt001", "tt002", "tt003"]);
        let adapter = FakeAdapter::new(
            "tmdb",
            &[("tt001", Reply::Found("One")), ("tt002", Reply::Absent), ("tt003", Reply::Found("Three"))],
        );
        let mut stage = driver(TMDB, dir.path(), 1, adapter);

        let first = stage.run(RunOptions::default()).await.unwrap();
        assert_eq!(first.stop, StopReason::Completed);
        assert_eq!((first.found, first.absent, first.failed), (2, 1, 0));

        let out = Table::read_csv(&dir.path().join("out.csv")).unwrap();
        assert_eq!(out.ids(), vec!["tt001", "tt002", "tt003"]);
        assert_eq!(cell(&out, "tt001", "tmdb_title"), Some(&json!("One")));
        assert!(crate::pipeline::table::is_null(cell(&out, "tt002", "tmdb_id")));

        let second = stage.run(RunOptions::default()).await.unwrap();
        assert_eq!(second.stop, StopReason::NothingToDo);
        assert_eq!(second.attempted, 0);
        assert_eq!(stage.adapter.calls().len(), 3);
    }

    #[tokio::test]
    async fn first_stage_reads_the_raw_watchlist_export() {
        let dir = tempfile::tempdir().unwrap();
        let export = dir.path().join("Watchlist_IMDB.csv");
        fs::write(
            &export,
            "Position,Const,Created,Modified,Description,Title,Original Title,URL,Title Type,IMDb Rating,Runtime (mins),Year,Genres,Num Votes,Release Date,Directors,Your Rating,Date Rated\n\
             1,tt0113277,2023-05-14,2023-05-14,,Heat,Heat,https://www.imdb.com/title/tt0113277/,Movie,8.3,170,1995,\"Action, Crime, Drama\",700000,1995-12-15,Michael Mann,,\n\
             2,tt0000007,2023-06-01,2023-06-01,,True,007,https://www.imdb.com/title/tt0000007/,Movie,6.1,90,2001,Drama,12,2001-02-03,,,\n",
        )
        .unwrap();
        let adapter = FakeAdapter::new(
            "tmdb",
            &[("tt0113277", Reply::Found("Heat")), ("tt0000007", Reply::Absent)],
        );
        let mut stage = StageDriver::new(
            TMDB,
            StageInput::Watchlist(export),
            CheckpointStore::new(dir.path().join("out.csv"), 1),
            adapter,
        );

        let summary = stage.run(RunOptions::default()).await.unwrap();
        assert_eq!(summary.stop, StopReason::Completed);
        assert_eq!((summary.found, summary.absent), (1, 1));
        assert_eq!(stage.adapter.calls(), vec!["tt0113277", "tt0000007"]);

        let out = Table::read_csv(&dir.path().join("out.csv")).unwrap();
        assert_eq!(out.ids(), vec!["tt0113277", "tt0000007"]);
        assert!(!out.has_column("description"));
        assert_eq!(cell(&out, "tt0113277", "genres"), Some(&json!(["Action", "Crime", "Drama"])));
        assert_eq!(cell(&out, "tt0113277", "tmdb_title"), Some(&json!("Heat")));
        assert_eq!(cell(&out, "tt0000007", "title"), Some(&json!("True")));
        assert_eq!(cell(&out, "tt0000007", "original_title"), Some(&json!("007")));
        assert_eq!(cell(&out, "tt0000007", "directors"), Some(&json!([])));
    }

    #[tokio::test]
    async fn nothing_to_do_leaves_output_untouched() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path(), &["tt001"]);
        let mut stage = driver(
            TMDB,
            dir.path(),
            1,
            FakeAdapter::new("tmdb", &[("tt001", Reply::Found("One"))]),
        );
        stage.run(RunOptions::default()).await.unwrap();
        let out_path = dir.path().join("out.csv");
        let before = fs::read(&out_path).unwrap();
        let modified = fs::metadata(&out_path).unwrap().modified().unwrap();

        let summary = stage.run(RunOptions::default()).await.unwrap();
        assert_eq!(summary.stop, StopReason::NothingToDo);
        assert_eq!(summary.rows_written, None);
        assert_eq!(fs::read(&out_path).unwrap(), before);
        assert_eq!(fs::metadata(&out_path).unwrap().modified().unwrap(), modified);
    }

    #[tokio::test]
    async fn failed_lookup_is_retried_next_run() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path(), &["tt001", "tt002"]);
        let mut stage = driver(
            TMDB,
            dir.path(),
            1,
            FakeAdapter::new("tmdb", &[("tt001", Reply::Fail), ("tt002", Reply::Found("Two"))]),
        );

        let first = stage.run(RunOptions::default()).await.unwrap();
        assert_eq!(first.failed, 1);
        let out = Table::read_csv(&dir.path().join("out.csv")).unwrap();
        assert_eq!(out.ids(), vec!["tt002"]);

        stage.adapter.replies.insert("tt001".into(), Reply::Found("One"));
        let second = stage.run(RunOptions::default()).await.unwrap();
        assert_eq!(second.found, 1);
        let out = Table::read_csv(&dir.path().join("out.csv")).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(stage.adapter.calls(), vec!["tt001", "tt002", "tt001"]);
    }

    #[tokio::test]
    async fn resuming_after_partial_runs_covers_every_row_once() {
        let ids = ["tt001", "tt002", "tt003", "tt004", "tt005"];
        for k in 0..=ids.len() {
            let dir = tempfile::tempdir().unwrap();
            write_input(dir.path(), OMDB, &ids);
            let replies: Vec<(&str, Reply)> =
                ids.iter().map(|id| (*id, Reply::Found("x"))).collect();
            let mut stage = driver(OMDB, dir.path(), 2, FakeAdapter::new("omdb", &replies));

            stage
                .run(RunOptions { force: false, limit: Some(k) })
                .await
                .unwrap();
            let resumed = stage.run(RunOptions::default()).await.unwrap();
            assert_eq!(resumed.attempted, ids.len() - k, "k = {k}");

            let out = Table::read_csv(&dir.path().join("out.csv")).unwrap();
            assert_eq!(out.ids(), ids.to_vec(), "k = {k}");
            assert_eq!(stage.adapter.calls().len(), ids.len(), "k = {k}");
        }
    }

    #[tokio::test]
    async fn interrupt_saves_completed_items() {
        let dir = tempfile::tempdir().unwrap();
        write_input(dir.path(), DDD, &["tt001", "tt002", "tt003"]);
        let shutdown = Shutdown::new();
        let mut adapter = FakeAdapter::new(
            "ddd",
            &[("tt001", Reply::Found("")), ("tt002", Reply::Found("")), ("tt003", Reply::Found(""))],
        );
        adapter.interrupt_after = Some((2, shutdown.clone()));
        let mut stage = driver(DDD, dir.path(), 20, adapter).with_shutdown(shutdown);

        let summary = stage.run(RunOptions::default()).await.unwrap();
        assert_eq!(summary.stop, StopReason::Interrupted);
        assert_eq!(summary.attempted, 2);

        let out = Table::read_csv(&dir.path().join("out.csv")).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(cell(&out, "tt002", "ddd_id"), Some(&json!(77)));
        assert!(crate::pipeline::table::is_null(cell(&out, "tt003", "ddd_id")));
    }

    #[tokio::test]
    async fn ddd_absence_writes_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        write_input(dir.path(), DDD, &["tt001", "tt002"]);
        let mut stage = driver(
            DDD,
            dir.path(),
            20,
            FakeAdapter::new("ddd", &[("tt001", Reply::Found("")), ("tt002", Reply::Absent)]),
        );
        stage.run(RunOptions::default()).await.unwrap();

        let out = Table::read_csv(&dir.path().join("out.csv")).unwrap();
        assert_eq!(cell(&out, "tt002", "ddd_id"), Some(&json!("NOT_FOUND")));
        assert_eq!(cell(&out, "tt001", "ddd_a_dog_dies"), Some(&json!("No")));
        assert_eq!(
            stage.run(RunOptions::default()).await.unwrap().stop,
            StopReason::NothingToDo
        );
    }

    #[tokio::test]
    async fn force_reprocesses_everything_once() {
        let dir = tempfile::tempdir().unwrap();
        write_input(dir.path(), OMDB, &["tt001", "tt002", "tt003"]);
        let replies = [
            ("tt001", Reply::Found("a")),
            ("tt002", Reply::Absent),
            ("tt003", Reply::Found("c")),
        ];
        let mut stage = driver(OMDB, dir.path(), 10, FakeAdapter::new("omdb", &replies))
            .with_quota(quota_at(dir.path(), 0, "2024-01-02", "2024-01-02"));
        stage.run(RunOptions::default()).await.unwrap();

        let forced = stage
            .run(RunOptions { force: true, limit: None })
            .await
            .unwrap();
        assert_eq!(forced.attempted, 3);
        assert_eq!(
            stage.adapter.calls(),
            vec!["tt001", "tt002", "tt003", "tt001", "tt002", "tt003"]
        );
        let out = Table::read_csv(&dir.path().join("out.csv")).unwrap();
        assert_eq!(out.len(), 3);
    }

    #[tokio::test]
    async fn quota_ledger_stops_not_found_titles_from_burning_calls() {
        let dir = tempfile::tempdir().unwrap();
        write_input(dir.path(), OMDB, &["tt001", "tt002", "tt003"]);
        let replies = [
            ("tt001", Reply::Found("a")),
            ("tt002", Reply::Absent),
            ("tt003", Reply::Found("c")),
        ];
        let mut stage = driver(OMDB, dir.path(), 10, FakeAdapter::new("omdb", &replies))
            .with_quota(quota_at(dir.path(), 0, "2024-01-02", "2024-01-02"));

        let first = stage.run(RunOptions::default()).await.unwrap();
        assert_eq!(first.quota, Some((3, 980)));
        let out = Table::read_csv(&dir.path().join("out.csv")).unwrap();
        assert!(crate::pipeline::table::is_null(cell(&out, "tt002", "omdb_title")));

        let second = stage.run(RunOptions::default()).await.unwrap();
        assert_eq!(second.stop, StopReason::NothingToDo);
        assert_eq!(stage.quota().unwrap().calls_today(), 3);
    }

    #[tokio::test]
    async fn deleted_output_is_rebuilt_despite_quota_ledger() {
        let dir = tempfile::tempdir().unwrap();
        write_input(dir.path(), OMDB, &["tt001", "tt002"]);
        let replies = [("tt001", Reply::Found("a")), ("tt002", Reply::Absent)];
        let mut stage = driver(OMDB, dir.path(), 10, FakeAdapter::new("omdb", &replies))
            .with_quota(quota_at(dir.path(), 0, "2024-01-02", "2024-01-02"));
        stage.run(RunOptions::default()).await.unwrap();
        assert_eq!(stage.quota().unwrap().ledger().len(), 2);

        let out_path = dir.path().join("out.csv");
        fs::remove_file(&out_path).unwrap();

        let rerun = stage.run(RunOptions::default()).await.unwrap();
        assert_eq!(rerun.stop, StopReason::Completed);
        assert_eq!(rerun.attempted, 2);
        let out = Table::read_csv(&out_path).unwrap();
        assert_eq!(out.ids(), vec!["tt001", "tt002"]);
        assert_eq!(cell(&out, "tt001", "omdb_title"), Some(&json!("a")));
        assert_eq!(stage.quota().unwrap().calls_today(), 4);
    }

    #[tokio::test]
    async fn one_call_left_processes_exactly_one_item() {
        let dir = tempfile::tempdir().unwrap();
        write_input(dir.path(), OMDB, &["tt001", "tt002", "tt003"]);
        let replies = [("tt001", Reply::Found("a")), ("tt002", Reply::Found("b"))];
        let mut stage = driver(OMDB, dir.path(), 10, FakeAdapter::new("omdb", &replies))
            .with_quota(quota_at(dir.path(), 979, "2024-01-02", "2024-01-02"));

        let summary = stage.run(RunOptions::default()).await.unwrap();
        assert_eq!(summary.stop, StopReason::QuotaExhausted);
        assert_eq!(summary.attempted, 1);
        assert_eq!(summary.quota, Some((980, 980)));

        let out = Table::read_csv(&dir.path().join("out.csv")).unwrap();
        assert_eq!(cell(&out, "tt001", "omdb_title"), Some(&json!("a")));
        assert!(crate::pipeline::table::is_null(cell(&out, "tt002", "omdb_title")));

        let saved: QuotaState = serde_json::from_str(
            &fs::read_to_string(dir.path().join("status.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(saved.calls_today, 980);
        assert_eq!(saved.enriched_ids, vec!["tt001"]);
    }

    #[tokio::test]
    async fn exhausted_quota_processes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write_input(dir.path(), OMDB, &["tt001"]);
        let mut stage = driver(
            OMDB,
            dir.path(),
            10,
            FakeAdapter::new("omdb", &[("tt001", Reply::Found("a"))]),
        )
        .with_quota(quota_at(dir.path(), 980, "2024-01-02", "2024-01-02"));

        let summary = stage.run(RunOptions::default()).await.unwrap();
        assert_eq!(summary.stop, StopReason::QuotaExhausted);
        assert_eq!(summary.attempted, 0);
        assert!(stage.adapter.calls().is_empty());
        assert!(!dir.path().join("out.csv").exists());
    }

    #[tokio::test]
    async fn new_day_resets_quota_before_any_call() {
        let dir = tempfile::tempdir().unwrap();
        write_input(dir.path(), OMDB, &["tt001", "tt002"]);
        let replies = [("tt001", Reply::Found("a")), ("tt002", Reply::Found("b"))];
        let mut stage = driver(OMDB, dir.path(), 10, FakeAdapter::new("omdb", &replies))
            .with_quota(quota_at(dir.path(), 950, "2024-01-01", "2024-01-02"));

        let summary = stage.run(RunOptions::default()).await.unwrap();
        assert_eq!(summary.stop, StopReason::Completed);
        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.quota, Some((2, 980)));
    }

    #[tokio::test]
    async fn missing_upstream_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut stage = driver(OMDB, dir.path(), 10, FakeAdapter::new("omdb", &[]));
        let err = stage.run(RunOptions::default()).await.unwrap_err();
        assert!(err.to_string().contains("run the tmdb stage first"), "{err}");
        assert!(stage.adapter.calls().is_empty());
    }

    #[tokio::test]
    async fn interrupted_run_resumes_where_it_stopped() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path(), &["tt001", "tt002", "tt003", "tt004"]);
        let replies: Vec<(&str, Reply)> = ["tt001", "tt002", "tt003", "tt004"]
            .iter()
            .map(|id| (*id, Reply::Found("x")))
            .collect();
        let shutdown = Shutdown::new();
        let mut adapter = FakeAdapter::new("tmdb", &replies);
        // Interrupt after the third lookup; cadence 2 means one mid-run checkpoint.
        adapter.interrupt_after = Some((3, shutdown.clone()));
        let mut stage = driver(TMDB, dir.path(), 2, adapter).with_shutdown(shutdown);

        let summary = stage.run(RunOptions::default()).await.unwrap();
        assert_eq!(summary.attempted, 3);
        let out = Table::read_csv(&dir.path().join("out.csv")).unwrap();
        assert_eq!(out.ids(), vec!["tt001", "tt002", "tt003"]);

        let mut resumed = driver(
            TMDB,
            dir.path(),
            2,
            FakeAdapter::new("tmdb", &replies),
        );
        let summary = resumed.run(RunOptions::default()).await.unwrap();
        assert_eq!(resumed.adapter.calls(), vec!["tt004"]);
        assert_eq!(summary.rows_written, Some(4));
    }
}
