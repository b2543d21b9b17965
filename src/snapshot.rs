use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::formats::{AppRow, ImageRow, LookupRow, ReviewRow, RunSummary, TrailerRow};
use crate::normalize::NameTable;

const APPS_CSV: &str = "apps.csv";
const REVIEWS_CSV: &str = "reviews.csv";
const IMAGES_CSV: &str = "images.csv";
const TRAILERS_CSV: &str = "trailers.csv";
const DEVELOPERS_CSV: &str = "developers.csv";
const PUBLISHERS_CSV: &str = "publishers.csv";
const QUERIED_JSON: &str = "queried_apps.json";
const RUN_HISTORY_CSV: &str = "run_history.csv";
const CATALOG_JSON: &str = "catalog.json";

const RUN_HISTORY_HEADER: [&str; 6] = [
    "started_at",
    "finished_at",
    "elapsed_secs",
    "new_apps",
    "new_queried",
    "outcome",
];

/// Everything persisted by a previous run. Missing files load as empty.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub apps: Vec<AppRow>,
    pub reviews: Vec<ReviewRow>,
    pub images: Vec<ImageRow>,
    pub trailers: Vec<TrailerRow>,
    pub developers: Vec<LookupRow>,
    pub publishers: Vec<LookupRow>,
    pub queried: BTreeSet<u64>,
}

/// Borrowed view of the in-memory tables, written out as one snapshot.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotRef<'a> {
    pub apps: &'a [AppRow],
    pub reviews: &'a [ReviewRow],
    pub images: &'a [ImageRow],
    pub trailers: &'a [TrailerRow],
    pub developers: &'a NameTable,
    pub publishers: &'a NameTable,
    pub queried: &'a BTreeSet<u64>,
}

/// Flat-file layout of a harvest under one data directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.dir.join(CATALOG_JSON)
    }

    pub fn run_history_path(&self) -> PathBuf {
        self.dir.join(RUN_HISTORY_CSV)
    }

    pub fn load(&self) -> anyhow::Result<Snapshot> {
        // The visited set is read first; it alone decides what gets skipped.
        let queried = read_json::<BTreeSet<u64>>(&self.dir.join(QUERIED_JSON))
            .context("load queried apps")?
            .unwrap_or_default();

        Ok(Snapshot {
            queried,
            apps: read_csv(&self.dir.join(APPS_CSV)).context("load apps table")?,
            reviews: read_csv(&self.dir.join(REVIEWS_CSV)).context("load reviews table")?,
            images: read_csv(&self.dir.join(IMAGES_CSV)).context("load images table")?,
            trailers: read_csv(&self.dir.join(TRAILERS_CSV)).context("load trailers table")?,
            developers: read_csv(&self.dir.join(DEVELOPERS_CSV))
                .context("load developers table")?,
            publishers: read_csv(&self.dir.join(PUBLISHERS_CSV))
                .context("load publishers table")?,
        })
    }

    /// Rewrites every table, then the visited set.
    ///
    /// Files are replaced one at a time. Everything that references an app or
    /// is referenced by one lands before `apps.csv`, and the visited set goes
    /// last, so a torn snapshot only ever holds extra tail rows that restore
    /// drops.
    pub fn write(&self, snapshot: SnapshotRef<'_>) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create data dir: {}", self.dir.display()))?;

        write_csv_atomic(&self.dir.join(REVIEWS_CSV), snapshot.reviews)
            .context("write reviews table")?;
        write_csv_atomic(&self.dir.join(IMAGES_CSV), snapshot.images)
            .context("write images table")?;
        write_csv_atomic(&self.dir.join(TRAILERS_CSV), snapshot.trailers)
            .context("write trailers table")?;
        write_csv_atomic(&self.dir.join(DEVELOPERS_CSV), snapshot.developers.rows())
            .context("write developers table")?;
        write_csv_atomic(&self.dir.join(PUBLISHERS_CSV), snapshot.publishers.rows())
            .context("write publishers table")?;
        write_csv_atomic(&self.dir.join(APPS_CSV), snapshot.apps).context("write apps table")?;
        write_json_atomic(&self.dir.join(QUERIED_JSON), snapshot.queried)
            .context("write queried apps")?;

        tracing::info!(
            dir = %self.dir.display(),
            apps = snapshot.apps.len(),
            reviews = snapshot.reviews.len(),
            queried = snapshot.queried.len(),
            "snapshot saved"
        );
        Ok(())
    }

    pub fn append_run_summary(&self, summary: &RunSummary) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create data dir: {}", self.dir.display()))?;

        let path = self.run_history_path();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open run history: {}", path.display()))?;
        let is_new = file
            .metadata()
            .with_context(|| format!("stat run history: {}", path.display()))?
            .len()
            == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if is_new {
            writer
                .write_record(RUN_HISTORY_HEADER)
                .context("write run history header")?;
        }
        writer
            .serialize(summary)
            .context("write run history row")?;
        writer.flush().context("flush run history")?;
        Ok(())
    }
}

fn read_csv<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("open: {}", path.display()));
        }
    };

    let mut reader = csv::Reader::from_reader(file);
    let mut rows = Vec::new();
    for (line, record) in reader.deserialize().enumerate() {
        let row = record.with_context(|| format!("parse {} row {}", path.display(), line + 1))?;
        rows.push(row);
    }
    Ok(rows)
}

fn write_csv_atomic<T, I>(path: &Path, rows: I) -> anyhow::Result<()>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let tmp_path = tmp_path_for(path);
    let mut writer = csv::Writer::from_path(&tmp_path)
        .with_context(|| format!("create tmp: {}", tmp_path.display()))?;
    for row in rows {
        writer.serialize(row).context("serialize csv row")?;
    }
    writer
        .flush()
        .with_context(|| format!("flush tmp: {}", tmp_path.display()))?;
    drop(writer);

    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("read: {}", path.display())),
    };
    let value = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse json: {}", path.display()))?;
    Ok(Some(value))
}

pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = tmp_path_for(path);
    let data = serde_json::to_vec(value).context("serialize json")?;
    std::fs::write(&tmp_path, &data)
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()))
}
