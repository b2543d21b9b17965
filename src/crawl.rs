use std::collections::{BTreeSet, HashSet};
use std::time::{Duration, Instant};

use anyhow::Context as _;
use chrono::Utc;

use crate::cli::CrawlArgs;
use crate::error::FetchError;
use crate::formats::{
    AppRow, CatalogEntry, ImageRow, ReviewRow, RunOutcome, RunSummary, TrailerRow,
};
use crate::normalize::{NameTable, Normalizer};
use crate::reviews::{ReviewBundle, fetch_all_reviews};
use crate::snapshot::{Snapshot, SnapshotRef, SnapshotStore};
use crate::steam::{AppDetails, StoreApi, SteamClient};

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    /// Snapshot after this many newly appended apps.
    pub checkpoint_every: usize,
    /// Review progress logging interval; `0` disables it.
    pub review_report_every: u64,
    /// Stop after processing this many unvisited apps.
    pub max_items: Option<usize>,
    /// Pause before each app request.
    pub delay: Duration,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            checkpoint_every: 10,
            review_report_every: 1000,
            max_items: None,
            delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Appended { reviews: usize },
    NoDetails,
    NoReviews,
}

#[derive(Debug)]
pub enum StopReason {
    Exhausted,
    ItemLimit,
    /// A storefront request failed; the app being processed was not marked.
    Halted { app_id: u64, error: FetchError },
}

impl StopReason {
    pub fn outcome(&self) -> RunOutcome {
        match self {
            Self::Exhausted => RunOutcome::Completed,
            Self::ItemLimit => RunOutcome::ItemLimit,
            Self::Halted { error, .. } if error.is_rate_limited() => RunOutcome::RateLimited,
            Self::Halted { .. } => RunOutcome::Failed,
        }
    }
}

#[derive(Debug)]
pub struct CrawlReport {
    pub processed: usize,
    pub new_apps: usize,
    pub snapshots: usize,
    pub stop: StopReason,
}

/// In-memory tables plus the visited set, owned by one crawl.
///
/// Id counters start from the restored table lengths and only move forward,
/// so ids are never reused across runs.
#[derive(Debug)]
pub struct CrawlState {
    apps: Vec<AppRow>,
    reviews: Vec<ReviewRow>,
    images: Vec<ImageRow>,
    trailers: Vec<TrailerRow>,
    normalizer: Normalizer,
    queried: BTreeSet<u64>,
    next_review_id: u64,
    next_image_id: u64,
    next_trailer_id: u64,
}

impl CrawlState {
    pub fn empty() -> anyhow::Result<Self> {
        Self::from_snapshot(Snapshot::default())
    }

    /// Restores a crawl from disk.
    ///
    /// A snapshot torn part way through its write can carry rows for apps
    /// that never reached `apps.csv`, plus lookup names only those apps use.
    /// Both are dropped here so the affected apps are harvested again.
    pub fn from_snapshot(snapshot: Snapshot) -> anyhow::Result<Self> {
        let Snapshot {
            apps,
            mut reviews,
            mut images,
            mut trailers,
            developers,
            publishers,
            queried,
        } = snapshot;

        let mut app_ids = HashSet::new();
        for app in &apps {
            if !app_ids.insert(app.app_id) {
                anyhow::bail!("apps table has duplicate app_id {}", app.app_id);
            }
        }

        let dropped_reviews = retain_tabled(&mut reviews, &app_ids, |r| r.app_id);
        let dropped_images = retain_tabled(&mut images, &app_ids, |r| r.app_id);
        let dropped_trailers = retain_tabled(&mut trailers, &app_ids, |r| r.app_id);
        if dropped_reviews + dropped_images + dropped_trailers > 0 {
            tracing::warn!(
                reviews = dropped_reviews,
                images = dropped_images,
                trailers = dropped_trailers,
                "dropped rows of apps missing from apps table"
            );
        }

        ensure_dense_ids("reviews", reviews.iter().map(|r| r.review_id))?;
        ensure_dense_ids("images", images.iter().map(|r| r.image_id))?;
        ensure_dense_ids("trailers", trailers.iter().map(|r| r.trailer_id))?;

        let mut developers = NameTable::from_rows(developers).context("load developers")?;
        let mut publishers = NameTable::from_rows(publishers).context("load publishers")?;
        fit_name_table("developers", &mut developers, apps.iter().map(|a| a.developer_id))?;
        fit_name_table("publishers", &mut publishers, apps.iter().map(|a| a.publisher_id))?;

        // The visited set is written after the tables, so an interrupted
        // snapshot can hold apps the set does not list yet.
        let mut queried = queried;
        queried.extend(app_ids);

        Ok(Self {
            next_review_id: reviews.len() as u64,
            next_image_id: images.len() as u64,
            next_trailer_id: trailers.len() as u64,
            apps,
            reviews,
            images,
            trailers,
            normalizer: Normalizer::new(developers, publishers)?,
            queried,
        })
    }

    pub fn apps(&self) -> &[AppRow] {
        &self.apps
    }

    pub fn reviews(&self) -> &[ReviewRow] {
        &self.reviews
    }

    pub fn images(&self) -> &[ImageRow] {
        &self.images
    }

    pub fn trailers(&self) -> &[TrailerRow] {
        &self.trailers
    }

    pub fn developers(&self) -> &NameTable {
        self.normalizer.developers()
    }

    pub fn publishers(&self) -> &NameTable {
        self.normalizer.publishers()
    }

    pub fn queried(&self) -> &BTreeSet<u64> {
        &self.queried
    }

    pub fn is_queried(&self, app_id: u64) -> bool {
        self.queried.contains(&app_id)
    }

    pub fn as_snapshot(&self) -> SnapshotRef<'_> {
        SnapshotRef {
            apps: &self.apps,
            reviews: &self.reviews,
            images: &self.images,
            trailers: &self.trailers,
            developers: self.normalizer.developers(),
            publishers: self.normalizer.publishers(),
            queried: &self.queried,
        }
    }

    fn mark_queried(&mut self, app_id: u64) {
        self.queried.insert(app_id);
    }

    fn append(&mut self, entry: &CatalogEntry, details: &AppDetails, bundle: ReviewBundle) {
        let app_id = entry.appid;
        let normalized = self.normalizer.normalize(details);

        self.apps.push(AppRow {
            app_id,
            name: details.name.clone().unwrap_or_else(|| entry.name.clone()),
            app_type: details.app_type.clone().unwrap_or_default(),
            description: details.short_description.clone().unwrap_or_default(),
            total_reviews: bundle.summary.total_reviews,
            total_positive: bundle.summary.total_positive,
            total_negative: bundle.summary.total_negative,
            price_currency: normalized.price_currency,
            price: normalized.price,
            genres: normalized.genres,
            categories: normalized.categories,
            platforms: normalized.platforms,
            developer_id: normalized.developer_ref,
            publisher_id: normalized.publisher_ref,
        });

        for review in bundle.reviews {
            let review_id = self.next_review_id;
            self.next_review_id += 1;
            self.reviews.push(ReviewRow {
                review_id,
                app_id,
                playtime_at_review: review.author.and_then(|a| a.playtime_at_review),
                review: review.review,
            });
        }

        for (image_type, image_url) in normalized.images {
            let image_id = self.next_image_id;
            self.next_image_id += 1;
            self.images.push(ImageRow {
                image_id,
                app_id,
                image_type,
                image_url,
            });
        }

        for trailer_url in normalized.trailers {
            let trailer_id = self.next_trailer_id;
            self.next_trailer_id += 1;
            self.trailers.push(TrailerRow {
                trailer_id,
                app_id,
                trailer_url,
            });
        }
    }
}

/// Keeps rows whose app is in the apps table; returns how many were dropped.
fn retain_tabled<T>(
    rows: &mut Vec<T>,
    app_ids: &HashSet<u64>,
    app_id: impl Fn(&T) -> u64,
) -> usize {
    let before = rows.len();
    rows.retain(|row| app_ids.contains(&app_id(row)));
    before - rows.len()
}

/// Rejects references past the end of `table`, then drops trailing names no
/// app references.
fn fit_name_table(
    table_name: &str,
    table: &mut NameTable,
    refs: impl Iterator<Item = i64>,
) -> anyhow::Result<()> {
    let mut used = 0_usize;
    for id in refs.filter(|id| *id >= 0) {
        let id = usize::try_from(id).unwrap_or(usize::MAX);
        if id >= table.len() {
            anyhow::bail!(
                "apps table references {table_name} id {id} past the end ({} rows)",
                table.len()
            );
        }
        used = used.max(id + 1);
    }
    if used < table.len() {
        tracing::warn!(
            table = table_name,
            dropped = table.len() - used,
            "dropped names no app references"
        );
        table.truncate(used);
    }
    Ok(())
}

fn ensure_dense_ids(table: &str, ids: impl Iterator<Item = u64>) -> anyhow::Result<()> {
    for (position, id) in ids.enumerate() {
        if id != position as u64 {
            anyhow::bail!("{table} table ids must run 0..n in order: row {position} has id {id}");
        }
    }
    Ok(())
}

/// Resolves one app completely: details, every review page, then the append.
async fn process_item<A>(
    api: &A,
    state: &mut CrawlState,
    entry: &CatalogEntry,
    options: &CrawlOptions,
) -> Result<ItemOutcome, FetchError>
where
    A: StoreApi + ?Sized,
{
    let Some(details) = api.fetch_item_details(entry.appid).await? else {
        return Ok(ItemOutcome::NoDetails);
    };

    let bundle = fetch_all_reviews(api, entry.appid, options.review_report_every).await?;
    if bundle.is_empty() {
        return Ok(ItemOutcome::NoReviews);
    }

    let reviews = bundle.reviews.len();
    state.append(entry, &details, bundle);
    Ok(ItemOutcome::Appended { reviews })
}

/// Visits every catalog app not yet queried, strictly one at a time.
///
/// Every app ends up queried whatever its outcome, except the one whose
/// request failed: a failure halts the loop without marking it. A snapshot is
/// written every `checkpoint_every` new apps and once more on the way out if
/// anything changed since the last one.
pub async fn crawl<A>(
    api: &A,
    catalog: &[CatalogEntry],
    state: &mut CrawlState,
    store: &SnapshotStore,
    options: &CrawlOptions,
) -> anyhow::Result<CrawlReport>
where
    A: StoreApi + ?Sized,
{
    let checkpoint_every = options.checkpoint_every.max(1);
    let mut remaining = catalog
        .iter()
        .map(|entry| entry.appid)
        .filter(|app_id| !state.is_queried(*app_id))
        .collect::<HashSet<_>>()
        .len();

    let mut processed = 0_usize;
    let mut new_apps = 0_usize;
    let mut snapshots = 0_usize;
    let mut apps_since_snapshot = 0_usize;
    let mut dirty = false;
    let mut stop = StopReason::Exhausted;

    for entry in catalog {
        if state.is_queried(entry.appid) {
            continue;
        }
        if options.max_items.is_some_and(|max| processed >= max) {
            stop = StopReason::ItemLimit;
            break;
        }
        if !options.delay.is_zero() {
            tokio::time::sleep(options.delay).await;
        }

        let outcome = match process_item(api, state, entry, options).await {
            Ok(outcome) => outcome,
            Err(error) => {
                if error.is_rate_limited() {
                    tracing::warn!(app_id = entry.appid, %error, "rate limited by storefront; stopping crawl");
                } else {
                    tracing::error!(app_id = entry.appid, %error, "storefront request failed; stopping crawl");
                }
                stop = StopReason::Halted {
                    app_id: entry.appid,
                    error,
                };
                break;
            }
        };

        state.mark_queried(entry.appid);
        dirty = true;
        processed += 1;
        remaining = remaining.saturating_sub(1);

        match outcome {
            ItemOutcome::Appended { reviews } => {
                tracing::debug!(app_id = entry.appid, reviews, "app appended");
                new_apps += 1;
                apps_since_snapshot += 1;
            }
            ItemOutcome::NoDetails => {
                tracing::debug!(app_id = entry.appid, "no details; skipped");
            }
            ItemOutcome::NoReviews => {
                tracing::debug!(app_id = entry.appid, "no reviews; skipped");
            }
        }

        if apps_since_snapshot >= checkpoint_every {
            store
                .write(state.as_snapshot())
                .context("write periodic snapshot")?;
            snapshots += 1;
            apps_since_snapshot = 0;
            dirty = false;
        }

        tracing::info!(app_id = entry.appid, remaining, "{remaining} apps remaining");
    }

    if dirty {
        store
            .write(state.as_snapshot())
            .context("write final snapshot")?;
        snapshots += 1;
    }

    Ok(CrawlReport {
        processed,
        new_apps,
        snapshots,
        stop,
    })
}

pub async fn run(args: CrawlArgs) -> anyhow::Result<()> {
    let started_at = Utc::now();
    let clock = Instant::now();

    let store = SnapshotStore::new(&args.store.data_dir);
    let api = SteamClient::new(args.store.steam_config()?)?;
    let catalog = crate::catalog::load_or_fetch(&api, &store.catalog_path(), args.refresh_catalog)
        .await
        .context("load catalog")?;

    let snapshot = store.load().context("load snapshot")?;
    let mut state = CrawlState::from_snapshot(snapshot).context("restore crawl state")?;
    let apps_before = state.apps().len();
    let queried_before = state.queried().len();
    tracing::info!(
        catalog = catalog.len(),
        queried = queried_before,
        apps = apps_before,
        "starting crawl"
    );

    let options = CrawlOptions {
        checkpoint_every: usize::try_from(args.checkpoint_every).unwrap_or(usize::MAX),
        review_report_every: args.review_report_every,
        max_items: args.max_items,
        delay: Duration::from_millis(args.delay_ms),
    };
    let result = crawl(&api, &catalog, &mut state, &store, &options).await;

    let summary = RunSummary {
        started_at,
        finished_at: Utc::now(),
        elapsed_secs: clock.elapsed().as_secs_f64(),
        new_apps: state.apps().len() - apps_before,
        new_queried: state.queried().len() - queried_before,
        outcome: match &result {
            Ok(report) => report.stop.outcome(),
            Err(_) => RunOutcome::Failed,
        },
    };
    store
        .append_run_summary(&summary)
        .context("append run history")?;

    let report = result?;
    tracing::info!(
        processed = report.processed,
        new_apps = report.new_apps,
        snapshots = report.snapshots,
        elapsed_secs = summary.elapsed_secs,
        "crawl finished"
    );

    match report.stop {
        StopReason::Halted { app_id, error } if error.is_rate_limited() => Err(anyhow::Error::new(error)
            .context(format!(
                "rate limited by storefront at app {app_id}; stopping (progress saved)"
            ))),
        StopReason::Halted { app_id, error } => Err(anyhow::Error::new(error).context(format!(
            "storefront request failed at app {app_id}; stopping (progress saved)"
        ))),
        StopReason::Exhausted | StopReason::ItemLimit => Ok(()),
    }
}
