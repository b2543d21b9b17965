use std::path::Path;

use anyhow::Context as _;

use crate::cli::{CatalogArgs, LookupArgs};
use crate::formats::CatalogEntry;
use crate::snapshot::{SnapshotStore, read_json, write_json_atomic};
use crate::steam::{SteamClient, StoreApi};

/// Returns the cached catalog at `path`, fetching and caching it first when
/// the file is missing or `refresh` is set. Entries without a name are dropped.
pub async fn load_or_fetch<A>(
    api: &A,
    path: &Path,
    refresh: bool,
) -> anyhow::Result<Vec<CatalogEntry>>
where
    A: StoreApi + ?Sized,
{
    if !refresh
        && let Some(cached) = read_json::<Vec<CatalogEntry>>(path).context("read cached catalog")?
    {
        tracing::info!(path = %path.display(), apps = cached.len(), "using cached catalog");
        return Ok(cached);
    }

    tracing::info!("fetching catalog from storefront");
    let fetched = api.fetch_catalog().await.context("fetch catalog")?;
    let total = fetched.len();
    let catalog = fetched
        .into_iter()
        .filter(|entry| !entry.name.trim().is_empty())
        .collect::<Vec<_>>();

    write_json_atomic(path, &catalog)
        .with_context(|| format!("write catalog: {}", path.display()))?;
    tracing::info!(
        path = %path.display(),
        apps = catalog.len(),
        unnamed = total - catalog.len(),
        "catalog cached"
    );
    Ok(catalog)
}

/// Case-insensitive exact match on the app name; first hit wins.
pub fn find_app_id(catalog: &[CatalogEntry], name: &str) -> Option<u64> {
    let wanted = name.to_lowercase();
    catalog
        .iter()
        .find(|entry| entry.name.to_lowercase() == wanted)
        .map(|entry| entry.appid)
}

pub async fn run(args: CatalogArgs) -> anyhow::Result<()> {
    let store = SnapshotStore::new(&args.store.data_dir);
    let api = SteamClient::new(args.store.steam_config()?)?;
    let catalog = load_or_fetch(&api, &store.catalog_path(), args.refresh).await?;

    println!("{} apps in catalog", catalog.len());
    Ok(())
}

pub async fn lookup(args: LookupArgs) -> anyhow::Result<()> {
    let store = SnapshotStore::new(&args.store.data_dir);
    let api = SteamClient::new(args.store.steam_config()?)?;
    let catalog = load_or_fetch(&api, &store.catalog_path(), false).await?;

    let app_id = find_app_id(&catalog, &args.name).ok_or_else(|| {
        anyhow::anyhow!(
            "no app named {:?} in catalog; check the spelling and try again",
            args.name
        )
    })?;
    println!("{app_id}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::error::FetchError;
    use crate::steam::{AppDetails, ReviewPage};

    #[derive(Default)]
    struct CountingCatalog {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StoreApi for CountingCatalog {
        async fn fetch_catalog(&self) -> Result<Vec<CatalogEntry>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![
                CatalogEntry {
                    appid: 367520,
                    name: "Hollow Knight".to_owned(),
                },
                CatalogEntry {
                    appid: 5,
                    name: String::new(),
                },
            ])
        }

        async fn fetch_item_details(&self, _app_id: u64) -> Result<Option<AppDetails>, FetchError> {
            Ok(None)
        }

        async fn fetch_review_page(
            &self,
            _app_id: u64,
            _cursor: &str,
        ) -> Result<ReviewPage, FetchError> {
            Ok(ReviewPage::default())
        }
    }

    #[tokio::test]
    async fn catalog_is_fetched_once_then_cached() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let path = temp.path().join("catalog.json");
        let api = CountingCatalog::default();

        let first = load_or_fetch(&api, &path, false).await?;
        let second = load_or_fetch(&api, &path, false).await?;
        let refreshed = load_or_fetch(&api, &path, true).await?;

        assert_eq!(first.len(), 1);
        assert_eq!(first, second);
        assert_eq!(refreshed, first);
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[test]
    fn find_app_id_ignores_case() {
        let catalog = vec![CatalogEntry {
            appid: 367520,
            name: "Hollow Knight".to_owned(),
        }];

        assert_eq!(find_app_id(&catalog, "hollow knight"), Some(367520));
        assert_eq!(find_app_id(&catalog, "Hollow"), None);
    }
}
