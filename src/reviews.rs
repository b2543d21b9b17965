use crate::error::FetchError;
use crate::steam::{FIRST_REVIEW_CURSOR, QuerySummary, Review, StoreApi};

#[derive(Debug, Clone, Default)]
pub struct ReviewBundle {
    /// Summary from the first page.
    pub summary: QuerySummary,
    pub reviews: Vec<Review>,
}

impl ReviewBundle {
    /// An app whose first page reports zero total reviews counts as having none,
    /// even if that page carried some reviews.
    pub fn is_empty(&self) -> bool {
        self.reviews.is_empty() || self.summary.total_reviews == 0
    }
}

/// Follows the review cursor for `app_id` until every review has been read.
///
/// Stops when the accumulated count reaches the first page's `total_reviews`,
/// when a page comes back empty, or when the cursor stops advancing. Any
/// failed page fails the whole bundle.
///
/// `report_every` controls progress logging; `0` disables it.
pub async fn fetch_all_reviews<A>(
    api: &A,
    app_id: u64,
    report_every: u64,
) -> Result<ReviewBundle, FetchError>
where
    A: StoreApi + ?Sized,
{
    let mut cursor = FIRST_REVIEW_CURSOR.to_owned();
    let mut summary: Option<QuerySummary> = None;
    let mut reviews: Vec<Review> = Vec::new();
    let mut next_report = report_every;

    loop {
        let page = api.fetch_review_page(app_id, &cursor).await?;
        let total = summary
            .get_or_insert_with(|| page.query_summary.unwrap_or_default())
            .total_reviews;

        let fetched = page.reviews.len();
        reviews.extend(page.reviews);
        let accumulated = reviews.len() as u64;

        if fetched == 0 || accumulated >= total {
            break;
        }

        let Some(next_cursor) = page.cursor.filter(|c| !c.is_empty()) else {
            tracing::debug!(app_id, accumulated, total, "review page has no cursor");
            break;
        };
        if next_cursor == cursor {
            tracing::warn!(app_id, accumulated, total, "review cursor did not advance");
            break;
        }

        if report_every > 0 && accumulated > next_report {
            let percent = 100.0 * accumulated as f64 / total as f64;
            tracing::info!(app_id, accumulated, total, "review progress: {percent:.2}%");
            while next_report < accumulated {
                next_report += report_every;
            }
        }

        cursor = next_cursor;
    }

    Ok(ReviewBundle {
        summary: summary.unwrap_or_default(),
        reviews,
    })
}
