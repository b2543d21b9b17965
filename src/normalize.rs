use std::collections::{BTreeSet, HashMap, HashSet};

use anyhow::Context as _;
use regex::Regex;

use crate::formats::{ImageKind, LookupRow};
use crate::steam::AppDetails;

/// Surrogate index stored for a missing publisher or developer.
pub const UNKNOWN_REF: i64 = -1;

const DESCRIPTION_IMAGE_PATTERN: &str =
    r"(?i)https?://[^\s]+(?:\.jpg|\.jpeg|\.png|\.gif|\.bmp|\.tiff|\.webp|\.svg)";

/// Append-only name table handing out dense, zero-based indices.
#[derive(Debug, Clone, Default)]
pub struct NameTable {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl NameTable {
    /// Rebuilds a table from snapshot rows. Ids must be exactly `0..rows.len()`
    /// in order, otherwise later inserts could collide with stored ids.
    pub fn from_rows(rows: Vec<LookupRow>) -> anyhow::Result<Self> {
        let mut table = Self::default();
        for (position, row) in rows.into_iter().enumerate() {
            if row.id != position as u64 {
                anyhow::bail!(
                    "name table ids must be dense: expected {position}, found {}",
                    row.id
                );
            }
            if table.index.contains_key(&row.name) {
                anyhow::bail!("duplicate name in table: {:?}", row.name);
            }
            table.index.insert(row.name.clone(), position);
            table.names.push(row.name);
        }
        Ok(table)
    }

    /// Returns the index for `name`, appending it if it is new. Matching is
    /// exact and case-sensitive.
    pub fn lookup_or_insert(&mut self, name: &str) -> i64 {
        if let Some(&existing) = self.index.get(name) {
            return existing as i64;
        }
        let next = self.names.len();
        self.names.push(name.to_owned());
        self.index.insert(name.to_owned(), next);
        next as i64
    }

    /// Drops every name from index `len` on.
    pub fn truncate(&mut self, len: usize) {
        for name in self.names.drain(len.min(self.names.len())..) {
            self.index.remove(&name);
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = LookupRow> + '_ {
        self.names.iter().enumerate().map(|(id, name)| LookupRow {
            id: id as u64,
            name: name.clone(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedApp {
    pub images: Vec<(ImageKind, String)>,
    pub trailers: Vec<String>,
    pub price_currency: String,
    pub price: String,
    pub genres: Vec<String>,
    pub categories: Vec<String>,
    pub platforms: BTreeSet<String>,
    pub developer_ref: i64,
    pub publisher_ref: i64,
}

/// Turns raw app details into row-ready values and owns the publisher and
/// developer lookup tables.
#[derive(Debug)]
pub struct Normalizer {
    description_image: Regex,
    developers: NameTable,
    publishers: NameTable,
}

impl Normalizer {
    pub fn new(developers: NameTable, publishers: NameTable) -> anyhow::Result<Self> {
        let description_image =
            Regex::new(DESCRIPTION_IMAGE_PATTERN).context("compile description image pattern")?;
        Ok(Self {
            description_image,
            developers,
            publishers,
        })
    }

    pub fn developers(&self) -> &NameTable {
        &self.developers
    }

    pub fn publishers(&self) -> &NameTable {
        &self.publishers
    }

    pub fn normalize(&mut self, details: &AppDetails) -> NormalizedApp {
        let (price_currency, price) = price_fields(details);

        NormalizedApp {
            images: self.image_links(details),
            trailers: trailer_links(details),
            price_currency,
            price,
            genres: descriptions(details.genres.as_deref()),
            categories: descriptions(details.categories.as_deref()),
            platforms: supported_platforms(details),
            developer_ref: first_name(details.developers.as_deref())
                .map_or(UNKNOWN_REF, |name| self.developers.lookup_or_insert(name)),
            publisher_ref: first_name(details.publishers.as_deref())
                .map_or(UNKNOWN_REF, |name| self.publishers.lookup_or_insert(name)),
        }
    }

    /// Header, capsule, description images (deduplicated), then screenshots.
    fn image_links(&self, details: &AppDetails) -> Vec<(ImageKind, String)> {
        let mut images = Vec::new();

        if let Some(header) = non_empty(details.header_image.as_deref()) {
            images.push((ImageKind::Header, header.to_owned()));
        }
        if let Some(capsule) = non_empty(details.capsule_image.as_deref()) {
            images.push((ImageKind::Capsule, capsule.to_owned()));
        }

        if let Some(description) = details.detailed_description.as_deref() {
            let mut seen = HashSet::new();
            for found in self.description_image.find_iter(description) {
                if seen.insert(found.as_str()) {
                    images.push((ImageKind::Description, found.as_str().to_owned()));
                }
            }
        }

        for screenshot in details.screenshots.iter().flatten() {
            if let Some(path) = non_empty(screenshot.path_full.as_deref()) {
                images.push((ImageKind::Screenshot, path.to_owned()));
            }
        }

        images
    }
}

fn trailer_links(details: &AppDetails) -> Vec<String> {
    details
        .movies
        .iter()
        .flatten()
        .filter_map(|movie| non_empty(movie.mp4.as_ref()?.max.as_deref()))
        .map(str::to_owned)
        .collect()
}

/// Free apps carry no price. Paid apps with a missing nested field degrade
/// to empty strings for that field only.
fn price_fields(details: &AppDetails) -> (String, String) {
    if details.is_free.unwrap_or(false) {
        return (String::new(), String::new());
    }
    let Some(overview) = details.price_overview.as_ref() else {
        return (String::new(), String::new());
    };
    (
        overview.currency.clone().unwrap_or_default(),
        overview.final_formatted.clone().unwrap_or_default(),
    )
}

fn descriptions(entries: Option<&[crate::steam::Described]>) -> Vec<String> {
    entries
        .unwrap_or_default()
        .iter()
        .filter_map(|entry| entry.description.clone())
        .collect()
}

fn supported_platforms(details: &AppDetails) -> BTreeSet<String> {
    details
        .platforms
        .iter()
        .flatten()
        .filter(|(_, supported)| **supported)
        .map(|(name, _)| name.clone())
        .collect()
}

fn first_name(names: Option<&[String]>) -> Option<&str> {
    non_empty(names?.first().map(String::as_str))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::steam::{Described, Movie, MovieSources, PriceOverview, Screenshot};

    fn normalizer() -> Normalizer {
        Normalizer::new(NameTable::default(), NameTable::default()).unwrap()
    }

    #[test]
    fn name_table_reuses_existing_index() {
        let mut table = NameTable::default();

        assert_eq!(table.lookup_or_insert("Valve"), 0);
        assert_eq!(table.lookup_or_insert("Team Cherry"), 1);
        assert_eq!(table.lookup_or_insert("Valve"), 0);
        assert_eq!(table.lookup_or_insert("valve"), 2);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn name_table_continues_after_loaded_rows() {
        let rows = vec![
            LookupRow {
                id: 0,
                name: "Valve".to_owned(),
            },
            LookupRow {
                id: 1,
                name: "Team Cherry".to_owned(),
            },
        ];
        let mut table = NameTable::from_rows(rows).unwrap();

        assert_eq!(table.lookup_or_insert("Team Cherry"), 1);
        assert_eq!(table.lookup_or_insert("Supergiant"), 2);
    }

    #[test]
    fn truncated_name_is_handed_out_again() {
        let mut table = NameTable::default();
        table.lookup_or_insert("Valve");
        table.lookup_or_insert("Supergiant");

        table.truncate(1);

        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup_or_insert("Supergiant"), 1);
        assert_eq!(table.lookup_or_insert("Valve"), 0);
    }

    #[test]
    fn name_table_rejects_gaps() {
        let rows = vec![LookupRow {
            id: 3,
            name: "Valve".to_owned(),
        }];
        assert!(NameTable::from_rows(rows).is_err());
    }

    #[test]
    fn missing_fields_degrade_to_empty_values() {
        let mut normalizer = normalizer();

        let normalized = normalizer.normalize(&AppDetails::default());

        assert_eq!(normalized, NormalizedApp {
            developer_ref: UNKNOWN_REF,
            publisher_ref: UNKNOWN_REF,
            ..NormalizedApp::default()
        });
        assert!(normalizer.developers().is_empty());
    }

    #[test]
    fn free_app_has_empty_price_even_with_overview() {
        let details = AppDetails {
            is_free: Some(true),
            price_overview: Some(PriceOverview {
                currency: Some("USD".to_owned()),
                final_formatted: Some("$0.00".to_owned()),
            }),
            ..AppDetails::default()
        };

        let normalized = normalizer().normalize(&details);

        assert_eq!(normalized.price_currency, "");
        assert_eq!(normalized.price, "");
    }

    #[test]
    fn partial_price_overview_keeps_present_field() {
        let details = AppDetails {
            is_free: Some(false),
            price_overview: Some(PriceOverview {
                currency: Some("EUR".to_owned()),
                final_formatted: None,
            }),
            ..AppDetails::default()
        };

        let normalized = normalizer().normalize(&details);

        assert_eq!(normalized.price_currency, "EUR");
        assert_eq!(normalized.price, "");
    }

    #[test]
    fn images_follow_fixed_category_order() {
        let details = AppDetails {
            header_image: Some("https://cdn.example/header.jpg".to_owned()),
            capsule_image: Some("https://cdn.example/capsule.jpg".to_owned()),
            detailed_description: Some(
                "<img src=https://cdn.example/a.PNG /> text https://cdn.example/a.PNG \
                 and https://cdn.example/b.gif plus https://cdn.example/page.html"
                    .to_owned(),
            ),
            screenshots: Some(vec![
                Screenshot {
                    path_full: Some("https://cdn.example/ss1.jpg".to_owned()),
                },
                Screenshot { path_full: None },
            ]),
            ..AppDetails::default()
        };

        let images = normalizer().normalize(&details).images;

        assert_eq!(images, vec![
            (ImageKind::Header, "https://cdn.example/header.jpg".to_owned()),
            (ImageKind::Capsule, "https://cdn.example/capsule.jpg".to_owned()),
            (ImageKind::Description, "https://cdn.example/a.PNG".to_owned()),
            (ImageKind::Description, "https://cdn.example/b.gif".to_owned()),
            (ImageKind::Screenshot, "https://cdn.example/ss1.jpg".to_owned()),
        ]);
    }

    #[test]
    fn trailers_use_max_quality_mp4() {
        let details = AppDetails {
            movies: Some(vec![
                Movie {
                    mp4: Some(MovieSources {
                        max: Some("https://cdn.example/movie_max.mp4".to_owned()),
                    }),
                },
                Movie { mp4: None },
            ]),
            ..AppDetails::default()
        };

        let trailers = normalizer().normalize(&details).trailers;

        assert_eq!(trailers, vec!["https://cdn.example/movie_max.mp4".to_owned()]);
    }

    #[test]
    fn genres_categories_and_platforms_are_independent() {
        let details = AppDetails {
            genres: Some(vec![
                Described {
                    description: Some("Action".to_owned()),
                },
                Described {
                    description: Some("Indie".to_owned()),
                },
            ]),
            platforms: Some(BTreeMap::from([
                ("windows".to_owned(), true),
                ("mac".to_owned(), false),
                ("linux".to_owned(), true),
            ])),
            ..AppDetails::default()
        };

        let normalized = normalizer().normalize(&details);

        assert_eq!(normalized.genres, vec!["Action", "Indie"]);
        assert!(normalized.categories.is_empty());
        assert_eq!(
            normalized.platforms.into_iter().collect::<Vec<_>>(),
            vec!["linux", "windows"]
        );
    }

    #[test]
    fn publishers_and_developers_are_deduplicated_separately() {
        let mut normalizer = normalizer();
        let first = AppDetails {
            developers: Some(vec!["Team Cherry".to_owned()]),
            publishers: Some(vec!["Team Cherry".to_owned()]),
            ..AppDetails::default()
        };
        let second = AppDetails {
            developers: Some(vec!["Valve".to_owned()]),
            publishers: Some(vec!["Team Cherry".to_owned(), "Other".to_owned()]),
            ..AppDetails::default()
        };

        let a = normalizer.normalize(&first);
        let b = normalizer.normalize(&second);

        assert_eq!((a.developer_ref, a.publisher_ref), (0, 0));
        assert_eq!((b.developer_ref, b.publisher_ref), (1, 0));
        assert_eq!(normalizer.developers().len(), 2);
        assert_eq!(normalizer.publishers().len(), 1);
    }
}
