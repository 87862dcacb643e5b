use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db::queries::ClaimQueries;
use crate::db::Database;
use crate::errors::{LibraryError, Result};
use crate::models::{Claim, UpsertOutcome, ANONYMOUS_PUBLISHER, UNKNOWN_RELEASE_DATE};
use crate::services::rpc_client::{ClaimSearchPage, ResolveResult, ResolvedClaim, RpcClient};
use crate::utils::file::sanitize_folder_name;

pub const DEFAULT_LOOKUP_LIMIT: usize = 100;
pub const PAGE_SIZE: u32 = 50;
const WEB_PREFIX: &str = "https://odysee.com/";
const NATIVE_PREFIX: &str = "lbry://";
const UNKNOWN_FILE_NAME: &str = "Unknown File";

static PUBLISHER_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"lbry://(@[^/]+)").ok());

/// Remote lookups used by the importer.
#[async_trait]
pub trait ClaimDirectory: Send + Sync {
    /// `Ok(None)` when the network knows no claim at `url`.
    async fn resolve(&self, url: &str) -> Result<Option<ResolvedClaim>>;
    async fn claim_search(&self, channel_id: &str, page: u32) -> Result<Vec<ResolvedClaim>>;
}

/// The public JSON-RPC proxy of the content network.
pub struct ProxyDirectory {
    rpc: RpcClient,
}

impl ProxyDirectory {
    pub fn new(proxy_url: String) -> Self {
        Self {
            rpc: RpcClient::new(proxy_url, Duration::from_secs(30)),
        }
    }
}

#[async_trait]
impl ClaimDirectory for ProxyDirectory {
    async fn resolve(&self, url: &str) -> Result<Option<ResolvedClaim>> {
        let mut result: ResolveResult = self
            .rpc
            .call("resolve", json!({ "urls": [url] }))
            .await
            .map_err(|err| LibraryError::RemoteResolution(format!("{url}: {err}")))?;
        Ok(result
            .remove(url)
            .filter(|claim| claim.claim_id.is_some()))
    }

    async fn claim_search(&self, channel_id: &str, page: u32) -> Result<Vec<ResolvedClaim>> {
        let page: ClaimSearchPage = self
            .rpc
            .call(
                "claim_search",
                json!({
                    "channel_id": channel_id,
                    "page_size": PAGE_SIZE,
                    "page": page,
                    "order_by": ["release_time"],
                }),
            )
            .await
            .map_err(|err| {
                LibraryError::RemoteResolution(format!("channel {channel_id} page {page}: {err}"))
            })?;
        Ok(page.items)
    }
}

/// Plain-data import input: links to publisher channels and to single items.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportSource {
    pub publisher_links: Vec<String>,
    pub individual_links: Vec<String>,
}

#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub candidates: usize,
    pub new_files: usize,
    pub updated_files: usize,
    pub unchanged: usize,
    pub skipped: usize,
}

#[derive(Clone)]
pub struct MetadataImporter {
    db: Database,
    directory: Arc<dyn ClaimDirectory>,
    lookup_limit: usize,
}

impl MetadataImporter {
    pub fn new(db: Database, directory: Arc<dyn ClaimDirectory>) -> Self {
        Self {
            db,
            directory,
            lookup_limit: DEFAULT_LOOKUP_LIMIT,
        }
    }

    pub fn with_lookup_limit(mut self, limit: usize) -> Self {
        self.lookup_limit = limit.max(1);
        self
    }

    /// Resolves every link, gathers candidate claims and upserts them.
    /// Remote failures drop the affected link only; storage failures abort.
    pub async fn import(&self, source: &ImportSource) -> Result<ImportSummary> {
        let channels = self.resolve_channels(&source.publisher_links).await;
        tracing::info!(publishers = channels.len(), "publisher links resolved");

        let mut candidates = self.collect_publisher_claims(channels).await;
        candidates.extend(self.collect_individual_claims(&source.individual_links).await);

        let mut summary = ImportSummary {
            candidates: candidates.len(),
            ..ImportSummary::default()
        };
        for claim in &candidates {
            if claim.claim_id.trim().is_empty() {
                tracing::warn!(name = %claim.name, "skipping claim without a claim id");
                summary.skipped += 1;
                continue;
            }
            match self.db.upsert_claim(claim)? {
                UpsertOutcome::Inserted => summary.new_files += 1,
                UpsertOutcome::Updated => {
                    tracing::info!(claim_id = %claim.claim_id, "claim metadata changed");
                    summary.updated_files += 1;
                }
                UpsertOutcome::Unchanged => summary.unchanged += 1,
            }
        }

        tracing::info!(
            candidates = summary.candidates,
            new_files = summary.new_files,
            updated_files = summary.updated_files,
            "catalog import finished"
        );
        Ok(summary)
    }

    async fn resolve_channels(&self, links: &[String]) -> Vec<String> {
        let urls: Vec<String> = links.iter().filter_map(|link| convert_to_lbry_url(link)).collect();
        stream::iter(urls)
            .map(|url| {
                let directory = self.directory.clone();
                async move {
                    match directory.resolve(&url).await {
                        Ok(Some(resolved)) => resolved.claim_id,
                        Ok(None) => {
                            tracing::warn!(url = %url, "resolve returned no claim id");
                            None
                        }
                        Err(err) => {
                            tracing::warn!(url = %url, "resolve failed: {err}");
                            None
                        }
                    }
                }
            })
            .buffer_unordered(self.lookup_limit)
            .filter_map(|claim_id| async move { claim_id })
            .collect()
            .await
    }

    async fn collect_publisher_claims(&self, channels: Vec<String>) -> Vec<Claim> {
        let pages: Vec<Vec<Claim>> = stream::iter(channels)
            .map(|channel_id| {
                let directory = self.directory.clone();
                async move { fetch_publisher_claims(directory.as_ref(), &channel_id).await }
            })
            .buffer_unordered(self.lookup_limit)
            .collect()
            .await;
        pages.into_iter().flatten().collect()
    }

    async fn collect_individual_claims(&self, links: &[String]) -> Vec<Claim> {
        let urls: Vec<String> = links.iter().filter_map(|link| convert_to_lbry_url(link)).collect();
        stream::iter(urls)
            .map(|url| {
                let directory = self.directory.clone();
                async move {
                    match directory.resolve(&url).await {
                        Ok(Some(resolved)) => Some(claim_from_resolved(&resolved)),
                        Ok(None) => {
                            tracing::warn!(url = %url, "no metadata found");
                            None
                        }
                        Err(err) => {
                            tracing::warn!(url = %url, "metadata lookup failed: {err}");
                            None
                        }
                    }
                }
            })
            .buffer_unordered(self.lookup_limit)
            .filter_map(|claim| async move { claim })
            .collect()
            .await
    }
}

/// Pages through a channel until an empty page. Zero-size items are dropped.
async fn fetch_publisher_claims(directory: &dyn ClaimDirectory, channel_id: &str) -> Vec<Claim> {
    let mut claims = Vec::new();
    let mut page = 1;
    loop {
        let items = match directory.claim_search(channel_id, page).await {
            Ok(items) => items,
            Err(err) => {
                tracing::warn!(channel_id, page, "claim_search failed: {err}");
                break;
            }
        };
        if items.is_empty() {
            break;
        }
        claims.extend(
            items
                .iter()
                .filter_map(|item| claim_from_listing(item, channel_id)),
        );
        page += 1;
    }
    claims
}

/// Maps a `claim_search` item. `None` for zero-size placeholders.
pub fn claim_from_listing(item: &ResolvedClaim, channel_id: &str) -> Option<Claim> {
    let size = item.value.size();
    if size == 0 {
        return None;
    }
    let name = item.value.title.clone().unwrap_or_default();
    let mut claim = build_claim(item, name, size);
    claim.publisher_id = Some(channel_id.to_string());
    Some(claim)
}

/// Maps a `resolve` result for a standalone item.
pub fn claim_from_resolved(item: &ResolvedClaim) -> Claim {
    let name = item
        .value
        .title
        .clone()
        .filter(|title| !title.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_FILE_NAME.to_string());
    build_claim(item, name, item.value.size())
}

fn build_claim(item: &ResolvedClaim, name: String, size: u64) -> Claim {
    let canonical = item.canonical_url.clone().unwrap_or_default();
    let source = item.value.source.clone().unwrap_or_default();
    Claim {
        claim_id: item.claim_id.clone().unwrap_or_default(),
        alt_name: sanitize_folder_name(&name),
        name,
        url: item.permanent_url.clone().unwrap_or_default(),
        alt_url: Some(canonical.clone()).filter(|value| !value.is_empty()),
        size: i64::try_from(size).unwrap_or(i64::MAX),
        publisher: extract_publisher(&canonical),
        publisher_id: None,
        release_date: format_release_date(item.value.release_time()),
        media_type: source.media_type.unwrap_or_default(),
        description: item.value.description.clone().unwrap_or_default(),
        thumbnail_url: item
            .value
            .thumbnail
            .as_ref()
            .and_then(|thumbnail| thumbnail.url.clone())
            .unwrap_or_default(),
        download_name: source.name.unwrap_or_default(),
        downloaded: false,
        is_new: false,
        file_path: None,
    }
}

/// `https://odysee.com/...` becomes `lbry://...`; anything else is not ours.
pub fn convert_to_lbry_url(link: &str) -> Option<String> {
    link.trim()
        .strip_prefix(WEB_PREFIX)
        .filter(|rest| !rest.is_empty())
        .map(|rest| format!("{NATIVE_PREFIX}{rest}"))
}

/// Publisher segment of a canonical URL with `#` normalized to `_`.
pub fn extract_publisher(canonical_url: &str) -> String {
    PUBLISHER_PATTERN
        .as_ref()
        .and_then(|pattern| pattern.captures(canonical_url))
        .and_then(|captures| captures.get(1))
        .map(|segment| segment.as_str().replace('#', "_"))
        .unwrap_or_else(|| ANONYMOUS_PUBLISHER.to_string())
}

pub fn format_release_date(release_time: Option<i64>) -> String {
    release_time
        .filter(|secs| *secs > 0)
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(|date| date.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| UNKNOWN_RELEASE_DATE.to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use serde_json::Value;

    use super::*;
    use crate::db::queries::CatalogReads;
    use crate::db::test_support::temp_database;
    use crate::services::rpc_client::{ClaimSource, ClaimValue};

    #[derive(Default)]
    struct MockDirectory {
        resolved: HashMap<String, ResolvedClaim>,
        failing: Vec<String>,
        channels: HashMap<String, Vec<ResolvedClaim>>,
        searches: Mutex<Vec<(String, u32)>>,
    }

    #[async_trait]
    impl ClaimDirectory for MockDirectory {
        async fn resolve(&self, url: &str) -> Result<Option<ResolvedClaim>> {
            if self.failing.iter().any(|failing| failing == url) {
                return Err(LibraryError::Http("HTTP 502 from resolve".to_string()));
            }
            Ok(self.resolved.get(url).cloned())
        }

        async fn claim_search(&self, channel_id: &str, page: u32) -> Result<Vec<ResolvedClaim>> {
            self.searches
                .lock()
                .unwrap()
                .push((channel_id.to_string(), page));
            // One page of content per channel.
            if page > 1 {
                return Ok(Vec::new());
            }
            Ok(self.channels.get(channel_id).cloned().unwrap_or_default())
        }
    }

    fn channel(claim_id: &str) -> ResolvedClaim {
        ResolvedClaim {
            claim_id: Some(claim_id.to_string()),
            ..ResolvedClaim::default()
        }
    }

    fn item(claim_id: &str, publisher: &str, title: &str, size: u64) -> ResolvedClaim {
        ResolvedClaim {
            claim_id: Some(claim_id.to_string()),
            permanent_url: Some(format!("lbry://{title}#{claim_id}")),
            canonical_url: Some(format!("lbry://{publisher}/{title}#1")),
            value: ClaimValue {
                title: Some(title.to_string()),
                description: Some(format!("{title} description")),
                release_time: Some(Value::String("1700000000".to_string())),
                source: Some(ClaimSource {
                    size: Some(Value::String(size.to_string())),
                    media_type: Some("application/zip".to_string()),
                    name: Some(format!("{title}.zip")),
                }),
                thumbnail: None,
            },
        }
    }

    fn three_publishers() -> MockDirectory {
        let mut directory = MockDirectory::default();
        for (link, id) in [("@alpha:a", "chan-a"), ("@beta:b", "chan-b"), ("@gamma:c", "chan-c")] {
            directory
                .resolved
                .insert(format!("lbry://{link}"), channel(id));
        }
        directory.channels.insert(
            "chan-a".to_string(),
            vec![
                item("a1", "@alpha#a", "First", 100),
                item("a2", "@alpha#a", "Second", 200),
                item("a3", "@alpha#a", "Placeholder", 0),
            ],
        );
        directory
    }

    fn publisher_source() -> ImportSource {
        ImportSource {
            publisher_links: vec![
                "https://odysee.com/@alpha:a".to_string(),
                "https://odysee.com/@beta:b".to_string(),
                "https://odysee.com/@gamma:c".to_string(),
                "https://example.com/not-a-channel".to_string(),
            ],
            individual_links: Vec::new(),
        }
    }

    #[tokio::test]
    async fn publisher_import_skips_zero_size_items() {
        let (db, _dir) = temp_database("import");
        let directory = Arc::new(three_publishers());
        let importer = MetadataImporter::new(db.clone(), directory.clone());

        let summary = importer.import(&publisher_source()).await.unwrap();
        assert_eq!(summary.new_files, 2);
        assert_eq!(summary.updated_files, 0);
        assert_eq!(summary.candidates, 2);

        let rows = db.fetch_all().unwrap();
        assert_eq!(rows.len(), 2);
        let first = rows.iter().find(|row| row.claim_id == "a1").unwrap();
        assert_eq!(first.publisher, "@alpha_a");
        assert_eq!(first.publisher_id.as_deref(), Some("chan-a"));
        assert_eq!(first.release_date, "2023-11-14");
        assert!(first.is_new);

        // Each channel is paged until its first empty page.
        let searches = directory.searches.lock().unwrap();
        assert_eq!(searches.iter().filter(|(id, _)| id == "chan-a").count(), 2);
        assert_eq!(searches.iter().filter(|(id, _)| id == "chan-b").count(), 1);
    }

    #[tokio::test]
    async fn reimport_counts_only_changes() {
        let (db, _dir) = temp_database("reimport");
        let importer = MetadataImporter::new(db.clone(), Arc::new(three_publishers()));
        importer.import(&publisher_source()).await.unwrap();

        let second = importer.import(&publisher_source()).await.unwrap();
        assert_eq!(second.new_files, 0);
        assert_eq!(second.updated_files, 0);
        assert_eq!(second.unchanged, 2);

        let mut changed = three_publishers();
        changed.channels.insert(
            "chan-a".to_string(),
            vec![
                item("a1", "@alpha#a", "First", 150),
                item("a2", "@alpha#a", "Second", 200),
            ],
        );
        let third = MetadataImporter::new(db.clone(), Arc::new(changed))
            .import(&publisher_source())
            .await
            .unwrap();
        assert_eq!(third.updated_files, 1);
        assert_eq!(third.unchanged, 1);
    }

    #[tokio::test]
    async fn individual_links_resolve_directly_and_failures_are_dropped() {
        let (db, _dir) = temp_database("individual");
        let mut directory = MockDirectory::default();
        directory.resolved.insert(
            "lbry://solo-game#9".to_string(),
            item("solo", "@maker#9", "Solo Game", 0),
        );
        directory.failing.push("lbry://broken".to_string());

        let source = ImportSource {
            publisher_links: vec!["https://odysee.com/broken".to_string()],
            individual_links: vec![
                "https://odysee.com/solo-game#9".to_string(),
                "https://odysee.com/broken".to_string(),
                "https://odysee.com/missing".to_string(),
            ],
        };
        let summary = MetadataImporter::new(db.clone(), Arc::new(directory))
            .with_lookup_limit(2)
            .import(&source)
            .await
            .unwrap();

        assert_eq!(summary.new_files, 1);
        let solo = db.fetch_by_id("solo").unwrap().unwrap();
        assert_eq!(solo.publisher, "@maker_9");
        assert_eq!(solo.download_name, "Solo Game.zip");
    }

    #[test]
    fn candidates_without_claim_id_are_skipped() {
        let claim = claim_from_resolved(&ResolvedClaim::default());
        assert!(claim.claim_id.is_empty());
        assert_eq!(claim.name, "Unknown File");
        assert_eq!(claim.publisher, ANONYMOUS_PUBLISHER);
        assert_eq!(claim.release_date, UNKNOWN_RELEASE_DATE);
    }

    #[test]
    fn link_conversion_and_publisher_extraction() {
        assert_eq!(
            convert_to_lbry_url("https://odysee.com/@dev:1/game:2").as_deref(),
            Some("lbry://@dev:1/game:2")
        );
        assert_eq!(convert_to_lbry_url("https://youtube.com/watch"), None);
        assert_eq!(extract_publisher("lbry://@Some#Dev/thing#1"), "@Some_Dev");
        assert_eq!(extract_publisher("lbry://thing#1"), ANONYMOUS_PUBLISHER);
        assert_eq!(extract_publisher(""), ANONYMOUS_PUBLISHER);
        assert_eq!(format_release_date(Some(0)), UNKNOWN_RELEASE_DATE);
        assert_eq!(format_release_date(Some(86_400)), "1970-01-02");
    }
}
