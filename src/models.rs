use serde::{Deserialize, Serialize};

/// Publisher label used when none can be derived from a claim's canonical URL.
pub const ANONYMOUS_PUBLISHER: &str = "AnonymousDevs";
pub const UNKNOWN_RELEASE_DATE: &str = "Unknown";
/// Virtual publisher grouping every claim.
pub const ALL_PUBLISHERS: &str = "ALL";

/// One cataloged content item. Column names follow the `Claims` table.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub claim_id: String,
    pub name: String,
    pub alt_name: String,
    pub url: String,
    pub alt_url: Option<String>,
    pub size: i64,
    pub publisher: String,
    pub publisher_id: Option<String>,
    pub release_date: String,
    pub media_type: String,
    pub description: String,
    pub thumbnail_url: String,
    pub download_name: String,
    pub downloaded: bool,
    pub is_new: bool,
    pub file_path: Option<String>,
}

impl Claim {
    /// URL handed to the daemon: the canonical URL when known, the permanent one otherwise.
    pub fn retrieval_url(&self) -> &str {
        self.alt_url
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(self.url.as_str())
    }
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// How a catalog row is addressed when marking it downloaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClaimKey {
    Id(String),
    Name(String),
}

/// Result of a by-publisher query; the `ALL` grouping yields a count, not rows.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum PublisherFiles {
    Rows(Vec<Claim>),
    DownloadedCount(i64),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublisherCounts {
    pub publisher: String,
    pub downloaded: i64,
    pub new: i64,
    pub total: i64,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublisherSummary {
    pub publisher: String,
    pub total_files: i64,
}
