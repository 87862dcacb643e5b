use std::collections::{HashMap, HashSet};

use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use crate::db::Database;
use crate::errors::Result;
use crate::models::{
    Claim, ClaimKey, PublisherCounts, PublisherFiles, PublisherSummary, UpsertOutcome,
    ALL_PUBLISHERS,
};

const CLAIM_COLUMNS: &str = "File_Name, Alt_File_Name, File_Claim_ID, File_URL, Alt_File_URL, \
     File_Size, Dev_Name, Dev_Claim_ID, Release_Date, Media_Type, Description, Thumbnail_URL, \
     File_Download_Name, Downloaded, New, File_Path";

pub trait ClaimQueries {
    fn ensure_schema(&self) -> Result<()>;
    fn upsert_claim(&self, claim: &Claim) -> Result<UpsertOutcome>;
    fn mark_downloaded(&self, key: &ClaimKey, path: &str) -> Result<usize>;
    fn mark_downloaded_by_id(&self, claim_id: &str, path: &str) -> Result<usize>;
    fn clear_download(&self, path: &str) -> Result<usize>;
    fn mark_seen(&self, claim_id: &str) -> Result<usize>;
    fn reset_downloads(&self) -> Result<usize>;
    fn erase_catalog(&self) -> Result<usize>;
}

pub trait CatalogReads {
    fn fetch_all(&self) -> Result<Vec<Claim>>;
    fn fetch_downloaded(&self) -> Result<Vec<Claim>>;
    fn fetch_new(&self) -> Result<Vec<Claim>>;
    fn fetch_by_id(&self, claim_id: &str) -> Result<Option<Claim>>;
    fn fetch_by_publisher(&self, publisher: &str) -> Result<PublisherFiles>;
    fn fetch_by_path(&self, path: &str) -> Result<Option<Claim>>;
    fn fetch_by_name(&self, name: &str) -> Result<Option<Claim>>;
    fn fetch_by_download_name(&self, download_name: &str) -> Result<Option<Claim>>;
    fn search(&self, term: &str) -> Result<Vec<Claim>>;
    fn file_statuses(&self, names: &[String]) -> Result<HashMap<String, bool>>;
    fn download_names(&self) -> Result<HashSet<String>>;
}

pub trait CatalogStats {
    fn publisher_counts(&self) -> Result<Vec<PublisherCounts>>;
    fn publishers(&self) -> Result<Vec<PublisherSummary>>;
    fn downloaded_counts(&self, publishers: &[String]) -> Result<HashMap<String, i64>>;
    fn downloaded_count(&self) -> Result<i64>;
    fn downloaded_count_for(&self, publisher: &str) -> Result<i64>;
    fn new_count_for(&self, publisher: &str) -> Result<i64>;
}

impl ClaimQueries for Database {
    fn ensure_schema(&self) -> Result<()> {
        self.run_migrations()
    }

    fn upsert_claim(&self, claim: &Claim) -> Result<UpsertOutcome> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;

        let stored = tx
            .query_row(
                "SELECT File_Size, Release_Date, Description FROM Claims WHERE File_Claim_ID = ?1",
                params![claim.claim_id],
                |row| {
                    Ok((
                        row.get::<_, Option<i64>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?;

        let outcome = match stored {
            None => {
                tx.execute(
                    "INSERT INTO Claims (File_Name, Alt_File_Name, File_Claim_ID, File_URL, \
                     Alt_File_URL, File_Size, Dev_Name, Dev_Claim_ID, Release_Date, Media_Type, \
                     Description, Thumbnail_URL, File_Download_Name, Downloaded, New, File_Path) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 0, 1, NULL)",
                    params![
                        claim.name,
                        claim.alt_name,
                        claim.claim_id,
                        claim.url,
                        claim.alt_url,
                        claim.size,
                        claim.publisher,
                        claim.publisher_id,
                        claim.release_date,
                        claim.media_type,
                        claim.description,
                        claim.thumbnail_url,
                        claim.download_name,
                    ],
                )?;
                UpsertOutcome::Inserted
            }
            Some((size, release_date, description)) => {
                let changed = size != Some(claim.size)
                    || release_date.unwrap_or_default() != claim.release_date
                    || description.unwrap_or_default() != claim.description;
                if changed {
                    tx.execute(
                        "UPDATE Claims SET File_Size = ?1, Release_Date = ?2, Description = ?3, New = 1 \
                         WHERE File_Claim_ID = ?4",
                        params![claim.size, claim.release_date, claim.description, claim.claim_id],
                    )?;
                    UpsertOutcome::Updated
                } else {
                    UpsertOutcome::Unchanged
                }
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    fn mark_downloaded(&self, key: &ClaimKey, path: &str) -> Result<usize> {
        let conn = self.connection()?;
        let rows = match key {
            ClaimKey::Id(claim_id) => conn.execute(
                "UPDATE Claims SET Downloaded = 1, File_Path = ?1 WHERE File_Claim_ID = ?2",
                params![path, claim_id],
            )?,
            ClaimKey::Name(name) => conn.execute(
                "UPDATE Claims SET Downloaded = 1, File_Path = ?1 WHERE File_Name = ?2",
                params![path, name],
            )?,
        };
        Ok(rows)
    }

    fn mark_downloaded_by_id(&self, claim_id: &str, path: &str) -> Result<usize> {
        self.mark_downloaded(&ClaimKey::Id(claim_id.to_string()), path)
    }

    fn clear_download(&self, path: &str) -> Result<usize> {
        let conn = self.connection()?;
        let rows = conn.execute(
            "UPDATE Claims SET Downloaded = 0, File_Path = NULL WHERE File_Path = ?1",
            params![path],
        )?;
        Ok(rows)
    }

    fn mark_seen(&self, claim_id: &str) -> Result<usize> {
        let conn = self.connection()?;
        let rows = conn.execute(
            "UPDATE Claims SET New = 0 WHERE File_Claim_ID = ?1",
            params![claim_id],
        )?;
        Ok(rows)
    }

    fn reset_downloads(&self) -> Result<usize> {
        let conn = self.connection()?;
        let rows = conn.execute("UPDATE Claims SET Downloaded = 0, File_Path = NULL", [])?;
        Ok(rows)
    }

    fn erase_catalog(&self) -> Result<usize> {
        let conn = self.connection()?;
        let rows = conn.execute("DELETE FROM Claims", [])?;
        Ok(rows)
    }
}

impl CatalogReads for Database {
    fn fetch_all(&self) -> Result<Vec<Claim>> {
        self.select_claims("1 = 1 ORDER BY File_Name COLLATE NOCASE", params![])
    }

    fn fetch_downloaded(&self) -> Result<Vec<Claim>> {
        self.select_claims("Downloaded = 1 ORDER BY File_Name COLLATE NOCASE", params![])
    }

    fn fetch_new(&self) -> Result<Vec<Claim>> {
        self.select_claims("New = 1 ORDER BY File_Name COLLATE NOCASE", params![])
    }

    fn fetch_by_id(&self, claim_id: &str) -> Result<Option<Claim>> {
        self.select_one("File_Claim_ID = ?1", claim_id)
    }

    fn fetch_by_publisher(&self, publisher: &str) -> Result<PublisherFiles> {
        if publisher == ALL_PUBLISHERS {
            return Ok(PublisherFiles::DownloadedCount(self.downloaded_count()?));
        }
        let rows = self.select_claims(
            "Dev_Name = ?1 ORDER BY File_Name COLLATE NOCASE",
            params![publisher],
        )?;
        Ok(PublisherFiles::Rows(rows))
    }

    fn fetch_by_path(&self, path: &str) -> Result<Option<Claim>> {
        self.select_one("File_Path = ?1", path)
    }

    fn fetch_by_name(&self, name: &str) -> Result<Option<Claim>> {
        self.select_one("File_Name = ?1 COLLATE NOCASE", name)
    }

    fn fetch_by_download_name(&self, download_name: &str) -> Result<Option<Claim>> {
        self.select_one("File_Download_Name = ?1", download_name)
    }

    fn search(&self, term: &str) -> Result<Vec<Claim>> {
        let pattern = format!("%{}%", escape_like(&term.to_lowercase()));
        self.select_claims(
            "lower(File_Name) LIKE ?1 ESCAPE '\\' OR lower(Description) LIKE ?1 ESCAPE '\\' \
             ORDER BY File_Name COLLATE NOCASE",
            params![pattern],
        )
    }

    fn file_statuses(&self, names: &[String]) -> Result<HashMap<String, bool>> {
        if names.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self.connection()?;
        let placeholders = vec!["?"; names.len()].join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT File_Name, Downloaded FROM Claims WHERE File_Name IN ({placeholders})"
        ))?;
        let rows = stmt.query_map(params_from_iter(names.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<i64>>(1)?.unwrap_or(0) == 1,
            ))
        })?;
        let mut statuses = HashMap::new();
        for row in rows {
            let (name, downloaded) = row?;
            // Duplicate names count as downloaded if any copy is.
            let entry = statuses.entry(name).or_insert(false);
            *entry = *entry || downloaded;
        }
        Ok(statuses)
    }

    fn download_names(&self) -> Result<HashSet<String>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT File_Download_Name FROM Claims \
             WHERE File_Download_Name IS NOT NULL AND File_Download_Name != ''",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut names = HashSet::new();
        for row in rows {
            names.insert(row?);
        }
        Ok(names)
    }
}

impl CatalogStats for Database {
    fn publisher_counts(&self) -> Result<Vec<PublisherCounts>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT Dev_Name, \
                    COALESCE(SUM(CASE WHEN Downloaded = 1 THEN 1 ELSE 0 END), 0), \
                    COALESCE(SUM(CASE WHEN New = 1 THEN 1 ELSE 0 END), 0), \
                    COUNT(*) \
             FROM Claims GROUP BY Dev_Name ORDER BY Dev_Name COLLATE NOCASE",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(PublisherCounts {
                publisher: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                downloaded: row.get(1)?,
                new: row.get(2)?,
                total: row.get(3)?,
            })
        })?;
        let mut counts = Vec::new();
        for row in rows {
            counts.push(row?);
        }
        Ok(counts)
    }

    fn publishers(&self) -> Result<Vec<PublisherSummary>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT Dev_Name, COUNT(*) FROM Claims \
             GROUP BY Dev_Name ORDER BY Dev_Name COLLATE NOCASE",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(PublisherSummary {
                publisher: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                total_files: row.get(1)?,
            })
        })?;
        let mut publishers = Vec::new();
        for row in rows {
            publishers.push(row?);
        }
        Ok(publishers)
    }

    fn downloaded_counts(&self, publishers: &[String]) -> Result<HashMap<String, i64>> {
        let mut counts = HashMap::with_capacity(publishers.len());
        for publisher in publishers {
            counts.insert(publisher.clone(), self.downloaded_count_for(publisher)?);
        }
        Ok(counts)
    }

    fn downloaded_count(&self) -> Result<i64> {
        let conn = self.connection()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM Claims WHERE Downloaded = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn downloaded_count_for(&self, publisher: &str) -> Result<i64> {
        if publisher == ALL_PUBLISHERS {
            return self.downloaded_count();
        }
        let conn = self.connection()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM Claims WHERE Downloaded = 1 AND Dev_Name = ?1",
            params![publisher],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn new_count_for(&self, publisher: &str) -> Result<i64> {
        let conn = self.connection()?;
        let count = if publisher == ALL_PUBLISHERS {
            conn.query_row("SELECT COUNT(*) FROM Claims WHERE New = 1", [], |row| {
                row.get(0)
            })?
        } else {
            conn.query_row(
                "SELECT COUNT(*) FROM Claims WHERE New = 1 AND Dev_Name = ?1",
                params![publisher],
                |row| row.get(0),
            )?
        };
        Ok(count)
    }
}

impl Database {
    fn select_claims(&self, clause: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Claim>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&format!("SELECT {CLAIM_COLUMNS} FROM Claims WHERE {clause}"))?;
        let rows = stmt.query_map(params, claim_from_row)?;
        let mut claims = Vec::new();
        for row in rows {
            claims.push(row?);
        }
        Ok(claims)
    }

    fn select_one(&self, clause: &str, value: &str) -> Result<Option<Claim>> {
        let conn = self.connection()?;
        let claim = conn
            .query_row(
                &format!("SELECT {CLAIM_COLUMNS} FROM Claims WHERE {clause} LIMIT 1"),
                params![value],
                claim_from_row,
            )
            .optional()?;
        Ok(claim)
    }
}

fn claim_from_row(row: &Row<'_>) -> rusqlite::Result<Claim> {
    Ok(Claim {
        name: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
        alt_name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        claim_id: row.get(2)?,
        url: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        alt_url: row.get(4)?,
        size: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
        publisher: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        publisher_id: row.get(7)?,
        release_date: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
        media_type: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
        description: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
        thumbnail_url: row.get::<_, Option<String>>(11)?.unwrap_or_default(),
        download_name: row.get::<_, Option<String>>(12)?.unwrap_or_default(),
        downloaded: row.get::<_, Option<i64>>(13)?.unwrap_or(0) == 1,
        is_new: row.get::<_, Option<i64>>(14)?.unwrap_or(0) == 1,
        file_path: row.get(15)?,
    })
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
