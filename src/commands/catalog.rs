use std::collections::HashMap;
use std::path::Path;

use crate::app::AppContext;
use crate::commands::CommandResult;
use crate::db::queries::{CatalogReads, CatalogStats, ClaimQueries};
use crate::models::{Claim, PublisherCounts, PublisherFiles};

pub fn fetch_all_files(ctx: &AppContext) -> CommandResult<Vec<Claim>> {
    Ok(ctx.database()?.fetch_all()?)
}

pub fn fetch_downloaded_files(ctx: &AppContext) -> CommandResult<Vec<Claim>> {
    Ok(ctx.database()?.fetch_downloaded()?)
}

pub fn fetch_new_files(ctx: &AppContext) -> CommandResult<Vec<Claim>> {
    Ok(ctx.database()?.fetch_new()?)
}

/// Rows of one publisher, or the downloaded total for `ALL`.
pub fn fetch_files_by_publisher(ctx: &AppContext, publisher: &str) -> CommandResult<PublisherFiles> {
    Ok(ctx.database()?.fetch_by_publisher(publisher)?)
}

pub fn search_files(ctx: &AppContext, term: &str) -> CommandResult<Vec<Claim>> {
    Ok(ctx.database()?.search(term)?)
}

pub fn fetch_file_by_name(ctx: &AppContext, name: &str) -> CommandResult<Option<Claim>> {
    Ok(ctx.database()?.fetch_by_name(name)?)
}

pub fn fetch_file_by_path(ctx: &AppContext, path: &str) -> CommandResult<Option<Claim>> {
    Ok(ctx.database()?.fetch_by_path(path)?)
}

pub fn check_file_statuses(ctx: &AppContext, names: &[String]) -> CommandResult<HashMap<String, bool>> {
    Ok(ctx.database()?.file_statuses(names)?)
}

pub fn publisher_counts(ctx: &AppContext) -> CommandResult<Vec<PublisherCounts>> {
    Ok(ctx.database()?.publisher_counts()?)
}

pub fn mark_file_as_not_new(ctx: &AppContext, claim_id: &str) -> CommandResult<usize> {
    Ok(ctx.database()?.mark_seen(claim_id)?)
}

pub fn delete_file(ctx: &AppContext, path: &str) -> CommandResult<usize> {
    Ok(ctx.library()?.delete_downloaded_file(Path::new(path))?)
}

pub fn reset_downloads(ctx: &AppContext) -> CommandResult<usize> {
    Ok(ctx.library()?.reset_downloads()?)
}

pub fn erase_catalog(ctx: &AppContext) -> CommandResult<usize> {
    Ok(ctx.library()?.erase_catalog()?)
}
