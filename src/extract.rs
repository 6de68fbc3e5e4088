use anyhow::{Result, anyhow};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::model::{CONTEST, RankingRecord, RegionMapping};

/// Ranking tables carry id "medal" (top-tier award winners) or "rank" (the
/// full list); both contribute records. The region table carries id "region".
const RANKING_TABLES_SELECTOR: &str = "table#medal, table#rank";
const REGION_TABLE_SELECTOR: &str = "table#region";
const ROW_SELECTOR: &str = "tr";
const CELL_SELECTOR: &str = "td, th";

/// Number of positional fields in a ranking row: rank, university, score,
/// penalty. Extra trailing cells (a "last solved" timestamp on some years)
/// are dropped; missing trailing cells (no penalty before 2011) pad as None.
const RANKING_FIELD_COUNT: usize = 4;

/// Walks every ranking table and yields one record per data row, in document
/// order. Pure over the parsed tree; position counters feed logging only.
pub fn extract_rankings(doc: &Html, year: u32) -> Result<Vec<RankingRecord>> {
    let table_selector = parse_selector(RANKING_TABLES_SELECTOR)?;
    let row_selector = parse_selector(ROW_SELECTOR)?;
    let cell_selector = parse_selector(CELL_SELECTOR)?;

    let mut records = Vec::new();

    for (table_index, table) in doc.select(&table_selector).enumerate() {
        let mut row_count = 0_usize;

        for (row_index, row) in table.select(&row_selector).enumerate() {
            let fields: Vec<String> = row
                .select(&cell_selector)
                .filter_map(|cell| {
                    let text = direct_text(cell);
                    (!text.is_empty()).then_some(text)
                })
                .collect();

            // Header and separator rows wrap their text in further markup
            // and end up with no direct-text cells at all.
            if fields.is_empty() {
                continue;
            }

            let Some(record) = normalize_row(fields, year) else {
                debug!(year, table = table_index, row = row_index, "row lacks a university cell, skipped");
                continue;
            };

            records.push(record);
            row_count += 1;
        }

        debug!(year, table = table_index, rows = row_count, "extracted ranking table");
    }

    Ok(records)
}

/// Reads the region table into (region, university) pairs. The first row is
/// a header and is skipped outright. Zero matching tables means the year
/// simply has no region data; that is not an error.
pub fn extract_regions(doc: &Html) -> Result<Vec<RegionMapping>> {
    let table_selector = parse_selector(REGION_TABLE_SELECTOR)?;
    let row_selector = parse_selector(ROW_SELECTOR)?;
    let cell_selector = parse_selector(CELL_SELECTOR)?;

    let mut mappings = Vec::new();

    for table in doc.select(&table_selector) {
        for (row_index, row) in table.select(&row_selector).enumerate().skip(1) {
            let mut cells = row.select(&cell_selector);
            let region = cells.next().map(direct_text);
            let university = cells.next().map(direct_text);

            match (region, university) {
                (Some(region), Some(university))
                    if !region.is_empty() && !university.is_empty() =>
                {
                    mappings.push(RegionMapping { region, university });
                }
                _ => {
                    debug!(row = row_index, "region row missing a cell, skipped");
                }
            }
        }
    }

    Ok(mappings)
}

/// Truncates or pads a row's text fields to the fixed record shape. Rows
/// with a single field cannot name a university and yield None.
fn normalize_row(mut fields: Vec<String>, year: u32) -> Option<RankingRecord> {
    if fields.len() < 2 {
        return None;
    }

    fields.truncate(RANKING_FIELD_COUNT);

    let mut fields = fields.into_iter();
    let rank = fields.next();
    let university = fields.next()?;

    Some(RankingRecord {
        contest: CONTEST.to_string(),
        year,
        rank,
        university,
        score: fields.next(),
        penalty: fields.next(),
    })
}

/// Concatenated text of the element's immediate text-node children, trimmed.
/// Text buried in nested markup does not count, which is what drops header
/// cells like `<td><b>Rank</b></td>`.
fn direct_text(element: ElementRef<'_>) -> String {
    let mut text = String::new();
    for child in element.children() {
        if let Some(fragment) = child.value().as_text() {
            text.push_str(fragment);
        }
    }
    text.trim().to_string()
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|err| anyhow!("invalid selector '{selector}': {err}"))
}
