use std::fs::File;
use std::io::{self, BufRead, BufReader};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use rusqlite::Connection;
use tracing::{error, info, warn};

use crate::cli::ScrapeArgs;
use crate::extract;
use crate::fetch::{self, FetchOptions};
use crate::model::{OverrideCounts, RegionMapping, ScrapeRunReport, YearOutcome};
use crate::store;
use crate::util::{now_utc_string, utc_compact_string, write_json_pretty};

pub fn run(args: ScrapeArgs) -> Result<()> {
    if args.years.is_empty() && args.regions_from.is_none() && !args.clear {
        warn!("nothing to do: no years, no overrides, no clear requested");
        return Ok(());
    }

    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("run-{}", utc_compact_string(started_ts));

    let db_path = args.db_path();
    let mut connection = store::connect(&db_path, args.dry_run)?;

    let fetch_options = FetchOptions {
        page_cache_dir: args.cache_pages.then(|| args.cache_root.join("pages")),
        repair: !args.no_repair,
    };

    info!(
        run_id = %run_id,
        db = %db_path.display(),
        dry_run = args.dry_run,
        years = args.years.len(),
        "starting scrape"
    );

    let mut outcomes = Vec::new();
    let mut overrides = None;

    // One transaction per invocation; each year gets its own savepoint so a
    // failure mid-year rolls back that year alone and the loop moves on.
    let mut tx = connection.transaction()?;

    if args.clear {
        let (rankings, regions) = store::clear(&tx)?;
        info!(rankings, regions, "cleared previously scraped data");
    }

    for &year in &args.years {
        let sp = tx.savepoint()?;
        match scrape_year(&sp, year, &fetch_options, args.regions) {
            Ok((rankings, regions)) => {
                sp.commit()?;
                info!(year, rankings, regions, "year scraped");
                outcomes.push(YearOutcome {
                    year,
                    status: "scraped".to_string(),
                    rankings_inserted: rankings,
                    regions_inserted: regions,
                    detail: None,
                });
            }
            Err(err) if store::is_integrity_conflict(&err) => {
                warn!(year, "already scraped, skipping");
                outcomes.push(YearOutcome {
                    year,
                    status: "already-scraped".to_string(),
                    rankings_inserted: 0,
                    regions_inserted: 0,
                    detail: None,
                });
            }
            Err(err) => {
                error!(year, error = %err, "year failed, continuing with the next");
                outcomes.push(YearOutcome {
                    year,
                    status: "failed".to_string(),
                    rankings_inserted: 0,
                    regions_inserted: 0,
                    detail: Some(format!("{err:#}")),
                });
            }
        }
    }

    if let Some(source) = &args.regions_from {
        overrides = Some(apply_region_overrides(&tx, source)?);
    }

    store::touch_metadata(&tx)?;
    tx.commit()?;

    let scraped = outcomes.iter().filter(|o| o.status == "scraped").count();
    info!(scraped, requested = args.years.len(), "scrape completed");

    if !args.dry_run {
        let report = ScrapeRunReport {
            manifest_version: 1,
            run_id: run_id.clone(),
            started_at,
            updated_at: now_utc_string(),
            db_path: db_path.display().to_string(),
            repair_enabled: !args.no_repair,
            page_cache_enabled: args.cache_pages,
            cleared_first: args.clear,
            years: outcomes,
            overrides,
        };

        let report_path = args
            .cache_root
            .join("manifests")
            .join(format!("scrape_run_{}.json", utc_compact_string(started_ts)));
        write_json_pretty(&report_path, &report)?;
        info!(path = %report_path.display(), "wrote scrape run manifest");
    }

    Ok(())
}

fn scrape_year(
    connection: &Connection,
    year: u32,
    fetch_options: &FetchOptions,
    scrape_regions: bool,
) -> Result<(usize, usize)> {
    let doc = fetch::fetch(year, fetch_options)?;

    let rankings = extract::extract_rankings(&doc, year)?;
    if rankings.is_empty() {
        bail!("no ranking rows found on the {year} page");
    }
    let inserted = store::insert_rankings(connection, &rankings)?;

    let mut regions_inserted = 0;
    if scrape_regions {
        for mapping in extract::extract_regions(&doc)? {
            if store::insert_region_if_absent(connection, &mapping)? {
                regions_inserted += 1;
            }
        }
    }

    Ok((inserted, regions_inserted))
}

/// Reads the override stream (file path or "-" for stdin) and applies each
/// well-formed line with replace semantics. Malformed lines warn with their
/// line number and are skipped; they never abort the batch.
fn apply_region_overrides(connection: &Connection, source: &str) -> Result<OverrideCounts> {
    let reader: Box<dyn BufRead> = if source == "-" {
        Box::new(io::stdin().lock())
    } else {
        let file = File::open(source)
            .with_context(|| format!("failed to open override file {source}"))?;
        Box::new(BufReader::new(file))
    };

    let mut applied = 0_usize;
    let mut skipped = 0_usize;

    for (index, line) in reader.lines().enumerate() {
        let line =
            line.with_context(|| format!("failed to read override line from {source}"))?;
        let line_number = index + 1;

        if line.trim().is_empty() {
            continue;
        }

        match parse_override_line(&line) {
            Some(mapping) => {
                store::upsert_region(connection, &mapping)?;
                applied += 1;
            }
            None => {
                warn!(source, line = line_number, "malformed override line, skipping");
                skipped += 1;
            }
        }
    }

    info!(source, applied, skipped, "applied region overrides");

    Ok(OverrideCounts {
        source: source.to_string(),
        applied,
        skipped,
    })
}

/// One override per line: region, TAB, university. Anything else counts as
/// malformed, extra fields included.
fn parse_override_line(line: &str) -> Option<RegionMapping> {
    let mut parts = line.split('\t');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(region), Some(university), None) => {
            let region = region.trim();
            let university = university.trim();
            (!region.is_empty() && !university.is_empty()).then(|| RegionMapping {
                region: region.to_string(),
                university: university.to_string(),
            })
        }
        _ => None,
    }
}
