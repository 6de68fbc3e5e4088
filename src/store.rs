use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags, params};

use crate::model::{CONTEST, RankingRecord, RegionMapping};
use crate::util::now_utc_string;

const DB_SCHEMA_VERSION: &str = "0.1.0";

/// Opens the store, creating the schema if needed. Dry runs get an
/// in-memory database so every mutation, including `--clear`, evaporates
/// when the connection closes.
pub fn connect(path: &Path, dry_run: bool) -> Result<Connection> {
    if dry_run {
        let connection =
            Connection::open_in_memory().context("failed to open in-memory store")?;
        ensure_schema(&connection)?;
        return Ok(connection);
    }

    if let Some(parent) = path.parent() {
        crate::util::ensure_directory(parent)?;
    }

    let connection =
        Connection::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    configure_connection(&connection)?;
    ensure_schema(&connection)?;
    Ok(connection)
}

/// Read-only handle for the query surface; fails if the store is missing.
pub fn connect_read_only(path: &Path) -> Result<Connection> {
    Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("failed to open {} (scrape first?)", path.display()))
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS metadata (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS rankings (
              contest TEXT NOT NULL,
              year INTEGER NOT NULL,
              rank TEXT,
              univ TEXT NOT NULL,
              score TEXT,
              penalty TEXT,
              PRIMARY KEY (contest, year, univ)
            );

            CREATE TABLE IF NOT EXISTS regions (
              univ TEXT PRIMARY KEY,
              region TEXT NOT NULL
            );

            CREATE VIEW IF NOT EXISTS icpc AS
              SELECT r.year, r.rank, r.univ, g.region, r.score, r.penalty
              FROM rankings r
              LEFT JOIN regions g ON g.univ = r.univ
              WHERE r.contest = 'icpc';
            ",
        )
        .context("failed to initialize store schema")?;

    Ok(())
}

/// Plain inserts; the primary key on (contest, year, univ) makes the first
/// duplicate row fail, which [`is_integrity_conflict`] recognizes as "year
/// already scraped". Callers run this inside a savepoint so the partial
/// batch never commits.
pub fn insert_rankings(connection: &Connection, records: &[RankingRecord]) -> Result<usize> {
    let mut statement = connection.prepare(
        "INSERT INTO rankings(contest, year, rank, univ, score, penalty)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
    )?;

    for record in records {
        statement
            .execute(params![
                record.contest,
                record.year,
                record.rank,
                record.university,
                record.score,
                record.penalty
            ])
            .with_context(|| {
                format!(
                    "failed to insert ranking row for {} {}",
                    record.year, record.university
                )
            })?;
    }

    Ok(records.len())
}

/// True when the error chain bottoms out in a sqlite uniqueness violation.
pub fn is_integrity_conflict(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<rusqlite::Error>(),
        Some(rusqlite::Error::SqliteFailure(inner, _))
            if inner.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Page-extracted mappings never displace an existing one. Returns whether
/// a row was actually written.
pub fn insert_region_if_absent(
    connection: &Connection,
    mapping: &RegionMapping,
) -> Result<bool> {
    let changed = connection
        .execute(
            "INSERT INTO regions(univ, region) VALUES(?1, ?2)
             ON CONFLICT(univ) DO NOTHING",
            params![mapping.university, mapping.region],
        )
        .with_context(|| format!("failed to insert region mapping for {}", mapping.university))?;

    Ok(changed > 0)
}

/// Operator-supplied overrides replace whatever was scraped.
pub fn upsert_region(connection: &Connection, mapping: &RegionMapping) -> Result<()> {
    connection
        .execute(
            "INSERT INTO regions(univ, region) VALUES(?1, ?2)
             ON CONFLICT(univ) DO UPDATE SET region=excluded.region",
            params![mapping.university, mapping.region],
        )
        .with_context(|| format!("failed to apply region override for {}", mapping.university))?;

    Ok(())
}

/// Removes every ranking row for the contest and all region mappings.
/// Only ever runs on an explicit `--clear`.
pub fn clear(connection: &Connection) -> Result<(usize, usize)> {
    let rankings = connection
        .execute("DELETE FROM rankings WHERE contest = ?1", params![CONTEST])
        .context("failed to clear rankings")?;
    let regions = connection
        .execute("DELETE FROM regions", [])
        .context("failed to clear regions")?;

    Ok((rankings, regions))
}

pub fn touch_metadata(connection: &Connection) -> Result<()> {
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [DB_SCHEMA_VERSION],
    )?;
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_updated_at', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [now_utc_string()],
    )?;

    Ok(())
}

pub fn count_rows(connection: &Connection, sql: &str) -> Result<i64> {
    let count = connection
        .query_row(sql, [], |row| row.get(0))
        .with_context(|| format!("failed to count rows: {sql}"))?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_records(year: u32) -> Vec<RankingRecord> {
        vec![
            RankingRecord {
                contest: CONTEST.to_string(),
                year,
                rank: Some("1".to_string()),
                university: "Acme University".to_string(),
                score: Some("9".to_string()),
                penalty: Some("840".to_string()),
            },
            RankingRecord {
                contest: CONTEST.to_string(),
                year,
                rank: Some("2".to_string()),
                university: "Zenith Institute".to_string(),
                score: Some("8".to_string()),
                penalty: None,
            },
        ]
    }

    fn memory_store() -> Connection {
        connect(Path::new("unused"), true).unwrap()
    }

    #[test]
    fn duplicate_year_load_is_a_recognizable_conflict() {
        let conn = memory_store();
        let records = sample_records(2009);

        insert_rankings(&conn, &records).unwrap();
        let err = insert_rankings(&conn, &records).unwrap_err();

        assert!(is_integrity_conflict(&err));
        let count = count_rows(&conn, "SELECT COUNT(*) FROM rankings").unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn unrelated_errors_are_not_conflicts() {
        let conn = memory_store();
        let err = count_rows(&conn, "SELECT COUNT(*) FROM missing_table").unwrap_err();
        assert!(!is_integrity_conflict(&err));
    }

    #[test]
    fn savepoint_rollback_leaves_no_partial_year() {
        let mut conn = memory_store();
        let mut tx = conn.transaction().unwrap();

        {
            let sp = tx.savepoint().unwrap();
            insert_rankings(&sp, &sample_records(2010)).unwrap();
            // Dropped without commit: the year's rows roll back.
        }

        let count = count_rows(&tx, "SELECT COUNT(*) FROM rankings").unwrap();
        assert_eq!(count, 0);

        {
            let sp = tx.savepoint().unwrap();
            insert_rankings(&sp, &sample_records(2010)).unwrap();
            sp.commit().unwrap();
        }
        tx.commit().unwrap();

        let count = count_rows(&conn, "SELECT COUNT(*) FROM rankings").unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn scraped_mappings_never_displace_existing_ones() {
        let conn = memory_store();
        let original = RegionMapping {
            region: "Europe".to_string(),
            university: "ETH Zurich".to_string(),
        };
        let rescrape = RegionMapping {
            region: "North America".to_string(),
            university: "ETH Zurich".to_string(),
        };

        assert!(insert_region_if_absent(&conn, &original).unwrap());
        assert!(!insert_region_if_absent(&conn, &rescrape).unwrap());

        let region: String = conn
            .query_row(
                "SELECT region FROM regions WHERE univ = 'ETH Zurich'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(region, "Europe");
    }

    #[test]
    fn override_applied_twice_leaves_exactly_one_mapping() {
        let conn = memory_store();
        let scraped = RegionMapping {
            region: "Europe".to_string(),
            university: "ETH Zurich".to_string(),
        };
        let override_mapping = RegionMapping {
            region: "EMEA".to_string(),
            university: "ETH Zurich".to_string(),
        };

        insert_region_if_absent(&conn, &scraped).unwrap();
        upsert_region(&conn, &override_mapping).unwrap();
        upsert_region(&conn, &override_mapping).unwrap();

        let count = count_rows(
            &conn,
            "SELECT COUNT(*) FROM regions WHERE univ = 'ETH Zurich'",
        )
        .unwrap();
        assert_eq!(count, 1);

        let region: String = conn
            .query_row(
                "SELECT region FROM regions WHERE univ = 'ETH Zurich'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(region, "EMEA");
    }

    #[test]
    fn clear_removes_rankings_and_regions() {
        let conn = memory_store();
        insert_rankings(&conn, &sample_records(2008)).unwrap();
        insert_region_if_absent(
            &conn,
            &RegionMapping {
                region: "Europe".to_string(),
                university: "Acme University".to_string(),
            },
        )
        .unwrap();

        let (rankings, regions) = clear(&conn).unwrap();
        assert_eq!(rankings, 2);
        assert_eq!(regions, 1);
        assert_eq!(count_rows(&conn, "SELECT COUNT(*) FROM rankings").unwrap(), 0);
        assert_eq!(count_rows(&conn, "SELECT COUNT(*) FROM regions").unwrap(), 0);
    }

    #[test]
    fn view_recomputes_after_late_region_insert() {
        let conn = memory_store();
        insert_rankings(&conn, &sample_records(2011)).unwrap();

        let region: Option<String> = conn
            .query_row(
                "SELECT region FROM icpc WHERE univ = 'Acme University'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(region, None);

        insert_region_if_absent(
            &conn,
            &RegionMapping {
                region: "Latin America".to_string(),
                university: "Acme University".to_string(),
            },
        )
        .unwrap();

        let region: Option<String> = conn
            .query_row(
                "SELECT region FROM icpc WHERE univ = 'Acme University'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(region.as_deref(), Some("Latin America"));
    }

    #[test]
    fn dry_run_store_never_touches_the_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("icpc.sqlite");

        let conn = connect(&db_path, true).unwrap();
        insert_rankings(&conn, &sample_records(2013)).unwrap();
        clear(&conn).unwrap();

        assert!(!db_path.exists());
    }
}
