use anyhow::Result;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::model::CONTEST;
use crate::store;

pub fn run(args: StatusArgs) -> Result<()> {
    let db_path = args.db_path();

    if !db_path.exists() {
        warn!(path = %db_path.display(), "database file missing");
        return Ok(());
    }

    let connection = store::connect_read_only(&db_path)?;

    let rankings = store::count_rows(&connection, "SELECT COUNT(*) FROM rankings")?;
    let regions = store::count_rows(&connection, "SELECT COUNT(*) FROM regions")?;
    info!(path = %db_path.display(), rankings, regions, "database status");

    let mut statement = connection.prepare(
        "SELECT year, COUNT(*) FROM rankings WHERE contest = ?1 GROUP BY year ORDER BY year",
    )?;
    let mut rows = statement.query([CONTEST])?;
    while let Some(row) = rows.next()? {
        let year: u32 = row.get(0)?;
        let count: i64 = row.get(1)?;
        info!(year, rows = count, "scraped year");
    }

    let mut statement = connection.prepare("SELECT key, value FROM metadata ORDER BY key")?;
    let mut rows = statement.query([])?;
    while let Some(row) = rows.next()? {
        let key: String = row.get(0)?;
        let value: String = row.get(1)?;
        info!(key = %key, value = %value, "metadata");
    }

    Ok(())
}
