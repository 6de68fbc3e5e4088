use std::io::{self, Write};

use anyhow::{Context, Result};
use rusqlite::types::ValueRef;
use serde_json::{Map, Number, Value};
use tracing::debug;

use crate::cli::QueryArgs;
use crate::store;

/// Runs each raw query string against the store and prints rows to stdout,
/// tab-separated by default or as a JSON array per query with `--json`.
pub fn run(args: QueryArgs) -> Result<()> {
    let connection = store::connect_read_only(&args.db_path())?;
    let mut output = io::BufWriter::new(io::stdout().lock());

    for sql in &args.queries {
        debug!(sql = %sql, "executing query");

        let mut statement = connection
            .prepare(sql)
            .with_context(|| format!("failed to prepare query: {sql}"))?;
        let column_names: Vec<String> = statement
            .column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();

        let mut rows = statement
            .query([])
            .with_context(|| format!("failed to execute query: {sql}"))?;

        if args.json {
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                let mut object = Map::new();
                for (index, name) in column_names.iter().enumerate() {
                    object.insert(name.clone(), json_value(row.get_ref(index)?));
                }
                results.push(Value::Object(object));
            }

            serde_json::to_writer_pretty(&mut output, &Value::Array(results))
                .context("failed to serialize query output")?;
            writeln!(output)?;
        } else {
            while let Some(row) = rows.next()? {
                let mut fields = Vec::with_capacity(column_names.len());
                for index in 0..column_names.len() {
                    fields.push(text_value(row.get_ref(index)?));
                }
                writeln!(output, "{}", fields.join("\t"))?;
            }
        }
    }

    output.flush()?;
    Ok(())
}

fn text_value(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(n) => n.to_string(),
        ValueRef::Real(n) => n.to_string(),
        ValueRef::Text(text) => String::from_utf8_lossy(text).into_owned(),
        ValueRef::Blob(blob) => format!("<{} byte blob>", blob.len()),
    }
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::Number(n.into()),
        ValueRef::Real(n) => Number::from_f64(n).map_or(Value::Null, Value::Number),
        ValueRef::Text(text) => Value::String(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(blob) => Value::String(format!("<{} byte blob>", blob.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_value_renders_null_as_empty() {
        assert_eq!(text_value(ValueRef::Null), "");
        assert_eq!(text_value(ValueRef::Integer(42)), "42");
        assert_eq!(
            text_value(ValueRef::Text(b"Acme University")),
            "Acme University"
        );
    }

    #[test]
    fn json_value_preserves_types() {
        assert_eq!(json_value(ValueRef::Null), Value::Null);
        assert_eq!(json_value(ValueRef::Integer(7)), Value::Number(7.into()));
        assert_eq!(
            json_value(ValueRef::Text(b"EMEA")),
            Value::String("EMEA".to_string())
        );
    }
}
