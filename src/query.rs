use crate::db::{Database, Result};
use rusqlite::types::ValueRef;

/// Run one SQL statement and return the first column of every row as text.
/// NULL renders as an empty string, blobs as lower-case hex.
pub fn run_query(db: &Database, sql: &str) -> Result<Vec<String>> {
    let mut stmt = db.conn.prepare(sql.trim())?;
    let rows = stmt.query_map([], |row| Ok(render(row.get_ref(0)?)))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn render(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(b) => b.iter().map(|byte| format!("{byte:02x}")).collect(),
    }
}
