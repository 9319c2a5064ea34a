//! Table rendering for `print`.

use executor::RelationRows;
use tabled::{builder::Builder, settings::Style};
use types::Value;

/// Render a relation as a bordered table, one row per live tuple.
pub fn render_rows(rows: &RelationRows) -> String {
    if rows.rows.is_empty() {
        return format!("{} | 0 rows", rows.columns.join(" | "));
    }
    let mut builder = Builder::default();
    builder.push_record(rows.columns.iter().cloned());
    for row in &rows.rows {
        builder.push_record(row.iter().map(format_value));
    }
    let mut table = builder.build();
    table.with(Style::modern());
    format!("{table}\n{} rows", rows.rows.len())
}

fn format_value(value: &Value) -> String {
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendering_includes_headers_and_counts() {
        let rows = RelationRows {
            columns: vec!["id".into(), "name".into()],
            rows: vec![
                vec![Value::Int(1), Value::Str("ada".into())],
                vec![Value::Int(2), Value::Str("grace".into())],
            ],
        };
        let out = render_rows(&rows);
        assert!(out.contains("id"));
        assert!(out.contains("grace"));
        assert!(out.contains("2 rows"));
    }

    #[test]
    fn empty_relations_render_header_only() {
        let rows = RelationRows {
            columns: vec!["x".into()],
            rows: vec![],
        };
        assert_eq!(render_rows(&rows), "x | 0 rows");
    }
}
