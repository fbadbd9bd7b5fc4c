//! Layout of the per-chain `<chain>_block_metrics` table.
use tokio_postgres::types::Type;

use crate::ColumnDef;

/// Suffix appended to the chain name to form the parent table name.
pub const TABLE_SUFFIX: &str = "_block_metrics";

/// Columns in insert and copy order.
pub const BLOCK_METRICS_COLUMNS: &[ColumnDef] = &[
    ColumnDef { name: "block_number", ty: Type::INT8 },
    ColumnDef { name: "block_time", ty: Type::TIMESTAMPTZ },
    ColumnDef { name: "transactions_count", ty: Type::INT4 },
    ColumnDef { name: "block_size_bytes", ty: Type::INT8 },
    ColumnDef { name: "gas_limit", ty: Type::INT8 },
    ColumnDef { name: "gas_used", ty: Type::INT8 },
    ColumnDef { name: "block_fullness", ty: Type::FLOAT8 },
    ColumnDef { name: "block_author", ty: Type::TEXT },
    ColumnDef { name: "gas_min", ty: Type::FLOAT8 },
    ColumnDef { name: "gas_max", ty: Type::FLOAT8 },
    ColumnDef { name: "gas_avg", ty: Type::FLOAT8 },
    ColumnDef { name: "gas_stddev", ty: Type::FLOAT8 },
    ColumnDef { name: "gas_all_prices", ty: Type::FLOAT8_ARRAY },
    ColumnDef { name: "block_timestamp", ty: Type::INT8 },
];

/// Parent table name for `chain`.
pub fn table_name(chain: &str) -> String {
    format!("{chain}{TABLE_SUFFIX}")
}

/// Returns `true` if `name` can be interpolated into sql as a bare identifier.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_lowercase() || c == '_') &&
        chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') &&
        name.len() <= 48
}

/// `CREATE TABLE` statement for the partitioned parent table.
pub fn create_table_sql(table: &str) -> String {
    let columns = BLOCK_METRICS_COLUMNS
        .iter()
        .map(|column| format!("{} {} NOT NULL", column.name, sql_type(&column.ty)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE IF NOT EXISTS {table} ({columns}) PARTITION BY RANGE (block_time)")
}

/// Parameterized single-row `INSERT` statement.
pub fn insert_sql(table: &str) -> String {
    let placeholders =
        (1..=BLOCK_METRICS_COLUMNS.len()).map(|i| format!("${i}")).collect::<Vec<_>>().join(", ");
    format!("INSERT INTO {table} ({}) VALUES ({placeholders})", column_list())
}

/// Comma separated column names.
pub fn column_list() -> String {
    BLOCK_METRICS_COLUMNS.iter().map(|column| column.name).collect::<Vec<_>>().join(", ")
}

/// Collapse a statement to a single line for logging.
pub fn one_line(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn sql_type(ty: &Type) -> &'static str {
    [
        (Type::INT8, "BIGINT"),
        (Type::INT4, "INTEGER"),
        (Type::FLOAT8, "DOUBLE PRECISION"),
        (Type::FLOAT8_ARRAY, "DOUBLE PRECISION[]"),
        (Type::TIMESTAMPTZ, "TIMESTAMPTZ"),
    ]
    .into_iter()
    .find_map(|(known, name)| (known == *ty).then_some(name))
    .unwrap_or("TEXT")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_layout_has_fourteen_columns() {
        assert_eq!(BLOCK_METRICS_COLUMNS.len(), 14);
        assert_eq!(BLOCK_METRICS_COLUMNS[0].name, "block_number");
        assert_eq!(BLOCK_METRICS_COLUMNS[13].name, "block_timestamp");
    }

    #[test]
    fn insert_binds_every_column() {
        let sql = insert_sql("ethereum_block_metrics");
        assert!(sql.starts_with("INSERT INTO ethereum_block_metrics (block_number, block_time,"));
        assert!(sql.ends_with("$13, $14)"));
    }

    #[test]
    fn parent_table_is_range_partitioned() {
        let sql = create_table_sql("base_block_metrics");
        assert!(sql.contains("gas_all_prices DOUBLE PRECISION[] NOT NULL"));
        assert!(sql.contains("block_author TEXT NOT NULL"));
        assert!(sql.ends_with("PARTITION BY RANGE (block_time)"));
    }

    #[test]
    fn identifiers_are_restricted() {
        assert!(is_valid_identifier("polygon_block_metrics"));
        assert!(!is_valid_identifier("Polygon"));
        assert!(!is_valid_identifier("1chain"));
        assert!(!is_valid_identifier("eth; drop table x"));
        assert!(!is_valid_identifier(""));
    }

    #[test]
    fn one_line_collapses_whitespace() {
        assert_eq!(one_line("INSERT INTO t\n\t(a,\n b)  VALUES ($1)"), "INSERT INTO t (a, b) VALUES ($1)");
    }
}
