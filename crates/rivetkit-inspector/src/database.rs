//! Optional database schema/rows view (§4.8, [ADDED] per SPEC_FULL §4.8), implemented against a
//! narrow `DatabaseDriver` trait. The KV-backed SQLite VFS format itself is out of scope, this
//! is only the interface an embedder's driver would satisfy, exercised here with a mock.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::InspectorError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSchema {
	pub name: String,
	pub type_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
	pub name: String,
	pub columns: Vec<ColumnSchema>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSchema {
	pub tables: Vec<TableSchema>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRows {
	pub columns: Vec<String>,
	pub rows: Vec<Vec<serde_json::Value>>,
	pub truncated: bool,
}

#[async_trait]
pub trait DatabaseDriver: Send + Sync {
	async fn schema(&self) -> Result<DatabaseSchema, InspectorError>;

	async fn table_rows(
		&self,
		table: &str,
		limit: usize,
		offset: usize,
	) -> Result<TableRows, InspectorError>;
}

#[cfg(test)]
pub(crate) mod mock {
	use super::*;

	pub struct MockDatabaseDriver;

	#[async_trait]
	impl DatabaseDriver for MockDatabaseDriver {
		async fn schema(&self) -> Result<DatabaseSchema, InspectorError> {
			Ok(DatabaseSchema {
				tables: vec![TableSchema {
					name: "kv".into(),
					columns: vec![
						ColumnSchema {
							name: "key".into(),
							type_name: "TEXT".into(),
						},
						ColumnSchema {
							name: "value".into(),
							type_name: "BLOB".into(),
						},
					],
				}],
			})
		}

		async fn table_rows(
			&self,
			table: &str,
			limit: usize,
			_offset: usize,
		) -> Result<TableRows, InspectorError> {
			if table != "kv" {
				return Err(InspectorError::UnknownTable(table.to_string()));
			}
			let rows: Vec<Vec<serde_json::Value>> = (0..5)
				.map(|i| vec![serde_json::json!(format!("k{i}")), serde_json::json!(i)])
				.take(limit)
				.collect();
			let truncated = rows.len() < 5;
			Ok(TableRows {
				columns: vec!["key".into(), "value".into()],
				rows,
				truncated,
			})
		}
	}
}

#[cfg(test)]
mod tests {
	use super::mock::MockDatabaseDriver;
	use super::*;

	#[tokio::test]
	async fn schema_lists_tables_and_columns() {
		let schema = MockDatabaseDriver.schema().await.unwrap();
		assert_eq!(schema.tables[0].name, "kv");
		assert_eq!(schema.tables[0].columns.len(), 2);
	}

	#[tokio::test]
	async fn unknown_table_is_rejected() {
		let err = MockDatabaseDriver.table_rows("nope", 10, 0).await.unwrap_err();
		assert!(matches!(err, InspectorError::UnknownTable(_)));
	}

	#[tokio::test]
	async fn row_preview_respects_the_limit() {
		let rows = MockDatabaseDriver.table_rows("kv", 2, 0).await.unwrap();
		assert_eq!(rows.rows.len(), 2);
		assert!(rows.truncated);
	}
}
