//! AnalyticalBrain adapter (§4.2).

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BrainError;
use crate::packet::{AnalyticalData, TableData};

use super::{Ack, Health};

/// A single filter clause applied to a `StructuredQuery` (equality only —
/// range/comparison operators are out of scope for the reference store).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryFilter {
    pub field: String,
    pub equals: Value,
}

/// A query against the structured store, §4.2's `Query()` operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructuredQuery {
    pub packet_id: Option<String>,
    pub table_name: Option<String>,
    pub filters: Vec<QueryFilter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRow {
    pub packet_id: String,
    pub fields: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultSet {
    pub rows: Vec<ResultRow>,
}

#[async_trait]
pub trait AnalyticalBrain: Send + Sync {
    async fn upsert_structured(
        &self,
        packet_id: &str,
        fields: &HashMap<String, Value>,
    ) -> Result<Ack, BrainError>;

    async fn upsert_table(&self, packet_id: &str, table: &TableData) -> Result<Ack, BrainError>;

    async fn query(&self, query: &StructuredQuery) -> Result<ResultSet, BrainError>;

    async fn health(&self) -> Health;
}

struct Record {
    table_name: Option<String>,
    fields: HashMap<String, Value>,
}

/// In-memory AnalyticalBrain standing in for the externally owned
/// analytical store (data warehouse / OLAP engine), §1 Non-goals.
pub struct InMemoryAnalyticalBrain {
    records: DashMap<String, Record>,
    fault: Mutex<Option<BrainError>>,
}

impl Default for InMemoryAnalyticalBrain {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAnalyticalBrain {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            fault: Mutex::new(None),
        }
    }

    pub fn inject_fault(&self, fault: Option<BrainError>) {
        *self.fault.lock() = fault;
    }

    fn take_fault(&self) -> Option<BrainError> {
        self.fault.lock().clone()
    }

    fn merge_fields(&self, packet_id: &str, table_name: Option<String>, fields: HashMap<String, Value>) {
        self.records
            .entry(packet_id.to_string())
            .and_modify(|r| {
                r.fields.extend(fields.clone());
                if table_name.is_some() {
                    r.table_name = table_name.clone();
                }
            })
            .or_insert(Record { table_name, fields });
    }
}

fn table_row_to_fields(table: &TableData, row: &[Value]) -> HashMap<String, Value> {
    table
        .columns
        .iter()
        .zip(row.iter())
        .map(|(col, val)| (col.clone(), val.clone()))
        .collect()
}

#[async_trait]
impl AnalyticalBrain for InMemoryAnalyticalBrain {
    async fn upsert_structured(
        &self,
        packet_id: &str,
        fields: &HashMap<String, Value>,
    ) -> Result<Ack, BrainError> {
        if let Some(fault) = self.take_fault() {
            return Err(fault);
        }
        self.merge_fields(packet_id, None, fields.clone());
        Ok(Ack)
    }

    async fn upsert_table(&self, packet_id: &str, table: &TableData) -> Result<Ack, BrainError> {
        if let Some(fault) = self.take_fault() {
            return Err(fault);
        }
        // A table is flattened into one record per packet; each row
        // contributes its cells keyed by column name, last row wins a
        // column collision (mirrors last-write-wins on the other adapters).
        for row in &table.rows {
            let fields = table_row_to_fields(table, row);
            self.merge_fields(packet_id, Some(table.table_name.clone()), fields);
        }
        Ok(Ack)
    }

    async fn query(&self, query: &StructuredQuery) -> Result<ResultSet, BrainError> {
        if let Some(fault) = self.take_fault() {
            return Err(fault);
        }
        let rows = self
            .records
            .iter()
            .filter(|entry| match &query.packet_id {
                Some(pid) => entry.key() == pid,
                None => true,
            })
            .filter(|entry| match &query.table_name {
                Some(name) => entry.value().table_name.as_deref() == Some(name.as_str()),
                None => true,
            })
            .filter(|entry| {
                query.filters.iter().all(|f| {
                    entry
                        .value()
                        .fields
                        .get(&f.field)
                        .is_some_and(|v| v == &f.equals)
                })
            })
            .map(|entry| ResultRow {
                packet_id: entry.key().clone(),
                fields: entry.value().fields.clone(),
            })
            .collect();
        Ok(ResultSet { rows })
    }

    async fn health(&self) -> Health {
        match self.take_fault() {
            Some(e) => Health::unhealthy(e.to_string()),
            None => Health::healthy(),
        }
    }
}

/// Convenience used by the Ingestion Router to write a packet's whole
/// `AnalyticalData` payload in one call (§4.1).
pub async fn upsert_analytical_data(
    brain: &dyn AnalyticalBrain,
    packet_id: &str,
    data: &AnalyticalData,
) -> Result<Ack, BrainError> {
    if !data.structured_fields.is_empty() {
        brain.upsert_structured(packet_id, &data.structured_fields).await?;
    }
    for table in &data.table_data {
        brain.upsert_table(packet_id, table).await?;
    }
    Ok(Ack)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn upsert_and_query_structured_fields() {
        let brain = InMemoryAnalyticalBrain::new();
        let mut fields = HashMap::new();
        fields.insert("status".to_string(), json!("active"));
        brain.upsert_structured("p1", &fields).await.unwrap();

        let result = brain
            .query(&StructuredQuery {
                packet_id: Some("p1".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].fields.get("status"), Some(&json!("active")));
    }

    #[tokio::test]
    async fn query_filter_excludes_non_matching_rows() {
        let brain = InMemoryAnalyticalBrain::new();
        let mut f1 = HashMap::new();
        f1.insert("status".to_string(), json!("active"));
        brain.upsert_structured("p1", &f1).await.unwrap();
        let mut f2 = HashMap::new();
        f2.insert("status".to_string(), json!("archived"));
        brain.upsert_structured("p2", &f2).await.unwrap();

        let result = brain
            .query(&StructuredQuery {
                filters: vec![QueryFilter {
                    field: "status".into(),
                    equals: json!("active"),
                }],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].packet_id, "p1");
    }

    #[tokio::test]
    async fn table_rows_flatten_into_one_record_per_packet() {
        let brain = InMemoryAnalyticalBrain::new();
        let table = TableData {
            table_name: "budgets".into(),
            columns: vec!["quarter".into(), "amount".into()],
            rows: vec![
                vec![json!("Q1"), json!(1000)],
                vec![json!("Q2"), json!(2000)],
            ],
            column_types: Vec::new(),
        };
        brain.upsert_table("p1", &table).await.unwrap();
        let result = brain
            .query(&StructuredQuery {
                packet_id: Some("p1".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].fields.get("quarter"), Some(&json!("Q2")));
    }
}
