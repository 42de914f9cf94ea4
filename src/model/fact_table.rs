//! Fact table schemas referenced by metric definitions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Map of fact table id to schema, as fetched once per validation session.
pub type FactTableMap = HashMap<String, FactTableSchema>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnDatatype {
    Number,
    String,
    Date,
    Boolean,
    Json,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactColumn {
    pub column: String,
    pub datatype: ColumnDatatype,
}

/// A saved row filter on a fact table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactFilter {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactTableSchema {
    pub id: String,
    pub datasource: String,
    #[serde(default)]
    pub filters: Vec<FactFilter>,
    #[serde(default)]
    pub columns: Vec<FactColumn>,
}

impl FactTableSchema {
    pub fn new(id: impl Into<String>, datasource: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            datasource: datasource.into(),
            filters: Vec::new(),
            columns: Vec::new(),
        }
    }

    pub fn with_filter(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        self.filters.push(FactFilter {
            name: id.clone(),
            id,
            value: String::new(),
        });
        self
    }

    pub fn with_column(mut self, column: impl Into<String>, datatype: ColumnDatatype) -> Self {
        self.columns.push(FactColumn {
            column: column.into(),
            datatype,
        });
        self
    }

    pub fn has_filter(&self, id: &str) -> bool {
        self.filters.iter().any(|f| f.id == id)
    }

    /// Datatype of a column, if the table declares it.
    pub fn column_datatype(&self, column: &str) -> Option<ColumnDatatype> {
        self.columns
            .iter()
            .find(|c| c.column == column)
            .map(|c| c.datatype)
    }
}

/// Build a map keyed by fact table id.
pub fn fact_table_map(tables: impl IntoIterator<Item = FactTableSchema>) -> FactTableMap {
    tables.into_iter().map(|t| (t.id.clone(), t)).collect()
}
