//! Per-user aggregation of metric value lists.

use regex::Regex;
use std::sync::LazyLock;

use crate::model::metric::ROW_COUNT_COLUMN;
use crate::model::Aggregation;

/// One comparison of an aggregate filter, e.g. `>=10`.
static COMPARISON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(=|!=|<=|>=|<|>)(\d+(?:\.\d+)?)$").unwrap());

impl Aggregation {
    /// Collapse a non-empty value list.
    pub fn apply(&self, values: &[f64]) -> f64 {
        match self {
            Aggregation::Sum => values.iter().sum(),
            Aggregation::Count => values.len() as f64,
            Aggregation::CountDistinct => {
                let mut bits: Vec<u64> = values.iter().map(|v| v.to_bits()).collect();
                bits.sort_unstable();
                bits.dedup();
                bits.len() as f64
            }
            Aggregation::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Aggregation::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Aggregation::Avg => values.iter().sum::<f64>() / values.len() as f64,
            Aggregation::Median => {
                let mut sorted = values.to_vec();
                sorted.sort_by(|a, b| a.total_cmp(b));
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                }
            }
        }
    }

    /// Name of the helper function in the generated script.
    pub fn script_expression(&self) -> &'static str {
        match self {
            Aggregation::Sum => "sum(values)",
            Aggregation::Count => "values.length",
            Aggregation::CountDistinct => "countDistinct(values)",
            Aggregation::Min => "min(values)",
            Aggregation::Max => "max(values)",
            Aggregation::Avg => "avg(values)",
            Aggregation::Median => "median(values)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CompareOp {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "=" => CompareOp::Eq,
            "!=" => CompareOp::Ne,
            "<" => CompareOp::Lt,
            "<=" => CompareOp::Lte,
            ">" => CompareOp::Gt,
            ">=" => CompareOp::Gte,
            _ => return None,
        })
    }

    pub fn as_script(&self) -> &'static str {
        match self {
            CompareOp::Eq => "===",
            CompareOp::Ne => "!==",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    pub op: CompareOp,
    pub value: f64,
}

impl Comparison {
    pub fn holds(&self, lhs: f64) -> bool {
        match self.op {
            CompareOp::Eq => lhs == self.value,
            CompareOp::Ne => lhs != self.value,
            CompareOp::Lt => lhs < self.value,
            CompareOp::Lte => lhs <= self.value,
            CompareOp::Gt => lhs > self.value,
            CompareOp::Gte => lhs >= self.value,
        }
    }
}

/// Parse an aggregate filter: comma-separated comparisons, whitespace ignored.
///
/// On failure returns the offending part.
pub fn parse_comparisons(filter: &str) -> Result<Vec<Comparison>, String> {
    let compact: String = filter.chars().filter(|c| !c.is_whitespace()).collect();
    compact
        .split(',')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let caps = COMPARISON.captures(part).ok_or_else(|| part.to_string())?;
            let op = CompareOp::parse(&caps[1]).ok_or_else(|| part.to_string())?;
            let value = caps[2].parse().map_err(|_| part.to_string())?;
            Ok(Comparison { op, value })
        })
        .collect()
}

/// What the aggregate filter compares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterColumn {
    /// Number of matching events.
    RowCount,
    /// Sum of a numeric column.
    Column(String),
}

/// Post-aggregation predicate deciding whether a user converts.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateFilter {
    pub column: FilterColumn,
    pub comparisons: Vec<Comparison>,
}

impl AggregateFilter {
    /// Build from the two column-ref fields, ignoring invalid comparisons.
    pub fn from_parts(column: &str, filter: &str) -> Option<Self> {
        let compact: String = filter.chars().filter(|c| !c.is_whitespace()).collect();
        let comparisons: Vec<Comparison> = compact
            .split(',')
            .filter_map(|part| parse_comparisons(part).ok())
            .flatten()
            .collect();
        if comparisons.is_empty() {
            return None;
        }
        let column = if column == ROW_COUNT_COLUMN {
            FilterColumn::RowCount
        } else {
            FilterColumn::Column(column.to_string())
        };
        Some(Self { column, comparisons })
    }

    /// Whether a user's values pass every comparison.
    pub fn passes(&self, values: &[f64]) -> bool {
        let observed = match self.column {
            FilterColumn::RowCount => values.len() as f64,
            FilterColumn::Column(_) => values.iter().sum(),
        };
        self.comparisons.iter().all(|c| c.holds(observed))
    }
}
