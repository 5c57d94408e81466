use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};

/// Aggregation strategy of a billable metric. Stored as an integer enum at
/// the source; the discriminant gap at 4 is inherited from the source table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum AggregationType {
    Count,
    Sum,
    Max,
    UniqueCount,
    WeightedSum,
    Latest,
    Custom,
}

impl AggregationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationType::Count => "count",
            AggregationType::Sum => "sum",
            AggregationType::Max => "max",
            AggregationType::UniqueCount => "unique_count",
            AggregationType::WeightedSum => "weighted_sum",
            AggregationType::Latest => "latest",
            AggregationType::Custom => "custom",
        }
    }
}

impl From<AggregationType> for i32 {
    fn from(aggregation_type: AggregationType) -> i32 {
        match aggregation_type {
            AggregationType::Count => 0,
            AggregationType::Sum => 1,
            AggregationType::Max => 2,
            AggregationType::UniqueCount => 3,
            AggregationType::WeightedSum => 5,
            AggregationType::Latest => 6,
            AggregationType::Custom => 7,
        }
    }
}

impl TryFrom<i32> for AggregationType {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AggregationType::Count),
            1 => Ok(AggregationType::Sum),
            2 => Ok(AggregationType::Max),
            3 => Ok(AggregationType::UniqueCount),
            5 => Ok(AggregationType::WeightedSum),
            6 => Ok(AggregationType::Latest),
            7 => Ok(AggregationType::Custom),
            other => Err(format!("unknown aggregation type: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillableMetric {
    pub id: String,
    pub organization_id: String,
    pub code: String,
    pub aggregation_type: AggregationType,
    #[serde(default)]
    pub field_name: Option<String>,
    #[serde(default)]
    pub expression: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillableMetricFilter {
    pub id: String,
    pub organization_id: String,
    pub billable_metric_id: String,
    pub key: String,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Charge {
    pub id: String,
    pub organization_id: String,
    pub plan_id: String,
    pub billable_metric_id: String,
    #[serde(default)]
    pub pay_in_advance: bool,
    #[serde(default)]
    pub pricing_group_keys: Vec<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeFilter {
    pub id: String,
    pub organization_id: String,
    pub charge_id: String,
    #[serde(default)]
    pub pricing_group_keys: Vec<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeFilterValue {
    pub id: String,
    pub organization_id: String,
    pub charge_filter_id: String,
    pub billable_metric_filter_id: String,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A terminated subscription is treated as deleted: the enrichment pipeline
/// only resolves active subscriptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub organization_id: String,
    pub external_id: String,
    pub plan_id: String,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub terminated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

// The snapshot selects `properties->'pricing_group_keys'`, a JSONB string
// list or SQL NULL.
fn json_string_list(row: &PgRow, column: &str) -> Result<Vec<String>, sqlx::Error> {
    let raw: Option<serde_json::Value> = row.try_get(column)?;
    match raw {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value).map_err(|e| sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: Box::new(e),
        }),
    }
}

impl FromRow<'_, PgRow> for BillableMetric {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let aggregation_type: i32 = row.try_get("aggregation_type")?;
        Ok(Self {
            id: row.try_get("id")?,
            organization_id: row.try_get("organization_id")?,
            code: row.try_get("code")?,
            aggregation_type: AggregationType::try_from(aggregation_type).map_err(|e| {
                sqlx::Error::ColumnDecode {
                    index: "aggregation_type".to_string(),
                    source: e.into(),
                }
            })?,
            field_name: row.try_get("field_name")?,
            expression: row.try_get("expression")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }
}

impl FromRow<'_, PgRow> for BillableMetricFilter {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            organization_id: row.try_get("organization_id")?,
            billable_metric_id: row.try_get("billable_metric_id")?,
            key: row.try_get("key")?,
            values: row
                .try_get::<Option<Vec<String>>, _>("values")?
                .unwrap_or_default(),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }
}

impl FromRow<'_, PgRow> for Charge {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            organization_id: row.try_get("organization_id")?,
            plan_id: row.try_get("plan_id")?,
            billable_metric_id: row.try_get("billable_metric_id")?,
            pay_in_advance: row.try_get("pay_in_advance")?,
            pricing_group_keys: json_string_list(row, "pricing_group_keys")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }
}

impl FromRow<'_, PgRow> for ChargeFilter {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            organization_id: row.try_get("organization_id")?,
            charge_id: row.try_get("charge_id")?,
            pricing_group_keys: json_string_list(row, "pricing_group_keys")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }
}

impl FromRow<'_, PgRow> for ChargeFilterValue {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            organization_id: row.try_get("organization_id")?,
            charge_filter_id: row.try_get("charge_filter_id")?,
            billable_metric_filter_id: row.try_get("billable_metric_filter_id")?,
            values: row
                .try_get::<Option<Vec<String>>, _>("values")?
                .unwrap_or_default(),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }
}

impl FromRow<'_, PgRow> for Subscription {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            organization_id: row.try_get("organization_id")?,
            external_id: row.try_get("external_id")?,
            plan_id: row.try_get("plan_id")?,
            started_at: row.try_get("started_at")?,
            terminated_at: row.try_get("terminated_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}
