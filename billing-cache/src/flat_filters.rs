use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::EntityCache;
use crate::errors::CacheError;
use crate::types::BillableMetricFilter;

/// Reserved value meaning "every value ever defined for this dimension",
/// not a literal value to match.
pub const ALL_FILTER_VALUES: &str = "__ALL_FILTER_VALUES__";

pub type FlatFilterValues = HashMap<String, Vec<String>>;

/// Event property map, as carried by the enrichment pipeline.
pub type EventProperties = serde_json::Map<String, Value>;

/// One concrete (charge, charge-filter) combination, flattened for
/// event-time matching without further joins. `filters == None` is the
/// charge's no-filter default. Built fresh per resolution call, never
/// cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatFilter {
    pub organization_id: String,
    pub billable_metric_code: String,
    pub plan_id: String,
    pub charge_id: String,
    pub charge_updated_at: DateTime<Utc>,
    pub charge_filter_id: Option<String>,
    pub charge_filter_updated_at: Option<DateTime<Utc>>,
    pub filters: Option<FlatFilterValues>,
    pub pricing_group_keys: Vec<String>,
    pub pay_in_advance: bool,
}

impl FlatFilter {
    /// True when every constrained key has a matching event property. A
    /// record without constraints (no map, or an empty one) matches any
    /// event.
    pub fn matches(&self, properties: &EventProperties) -> bool {
        let Some(filters) = &self.filters else {
            return true;
        };

        filters.iter().all(|(key, values)| {
            properties
                .get(key)
                .and_then(render_property)
                .is_some_and(|value| values.contains(&value))
        })
    }

    /// Number of constrained keys; the specificity rank used by
    /// [`matching_filter`].
    pub fn specificity(&self) -> usize {
        self.filters.as_ref().map_or(0, HashMap::len)
    }

    /// The charge-default view of this record: charge identity and
    /// pay-in-advance kept, charge-filter identity and constraints cleared.
    pub fn to_default(&self) -> FlatFilter {
        FlatFilter {
            charge_filter_id: None,
            charge_filter_updated_at: None,
            filters: None,
            ..self.clone()
        }
    }
}

// Properties arrive as arbitrary JSON; filter values are strings. Null is
// treated as an absent property.
fn render_property(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl EntityCache {
    /// Reconstruct, purely from cached entities, every flat filter candidate
    /// for one (organization, metric, plan) tuple. This replaces the
    /// multi-table join the primary database would otherwise run per event.
    ///
    /// An unresolvable metric, or any failed fetch, aborts the whole call: a
    /// partial answer here would silently mischarge events. The one
    /// exception is a charge-filter value whose billable-metric filter is
    /// gone; that row is skipped, since the dimension no longer exists.
    pub async fn build_flat_filters(
        &self,
        organization_id: &str,
        billable_metric_code: &str,
        plan_id: &str,
    ) -> Result<Vec<FlatFilter>, CacheError> {
        let metric = self
            .billable_metric(organization_id, billable_metric_code)
            .await?;

        let metric_filters = self
            .search_billable_metric_filters(organization_id, &metric.id)
            .await?;
        let filters_by_id: HashMap<&str, &BillableMetricFilter> = metric_filters
            .iter()
            .map(|filter| (filter.id.as_str(), filter))
            .collect();

        let charges = self
            .search_charges(organization_id, plan_id, &metric.id)
            .await?;

        let mut flat_filters = Vec::new();
        for charge in &charges {
            let charge_filters = self
                .search_charge_filters(organization_id, &charge.id)
                .await?;

            if charge_filters.is_empty() {
                flat_filters.push(FlatFilter {
                    organization_id: organization_id.to_string(),
                    billable_metric_code: billable_metric_code.to_string(),
                    plan_id: plan_id.to_string(),
                    charge_id: charge.id.clone(),
                    charge_updated_at: charge.updated_at,
                    charge_filter_id: None,
                    charge_filter_updated_at: None,
                    filters: None,
                    pricing_group_keys: charge.pricing_group_keys.clone(),
                    pay_in_advance: charge.pay_in_advance,
                });
                continue;
            }

            for charge_filter in &charge_filters {
                let value_rows = self
                    .search_charge_filter_values(organization_id, &charge_filter.id)
                    .await?;

                let mut filters = FlatFilterValues::new();
                for value_row in &value_rows {
                    let Some(metric_filter) =
                        filters_by_id.get(value_row.billable_metric_filter_id.as_str())
                    else {
                        continue;
                    };

                    let values = if value_row.values == [ALL_FILTER_VALUES] {
                        metric_filter.values.clone()
                    } else {
                        value_row.values.clone()
                    };
                    filters.insert(metric_filter.key.clone(), values);
                }

                flat_filters.push(FlatFilter {
                    organization_id: organization_id.to_string(),
                    billable_metric_code: billable_metric_code.to_string(),
                    plan_id: plan_id.to_string(),
                    charge_id: charge.id.clone(),
                    charge_updated_at: charge.updated_at,
                    charge_filter_id: Some(charge_filter.id.clone()),
                    charge_filter_updated_at: Some(charge_filter.updated_at),
                    filters: Some(filters),
                    pricing_group_keys: charge_filter.pricing_group_keys.clone(),
                    pay_in_advance: charge.pay_in_advance,
                });
            }
        }

        Ok(flat_filters)
    }
}

/// Candidates grouped by charge id, the shape [`matching_filter`] consumes.
pub fn group_by_charge(filters: Vec<FlatFilter>) -> HashMap<String, Vec<FlatFilter>> {
    let mut groups: HashMap<String, Vec<FlatFilter>> = HashMap::new();
    for filter in filters {
        groups.entry(filter.charge_id.clone()).or_default().push(filter);
    }
    groups
}

/// Select the single best match among one charge's flat filters.
///
/// Filtered candidates that match are ranked by specificity (most
/// constrained keys wins; ties keep the earliest candidate, the order is
/// undefined by business rules). When none match, the charge still resolves
/// to its default view. `None` only for an empty candidate slice.
pub fn matching_filter(
    candidates: &[FlatFilter],
    properties: &EventProperties,
) -> Option<FlatFilter> {
    let mut best: Option<&FlatFilter> = None;
    for candidate in candidates.iter().filter(|c| c.filters.is_some()) {
        if !candidate.matches(properties) {
            continue;
        }
        if best.map_or(true, |current| candidate.specificity() > current.specificity()) {
            best = Some(candidate);
        }
    }

    if let Some(found) = best {
        return Some(found.clone());
    }

    if let Some(default) = candidates.iter().find(|c| c.filters.is_none()) {
        return Some(default.clone());
    }

    candidates.first().map(FlatFilter::to_default)
}
