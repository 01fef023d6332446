// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

use serde::{Deserialize, Serialize};

use super::QueryRange;

/// The query plan returned by the gateway for a query that must be executed across partitions.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPlan {
    #[serde(default)]
    pub partitioned_query_execution_info_version: u32,

    #[serde(default)]
    pub query_info: QueryInfo,

    /// The effective partition key ranges the query must visit. Empty means every range.
    #[serde(default)]
    pub query_ranges: Vec<QueryRange>,
}

/// Describes the client-side operations needed to merge single-partition results.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryInfo {
    pub distinct_type: DistinctType,
    pub top: Option<u64>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    pub order_by: Vec<SortOrder>,
    pub order_by_expressions: Vec<String>,
    pub group_by_expressions: Vec<String>,
    pub aggregates: Vec<String>,
    pub rewritten_query: String,
    pub has_select_value: bool,
}

impl QueryInfo {
    /// The bound on the number of results, from either `TOP` or `LIMIT`.
    pub fn take(&self) -> Option<u64> {
        match (self.top, self.limit) {
            (Some(top), Some(limit)) => Some(top.min(limit)),
            (top, limit) => top.or(limit),
        }
    }

    pub fn has_order_by(&self) -> bool {
        !self.order_by.is_empty()
    }

    pub fn has_aggregates(&self) -> bool {
        !self.aggregates.is_empty()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum DistinctType {
    #[default]
    None,
    Ordered,
    Unordered,
}

/// The direction of one `ORDER BY` expression.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}
