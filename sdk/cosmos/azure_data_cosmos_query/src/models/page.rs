// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde_json::Value;

use crate::ErrorKind;

/// A single page of results returned by one request to one partition.
///
/// Produced by a [`PageFetcher`](crate::PageFetcher).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Page {
    /// The items in the page, as returned by the service.
    pub items: Vec<Value>,

    /// The continuation to send to fetch the next page, or `None` if the partition is exhausted.
    pub continuation: Option<String>,

    /// The request charge, in request units, of the request that produced this page.
    pub request_charge: f64,

    /// The activity ID of the request that produced this page.
    pub activity_id: Option<String>,

    /// Query execution metrics reported by the service, if requested.
    pub query_metrics: Option<QueryMetrics>,
}

impl Page {
    /// Creates a page with the provided items and continuation, and no charge.
    pub fn new(items: Vec<Value>, continuation: Option<String>) -> Self {
        Self {
            items,
            continuation,
            ..Default::default()
        }
    }

    /// Sets the request charge of this page.
    pub fn with_request_charge(mut self, request_charge: f64) -> Self {
        self.request_charge = request_charge;
        self
    }

    /// Sets the activity ID of this page.
    pub fn with_activity_id(mut self, activity_id: impl Into<String>) -> Self {
        self.activity_id = Some(activity_id.into());
        self
    }

    /// Sets the query metrics of this page.
    pub fn with_query_metrics(mut self, query_metrics: QueryMetrics) -> Self {
        self.query_metrics = Some(query_metrics);
        self
    }
}

/// Query execution metrics, as reported in the `x-ms-documentdb-query-metrics` header.
///
/// The service reports metrics as a `;`-separated list of `name=value` pairs.
/// Metrics from several responses are combined by summing values with the same name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryMetrics {
    values: BTreeMap<String, f64>,
}

impl QueryMetrics {
    /// Gets the value of a single metric.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    /// Iterates over all metrics, in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Adds every metric in `other` to this set.
    pub fn accumulate(&mut self, other: &QueryMetrics) {
        for (name, value) in &other.values {
            *self.values.entry(name.clone()).or_insert(0.0) += value;
        }
    }
}

impl FromStr for QueryMetrics {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut values = BTreeMap::new();
        for pair in s.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (name, value) = pair.split_once('=').ok_or_else(|| {
                ErrorKind::Serialization.with_message(format!("malformed query metric: '{}'", pair))
            })?;
            let value: f64 = value.trim().parse().map_err(|_| {
                ErrorKind::Serialization
                    .with_message(format!("invalid value for query metric '{}'", name))
            })?;
            *values.entry(name.trim().to_string()).or_insert(0.0) += value;
        }
        Ok(Self { values })
    }
}

impl fmt::Display for QueryMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in &self.values {
            if !first {
                f.write_str(";")?;
            }
            write!(f, "{}={}", name, value)?;
            first = false;
        }
        Ok(())
    }
}

/// Folds optional metrics into an optional accumulator.
pub(crate) fn accumulate_metrics(target: &mut Option<QueryMetrics>, metrics: Option<&QueryMetrics>) {
    if let Some(metrics) = metrics {
        target
            .get_or_insert_with(QueryMetrics::default)
            .accumulate(metrics);
    }
}
