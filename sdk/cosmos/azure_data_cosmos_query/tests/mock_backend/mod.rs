// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

//! An in-memory partitioned container, standing in for the gateway and the backend partitions.
//!
//! Items are placed in partition key ranges by comparing their `partitionKey` with the range
//! bounds, so tests pick partition keys such as "A", "C" or "N" to choose where items live. As in
//! the service, "FF" is the end of the key space and sorts after every other key.
//! Continuations are the JSON-encoded position of the last returned item, which keeps them
//! valid for any range that replaces the one they were issued by.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use azure_data_cosmos_query::{
    models::{Page, PartitionKeyRange, QueryInfo, QueryPlan, QueryRange, SortOrder},
    Error, ErrorKind, PageFetcher, PageRequest, PartitionKeyRangeResolver, Query, QueryServices,
    RequestTarget,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Clone, Deserialize, Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MockItem {
    pub id: String,
    pub partition_key: String,
    pub merge_order: i64,
}

impl MockItem {
    pub fn new(id: usize, partition_key: &str, merge_order: i64) -> Self {
        Self {
            // Zero-padded, so that ids sort like the numbers they hold.
            id: format!("{:04}", id),
            partition_key: partition_key.to_string(),
            merge_order,
        }
    }
}

/// Where one request was sent.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordedTarget {
    Collection,
    PartitionKey(String),
    Range(String),
}

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub target: RecordedTarget,
    pub query: String,
    pub continuation: Option<String>,
    pub page_size: usize,
    pub request_charge: f64,
}

struct ScheduledSplit {
    range_id: String,
    after_requests: usize,
    children: Vec<PartitionKeyRange>,
}

struct BackendState {
    ranges: Vec<PartitionKeyRange>,
    gone: Vec<String>,
    splits: Vec<ScheduledSplit>,
    requests: Vec<RecordedRequest>,
    plan_requests: usize,
    forced_refreshes: usize,
}

pub struct MockBackend {
    items: Vec<MockItem>,
    plan: QueryPlan,
    state: Mutex<BackendState>,
}

const MAX_KEY: &str = "FF";

/// The position of an item within the results of one partition.
type Position = (Value, String);

impl MockBackend {
    pub fn new(ranges: Vec<PartitionKeyRange>, items: Vec<MockItem>) -> Self {
        Self {
            items,
            plan: QueryPlan::default(),
            state: Mutex::new(BackendState {
                ranges,
                gone: Vec::new(),
                splits: Vec::new(),
                requests: Vec::new(),
                plan_requests: 0,
                forced_refreshes: 0,
            }),
        }
    }

    /// Sets the query plan the gateway returns for every query.
    pub fn with_plan(mut self, query_info: QueryInfo) -> Self {
        self.plan = QueryPlan {
            partitioned_query_execution_info_version: 2,
            query_info,
            query_ranges: vec![QueryRange::full()],
        };
        self
    }

    /// Splits `range_id` into `children` once `after_requests` page requests have been served.
    pub fn with_split(
        self,
        range_id: &str,
        after_requests: usize,
        children: Vec<PartitionKeyRange>,
    ) -> Self {
        self.state.lock().unwrap().splits.push(ScheduledSplit {
            range_id: range_id.to_string(),
            after_requests,
            children,
        });
        self
    }

    pub fn into_services(self) -> (Arc<MockBackend>, QueryServices) {
        let backend = Arc::new(self);
        let services = QueryServices::new(backend.clone(), backend.clone());
        (backend, services)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    /// The total charge of every page served so far.
    pub fn total_charge(&self) -> f64 {
        self.requests().iter().map(|r| r.request_charge).sum()
    }

    pub fn plan_requests(&self) -> usize {
        self.state.lock().unwrap().plan_requests
    }

    pub fn forced_refreshes(&self) -> usize {
        self.state.lock().unwrap().forced_refreshes
    }

    fn sort_order(&self) -> Option<SortOrder> {
        self.plan.query_info.order_by.first().copied()
    }

    fn position(&self, item: &MockItem) -> Position {
        match self.sort_order() {
            Some(SortOrder::Ascending) => (json!(item.merge_order), item.id.clone()),
            Some(SortOrder::Descending) => (json!(-item.merge_order), item.id.clone()),
            None => (json!(item.partition_key), item.id.clone()),
        }
    }

    fn compare_positions(left: &Position, right: &Position) -> std::cmp::Ordering {
        let keys = match (&left.0, &right.0) {
            (Value::Number(l), Value::Number(r)) => l
                .as_i64()
                .unwrap_or_default()
                .cmp(&r.as_i64().unwrap_or_default()),
            (l, r) => l.as_str().cmp(&r.as_str()),
        };
        keys.then_with(|| left.1.cmp(&right.1))
    }

    /// Items in `[min, max)`, in the order the partition returns them.
    fn items_in(&self, min: &str, max: &str) -> Vec<&MockItem> {
        let mut items: Vec<&MockItem> = self
            .items
            .iter()
            .filter(|item| {
                let key = item.partition_key.as_str();
                key >= min && (max == MAX_KEY || key < max)
            })
            .collect();
        items.sort_by(|a, b| Self::compare_positions(&self.position(a), &self.position(b)));
        items
    }

    fn shape(&self, item: &MockItem) -> Value {
        let payload = serde_json::to_value(item).unwrap();
        if self.plan.query_info.order_by.is_empty() {
            return payload;
        }
        json!({
            "_rid": item.id,
            "orderByItems": [{ "item": item.merge_order }],
            "payload": payload,
        })
    }

    fn aggregate_partial(&self, operator: &str, items: &[&MockItem]) -> Value {
        let values: Vec<i64> = items.iter().map(|item| item.merge_order).collect();
        match operator {
            "Count" => json!([{ "item": values.len() }]),
            "Average" if values.is_empty() => json!([{ "item": { "sum": null, "count": 0 } }]),
            "Average" => json!([{ "item": { "sum": values.iter().sum::<i64>(), "count": values.len() } }]),
            _ if values.is_empty() => json!([{}]),
            "Sum" => json!([{ "item": values.iter().sum::<i64>() }]),
            "Min" => json!([{ "item": values.iter().min() }]),
            "Max" => json!([{ "item": values.iter().max() }]),
            other => panic!("unsupported aggregate in mock backend: {}", other),
        }
    }

    fn apply_due_splits(state: &mut BackendState) {
        let served = state.requests.len();
        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut state.splits)
            .into_iter()
            .partition(|split| served >= split.after_requests);
        state.splits = pending;
        for split in due {
            state.ranges.retain(|range| range.id != split.range_id);
            state.ranges.extend(split.children);
            state.ranges.sort();
            state.gone.push(split.range_id);
        }
    }

    fn serve(
        &self,
        items: Vec<&MockItem>,
        continuation: Option<&str>,
        page_size: usize,
    ) -> azure_data_cosmos_query::Result<Page> {
        if let Some(operator) = self.plan.query_info.aggregates.first() {
            let partial = self.aggregate_partial(operator, &items);
            return Ok(Page::new(vec![partial], None).with_request_charge(1.0));
        }

        let after = match continuation {
            Some(token) => Some(serde_json::from_str::<Position>(token).map_err(|_| {
                ErrorKind::BadRequest.with_message(format!("invalid continuation: {}", token))
            })?),
            None => None,
        };
        let remaining: Vec<&MockItem> = items
            .into_iter()
            .filter(|item| match &after {
                Some(after) => {
                    Self::compare_positions(&self.position(item), after)
                        == std::cmp::Ordering::Greater
                }
                None => true,
            })
            .collect();

        let page: Vec<&MockItem> = remaining.iter().take(page_size).copied().collect();
        let continuation = match page.last() {
            Some(last) if remaining.len() > page.len() => {
                Some(serde_json::to_string(&self.position(last)).unwrap())
            }
            _ => None,
        };
        let request_charge = 1.0 + page.len() as f64;
        Ok(
            Page::new(page.into_iter().map(|item| self.shape(item)).collect(), continuation)
                .with_request_charge(request_charge),
        )
    }
}

#[async_trait]
impl PageFetcher for MockBackend {
    async fn fetch_page(&self, request: &PageRequest<'_>) -> azure_data_cosmos_query::Result<Page> {
        let mut state = self.state.lock().unwrap();
        Self::apply_due_splits(&mut state);

        let (target, result) = match request.target {
            RequestTarget::Collection => (
                RecordedTarget::Collection,
                Err(Error::query_not_servable(self.plan.clone())),
            ),
            RequestTarget::PartitionKey(key) => {
                let items = self
                    .items
                    .iter()
                    .filter(|item| item.partition_key == key)
                    .collect::<Vec<_>>();
                let mut items = items;
                items.sort_by(|a, b| Self::compare_positions(&self.position(a), &self.position(b)));
                (
                    RecordedTarget::PartitionKey(key.to_string()),
                    self.serve(items, request.continuation, request.page_size),
                )
            }
            RequestTarget::Range(range) if state.gone.contains(&range.id) => (
                RecordedTarget::Range(range.id.clone()),
                Err(ErrorKind::PartitionSplit
                    .with_message(format!("partition key range {} is gone", range.id))),
            ),
            RequestTarget::Range(range) => (
                RecordedTarget::Range(range.id.clone()),
                self.serve(
                    self.items_in(&range.min_inclusive, &range.max_exclusive),
                    request.continuation,
                    request.page_size,
                ),
            ),
        };

        let number = state.requests.len() + 1;
        state.requests.push(RecordedRequest {
            target,
            query: request.query.text().to_string(),
            continuation: request.continuation.map(str::to_string),
            page_size: request.page_size,
            request_charge: result.as_ref().map(|p| p.request_charge).unwrap_or(0.0),
        });
        result.map(|page| page.with_activity_id(format!("activity-{}", number)))
    }

    async fn query_plan(
        &self,
        _collection: &str,
        _query: &Query,
    ) -> azure_data_cosmos_query::Result<QueryPlan> {
        self.state.lock().unwrap().plan_requests += 1;
        Ok(self.plan.clone())
    }
}

#[async_trait]
impl PartitionKeyRangeResolver for MockBackend {
    async fn resolve_overlapping_ranges(
        &self,
        _collection: &str,
        range: &QueryRange,
        force_refresh: bool,
    ) -> azure_data_cosmos_query::Result<Vec<PartitionKeyRange>> {
        let mut state = self.state.lock().unwrap();
        if force_refresh {
            state.forced_refreshes += 1;
        }
        Ok(state
            .ranges
            .iter()
            .filter(|r| range.overlaps(r))
            .cloned()
            .collect())
    }
}

/// Three ranges covering the whole key space: `["", "B")`, `["B", "M")` and `["M", "FF")`.
pub fn three_ranges() -> Vec<PartitionKeyRange> {
    vec![
        PartitionKeyRange::new("0", "", "B"),
        PartitionKeyRange::new("1", "B", "M"),
        PartitionKeyRange::new("2", "M", "FF"),
    ]
}

/// Two items in each of the three ranges.
pub fn two_items_per_range() -> Vec<MockItem> {
    vec![
        MockItem::new(1, "A", 0),
        MockItem::new(2, "A", 3),
        MockItem::new(3, "C", 1),
        MockItem::new(4, "C", 4),
        MockItem::new(5, "N", 2),
        MockItem::new(6, "N", 5),
    ]
}

/// `count` items per range, with merge orders interleaved across ranges.
pub fn interleaved_items(count: usize) -> Vec<MockItem> {
    let keys = ["A", "D", "P"];
    let mut items = Vec::new();
    for (i, key) in keys.iter().enumerate() {
        for j in 0..count {
            let merge_order = (i + j * keys.len()) as i64;
            items.push(MockItem::new(items.len() + 1, key, merge_order));
        }
    }
    items
}

/// Enables log output for a test run, controlled by `RUST_LOG`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
