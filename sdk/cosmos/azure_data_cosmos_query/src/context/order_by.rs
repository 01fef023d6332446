// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

//! K-way merge for `ORDER BY` queries.
//!
//! Each partition key range returns its results already sorted, wrapped as
//! `{"_rid": ..., "orderByItems": [{"item": <key>}, ...], "payload": <document>}`. Every range is
//! one merge input; the merge repeatedly emits the smallest head among all inputs. An input can
//! only take part in a pick once it has buffered items or is known to be finished, so every input
//! is refilled before each pick.

use std::{cmp::Ordering, collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use serde_json::Value;

use crate::{
    charge::RequestChargeTracker,
    comparison::compare_values,
    context::{ExecutionContext, ResultPage},
    continuation::{ContinuationToken, OrderByContinuationToken},
    models::{accumulate_metrics, PartitionKeyRange, QueryMetrics, SortOrder},
    producer::{FetchContext, PartitionProducer, ProducerOutcome},
    ErrorKind,
};

/// One result of a partition's `ORDER BY` query.
#[derive(Clone, Debug, PartialEq)]
struct OrderByResult {
    rid: Option<String>,
    order_by_items: Vec<Value>,

    /// `None` when the projection was undefined for this document.
    payload: Option<Value>,
}

impl OrderByResult {
    fn from_value(value: Value) -> crate::Result<Self> {
        let Value::Object(mut fields) = value else {
            return Err(ErrorKind::Serialization
                .with_message("ORDER BY results must be JSON objects"));
        };
        let order_by_items = match fields.remove("orderByItems") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(ErrorKind::Serialization
                    .with_message("ORDER BY result is missing its orderByItems array"))
            }
        };
        let rid = match fields.remove("_rid") {
            Some(Value::String(rid)) => Some(rid),
            _ => None,
        };
        Ok(Self {
            rid,
            order_by_items,
            payload: fields.remove("payload"),
        })
    }

    fn key(&self) -> SortKey<'_> {
        SortKey {
            order_by_items: &self.order_by_items,
            rid: self.rid.as_deref(),
        }
    }
}

/// The position of an item within one partition's sorted results.
#[derive(Clone, Copy, Debug)]
struct SortKey<'a> {
    order_by_items: &'a [Value],
    rid: Option<&'a str>,
}

fn sort_value(item: &Value) -> Option<&Value> {
    item.get("item")
}

/// Compares the sort keys of two items, honoring the direction of each key.
fn compare_order_by_items(left: &[Value], right: &[Value], sort_orders: &[SortOrder]) -> Ordering {
    for (index, (l, r)) in left.iter().zip(right.iter()).enumerate() {
        let ord = compare_values(sort_value(l), sort_value(r));
        let ord = match sort_orders.get(index) {
            Some(SortOrder::Descending) => ord.reverse(),
            _ => ord,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Compares two positions within the same partition.
fn compare_keys(left: SortKey<'_>, right: SortKey<'_>, sort_orders: &[SortOrder]) -> Ordering {
    compare_order_by_items(left.order_by_items, right.order_by_items, sort_orders)
        .then_with(|| left.rid.cmp(&right.rid))
}

/// The last item consumed from an input.
#[derive(Clone, Debug, Default)]
struct Position {
    order_by_items: Vec<Value>,
    rid: Option<String>,
}

impl Position {
    fn key(&self) -> SortKey<'_> {
        SortKey {
            order_by_items: &self.order_by_items,
            rid: self.rid.as_deref(),
        }
    }
}

/// One merge input: a partition key range and the items fetched from it but not yet emitted.
struct OrderByInput {
    producer: PartitionProducer,
    buffer: VecDeque<OrderByResult>,

    /// The continuation that fetched the page currently in `buffer`.
    page_token: Option<String>,
    last_consumed: Option<Position>,

    /// While set, fetched items at or before `last_consumed` are dropped. Used after a resume.
    skipping: bool,
    query_metrics: Option<QueryMetrics>,
    activity_id: Option<String>,
}

impl OrderByInput {
    fn new(producer: PartitionProducer, last_consumed: Option<Position>) -> Self {
        Self {
            page_token: producer.continuation().map(str::to_string),
            producer,
            buffer: VecDeque::new(),
            skipping: last_consumed.is_some(),
            last_consumed,
            query_metrics: None,
            activity_id: None,
        }
    }

    /// Builds the input that replaces this one for a child range after a split.
    fn child(&self, producer: PartitionProducer) -> Self {
        Self {
            page_token: producer.continuation().map(str::to_string),
            producer,
            buffer: VecDeque::new(),
            last_consumed: self.last_consumed.clone(),
            skipping: self.skipping,
            query_metrics: None,
            activity_id: None,
        }
    }

    fn range(&self) -> &PartitionKeyRange {
        self.producer.range()
    }

    fn needs_fill(&self) -> bool {
        self.buffer.is_empty() && !self.producer.is_exhausted()
    }

    fn is_finished(&self) -> bool {
        self.buffer.is_empty() && self.producer.is_exhausted()
    }

    /// Fetches pages until the buffer holds an item or the range is finished.
    ///
    /// Returns the child producers if the range split; the input must then be replaced.
    async fn fill(
        &mut self,
        sort_orders: &[SortOrder],
    ) -> crate::Result<Option<Vec<PartitionProducer>>> {
        while self.needs_fill() {
            let page_token = self.producer.continuation().map(str::to_string);
            let page = match self.producer.fetch_next().await? {
                ProducerOutcome::Page(page) => page,
                ProducerOutcome::Split(children) => return Ok(Some(children)),
            };

            accumulate_metrics(&mut self.query_metrics, page.query_metrics.as_ref());
            if page.activity_id.is_some() {
                self.activity_id = page.activity_id;
            }
            self.page_token = page_token;
            for item in page.items {
                let result = OrderByResult::from_value(item)?;
                if self.skipping {
                    if let Some(last) = &self.last_consumed {
                        if compare_keys(result.key(), last.key(), sort_orders) != Ordering::Greater {
                            continue;
                        }
                    }
                    self.skipping = false;
                }
                self.buffer.push_back(result);
            }
        }
        Ok(None)
    }

    fn consume(&mut self) -> Option<OrderByResult> {
        let result = self.buffer.pop_front()?;
        self.last_consumed = Some(Position {
            order_by_items: result.order_by_items.clone(),
            rid: result.rid.clone(),
        });
        Some(result)
    }

    fn continuation(&self) -> OrderByContinuationToken {
        // With an empty buffer the next fetch resumes exactly where the input stands.
        let token = if self.buffer.is_empty() {
            self.producer.continuation().map(str::to_string)
        } else {
            self.page_token.clone()
        };
        let last = self.last_consumed.clone().unwrap_or_default();
        OrderByContinuationToken {
            token,
            range: self.range().bounds(),
            order_by_items: last.order_by_items,
            rid: last.rid,
        }
    }
}

/// Merges the sorted results of several partition key ranges into one sorted sequence.
pub(crate) struct OrderByExecutionContext {
    inputs: Vec<OrderByInput>,
    sort_orders: Vec<SortOrder>,
    page_size: usize,
    max_degree_of_parallelism: usize,
    charges: RequestChargeTracker,
    finished: bool,
}

impl OrderByExecutionContext {
    /// Creates a merge over `ranges`, which must be sorted, optionally resuming from `resume`.
    ///
    /// Each partition is asked for `first_page_size` items in its first request, and `page_size` afterwards.
    pub fn new(
        context: Arc<FetchContext>,
        ranges: Vec<PartitionKeyRange>,
        resume: Option<Vec<OrderByContinuationToken>>,
        sort_orders: Vec<SortOrder>,
        page_size: usize,
        first_page_size: usize,
        max_degree_of_parallelism: usize,
    ) -> crate::Result<Self> {
        let charges = context.charges.clone();
        let inputs = resume_inputs(ranges, resume)?
            .into_iter()
            .map(|(range, token, last_consumed)| {
                let producer = PartitionProducer::new(context.clone(), range, token, page_size)
                    .with_first_page_size(first_page_size);
                OrderByInput::new(producer, last_consumed)
            })
            .collect();
        Ok(Self {
            inputs,
            sort_orders,
            page_size,
            max_degree_of_parallelism,
            charges,
            finished: false,
        })
    }

    /// Refills every input with an empty buffer, replacing split inputs with their children.
    async fn fill_inputs(&mut self) -> crate::Result<()> {
        loop {
            let sort_orders = self.sort_orders.as_slice();
            let pending: Vec<(usize, &mut OrderByInput)> = self
                .inputs
                .iter_mut()
                .enumerate()
                .filter(|(_, input)| input.needs_fill())
                .collect();
            let fills: Vec<_> = pending
                .into_iter()
                .map(|(index, input)| async move {
                    input
                        .fill(sort_orders)
                        .await
                        .map(|children| children.map(|children| (index, children)))
                })
                .collect();
            let outcomes: Vec<Option<(usize, Vec<PartitionProducer>)>> = futures::stream::iter(
                fills,
            )
            .buffer_unordered(self.max_degree_of_parallelism)
            .try_collect()
            .await?;

            let mut splits: Vec<_> = outcomes.into_iter().flatten().collect();
            if splits.is_empty() {
                return Ok(());
            }

            splits.sort_by_key(|(index, _)| *index);
            for (index, children) in splits.into_iter().rev() {
                let replacements: Vec<OrderByInput> = children
                    .into_iter()
                    .map(|producer| self.inputs[index].child(producer))
                    .collect();
                self.inputs.splice(index..=index, replacements);
            }
        }
    }

    /// Compares the heads of two inputs in merge order: sort keys, then range, then `_rid`.
    fn compare_heads(&self, left: &OrderByInput, right: &OrderByInput) -> Ordering {
        let (Some(l), Some(r)) = (left.buffer.front(), right.buffer.front()) else {
            return Ordering::Equal;
        };
        compare_order_by_items(&l.order_by_items, &r.order_by_items, &self.sort_orders)
            .then_with(|| left.range().min_inclusive.cmp(&right.range().min_inclusive))
            .then_with(|| l.rid.cmp(&r.rid))
    }

    /// Finds the input holding the next item to emit. Every unfinished input must be filled.
    fn pick(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (index, input) in self.inputs.iter().enumerate() {
            if input.buffer.is_empty() {
                continue;
            }
            best = match best {
                Some(current)
                    if self.compare_heads(input, &self.inputs[current]) != Ordering::Less =>
                {
                    Some(current)
                }
                _ => Some(index),
            };
        }
        best
    }

    fn continuation(&self) -> crate::Result<Option<String>> {
        let entries: Vec<OrderByContinuationToken> = self
            .inputs
            .iter()
            .filter(|input| !input.is_finished())
            .map(OrderByInput::continuation)
            .collect();
        if entries.is_empty() {
            return Ok(None);
        }
        Ok(Some(ContinuationToken::OrderBy(entries).encode()?))
    }

    fn take_diagnostics(&mut self) -> (Option<QueryMetrics>, Option<String>) {
        let mut query_metrics = None;
        let mut activity_id = None;
        for input in &mut self.inputs {
            accumulate_metrics(&mut query_metrics, input.query_metrics.take().as_ref());
            if let Some(id) = input.activity_id.take() {
                activity_id = Some(id);
            }
        }
        (query_metrics, activity_id)
    }
}

/// Pairs each target range with its backend continuation and last consumed item.
#[allow(clippy::type_complexity)]
fn resume_inputs(
    ranges: Vec<PartitionKeyRange>,
    resume: Option<Vec<OrderByContinuationToken>>,
) -> crate::Result<Vec<(PartitionKeyRange, Option<String>, Option<Position>)>> {
    let Some(entries) = resume else {
        return Ok(ranges.into_iter().map(|range| (range, None, None)).collect());
    };

    let mut inputs = Vec::new();
    for range in ranges {
        // Ranges with no entry were fully consumed.
        let Some(entry) = entries.iter().find(|entry| range.overlaps(&entry.range)) else {
            continue;
        };
        let last_consumed = (!entry.order_by_items.is_empty()).then(|| Position {
            order_by_items: entry.order_by_items.clone(),
            rid: entry.rid.clone(),
        });
        inputs.push((range, entry.token.clone(), last_consumed));
    }

    if inputs.is_empty() && !entries.is_empty() {
        return Err(ErrorKind::MalformedContinuation
            .with_message("ORDER BY continuation does not overlap any target range"));
    }
    Ok(inputs)
}

#[async_trait]
impl ExecutionContext for OrderByExecutionContext {
    #[tracing::instrument(level = "debug", skip_all, err)]
    async fn next_page(&mut self) -> crate::Result<Option<ResultPage>> {
        if self.finished {
            return Ok(None);
        }

        let mut items = Vec::new();
        let mut consumed = 0;
        while consumed < self.page_size {
            self.fill_inputs().await?;
            let Some(index) = self.pick() else {
                break;
            };
            let Some(result) = self.inputs[index].consume() else {
                break;
            };
            consumed += 1;
            if let Some(payload) = result.payload {
                items.push(payload);
            }
        }

        let continuation = self.continuation()?;
        let request_charge = self.charges.drain();
        let (query_metrics, activity_id) = self.take_diagnostics();
        if consumed == 0 {
            self.finished = true;
            if request_charge == 0.0 && query_metrics.is_none() {
                return Ok(None);
            }
        }
        if continuation.is_none() {
            self.finished = true;
        }

        Ok(Some(ResultPage {
            items,
            request_charge,
            continuation,
            query_metrics,
            activity_id,
        }))
    }

    fn set_item_budget(&mut self, budget: usize) {
        // Resumed inputs refetch items they already emitted, so they cannot be capped.
        for input in self.inputs.iter_mut().filter(|input| !input.skipping) {
            input.producer.set_item_budget(budget);
        }
    }
}
