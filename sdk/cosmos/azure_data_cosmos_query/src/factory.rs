// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

//! Builds the pipeline of execution contexts for a query.
//!
//! Pipelines are built inside-out: a source stage that fetches from partitions, then the stages
//! that transform its pages. For a cross-partition query the layout is
//! `Top(Aggregate(OrderBy | Parallel))`, where `Top` and `Aggregate` are only present when the
//! query plan asks for them.

use std::sync::Arc;

use crate::{
    charge::RequestChargeTracker,
    client::QueryServices,
    constants,
    context::{
        AggregateExecutionContext, AggregateOperator, DefaultExecutionContext, DefaultTarget,
        ExecutionContext, OrderByExecutionContext, ParallelExecutionContext,
        ProxyExecutionContext, TopExecutionContext,
    },
    continuation::ContinuationToken,
    models::{DistinctType, PartitionKeyRange, QueryInfo, QueryPlan, QueryRange},
    producer::FetchContext,
    ErrorKind, Query, QueryOptions,
};

/// Everything needed to (re)build the pipeline of one query execution.
pub(crate) struct ExecutionContextFactory {
    services: QueryServices,
    collection: String,
    query: Query,
    options: QueryOptions,
}

impl ExecutionContextFactory {
    pub fn new(
        services: QueryServices,
        collection: String,
        query: Query,
        options: QueryOptions,
    ) -> Self {
        Self {
            services,
            collection,
            query,
            options,
        }
    }

    fn fetch_context(&self, query: Query) -> Arc<FetchContext> {
        Arc::new(FetchContext {
            collection: self.collection.clone(),
            query,
            fetcher: self.services.fetcher.clone(),
            resolver: self.services.resolver.clone(),
            retry_policies: self
                .services
                .retry_policies_or_default(self.options.max_routing_retries),
            charges: RequestChargeTracker::new(),
        })
    }

    /// Creates the pipeline for the first page of the query.
    ///
    /// A continuation produced by a cross-partition pipeline rebuilds that pipeline directly, after
    /// fetching the query plan. Otherwise the query is first sent as-is, and only switches to a
    /// cross-partition pipeline if the service asks for it.
    #[tracing::instrument(level = "debug", skip_all, err, fields(collection = %self.collection))]
    pub async fn create(self: Arc<Self>) -> crate::Result<Box<dyn ExecutionContext>> {
        self.options.validate()?;

        let token = self.options.continuation.as_deref().map(ContinuationToken::parse);
        if let Some(token) = token.filter(ContinuationToken::is_cross_partition) {
            tracing::debug!("resuming a cross-partition query, fetching the query plan");
            let plan = self
                .services
                .fetcher
                .query_plan(&self.collection, &self.query)
                .await?;
            return self.create_cross_partition(plan, Some(token)).await;
        }

        let target = match &self.options.partition_key {
            Some(key) => DefaultTarget::PartitionKey(key.clone()),
            None => DefaultTarget::Collection,
        };
        let default = Box::new(DefaultExecutionContext::new(
            self.fetch_context(self.query.clone()),
            target.clone(),
            self.options.continuation.clone(),
            self.options.page_size(),
        ));
        if target != DefaultTarget::Collection {
            tracing::debug!("query targets a single partition key");
            return Ok(default);
        }
        Ok(Box::new(ProxyExecutionContext::new(default, self.clone())))
    }

    /// Creates a cross-partition pipeline for `plan`, optionally resuming from `token`.
    pub async fn create_cross_partition(
        &self,
        plan: QueryPlan,
        token: Option<ContinuationToken>,
    ) -> crate::Result<Box<dyn ExecutionContext>> {
        if !self.options.enable_cross_partition_query {
            return Err(ErrorKind::BadRequest.with_message(
                "the query spans multiple partitions, but cross-partition queries are disabled",
            ));
        }
        if token.is_none() && self.options.continuation.is_some() {
            // The caller's continuation was sent as a native token, but the query spans partitions.
            return Err(ErrorKind::MalformedContinuation.with_message(
                "the continuation is not a cross-partition continuation, but the query spans multiple partitions",
            ));
        }
        tracing::trace!(?plan, "creating cross-partition pipeline");

        let info = &plan.query_info;
        let aggregate = validate_plan(info)?;

        let query = if info.rewritten_query.is_empty() {
            self.query.clone()
        } else {
            let rewritten = self.query.rewrite(&info.rewritten_query);
            tracing::debug!(rewritten = %rewritten.text(), "rewrote query, per gateway query plan");
            rewritten
        };

        let take = info.take();
        let (remaining, inner_token) = match (take, token) {
            (Some(_), Some(ContinuationToken::Take(take_token))) => (
                Some(take_token.remaining),
                Some(ContinuationToken::parse(&take_token.token)),
            ),
            (Some(_), Some(_)) => {
                return Err(ErrorKind::MalformedContinuation
                    .with_message("expected the continuation of a TOP query"));
            }
            (None, Some(ContinuationToken::Take(_))) => {
                return Err(ErrorKind::MalformedContinuation
                    .with_message("found a TOP continuation for a query without TOP or LIMIT"));
            }
            (take, token) => (take, token),
        };

        let ranges = self.target_ranges(&plan.query_ranges).await?;
        tracing::debug!(range_count = ranges.len(), "resolved target partition key ranges");

        let page_size = self.options.page_size();
        let context = self.fetch_context(query);
        let mut pipeline: Box<dyn ExecutionContext> = if info.has_order_by() {
            let first_page_size = match remaining {
                Some(remaining) => top_page_size(page_size, remaining, ranges.len()),
                None => page_size,
            };
            tracing::debug!(order_by = ?info.order_by, first_page_size, "using ORDER BY pipeline");
            Box::new(OrderByExecutionContext::new(
                context,
                ranges,
                inner_token.map(ContinuationToken::into_order_by).transpose()?,
                info.order_by.clone(),
                page_size,
                first_page_size,
                self.options.max_degree_of_parallelism,
            )?)
        } else {
            tracing::debug!("using unordered pipeline");
            Box::new(ParallelExecutionContext::new(
                context,
                ranges,
                inner_token.map(ContinuationToken::into_composite).transpose()?,
                page_size,
            )?)
        };

        if let Some(operator) = aggregate {
            tracing::debug!(?operator, "adding aggregate stage to pipeline");
            pipeline = Box::new(AggregateExecutionContext::new(pipeline, operator));
        }

        if let Some(remaining) = remaining {
            tracing::debug!(remaining, "adding TOP stage to pipeline");
            pipeline = Box::new(TopExecutionContext::new(pipeline, remaining));
        }

        Ok(pipeline)
    }

    /// Resolves the partition key ranges overlapping the plan's query ranges, sorted and without duplicates.
    async fn target_ranges(
        &self,
        query_ranges: &[QueryRange],
    ) -> crate::Result<Vec<PartitionKeyRange>> {
        let full = [QueryRange::full()];
        let query_ranges = if query_ranges.is_empty() {
            &full[..]
        } else {
            query_ranges
        };

        let mut ranges = Vec::new();
        for query_range in query_ranges {
            let overlapping = self
                .services
                .resolver
                .resolve_overlapping_ranges(&self.collection, query_range, false)
                .await?;
            ranges.extend(
                overlapping
                    .into_iter()
                    .filter(|range| query_range.overlaps(range)),
            );
        }
        ranges.sort();
        ranges.dedup_by(|a, b| a.id == b.id);
        Ok(ranges)
    }
}

/// Rejects plans the client cannot execute, and returns the aggregate to finish, if any.
fn validate_plan(info: &QueryInfo) -> crate::Result<Option<AggregateOperator>> {
    if !info.group_by_expressions.is_empty() {
        return Err(ErrorKind::UnsupportedQueryPlan.with_message("GROUP BY queries are not supported"));
    }
    if info.distinct_type != DistinctType::None {
        return Err(ErrorKind::UnsupportedQueryPlan.with_message("DISTINCT queries are not supported"));
    }
    if info.offset.is_some() {
        return Err(ErrorKind::UnsupportedQueryPlan.with_message("OFFSET queries are not supported"));
    }

    let Some(aggregate) = info.aggregates.first() else {
        return Ok(None);
    };
    if info.aggregates.len() > 1 {
        return Err(ErrorKind::UnsupportedQueryPlan
            .with_message("queries with more than one aggregate are not supported"));
    }
    if !info.has_select_value {
        return Err(ErrorKind::UnsupportedQueryPlan.with_message("non-value aggregates are not supported"));
    }
    if info.has_order_by() {
        return Err(ErrorKind::UnsupportedQueryPlan
            .with_message("queries with both ORDER BY and aggregates are not supported"));
    }
    Ok(Some(aggregate.parse()?))
}

/// The per-partition size of the first page of an `ORDER BY` query limited to `take` items.
///
/// Each of `range_count` partitions is expected to contribute its share of the items, with some slack.
fn top_page_size(page_size: usize, take: u64, range_count: usize) -> usize {
    let take = usize::try_from(take).unwrap_or(usize::MAX);
    let share = take.div_ceil(range_count.max(1));
    let estimate = share
        .saturating_mul(constants::TOP_PAGE_SIZE_FACTOR)
        .min(take);
    page_size.min(estimate).max(1)
}
