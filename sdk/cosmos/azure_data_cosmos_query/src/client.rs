// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

//! Interfaces to the services the engine depends on.
//!
//! The engine never builds HTTP requests itself. Instead, it describes each single-partition
//! request as a [`PageRequest`] and hands it to a [`PageFetcher`], which owns serialization,
//! authentication, transport and transient-error retries.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    models::{Page, PartitionKeyRange, QueryPlan, QueryRange},
    retry::{ClientRetryPolicyFactory, RetryPolicyFactory},
    Query,
};

/// Where a single page request should be routed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RequestTarget<'a> {
    /// No explicit target. The service decides, and rejects queries that span partitions.
    Collection,

    /// The partition holding this partition key.
    PartitionKey(&'a str),

    /// A specific partition key range.
    Range(&'a PartitionKeyRange),
}

/// A request for one page of results from one target.
#[derive(Clone, Debug)]
pub struct PageRequest<'a> {
    /// The link of the container being queried.
    pub collection: &'a str,

    /// The, possibly rewritten, query to send.
    pub query: &'a Query,

    pub target: RequestTarget<'a>,

    /// The continuation returned by the previous page from the same target, if any.
    pub continuation: Option<&'a str>,

    /// The maximum number of items the page should contain.
    pub page_size: usize,
}

/// Executes single-page query requests.
///
/// Implementations are expected to retry transient failures themselves. A request against a
/// partition key range that has been split must fail with [`ErrorKind::PartitionSplit`](crate::ErrorKind::PartitionSplit),
/// and a query that the service refuses to execute against a single partition must fail with
/// [`Error::query_not_servable()`](crate::Error::query_not_servable).
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetches one page of results.
    async fn fetch_page(&self, request: &PageRequest<'_>) -> crate::Result<Page>;

    /// Requests the query plan for `query` from the gateway.
    async fn query_plan(&self, collection: &str, query: &Query) -> crate::Result<QueryPlan>;
}

/// Resolves the partition key ranges that currently cover part of a container.
#[async_trait]
pub trait PartitionKeyRangeResolver: Send + Sync {
    /// Gets the partition key ranges overlapping `range`, sorted by `min_inclusive`.
    ///
    /// When `force_refresh` is set, cached routing information must be discarded first.
    async fn resolve_overlapping_ranges(
        &self,
        collection: &str,
        range: &QueryRange,
        force_refresh: bool,
    ) -> crate::Result<Vec<PartitionKeyRange>>;
}

/// The collaborators used to execute a query.
#[derive(Clone)]
pub struct QueryServices {
    pub fetcher: Arc<dyn PageFetcher>,
    pub resolver: Arc<dyn PartitionKeyRangeResolver>,
    /// Builds the retry policy used for each page request. `None` uses a [`ClientRetryPolicyFactory`]
    /// configured from [`QueryOptions::max_routing_retries`](crate::QueryOptions::max_routing_retries).
    pub retry_policies: Option<Arc<dyn RetryPolicyFactory>>,
}

impl QueryServices {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        resolver: Arc<dyn PartitionKeyRangeResolver>,
    ) -> Self {
        Self {
            fetcher,
            resolver,
            retry_policies: None,
        }
    }

    pub fn with_retry_policies(mut self, factory: Arc<dyn RetryPolicyFactory>) -> Self {
        self.retry_policies = Some(factory);
        self
    }

    pub(crate) fn retry_policies_or_default(&self, max_routing_retries: u32) -> Arc<dyn RetryPolicyFactory> {
        self.retry_policies
            .clone()
            .unwrap_or_else(|| Arc::new(ClientRetryPolicyFactory::new(max_routing_retries)))
    }
}
