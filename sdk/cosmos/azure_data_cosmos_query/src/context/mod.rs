// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

//! Execution contexts: the stages of a query pipeline.
//!
//! Every stage produces pages of results. Source stages ([`DefaultExecutionContext`],
//! [`ParallelExecutionContext`], [`OrderByExecutionContext`]) fetch pages from partitions; the
//! remaining stages wrap another stage and transform its pages.

use async_trait::async_trait;
use serde_json::Value;

use crate::models::QueryMetrics;

mod aggregate;
mod default;
mod order_by;
mod parallel;
mod proxy;
mod top;

pub(crate) use aggregate::{AggregateExecutionContext, AggregateOperator};
pub(crate) use default::{DefaultExecutionContext, DefaultTarget};
pub(crate) use order_by::OrderByExecutionContext;
pub(crate) use parallel::ParallelExecutionContext;
pub(crate) use proxy::ProxyExecutionContext;
pub(crate) use top::TopExecutionContext;

/// One page produced by a pipeline stage.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct ResultPage {
    pub items: Vec<Value>,

    /// The charge of every backend request made since the previous page was produced.
    pub request_charge: f64,

    /// The token that resumes the query right after this page, `None` when the query is finished.
    pub continuation: Option<String>,
    pub query_metrics: Option<QueryMetrics>,
    pub activity_id: Option<String>,
}

#[async_trait]
pub(crate) trait ExecutionContext: Send {
    /// Produces the next page, or `None` once the stage has nothing more to produce.
    async fn next_page(&mut self) -> crate::Result<Option<ResultPage>>;

    /// Caps the number of items fetched from each partition from now on.
    ///
    /// Stages that cannot honor the cap ignore it; it only ever saves requests.
    fn set_item_budget(&mut self, _budget: usize) {}
}
