// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

use std::{marker::PhantomData, sync::Arc};

use futures::Stream;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    client::QueryServices,
    context::{ExecutionContext, ResultPage},
    factory::ExecutionContextFactory,
    models::QueryMetrics,
    Query, QueryOptions,
};

/// A page of query results.
#[derive(Clone, Debug)]
pub struct QueryPage<T> {
    items: Vec<T>,
    request_charge: f64,
    continuation: Option<String>,
    query_metrics: Option<QueryMetrics>,
    activity_id: Option<String>,
}

impl<T> QueryPage<T> {
    /// Gets the items in this page.
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Consumes the page, returning its items.
    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    /// The total charge, in request units, of every request made to produce this page.
    pub fn request_charge(&self) -> f64 {
        self.request_charge
    }

    /// The token that resumes the query after this page, or `None` if the query has no more results.
    ///
    /// Pass it to [`QueryOptions::continuation`] to resume the query in a new [`QueryExecutor`].
    pub fn continuation(&self) -> Option<&str> {
        self.continuation.as_deref()
    }

    pub fn query_metrics(&self) -> Option<&QueryMetrics> {
        self.query_metrics.as_ref()
    }

    /// The activity ID of the last request that contributed to this page.
    pub fn activity_id(&self) -> Option<&str> {
        self.activity_id.as_deref()
    }
}

impl<T: DeserializeOwned> QueryPage<T> {
    fn from_result(page: ResultPage) -> crate::Result<Self> {
        let items = page
            .items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<T>, _>>()?;
        Ok(Self {
            items,
            request_charge: page.request_charge,
            continuation: page.continuation,
            query_metrics: page.query_metrics,
            activity_id: page.activity_id,
        })
    }
}

enum ExecutorState {
    /// The pipeline is built on the first request for a page.
    Pending,
    Running(Box<dyn ExecutionContext>),
    Done,
}

/// Executes a query, page by page, across every partition it needs to visit.
///
/// Each call to [`next_page()`](Self::next_page) returns one page. Once a page has been returned
/// without a continuation, or an error has been returned, the executor only returns `None`.
pub struct QueryExecutor<T = Value> {
    factory: Arc<ExecutionContextFactory>,
    state: ExecutorState,
    phantom: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> QueryExecutor<T> {
    /// Creates an executor for `query` against the container identified by `collection`.
    ///
    /// No request is sent until the first page is requested.
    pub fn new(
        services: QueryServices,
        collection: impl Into<String>,
        query: impl Into<Query>,
        options: Option<QueryOptions>,
    ) -> Self {
        Self {
            factory: Arc::new(ExecutionContextFactory::new(
                services,
                collection.into(),
                query.into(),
                options.unwrap_or_default(),
            )),
            state: ExecutorState::Pending,
            phantom: PhantomData,
        }
    }

    /// Fetches the next page of results, or `None` once the query is complete.
    pub async fn next_page(&mut self) -> crate::Result<Option<QueryPage<T>>> {
        loop {
            match &mut self.state {
                ExecutorState::Done => return Ok(None),
                ExecutorState::Pending => match self.factory.clone().create().await {
                    Ok(context) => self.state = ExecutorState::Running(context),
                    Err(e) => {
                        self.state = ExecutorState::Done;
                        return Err(e);
                    }
                },
                ExecutorState::Running(context) => {
                    let page = match context.next_page().await {
                        Ok(Some(page)) => page,
                        Ok(None) => {
                            self.state = ExecutorState::Done;
                            return Ok(None);
                        }
                        Err(e) => {
                            self.state = ExecutorState::Done;
                            return Err(e);
                        }
                    };
                    if page.continuation.is_none() {
                        self.state = ExecutorState::Done;
                    }
                    return match QueryPage::from_result(page) {
                        Ok(page) => Ok(Some(page)),
                        Err(e) => {
                            self.state = ExecutorState::Done;
                            Err(e)
                        }
                    };
                }
            }
        }
    }

    /// Converts the executor into a stream of pages.
    pub fn into_stream(self) -> impl Stream<Item = crate::Result<QueryPage<T>>> {
        futures::stream::unfold(self, |mut executor| async move {
            executor
                .next_page()
                .await
                .transpose()
                .map(|page| (page, executor))
        })
    }
}
