// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    client::{PageRequest, RequestTarget},
    context::{ExecutionContext, ResultPage},
    producer::FetchContext,
    retry::{fetch_with_retry, SplitHandling},
};

/// Where a [`DefaultExecutionContext`] sends its requests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum DefaultTarget {
    Collection,
    PartitionKey(String),
}

/// Executes a query against a single target and passes its pages through unchanged.
///
/// Continuations are the service's own tokens. Splits are invisible here: the service reroutes
/// the request, so they are handed to the retry policy like any other routing error.
pub(crate) struct DefaultExecutionContext {
    context: Arc<FetchContext>,
    target: DefaultTarget,
    continuation: Option<String>,
    page_size: usize,
    finished: bool,
}

impl DefaultExecutionContext {
    pub fn new(
        context: Arc<FetchContext>,
        target: DefaultTarget,
        continuation: Option<String>,
        page_size: usize,
    ) -> Self {
        Self {
            context,
            target,
            continuation,
            page_size,
            finished: false,
        }
    }
}

#[async_trait]
impl ExecutionContext for DefaultExecutionContext {
    #[tracing::instrument(level = "debug", skip_all, err)]
    async fn next_page(&mut self) -> crate::Result<Option<ResultPage>> {
        if self.finished {
            return Ok(None);
        }

        let target = match &self.target {
            DefaultTarget::Collection => RequestTarget::Collection,
            DefaultTarget::PartitionKey(key) => RequestTarget::PartitionKey(key),
        };
        let request = PageRequest {
            collection: &self.context.collection,
            query: &self.context.query,
            target,
            continuation: self.continuation.as_deref(),
            page_size: self.page_size,
        };
        let page = fetch_with_retry(
            self.context.fetcher.as_ref(),
            &request,
            self.context.retry_policies.as_ref(),
            SplitHandling::Retry,
        )
        .await?;

        tracing::debug!(
            item_count = page.items.len(),
            request_charge = page.request_charge,
            "received page"
        );
        self.continuation = page.continuation.clone();
        self.finished = page.continuation.is_none();
        Ok(Some(ResultPage {
            items: page.items,
            request_charge: page.request_charge,
            continuation: page.continuation,
            query_metrics: page.query_metrics,
            activity_id: page.activity_id,
        }))
    }
}
