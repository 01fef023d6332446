// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    context::{ExecutionContext, ResultPage},
    factory::ExecutionContextFactory,
    ErrorKind,
};

/// Sends a query to the container as-is, and switches to a cross-partition pipeline if the
/// service answers that the query spans partitions.
///
/// The switch can only happen on the first page; afterwards this is a passthrough.
pub(crate) struct ProxyExecutionContext {
    inner: Box<dyn ExecutionContext>,
    factory: Arc<ExecutionContextFactory>,
    started: bool,
}

impl ProxyExecutionContext {
    pub fn new(inner: Box<dyn ExecutionContext>, factory: Arc<ExecutionContextFactory>) -> Self {
        Self {
            inner,
            factory,
            started: false,
        }
    }
}

#[async_trait]
impl ExecutionContext for ProxyExecutionContext {
    async fn next_page(&mut self) -> crate::Result<Option<ResultPage>> {
        if self.started {
            return self.inner.next_page().await;
        }

        let error = match self.inner.next_page().await {
            Err(e) if e.kind() == ErrorKind::CrossPartitionQueryNotServable => e,
            other => {
                self.started = true;
                return other;
            }
        };
        self.started = true;

        let Some(plan) = error.into_query_plan() else {
            return Err(ErrorKind::InternalError
                .with_message("the service refused a cross-partition query without returning a query plan"));
        };
        tracing::debug!("query spans partitions, switching to cross-partition execution");
        self.inner = self.factory.create_cross_partition(plan, None).await?;
        self.inner.next_page().await
    }
}
