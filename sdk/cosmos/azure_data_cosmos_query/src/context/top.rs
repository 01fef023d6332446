// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

use async_trait::async_trait;

use crate::{
    context::{ExecutionContext, ResultPage},
    continuation::{ContinuationToken, TakeContinuationToken},
};

/// Stops a query after a fixed number of items, for `TOP` and `LIMIT`.
///
/// Once the limit is reached no further page is requested from the wrapped stage.
pub(crate) struct TopExecutionContext {
    inner: Box<dyn ExecutionContext>,
    remaining: u64,
}

impl TopExecutionContext {
    pub fn new(mut inner: Box<dyn ExecutionContext>, remaining: u64) -> Self {
        inner.set_item_budget(usize::try_from(remaining).unwrap_or(usize::MAX));
        Self { inner, remaining }
    }
}

#[async_trait]
impl ExecutionContext for TopExecutionContext {
    async fn next_page(&mut self) -> crate::Result<Option<ResultPage>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let Some(mut page) = self.inner.next_page().await? else {
            return Ok(None);
        };

        let count = page.items.len() as u64;
        if count >= self.remaining {
            page.items.truncate(self.remaining as usize);
            self.remaining = 0;
            tracing::debug!("item limit reached");
        } else {
            self.remaining -= count;
        }

        page.continuation = match page.continuation.take() {
            Some(token) if self.remaining > 0 => Some(
                ContinuationToken::Take(TakeContinuationToken {
                    token,
                    remaining: self.remaining,
                })
                .encode()?,
            ),
            _ => None,
        };
        Ok(Some(page))
    }

    fn set_item_budget(&mut self, budget: usize) {
        let budget = budget.min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        self.inner.set_item_budget(budget);
    }
}
