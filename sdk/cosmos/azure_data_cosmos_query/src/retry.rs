// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

//! Retry policies for page requests.

use async_trait::async_trait;

use crate::{
    client::{PageFetcher, PageRequest},
    models::Page,
    Error, ErrorKind,
};

/// Decides whether a failed page request should be sent again.
///
/// A fresh policy is created for every logical page request, so implementations can count attempts.
/// Policies that want to delay the next attempt can do so before returning from [`should_retry`](Self::should_retry).
#[async_trait]
pub trait RetryPolicy: Send {
    async fn should_retry(&mut self, error: &Error) -> bool;
}

/// Creates [`RetryPolicy`] instances.
pub trait RetryPolicyFactory: Send + Sync {
    fn create(&self) -> Box<dyn RetryPolicy>;
}

/// The default retry policy.
///
/// Retries stale-routing errors ([`ErrorKind::InvalidPartition`], [`ErrorKind::PartitionKeyRangeGone`])
/// and partition splits seen on the single-partition path, a bounded number of times.
/// The [`PageFetcher`] is expected to refresh its routing information when it reports these errors.
#[derive(Debug)]
pub struct ClientRetryPolicy {
    max_attempts: u32,
    attempts: u32,
}

impl ClientRetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            attempts: 0,
        }
    }
}

#[async_trait]
impl RetryPolicy for ClientRetryPolicy {
    async fn should_retry(&mut self, error: &Error) -> bool {
        let retryable =
            error.is_retryable_routing() || error.kind() == ErrorKind::PartitionSplit;
        if !retryable || self.attempts >= self.max_attempts {
            return false;
        }
        self.attempts += 1;
        tracing::debug!(attempt = self.attempts, kind = ?error.kind(), "retrying after routing error");
        true
    }
}

/// Creates [`ClientRetryPolicy`] instances.
#[derive(Clone, Debug)]
pub struct ClientRetryPolicyFactory {
    max_attempts: u32,
}

impl ClientRetryPolicyFactory {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }
}

impl RetryPolicyFactory for ClientRetryPolicyFactory {
    fn create(&self) -> Box<dyn RetryPolicy> {
        Box::new(ClientRetryPolicy::new(self.max_attempts))
    }
}

/// How a request loop treats [`ErrorKind::PartitionSplit`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SplitHandling {
    /// Return the split to the caller, which replaces the range with its children.
    Surface,

    /// Let the retry policy decide, as with any routing error.
    Retry,
}

/// Sends `request` until it succeeds or the retry policy gives up.
///
/// A `BadRequest` for a request carrying a continuation means the service rejected the continuation,
/// and is reported as [`ErrorKind::MalformedContinuation`] without retrying.
pub(crate) async fn fetch_with_retry(
    fetcher: &dyn PageFetcher,
    request: &PageRequest<'_>,
    policies: &dyn RetryPolicyFactory,
    splits: SplitHandling,
) -> crate::Result<Page> {
    let mut policy = policies.create();
    loop {
        let error = match fetcher.fetch_page(request).await {
            Ok(page) => return Ok(page),
            Err(e) => e,
        };

        if error.kind() == ErrorKind::PartitionSplit && splits == SplitHandling::Surface {
            return Err(error);
        }

        if error.kind() == ErrorKind::BadRequest && request.continuation.is_some() {
            return Err(error.with_kind(ErrorKind::MalformedContinuation));
        }

        if !policy.should_retry(&error).await {
            return Err(error);
        }
    }
}
