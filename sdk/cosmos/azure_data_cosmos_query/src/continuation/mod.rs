// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

//! Continuation tokens returned to callers.
//!
//! Cross-partition pipelines build their own tokens, in one of three JSON shapes. A token is
//! classified by trying each shape's parser in turn; anything that matches none of them is
//! assumed to be a backend token for a single-partition query and is passed through unchanged.

mod composite;
mod order_by;
mod take;

pub use composite::*;
pub use order_by::*;
pub use take::*;

use crate::ErrorKind;

/// A continuation token, classified by shape.
#[derive(Clone, Debug, PartialEq)]
pub enum ContinuationToken {
    /// Token of an unordered cross-partition query.
    Composite(Vec<CompositeContinuationToken>),

    /// Token of an `ORDER BY` cross-partition query.
    OrderBy(Vec<OrderByContinuationToken>),

    /// Token of a `TOP`/`LIMIT` query.
    Take(TakeContinuationToken),

    /// Anything else: a single-partition token owned by the service.
    Native(String),
}

impl ContinuationToken {
    /// Classifies `token`. This never fails; unrecognized tokens are [`ContinuationToken::Native`].
    pub fn parse(token: &str) -> ContinuationToken {
        if let Ok(take) = serde_json::from_str::<TakeContinuationToken>(token) {
            return ContinuationToken::Take(take);
        }
        if let Ok(order_by) = serde_json::from_str::<Vec<OrderByContinuationToken>>(token) {
            if !order_by.is_empty() {
                return ContinuationToken::OrderBy(order_by);
            }
        }
        if let Ok(composite) = serde_json::from_str::<Vec<CompositeContinuationToken>>(token) {
            if !composite.is_empty() {
                return ContinuationToken::Composite(composite);
            }
        }
        ContinuationToken::Native(token.to_string())
    }

    /// Returns `true` if this token can only have been produced by a cross-partition pipeline.
    pub fn is_cross_partition(&self) -> bool {
        !matches!(self, ContinuationToken::Native(_))
    }

    /// Encodes this token into the string handed to callers.
    pub fn encode(&self) -> crate::Result<String> {
        let encoded = match self {
            ContinuationToken::Composite(ranges) => serde_json::to_string(ranges)?,
            ContinuationToken::OrderBy(inputs) => serde_json::to_string(inputs)?,
            ContinuationToken::Take(take) => serde_json::to_string(take)?,
            ContinuationToken::Native(token) => token.clone(),
        };
        Ok(encoded)
    }

    /// Unwraps a composite token, failing if the token has another shape.
    pub(crate) fn into_composite(self) -> crate::Result<Vec<CompositeContinuationToken>> {
        match self {
            ContinuationToken::Composite(ranges) => Ok(ranges),
            other => Err(unexpected_shape("an unordered cross-partition", &other)),
        }
    }

    /// Unwraps an `ORDER BY` token, failing if the token has another shape.
    pub(crate) fn into_order_by(self) -> crate::Result<Vec<OrderByContinuationToken>> {
        match self {
            ContinuationToken::OrderBy(inputs) => Ok(inputs),
            other => Err(unexpected_shape("an ORDER BY", &other)),
        }
    }

    fn shape_name(&self) -> &'static str {
        match self {
            ContinuationToken::Composite(_) => "composite",
            ContinuationToken::OrderBy(_) => "ORDER BY",
            ContinuationToken::Take(_) => "TOP",
            ContinuationToken::Native(_) => "single partition",
        }
    }
}

fn unexpected_shape(expected: &str, actual: &ContinuationToken) -> crate::Error {
    ErrorKind::MalformedContinuation.with_message(format!(
        "expected the continuation of {} query, but found a {} continuation",
        expected,
        actual.shape_name()
    ))
}
