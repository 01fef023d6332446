// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

//! Error types for query execution.

use std::{borrow::Cow, fmt};

use crate::models::QueryPlan;

/// A specialized [`Result`](std::result::Result) type for query execution.
pub type Result<T> = std::result::Result<T, Error>;

/// The category of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The partition key range targeted by a request has been split.
    ///
    /// Raised by a [`PageFetcher`](crate::PageFetcher); the engine recovers by replacing the range with its children.
    PartitionSplit,

    /// The partition key range targeted by a request no longer exists.
    PartitionKeyRangeGone,

    /// The routing information used for a request is stale.
    InvalidPartition,

    /// The gateway refused to serve the query against a single partition.
    ///
    /// Errors of this kind carry the query plan returned by the gateway, see [`Error::query_plan()`].
    CrossPartitionQueryNotServable,

    /// A continuation token could not be understood, either by the engine or by the service.
    MalformedContinuation,

    /// The query plan requires a feature this engine does not support.
    UnsupportedQueryPlan,

    /// The request was invalid.
    BadRequest,

    /// The service returned an error not covered by another kind.
    Service,

    /// A value could not be serialized or deserialized.
    Serialization,

    /// An invariant of the engine was violated.
    InternalError,
}

impl ErrorKind {
    /// Creates an [`Error`] of this kind with the provided message.
    pub fn with_message(self, message: impl Into<Cow<'static, str>>) -> Error {
        Error {
            kind: self,
            message: Some(message.into()),
            source: None,
            query_plan: None,
        }
    }

    /// Returns `true` for kinds a service reports with a `400 Bad Request` status.
    pub fn is_bad_request(self) -> bool {
        matches!(
            self,
            ErrorKind::BadRequest
                | ErrorKind::MalformedContinuation
                | ErrorKind::UnsupportedQueryPlan
                | ErrorKind::CrossPartitionQueryNotServable
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::PartitionSplit => "partition key range split",
            ErrorKind::PartitionKeyRangeGone => "partition key range gone",
            ErrorKind::InvalidPartition => "invalid partition",
            ErrorKind::CrossPartitionQueryNotServable => "cross partition query not servable",
            ErrorKind::MalformedContinuation => "malformed continuation token",
            ErrorKind::UnsupportedQueryPlan => "unsupported query plan",
            ErrorKind::BadRequest => "bad request",
            ErrorKind::Service => "service error",
            ErrorKind::Serialization => "serialization error",
            ErrorKind::InternalError => "internal error",
        };
        f.write_str(s)
    }
}

/// An error raised while executing a query.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<Cow<'static, str>>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
    query_plan: Option<Box<QueryPlan>>,
}

impl Error {
    /// Creates an error of the given kind, wrapping an underlying error.
    pub fn new(kind: ErrorKind, source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self {
            kind,
            message: None,
            source: Some(source.into()),
            query_plan: None,
        }
    }

    /// Creates a [`ErrorKind::CrossPartitionQueryNotServable`] error carrying the plan returned by the gateway.
    pub fn query_not_servable(plan: QueryPlan) -> Self {
        Self {
            kind: ErrorKind::CrossPartitionQueryNotServable,
            message: Some(
                "the provided cross partition query can not be directly served by the gateway"
                    .into(),
            ),
            source: None,
            query_plan: Some(Box::new(plan)),
        }
    }

    /// Gets the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Gets the message attached to this error, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Gets the query plan attached to a [`ErrorKind::CrossPartitionQueryNotServable`] error.
    pub fn query_plan(&self) -> Option<&QueryPlan> {
        self.query_plan.as_deref()
    }

    /// Takes the query plan out of this error, if one is attached.
    pub fn into_query_plan(self) -> Option<QueryPlan> {
        self.query_plan.map(|p| *p)
    }

    /// Returns `true` if this error indicates stale routing that a refresh-and-retry can resolve.
    pub fn is_retryable_routing(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::InvalidPartition | ErrorKind::PartitionKeyRangeGone
        )
    }

    /// Re-labels this error with a different kind, keeping the message and source.
    pub(crate) fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.message, &self.source) {
            (Some(message), _) => write!(f, "{}: {}", self.kind, message),
            (None, Some(source)) => write!(f, "{}: {}", self.kind, source),
            (None, None) => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| &**e as &(dyn std::error::Error + 'static))
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
            query_plan: None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::new(ErrorKind::Serialization, error)
    }
}
