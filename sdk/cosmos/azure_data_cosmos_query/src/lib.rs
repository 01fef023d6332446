// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

#![doc = include_str!("../README.md")]

mod charge;
mod client;
mod comparison;
pub mod constants;
mod context;
mod continuation;
mod error;
mod executor;
mod factory;
pub mod models;
mod options;
mod producer;
mod query;
mod retry;

pub use charge::RequestChargeTracker;
pub use client::{PageFetcher, PageRequest, PartitionKeyRangeResolver, QueryServices, RequestTarget};
pub use continuation::{
    CompositeContinuationToken, ContinuationToken, OrderByContinuationToken, TakeContinuationToken,
};
pub use error::{Error, ErrorKind, Result};
pub use executor::{QueryExecutor, QueryPage};
pub use options::{QueryOptions, QueryOptionsBuilder};
pub use query::{Query, QueryParameter};
pub use retry::{ClientRetryPolicy, ClientRetryPolicyFactory, RetryPolicy, RetryPolicyFactory};
