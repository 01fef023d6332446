// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

//! Constants used by the query engine.

/// The page size requested from each partition when the caller doesn't specify one.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Multiplier applied to the per-partition share of a `TOP` when sizing the first `ORDER BY` pages.
pub const TOP_PAGE_SIZE_FACTOR: usize = 5;

/// The number of times a request is retried after a stale-routing error.
pub const DEFAULT_MAX_ROUTING_RETRIES: u32 = 1;

/// The lowest effective partition key, inclusive.
pub const MIN_INCLUSIVE_EFFECTIVE_PARTITION_KEY: &str = "";

/// The highest effective partition key, exclusive.
pub const MAX_EXCLUSIVE_EFFECTIVE_PARTITION_KEY: &str = "FF";

/// Placeholder the gateway leaves in rewritten `ORDER BY` queries for a resume filter.
pub(crate) const ORDER_BY_FILTER_PLACEHOLDER: &str = "{documentdb-formattableorderbyquery-filter}";
