// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

use crate::{constants, ErrorKind};

/// Options to be passed to [`QueryExecutor::new()`](crate::QueryExecutor::new()).
#[derive(Clone, Debug)]
pub struct QueryOptions {
    /// The maximum number of items requested from a partition in one page. Defaults to [`DEFAULT_PAGE_SIZE`](constants::DEFAULT_PAGE_SIZE).
    pub max_item_count: Option<usize>,

    /// The number of partitions an `ORDER BY` merge may fetch from concurrently. Defaults to 1.
    pub max_degree_of_parallelism: usize,

    /// A continuation token, returned by a previous execution of the same query, to resume from.
    pub continuation: Option<String>,

    /// Targets the query to the partition holding this partition key.
    pub partition_key: Option<String>,

    /// Whether a query that needs to visit several partitions may be executed. Defaults to `true`.
    pub enable_cross_partition_query: bool,

    /// The number of times a request is retried after a stale-routing error. Defaults to [`DEFAULT_MAX_ROUTING_RETRIES`](constants::DEFAULT_MAX_ROUTING_RETRIES).
    pub max_routing_retries: u32,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            max_item_count: None,
            max_degree_of_parallelism: 1,
            continuation: None,
            partition_key: None,
            enable_cross_partition_query: true,
            max_routing_retries: constants::DEFAULT_MAX_ROUTING_RETRIES,
        }
    }
}

impl QueryOptions {
    /// Creates a new [`QueryOptionsBuilder`](QueryOptionsBuilder) that can be used to construct a [`QueryOptions`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// let options = azure_data_cosmos_query::QueryOptions::builder()
    ///     .with_max_item_count(25)
    ///     .build();
    /// assert_eq!(options.page_size(), 25);
    /// ```
    pub fn builder() -> QueryOptionsBuilder {
        QueryOptionsBuilder::default()
    }

    /// The page size to request from each partition.
    pub fn page_size(&self) -> usize {
        self.max_item_count.unwrap_or(constants::DEFAULT_PAGE_SIZE)
    }

    pub(crate) fn validate(&self) -> crate::Result<()> {
        if self.max_item_count == Some(0) {
            return Err(ErrorKind::BadRequest.with_message("max_item_count must be positive"));
        }
        if self.max_degree_of_parallelism == 0 {
            return Err(
                ErrorKind::BadRequest.with_message("max_degree_of_parallelism must be positive")
            );
        }
        Ok(())
    }
}

/// Builder used to construct a [`QueryOptions`].
///
/// Obtain a [`QueryOptionsBuilder`] by calling [`QueryOptions::builder()`]
#[derive(Default)]
pub struct QueryOptionsBuilder(QueryOptions);

impl QueryOptionsBuilder {
    pub fn with_max_item_count(mut self, max_item_count: usize) -> Self {
        self.0.max_item_count = Some(max_item_count);
        self
    }

    pub fn with_max_degree_of_parallelism(mut self, degree: usize) -> Self {
        self.0.max_degree_of_parallelism = degree;
        self
    }

    pub fn with_continuation(mut self, continuation: impl Into<String>) -> Self {
        self.0.continuation = Some(continuation.into());
        self
    }

    pub fn with_partition_key(mut self, partition_key: impl Into<String>) -> Self {
        self.0.partition_key = Some(partition_key.into());
        self
    }

    pub fn with_cross_partition_query(mut self, enabled: bool) -> Self {
        self.0.enable_cross_partition_query = enabled;
        self
    }

    pub fn with_max_routing_retries(mut self, retries: u32) -> Self {
        self.0.max_routing_retries = retries;
        self
    }

    /// Builds a [`QueryOptions`] from the builder.
    ///
    /// This does not consume the builder, and can be called multiple times.
    pub fn build(&self) -> QueryOptions {
        self.0.clone()
    }
}
