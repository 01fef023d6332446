// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

//! Model types exchanged between the engine and its collaborators.

mod page;
mod partition_key_range;
mod query_plan;

pub use page::*;
pub use partition_key_range::*;
pub use query_plan::*;

pub(crate) use page::accumulate_metrics;
pub(crate) use partition_key_range::EffectivePartitionKey;
