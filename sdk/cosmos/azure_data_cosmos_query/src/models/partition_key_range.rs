// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::constants;

/// A contiguous slice of the effective partition key space, owned by one physical partition.
///
/// Ranges are ordered by `min_inclusive`, which gives a total order over the ranges of a container.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionKeyRange {
    pub id: String,
    pub min_inclusive: String,
    pub max_exclusive: String,
}

impl PartitionKeyRange {
    pub fn new(
        id: impl Into<String>,
        min_inclusive: impl Into<String>,
        max_exclusive: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            min_inclusive: min_inclusive.into(),
            max_exclusive: max_exclusive.into(),
        }
    }

    /// Gets the bounds of this range, without its identity.
    pub fn bounds(&self) -> RangeBounds {
        RangeBounds {
            min: self.min_inclusive.clone(),
            max: self.max_exclusive.clone(),
        }
    }

    /// Returns `true` if this range shares at least one key with `bounds`.
    pub fn overlaps(&self, bounds: &RangeBounds) -> bool {
        EffectivePartitionKey(&self.min_inclusive) < EffectivePartitionKey(&bounds.max)
            && EffectivePartitionKey(&bounds.min) < EffectivePartitionKey(&self.max_exclusive)
    }
}

impl Ord for PartitionKeyRange {
    fn cmp(&self, other: &Self) -> Ordering {
        EffectivePartitionKey(&self.min_inclusive)
            .cmp(&EffectivePartitionKey(&other.min_inclusive))
            .then_with(|| {
                EffectivePartitionKey(&self.max_exclusive)
                    .cmp(&EffectivePartitionKey(&other.max_exclusive))
            })
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for PartitionKeyRange {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// An effective partition key, ordered as the service orders them.
///
/// Keys compare as strings, except for [`MAX_EXCLUSIVE_EFFECTIVE_PARTITION_KEY`](constants::MAX_EXCLUSIVE_EFFECTIVE_PARTITION_KEY),
/// which marks the end of the key space and sorts after every other key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct EffectivePartitionKey<'a>(pub &'a str);

impl Ord for EffectivePartitionKey<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        let max = constants::MAX_EXCLUSIVE_EFFECTIVE_PARTITION_KEY;
        match (self.0 == max, other.0 == max) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => self.0.cmp(other.0),
        }
    }
}

impl PartialOrd for EffectivePartitionKey<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The `[min, max)` bounds of a partition key range, as recorded in continuation tokens.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RangeBounds {
    pub min: String,
    pub max: String,
}

impl RangeBounds {
    pub fn new(min: impl Into<String>, max: impl Into<String>) -> Self {
        Self {
            min: min.into(),
            max: max.into(),
        }
    }
}

impl From<&PartitionKeyRange> for RangeBounds {
    fn from(range: &PartitionKeyRange) -> Self {
        range.bounds()
    }
}

/// A range of effective partition keys targeted by a query, with explicit inclusivity on both ends.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRange {
    pub min: String,
    pub max: String,
    pub is_min_inclusive: bool,
    pub is_max_inclusive: bool,
}

impl QueryRange {
    pub fn new(
        min: impl Into<String>,
        max: impl Into<String>,
        is_min_inclusive: bool,
        is_max_inclusive: bool,
    ) -> Self {
        Self {
            min: min.into(),
            max: max.into(),
            is_min_inclusive,
            is_max_inclusive,
        }
    }

    /// The range covering every effective partition key.
    pub fn full() -> Self {
        Self::new(
            constants::MIN_INCLUSIVE_EFFECTIVE_PARTITION_KEY,
            constants::MAX_EXCLUSIVE_EFFECTIVE_PARTITION_KEY,
            true,
            false,
        )
    }

    /// Returns `true` if `range`, which is always `[min_inclusive, max_exclusive)`, overlaps this query range.
    pub fn overlaps(&self, range: &PartitionKeyRange) -> bool {
        let (query_min, query_max) = (
            EffectivePartitionKey(&self.min),
            EffectivePartitionKey(&self.max),
        );
        let (range_min, range_max) = (
            EffectivePartitionKey(&range.min_inclusive),
            EffectivePartitionKey(&range.max_exclusive),
        );

        // Range ends before the query starts. The range never contains its own max, so equality is enough.
        if range_max <= query_min {
            return false;
        }

        // Query ends before the range starts.
        if query_max < range_min || (query_max == range_min && !self.is_max_inclusive) {
            return false;
        }

        true
    }
}

impl From<RangeBounds> for QueryRange {
    fn from(bounds: RangeBounds) -> Self {
        QueryRange::new(bounds.min, bounds.max, true, false)
    }
}
