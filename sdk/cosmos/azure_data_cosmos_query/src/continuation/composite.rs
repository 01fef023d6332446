// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

use serde::{Deserialize, Serialize};

use crate::models::{PartitionKeyRange, RangeBounds};

/// Resume state for one partition key range of an unordered cross-partition query.
///
/// The full token is a JSON array of these, ordered by range. The first entry is the range to
/// resume from; ranges before it are finished. Any later entry records a range that already has a
/// backend continuation (for example, a sibling created by a split); unlisted ranges after the
/// first entry start from the beginning.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CompositeContinuationToken {
    pub token: Option<String>,
    pub range: RangeBounds,
}

impl CompositeContinuationToken {
    pub fn new(range: &PartitionKeyRange, token: Option<String>) -> Self {
        Self {
            token,
            range: range.bounds(),
        }
    }
}
