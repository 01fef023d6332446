// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

use serde::{Deserialize, Serialize};

/// Resume state for a `TOP`/`LIMIT` query: the token of the stage it wraps, and how many items are still allowed.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TakeContinuationToken {
    pub token: String,
    pub remaining: u64,
}
