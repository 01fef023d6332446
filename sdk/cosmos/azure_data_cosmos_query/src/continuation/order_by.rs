// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::RangeBounds;

/// Resume state for one unfinished input of an `ORDER BY` merge.
///
/// `token` is the backend continuation that fetched the page the input was reading from, and
/// `order_by_items`/`rid` identify the last item consumed from that input. On resume the page is
/// fetched again and every item at or before the last consumed one is discarded.
/// Inputs that were fully consumed are not listed.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OrderByContinuationToken {
    pub token: Option<String>,
    pub range: RangeBounds,

    /// The raw `orderByItems` of the last consumed item, empty if nothing was consumed.
    pub order_by_items: Vec<Value>,

    /// The `_rid` of the last consumed item, which breaks ties between equal sort keys.
    pub rid: Option<String>,
}
