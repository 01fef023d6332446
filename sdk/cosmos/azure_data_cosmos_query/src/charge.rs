// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

//! Request charge accounting shared by the producers feeding one merge stage.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Accumulates the request charge of every page fetched by a merge stage.
///
/// Clones share the same accumulator. Producers [`add`](Self::add) the charge of every page they receive,
/// including pages that are never shown to the caller, and the merge stage [`drain`](Self::drain)s it
/// whenever it emits a page. This attributes the cost of filtered pages to the next visible page.
///
/// The value is stored as the bit pattern of an `f64` so that updates are atomic when a merge
/// stage fetches from several partitions concurrently.
#[derive(Clone, Debug, Default)]
pub struct RequestChargeTracker {
    bits: Arc<AtomicU64>,
}

impl RequestChargeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `charge` to the accumulated total.
    pub fn add(&self, charge: f64) {
        // The update closure always returns `Some`, so this never fails.
        self.bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some((f64::from_bits(bits) + charge).to_bits())
            })
            .ok();
    }

    /// Gets the accumulated total without resetting it.
    pub fn peek(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Returns the accumulated total and resets it to zero.
    pub fn drain(&self) -> f64 {
        f64::from_bits(self.bits.swap(0.0f64.to_bits(), Ordering::AcqRel))
    }
}
