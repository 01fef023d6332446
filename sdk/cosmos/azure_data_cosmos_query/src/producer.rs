// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

//! Per-partition page fetching, with split recovery.
//!
//! A [`PartitionProducer`] fetches successive pages from one partition key range. When the service
//! reports that the range has split, the producer resolves the replacement ranges and hands back
//! one child producer per replacement; it is never used again after that.
//!
//! [`ProducerQueue`] turns a producer into a single ordered page sequence that survives any number
//! of splits: producers live in slots of an arena, and a work-list of slot indices decides which
//! one to drain next. A split marks the slot as superseded and puts its children at the front of
//! the work-list, in range order, so they are drained one after the other before anything that
//! was queued behind their parent.

use std::{collections::VecDeque, sync::Arc};

use crate::{
    charge::RequestChargeTracker,
    client::{PageFetcher, PageRequest, PartitionKeyRangeResolver, RequestTarget},
    models::{Page, PartitionKeyRange, QueryRange},
    retry::{fetch_with_retry, RetryPolicyFactory, SplitHandling},
    ErrorKind, Query,
};

/// State shared by every producer of one pipeline.
pub(crate) struct FetchContext {
    pub collection: String,

    /// The per-partition query, as rewritten by the gateway.
    pub query: Query,
    pub fetcher: Arc<dyn PageFetcher>,
    pub resolver: Arc<dyn PartitionKeyRangeResolver>,
    pub retry_policies: Arc<dyn RetryPolicyFactory>,
    pub charges: RequestChargeTracker,
}

/// The result of asking a [`PartitionProducer`] for its next page.
pub(crate) enum ProducerOutcome {
    Page(Page),

    /// The range split. The producer must be replaced by these children, ordered by range.
    Split(Vec<PartitionProducer>),
}

/// Fetches pages for one partition key range until the service reports no further continuation.
pub(crate) struct PartitionProducer {
    context: Arc<FetchContext>,
    range: PartitionKeyRange,
    continuation: Option<String>,
    page_size: usize,
    first_page_size: Option<usize>,
    item_budget: Option<usize>,
    exhausted: bool,
}

impl PartitionProducer {
    pub fn new(
        context: Arc<FetchContext>,
        range: PartitionKeyRange,
        continuation: Option<String>,
        page_size: usize,
    ) -> Self {
        Self {
            context,
            range,
            continuation,
            page_size,
            first_page_size: None,
            item_budget: None,
            exhausted: false,
        }
    }

    /// Uses a different page size for the first request only.
    pub fn with_first_page_size(mut self, first_page_size: usize) -> Self {
        self.first_page_size = Some(first_page_size);
        self
    }

    pub fn range(&self) -> &PartitionKeyRange {
        &self.range
    }

    /// The continuation the next request will send.
    pub fn continuation(&self) -> Option<&str> {
        self.continuation.as_deref()
    }

    /// Returns `true` once the range has no more pages, or the item budget has been used up.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted || self.item_budget == Some(0)
    }

    /// Limits the number of items this producer will fetch from now on.
    pub fn set_item_budget(&mut self, budget: usize) {
        self.item_budget = Some(budget);
    }

    fn next_page_size(&mut self) -> usize {
        let size = self.first_page_size.take().unwrap_or(self.page_size);
        match self.item_budget {
            Some(budget) => size.min(budget),
            None => size,
        }
        .max(1)
    }

    #[tracing::instrument(level = "debug", skip_all, err, fields(pkrange_id = %self.range.id))]
    pub async fn fetch_next(&mut self) -> crate::Result<ProducerOutcome> {
        if self.is_exhausted() {
            return Err(ErrorKind::InternalError
                .with_message("attempted to fetch from an exhausted partition producer"));
        }

        let page_size = self.next_page_size();
        let result = {
            let request = PageRequest {
                collection: &self.context.collection,
                query: &self.context.query,
                target: RequestTarget::Range(&self.range),
                continuation: self.continuation.as_deref(),
                page_size,
            };
            tracing::debug!(continuation = ?request.continuation, page_size, "fetching page");
            fetch_with_retry(
                self.context.fetcher.as_ref(),
                &request,
                self.context.retry_policies.as_ref(),
                SplitHandling::Surface,
            )
            .await
        };

        match result {
            Ok(page) => {
                self.context.charges.add(page.request_charge);
                self.continuation = page.continuation.clone();
                self.exhausted = self.continuation.is_none();
                if let Some(budget) = self.item_budget.as_mut() {
                    *budget = budget.saturating_sub(page.items.len());
                }
                tracing::debug!(
                    item_count = page.items.len(),
                    request_charge = page.request_charge,
                    exhausted = self.exhausted,
                    "received page"
                );
                Ok(ProducerOutcome::Page(page))
            }
            Err(e) if e.kind() == ErrorKind::PartitionSplit => {
                Ok(ProducerOutcome::Split(self.split_children().await?))
            }
            Err(e) => Err(e),
        }
    }

    /// Builds one producer per range that replaced this one.
    ///
    /// Every child starts from this producer's last continuation and keeps its remaining item budget.
    async fn split_children(&self) -> crate::Result<Vec<PartitionProducer>> {
        let mut replacements = self
            .context
            .resolver
            .resolve_overlapping_ranges(
                &self.context.collection,
                &QueryRange::from(self.range.bounds()),
                true,
            )
            .await?;
        replacements.sort();

        if replacements.is_empty() {
            return Err(ErrorKind::PartitionKeyRangeGone.with_message(format!(
                "no partition key ranges replace split range {}",
                self.range.id
            )));
        }
        if replacements.len() == 1 && replacements[0] == self.range {
            return Err(ErrorKind::PartitionKeyRangeGone.with_message(format!(
                "partition key range {} reported a split, but routing information did not change",
                self.range.id
            )));
        }

        tracing::debug!(
            parent = %self.range.id,
            children = ?replacements.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            "partition key range split, replacing producer"
        );

        Ok(replacements
            .into_iter()
            .map(|range| PartitionProducer {
                context: self.context.clone(),
                range,
                continuation: self.continuation.clone(),
                page_size: self.page_size,
                first_page_size: None,
                item_budget: self.item_budget,
                exhausted: false,
            })
            .collect())
    }
}

/// A page, tagged with the range that produced it.
pub(crate) struct SourcedPage {
    pub page: Page,
    pub range: PartitionKeyRange,
}

enum ProducerSlot {
    Active(PartitionProducer),
    Superseded { children: Vec<usize> },
    Drained,
}

/// Drains one logical partition key range as a single page sequence, following splits.
pub(crate) struct ProducerQueue {
    slots: Vec<ProducerSlot>,
    work: VecDeque<usize>,
}

impl ProducerQueue {
    pub fn new(root: PartitionProducer) -> Self {
        Self {
            slots: vec![ProducerSlot::Active(root)],
            work: VecDeque::from([0]),
        }
    }

    /// The producers still to be drained, in drain order.
    pub fn pending(&self) -> impl Iterator<Item = &PartitionProducer> {
        self.work.iter().filter_map(|&index| match &self.slots[index] {
            ProducerSlot::Active(producer) if !producer.is_exhausted() => Some(producer),
            _ => None,
        })
    }

    /// Returns the number of producers created by splits since this queue was created.
    pub fn split_count(&self) -> usize {
        self.slots
            .iter()
            .map(|slot| match slot {
                ProducerSlot::Superseded { children } => children.len(),
                _ => 0,
            })
            .sum()
    }

    pub fn set_item_budget(&mut self, budget: usize) {
        for slot in &mut self.slots {
            if let ProducerSlot::Active(producer) = slot {
                producer.set_item_budget(budget);
            }
        }
    }

    /// Fetches the next page, or returns `None` once every range has been drained.
    pub async fn next_page(&mut self) -> crate::Result<Option<SourcedPage>> {
        loop {
            let Some(&index) = self.work.front() else {
                return Ok(None);
            };

            let producer = match &mut self.slots[index] {
                ProducerSlot::Active(producer) if !producer.is_exhausted() => producer,
                _ => {
                    self.slots[index] = ProducerSlot::Drained;
                    self.work.pop_front();
                    continue;
                }
            };

            match producer.fetch_next().await? {
                ProducerOutcome::Page(page) => {
                    let range = producer.range().clone();
                    if producer.is_exhausted() {
                        self.slots[index] = ProducerSlot::Drained;
                        self.work.pop_front();
                    }
                    return Ok(Some(SourcedPage { page, range }));
                }
                ProducerOutcome::Split(children) => {
                    self.work.pop_front();
                    let first = self.slots.len();
                    let indices: Vec<usize> = (first..first + children.len()).collect();
                    self.slots
                        .extend(children.into_iter().map(ProducerSlot::Active));
                    for &child in indices.iter().rev() {
                        self.work.push_front(child);
                    }
                    self.slots[index] = ProducerSlot::Superseded { children: indices };
                }
            }
        }
    }
}
