// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    charge::RequestChargeTracker,
    context::{ExecutionContext, ResultPage},
    continuation::{CompositeContinuationToken, ContinuationToken},
    models::{accumulate_metrics, EffectivePartitionKey, PartitionKeyRange, QueryMetrics},
    producer::{FetchContext, PartitionProducer, ProducerQueue, SourcedPage},
    ErrorKind,
};

/// Runs an unordered query over several partition key ranges, one range after the other.
///
/// Results are the concatenation of each range's results, in range order. Empty backend pages are
/// not emitted; their charge is reported with the next page that is.
pub(crate) struct ParallelExecutionContext {
    queues: Vec<ProducerQueue>,
    current: usize,
    charges: RequestChargeTracker,
    query_metrics: Option<QueryMetrics>,
    activity_id: Option<String>,
    finished: bool,
}

impl ParallelExecutionContext {
    /// Creates a context over `ranges`, which must be sorted, optionally resuming from `resume`.
    pub fn new(
        context: Arc<FetchContext>,
        ranges: Vec<PartitionKeyRange>,
        resume: Option<Vec<CompositeContinuationToken>>,
        page_size: usize,
    ) -> crate::Result<Self> {
        let charges = context.charges.clone();
        let queues = resume_ranges(ranges, resume)?
            .into_iter()
            .map(|(range, token)| {
                ProducerQueue::new(PartitionProducer::new(
                    context.clone(),
                    range,
                    token,
                    page_size,
                ))
            })
            .collect();
        Ok(Self {
            queues,
            current: 0,
            charges,
            query_metrics: None,
            activity_id: None,
            finished: false,
        })
    }

    /// Builds the token that resumes right after the last emitted page.
    ///
    /// The first entry is the range currently being drained. Later ranges are only listed when
    /// they already hold a backend continuation; the rest restart from scratch on resume.
    fn continuation(&self) -> crate::Result<Option<String>> {
        let mut entries = Vec::new();
        for producer in self.queues[self.current..]
            .iter()
            .flat_map(|queue| queue.pending())
        {
            if entries.is_empty() || producer.continuation().is_some() {
                entries.push(CompositeContinuationToken::new(
                    producer.range(),
                    producer.continuation().map(str::to_string),
                ));
            }
        }

        if entries.is_empty() {
            return Ok(None);
        }
        Ok(Some(ContinuationToken::Composite(entries).encode()?))
    }
}

/// Pairs each target range with the backend continuation it resumes from.
fn resume_ranges(
    ranges: Vec<PartitionKeyRange>,
    resume: Option<Vec<CompositeContinuationToken>>,
) -> crate::Result<Vec<(PartitionKeyRange, Option<String>)>> {
    let Some(tokens) = resume else {
        return Ok(ranges.into_iter().map(|range| (range, None)).collect());
    };
    let Some(first) = tokens.first() else {
        return Err(ErrorKind::MalformedContinuation.with_message("continuation lists no ranges"));
    };
    if !ranges.iter().any(|range| range.overlaps(&first.range)) {
        return Err(ErrorKind::MalformedContinuation.with_message(format!(
            "continuation range [{}, {}) does not overlap any target range",
            first.range.min, first.range.max
        )));
    }

    Ok(ranges
        .into_iter()
        // Ranges that end before the first listed range were finished.
        .filter(|range| {
            EffectivePartitionKey(&range.max_exclusive) > EffectivePartitionKey(&first.range.min)
        })
        .map(|range| {
            let token = tokens
                .iter()
                .find(|entry| range.overlaps(&entry.range))
                .and_then(|entry| entry.token.clone());
            (range, token)
        })
        .collect())
}

#[async_trait]
impl ExecutionContext for ParallelExecutionContext {
    #[tracing::instrument(level = "debug", skip_all, err)]
    async fn next_page(&mut self) -> crate::Result<Option<ResultPage>> {
        if self.finished {
            return Ok(None);
        }

        loop {
            let Some(queue) = self.queues.get_mut(self.current) else {
                self.finished = true;
                let request_charge = self.charges.drain();
                if request_charge > 0.0 || self.query_metrics.is_some() {
                    // Empty pages were fetched after the last emitted one; report what they cost.
                    return Ok(Some(ResultPage {
                        items: Vec::new(),
                        request_charge,
                        continuation: None,
                        query_metrics: self.query_metrics.take(),
                        activity_id: self.activity_id.take(),
                    }));
                }
                return Ok(None);
            };

            let Some(SourcedPage { page, range }) = queue.next_page().await? else {
                tracing::debug!(splits = queue.split_count(), "range drained");
                self.current += 1;
                continue;
            };

            accumulate_metrics(&mut self.query_metrics, page.query_metrics.as_ref());
            if page.activity_id.is_some() {
                self.activity_id = page.activity_id;
            }
            if page.items.is_empty() {
                tracing::trace!(pkrange_id = %range.id, "skipping empty page");
                continue;
            }

            let continuation = self.continuation()?;
            return Ok(Some(ResultPage {
                items: page.items,
                request_charge: self.charges.drain(),
                continuation,
                query_metrics: self.query_metrics.take(),
                activity_id: self.activity_id.take(),
            }));
        }
    }

    fn set_item_budget(&mut self, budget: usize) {
        for queue in &mut self.queues {
            queue.set_item_budget(budget);
        }
    }
}
