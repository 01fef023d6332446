// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

//! Combines per-partition partial aggregates for `SELECT VALUE <aggregate>(...)` queries.

use std::{cmp::Ordering, str::FromStr};

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    comparison::compare_values,
    context::{ExecutionContext, ResultPage},
    models::accumulate_metrics,
    ErrorKind,
};

/// An aggregate operator the gateway can ask the client to finish.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AggregateOperator {
    Average,
    Count,
    Max,
    Min,
    Sum,
}

impl FromStr for AggregateOperator {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "average" | "avg" => Ok(AggregateOperator::Average),
            "count" => Ok(AggregateOperator::Count),
            "max" => Ok(AggregateOperator::Max),
            "min" => Ok(AggregateOperator::Min),
            "sum" => Ok(AggregateOperator::Sum),
            _ => Err(ErrorKind::UnsupportedQueryPlan
                .with_message(format!("unsupported aggregate operator: {}", s))),
        }
    }
}

/// A running numeric sum that stays integral for as long as every term is an integer.
#[derive(Clone, Copy, Debug, Default)]
struct Sum {
    integer: i64,
    float: f64,
    is_float: bool,
}

impl Sum {
    fn add(&mut self, value: &serde_json::Number) {
        if !self.is_float {
            if let Some(total) = value.as_i64().and_then(|v| self.integer.checked_add(v)) {
                self.integer = total;
                return;
            }
            self.is_float = true;
            self.float = self.integer as f64;
        }
        self.float += value.as_f64().unwrap_or_default();
    }

    fn as_f64(&self) -> f64 {
        if self.is_float {
            self.float
        } else {
            self.integer as f64
        }
    }

    fn into_value(self) -> Value {
        if self.is_float {
            Value::from(self.float)
        } else {
            Value::from(self.integer)
        }
    }
}

#[derive(Debug)]
enum Accumulator {
    Average { sum: Sum, count: u64 },
    Count(Sum),
    Extreme { operator: AggregateOperator, best: Option<Value> },
    Sum(Option<Sum>),
}

impl Accumulator {
    fn new(operator: AggregateOperator) -> Self {
        match operator {
            AggregateOperator::Average => Accumulator::Average {
                sum: Sum::default(),
                count: 0,
            },
            AggregateOperator::Count => Accumulator::Count(Sum::default()),
            AggregateOperator::Max | AggregateOperator::Min => Accumulator::Extreme {
                operator,
                best: None,
            },
            AggregateOperator::Sum => Accumulator::Sum(None),
        }
    }

    fn add(&mut self, partial: Value) -> crate::Result<()> {
        match self {
            Accumulator::Average { sum, count } => match partial {
                Value::Object(fields) => {
                    let partial_count = fields.get("count").and_then(Value::as_u64).unwrap_or(0);
                    if let Some(Value::Number(partial_sum)) = fields.get("sum") {
                        if partial_count > 0 {
                            sum.add(partial_sum);
                            *count += partial_count;
                        }
                    }
                }
                Value::Number(n) => {
                    sum.add(&n);
                    *count += 1;
                }
                other => return Err(unexpected_partial("AVG", &other)),
            },
            Accumulator::Count(total) => match partial {
                Value::Number(n) => total.add(&n),
                other => return Err(unexpected_partial("COUNT", &other)),
            },
            Accumulator::Extreme { operator, best } => {
                let wanted = match operator {
                    AggregateOperator::Min => Ordering::Less,
                    _ => Ordering::Greater,
                };
                let replace = match best {
                    Some(current) => compare_values(Some(&partial), Some(&*current)) == wanted,
                    None => true,
                };
                if replace {
                    *best = Some(partial);
                }
            }
            Accumulator::Sum(total) => match partial {
                Value::Number(n) => total.get_or_insert_with(Sum::default).add(&n),
                other => return Err(unexpected_partial("SUM", &other)),
            },
        }
        Ok(())
    }

    fn finish(self) -> Option<Value> {
        match self {
            Accumulator::Average { sum, count } => {
                (count > 0).then(|| Value::from(sum.as_f64() / count as f64))
            }
            Accumulator::Count(total) => Some(total.into_value()),
            Accumulator::Extreme { best, .. } => best,
            Accumulator::Sum(total) => total.map(Sum::into_value),
        }
    }
}

fn unexpected_partial(operator: &str, partial: &Value) -> crate::Error {
    ErrorKind::Serialization.with_message(format!(
        "unexpected partial result for {}: {}",
        operator, partial
    ))
}

/// Strips the wrappers the backend puts around partial aggregates.
///
/// Partials arrive as `[{"item": v}]`, `{"item": v}` or bare values. An empty object or array
/// means the aggregate was undefined in that partition.
fn unwrap_partial(value: Value) -> Option<Value> {
    match value {
        Value::Array(mut items) if items.len() == 1 => items.pop().and_then(unwrap_partial),
        Value::Array(items) if items.is_empty() => None,
        Value::Object(mut fields) if fields.contains_key("item") => fields.remove("item"),
        Value::Object(fields) if fields.is_empty() => None,
        other => Some(other),
    }
}

/// Drains the wrapped stage and emits a single page holding the combined aggregate.
pub(crate) struct AggregateExecutionContext {
    inner: Box<dyn ExecutionContext>,
    operator: AggregateOperator,
    finished: bool,
}

impl AggregateExecutionContext {
    pub fn new(inner: Box<dyn ExecutionContext>, operator: AggregateOperator) -> Self {
        Self {
            inner,
            operator,
            finished: false,
        }
    }
}

#[async_trait]
impl ExecutionContext for AggregateExecutionContext {
    #[tracing::instrument(level = "debug", skip_all, err, fields(operator = ?self.operator))]
    async fn next_page(&mut self) -> crate::Result<Option<ResultPage>> {
        if self.finished {
            return Ok(None);
        }

        let mut accumulator = Accumulator::new(self.operator);
        let mut result = ResultPage::default();
        let mut partials = 0usize;
        while let Some(page) = self.inner.next_page().await? {
            result.request_charge += page.request_charge;
            accumulate_metrics(&mut result.query_metrics, page.query_metrics.as_ref());
            if page.activity_id.is_some() {
                result.activity_id = page.activity_id;
            }
            for partial in page.items.into_iter().filter_map(unwrap_partial) {
                accumulator.add(partial)?;
                partials += 1;
            }
        }
        self.finished = true;

        tracing::debug!(partials, "combined partial aggregates");
        result.items.extend(accumulator.finish());
        Ok(Some(result))
    }

    fn set_item_budget(&mut self, budget: usize) {
        self.inner.set_item_budget(budget);
    }
}
