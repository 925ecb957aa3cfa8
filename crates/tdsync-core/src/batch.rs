use crate::error::{Result, SyncError};
use serde::Serialize;

/// What to do when one item of a batch fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPolicy {
    /// Abort the batch and return the first error.
    FailFast,
    /// Record the failure and continue with the next item.
    BestEffort,
}

/// Successful outcome of a single item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Done(String),
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemOutcome {
    pub item: String,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub succeeded: Vec<ItemOutcome>,
    pub skipped: Vec<ItemOutcome>,
    pub failed: Vec<ItemOutcome>,
}

impl BatchReport {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn record_failure(&mut self, item: impl Into<String>, error: &SyncError) {
        self.failed.push(ItemOutcome {
            item: item.into(),
            detail: error.to_string(),
        });
    }
}

/// Run `op` over `items` in order, applying `policy` to failures.
///
/// `describe` names an item in logs and in the report.
pub fn process_batch<T, D, F>(
    items: impl IntoIterator<Item = T>,
    policy: BatchPolicy,
    describe: D,
    mut op: F,
) -> Result<BatchReport>
where
    D: Fn(&T) -> String,
    F: FnMut(&T) -> Result<Step>,
{
    let mut report = BatchReport::default();
    for item in items {
        let name = describe(&item);
        match op(&item) {
            Ok(Step::Done(detail)) => {
                tracing::info!("{name}: {detail}");
                report.succeeded.push(ItemOutcome { item: name, detail });
            }
            Ok(Step::Skipped(reason)) => {
                tracing::warn!("skipping {name}: {reason}");
                report.skipped.push(ItemOutcome {
                    item: name,
                    detail: reason,
                });
            }
            Err(e) if policy == BatchPolicy::FailFast => return Err(e),
            Err(e) => {
                tracing::error!("{name}: {e}");
                report.record_failure(name, &e);
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(n: &u32) -> Result<Step> {
        match *n {
            0 => Ok(Step::Skipped("zero".into())),
            n if n % 2 == 1 => Err(SyncError::Validation(format!("{n} is odd"))),
            n => Ok(Step::Done(format!("{n} ok"))),
        }
    }

    #[test]
    fn best_effort_collects_failures_and_continues() {
        let report =
            process_batch([2u32, 3, 0, 4, 5], BatchPolicy::BestEffort, |n| n.to_string(), op)
                .unwrap();
        assert_eq!(report.succeeded.len(), 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.failed[0].item, "3");
        assert!(report.failed[1].detail.contains("5 is odd"));
        assert!(report.has_failures());
    }

    #[test]
    fn fail_fast_stops_at_first_error() {
        let mut seen = Vec::new();
        let err = process_batch(
            [2u32, 3, 4],
            BatchPolicy::FailFast,
            |n| n.to_string(),
            |n| {
                seen.push(*n);
                op(n)
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("3 is odd"));
        assert_eq!(seen, vec![2, 3]);
    }

    #[test]
    fn empty_batch_is_clean() {
        let report = process_batch(
            Vec::<u32>::new(),
            BatchPolicy::BestEffort,
            |n| n.to_string(),
            op,
        )
        .unwrap();
        assert_eq!(report, BatchReport::default());
        assert!(!report.has_failures());
    }
}
