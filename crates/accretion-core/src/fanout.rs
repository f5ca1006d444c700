//! Region Fan-Out Orchestrator.
//!
//! Runs one [`RegionOperation`] per ledger region concurrently, bounded by a
//! semaphore. Each worker owns a copy of its region's record and hands it
//! back through its own result slot; the ledger is only written after every
//! worker has joined. A failing region never cancels its siblings.

use std::sync::Arc;

use accretion_state::{DeploymentLedger, RegionDeployment, StackId, StackSlot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, Instrument};

use crate::config::FanOutConfig;
use crate::domain::{AccretionError, ErrorKind, Result};
use crate::obs;

/// One observable effect of a region operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum SlotChange {
    Created { slot: StackSlot, stack_id: StackId },
    Updated { slot: StackSlot, stack_id: StackId },
    Unchanged { slot: StackSlot, stack_id: StackId },
    Destroyed { slot: StackSlot, stack_id: StackId },
    WorkflowStarted { slot: StackSlot, execution_id: String },
}

/// Work applied to every region of the ledger.
#[async_trait]
pub trait RegionOperation: Send + Sync {
    /// Short name used in logs and reports.
    fn name(&self) -> &str;

    /// Slot that must be set for the region to be worked on. Regions where
    /// it is unset are skipped with a warning.
    fn prerequisite(&self) -> Option<StackSlot> {
        None
    }

    /// Apply the operation to one region's record. Changes pushed before a
    /// failure are still reported.
    async fn apply(
        &self,
        region: &str,
        record: &mut RegionDeployment,
        changes: &mut Vec<SlotChange>,
    ) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RegionStatus {
    Completed {
        changes: Vec<SlotChange>,
    },
    Skipped {
        reason: String,
    },
    Failed {
        kind: ErrorKind,
        error: String,
        changes: Vec<SlotChange>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionOutcome {
    pub region: String,
    #[serde(flatten)]
    pub status: RegionStatus,
}

impl RegionOutcome {
    pub fn changes(&self) -> &[SlotChange] {
        match &self.status {
            RegionStatus::Completed { changes } | RegionStatus::Failed { changes, .. } => changes,
            RegionStatus::Skipped { .. } => &[],
        }
    }
}

/// Per-region results of one fan-out, in ledger region order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanOutReport {
    pub operation: String,
    pub outcomes: Vec<RegionOutcome>,
    pub generated_at: DateTime<Utc>,
}

impl FanOutReport {
    pub fn new(operation: impl Into<String>, outcomes: Vec<RegionOutcome>) -> Self {
        Self {
            operation: operation.into(),
            outcomes,
            generated_at: Utc::now(),
        }
    }

    pub fn outcome(&self, region: &str) -> Option<&RegionOutcome> {
        self.outcomes.iter().find(|o| o.region == region)
    }

    pub fn completed(&self) -> usize {
        self.count(|s| matches!(s, RegionStatus::Completed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, RegionStatus::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, RegionStatus::Failed { .. }))
    }

    /// No region failed. Skipped regions do not count against success.
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    fn count(&self, pred: impl Fn(&RegionStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }
}

/// Bounded-concurrency fan-out across ledger regions.
#[derive(Debug, Clone, Default)]
pub struct RegionFanOut {
    config: FanOutConfig,
}

impl RegionFanOut {
    pub fn new(config: FanOutConfig) -> Self {
        Self { config }
    }

    /// Run `operation` in every region and write each worker's final record
    /// back into `ledger`, including regions that failed part-way.
    pub async fn apply_to_all_regions(
        &self,
        ledger: &mut DeploymentLedger,
        operation: Arc<dyn RegionOperation>,
    ) -> Result<FanOutReport> {
        let regions: Vec<(String, RegionDeployment)> = ledger
            .iter()
            .map(|(region, record)| (region.to_string(), record.clone()))
            .collect();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));

        let mut join_set = JoinSet::new();
        for (idx, (region, record)) in regions.iter().cloned().enumerate() {
            let operation = Arc::clone(&operation);
            let semaphore = Arc::clone(&semaphore);
            let span = obs::region_span(operation.name(), &region);
            join_set.spawn(
                async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    let (record, status) = run_region(operation.as_ref(), &region, record).await;
                    (idx, record, status)
                }
                .instrument(span),
            );
        }

        let mut slots: Vec<Option<(RegionDeployment, RegionStatus)>> = vec![None; regions.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, record, status)) => slots[idx] = Some((record, status)),
                Err(e) => error!(operation = %operation.name(), error = %e, "region worker aborted"),
            }
        }

        let mut outcomes = Vec::with_capacity(regions.len());
        for ((region, _), slot) in regions.into_iter().zip(slots) {
            let _span = obs::RegionSpan::enter(operation.name(), &region);
            let status = match slot {
                Some((record, status)) => {
                    debug!(stacks = record.stacks().count(), "writing region record back");
                    ledger.replace_region(&region, record)?;
                    status
                }
                None => {
                    let err = AccretionError::Internal("region worker did not report".to_string());
                    obs::emit_region_failed(operation.name(), &region, &err);
                    RegionStatus::Failed {
                        kind: err.kind(),
                        error: err.to_string(),
                        changes: Vec::new(),
                    }
                }
            };
            outcomes.push(RegionOutcome { region, status });
        }

        Ok(FanOutReport::new(operation.name(), outcomes))
    }
}

async fn run_region(
    operation: &dyn RegionOperation,
    region: &str,
    mut record: RegionDeployment,
) -> (RegionDeployment, RegionStatus) {
    if let Some(slot) = operation.prerequisite().filter(|slot| !record.is_set(*slot)) {
        let reason = format!("{slot} stack is not deployed");
        obs::emit_region_skipped(operation.name(), region, &reason);
        return (record, RegionStatus::Skipped { reason });
    }

    let mut changes = Vec::new();
    let status = match operation.apply(region, &mut record, &mut changes).await {
        Ok(()) => RegionStatus::Completed { changes },
        Err(e) => {
            obs::emit_region_failed(operation.name(), region, &e);
            RegionStatus::Failed {
                kind: e.kind(),
                error: e.to_string(),
                changes,
            }
        }
    };
    (record, status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_counts_by_status() {
        let report = FanOutReport::new(
            "init",
            vec![
                RegionOutcome {
                    region: "a".into(),
                    status: RegionStatus::Completed { changes: vec![] },
                },
                RegionOutcome {
                    region: "b".into(),
                    status: RegionStatus::Skipped {
                        reason: "Core stack is not deployed".into(),
                    },
                },
                RegionOutcome {
                    region: "c".into(),
                    status: RegionStatus::Failed {
                        kind: ErrorKind::Provisioning,
                        error: "boom".into(),
                        changes: vec![],
                    },
                },
            ],
        );
        assert_eq!((report.completed(), report.skipped(), report.failed()), (1, 1, 1));
        assert!(!report.is_success());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcomes"][2]["status"], "failed");
        assert_eq!(json["outcomes"][2]["kind"], "provisioning");
    }
}
