//! Applicant status state machine.
//!
//! ```text
//! pending ──► approved ◄──► rejected
//!    └──────────────────────►─┘
//! approved ──(promotion only)──► completed   (no way out)
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{LifecycleError, Result};
use crate::models::ApplicantStatus;
use crate::store::ApplicantStore;

/// Whether an administrator may move an applicant from `from` to `to`.
/// `completed` is never a legal administrative target.
pub fn is_legal(from: ApplicantStatus, to: ApplicantStatus) -> bool {
    use ApplicantStatus::*;
    matches!(
        (from, to),
        (Pending, Approved) | (Pending, Rejected) | (Approved, Rejected) | (Rejected, Approved)
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Changed {
        from: ApplicantStatus,
        to: ApplicantStatus,
    },
    /// Already in the requested status; nothing was written.
    Unchanged(ApplicantStatus),
}

impl Transition {
    pub fn affected(&self) -> usize {
        match self {
            Transition::Changed { .. } => 1,
            Transition::Unchanged(_) => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkAction {
    Approve,
    Reject,
    Delete,
}

impl BulkAction {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "approve" => Ok(BulkAction::Approve),
            "reject" => Ok(BulkAction::Reject),
            "delete" => Ok(BulkAction::Delete),
            _ => Err(LifecycleError::Validation("Invalid bulk action".to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BulkAction::Approve => "approve",
            BulkAction::Reject => "reject",
            BulkAction::Delete => "delete",
        }
    }
}

impl fmt::Display for BulkAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BulkReport {
    pub affected: usize,
    pub failures: Vec<(i64, String)>,
}

pub struct TransitionEngine {
    store: Arc<ApplicantStore>,
}

impl TransitionEngine {
    pub fn new(store: Arc<ApplicantStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<ApplicantStore> {
        &self.store
    }

    /// Applies an administrative status change. Requesting the current
    /// status is a successful no-op.
    pub fn transition(&self, id: i64, target: ApplicantStatus) -> Result<Transition> {
        let from = self.store.get_fresh(id)?.status;

        if from == ApplicantStatus::Completed {
            warn!(applicant_id = id, %target, "refused transition out of completed");
            return Err(LifecycleError::Validation(format!(
                "Applicant #{} has been promoted and can no longer change status",
                id
            )));
        }
        if from == target {
            return Ok(Transition::Unchanged(from));
        }
        if !is_legal(from, target) {
            warn!(applicant_id = id, %from, %target, "refused illegal transition");
            return Err(LifecycleError::Validation(format!(
                "Cannot change applicant status from {} to {}",
                from, target
            )));
        }

        if self.store.update_status(id, from, target)? == 0 {
            return Err(self.lost_race(id, from));
        }
        info!(applicant_id = id, %from, to = %target, "applicant status changed");
        Ok(Transition::Changed { from, to: target })
    }

    /// The only path into `completed`. Called by the promotion service once
    /// every promotion side effect has succeeded.
    pub(crate) fn mark_completed(&self, id: i64) -> Result<()> {
        let applicant = self.store.get_fresh(id)?;
        if applicant.status != ApplicantStatus::Approved {
            return Err(LifecycleError::Validation(format!(
                "Applicant #{} is {}, only approved applicants can be completed",
                id, applicant.status
            )));
        }
        if self
            .store
            .update_status(id, ApplicantStatus::Approved, ApplicantStatus::Completed)?
            == 0
        {
            return Err(self.lost_race(id, ApplicantStatus::Approved));
        }
        info!(applicant_id = id, "applicant completed");
        Ok(())
    }

    /// The conditional write matched nothing: the row was deleted or moved
    /// out of `expected` by another writer.
    fn lost_race(&self, id: i64, expected: ApplicantStatus) -> LifecycleError {
        match self.store.get_fresh(id) {
            Ok(current) => {
                warn!(applicant_id = id, %expected, now = %current.status, "status changed underneath");
                LifecycleError::Validation(format!(
                    "Applicant #{} is now {}, the change was not applied",
                    id, current.status
                ))
            }
            Err(e) => e,
        }
    }

    pub fn delete(&self, id: i64) -> Result<usize> {
        let ids: BTreeSet<i64> = [id].into_iter().collect();
        self.store.delete(&ids)
    }

    /// Applies `action` to each id independently. One id failing does not
    /// stop the rest.
    pub fn bulk(&self, action: BulkAction, ids: &BTreeSet<i64>) -> BulkReport {
        let mut report = BulkReport::default();
        for id in ids {
            let result = match action {
                BulkAction::Approve => self
                    .transition(*id, ApplicantStatus::Approved)
                    .map(|t| t.affected()),
                BulkAction::Reject => self
                    .transition(*id, ApplicantStatus::Rejected)
                    .map(|t| t.affected()),
                BulkAction::Delete => self.delete(*id),
            };
            match result {
                Ok(affected) => report.affected += affected,
                Err(e) => {
                    warn!(applicant_id = *id, %action, error = %e, "bulk item failed");
                    report.failures.push((*id, e.to_string()));
                }
            }
        }
        report
    }
}
