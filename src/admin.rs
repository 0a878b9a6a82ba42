use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ITEMS_PER_PAGE;
use crate::error::{LifecycleError, Result};
use crate::gatekeeper::{ActionScope, Gatekeeper};
use crate::lifecycle::{BulkAction, TransitionEngine};
use crate::models::{Applicant, ApplicantStatus, Caller, Capability, RequestContext, Resume};
use crate::promotion::PromotionService;

/// An administrator request that changes applicant state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminAction {
    Approve(i64),
    Reject(i64),
    Delete(i64),
    SetStatus { id: i64, status: String },
    Promote(i64),
    Bulk { action: String, ids: Vec<i64> },
}

impl AdminAction {
    pub fn scope(&self) -> ActionScope {
        match self {
            AdminAction::Approve(id) => ActionScope::Approve(*id),
            AdminAction::Reject(id) => ActionScope::Reject(*id),
            AdminAction::Delete(id) => ActionScope::Delete(*id),
            AdminAction::SetStatus { id, .. } => ActionScope::SetStatus(*id),
            AdminAction::Promote(id) => ActionScope::Promote(*id),
            AdminAction::Bulk { .. } => ActionScope::Bulk,
        }
    }
}

/// The one message an administrator sees after an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub affected: usize,
    pub message: String,
}

impl ActionOutcome {
    fn ok(affected: usize, message: impl Into<String>) -> Self {
        Self {
            success: true,
            affected,
            message: message.into(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            affected: 0,
            message: message.into(),
        }
    }
}

/// One page of the applicant list with the per-status tab counts.
#[derive(Debug, Clone, Serialize)]
pub struct ApplicantPage {
    pub status: ApplicantStatus,
    pub page: usize,
    pub total: i64,
    pub total_pages: usize,
    pub applicants: Vec<Applicant>,
    pub counts: Vec<(ApplicantStatus, i64)>,
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "applicant" } else { "applicants" }
}

pub struct AdminConsole {
    gatekeeper: Arc<Gatekeeper>,
    engine: Arc<TransitionEngine>,
    promotion: Arc<PromotionService>,
}

impl AdminConsole {
    pub fn new(
        gatekeeper: Arc<Gatekeeper>,
        engine: Arc<TransitionEngine>,
        promotion: Arc<PromotionService>,
    ) -> Self {
        Self {
            gatekeeper,
            engine,
            promotion,
        }
    }

    /// Verifies the request, then runs the action. Only a failed security
    /// check is an `Err`; every other failure comes back as an unsuccessful
    /// outcome carrying its message.
    pub fn perform(&self, request: &RequestContext, action: &AdminAction) -> Result<ActionOutcome> {
        self.gatekeeper.verify(request, &action.scope())?;

        let outcome = match action {
            AdminAction::Approve(id) => self.single(*id, ApplicantStatus::Approved, "approved"),
            AdminAction::Reject(id) => self.single(*id, ApplicantStatus::Rejected, "rejected"),
            AdminAction::Delete(id) => match self.engine.delete(*id) {
                Ok(affected) if affected > 0 => {
                    ActionOutcome::ok(affected, "Applicant deleted successfully.")
                }
                Ok(_) => ActionOutcome::failed("Failed to delete applicant."),
                Err(e) => {
                    warn!(applicant_id = *id, error = %e, "delete failed");
                    ActionOutcome::failed("Failed to delete applicant.")
                }
            },
            AdminAction::SetStatus { id, status } => self.set_status(*id, status),
            AdminAction::Promote(id) => {
                match self.promotion.promote(*id, request.caller.account_id) {
                    Ok(outcome) => ActionOutcome::ok(
                        1,
                        format!("Employee created successfully! Employee ID: {}", outcome.employee_id),
                    ),
                    Err(e) => {
                        warn!(applicant_id = *id, error = %e, "promotion failed");
                        ActionOutcome::failed(e.user_message())
                    }
                }
            }
            AdminAction::Bulk { action, ids } => self.bulk(action, ids),
        };

        info!(
            scope = %action.scope(),
            success = outcome.success,
            affected = outcome.affected,
            "admin action handled"
        );
        Ok(outcome)
    }

    fn single(&self, id: i64, target: ApplicantStatus, verb: &str) -> ActionOutcome {
        match self.engine.transition(id, target) {
            Ok(transition) => ActionOutcome::ok(
                transition.affected(),
                format!("Applicant {} successfully.", verb),
            ),
            Err(e) => ActionOutcome::failed(e.user_message()),
        }
    }

    fn set_status(&self, id: i64, raw: &str) -> ActionOutcome {
        let result = raw
            .trim()
            .parse::<ApplicantStatus>()
            .and_then(|status| self.engine.transition(id, status));
        match result {
            Ok(transition) => ActionOutcome::ok(transition.affected(), "Status updated"),
            Err(e @ LifecycleError::Persistence(_)) => {
                warn!(applicant_id = id, error = %e, "status update failed");
                ActionOutcome::failed("Failed to update status")
            }
            Err(e) => ActionOutcome::failed(e.user_message()),
        }
    }

    fn bulk(&self, raw_action: &str, ids: &[i64]) -> ActionOutcome {
        let ids: BTreeSet<i64> = ids.iter().copied().filter(|id| *id > 0).collect();
        let action = match BulkAction::parse(raw_action) {
            Ok(action) if !ids.is_empty() => action,
            _ => return ActionOutcome::failed("No applicants selected or invalid action."),
        };

        let report = self.engine.bulk(action, &ids);
        let verb = match action {
            BulkAction::Approve => "Approved",
            BulkAction::Reject => "Rejected",
            BulkAction::Delete => "Deleted",
        };
        let mut message = format!("{} {} {}", verb, report.affected, plural(report.affected));
        if !report.failures.is_empty() {
            message.push_str(&format!(" ({} could not be updated)", report.failures.len()));
        }
        ActionOutcome {
            success: report.failures.is_empty(),
            affected: report.affected,
            message,
        }
    }

    /// Stored resume of an applicant, for download.
    pub fn download_resume(&self, request: &RequestContext, id: i64) -> Result<Resume> {
        self.gatekeeper.verify(request, &ActionScope::DownloadResume(id))?;
        let applicant = self.engine.store().get_by_id(id)?;
        if applicant.resume.data.is_empty() {
            return Err(LifecycleError::Validation(
                "No resume data found for this applicant.".to_string(),
            ));
        }
        info!(applicant_id = id, bytes = applicant.resume.data.len(), "resume downloaded");
        Ok(applicant.resume)
    }

    /// `page` is 1-based.
    pub fn list(&self, caller: &Caller, status: ApplicantStatus, page: usize) -> Result<ApplicantPage> {
        self.gatekeeper.authorize(caller, Capability::ManageApplicants)?;
        let store = self.engine.store();
        let page = page.max(1);
        let total = store.count_by_status(status)?;
        let applicants = store.list_by_status(status, ITEMS_PER_PAGE, (page - 1) * ITEMS_PER_PAGE)?;
        Ok(ApplicantPage {
            status,
            page,
            total,
            total_pages: (total.max(0) as usize).div_ceil(ITEMS_PER_PAGE),
            applicants,
            counts: store.status_counts()?,
        })
    }

    pub fn show(&self, caller: &Caller, id: i64) -> Result<Applicant> {
        self.gatekeeper.authorize(caller, Capability::ManageApplicants)?;
        self.engine.store().get_by_id(id)
    }
}
