//! Turns an approved applicant into an employee.
//!
//! Steps run in a fixed order: account, profile and role, employee record,
//! note, welcome mail, and only then the `completed` status write. A failure
//! in any step undoes the ones before it, so the applicant is either fully
//! promoted or still `approved` with no account behind their email.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::accounts::{generate_password, IdentityProvider, Profile};
use crate::compensation::Compensations;
use crate::config::HireDefaults;
use crate::email::{Delivery, Notifier};
use crate::employees::{DirectoryError, EmployeeDirectory, Upsert};
use crate::error::{LifecycleError, PromotionStep, Result};
use crate::lifecycle::TransitionEngine;
use crate::models::{Applicant, ApplicantStatus, EmployeeDraft, Role};

/// Attempts at allocating a free employee identifier before giving up.
pub const MAX_ID_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionOutcome {
    pub applicant_id: i64,
    pub account_id: i64,
    pub employee_id: String,
    pub employee_row_id: i64,
    pub welcome: Delivery,
}

pub struct PromotionService {
    engine: Arc<TransitionEngine>,
    accounts: Arc<dyn IdentityProvider>,
    employees: Arc<dyn EmployeeDirectory>,
    notifier: Arc<Notifier>,
    hire: HireDefaults,
}

impl PromotionService {
    pub fn new(
        engine: Arc<TransitionEngine>,
        accounts: Arc<dyn IdentityProvider>,
        employees: Arc<dyn EmployeeDirectory>,
        notifier: Arc<Notifier>,
        hire: HireDefaults,
    ) -> Self {
        Self {
            engine,
            accounts,
            employees,
            notifier,
            hire,
        }
    }

    pub fn promote(&self, applicant_id: i64, acting_admin: Option<i64>) -> Result<PromotionOutcome> {
        let applicant = self.engine.store().get_fresh(applicant_id)?;
        self.check_preconditions(&applicant)?;

        let mut saga = Compensations::new();

        let account_id = saga.run(
            PromotionStep::CreateAccount,
            || self.accounts.create_account(&applicant.email, &generate_password()),
            |id| self.accounts.delete_account(id),
        )?;

        saga.run_plain(PromotionStep::PopulateProfile, || {
            self.populate_profile(account_id, &applicant)
        })?;

        let (upsert, employee_id) = saga.run(
            PromotionStep::WriteEmployeeRecord,
            || self.write_employee(account_id, &applicant),
            move |_| self.employees.delete_by_account(account_id),
        )?;

        let note = format!(
            "Employee created from applicant tracking system. Applied for position: {}",
            applicant.position
        );
        saga.run(
            PromotionStep::RecordNote,
            || self.employees.add_note(account_id, &note, acting_admin),
            |note_id| self.employees.delete_note(note_id),
        )?;

        let welcome = match self.accounts.find_account(account_id) {
            Ok(Some(account)) => self.notifier.welcome(&account),
            Ok(None) => Delivery::Failed(format!("account {} vanished", account_id)),
            Err(e) => Delivery::Failed(e.to_string()),
        };

        saga.run_plain(PromotionStep::MarkCompleted, || {
            self.engine.mark_completed(applicant_id)
        })?;
        saga.commit();

        info!(
            applicant_id,
            account_id,
            employee_id = %employee_id,
            welcome_sent = welcome.is_sent(),
            "applicant promoted"
        );
        Ok(PromotionOutcome {
            applicant_id,
            account_id,
            employee_id,
            employee_row_id: upsert.row_id(),
            welcome,
        })
    }

    fn check_preconditions(&self, applicant: &Applicant) -> Result<()> {
        if applicant.status != ApplicantStatus::Approved {
            return Err(LifecycleError::promotion(
                PromotionStep::CheckPreconditions,
                format!("applicant is {}, only approved applicants can be promoted", applicant.status),
            ));
        }
        if self.accounts.account_exists(&applicant.email)? {
            warn!(applicant_id = applicant.id, "promotion refused, email already has an account");
            return Err(LifecycleError::promotion(
                PromotionStep::CheckPreconditions,
                "A user with this email already exists",
            ));
        }
        Ok(())
    }

    fn populate_profile(&self, account_id: i64, applicant: &Applicant) -> Result<()> {
        self.accounts.update_profile(
            account_id,
            &Profile {
                first_name: applicant.first_name.clone(),
                last_name: applicant.last_name.clone(),
            },
        )?;
        let date_of_birth = applicant.date_of_birth.format("%Y-%m-%d").to_string();
        for (key, value) in [
            ("mobile", applicant.phone.as_str()),
            ("state", applicant.state.as_str()),
            ("address_state", applicant.state.as_str()),
            ("country", "US"),
            ("date_of_birth", date_of_birth.as_str()),
        ] {
            self.accounts.set_meta(account_id, key, value)?;
        }
        self.accounts.assign_role(account_id, Role::Employee)
    }

    /// Next identifier is one past the largest numeric one on file. Another
    /// promotion can claim the same number first; the unique constraint
    /// catches that and the number is recomputed.
    fn next_employee_id(&self) -> Result<String> {
        let next = match self.employees.max_employee_number()? {
            Some(max) if max > 0 => max + 1,
            _ => self.hire.first_employee_number,
        };
        Ok(next.to_string())
    }

    fn write_employee(&self, account_id: i64, applicant: &Applicant) -> Result<(Upsert, String)> {
        for attempt in 1..=MAX_ID_ATTEMPTS {
            let employee_id = self.next_employee_id().map_err(|e| {
                LifecycleError::promotion(PromotionStep::AllocateEmployeeId, e.to_string())
            })?;
            let draft = EmployeeDraft {
                account_id,
                employee_id: employee_id.clone(),
                designation: self.hire.designation,
                department: self.hire.department,
                hiring_source: self.hire.hiring_source.clone(),
                hiring_date: Utc::now(),
                date_of_birth: applicant.date_of_birth,
                employment_type: self.hire.employment_type.clone(),
                status: "active".to_string(),
            };
            match self.employees.upsert(&draft) {
                Ok(upsert) => return Ok((upsert, employee_id)),
                Err(DirectoryError::DuplicateEmployeeId(taken)) => {
                    warn!(attempt, employee_id = %taken, "employee identifier taken, recomputing");
                }
                Err(DirectoryError::Other(e)) => return Err(e),
            }
        }
        Err(LifecycleError::promotion(
            PromotionStep::AllocateEmployeeId,
            format!("no free employee identifier after {} attempts", MAX_ID_ATTEMPTS),
        ))
    }
}
