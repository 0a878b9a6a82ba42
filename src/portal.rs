//! Employee self-service: viewing and correcting one's own contact details,
//! and where employees are allowed to go.

use regex::Regex;
use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

use crate::accounts::IdentityProvider;
use crate::db::Database;
use crate::employees::EmployeeDirectory;
use crate::error::{LifecycleError, Result};
use crate::gatekeeper::{ActionScope, Gatekeeper};
use crate::models::{Caller, Capability, ContactDetails, RequestContext, Role};
use crate::submission::clean_text;

pub const PORTAL_PATH: &str = "/hr-portal";
const ALLOWED_SLUGS: [&str; 3] = ["hr-portal", "paystubs", "employee-documents"];

const CONTACT_KEYS: [&str; 6] = ["street_1", "street_2", "city", "state", "postal_code", "mobile"];

/// Where a signed-in user is trying to go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination<'a> {
    AdminArea,
    FrontPage,
    Page(&'a str),
}

/// Path an employee is sent to instead of `destination`, if any.
/// Administrators are never redirected.
pub fn redirect_for(role: Role, destination: Destination<'_>) -> Option<&'static str> {
    if role != Role::Employee {
        return None;
    }
    match destination {
        Destination::AdminArea => Some(PORTAL_PATH),
        Destination::FrontPage => None,
        Destination::Page(slug) if slug.is_empty() || ALLOWED_SLUGS.contains(&slug) => None,
        Destination::Page(_) => Some(PORTAL_PATH),
    }
}

pub fn login_redirect(role: Role) -> Option<&'static str> {
    match role {
        Role::Employee => Some(PORTAL_PATH),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortalView {
    pub display_name: String,
    pub email: String,
    pub employee_id: String,
    pub employee_row_id: i64,
    pub contact: ContactDetails,
}

impl PortalView {
    pub fn address_display(&self) -> String {
        let c = &self.contact;
        let street: Vec<&str> = [c.street_1.as_str(), c.street_2.as_str()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect();
        let locality: Vec<&str> = [c.city.as_str(), c.state.as_str(), c.postal_code.as_str()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect();
        let mut lines = Vec::new();
        if !street.is_empty() {
            lines.push(street.join("\n"));
        }
        if !locality.is_empty() {
            lines.push(locality.join(", "));
        }
        if lines.is_empty() {
            "Not provided".to_string()
        } else {
            lines.join("\n")
        }
    }

    pub fn mobile_display(&self) -> &str {
        if self.contact.mobile.is_empty() {
            "Not provided"
        } else {
            &self.contact.mobile
        }
    }
}

fn zip_pattern() -> &'static Regex {
    static ZIP: OnceLock<Regex> = OnceLock::new();
    ZIP.get_or_init(|| Regex::new(r"^\d{5}(-\d{4})?$").expect("valid regex"))
}

fn mobile_pattern() -> &'static Regex {
    static MOBILE: OnceLock<Regex> = OnceLock::new();
    MOBILE.get_or_init(|| {
        Regex::new(r"^\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}$").expect("valid regex")
    })
}

fn validate_contact(raw: &ContactDetails) -> Result<ContactDetails> {
    let contact = ContactDetails {
        street_1: clean_text(&raw.street_1),
        street_2: clean_text(&raw.street_2),
        city: clean_text(&raw.city),
        state: clean_text(&raw.state),
        postal_code: clean_text(&raw.postal_code),
        mobile: clean_text(&raw.mobile),
    };

    for (label, value) in [
        ("Street 1", &contact.street_1),
        ("City", &contact.city),
        ("State", &contact.state),
        ("Postal code", &contact.postal_code),
        ("Mobile", &contact.mobile),
    ] {
        if value.is_empty() {
            return Err(LifecycleError::Validation(format!("{} is required.", label)));
        }
    }
    if !zip_pattern().is_match(&contact.postal_code) {
        return Err(LifecycleError::Validation(
            "Please enter a valid ZIP code (5 or 9 digits).".to_string(),
        ));
    }
    if !mobile_pattern().is_match(&contact.mobile) {
        return Err(LifecycleError::Validation(
            "Please enter a valid 10-digit mobile number.".to_string(),
        ));
    }
    Ok(contact)
}

fn yes_no(value: &str) -> &'static str {
    if value.is_empty() { "NO" } else { "YES" }
}

pub struct EmployeePortal {
    gatekeeper: Arc<Gatekeeper>,
    accounts: Arc<dyn IdentityProvider>,
    employees: Arc<dyn EmployeeDirectory>,
    db: Arc<Database>,
}

impl EmployeePortal {
    pub fn new(
        gatekeeper: Arc<Gatekeeper>,
        accounts: Arc<dyn IdentityProvider>,
        employees: Arc<dyn EmployeeDirectory>,
        db: Arc<Database>,
    ) -> Self {
        Self {
            gatekeeper,
            accounts,
            employees,
            db,
        }
    }

    pub fn view(&self, caller: &Caller) -> Result<PortalView> {
        self.gatekeeper.authorize(caller, Capability::AccessPortal)?;
        let account_id = caller.account_id.ok_or(LifecycleError::SecurityCheckFailed)?;
        let not_found =
            || LifecycleError::Validation("Employee record not found. Please contact HR.".to_string());

        let account = self.accounts.find_account(account_id)?.ok_or_else(not_found)?;
        let record = self.employees.find_by_account(account_id)?.ok_or_else(not_found)?;
        let mut meta = self.accounts.get_meta(account_id, &CONTACT_KEYS)?;
        let mut take = |key: &str| meta.remove(key).unwrap_or_default();

        Ok(PortalView {
            display_name: account.display_name,
            email: account.email,
            employee_id: record.employee_id,
            employee_row_id: record.id,
            contact: ContactDetails {
                street_1: take("street_1"),
                street_2: take("street_2"),
                city: take("city"),
                state: take("state"),
                postal_code: take("postal_code"),
                mobile: take("mobile"),
            },
        })
    }

    /// Replaces the caller's contact details. `employee_row_id` is the
    /// record the form was rendered for and must be the caller's own.
    pub fn update_contact(
        &self,
        request: &RequestContext,
        employee_row_id: i64,
        contact: &ContactDetails,
    ) -> Result<&'static str> {
        self.gatekeeper
            .verify(request, &ActionScope::UpdateContact(employee_row_id))?;
        let account_id = request
            .caller
            .account_id
            .ok_or(LifecycleError::SecurityCheckFailed)?;

        let own_row = self.employees.find_by_account(account_id)?.map(|r| r.id);
        if own_row != Some(employee_row_id) {
            warn!(account_id, employee_row_id, "contact update for someone else's record refused");
            return Err(LifecycleError::Validation(
                "Invalid employee record. Please contact HR.".to_string(),
            ));
        }

        let contact = validate_contact(contact)?;
        for (key, value) in CONTACT_KEYS.iter().zip([
            &contact.street_1,
            &contact.street_2,
            &contact.city,
            &contact.state,
            &contact.postal_code,
            &contact.mobile,
        ]) {
            self.accounts.set_meta(account_id, key, value)?;
        }

        let details = json!({
            "street_1_updated": yes_no(&contact.street_1),
            "city_updated": yes_no(&contact.city),
            "state_updated": yes_no(&contact.state),
            "postal_code_updated": yes_no(&contact.postal_code),
            "mobile_updated": yes_no(&contact.mobile),
        });
        self.db.insert_log(
            employee_row_id,
            account_id,
            "employee_contact_update",
            &details,
            request.caller.ip_address.as_deref(),
        )?;
        info!(account_id, employee_row_id, "contact details updated");

        Ok("Your contact information has been updated successfully!")
    }

    /// Redacted change log for one employee record. Administrators may read
    /// any record's log, employees only their own.
    pub fn update_history(
        &self,
        caller: &Caller,
        employee_row_id: i64,
    ) -> Result<Vec<(String, serde_json::Value)>> {
        if !caller.role.can(Capability::ManageApplicants) {
            self.gatekeeper.authorize(caller, Capability::AccessPortal)?;
            let account_id = caller.account_id.ok_or(LifecycleError::SecurityCheckFailed)?;
            let own_row = self.employees.find_by_account(account_id)?.map(|r| r.id);
            if own_row != Some(employee_row_id) {
                return Err(LifecycleError::SecurityCheckFailed);
            }
        }
        self.db.list_logs(employee_row_id)
    }
}
