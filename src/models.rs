use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::LifecycleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicantStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
}

impl ApplicantStatus {
    pub const ALL: [ApplicantStatus; 4] = [
        ApplicantStatus::Pending,
        ApplicantStatus::Approved,
        ApplicantStatus::Rejected,
        ApplicantStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicantStatus::Pending => "pending",
            ApplicantStatus::Approved => "approved",
            ApplicantStatus::Rejected => "rejected",
            ApplicantStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for ApplicantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicantStatus {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(ApplicantStatus::Pending),
            "approved" => Ok(ApplicantStatus::Approved),
            "rejected" => Ok(ApplicantStatus::Rejected),
            "completed" => Ok(ApplicantStatus::Completed),
            other => Err(LifecycleError::Validation(format!(
                "Unknown applicant status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resume {
    pub filename: String,
    pub mime_type: String,
    #[serde(skip_serializing)]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Applicant {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub state: String,
    pub date_of_birth: NaiveDate,
    pub position: String,
    pub cover_letter: String,
    pub resume: Resume,
    pub status: ApplicantStatus,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Applicant {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Validated applicant fields ready for insertion. Status is always
/// `pending` on insert and is not part of this struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewApplicant {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub state: String,
    pub date_of_birth: NaiveDate,
    pub position: String,
    pub cover_letter: String,
    pub resume: Resume,
    pub ip_address: Option<String>,
}

/// Raw form fields as posted by an anonymous visitor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationForm {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub state: String,
    pub date_of_birth: String,
    pub position: String,
    pub cover_letter: String,
}

/// A file handed over by the upload transport, already spooled to disk.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
    pub temp_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Administrator,
    Employee,
    Anonymous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    SubmitApplication,
    ManageApplicants,
    AccessPortal,
}

impl Role {
    pub fn can(&self, capability: Capability) -> bool {
        match capability {
            Capability::SubmitApplication => true,
            Capability::ManageApplicants => matches!(self, Role::Administrator),
            Capability::AccessPortal => matches!(self, Role::Employee),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Administrator => "administrator",
            Role::Employee => "employee",
            Role::Anonymous => "anonymous",
        }
    }
}

impl FromStr for Role {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "administrator" => Ok(Role::Administrator),
            "employee" => Ok(Role::Employee),
            "anonymous" => Ok(Role::Anonymous),
            other => Err(LifecycleError::Validation(format!("Unknown role '{}'", other))),
        }
    }
}

/// Who is making a request, as resolved by the host before any handler runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub role: Role,
    pub account_id: Option<i64>,
    pub ip_address: Option<String>,
}

impl Caller {
    pub fn anonymous(ip_address: Option<String>) -> Self {
        Self {
            role: Role::Anonymous,
            account_id: None,
            ip_address,
        }
    }

    pub fn administrator(account_id: i64) -> Self {
        Self {
            role: Role::Administrator,
            account_id: Some(account_id),
            ip_address: None,
        }
    }

    pub fn employee(account_id: i64) -> Self {
        Self {
            role: Role::Employee,
            account_id: Some(account_id),
            ip_address: None,
        }
    }
}

/// A request as seen by the gatekeeper: the caller plus the token they sent.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub caller: Caller,
    pub token: Option<String>,
}

impl RequestContext {
    pub fn new(caller: Caller, token: impl Into<String>) -> Self {
        Self {
            caller,
            token: Some(token.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
    pub role: Option<Role>,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeRecord {
    pub id: i64,
    pub account_id: i64,
    pub employee_id: String,
    pub designation: i64,
    pub department: i64,
    pub hiring_source: String,
    pub hiring_date: DateTime<Utc>,
    pub date_of_birth: NaiveDate,
    pub employment_type: String,
    pub status: String,
}

/// Fields written to the employee table; `id` is assigned by the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmployeeDraft {
    pub account_id: i64,
    pub employee_id: String,
    pub designation: i64,
    pub department: i64,
    pub hiring_source: String,
    pub hiring_date: DateTime<Utc>,
    pub date_of_birth: NaiveDate,
    pub employment_type: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactDetails {
    pub street_1: String,
    pub street_2: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub mobile: String,
}
