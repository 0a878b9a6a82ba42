//! hr-intake - applicant intake and employee onboarding.
//!
//! Public job applications come in through [`submission`], are reviewed by
//! administrators through [`admin`], and approved applicants are turned into
//! employees by [`promotion`]. Employees then look after their own contact
//! details in the [`portal`].

pub mod accounts;
pub mod admin;
pub mod app;
pub mod cache;
pub mod captcha;
pub mod compensation;
pub mod config;
pub mod db;
pub mod email;
pub mod employees;
pub mod error;
pub mod gatekeeper;
pub mod lifecycle;
pub mod models;
pub mod portal;
pub mod promotion;
pub mod store;
pub mod submission;

pub use app::Intake;
pub use error::{LifecycleError, Result};
pub use models::{Applicant, ApplicantStatus, Caller, RequestContext, Role};
