use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;

use hr_intake::admin::AdminAction;
use hr_intake::config::Settings;
use hr_intake::db::Database;
use hr_intake::email::{Mailer, OutgoingMail};
use hr_intake::error::PromotionStep;
use hr_intake::gatekeeper::ActionScope;
use hr_intake::models::{ApplicationForm, UploadedFile};
use hr_intake::submission::Submission;
use hr_intake::{ApplicantStatus, Caller, Intake, LifecycleError, RequestContext};
use tempfile::NamedTempFile;

#[derive(Default)]
struct Recorder {
    sent: Mutex<Vec<OutgoingMail>>,
}

impl Recorder {
    fn to(&self, recipient: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.to == recipient)
            .map(|m| m.subject.clone())
            .collect()
    }
}

impl Mailer for Recorder {
    fn send(&self, mail: &OutgoingMail) -> hr_intake::Result<()> {
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }
}

fn settings() -> Settings {
    Settings {
        admin_email: "hr@example.com".to_string(),
        from_name: "Example HR".to_string(),
        from_email: "noreply@example.com".to_string(),
        company_name: "Example LLC".to_string(),
        site_url: "https://example.com".to_string(),
        token_secret: "8c1f4e2a9b7d3c5e6f0a1b2c3d4e5f60".to_string(),
        ..Settings::default()
    }
}

fn intake_on(db: Arc<Database>) -> (Intake, Arc<Recorder>) {
    let mailer = Arc::new(Recorder::default());
    let intake = Intake::new(settings(), db, mailer.clone(), None).unwrap();
    (intake, mailer)
}

fn in_memory() -> (Intake, Arc<Recorder>) {
    let db = Database::open_in_memory().unwrap();
    db.init().unwrap();
    intake_on(Arc::new(db))
}

fn pdf(bytes: usize) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    let mut data = b"%PDF-1.7\n".to_vec();
    data.resize(bytes, b'0');
    file.write_all(&data).unwrap();
    file
}

fn submission(first: &str, last: &str, email: &str, resume: &Path) -> Submission {
    Submission {
        form: ApplicationForm {
            first_name: first.to_string(),
            last_name: last.to_string(),
            email: email.to_string(),
            phone: "512-555-0100".to_string(),
            state: "TX".to_string(),
            date_of_birth: "1990-04-12".to_string(),
            position: "Customer Service".to_string(),
            cover_letter: "I would like to join the team.".to_string(),
        },
        resume: Some(UploadedFile {
            file_name: "resume.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            size: std::fs::metadata(resume).unwrap().len(),
            temp_path: resume.to_path_buf(),
        }),
        captcha_token: None,
    }
}

fn submit(intake: &Intake, first: &str, email: &str) -> i64 {
    let resume = pdf(4_096);
    let token = intake.gatekeeper.issue(&ActionScope::SubmitApplication).unwrap();
    let request = RequestContext::new(Caller::anonymous(Some("203.0.113.7".to_string())), token);
    intake
        .submissions
        .submit(&request, &submission(first, "Doe", email, resume.path()))
        .unwrap()
        .applicant_id
}

fn admin(intake: &Intake, action: AdminAction) -> hr_intake::admin::ActionOutcome {
    let token = intake.gatekeeper.issue(&action.scope()).unwrap();
    let request = RequestContext::new(Caller::administrator(1), token);
    intake.admin.perform(&request, &action).unwrap()
}

fn status_of(intake: &Intake, id: i64) -> ApplicantStatus {
    intake.engine.store().get_by_id(id).unwrap().status
}

#[test]
fn test_submission_stores_pending_row_and_sends_both_emails() {
    let (intake, mail) = in_memory();
    let resume = pdf(2 * 1024 * 1024);
    let token = intake.gatekeeper.issue(&ActionScope::SubmitApplication).unwrap();
    let request = RequestContext::new(Caller::anonymous(None), token);

    let receipt = intake
        .submissions
        .submit(&request, &submission("Jane", "Doe", "Jane.Doe@Example.com", resume.path()))
        .unwrap();

    let stored = intake.engine.store().get_by_id(receipt.applicant_id).unwrap();
    assert_eq!(stored.status, ApplicantStatus::Pending);
    assert_eq!(stored.full_name(), "Jane Doe");
    assert_eq!(stored.email, "jane.doe@example.com");
    assert_eq!(stored.resume.data.len(), 2 * 1024 * 1024);
    assert_eq!(intake.engine.store().count_by_status(ApplicantStatus::Pending).unwrap(), 1);

    assert!(receipt.admin_notification.is_sent());
    assert!(receipt.confirmation.is_sent());
    assert_eq!(mail.to("hr@example.com"), vec!["New Job Application Received"]);
    assert_eq!(
        mail.to("jane.doe@example.com"),
        vec!["Application Received / Solicitud Recibida"]
    );
}

#[test]
fn test_reused_submission_token_is_refused() {
    let (intake, _) = in_memory();
    let resume = pdf(1_024);
    let token = intake.gatekeeper.issue(&ActionScope::SubmitApplication).unwrap();
    let request = RequestContext::new(Caller::anonymous(None), token);
    let form = submission("Jane", "Doe", "jane@example.com", resume.path());

    intake.submissions.submit(&request, &form).unwrap();
    assert!(matches!(
        intake.submissions.submit(&request, &form),
        Err(LifecycleError::SecurityCheckFailed)
    ));
}

#[test]
fn test_approval_creates_no_account_yet() {
    let (intake, _) = in_memory();
    let id = submit(&intake, "Jane", "jane@example.com");

    let outcome = admin(&intake, AdminAction::Approve(id));
    assert!(outcome.success);
    assert_eq!(outcome.message, "Applicant approved successfully.");
    assert_eq!(status_of(&intake, id), ApplicantStatus::Approved);
    assert!(!intake.accounts.account_exists("jane@example.com").unwrap());
}

#[test]
fn test_promotion_creates_account_employee_and_completes() {
    let (intake, mail) = in_memory();
    let id = submit(&intake, "Jane", "jane@example.com");
    admin(&intake, AdminAction::Approve(id));

    let outcome = intake.promotion.promote(id, Some(1)).unwrap();
    assert_eq!(outcome.employee_id, "2025201");
    assert!(outcome.welcome.is_sent());
    assert_eq!(status_of(&intake, id), ApplicantStatus::Completed);

    let record = intake
        .employees
        .find_by_account(outcome.account_id)
        .unwrap()
        .unwrap();
    assert_eq!(record.employee_id, "2025201");
    assert_eq!(record.id, outcome.employee_row_id);
    assert_eq!(
        mail.to("jane@example.com").last().map(String::as_str),
        Some("HR Portal Access / Acceso al Portal de RH")
    );

    // The new employee can reach the portal.
    let view = intake.portal.view(&Caller::employee(outcome.account_id)).unwrap();
    assert_eq!(view.employee_id, "2025201");
}

#[test]
fn test_promotion_through_console_reports_employee_id() {
    let (intake, _) = in_memory();
    let id = submit(&intake, "Jane", "jane@example.com");
    admin(&intake, AdminAction::Approve(id));

    let outcome = admin(&intake, AdminAction::Promote(id));
    assert!(outcome.success);
    assert_eq!(outcome.message, "Employee created successfully! Employee ID: 2025201");
}

#[test]
fn test_promotion_with_taken_email_changes_nothing() {
    let (intake, mail) = in_memory();
    let id = submit(&intake, "Jane", "jane@example.com");
    admin(&intake, AdminAction::Approve(id));
    let existing = intake.accounts.create_account("jane@example.com", "hunter22").unwrap();
    let mails_before = mail.sent.lock().unwrap().len();

    let err = intake.promotion.promote(id, Some(1)).unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Promotion { step: PromotionStep::CheckPreconditions, .. }
    ));
    assert_eq!(status_of(&intake, id), ApplicantStatus::Approved);
    assert!(intake.employees.find_by_account(existing).unwrap().is_none());
    assert_eq!(mail.sent.lock().unwrap().len(), mails_before);
}

#[test]
fn test_concurrent_promotions_get_distinct_employee_ids() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("intake.db");
    let ids = {
        let db = Database::open(&path).unwrap();
        db.init().unwrap();
        let (intake, _) = intake_on(Arc::new(db));
        let a = submit(&intake, "Jane", "jane@example.com");
        let b = submit(&intake, "John", "john@example.com");
        admin(&intake, AdminAction::Approve(a));
        admin(&intake, AdminAction::Approve(b));
        [a, b]
    };

    let workers: Vec<_> = ids
        .into_iter()
        .map(|id| {
            let path = path.clone();
            thread::spawn(move || {
                let (intake, _) = intake_on(Arc::new(Database::open(&path).unwrap()));
                intake.promotion.promote(id, None).map(|o| o.employee_id)
            })
        })
        .collect();
    let results: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();

    let employee_ids: Vec<String> = results.into_iter().map(|r| r.unwrap()).collect();
    assert_ne!(employee_ids[0], employee_ids[1]);
    let mut sorted = employee_ids.clone();
    sorted.sort();
    assert_eq!(sorted, vec!["2025201", "2025202"]);
}

#[test]
fn test_completed_applicant_status_cannot_change() {
    let (intake, _) = in_memory();
    let id = submit(&intake, "Jane", "jane@example.com");
    admin(&intake, AdminAction::Approve(id));
    intake.promotion.promote(id, None).unwrap();

    let outcome = admin(
        &intake,
        AdminAction::SetStatus { id, status: "pending".to_string() },
    );
    assert!(!outcome.success);
    let outcome = admin(&intake, AdminAction::Reject(id));
    assert!(!outcome.success);
    assert_eq!(status_of(&intake, id), ApplicantStatus::Completed);
}

#[test]
fn test_completion_by_another_process_is_seen_despite_cached_row() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("intake.db");
    let db = Database::open(&path).unwrap();
    db.init().unwrap();
    let (first, _) = intake_on(Arc::new(db));
    let (second, _) = intake_on(Arc::new(Database::open(&path).unwrap()));

    let id = submit(&first, "Jane", "jane@example.com");
    admin(&first, AdminAction::Approve(id));
    let cached = first.admin.show(&Caller::administrator(1), id).unwrap();
    assert_eq!(cached.status, ApplicantStatus::Approved);

    second.promotion.promote(id, None).unwrap();
    assert_eq!(status_of(&second, id), ApplicantStatus::Completed);

    let outcome = admin(&first, AdminAction::Reject(id));
    assert!(!outcome.success);
    assert_eq!(outcome.affected, 0);
    assert_eq!(
        first.engine.store().get_fresh(id).unwrap().status,
        ApplicantStatus::Completed
    );

    // Promoting again from the stale side is refused too.
    assert!(matches!(
        first.promotion.promote(id, None),
        Err(LifecycleError::Promotion { step: PromotionStep::CheckPreconditions, .. })
    ));
}

#[test]
fn test_bulk_actions_count_what_changed() {
    let (intake, _) = in_memory();
    let a = submit(&intake, "Jane", "jane@example.com");
    let b = submit(&intake, "John", "john@example.com");

    let outcome = admin(
        &intake,
        AdminAction::Bulk { action: "approve".to_string(), ids: vec![a, b] },
    );
    assert!(outcome.success);
    assert_eq!(outcome.message, "Approved 2 applicants");

    let outcome = admin(
        &intake,
        AdminAction::Bulk { action: "delete".to_string(), ids: vec![a, b] },
    );
    assert_eq!(outcome.affected, 2);
    assert!(matches!(
        intake.engine.store().get_by_id(a),
        Err(LifecycleError::NotFound(_))
    ));
}
