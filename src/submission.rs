//! Public application intake.
//!
//! Checks run cheapest-first and every one of them finishes before anything
//! is written: configuration, security token, CAPTCHA, fields, age, resume.

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::fs::File;
use std::io::Read;
use std::sync::Arc;
use tracing::{info, warn};

use crate::captcha::CaptchaVerifier;
use crate::config::{is_email, Settings, ALLOWED_RESUME_MIME};
use crate::email::{Delivery, Notifier};
use crate::error::{LifecycleError, Result};
use crate::gatekeeper::{ActionScope, Gatekeeper};
use crate::models::{ApplicationForm, NewApplicant, RequestContext, Resume, UploadedFile};
use crate::store::ApplicantStore;

pub const THANK_YOU_ENGLISH: &str =
    "Thank you for your application! We will review it and contact you soon.";
pub const THANK_YOU_SPANISH: &str =
    "¡Gracias por su solicitud! La revisaremos y nos pondremos en contacto pronto.";

/// Everything the applicant sent in one form post.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub form: ApplicationForm,
    pub resume: Option<UploadedFile>,
    pub captcha_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReceipt {
    pub applicant_id: i64,
    pub message_english: &'static str,
    pub message_spanish: &'static str,
    #[serde(skip)]
    pub admin_notification: Delivery,
    #[serde(skip)]
    pub confirmation: Delivery,
}

pub struct SubmissionHandler {
    settings: Arc<Settings>,
    gatekeeper: Arc<Gatekeeper>,
    captcha: Option<Arc<dyn CaptchaVerifier>>,
    store: Arc<ApplicantStore>,
    notifier: Arc<Notifier>,
}

impl SubmissionHandler {
    /// With a `captcha` verifier present every submission must carry a
    /// proof it accepts.
    pub fn new(
        settings: Arc<Settings>,
        gatekeeper: Arc<Gatekeeper>,
        captcha: Option<Arc<dyn CaptchaVerifier>>,
        store: Arc<ApplicantStore>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            settings,
            gatekeeper,
            captcha,
            store,
            notifier,
        }
    }

    pub fn submit(&self, request: &RequestContext, submission: &Submission) -> Result<SubmissionReceipt> {
        self.submit_on(request, submission, Utc::now().date_naive())
    }

    /// Same as [`submit`](Self::submit) with the date ages are measured against.
    pub fn submit_on(
        &self,
        request: &RequestContext,
        submission: &Submission,
        today: NaiveDate,
    ) -> Result<SubmissionReceipt> {
        if !self.settings.is_complete() {
            warn!("submission refused, settings incomplete");
            return Err(LifecycleError::Configuration(
                "Plugin is not properly configured. Please contact the site administrator."
                    .to_string(),
            ));
        }

        self.gatekeeper.verify(request, &ActionScope::SubmitApplication)?;
        let ip_address = request.caller.ip_address.clone();
        self.check_captcha(submission.captcha_token.as_deref(), ip_address.as_deref())?;

        let fields = clean_form(&submission.form)?;
        let date_of_birth = check_age(&fields.date_of_birth, self.settings.min_age, today)?;
        let resume = self.read_resume(submission.resume.as_ref())?;

        let applicant = NewApplicant {
            first_name: fields.first_name,
            last_name: fields.last_name,
            email: fields.email,
            phone: fields.phone,
            state: fields.state,
            date_of_birth,
            position: fields.position,
            cover_letter: fields.cover_letter,
            resume,
            ip_address,
        };
        let applicant_id = self.store.create(&applicant)?;

        let admin_notification = self.notifier.application_received(&applicant);
        let confirmation = self.notifier.applicant_confirmation(&applicant);
        info!(
            applicant_id,
            admin_notified = admin_notification.is_sent(),
            applicant_notified = confirmation.is_sent(),
            "application received"
        );

        Ok(SubmissionReceipt {
            applicant_id,
            message_english: THANK_YOU_ENGLISH,
            message_spanish: THANK_YOU_SPANISH,
            admin_notification,
            confirmation,
        })
    }

    fn check_captcha(&self, token: Option<&str>, remote_ip: Option<&str>) -> Result<()> {
        let Some(verifier) = &self.captcha else {
            return Ok(());
        };
        match verifier.verify(token.unwrap_or_default(), remote_ip) {
            Ok(true) => Ok(()),
            Ok(false) => Err(LifecycleError::ExternalService("CAPTCHA rejected".to_string())),
            Err(e) => {
                warn!(error = %e, "captcha service unavailable, refusing submission");
                Err(e)
            }
        }
    }

    fn read_resume(&self, upload: Option<&UploadedFile>) -> Result<Resume> {
        let Some(upload) = upload else {
            return Err(LifecycleError::Validation("Please upload a resume file.".to_string()));
        };
        if upload.mime_type.trim() != ALLOWED_RESUME_MIME {
            return Err(LifecycleError::Validation(
                "Only PDF files are allowed for resumes.".to_string(),
            ));
        }
        let max = self.settings.max_file_size_bytes();
        let too_large = || {
            LifecycleError::Validation(format!(
                "Resume file must be less than {}MB.",
                self.settings.max_file_size_mb
            ))
        };
        if upload.size > max {
            return Err(too_large());
        }

        let unreadable = |e: std::io::Error| {
            warn!(path = %upload.temp_path.display(), error = %e, "resume upload unreadable");
            LifecycleError::Validation("Error reading resume file.".to_string())
        };
        // The declared size can lie; never buffer more than one byte past
        // the ceiling.
        let file = File::open(&upload.temp_path).map_err(unreadable)?;
        let mut data = Vec::with_capacity(upload.size.min(max) as usize);
        file.take(max.saturating_add(1))
            .read_to_end(&mut data)
            .map_err(unreadable)?;
        if data.len() as u64 > max {
            warn!(declared = upload.size, "resume larger than declared size");
            return Err(too_large());
        }
        if data.is_empty() {
            return Err(LifecycleError::Validation("Please upload a resume file.".to_string()));
        }

        Ok(Resume {
            filename: sanitize_file_name(&upload.file_name),
            mime_type: ALLOWED_RESUME_MIME.to_string(),
            data,
        })
    }
}

/// Trims and drops control characters.
pub fn clean_text(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Like [`clean_text`] but keeps line breaks and tabs.
fn clean_multiline(raw: &str) -> String {
    raw.chars()
        .filter(|c| matches!(c, '\n' | '\t') || !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

pub fn sanitize_file_name(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == '-').to_string();
    if cleaned.is_empty() {
        "resume.pdf".to_string()
    } else {
        cleaned
    }
}

fn clean_form(form: &ApplicationForm) -> Result<ApplicationForm> {
    let cleaned = ApplicationForm {
        first_name: clean_text(&form.first_name),
        last_name: clean_text(&form.last_name),
        email: clean_text(&form.email).to_lowercase(),
        phone: clean_text(&form.phone),
        state: clean_text(&form.state),
        date_of_birth: clean_text(&form.date_of_birth),
        position: clean_text(&form.position),
        cover_letter: clean_multiline(&form.cover_letter),
    };

    let required = [
        &cleaned.first_name,
        &cleaned.last_name,
        &cleaned.email,
        &cleaned.position,
        &cleaned.state,
        &cleaned.date_of_birth,
    ];
    if required.iter().any(|value| value.is_empty()) {
        return Err(LifecycleError::Validation(
            "Please fill in all required fields.".to_string(),
        ));
    }
    if !is_email(&cleaned.email) {
        return Err(LifecycleError::Validation(
            "Please enter a valid email address.".to_string(),
        ));
    }
    Ok(cleaned)
}

/// Parses a `YYYY-MM-DD` birth date and enforces the minimum age on `today`.
pub fn check_age(raw: &str, min_age: u32, today: NaiveDate) -> Result<NaiveDate> {
    let date_of_birth = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        LifecycleError::Validation("Please enter a valid date of birth.".to_string())
    })?;
    let age = today.years_since(date_of_birth).ok_or_else(|| {
        LifecycleError::Validation("Please enter a valid date of birth.".to_string())
    })?;
    if age < min_age {
        return Err(LifecycleError::Validation(format!(
            "You must be at least {} years old to apply.",
            min_age
        )));
    }
    Ok(date_of_birth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_settings;
    use crate::db::test_database;
    use crate::email::testing::RecordingMailer;
    use crate::gatekeeper::test_gatekeeper;
    use crate::models::{ApplicantStatus, Caller};
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    struct StaticCaptcha(Result<bool>);

    impl CaptchaVerifier for StaticCaptcha {
        fn verify(&self, _token: &str, _remote_ip: Option<&str>) -> Result<bool> {
            match &self.0 {
                Ok(v) => Ok(*v),
                Err(e) => Err(LifecycleError::ExternalService(e.to_string())),
            }
        }
    }

    struct Fixture {
        handler: SubmissionHandler,
        gatekeeper: Arc<Gatekeeper>,
        store: Arc<ApplicantStore>,
        mailer: Arc<RecordingMailer>,
    }

    fn fixture_with(settings: Settings, captcha: Option<Arc<dyn CaptchaVerifier>>) -> Fixture {
        let db = test_database();
        let settings = Arc::new(settings);
        let gatekeeper = Arc::new(test_gatekeeper(db.clone()));
        let store = Arc::new(ApplicantStore::new(db, Duration::from_secs(900)));
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = Arc::new(Notifier::new(settings.clone(), mailer.clone()).unwrap());
        let handler = SubmissionHandler::new(
            settings,
            gatekeeper.clone(),
            captcha,
            store.clone(),
            notifier,
        );
        Fixture {
            handler,
            gatekeeper,
            store,
            mailer,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(test_settings(), None)
    }

    fn request(f: &Fixture) -> RequestContext {
        let token = f.gatekeeper.issue(&ActionScope::SubmitApplication).unwrap();
        RequestContext::new(Caller::anonymous(Some("198.51.100.4".to_string())), token)
    }

    fn pdf(bytes: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&vec![b'x'; bytes]).unwrap();
        file
    }

    fn submission(file: &NamedTempFile, size: u64, mime: &str) -> Submission {
        Submission {
            form: ApplicationForm {
                first_name: "  Jane\u{0007} ".to_string(),
                last_name: "Doe".to_string(),
                email: " Jane.Doe@Example.COM ".to_string(),
                phone: "555-123-4567".to_string(),
                state: "TX".to_string(),
                date_of_birth: "1990-04-12".to_string(),
                position: "Customer Service".to_string(),
                cover_letter: "Hello\nthere".to_string(),
            },
            resume: Some(UploadedFile {
                file_name: "My Resume (final).pdf".to_string(),
                mime_type: mime.to_string(),
                size,
                temp_path: file.path().to_path_buf(),
            }),
            captcha_token: None,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    #[test]
    fn test_valid_submission_is_stored_pending_and_notifies_twice() {
        let f = fixture();
        let file = pdf(2048);
        let receipt = f
            .handler
            .submit_on(&request(&f), &submission(&file, 2048, "application/pdf"), today())
            .unwrap();

        let stored = f.store.get_by_id(receipt.applicant_id).unwrap();
        assert_eq!(stored.status, ApplicantStatus::Pending);
        assert_eq!(stored.first_name, "Jane");
        assert_eq!(stored.email, "jane.doe@example.com");
        assert_eq!(stored.cover_letter, "Hello\nthere");
        assert_eq!(stored.resume.filename, "My-Resume--final-.pdf");
        assert_eq!(stored.resume.data.len(), 2048);
        assert_eq!(stored.ip_address.as_deref(), Some("198.51.100.4"));
        assert_eq!(receipt.message_spanish, THANK_YOU_SPANISH);
        assert_eq!(
            f.mailer.subjects(),
            vec![
                "New Job Application Received",
                "Application Received / Solicitud Recibida"
            ]
        );
    }

    #[test]
    fn test_resume_at_ceiling_is_accepted_one_byte_over_is_not() {
        let f = fixture();
        let max = test_settings().max_file_size_bytes();

        let at = pdf(max as usize);
        f.handler
            .submit_on(&request(&f), &submission(&at, max, "application/pdf"), today())
            .unwrap();

        let over = pdf(max as usize + 1);
        let err = f
            .handler
            .submit_on(&request(&f), &submission(&over, max + 1, "application/pdf"), today())
            .unwrap_err();
        assert_eq!(err.to_string(), "Resume file must be less than 5MB.");
    }

    #[test]
    fn test_understated_upload_size_is_caught_on_read() {
        let f = fixture();
        let max = test_settings().max_file_size_bytes();
        let over = pdf(max as usize + 1);
        let err = f
            .handler
            .submit_on(&request(&f), &submission(&over, 10, "application/pdf"), today())
            .unwrap_err();
        assert_eq!(err.to_string(), "Resume file must be less than 5MB.");
        assert_eq!(f.store.count_by_status(ApplicantStatus::Pending).unwrap(), 0);
    }

    #[test]
    fn test_oversized_file_with_understated_size_is_rejected_without_full_read() {
        let f = fixture();
        let max = test_settings().max_file_size_bytes();
        let huge = pdf(max as usize * 3);
        let err = f
            .handler
            .submit_on(&request(&f), &submission(&huge, 1_024, "application/pdf"), today())
            .unwrap_err();
        assert_eq!(err.to_string(), "Resume file must be less than 5MB.");
    }

    #[test]
    fn test_non_pdf_mime_is_rejected_whatever_the_extension() {
        let f = fixture();
        let file = pdf(10);
        let err = f
            .handler
            .submit_on(&request(&f), &submission(&file, 10, "application/msword"), today())
            .unwrap_err();
        assert_eq!(err.to_string(), "Only PDF files are allowed for resumes.");
        assert_eq!(f.store.count_by_status(ApplicantStatus::Pending).unwrap(), 0);
    }

    #[test]
    fn test_missing_resume_and_fields_are_reported() {
        let f = fixture();
        let file = pdf(10);
        let mut no_resume = submission(&file, 10, "application/pdf");
        no_resume.resume = None;
        let err = f.handler.submit_on(&request(&f), &no_resume, today()).unwrap_err();
        assert_eq!(err.to_string(), "Please upload a resume file.");

        let mut no_position = submission(&file, 10, "application/pdf");
        no_position.form.position = "   ".to_string();
        let err = f.handler.submit_on(&request(&f), &no_position, today()).unwrap_err();
        assert_eq!(err.to_string(), "Please fill in all required fields.");
    }

    #[test]
    fn test_underage_applicant_is_rejected() {
        let f = fixture();
        let file = pdf(10);
        let mut young = submission(&file, 10, "application/pdf");
        young.form.date_of_birth = "2007-06-02".to_string();
        let err = f.handler.submit_on(&request(&f), &young, today()).unwrap_err();
        assert_eq!(err.to_string(), "You must be at least 18 years old to apply.");
    }

    #[test]
    fn test_age_boundary_is_the_birthday() {
        assert!(check_age("2007-06-01", 18, today()).is_ok());
        assert!(check_age("2007-06-02", 18, today()).is_err());
        assert!(check_age("2030-01-01", 18, today()).is_err());
        assert!(check_age("06/01/1990", 18, today()).is_err());
    }

    #[test]
    fn test_bad_token_stops_before_anything_is_written() {
        let f = fixture();
        let file = pdf(10);
        let forged = RequestContext::new(Caller::anonymous(None), "00.1.00");
        let err = f
            .handler
            .submit_on(&forged, &submission(&file, 10, "application/pdf"), today())
            .unwrap_err();
        assert!(matches!(err, LifecycleError::SecurityCheckFailed));
        assert!(f.mailer.subjects().is_empty());
    }

    #[test]
    fn test_incomplete_settings_refuse_submissions() {
        let f = fixture_with(Settings::default(), None);
        let file = pdf(10);
        let err = f
            .handler
            .submit_on(&request(&f), &submission(&file, 10, "application/pdf"), today())
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Configuration(_)));
    }

    #[test]
    fn test_captcha_failure_and_outage_block_submission() {
        for verdict in [Ok(false), Err(LifecycleError::ExternalService("timeout".into()))] {
            let f = fixture_with(test_settings(), Some(Arc::new(StaticCaptcha(verdict))));
            let file = pdf(10);
            let err = f
                .handler
                .submit_on(&request(&f), &submission(&file, 10, "application/pdf"), today())
                .unwrap_err();
            assert!(matches!(err, LifecycleError::ExternalService(_)));
            assert_eq!(f.store.count_by_status(ApplicantStatus::Pending).unwrap(), 0);
        }
    }

    #[test]
    fn test_accepted_captcha_lets_submission_through() {
        let f = fixture_with(test_settings(), Some(Arc::new(StaticCaptcha(Ok(true)))));
        let file = pdf(10);
        let mut with_proof = submission(&file, 10, "application/pdf");
        with_proof.captcha_token = Some("proof".to_string());
        f.handler.submit_on(&request(&f), &with_proof, today()).unwrap();
    }

    #[test]
    fn test_mail_failure_does_not_block_submission() {
        let db = test_database();
        let settings = Arc::new(test_settings());
        let gatekeeper = Arc::new(test_gatekeeper(db.clone()));
        let store = Arc::new(ApplicantStore::new(db, Duration::from_secs(900)));
        let notifier = Arc::new(
            Notifier::new(settings.clone(), Arc::new(RecordingMailer::failing())).unwrap(),
        );
        let handler = SubmissionHandler::new(settings, gatekeeper.clone(), None, store.clone(), notifier);
        let token = gatekeeper.issue(&ActionScope::SubmitApplication).unwrap();
        let file = pdf(10);

        let receipt = handler
            .submit_on(
                &RequestContext::new(Caller::anonymous(None), token),
                &submission(&file, 10, "application/pdf"),
                today(),
            )
            .unwrap();

        assert!(!receipt.admin_notification.is_sent());
        assert!(store.get_by_id(receipt.applicant_id).is_ok());
    }

    #[test]
    fn test_file_names_are_sanitized() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "etc-passwd");
        assert_eq!(sanitize_file_name("cv.pdf"), "cv.pdf");
        assert_eq!(sanitize_file_name("***"), "resume.pdf");
    }
}
