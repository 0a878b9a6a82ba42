use std::sync::Arc;

use crate::accounts::{IdentityProvider, SqliteAccounts};
use crate::admin::AdminConsole;
use crate::captcha::{CaptchaVerifier, TurnstileVerifier};
use crate::config::Settings;
use crate::db::Database;
use crate::email::{Mailer, Notifier, OutboxMailer};
use crate::employees::{EmployeeDirectory, SqliteEmployees};
use crate::error::Result;
use crate::gatekeeper::{Gatekeeper, HmacTokenService};
use crate::lifecycle::TransitionEngine;
use crate::portal::EmployeePortal;
use crate::promotion::PromotionService;
use crate::store::ApplicantStore;
use crate::submission::SubmissionHandler;

/// Every component wired once around a shared database.
pub struct Intake {
    pub settings: Arc<Settings>,
    pub db: Arc<Database>,
    pub engine: Arc<TransitionEngine>,
    pub accounts: Arc<dyn IdentityProvider>,
    pub employees: Arc<dyn EmployeeDirectory>,
    pub gatekeeper: Arc<Gatekeeper>,
    pub promotion: Arc<PromotionService>,
    pub submissions: SubmissionHandler,
    pub admin: AdminConsole,
    pub portal: EmployeePortal,
}

impl Intake {
    /// Production wiring: mail goes to the outbox table and a configured
    /// CAPTCHA secret switches on Turnstile verification.
    pub fn open(settings: Settings, db: Arc<Database>) -> Result<Self> {
        let mailer: Arc<dyn Mailer> = Arc::new(OutboxMailer::new(db.clone()));
        let captcha: Option<Arc<dyn CaptchaVerifier>> = match settings.captcha_secret.as_deref() {
            Some(secret) if !secret.trim().is_empty() => Some(Arc::new(TurnstileVerifier::new(
                secret.trim(),
                settings.captcha_timeout(),
            )?)),
            _ => None,
        };
        Self::new(settings, db, mailer, captcha)
    }

    pub fn new(
        settings: Settings,
        db: Arc<Database>,
        mailer: Arc<dyn Mailer>,
        captcha: Option<Arc<dyn CaptchaVerifier>>,
    ) -> Result<Self> {
        let settings = Arc::new(settings);
        let store = Arc::new(ApplicantStore::new(db.clone(), settings.cache_ttl()));
        let engine = Arc::new(TransitionEngine::new(store.clone()));
        let accounts: Arc<dyn IdentityProvider> = Arc::new(SqliteAccounts::new(db.clone()));
        let employees: Arc<dyn EmployeeDirectory> = Arc::new(SqliteEmployees::new(db.clone()));
        let tokens = HmacTokenService::new(&settings.token_secret, settings.token_ttl(), db.clone())?;
        let gatekeeper = Arc::new(Gatekeeper::new(Arc::new(tokens)));
        let notifier = Arc::new(Notifier::new(settings.clone(), mailer)?);

        let promotion = Arc::new(PromotionService::new(
            engine.clone(),
            accounts.clone(),
            employees.clone(),
            notifier.clone(),
            settings.hire.clone(),
        ));
        let submissions = SubmissionHandler::new(
            settings.clone(),
            gatekeeper.clone(),
            captcha,
            store,
            notifier,
        );
        let admin = AdminConsole::new(gatekeeper.clone(), engine.clone(), promotion.clone());
        let portal = EmployeePortal::new(
            gatekeeper.clone(),
            accounts.clone(),
            employees.clone(),
            db.clone(),
        );

        Ok(Self {
            settings,
            db,
            engine,
            accounts,
            employees,
            gatekeeper,
            promotion,
            submissions,
            admin,
            portal,
        })
    }
}
