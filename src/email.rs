use chrono::Utc;
use handlebars::Handlebars;
use rusqlite::params;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Settings;
use crate::db::Database;
use crate::error::{LifecycleError, Result};
use crate::models::{Account, NewApplicant};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub headers: Vec<String>,
}

/// Outbound mail transport. Returning an error means the message was not
/// accepted for delivery.
pub trait Mailer: Send + Sync {
    fn send(&self, mail: &OutgoingMail) -> Result<()>;
}

/// Spools messages into the `mail_outbox` table for the host's mail
/// transport to pick up.
pub struct OutboxMailer {
    db: Arc<Database>,
}

impl OutboxMailer {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn queued(&self) -> Result<Vec<OutgoingMail>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT recipient, subject, html_body, headers FROM mail_outbox ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            let headers: String = row.get(3)?;
            Ok(OutgoingMail {
                to: row.get(0)?,
                subject: row.get(1)?,
                html_body: row.get(2)?,
                headers: headers.lines().map(str::to_string).collect(),
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

impl Mailer for OutboxMailer {
    fn send(&self, mail: &OutgoingMail) -> Result<()> {
        self.db
            .conn()
            .execute(
                "INSERT INTO mail_outbox (recipient, subject, html_body, headers, queued_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    mail.to,
                    mail.subject,
                    mail.html_body,
                    mail.headers.join("\n"),
                    Utc::now().to_rfc3339()
                ],
            )
            .map_err(|e| LifecycleError::ExternalService(format!("mail spool failed: {}", e)))?;
        Ok(())
    }
}

/// Result of a notification attempt. Failures are reported, never raised:
/// notifications do not gate the data change that triggered them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Failed(String),
}

impl Delivery {
    pub fn is_sent(&self) -> bool {
        matches!(self, Delivery::Sent)
    }
}

const ADMIN_NOTIFICATION: &str = r#"<h2>A new job application has been submitted</h2>
Name: {{first_name}} {{last_name}}<br>
Email: {{email}}<br>
Phone: {{phone}}<br>
Position: {{position}}<br><br><hr>
<b>Visit Applicant Management:</b> <a href="{{admin_url}}">click here</a><br>
<small>&copy; {{company_name}}. All rights reserved.</small><br>"#;

const APPLICANT_CONFIRMATION: &str = r#"<html>
<body>
<div class="container">
  <div class="header"><h2>Thanks for Applying!</h2></div>
  <div class="content">
    <p><b>Hello, {{first_name}} {{last_name}}!</b></p>
    <p>We've received your application for {{position}} with {{company_name}}. Congratulations on taking the first step in partnering with us for your future!</p>
    <p>We will review your application and contact you shortly with the next steps in our onboarding process.<br><br><em>Please read any future emails in their entirety.</em></p>
  </div>
  <div class="spanish-content">
    <p><b>¡Hola, {{first_name}} {{last_name}}!</b></p>
    <p>Hemos recibido su solicitud para {{position}} con {{company_name}}. ¡Felicidades por dar el primer paso para asociarse con nosotros para su futuro!</p>
    <p>Revisaremos su solicitud y nos pondremos en contacto con usted pronto con los siguientes pasos en nuestro proceso de incorporación.<br><br><em>Por favor, lea cualquier correo electrónico futuro en su totalidad.</em></p>
  </div>
  <div class="footer">
    <p><b>Best regards (Atentamente),</b><br>Your HR Team</p>
    <p><small>Email sent from <a href="{{site_url}}">{{company_name}}</a>.</small></p>
  </div>
</div>
</body>
</html>"#;

const WELCOME: &str = r#"<!DOCTYPE html>
<html>
<body>
<div class="container">
  <div class="header"><h2>Welcome to HR Portal</h2></div>
  <div class="content">
    <p>Hello <strong>{{first_name}}</strong>,</p>
    <p>Your HR Portal account has been successfully created. You will use this portal to sign important documents, view your paystubs, and keep your personal information up to date.</p>
    <p>Use your applicant email, {{email}} to login. You will need to set your password - see below.</p>
    <p style="text-align: center;"><a href="{{portal_url}}" class="button">Access Your HR Portal</a></p>
    <p><strong>Portal URL:</strong> {{portal_url}}</p>
    <p><b>To set your password,</b> please click the <em><b><a href="{{lost_password_url}}">Lost your password?</a></b></em> link under the login box when you first access the portal. Enter the email you used during your application (shown above) and a secure link will be sent to you to set your password.</p>
  </div>
  <div class="spanish-content">
    <p>Hola <strong>{{first_name}}</strong>,</p>
    <p>Su cuenta del Portal de RH ha sido creada exitosamente. Utilizará este portal para firmar documentos importantes, ver sus talones de pago y mantener su información personal actualizada.</p>
    <p>Use su correo electrónico de solicitante, {{email}} para iniciar sesión. Necesitará establecer su contraseña; consulte a continuación.</p>
    <p style="text-align: center;"><a href="{{portal_url}}" class="button">Acceder a Su Portal de RH</a></p>
    <p><strong>URL del Portal:</strong> {{portal_url}}</p>
    <p><b>Para establecer su contraseña,</b> haga clic en el enlace <em><b><a href="{{lost_password_url}}">¿Perdió su contraseña?</a></b></em> debajo del cuadro de inicio de sesión cuando acceda al portal por primera vez.</p>
  </div>
  <div class="footer">
    <p><b>Best regards / Atentamente,</b><br>Your HR Team</p>
    <p><small>Email sent from <a href="{{site_url}}">{{company_name}}</a>.</small></p>
  </div>
</div>
</body>
</html>"#;

#[derive(Serialize)]
struct ApplicationContext<'a> {
    first_name: &'a str,
    last_name: &'a str,
    email: &'a str,
    phone: &'a str,
    position: &'a str,
    company_name: &'a str,
    admin_url: String,
    site_url: &'a str,
}

#[derive(Serialize)]
struct WelcomeContext<'a> {
    first_name: &'a str,
    email: &'a str,
    portal_url: String,
    lost_password_url: String,
    company_name: &'a str,
    site_url: &'a str,
}

/// Builds and dispatches the lifecycle emails.
pub struct Notifier {
    settings: Arc<Settings>,
    mailer: Arc<dyn Mailer>,
    templates: Handlebars<'static>,
}

impl Notifier {
    pub fn new(settings: Arc<Settings>, mailer: Arc<dyn Mailer>) -> Result<Self> {
        let mut templates = Handlebars::new();
        templates.set_strict_mode(true);
        for (name, source) in [
            ("admin_notification", ADMIN_NOTIFICATION),
            ("applicant_confirmation", APPLICANT_CONFIRMATION),
            ("welcome", WELCOME),
        ] {
            templates.register_template_string(name, source).map_err(|e| {
                LifecycleError::Configuration(format!("invalid {} template: {}", name, e))
            })?;
        }
        Ok(Self {
            settings,
            mailer,
            templates,
        })
    }

    fn headers(&self) -> Vec<String> {
        vec![
            "Content-Type: text/html; charset=UTF-8".to_string(),
            format!("From: {}", self.settings.from_header()),
            format!("Reply-To: {}", self.settings.reply_to()),
        ]
    }

    fn render<T: Serialize>(&self, template: &str, context: &T) -> Result<String> {
        self.templates.render(template, context).map_err(|e| {
            LifecycleError::Configuration(format!("failed to render {}: {}", template, e))
        })
    }

    fn dispatch(&self, kind: &'static str, to: &str, subject: &str, body: Result<String>) -> Delivery {
        let mail = match body {
            Ok(html_body) => OutgoingMail {
                to: to.to_string(),
                subject: subject.to_string(),
                html_body,
                headers: self.headers(),
            },
            Err(e) => {
                warn!(kind, outcome = "failed", error = %e, "notification not rendered");
                return Delivery::Failed(e.to_string());
            }
        };
        match self.mailer.send(&mail) {
            Ok(()) => {
                info!(kind, outcome = "sent", "notification dispatched");
                Delivery::Sent
            }
            Err(e) => {
                warn!(kind, outcome = "failed", error = %e, "notification failed");
                Delivery::Failed(e.to_string())
            }
        }
    }

    fn application_context<'a>(&'a self, applicant: &'a NewApplicant) -> ApplicationContext<'a> {
        ApplicationContext {
            first_name: &applicant.first_name,
            last_name: &applicant.last_name,
            email: &applicant.email,
            phone: &applicant.phone,
            position: &applicant.position,
            company_name: &self.settings.company_name,
            admin_url: self.settings.admin_applicants_url(),
            site_url: &self.settings.site_url,
        }
    }

    pub fn application_received(&self, applicant: &NewApplicant) -> Delivery {
        let body = self.render("admin_notification", &self.application_context(applicant));
        self.dispatch(
            "admin_notification",
            &self.settings.admin_email,
            "New Job Application Received",
            body,
        )
    }

    pub fn applicant_confirmation(&self, applicant: &NewApplicant) -> Delivery {
        let body = self.render("applicant_confirmation", &self.application_context(applicant));
        self.dispatch(
            "applicant_confirmation",
            &applicant.email,
            "Application Received / Solicitud Recibida",
            body,
        )
    }

    pub fn welcome(&self, account: &Account) -> Delivery {
        let context = WelcomeContext {
            first_name: &account.first_name,
            email: &account.email,
            portal_url: self.settings.portal_url(),
            lost_password_url: self.settings.lost_password_url(),
            company_name: &self.settings.company_name,
            site_url: &self.settings.site_url,
        };
        let body = self.render("welcome", &context);
        self.dispatch(
            "welcome",
            &account.email,
            "HR Portal Access / Acceso al Portal de RH",
            body,
        )
    }
}
