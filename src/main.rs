use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use hr_intake::admin::{ActionOutcome, AdminAction};
use hr_intake::config::Settings;
use hr_intake::db::Database;
use hr_intake::email::OutboxMailer;
use hr_intake::gatekeeper::ActionScope;
use hr_intake::models::{ApplicationForm, ContactDetails, UploadedFile};
use hr_intake::submission::{sanitize_file_name, Submission};
use hr_intake::{ApplicantStatus, Caller, Intake, RequestContext};
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "intake")]
#[command(about = "Applicant intake, review and employee onboarding")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Path to the settings file
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Administrator account acting on applicants
    #[arg(long, global = true, default_value = "1")]
    admin: i64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database and write a settings template if none exists
    Init,

    /// Inspect settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Submit a job application
    Submit {
        #[arg(long)]
        first_name: String,

        #[arg(long)]
        last_name: String,

        #[arg(long)]
        email: String,

        #[arg(long, default_value = "")]
        phone: String,

        /// Two-letter state code
        #[arg(long)]
        state: String,

        /// Date of birth (YYYY-MM-DD)
        #[arg(long)]
        dob: String,

        #[arg(long)]
        position: String,

        /// File holding the cover letter
        #[arg(long)]
        cover_letter: Option<PathBuf>,

        /// Resume file
        #[arg(long)]
        resume: PathBuf,

        /// MIME type reported for the resume
        #[arg(long, default_value = "application/pdf")]
        mime: String,

        /// Client address recorded with the application
        #[arg(long)]
        ip: Option<String>,

        /// CAPTCHA response token
        #[arg(long)]
        captcha: Option<String>,
    },

    /// List applicants
    List {
        /// Filter by status (pending, approved, rejected, completed)
        #[arg(short, long, default_value = "pending")]
        status: String,

        #[arg(short, long, default_value = "1")]
        page: usize,
    },

    /// Show applicant details
    Show {
        /// Applicant ID
        id: i64,
    },

    /// Approve one or more applicants
    Approve {
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Reject one or more applicants
    Reject {
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Permanently delete one or more applicants
    Delete {
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Set an applicant's status by name
    SetStatus {
        id: i64,
        status: String,
    },

    /// Create an employee from an approved applicant
    Promote {
        id: i64,
    },

    /// Save an applicant's resume to disk
    Resume {
        id: i64,

        /// Output file path (defaults to the stored file name)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Employee self-service
    Portal {
        /// Employee account ID
        #[arg(long)]
        account: i64,

        #[command(subcommand)]
        command: PortalCommands,
    },

    /// Show mail waiting in the outbox
    Outbox,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Report every problem with the settings
    Check,

    /// Print the settings file path
    Path,
}

#[derive(Subcommand)]
enum PortalCommands {
    /// Show your employee record and contact details
    Show,

    /// Update your contact details
    Update {
        #[arg(long)]
        street_1: String,

        #[arg(long, default_value = "")]
        street_2: String,

        #[arg(long)]
        city: String,

        #[arg(long)]
        state: String,

        #[arg(long)]
        postal_code: String,

        #[arg(long)]
        mobile: String,
    },
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    Ok(())
}

fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        bail!(
            "No settings at {}. Run 'intake init' and fill in the template.",
            path.display()
        );
    }
    Settings::load(path)
}

fn open_intake(db: Arc<Database>, settings_path: &Path) -> Result<Intake> {
    db.ensure_initialized()?;
    let settings = load_settings(settings_path)?;
    Intake::open(settings, db).context("Failed to wire components")
}

/// Runs an admin action the way the web router would: mint a token for
/// the action's scope, then present it.
fn run_admin(intake: &Intake, admin: i64, action: AdminAction) -> Result<()> {
    let token = intake.gatekeeper.issue(&action.scope())?;
    let request = RequestContext::new(Caller::administrator(admin), token);
    let outcome = intake.admin.perform(&request, &action)?;
    report(outcome)
}

fn report(outcome: ActionOutcome) -> Result<()> {
    if outcome.success {
        println!("{}", outcome.message);
        Ok(())
    } else {
        Err(anyhow!(outcome.message))
    }
}

fn status_action(ids: Vec<i64>, single: fn(i64) -> AdminAction, bulk: &str) -> AdminAction {
    match ids.as_slice() {
        [id] => single(*id),
        _ => AdminAction::Bulk {
            action: bulk.to_string(),
            ids,
        },
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let db_path = cli.db.unwrap_or_else(Database::default_path);
    let settings_path = cli.settings.unwrap_or_else(Settings::default_path);
    let db = Arc::new(
        Database::open(&db_path)
            .with_context(|| format!("Failed to open database at {}", db_path.display()))?,
    );

    match cli.command {
        Commands::Init => {
            db.init()?;
            println!("Database initialized at {}", db_path.display());
            if settings_path.exists() {
                println!("Settings already present at {}", settings_path.display());
            } else {
                let settings = Settings {
                    token_secret: hex::encode(rand::thread_rng().r#gen::<[u8; 32]>()),
                    ..Settings::default()
                };
                settings.save(&settings_path)?;
                println!("Settings template written to {}", settings_path.display());
                println!("Fill in the mail and company fields before accepting applications.");
            }
        }

        Commands::Config { command } => match command {
            ConfigCommands::Path => println!("{}", settings_path.display()),
            ConfigCommands::Check => {
                let settings = load_settings(&settings_path)?;
                let problems = settings.validate();
                if problems.is_empty() {
                    println!("Settings OK.");
                } else {
                    for problem in &problems {
                        println!("- {}", problem);
                    }
                    bail!("{} problem(s) in {}", problems.len(), settings_path.display());
                }
            }
        },

        Commands::Submit {
            first_name,
            last_name,
            email,
            phone,
            state,
            dob,
            position,
            cover_letter,
            resume,
            mime,
            ip,
            captcha,
        } => {
            let intake = open_intake(db, &settings_path)?;
            let cover_letter = match cover_letter {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                None => String::new(),
            };
            let size = std::fs::metadata(&resume)
                .with_context(|| format!("Failed to read {}", resume.display()))?
                .len();
            let file_name = resume
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let submission = Submission {
                form: ApplicationForm {
                    first_name,
                    last_name,
                    email,
                    phone,
                    state,
                    date_of_birth: dob,
                    position,
                    cover_letter,
                },
                resume: Some(UploadedFile {
                    file_name,
                    mime_type: mime,
                    size,
                    temp_path: resume,
                }),
                captcha_token: captcha,
            };
            let token = intake.gatekeeper.issue(&ActionScope::SubmitApplication)?;
            let request = RequestContext::new(Caller::anonymous(ip), token);
            match intake.submissions.submit(&request, &submission) {
                Ok(receipt) => {
                    println!("Application #{} received.", receipt.applicant_id);
                    println!("{}", receipt.message_english);
                    println!("{}", receipt.message_spanish);
                }
                Err(e) => bail!(e.user_message()),
            }
        }

        Commands::List { status, page } => {
            let intake = open_intake(db, &settings_path)?;
            let status: ApplicantStatus = status.parse()?;
            let listing = intake.admin.list(&Caller::administrator(cli.admin), status, page)?;

            let tabs: Vec<String> = listing
                .counts
                .iter()
                .map(|(s, n)| format!("{} ({})", s, n))
                .collect();
            println!("{}", tabs.join(" | "));
            if listing.applicants.is_empty() {
                println!("No {} applicants found.", status);
            } else {
                println!("{:<6} {:<24} {:<28} {:<22} {:<6} {:<10}", "ID", "NAME", "EMAIL", "POSITION", "STATE", "APPLIED");
                println!("{}", "-".repeat(100));
                for a in &listing.applicants {
                    println!(
                        "{:<6} {:<24} {:<28} {:<22} {:<6} {:<10}",
                        a.id,
                        truncate(&a.full_name(), 22),
                        truncate(&a.email, 26),
                        truncate(&a.position, 20),
                        a.state,
                        a.created_at.format("%Y-%m-%d")
                    );
                }
                println!(
                    "Page {} of {} ({} total)",
                    listing.page,
                    listing.total_pages.max(1),
                    listing.total
                );
            }
        }

        Commands::Show { id } => {
            let intake = open_intake(db, &settings_path)?;
            let a = intake.admin.show(&Caller::administrator(cli.admin), id)?;
            println!("Applicant #{}", a.id);
            println!("Name: {}", a.full_name());
            println!("Email: {}", a.email);
            if !a.phone.is_empty() {
                println!("Phone: {}", a.phone);
            }
            println!("State: {}", a.state);
            println!("Date of birth: {}", a.date_of_birth);
            println!("Position: {}", a.position);
            println!("Status: {}", a.status);
            println!(
                "Resume: {} ({}, {} bytes)",
                a.resume.filename,
                a.resume.mime_type,
                a.resume.data.len()
            );
            if let Some(ip) = &a.ip_address {
                println!("Submitted from: {}", ip);
            }
            println!("Applied: {}", a.created_at.format("%Y-%m-%d %H:%M"));
            if !a.cover_letter.is_empty() {
                println!("\n--- Cover Letter ---\n{}", a.cover_letter);
            }
        }

        Commands::Approve { ids } => {
            let intake = open_intake(db, &settings_path)?;
            run_admin(&intake, cli.admin, status_action(ids, AdminAction::Approve, "approve"))?;
        }

        Commands::Reject { ids } => {
            let intake = open_intake(db, &settings_path)?;
            run_admin(&intake, cli.admin, status_action(ids, AdminAction::Reject, "reject"))?;
        }

        Commands::Delete { ids } => {
            let intake = open_intake(db, &settings_path)?;
            run_admin(&intake, cli.admin, status_action(ids, AdminAction::Delete, "delete"))?;
        }

        Commands::SetStatus { id, status } => {
            let intake = open_intake(db, &settings_path)?;
            run_admin(&intake, cli.admin, AdminAction::SetStatus { id, status })?;
        }

        Commands::Promote { id } => {
            let intake = open_intake(db, &settings_path)?;
            run_admin(&intake, cli.admin, AdminAction::Promote(id))?;
        }

        Commands::Resume { id, output } => {
            let intake = open_intake(db, &settings_path)?;
            let token = intake.gatekeeper.issue(&ActionScope::DownloadResume(id))?;
            let request = RequestContext::new(Caller::administrator(cli.admin), token);
            let resume = intake.admin.download_resume(&request, id)?;
            let output = output.unwrap_or_else(|| PathBuf::from(sanitize_file_name(&resume.filename)));
            std::fs::write(&output, &resume.data)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!("Saved {} bytes to {}", resume.data.len(), output.display());
        }

        Commands::Portal { account, command } => {
            let intake = open_intake(db, &settings_path)?;
            let caller = Caller::employee(account);
            match command {
                PortalCommands::Show => {
                    let view = intake.portal.view(&caller)?;
                    println!("{}", view.display_name);
                    println!("Email: {}", view.email);
                    println!("Employee ID: {}", view.employee_id);
                    println!("Address:\n{}", view.address_display());
                    println!("Mobile: {}", view.mobile_display());
                    println!("Portal: {}", intake.settings.portal_url());
                }
                PortalCommands::Update {
                    street_1,
                    street_2,
                    city,
                    state,
                    postal_code,
                    mobile,
                } => {
                    let view = intake.portal.view(&caller)?;
                    let scope = ActionScope::UpdateContact(view.employee_row_id);
                    let request = RequestContext::new(caller, intake.gatekeeper.issue(&scope)?);
                    let contact = ContactDetails {
                        street_1,
                        street_2,
                        city,
                        state,
                        postal_code,
                        mobile,
                    };
                    let message = intake
                        .portal
                        .update_contact(&request, view.employee_row_id, &contact)?;
                    println!("{}", message);
                }
            }
        }

        Commands::Outbox => {
            db.ensure_initialized()?;
            let queued = OutboxMailer::new(db).queued()?;
            if queued.is_empty() {
                println!("Outbox is empty.");
            } else {
                println!("{:<34} {:<44}", "TO", "SUBJECT");
                println!("{}", "-".repeat(78));
                for mail in queued {
                    println!("{:<34} {:<44}", truncate(&mail.to, 32), mail.subject);
                }
            }
        }
    }

    Ok(())
}
