use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

pub const ALLOWED_RESUME_MIME: &str = "application/pdf";
pub const ITEMS_PER_PAGE: usize = 20;
const SETTINGS_ENV: &str = "HR_INTAKE_SETTINGS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HireDefaults {
    pub designation: i64,
    pub department: i64,
    pub employment_type: String,
    pub hiring_source: String,
    pub first_employee_number: u64,
}

impl Default for HireDefaults {
    fn default() -> Self {
        Self {
            designation: 21,
            department: 12,
            employment_type: "contract".to_string(),
            hiring_source: "applicant_tracking".to_string(),
            first_employee_number: 2025201,
        }
    }
}

pub const MIN_AGE_RANGE: RangeInclusive<u32> = 16..=100;
pub const MAX_FILE_SIZE_MB_RANGE: RangeInclusive<u64> = 1..=20;

/// Process-wide settings. The mail and company fields default to empty, and
/// an install with empty fields refuses submissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub admin_email: String,
    pub from_name: String,
    pub from_email: String,
    pub reply_to_email: Option<String>,
    pub company_name: String,
    pub min_age: u32,
    pub max_file_size_mb: u64,
    pub site_url: String,
    pub captcha_secret: Option<String>,
    pub captcha_timeout_secs: u64,
    pub token_secret: String,
    pub token_ttl_secs: u64,
    pub cache_ttl_secs: u64,
    pub hire: HireDefaults,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            admin_email: String::new(),
            from_name: String::new(),
            from_email: String::new(),
            reply_to_email: None,
            company_name: String::new(),
            min_age: 18,
            max_file_size_mb: 5,
            site_url: "http://localhost".to_string(),
            captcha_secret: None,
            captcha_timeout_secs: 10,
            token_secret: String::new(),
            token_ttl_secs: 86_400,
            cache_ttl_secs: 900,
            hire: HireDefaults::default(),
        }
    }
}

impl Settings {
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var(SETTINGS_ENV) {
            return PathBuf::from(path);
        }
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "hr-intake") {
            proj_dirs.config_dir().join("settings.json")
        } else {
            PathBuf::from("settings.json")
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)
            .with_context(|| format!("Failed to write settings file: {}", path.display()))
    }

    /// Every problem with the settings, in display order. Empty means usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if !is_email(&self.admin_email) {
            errors.push("Please enter a valid admin notification email address.".to_string());
        }
        if self.from_name.trim().is_empty() {
            errors.push("Please enter a from name for emails.".to_string());
        }
        if self.from_email.trim().is_empty() {
            errors.push("From email is required".to_string());
        } else if !is_email(&self.from_email) {
            errors.push("From email is invalid".to_string());
        }
        if let Some(reply_to) = self.reply_to_email.as_deref() {
            if !reply_to.is_empty() && !is_email(reply_to) {
                errors.push("Reply-to email is invalid".to_string());
            }
        }
        if self.company_name.trim().is_empty() {
            errors.push("Company name is required".to_string());
        }
        if self.token_secret.trim().is_empty() {
            errors.push("Token secret is required".to_string());
        }
        if !MIN_AGE_RANGE.contains(&self.min_age) {
            errors.push(format!(
                "Minimum age must be between {} and {}",
                MIN_AGE_RANGE.start(),
                MIN_AGE_RANGE.end()
            ));
        }
        if !MAX_FILE_SIZE_MB_RANGE.contains(&self.max_file_size_mb) {
            errors.push(format!(
                "Maximum file size must be between {} and {} MB",
                MAX_FILE_SIZE_MB_RANGE.start(),
                MAX_FILE_SIZE_MB_RANGE.end()
            ));
        }

        errors
    }

    pub fn is_complete(&self) -> bool {
        self.validate().is_empty()
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn reply_to(&self) -> &str {
        match self.reply_to_email.as_deref() {
            Some(addr) if !addr.is_empty() => addr,
            _ => &self.from_email,
        }
    }

    pub fn from_header(&self) -> String {
        format!("{} <{}>", self.from_name, self.from_email)
    }

    pub fn portal_url(&self) -> String {
        format!("{}/hr-portal", self.site_url.trim_end_matches('/'))
    }

    pub fn lost_password_url(&self) -> String {
        format!(
            "{}/wp-login.php?action=lostpassword",
            self.site_url.trim_end_matches('/')
        )
    }

    pub fn admin_applicants_url(&self) -> String {
        format!(
            "{}/wp-admin/admin.php?page=icllc-hr-applicants&status=pending",
            self.site_url.trim_end_matches('/')
        )
    }

    pub fn captcha_timeout(&self) -> Duration {
        Duration::from_secs(self.captcha_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

pub fn is_email(candidate: &str) -> bool {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    let re = EMAIL.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)+$").expect("valid regex")
    });
    re.is_match(candidate.trim())
}

#[cfg(test)]
pub(crate) fn test_settings() -> Settings {
    Settings {
        admin_email: "hr@example.com".to_string(),
        from_name: "Example HR".to_string(),
        from_email: "noreply@example.com".to_string(),
        reply_to_email: None,
        company_name: "Example LLC".to_string(),
        site_url: "https://example.com".to_string(),
        token_secret: "00112233445566778899aabbccddeeff".to_string(),
        ..Settings::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_incomplete() {
        let settings = Settings::default();
        let errors = settings.validate();
        assert!(!settings.is_complete());
        assert!(errors.iter().any(|e| e.contains("admin notification")));
        assert!(errors.iter().any(|e| e.contains("Company name")));
    }

    #[test]
    fn test_configured_settings_validate() {
        assert!(test_settings().is_complete());
    }

    #[test]
    fn test_invalid_reply_to_is_reported() {
        let settings = Settings {
            reply_to_email: Some("not-an-address".to_string()),
            ..test_settings()
        };
        assert_eq!(settings.validate(), vec!["Reply-to email is invalid".to_string()]);
    }

    #[test]
    fn test_reply_to_falls_back_to_from() {
        let mut settings = test_settings();
        assert_eq!(settings.reply_to(), "noreply@example.com");
        settings.reply_to_email = Some("jobs@example.com".to_string());
        assert_eq!(settings.reply_to(), "jobs@example.com");
    }

    #[test]
    fn test_urls_ignore_trailing_slash() {
        let settings = Settings {
            site_url: "https://example.com/".to_string(),
            ..test_settings()
        };
        assert_eq!(settings.portal_url(), "https://example.com/hr-portal");
    }

    #[test]
    fn test_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = test_settings();
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_out_of_range_limits_are_reported() {
        let settings = Settings {
            min_age: 0,
            max_file_size_mb: 0,
            ..test_settings()
        };
        assert!(!settings.is_complete());
        assert_eq!(
            settings.validate(),
            vec![
                "Minimum age must be between 16 and 100".to_string(),
                "Maximum file size must be between 1 and 20 MB".to_string(),
            ]
        );

        let settings = Settings {
            min_age: 101,
            max_file_size_mb: 21,
            ..test_settings()
        };
        assert_eq!(settings.validate().len(), 2);

        let settings = Settings {
            min_age: 16,
            max_file_size_mb: 20,
            ..test_settings()
        };
        assert!(settings.is_complete());
    }

    #[test]
    fn test_huge_file_size_saturates_instead_of_overflowing() {
        let settings = Settings {
            max_file_size_mb: u64::MAX,
            ..test_settings()
        };
        assert_eq!(settings.max_file_size_bytes(), u64::MAX);
    }

    #[test]
    fn test_max_file_size_is_five_mebibytes_by_default() {
        assert_eq!(Settings::default().max_file_size_bytes(), 5 * 1024 * 1024);
    }
}
