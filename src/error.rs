use std::fmt;

/// Steps of an employee promotion, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionStep {
    CheckPreconditions,
    CreateAccount,
    PopulateProfile,
    AllocateEmployeeId,
    WriteEmployeeRecord,
    RecordNote,
    MarkCompleted,
}

impl fmt::Display for PromotionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PromotionStep::CheckPreconditions => "check preconditions",
            PromotionStep::CreateAccount => "create account",
            PromotionStep::PopulateProfile => "populate profile",
            PromotionStep::AllocateEmployeeId => "allocate employee id",
            PromotionStep::WriteEmployeeRecord => "write employee record",
            PromotionStep::RecordNote => "record note",
            PromotionStep::MarkCompleted => "mark completed",
        };
        f.write_str(name)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LifecycleError {
    #[error("{0}")]
    Validation(String),

    /// Carries no detail about which check failed.
    #[error("Security check failed")]
    SecurityCheckFailed,

    #[error("Applicant #{0} not found")]
    NotFound(i64),

    #[error("Database error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("Promotion failed at step '{step}': {reason}")]
    Promotion { step: PromotionStep, reason: String },

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl LifecycleError {
    pub fn promotion(step: PromotionStep, reason: impl Into<String>) -> Self {
        LifecycleError::Promotion {
            step,
            reason: reason.into(),
        }
    }

    /// Text safe to show whoever made the request.
    pub fn user_message(&self) -> String {
        match self {
            LifecycleError::Validation(msg) => msg.clone(),
            LifecycleError::SecurityCheckFailed => "Security check failed".to_string(),
            LifecycleError::NotFound(_) => "Applicant not found".to_string(),
            LifecycleError::Persistence(_) => {
                "There was an error processing your request. Please try again.".to_string()
            }
            LifecycleError::Promotion { .. } => format!("Error creating employee: {}", self),
            LifecycleError::ExternalService(_) => {
                "CAPTCHA verification failed. Please refresh and try again.".to_string()
            }
            LifecycleError::Configuration(_) => {
                "Plugin is not properly configured. Please contact the site administrator."
                    .to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, LifecycleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_failures_are_generic() {
        let err = LifecycleError::SecurityCheckFailed;
        assert_eq!(err.to_string(), "Security check failed");
        assert_eq!(err.user_message(), "Security check failed");
    }

    #[test]
    fn test_persistence_details_do_not_leak_to_callers() {
        let err = LifecycleError::from(rusqlite::Error::QueryReturnedNoRows);
        assert!(!err.user_message().contains("Query"));
    }

    #[test]
    fn test_promotion_error_names_the_step() {
        let err = LifecycleError::promotion(PromotionStep::CreateAccount, "email taken");
        assert_eq!(
            err.to_string(),
            "Promotion failed at step 'create account': email taken"
        );
    }
}
