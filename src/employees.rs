use chrono::{SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;
use tracing::debug;

use crate::db::{parse_date, parse_timestamp, Database};
use crate::error::{LifecycleError, Result};
use crate::models::{EmployeeDraft, EmployeeRecord};

/// Outcome of writing an employee record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted(i64),
    Updated(i64),
}

impl Upsert {
    pub fn row_id(&self) -> i64 {
        match self {
            Upsert::Inserted(id) | Upsert::Updated(id) => *id,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("employee identifier {0} is already taken")]
    DuplicateEmployeeId(String),

    #[error(transparent)]
    Other(#[from] LifecycleError),
}

impl From<rusqlite::Error> for DirectoryError {
    fn from(e: rusqlite::Error) -> Self {
        DirectoryError::Other(LifecycleError::Persistence(e))
    }
}

/// The host ERP's employee table and its notes log.
pub trait EmployeeDirectory: Send + Sync {
    fn find_by_account(&self, account_id: i64) -> Result<Option<EmployeeRecord>>;

    /// Inserts the record, or updates the one already linked to the account.
    /// A clash on the employee identifier is reported as
    /// [`DirectoryError::DuplicateEmployeeId`] so callers can retry.
    fn upsert(&self, draft: &EmployeeDraft) -> std::result::Result<Upsert, DirectoryError>;

    /// Largest numeric employee identifier, ignoring non-numeric ones.
    fn max_employee_number(&self) -> Result<Option<u64>>;

    fn delete_by_account(&self, account_id: i64) -> Result<()>;

    fn add_note(&self, account_id: i64, comment: &str, comment_by: Option<i64>) -> Result<i64>;

    fn delete_note(&self, note_id: i64) -> Result<()>;

    fn notes(&self, account_id: i64) -> Result<Vec<String>>;
}

pub struct SqliteEmployees {
    db: Arc<Database>,
}

impl SqliteEmployees {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn row_to_employee(row: &rusqlite::Row) -> rusqlite::Result<EmployeeRecord> {
        let hiring_date: String = row.get(6)?;
        let date_of_birth: String = row.get(7)?;
        Ok(EmployeeRecord {
            id: row.get(0)?,
            account_id: row.get(1)?,
            employee_id: row.get(2)?,
            designation: row.get(3)?,
            department: row.get(4)?,
            hiring_source: row.get(5)?,
            hiring_date: parse_timestamp(6, &hiring_date)?,
            date_of_birth: parse_date(7, &date_of_birth)?,
            employment_type: row.get(8)?,
            status: row.get(9)?,
        })
    }
}

fn is_employee_id_clash(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, Some(msg)) => {
            err.code == rusqlite::ErrorCode::ConstraintViolation
                && msg.contains("employees.employee_id")
        }
        _ => false,
    }
}

impl EmployeeDirectory for SqliteEmployees {
    fn find_by_account(&self, account_id: i64) -> Result<Option<EmployeeRecord>> {
        let record = self
            .db
            .conn()
            .query_row(
                "SELECT id, account_id, employee_id, designation, department, hiring_source,
                        hiring_date, date_of_birth, employment_type, status
                 FROM employees WHERE account_id = ?1",
                [account_id],
                Self::row_to_employee,
            )
            .optional()?;
        Ok(record)
    }

    fn upsert(&self, draft: &EmployeeDraft) -> std::result::Result<Upsert, DirectoryError> {
        let conn = self.db.conn();
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM employees WHERE account_id = ?1",
                [draft.account_id],
                |row| row.get(0),
            )
            .optional()?;

        let hiring_date = draft.hiring_date.to_rfc3339_opts(SecondsFormat::Secs, true);
        let date_of_birth = draft.date_of_birth.format("%Y-%m-%d").to_string();
        let result = match existing {
            Some(id) => conn
                .execute(
                    "UPDATE employees SET employee_id = ?1, designation = ?2, department = ?3,
                         hiring_source = ?4, hiring_date = ?5, date_of_birth = ?6,
                         employment_type = ?7, status = ?8
                     WHERE id = ?9",
                    params![
                        draft.employee_id,
                        draft.designation,
                        draft.department,
                        draft.hiring_source,
                        hiring_date,
                        date_of_birth,
                        draft.employment_type,
                        draft.status,
                        id
                    ],
                )
                .map(|_| Upsert::Updated(id)),
            None => conn
                .execute(
                    "INSERT INTO employees (account_id, employee_id, designation, department,
                         hiring_source, hiring_date, date_of_birth, employment_type, status)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        draft.account_id,
                        draft.employee_id,
                        draft.designation,
                        draft.department,
                        draft.hiring_source,
                        hiring_date,
                        date_of_birth,
                        draft.employment_type,
                        draft.status
                    ],
                )
                .map(|_| Upsert::Inserted(conn.last_insert_rowid())),
        };

        match result {
            Ok(upsert) => {
                debug!(account_id = draft.account_id, employee_id = %draft.employee_id, ?upsert, "employee record written");
                Ok(upsert)
            }
            Err(e) if is_employee_id_clash(&e) => {
                Err(DirectoryError::DuplicateEmployeeId(draft.employee_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn max_employee_number(&self) -> Result<Option<u64>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare("SELECT employee_id FROM employees")?;
        let ids = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut max: Option<u64> = None;
        for id in ids {
            if let Ok(n) = id?.trim().parse::<u64>() {
                max = Some(max.map_or(n, |m| m.max(n)));
            }
        }
        Ok(max)
    }

    fn delete_by_account(&self, account_id: i64) -> Result<()> {
        self.db
            .conn()
            .execute("DELETE FROM employees WHERE account_id = ?1", [account_id])?;
        Ok(())
    }

    fn add_note(&self, account_id: i64, comment: &str, comment_by: Option<i64>) -> Result<i64> {
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO employee_notes (account_id, comment, comment_by, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![account_id, comment, comment_by, Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn delete_note(&self, note_id: i64) -> Result<()> {
        self.db
            .conn()
            .execute("DELETE FROM employee_notes WHERE id = ?1", [note_id])?;
        Ok(())
    }

    fn notes(&self, account_id: i64) -> Result<Vec<String>> {
        let conn = self.db.conn();
        let mut stmt =
            conn.prepare("SELECT comment FROM employee_notes WHERE account_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map([account_id], |row| row.get(0))?;
        Ok(rows.collect::<std::result::Result<Vec<String>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_database;
    use chrono::NaiveDate;

    fn draft(account_id: i64, employee_id: &str) -> EmployeeDraft {
        EmployeeDraft {
            account_id,
            employee_id: employee_id.to_string(),
            designation: 21,
            department: 12,
            hiring_source: "applicant_tracking".to_string(),
            hiring_date: Utc::now(),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
            employment_type: "contract".to_string(),
            status: "active".to_string(),
        }
    }

    #[test]
    fn test_insert_then_update_same_account() {
        let employees = SqliteEmployees::new(test_database());
        let first = employees.upsert(&draft(1, "2025201")).unwrap();
        assert!(matches!(first, Upsert::Inserted(_)));
        let second = employees.upsert(&draft(1, "2025202")).unwrap();
        assert_eq!(second, Upsert::Updated(first.row_id()));
        let record = employees.find_by_account(1).unwrap().unwrap();
        assert_eq!(record.employee_id, "2025202");
    }

    #[test]
    fn test_duplicate_identifier_is_detected() {
        let employees = SqliteEmployees::new(test_database());
        employees.upsert(&draft(1, "2025201")).unwrap();
        let clash = employees.upsert(&draft(2, "2025201")).unwrap_err();
        assert!(matches!(clash, DirectoryError::DuplicateEmployeeId(id) if id == "2025201"));
        assert!(employees.find_by_account(2).unwrap().is_none());
    }

    #[test]
    fn test_max_ignores_non_numeric_identifiers() {
        let employees = SqliteEmployees::new(test_database());
        assert_eq!(employees.max_employee_number().unwrap(), None);
        employees.upsert(&draft(1, "2025205")).unwrap();
        employees.upsert(&draft(2, "EMP-9")).unwrap();
        employees.upsert(&draft(3, "2025201")).unwrap();
        assert_eq!(employees.max_employee_number().unwrap(), Some(2025205));
    }

    #[test]
    fn test_notes_are_append_only_per_account() {
        let employees = SqliteEmployees::new(test_database());
        employees.add_note(1, "first", Some(9)).unwrap();
        let second = employees.add_note(1, "second", None).unwrap();
        employees.add_note(2, "other", None).unwrap();
        assert_eq!(employees.notes(1).unwrap(), vec!["first", "second"]);
        employees.delete_note(second).unwrap();
        assert_eq!(employees.notes(1).unwrap(), vec!["first"]);
    }
}
