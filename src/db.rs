use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::error::{LifecycleError, Result};
use crate::models::{Applicant, ApplicantStatus, NewApplicant, Resume};

const APPLICANT_COLUMNS: &str = "id, first_name, last_name, email, phone, state, date_of_birth, \
     position, cover_letter, resume_data, resume_filename, resume_mime_type, status, \
     ip_address, created_at";

pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    LifecycleError::Configuration(format!(
                        "Cannot create data directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn default_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "hr-intake") {
            proj_dirs.data_dir().join("hr-intake.db")
        } else {
            PathBuf::from("hr-intake.db")
        }
    }

    /// A poisoned lock still guards a usable connection, so recover it.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn init(&self) -> Result<()> {
        self.conn().execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS applicants (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                first_name TEXT NOT NULL CHECK (first_name <> ''),
                last_name TEXT NOT NULL CHECK (last_name <> ''),
                email TEXT NOT NULL CHECK (email <> ''),
                phone TEXT NOT NULL DEFAULT '',
                state TEXT NOT NULL CHECK (state <> ''),
                date_of_birth TEXT NOT NULL,
                position TEXT NOT NULL CHECK (position <> ''),
                cover_letter TEXT NOT NULL DEFAULT '',
                resume_data BLOB NOT NULL,
                resume_filename TEXT NOT NULL,
                resume_mime_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'approved', 'rejected', 'completed')),
                ip_address TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                password_hash TEXT NOT NULL,
                first_name TEXT NOT NULL DEFAULT '',
                last_name TEXT NOT NULL DEFAULT '',
                display_name TEXT NOT NULL DEFAULT '',
                role TEXT,
                registered_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS account_meta (
                account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                meta_key TEXT NOT NULL,
                meta_value TEXT NOT NULL,
                PRIMARY KEY (account_id, meta_key)
            );

            CREATE TABLE IF NOT EXISTS employees (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL UNIQUE,
                employee_id TEXT NOT NULL UNIQUE,
                designation INTEGER NOT NULL,
                department INTEGER NOT NULL,
                hiring_source TEXT NOT NULL,
                hiring_date TEXT NOT NULL,
                date_of_birth TEXT NOT NULL,
                employment_type TEXT NOT NULL,
                status TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS employee_notes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                comment TEXT NOT NULL,
                comment_by INTEGER,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS hr_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                employee_id INTEGER NOT NULL,
                account_id INTEGER NOT NULL,
                action TEXT NOT NULL,
                details TEXT NOT NULL,
                ip_address TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS mail_outbox (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                recipient TEXT NOT NULL,
                subject TEXT NOT NULL,
                html_body TEXT NOT NULL,
                headers TEXT NOT NULL,
                queued_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS consumed_tokens (
                nonce TEXT PRIMARY KEY,
                expires_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_applicants_status ON applicants(status, created_at);
            CREATE INDEX IF NOT EXISTS idx_applicants_email ON applicants(email);
            CREATE INDEX IF NOT EXISTS idx_notes_account ON employee_notes(account_id);
            CREATE INDEX IF NOT EXISTS idx_logs_employee ON hr_logs(employee_id);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='applicants'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(LifecycleError::Configuration(
                "Database not initialized. Run 'intake init' first.".to_string(),
            ));
        }
        Ok(())
    }

    // --- Applicant rows ---

    pub fn insert_applicant(&self, applicant: &NewApplicant, created_at: DateTime<Utc>) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO applicants (first_name, last_name, email, phone, state, date_of_birth,
                 position, cover_letter, resume_data, resume_filename, resume_mime_type,
                 status, ip_address, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 'pending', ?12, ?13)",
            params![
                applicant.first_name,
                applicant.last_name,
                applicant.email,
                applicant.phone,
                applicant.state,
                applicant.date_of_birth.format("%Y-%m-%d").to_string(),
                applicant.position,
                applicant.cover_letter,
                applicant.resume.data,
                applicant.resume.filename,
                applicant.resume.mime_type,
                applicant.ip_address,
                created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(applicant_id = id, "inserted applicant row");
        Ok(id)
    }

    pub fn get_applicant(&self, id: i64) -> Result<Option<Applicant>> {
        let sql = format!("SELECT {} FROM applicants WHERE id = ?1", APPLICANT_COLUMNS);
        let applicant = self
            .conn()
            .query_row(&sql, [id], Self::row_to_applicant)
            .optional()?;
        Ok(applicant)
    }

    pub fn list_applicants(
        &self,
        status: ApplicantStatus,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Applicant>> {
        let sql = format!(
            "SELECT {} FROM applicants WHERE status = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2 OFFSET ?3",
            APPLICANT_COLUMNS
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![status.as_str(), limit as i64, offset as i64],
            Self::row_to_applicant,
        )?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn count_applicants(&self, status: ApplicantStatus) -> Result<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM applicants WHERE status = ?1",
            [status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Moves the row from `from` to `to`. Zero rows means the row is gone
    /// or no longer in `from`.
    pub fn set_applicant_status(
        &self,
        id: i64,
        from: ApplicantStatus,
        to: ApplicantStatus,
    ) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE applicants SET status = ?1 WHERE id = ?2 AND status = ?3",
            params![to.as_str(), id, from.as_str()],
        )?;
        Ok(affected)
    }

    /// The resume lives in the same row, so deleting the row removes it too.
    pub fn delete_applicant(&self, id: i64) -> Result<usize> {
        let affected = self
            .conn()
            .execute("DELETE FROM applicants WHERE id = ?1", [id])?;
        Ok(affected)
    }

    fn row_to_applicant(row: &rusqlite::Row) -> rusqlite::Result<Applicant> {
        let status: String = row.get(12)?;
        let date_of_birth: String = row.get(6)?;
        let created_at: String = row.get(14)?;
        Ok(Applicant {
            id: row.get(0)?,
            first_name: row.get(1)?,
            last_name: row.get(2)?,
            email: row.get(3)?,
            phone: row.get(4)?,
            state: row.get(5)?,
            date_of_birth: parse_date(6, &date_of_birth)?,
            position: row.get(7)?,
            cover_letter: row.get(8)?,
            resume: Resume {
                data: row.get(9)?,
                filename: row.get(10)?,
                mime_type: row.get(11)?,
            },
            status: status
                .parse()
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(12, Type::Text, Box::new(e)))?,
            ip_address: row.get(13)?,
            created_at: parse_timestamp(14, &created_at)?,
        })
    }

    // --- Audit log ---

    pub fn insert_log(
        &self,
        employee_id: i64,
        account_id: i64,
        action: &str,
        details: &serde_json::Value,
        ip_address: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO hr_logs (employee_id, account_id, action, details, ip_address, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                employee_id,
                account_id,
                action,
                details.to_string(),
                ip_address.unwrap_or("0.0.0.0"),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_logs(&self, employee_id: i64) -> Result<Vec<(String, serde_json::Value)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT action, details FROM hr_logs WHERE employee_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([employee_id], |row| {
            let action: String = row.get(0)?;
            let details: String = row.get(1)?;
            Ok((action, details))
        })?;
        let mut logs = Vec::new();
        for row in rows {
            let (action, details) = row?;
            let value = serde_json::from_str(&details).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e))
            })?;
            logs.push((action, value));
        }
        Ok(logs)
    }

    // --- Single-use token ledger ---

    /// Records a token nonce as spent. Returns false if it was already spent.
    pub fn consume_token(&self, nonce: &str, expires_at: i64, now: i64) -> Result<bool> {
        let conn = self.conn();
        conn.execute("DELETE FROM consumed_tokens WHERE expires_at < ?1", [now])?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO consumed_tokens (nonce, expires_at) VALUES (?1, ?2)",
            params![nonce, expires_at],
        )?;
        Ok(inserted == 1)
    }
}

pub(crate) fn parse_date(idx: usize, raw: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
pub(crate) fn test_database() -> std::sync::Arc<Database> {
    let db = Database::open_in_memory().unwrap();
    db.init().unwrap();
    std::sync::Arc::new(db)
}

#[cfg(test)]
pub(crate) fn sample_applicant(email: &str) -> NewApplicant {
    NewApplicant {
        first_name: "Jane".to_string(),
        last_name: "Doe".to_string(),
        email: email.to_string(),
        phone: "555-123-4567".to_string(),
        state: "TX".to_string(),
        date_of_birth: NaiveDate::from_ymd_opt(1990, 4, 12).unwrap(),
        position: "Customer Service".to_string(),
        cover_letter: String::new(),
        resume: Resume {
            filename: "resume.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            data: b"%PDF-1.7 sample".to_vec(),
        },
        ip_address: Some("203.0.113.9".to_string()),
    }
}
