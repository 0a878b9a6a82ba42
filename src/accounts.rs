use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::db::{parse_timestamp, Database};
use crate::error::{LifecycleError, Result};
use crate::models::{Account, Role};

/// Profile fields written onto a fresh account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub first_name: String,
    pub last_name: String,
}

impl Profile {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// The host's user store: accounts, roles and per-account metadata.
pub trait IdentityProvider: Send + Sync {
    fn account_exists(&self, email: &str) -> Result<bool>;
    fn create_account(&self, email: &str, password: &str) -> Result<i64>;
    fn update_profile(&self, account_id: i64, profile: &Profile) -> Result<()>;
    fn assign_role(&self, account_id: i64, role: Role) -> Result<()>;
    fn set_meta(&self, account_id: i64, key: &str, value: &str) -> Result<()>;
    fn get_meta(&self, account_id: i64, keys: &[&str]) -> Result<HashMap<String, String>>;
    fn find_account(&self, account_id: i64) -> Result<Option<Account>>;
    fn delete_account(&self, account_id: i64) -> Result<()>;
}

/// A password nobody is ever told. Employees set their own through the
/// lost-password flow.
pub fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect()
}

fn hash_password(password: &str) -> String {
    let salt: [u8; 16] = rand::thread_rng().r#gen();
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    format!("{}${}", hex::encode(salt), hex::encode(hasher.finalize()))
}

pub struct SqliteAccounts {
    db: Arc<Database>,
}

impl SqliteAccounts {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn row_to_account(row: &rusqlite::Row) -> rusqlite::Result<Account> {
        let role: Option<String> = row.get(5)?;
        let registered_at: String = row.get(6)?;
        Ok(Account {
            id: row.get(0)?,
            email: row.get(1)?,
            first_name: row.get(2)?,
            last_name: row.get(3)?,
            display_name: row.get(4)?,
            role: role.and_then(|r| r.parse().ok()),
            registered_at: parse_timestamp(6, &registered_at)?,
        })
    }
}

impl IdentityProvider for SqliteAccounts {
    fn account_exists(&self, email: &str) -> Result<bool> {
        let count: i64 = self.db.conn().query_row(
            "SELECT COUNT(*) FROM accounts WHERE email = ?1",
            [email],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn create_account(&self, email: &str, password: &str) -> Result<i64> {
        let conn = self.db.conn();
        let result = conn.execute(
            "INSERT INTO accounts (email, password_hash, registered_at) VALUES (?1, ?2, ?3)",
            params![email, hash_password(password), Utc::now().to_rfc3339()],
        );
        match result {
            Ok(_) => {
                let id = conn.last_insert_rowid();
                info!(account_id = id, "account created");
                Ok(id)
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(LifecycleError::Validation(
                    "A user with this email already exists".to_string(),
                ))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn update_profile(&self, account_id: i64, profile: &Profile) -> Result<()> {
        let updated = self.db.conn().execute(
            "UPDATE accounts SET first_name = ?1, last_name = ?2, display_name = ?3 WHERE id = ?4",
            params![profile.first_name, profile.last_name, profile.display_name(), account_id],
        )?;
        if updated == 0 {
            return Err(LifecycleError::Validation(format!(
                "Account #{} does not exist",
                account_id
            )));
        }
        Ok(())
    }

    fn assign_role(&self, account_id: i64, role: Role) -> Result<()> {
        let updated = self.db.conn().execute(
            "UPDATE accounts SET role = ?1 WHERE id = ?2",
            params![role.as_str(), account_id],
        )?;
        if updated == 0 {
            return Err(LifecycleError::Validation(format!(
                "Account #{} does not exist",
                account_id
            )));
        }
        Ok(())
    }

    fn set_meta(&self, account_id: i64, key: &str, value: &str) -> Result<()> {
        self.db.conn().execute(
            "INSERT INTO account_meta (account_id, meta_key, meta_value) VALUES (?1, ?2, ?3)
             ON CONFLICT(account_id, meta_key) DO UPDATE SET meta_value = excluded.meta_value",
            params![account_id, key, value],
        )?;
        Ok(())
    }

    fn get_meta(&self, account_id: i64, keys: &[&str]) -> Result<HashMap<String, String>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT meta_value FROM account_meta WHERE account_id = ?1 AND meta_key = ?2",
        )?;
        let mut values = HashMap::new();
        for key in keys {
            let value: Option<String> = stmt
                .query_row(params![account_id, key], |row| row.get(0))
                .optional()?;
            if let Some(value) = value {
                values.insert(key.to_string(), value);
            }
        }
        Ok(values)
    }

    fn find_account(&self, account_id: i64) -> Result<Option<Account>> {
        let account = self
            .db
            .conn()
            .query_row(
                "SELECT id, email, first_name, last_name, display_name, role, registered_at
                 FROM accounts WHERE id = ?1",
                [account_id],
                Self::row_to_account,
            )
            .optional()?;
        Ok(account)
    }

    fn delete_account(&self, account_id: i64) -> Result<()> {
        let conn = self.db.conn();
        conn.execute("DELETE FROM account_meta WHERE account_id = ?1", [account_id])?;
        conn.execute("DELETE FROM accounts WHERE id = ?1", [account_id])?;
        info!(account_id, "account deleted");
        Ok(())
    }
}
