//! Applicant persistence with a short-lived read cache in front.
//!
//! The database is the source of truth. Every write invalidates the per-id
//! entry it touched and all list/count views, so a disabled cache (TTL of
//! zero) behaves identically apart from speed.

use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::TtlCache;
use crate::db::Database;
use crate::error::{LifecycleError, Result};
use crate::models::{Applicant, ApplicantStatus, NewApplicant};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PageKey {
    status: ApplicantStatus,
    page_size: usize,
    offset: usize,
}

pub struct ApplicantStore {
    db: Arc<Database>,
    by_id: TtlCache<i64, Applicant>,
    pages: TtlCache<PageKey, Vec<Applicant>>,
    counts: TtlCache<ApplicantStatus, i64>,
}

impl ApplicantStore {
    pub fn new(db: Arc<Database>, ttl: Duration) -> Self {
        Self {
            db,
            by_id: TtlCache::new(ttl),
            pages: TtlCache::new(ttl),
            counts: TtlCache::new(ttl),
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn create(&self, applicant: &NewApplicant) -> Result<i64> {
        ensure_required(applicant)?;
        let id = self.db.insert_applicant(applicant, Utc::now())?;
        self.invalidate_views();
        info!(applicant_id = id, position = %applicant.position, "applicant created");
        Ok(id)
    }

    pub fn get_by_id(&self, id: i64) -> Result<Applicant> {
        if let Some(hit) = self.by_id.get(&id) {
            return Ok(hit);
        }
        let applicant = self.db.get_applicant(id)?.ok_or(LifecycleError::NotFound(id))?;
        self.by_id.insert(id, applicant.clone());
        Ok(applicant)
    }

    /// Reads the row from the database, bypassing the cache, and refreshes
    /// the cached copy. Status decisions go through here.
    pub fn get_fresh(&self, id: i64) -> Result<Applicant> {
        match self.db.get_applicant(id)? {
            Some(applicant) => {
                self.by_id.insert(id, applicant.clone());
                Ok(applicant)
            }
            None => {
                self.by_id.remove(&id);
                Err(LifecycleError::NotFound(id))
            }
        }
    }

    pub fn list_by_status(
        &self,
        status: ApplicantStatus,
        page_size: usize,
        offset: usize,
    ) -> Result<Vec<Applicant>> {
        let key = PageKey {
            status,
            page_size,
            offset,
        };
        self.pages
            .get_or_try_insert(key, || self.db.list_applicants(status, page_size, offset))
    }

    pub fn count_by_status(&self, status: ApplicantStatus) -> Result<i64> {
        self.counts
            .get_or_try_insert(status, || self.db.count_applicants(status))
    }

    pub fn status_counts(&self) -> Result<Vec<(ApplicantStatus, i64)>> {
        ApplicantStatus::ALL
            .iter()
            .map(|status| Ok((*status, self.count_by_status(*status)?)))
            .collect()
    }

    /// Writes `to` only while the row is still in `from`. Legality is the
    /// engine's job; this guards against another writer getting there first.
    pub fn update_status(&self, id: i64, from: ApplicantStatus, to: ApplicantStatus) -> Result<usize> {
        let affected = self.db.set_applicant_status(id, from, to)?;
        self.invalidate(id);
        debug!(applicant_id = id, %from, %to, affected, "status written");
        Ok(affected)
    }

    /// Permanently removes the given rows. Ids that do not exist count as
    /// zero, they are not an error.
    pub fn delete(&self, ids: &BTreeSet<i64>) -> Result<usize> {
        let mut affected = 0;
        for id in ids {
            affected += self.db.delete_applicant(*id)?;
            self.by_id.remove(id);
        }
        self.invalidate_views();
        info!(requested = ids.len(), affected, "applicants deleted");
        Ok(affected)
    }

    fn invalidate(&self, id: i64) {
        self.by_id.remove(&id);
        self.invalidate_views();
    }

    fn invalidate_views(&self) {
        self.pages.clear();
        self.counts.clear();
    }
}

fn ensure_required(applicant: &NewApplicant) -> Result<()> {
    let required = [
        ("first name", &applicant.first_name),
        ("last name", &applicant.last_name),
        ("email", &applicant.email),
        ("position", &applicant.position),
        ("state", &applicant.state),
    ];
    if let Some((field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
        return Err(LifecycleError::Validation(format!("Missing required field: {}", field)));
    }
    if applicant.resume.data.is_empty() {
        return Err(LifecycleError::Validation("Please upload a resume file.".to_string()));
    }
    Ok(())
}
