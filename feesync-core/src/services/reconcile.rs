//! Fee reconciler - idempotent persistence of parsed fees

use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::adapters::duckdb::DuckDbRepository;
use crate::domain::{Fee, LocalUser};

/// What an upsert did to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Reconciles parsed fees against the local fee table
///
/// A fee row is keyed by (fee_id, user_primary_id). Once a row exists only
/// the fields in [`crate::domain::FeeUpdate`] change on later syncs.
pub struct FeeReconciler {
    repository: Arc<DuckDbRepository>,
}

impl FeeReconciler {
    pub fn new(repository: Arc<DuckDbRepository>) -> Self {
        Self { repository }
    }

    /// Insert the fee, or patch the existing row for the same Alma fee
    ///
    /// Returns the row as stored after the write.
    pub fn upsert(&self, fee: &Fee) -> Result<(Fee, UpsertOutcome)> {
        let (id, outcome) = match self
            .repository
            .find_fee(&fee.fee_id, &fee.user_primary_id)?
        {
            Some(existing) => {
                self.repository.update_fee(existing.id, &fee.to_update())?;
                (existing.id, UpsertOutcome::Updated)
            }
            None => {
                self.repository.insert_fee(fee)?;
                (fee.id, UpsertOutcome::Created)
            }
        };

        let stored = self
            .repository
            .get_fee_by_id(id)?
            .ok_or_else(|| anyhow!("Fee {} disappeared during upsert", fee.fee_id))?;
        Ok((stored, outcome))
    }

    /// Flip every ACTIVE fee of the patron to STALE; returns how many changed
    pub fn mark_all_active_as_stale(&self, user: &LocalUser) -> Result<usize> {
        self.repository.mark_active_fees_stale(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fee_record::tests::fee_sample;
    use crate::domain::{parse_alma_fee, FeeStatus};
    use rust_decimal::Decimal;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<DuckDbRepository>, FeeReconciler) {
        let temp_dir = TempDir::new().unwrap();
        let repo =
            Arc::new(DuckDbRepository::new(&temp_dir.path().join("test.duckdb")).unwrap());
        repo.ensure_schema().unwrap();
        let reconciler = FeeReconciler::new(Arc::clone(&repo));
        (temp_dir, repo, reconciler)
    }

    #[test]
    fn test_upsert_creates_then_updates() {
        let (_dir, repo, reconciler) = setup();
        let user = LocalUser::new("101010", "12345678910");

        let first = parse_alma_fee(&fee_sample(), &user).unwrap();
        let (stored, outcome) = reconciler.upsert(&first).unwrap();
        assert_eq!(outcome, UpsertOutcome::Created);
        assert_eq!(stored.fee_id, "12345678910");
        assert_eq!(stored.balance, Some(Decimal::new(3, 0)));
        assert_eq!(stored.fee_status, FeeStatus::Active);

        let mut changed = fee_sample();
        changed.insert("balance".to_string(), json!(10.0));
        changed.insert("original_amount".to_string(), json!(99.0));
        changed.insert("title".to_string(), json!("A different title"));
        let second = parse_alma_fee(&changed, &user).unwrap();

        let (stored, outcome) = reconciler.upsert(&second).unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);
        assert_eq!(stored.id, first.id);
        assert_eq!(stored.balance, Some(Decimal::new(10, 0)));
        // immutable after the first insert
        assert_eq!(stored.original_amount, Some(Decimal::new(3, 0)));
        assert_eq!(stored.item_title, first.item_title);

        assert_eq!(repo.get_fee_count().unwrap(), 1);
    }

    #[test]
    fn test_same_fee_id_for_different_patrons() {
        let (_dir, repo, reconciler) = setup();
        let alice = LocalUser::new("1", "alice");
        let bob = LocalUser::new("2", "bob");

        reconciler
            .upsert(&parse_alma_fee(&fee_sample(), &alice).unwrap())
            .unwrap();
        let (_, outcome) = reconciler
            .upsert(&parse_alma_fee(&fee_sample(), &bob).unwrap())
            .unwrap();

        assert_eq!(outcome, UpsertOutcome::Created);
        assert_eq!(repo.get_fee_count().unwrap(), 2);
    }

    #[test]
    fn test_mark_all_active_as_stale_is_per_patron() {
        let (_dir, repo, reconciler) = setup();
        let alice = LocalUser::new("1", "alice");
        let bob = LocalUser::new("2", "bob");

        reconciler
            .upsert(&parse_alma_fee(&fee_sample(), &alice).unwrap())
            .unwrap();
        reconciler
            .upsert(&parse_alma_fee(&fee_sample(), &bob).unwrap())
            .unwrap();

        assert_eq!(reconciler.mark_all_active_as_stale(&alice).unwrap(), 1);

        let alice_fees = repo.get_fees_for_user(&alice, None).unwrap();
        assert_eq!(alice_fees[0].fee_status, FeeStatus::Stale);
        let bob_fees = repo.get_fees_for_user(&bob, None).unwrap();
        assert_eq!(bob_fees[0].fee_status, FeeStatus::Active);
    }

    #[test]
    fn test_mark_all_active_as_stale_with_shared_local_id() {
        let (_dir, repo, reconciler) = setup();
        let p1 = LocalUser::new("101010", "p1");
        let p2 = LocalUser::new("101010", "p2");

        reconciler
            .upsert(&parse_alma_fee(&fee_sample(), &p1).unwrap())
            .unwrap();
        reconciler
            .upsert(&parse_alma_fee(&fee_sample(), &p2).unwrap())
            .unwrap();

        assert_eq!(reconciler.mark_all_active_as_stale(&p2).unwrap(), 1);
        assert_eq!(repo.get_active_fees(&p1).unwrap().len(), 1);
        assert!(repo.get_active_fees(&p2).unwrap().is_empty());
    }
}
