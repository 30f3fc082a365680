// 🔄 Rotation Engine - greedy random allocation under capacity + no-repeat
//
// For each account, in input order:
//   1. holders   = representatives who ever held it (history)
//   2. candidates = roster members NOT in holders AND below capacity
//   3. candidates non-empty → pick one uniformly, count it, move the account
//      otherwise            → leftover, unmodified
//
// Pure: no I/O, no clock, randomness injected. Committing the result to the
// history store is the caller's job.

use crate::entities::{Account, TaxIdRoot, DEFAULT_CAPACITY};
use crate::history::{AssignmentRecord, HistoryLookup};
use chrono::NaiveDate;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;

// ============================================================================
// BATCH RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RotatedAccount {
    /// Account with `Nome_Vendedor` and `Data_Entrou_Carteira` updated.
    pub account: Account,
    pub previous_representative: String,
    pub assigned_on: NaiveDate,
}

impl RotatedAccount {
    pub fn representative(&self) -> &str {
        &self.account.nome_vendedor
    }

    pub fn root(&self) -> &TaxIdRoot {
        &self.account.raiz_cnpj
    }
}

/// Every input account lands in exactly one of `rotated` / `leftover`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RotationBatch {
    pub rotated: Vec<RotatedAccount>,
    pub leftover: Vec<Account>,
    /// Accounts given to each roster member this batch (zero included).
    pub assigned_counts: BTreeMap<String, usize>,
}

impl RotationBatch {
    pub fn len(&self) -> usize {
        self.rotated.len() + self.leftover.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// History records to commit for this batch.
    pub fn assignments(&self, run_id: &str) -> Vec<AssignmentRecord> {
        self.rotated
            .iter()
            .map(|r| {
                AssignmentRecord::new(
                    r.account.raiz_cnpj.clone(),
                    &r.account.nome_vendedor,
                    r.assigned_on,
                    run_id,
                )
            })
            .collect()
    }

    pub fn rotated_accounts(&self) -> impl Iterator<Item = &Account> {
        self.rotated.iter().map(|r| &r.account)
    }

    /// Fold another roster's batch into this one.
    pub fn merge(&mut self, other: RotationBatch) {
        self.rotated.extend(other.rotated);
        self.leftover.extend(other.leftover);
        for (rep, count) in other.assigned_counts {
            *self.assigned_counts.entry(rep).or_insert(0) += count;
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct RotationEngine {
    /// Maximum accounts per representative per batch.
    pub capacity: usize,
}

impl RotationEngine {
    pub fn new(capacity: usize) -> Self {
        RotationEngine { capacity }
    }

    /// Distribute `accounts` among `representatives`.
    ///
    /// Accounts are decided strictly in slice order, so the caller controls
    /// which accounts win when capacity runs out. Candidates are offered to
    /// `rng` in roster order; with a seeded RNG the batch is reproducible.
    /// Repeated roster names count once.
    pub fn rotate<S, H, R>(
        &self,
        accounts: &[Account],
        representatives: &[S],
        history: &H,
        rng: &mut R,
        assigned_on: NaiveDate,
    ) -> RotationBatch
    where
        S: AsRef<str>,
        H: HistoryLookup + ?Sized,
        R: Rng + ?Sized,
    {
        let mut roster: Vec<&str> = Vec::with_capacity(representatives.len());
        for rep in representatives {
            if !roster.contains(&rep.as_ref()) {
                roster.push(rep.as_ref());
            }
        }

        let mut counts: BTreeMap<String, usize> =
            roster.iter().map(|rep| (rep.to_string(), 0)).collect();
        let mut batch = RotationBatch::default();

        for account in accounts {
            let candidates: Vec<&str> = roster
                .iter()
                .copied()
                .filter(|rep| counts[*rep] < self.capacity)
                .filter(|rep| !history.has_held(&account.raiz_cnpj, rep))
                .collect();

            match candidates.choose(rng) {
                Some(chosen) => {
                    if let Some(count) = counts.get_mut(*chosen) {
                        *count += 1;
                    }
                    tracing::debug!(
                        root = %account.raiz_cnpj,
                        from = %account.nome_vendedor,
                        to = %chosen,
                        candidates = candidates.len(),
                        "account rotated"
                    );
                    batch.rotated.push(RotatedAccount {
                        account: account.reassigned(chosen, assigned_on),
                        previous_representative: account.nome_vendedor.clone(),
                        assigned_on,
                    });
                }
                None => {
                    tracing::debug!(root = %account.raiz_cnpj, "no eligible representative");
                    batch.leftover.push(account.clone());
                }
            }
        }

        batch.assigned_counts = counts;

        tracing::info!(
            input = accounts.len(),
            rotated = batch.rotated.len(),
            leftover = batch.leftover.len(),
            representatives = roster.len(),
            capacity = self.capacity,
            "rotation batch computed"
        );

        batch
    }
}

impl Default for RotationEngine {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ============================================================================
// TESTS
// ============================================================================
