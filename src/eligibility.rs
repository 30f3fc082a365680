// 🔎 Eligibility Filter - which accounts may rotate
//
// An account qualifies when ALL hold:
//   - no group-level purchase since the cutoff ("Nao Compra")
//   - opened before the cutoff
//   - not moved into its current book since the cutoff
//   - not tied to a corporate group
//   - classification accepted by the roster rule

use crate::entities::{Account, ClassificationRule};
use chrono::{Days, NaiveDate};

/// `today` minus a fixed number of days. Six "months" of inactivity are
/// counted as 180 days, not calendar months.
pub fn cutoff_from(today: NaiveDate, days: u32) -> NaiveDate {
    today
        .checked_sub_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MIN)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligibility {
    RecentPurchase,
    RecentlyOpened,
    RecentlyAssigned,
    GroupAffiliated,
    ClassificationMismatch,
}

pub struct EligibilityFilter<'a> {
    pub cutoff: NaiveDate,
    pub rule: &'a ClassificationRule,
}

impl<'a> EligibilityFilter<'a> {
    pub fn new(cutoff: NaiveDate, rule: &'a ClassificationRule) -> Self {
        EligibilityFilter { cutoff, rule }
    }

    /// First failing criterion, or `None` when the account may rotate.
    pub fn check(&self, account: &Account) -> Option<Ineligibility> {
        // Missing last purchase counts as maximally stale
        if account.data_ultima_venda_grupo.map_or(false, |d| d >= self.cutoff) {
            return Some(Ineligibility::RecentPurchase);
        }

        if account.data_abertura_conta >= self.cutoff {
            return Some(Ineligibility::RecentlyOpened);
        }

        if account.data_entrou_carteira.map_or(false, |d| d >= self.cutoff) {
            return Some(Ineligibility::RecentlyAssigned);
        }

        if account.has_group() {
            return Some(Ineligibility::GroupAffiliated);
        }

        if !self.rule.matches(&account.classificacao_conta) {
            return Some(Ineligibility::ClassificationMismatch);
        }

        None
    }

    pub fn is_eligible(&self, account: &Account) -> bool {
        self.check(account).is_none()
    }

    /// Eligible subset, input order preserved.
    pub fn filter(&self, accounts: &[Account]) -> Vec<Account> {
        accounts
            .iter()
            .filter(|a| self.is_eligible(a))
            .cloned()
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================
