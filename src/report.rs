// 📋 Report Classifier - per-representative book status
//
// Categories, strict precedence (a root claimed earlier is skipped later):
//   1. Ativa                    previous, group purchase >= cutoff
//   2. Entraram Recentemente    previous, entered book inside window, not on commit date
//   3. Novas Recebidas          current, entered book on commit date
//   4. Cadastrado Recentemente  previous, opened inside window
//   5. Retiradas                previous, absent from current

use crate::entities::{Account, TaxIdRoot};
use crate::entities::account::dates;
use crate::rotation::RotationBatch;
use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Spreadsheet tab names are capped at 31 characters.
pub const SHEET_LABEL_MAX: usize = 31;

// ============================================================================
// STATUS
// ============================================================================

/// Declaration order is report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReportStatus {
    #[serde(rename = "Ativa")]
    Active,
    #[serde(rename = "Entraram Recentemente")]
    RecentlyArrived,
    #[serde(rename = "Novas Recebidas")]
    NewlyReceived,
    #[serde(rename = "Cadastrado Recentemente")]
    RecentlyRegistered,
    #[serde(rename = "Retiradas")]
    Removed,
}

impl ReportStatus {
    pub const ALL: [ReportStatus; 5] = [
        ReportStatus::Active,
        ReportStatus::RecentlyArrived,
        ReportStatus::NewlyReceived,
        ReportStatus::RecentlyRegistered,
        ReportStatus::Removed,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ReportStatus::Active => "Ativa",
            ReportStatus::RecentlyArrived => "Entraram Recentemente",
            ReportStatus::NewlyReceived => "Novas Recebidas",
            ReportStatus::RecentlyRegistered => "Cadastrado Recentemente",
            ReportStatus::Removed => "Retiradas",
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// ROWS & BLOCKS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    #[serde(rename = "Status")]
    pub status: ReportStatus,

    #[serde(rename = "Razao_Social_Pessoas")]
    pub razao_social: String,

    #[serde(rename = "Raiz_CNPJ")]
    pub raiz_cnpj: TaxIdRoot,

    #[serde(rename = "Data_Ultima_Venda_Grupo_CNPJ", with = "dates::optional")]
    pub data_ultima_venda_grupo: Option<NaiveDate>,

    #[serde(rename = "Data_Entrou_Carteira", with = "dates::optional")]
    pub data_entrou_carteira: Option<NaiveDate>,
}

impl ReportRow {
    fn new(status: ReportStatus, account: &Account) -> Self {
        ReportRow {
            status,
            razao_social: account.razao_social.clone(),
            raiz_cnpj: account.raiz_cnpj.clone(),
            data_ultima_venda_grupo: account.data_ultima_venda_grupo,
            data_entrou_carteira: account.data_entrou_carteira,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepresentativeReport {
    pub representative: String,
    pub sheet_label: String,
    pub rows: Vec<ReportRow>,
}

impl RepresentativeReport {
    pub fn count(&self, status: ReportStatus) -> usize {
        self.rows.iter().filter(|r| r.status == status).count()
    }

    pub fn block(&self, status: ReportStatus) -> impl Iterator<Item = &ReportRow> {
        self.rows.iter().filter(move |r| r.status == status)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// File-safe form of the full representative name: spaces become `_`,
/// path and spreadsheet-forbidden characters too. Never truncated.
pub fn file_stem(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '[' | ']' | ':' | '*' | '?' | '/' | '\\' | '<' | '>' | '|' | '"' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect();

    if cleaned.is_empty() {
        "Sem_Nome".to_string()
    } else {
        cleaned
    }
}

/// Spreadsheet-safe tab name: forbidden characters become `_`, at most 31 chars.
pub fn sheet_label(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '[' | ']' | ':' | '*' | '?' | '/' | '\\' => '_',
            c => c,
        })
        .take(SHEET_LABEL_MAX)
        .collect();

    if cleaned.is_empty() {
        "Sem_Nome".to_string()
    } else {
        cleaned
    }
}

// ============================================================================
// CLASSIFIER
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct ReportClassifier {
    /// Purchases on or after this date make an account "active".
    pub cutoff: NaiveDate,
    /// Date the rotation was committed.
    pub commit_date: NaiveDate,
    pub recent_window_months: u32,
}

impl ReportClassifier {
    pub fn new(cutoff: NaiveDate, commit_date: NaiveDate) -> Self {
        ReportClassifier {
            cutoff,
            commit_date,
            recent_window_months: 6,
        }
    }

    pub fn with_recent_window(mut self, months: u32) -> Self {
        self.recent_window_months = months;
        self
    }

    fn recent_since(&self) -> NaiveDate {
        self.commit_date
            .checked_sub_months(Months::new(self.recent_window_months))
            .unwrap_or(NaiveDate::MIN)
    }

    fn qualifies(
        &self,
        status: ReportStatus,
        account: &Account,
        recent_since: NaiveDate,
        current_roots: &HashSet<&TaxIdRoot>,
    ) -> bool {
        match status {
            ReportStatus::Active => account.is_purchasing_since(self.cutoff),
            ReportStatus::RecentlyArrived => account
                .data_entrou_carteira
                .map_or(false, |d| d >= recent_since && d != self.commit_date),
            ReportStatus::NewlyReceived => account.data_entrou_carteira == Some(self.commit_date),
            ReportStatus::RecentlyRegistered => account.data_abertura_conta >= recent_since,
            ReportStatus::Removed => !current_roots.contains(&account.raiz_cnpj),
        }
    }

    /// Classify one representative's book. Both snapshots must already be
    /// scoped to that representative.
    pub fn classify(&self, current: &[Account], previous: &[Account]) -> Vec<ReportRow> {
        let recent_since = self.recent_since();
        let current_roots: HashSet<&TaxIdRoot> = current.iter().map(|a| &a.raiz_cnpj).collect();

        let mut candidates: Vec<ReportRow> = Vec::new();

        for status in ReportStatus::ALL {
            let source = match status {
                ReportStatus::NewlyReceived => current,
                _ => previous,
            };

            candidates.extend(
                source
                    .iter()
                    .filter(|a| self.qualifies(status, a, recent_since, &current_roots))
                    .map(|a| ReportRow::new(status, a)),
            );
        }

        // First occurrence wins, so precedence follows category order
        let mut seen: HashSet<TaxIdRoot> = HashSet::new();
        let mut rows: Vec<ReportRow> = candidates
            .into_iter()
            .filter(|row| seen.insert(row.raiz_cnpj.clone()))
            .collect();

        rows.sort_by(|a, b| {
            a.status
                .cmp(&b.status)
                .then_with(|| a.razao_social.cmp(&b.razao_social))
        });

        rows
    }

    /// One report per representative, in the given order.
    pub fn build_reports<S: AsRef<str>>(
        &self,
        representatives: &[S],
        current: &[Account],
        previous: &[Account],
    ) -> Vec<RepresentativeReport> {
        let current_by_rep = group_by_representative(current);
        let previous_by_rep = group_by_representative(previous);
        let empty: Vec<Account> = Vec::new();

        representatives
            .iter()
            .map(|rep| {
                let rep = rep.as_ref();
                let cur = current_by_rep.get(rep).unwrap_or(&empty);
                let prev = previous_by_rep.get(rep).unwrap_or(&empty);

                RepresentativeReport {
                    representative: rep.to_string(),
                    sheet_label: sheet_label(rep),
                    rows: self.classify(cur, prev),
                }
            })
            .collect()
    }
}

fn group_by_representative(accounts: &[Account]) -> HashMap<&str, Vec<Account>> {
    let mut groups: HashMap<&str, Vec<Account>> = HashMap::new();
    for account in accounts {
        groups
            .entry(account.nome_vendedor.as_str())
            .or_default()
            .push(account.clone());
    }
    groups
}

/// Book after rotation: `previous` with every rotated account moved.
pub fn apply_rotation(previous: &[Account], batch: &RotationBatch) -> Vec<Account> {
    let moved: HashMap<&TaxIdRoot, &Account> =
        batch.rotated_accounts().map(|a| (&a.raiz_cnpj, a)).collect();

    let mut current: Vec<Account> = previous
        .iter()
        .map(|a| moved.get(&a.raiz_cnpj).map_or_else(|| a.clone(), |m| (*m).clone()))
        .collect();

    // Rotated accounts missing from the previous snapshot still belong to the book
    let known: HashSet<&TaxIdRoot> = previous.iter().map(|a| &a.raiz_cnpj).collect();
    current.extend(
        batch
            .rotated_accounts()
            .filter(|a| !known.contains(&a.raiz_cnpj))
            .cloned(),
    );

    current
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::account::tests::{create_test_account, date};
    use crate::rotation::RotatedAccount;

    fn classifier() -> ReportClassifier {
        // cutoff six months before the commit
        ReportClassifier::new(date("2024-01-01"), date("2024-07-01"))
    }

    #[test]
    fn test_each_category() {
        let mut active = create_test_account("1", "Ativa", "Ana");
        active.data_ultima_venda_grupo = Some(date("2024-03-01"));

        let mut arrived = create_test_account("2", "Chegou", "Ana");
        arrived.data_entrou_carteira = Some(date("2024-04-10"));

        let mut registered = create_test_account("3", "Nova", "Ana");
        registered.data_abertura_conta = date("2024-05-01");

        let removed = create_test_account("4", "Saiu", "Ana");
        let stays = create_test_account("5", "Fica", "Ana");

        let previous = vec![active.clone(), arrived.clone(), registered.clone(), removed, stays.clone()];

        let received = create_test_account("6", "Recebida", "Ana").reassigned("Ana", date("2024-07-01"));
        let current = vec![active, arrived, registered, stays, received];

        let rows = classifier().classify(&current, &previous);
        let got: Vec<(ReportStatus, &str)> =
            rows.iter().map(|r| (r.status, r.razao_social.as_str())).collect();

        assert_eq!(
            got,
            vec![
                (ReportStatus::Active, "Ativa"),
                (ReportStatus::RecentlyArrived, "Chegou"),
                (ReportStatus::NewlyReceived, "Recebida"),
                (ReportStatus::RecentlyRegistered, "Nova"),
                (ReportStatus::Removed, "Saiu"),
            ]
        );
    }

    #[test]
    fn test_precedence_first_category_wins() {
        // Active AND recently arrived AND removed: reported once, as active
        let mut both = create_test_account("1", "Both", "Ana");
        both.data_ultima_venda_grupo = Some(date("2024-02-01"));
        both.data_entrou_carteira = Some(date("2024-03-01"));

        let rows = classifier().classify(&[], &[both]);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, ReportStatus::Active);
    }

    #[test]
    fn test_entry_on_commit_date_is_not_recently_arrived() {
        let mut today = create_test_account("1", "Hoje", "Ana");
        today.data_entrou_carteira = Some(date("2024-07-01"));

        let rows = classifier().classify(&[today.clone()], &[today]);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, ReportStatus::NewlyReceived);
    }

    #[test]
    fn test_categories_are_exclusive_and_sorted() {
        let mut previous = Vec::new();
        for (i, name) in ["Zeta", "Alfa", "Meio"].iter().enumerate() {
            let mut a = create_test_account(&(i + 1).to_string(), name, "Ana");
            a.data_ultima_venda_grupo = Some(date("2024-06-01"));
            a.data_abertura_conta = date("2024-06-01");
            previous.push(a);
        }

        let rows = classifier().classify(&[], &previous);

        let roots: HashSet<&TaxIdRoot> = rows.iter().map(|r| &r.raiz_cnpj).collect();
        assert_eq!(roots.len(), rows.len());
        let names: Vec<&str> = rows.iter().map(|r| r.razao_social.as_str()).collect();
        assert_eq!(names, vec!["Alfa", "Meio", "Zeta"]);
        assert!(rows.iter().all(|r| r.status == ReportStatus::Active));
    }

    #[test]
    fn test_build_reports_scopes_by_representative() {
        let ana = create_test_account("1", "Da Ana", "Ana");
        let bruno = create_test_account("2", "Do Bruno", "Bruno");
        let previous = vec![ana.clone(), bruno];
        let current = vec![ana.clone(), ana.reassigned("Bruno", date("2024-07-01"))];

        let reports = classifier().build_reports(&["Ana", "Bruno", "Carla"], &current[1..], &previous);

        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].count(ReportStatus::Removed), 1);
        assert_eq!(reports[1].count(ReportStatus::NewlyReceived), 1);
        assert_eq!(reports[1].count(ReportStatus::Removed), 1);
        assert!(reports[2].rows.is_empty());
    }

    #[test]
    fn test_status_labels_match_report_format() {
        let labels: Vec<&str> = ReportStatus::ALL.iter().map(|s| s.label()).collect();
        assert_eq!(
            labels,
            vec!["Ativa", "Entraram Recentemente", "Novas Recebidas", "Cadastrado Recentemente", "Retiradas"]
        );
        assert_eq!(serde_json::to_string(&ReportStatus::Removed).unwrap(), "\"Retiradas\"");
    }

    #[test]
    fn test_sheet_label() {
        assert_eq!(sheet_label("Ana/Bruno [2024]?"), "Ana_Bruno _2024__");
        let long = "LUCAS VASCONCELOS BATTAGLIA KRAUSE";
        assert_eq!(sheet_label(long).chars().count(), SHEET_LABEL_MAX);
        assert_eq!(sheet_label("   "), "Sem_Nome");
    }

    #[test]
    fn test_file_stem_keeps_full_name() {
        assert_eq!(
            file_stem("LUCAS VASCONCELOS BATTAGLIA KRAUSE"),
            "LUCAS_VASCONCELOS_BATTAGLIA_KRAUSE"
        );
        assert_eq!(file_stem("Ana/Bruno: Norte"), "Ana_Bruno__Norte");
        assert_eq!(file_stem(""), "Sem_Nome");
    }

    #[test]
    fn test_apply_rotation_moves_rotated_accounts() {
        let a = create_test_account("1", "A", "Ana");
        let b = create_test_account("2", "B", "Ana");
        let batch = RotationBatch {
            rotated: vec![RotatedAccount {
                account: a.reassigned("Bruno", date("2024-07-01")),
                previous_representative: "Ana".to_string(),
                assigned_on: date("2024-07-01"),
            }],
            leftover: vec![b.clone()],
            assigned_counts: Default::default(),
        };

        let current = apply_rotation(&[a, b], &batch);

        assert_eq!(current.len(), 2);
        assert_eq!(current[0].nome_vendedor, "Bruno");
        assert_eq!(current[1].nome_vendedor, "Ana");
    }
}
