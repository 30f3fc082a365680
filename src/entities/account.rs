// 🏢 Account Entity - one canonical record per tax-id root
//
// Identity: Raiz_CNPJ (normalized 14-digit root). Values: everything else,
// refreshed from the upstream feed on every run.

use crate::error::{RotationError, RotationResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

pub const TAX_ID_ROOT_LEN: usize = 14;

// ============================================================================
// TAX-ID ROOT
// ============================================================================

/// Normalized tax-id root: exactly 14 ASCII digits, zero-padded on the left.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaxIdRoot(String);

impl TaxIdRoot {
    /// Strip punctuation and left-pad with zeros.
    ///
    /// `"11"` → `"00000000000011"`, `"12.345.678/0001"` → `"00123456780001"`.
    pub fn parse(raw: &str) -> RotationResult<Self> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

        if digits.is_empty() || digits.len() > TAX_ID_ROOT_LEN {
            return Err(RotationError::InvalidTaxId(raw.to_string()));
        }

        Ok(TaxIdRoot(format!("{:0>width$}", digits, width = TAX_ID_ROOT_LEN)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TaxIdRoot {
    type Error = RotationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TaxIdRoot::parse(&value)
    }
}

impl From<TaxIdRoot> for String {
    fn from(root: TaxIdRoot) -> Self {
        root.0
    }
}

impl fmt::Display for TaxIdRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// ACCOUNT
// ============================================================================

/// One row of the account feed. Field names follow the feed columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    #[serde(rename = "Raiz_CNPJ")]
    pub raiz_cnpj: TaxIdRoot,

    #[serde(rename = "Razao_Social_Pessoas")]
    pub razao_social: String,

    #[serde(rename = "CNPJ")]
    pub cnpj: String,

    /// Corporate group link. Grouped accounts never rotate individually.
    #[serde(rename = "Grupo_Econômico_ID", default, deserialize_with = "dates::blank_as_none")]
    pub grupo_economico_id: Option<String>,

    #[serde(rename = "Classificacao_Conta")]
    pub classificacao_conta: String,

    #[serde(rename = "Data_Abertura_Conta", with = "dates::required")]
    pub data_abertura_conta: NaiveDate,

    #[serde(rename = "Data_Ultima_Venda_Grupo_CNPJ", default, with = "dates::optional")]
    pub data_ultima_venda_grupo: Option<NaiveDate>,

    /// Individual (non-aggregated) last purchase; informational only.
    #[serde(rename = "Data_Ultima_Venda_CNPJ", default, with = "dates::optional")]
    pub data_ultima_venda: Option<NaiveDate>,

    #[serde(rename = "Nome_Vendedor")]
    pub nome_vendedor: String,

    #[serde(rename = "Data_Entrou_Carteira", default, with = "dates::optional")]
    pub data_entrou_carteira: Option<NaiveDate>,
}

impl Account {
    /// Group-level purchase status used throughout the reports.
    pub fn is_purchasing_since(&self, cutoff: NaiveDate) -> bool {
        self.data_ultima_venda_grupo.map_or(false, |d| d >= cutoff)
    }

    pub fn has_group(&self) -> bool {
        self.grupo_economico_id.is_some()
    }

    /// Copy of this account moved into `representative`'s book on `date`.
    pub fn reassigned(&self, representative: &str, date: NaiveDate) -> Account {
        let mut next = self.clone();
        next.nome_vendedor = representative.to_string();
        next.data_entrou_carteira = Some(date);
        next
    }
}

/// Keep the first record seen for each tax-id root, preserving input order.
pub fn dedupe_accounts(accounts: Vec<Account>) -> Vec<Account> {
    let mut seen: HashSet<TaxIdRoot> = HashSet::with_capacity(accounts.len());
    accounts
        .into_iter()
        .filter(|account| seen.insert(account.raiz_cnpj.clone()))
        .collect()
}

/// Manual reassignment read from the reference sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub representative: String,
    /// Date the account entered the new book, when the sheet carries one.
    pub entered_on: Option<NaiveDate>,
}

impl Transfer {
    pub fn new(representative: &str) -> Self {
        Transfer {
            representative: representative.to_string(),
            entered_on: None,
        }
    }

    pub fn on(mut self, date: NaiveDate) -> Self {
        self.entered_on = Some(date);
        self
    }
}

/// Move every account listed in `overrides` into its forced book. The entry
/// date becomes the transfer's own date, or `transfer_date` when it has none,
/// so a transferred account is not eligible again this cycle.
/// Returns how many accounts were transferred.
pub fn apply_overrides(
    accounts: &mut [Account],
    overrides: &HashMap<TaxIdRoot, Transfer>,
    transfer_date: NaiveDate,
) -> usize {
    let mut applied = 0;

    for account in accounts.iter_mut() {
        if let Some(transfer) = overrides.get(&account.raiz_cnpj) {
            account.nome_vendedor = transfer.representative.clone();
            account.data_entrou_carteira = Some(transfer.entered_on.unwrap_or(transfer_date));
            applied += 1;
        }
    }

    applied
}

// ============================================================================
// DATE FIELDS
// ============================================================================

pub mod dates {
    use chrono::{NaiveDate, NaiveDateTime};
    use serde::{Deserialize, Deserializer, Serializer};

    const OUTPUT_FORMAT: &str = "%Y-%m-%d";

    /// Parse date from string (supports YYYY-MM-DD, DD/MM/YYYY and timestamps)
    pub fn parse_date(raw: &str) -> Option<NaiveDate> {
        let raw = raw.trim();

        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            return Some(date);
        }

        if let Ok(date) = NaiveDate::parse_from_str(raw, "%d/%m/%Y") {
            return Some(date);
        }

        // Warehouse exports carry a time component
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
            return Some(ts.date());
        }

        None
    }

    pub fn format_date(date: &NaiveDate) -> String {
        date.format(OUTPUT_FORMAT).to_string()
    }

    pub fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()))
    }

    pub mod required {
        use super::*;

        pub fn serialize<S: Serializer>(date: &NaiveDate, s: S) -> Result<S::Ok, S::Error> {
            s.serialize_str(&format_date(date))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDate, D::Error> {
            let raw = String::deserialize(d)?;
            parse_date(&raw)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid date '{raw}'")))
        }
    }

    pub mod optional {
        use super::*;

        pub fn serialize<S: Serializer>(date: &Option<NaiveDate>, s: S) -> Result<S::Ok, S::Error> {
            match date {
                Some(date) => s.serialize_str(&format_date(date)),
                None => s.serialize_str(""),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveDate>, D::Error> {
            let raw: Option<String> = Option::deserialize(d)?;
            match raw.as_deref().map(str::trim) {
                None | Some("") => Ok(None),
                Some(value) => parse_date(value)
                    .map(Some)
                    .ok_or_else(|| serde::de::Error::custom(format!("invalid date '{value}'"))),
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
