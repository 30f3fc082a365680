// 📂 Feed & Export - CSV in, CSV out
// Shape problems fail fast: a missing column aborts before any row is read.

use crate::entities::account::dates;
use crate::entities::{Account, TaxIdRoot, Transfer};
use crate::error::{RotationError, RotationResult};
use crate::report::{file_stem, RepresentativeReport};
use crate::rotation::RotationBatch;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

pub const FEED_COLUMNS: [&str; 9] = [
    "Raiz_CNPJ",
    "Razao_Social_Pessoas",
    "CNPJ",
    "Grupo_Econômico_ID",
    "Classificacao_Conta",
    "Data_Abertura_Conta",
    "Data_Ultima_Venda_Grupo_CNPJ",
    "Nome_Vendedor",
    "Data_Entrou_Carteira",
];

pub const OVERRIDE_COLUMNS: [&str; 2] = ["Raiz_CNPJ", "Nome_Vendedor"];

#[derive(Debug, Deserialize)]
struct OverrideRow {
    #[serde(rename = "Raiz_CNPJ")]
    raiz_cnpj: TaxIdRoot,
    #[serde(rename = "Nome_Vendedor")]
    nome_vendedor: String,
    #[serde(rename = "Data_Entrou_Carteira", default, with = "dates::optional")]
    entered_on: Option<NaiveDate>,
}

// ============================================================================
// READING
// ============================================================================

fn read_checked<T, R>(reader: R, source_name: &str, required: &[&str]) -> RotationResult<Vec<T>>
where
    T: DeserializeOwned,
    R: io::Read,
{
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::Headers).from_reader(reader);

    let headers = rdr.headers().map_err(|e| RotationError::InvalidRecord {
        source_name: source_name.to_string(),
        row: 1,
        message: e.to_string(),
    })?;

    let missing: Vec<String> = required
        .iter()
        .filter(|col| !headers.iter().any(|h| h.trim_start_matches('\u{feff}') == **col))
        .map(|col| col.to_string())
        .collect();

    if !missing.is_empty() {
        return Err(RotationError::MissingColumns {
            source_name: source_name.to_string(),
            columns: missing,
        });
    }

    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let row: T = result.map_err(|e| RotationError::InvalidRecord {
            source_name: source_name.to_string(),
            row: e.position().map_or(0, |p| p.line()),
            message: e.to_string(),
        })?;
        rows.push(row);
    }

    Ok(rows)
}

fn open(path: &Path) -> RotationResult<File> {
    File::open(path).map_err(|e| RotationError::InvalidRecord {
        source_name: path.display().to_string(),
        row: 0,
        message: format!("cannot open: {e}"),
    })
}

pub fn read_accounts<R: io::Read>(reader: R, source_name: &str) -> RotationResult<Vec<Account>> {
    read_checked(reader, source_name, &FEED_COLUMNS)
}

/// Load the account feed. Rows are returned as-is (not deduplicated).
pub fn load_accounts(path: &Path) -> RotationResult<Vec<Account>> {
    let accounts = read_accounts(open(path)?, &path.display().to_string())?;
    tracing::info!(path = %path.display(), rows = accounts.len(), "account feed loaded");
    Ok(accounts)
}

/// Reference sheet of manual transfers. `Data_Entrou_Carteira` is optional.
pub fn read_overrides<R: io::Read>(
    reader: R,
    source_name: &str,
) -> RotationResult<HashMap<TaxIdRoot, Transfer>> {
    let rows: Vec<OverrideRow> = read_checked(reader, source_name, &OVERRIDE_COLUMNS)?;

    // Later rows win; blank names are ignored
    Ok(rows
        .into_iter()
        .filter(|r| !r.nome_vendedor.trim().is_empty())
        .map(|r| {
            let transfer = Transfer {
                representative: r.nome_vendedor.trim().to_string(),
                entered_on: r.entered_on,
            };
            (r.raiz_cnpj, transfer)
        })
        .collect())
}

pub fn load_overrides(path: &Path) -> RotationResult<HashMap<TaxIdRoot, Transfer>> {
    read_overrides(open(path)?, &path.display().to_string())
}

// ============================================================================
// WRITING
// ============================================================================

pub fn write_csv<T: Serialize, W: io::Write>(writer: W, rows: &[T]) -> RotationResult<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for row in rows {
        wtr.serialize(row)
            .map_err(|e| RotationError::persistence(format!("csv write: {e}")))?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_file<T: Serialize>(path: &Path, rows: &[T]) -> RotationResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path).map_err(|e| {
        RotationError::persistence(format!("cannot create {}: {}", path.display(), e))
    })?;
    write_csv(file, rows)
}

pub fn write_accounts(path: &Path, accounts: &[Account]) -> RotationResult<()> {
    write_file(path, accounts)
}

/// `rotacionados.csv` and `remanescentes.csv` under `dir`.
pub fn write_batch(dir: &Path, batch: &RotationBatch) -> RotationResult<(PathBuf, PathBuf)> {
    let rotated: Vec<Account> = batch.rotated_accounts().cloned().collect();
    let rotated_path = dir.join("rotacionados.csv");
    let leftover_path = dir.join("remanescentes.csv");

    write_accounts(&rotated_path, &rotated)?;
    write_accounts(&leftover_path, &batch.leftover)?;

    Ok((rotated_path, leftover_path))
}

/// `relatorio_<name>.csv` for every representative with at least one row.
/// Names that map to the same file (case-insensitively) get `_2`, `_3`, ...
pub fn write_reports(dir: &Path, reports: &[RepresentativeReport]) -> RotationResult<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(reports.len());
    let mut taken: HashSet<String> = HashSet::new();

    for report in reports.iter().filter(|r| !r.is_empty()) {
        let stem = file_stem(&report.representative);
        let mut name = format!("relatorio_{stem}");
        let mut n = 1;
        while !taken.insert(name.to_lowercase()) {
            n += 1;
            name = format!("relatorio_{stem}_{n}");
        }

        let path = dir.join(format!("{name}.csv"));
        write_file(&path, &report.rows)?;
        written.push(path);
    }

    tracing::info!(dir = %dir.display(), files = written.len(), "reports written");
    Ok(written)
}

// ============================================================================
// TESTS
// ============================================================================
