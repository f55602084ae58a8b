//! Duplicate detection for one processing pass.

use std::collections::{HashMap, HashSet};

use pipeline_core::{JobId, RecordKey};

use crate::parser::SheetRow;

/// Why a row was excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Blank product code or period.
    Invalid,
    /// Key already seen earlier in the same file.
    DuplicateInFile,
    /// Key already stored by another job.
    DuplicateInStore,
}

impl SkipReason {
    pub fn message(&self, row_number: u32) -> String {
        match self {
            Self::Invalid => format!("Fila {row_number}: Código de Producto o Período es inválido."),
            Self::DuplicateInFile => format!("Fila {row_number}: Duplicado interno."),
            Self::DuplicateInStore => format!("Fila {row_number}: Duplicado DB."),
        }
    }
}

/// Classification of a single row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowVerdict {
    Accept,
    /// Stored by this same job on an earlier attempt; neither inserted nor skipped.
    AlreadyStored,
    Skip(SkipReason),
}

/// Working set of (code, period) keys.
///
/// Seeded with stored keys and their owning job; grows with every valid row
/// of the pass. Intra-file duplicates are checked before the seeded keys.
#[derive(Debug)]
pub struct DedupIndex {
    job_id: JobId,
    stored: HashMap<RecordKey, JobId>,
    seen: HashSet<RecordKey>,
}

impl DedupIndex {
    pub fn new(job_id: JobId, stored: HashMap<RecordKey, JobId>) -> Self {
        Self {
            job_id,
            stored,
            seen: HashSet::new(),
        }
    }

    pub fn check(&mut self, row: &SheetRow) -> RowVerdict {
        if !row.is_valid() {
            return RowVerdict::Skip(SkipReason::Invalid);
        }

        let key = RecordKey::new(row.product_code.as_str(), row.period.as_str());
        let owner = self.stored.get(&key).copied();
        // Every valid key counts as seen, including keys rejected by the store.
        if !self.seen.insert(key) {
            return RowVerdict::Skip(SkipReason::DuplicateInFile);
        }

        match owner {
            Some(owner) if owner == self.job_id => RowVerdict::AlreadyStored,
            Some(_) => RowVerdict::Skip(SkipReason::DuplicateInStore),
            None => RowVerdict::Accept,
        }
    }
}

/// Summary stored on the job: empty when nothing was skipped.
pub fn skip_summary(skipped: usize) -> String {
    match skipped {
        0 => String::new(),
        1 => "Carga finalizada con 1 registro omitido.".to_string(),
        n => format!("Carga finalizada con {n} registros omitidos."),
    }
}
