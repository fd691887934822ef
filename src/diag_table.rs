//! Reading the list of output fields from an FMS `diag_table`.
//!
//! Only the field lines are of interest. They are the lines with exactly
//! eight entries once quotes are removed, e.g.
//!
//! ```text
//! "ocean_model", "thetao", "thetao", "ocean_monthly", "all", "mean", "none", 2
//! ```
//!
//! where the third entry is the name of the variable in the output file and
//! the fourth the file it goes to.
use std::path::Path;

use error_stack::ResultExt;
use itertools::Itertools;

use crate::error::{PpError, PpResult};

const FIELD_LINE_NWORDS: usize = 8;

/// One output variable and the history file (e.g. "ocean_monthly") it is
/// written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagField {
    pub variable: String,
    pub file: String,
}

/// List the output variables declared in the text of a diag_table, in order.
///
/// Comments (`#` to end of line) and blank lines are ignored. Returns
/// [`PpError::InvalidArgument`] if fewer than two lines remain, since a valid
/// table has at least a title and a base date.
pub fn variables_from_diag_table(text: &str) -> PpResult<Vec<DiagField>> {
    let lines = text
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default())
        .filter(|line| !line.trim().is_empty())
        .collect_vec();

    if lines.len() < 2 {
        return Err(PpError::invalid_argument(format!(
            "a diag_table needs at least a title and a base date, found {} non-comment line(s)",
            lines.len()
        )));
    }

    let fields = lines
        .into_iter()
        .filter_map(|line| {
            let words = line
                .replace(['"', '\''], "")
                .replace(',', " ")
                .split_whitespace()
                .map(|w| w.to_string())
                .collect_vec();
            if words.len() == FIELD_LINE_NWORDS {
                Some(DiagField { variable: words[2].clone(), file: words[3].clone() })
            } else {
                None
            }
        })
        .collect_vec();

    log::debug!("Found {} output field(s) in diag_table", fields.len());
    Ok(fields)
}

/// List the history files that the diag_table writes fields to, sorted and
/// without duplicates.
pub fn files_from_diag_table(text: &str) -> PpResult<Vec<String>> {
    let files = variables_from_diag_table(text)?
        .into_iter()
        .map(|f| f.file)
        .sorted()
        .dedup()
        .collect();
    Ok(files)
}

/// Read a diag_table from disk.
pub fn read_diag_table(path: &Path) -> error_stack::Result<String, PpError> {
    if !path.is_file() {
        error_stack::bail!(PpError::MissingPath(path.to_path_buf()));
    }
    std::fs::read_to_string(path)
        .change_context_lazy(|| PpError::context(format!("Could not read diag_table {}", path.display())))
}
