//! Take one field out of a multi-field history dataset.
use crate::compute::AuxVarNames;
use crate::dataset::Dataset;
use crate::error::{PpError, PpResult};

/// Make a dataset holding only `field`, the interval bookkeeping variables
/// that are present, and the coordinates of the dimensions those use.
///
/// Variables are copied as they are, attributes included. The dataset
/// attributes are kept.
pub fn extract_field(ds: &Dataset, field: &str, aux: &AuxVarNames) -> PpResult<Dataset> {
    if field.is_empty() {
        return Err(PpError::invalid_argument("field name cannot be empty"));
    }
    let var = ds.data_vars().get(field).ok_or_else(|| PpError::missing_variable(field))?;

    let mut out = Dataset::new();
    out.set_attrs(ds.attrs().clone());

    let mut selected = vec![(field, var)];
    for name in aux.all() {
        if name == field {
            continue;
        }
        if let Some(aux_var) = ds.data_vars().get(name) {
            selected.push((name, aux_var));
        }
    }

    for (_, var) in &selected {
        for dim in var.dims() {
            if let Some(coord) = ds.coords().get(dim) {
                if !out.contains(dim) {
                    out.insert_coord(dim, coord.clone())?;
                }
            }
        }
    }
    for (name, var) in selected {
        out.insert_var(name, var.clone())?;
    }

    log::debug!(
        "Extracted '{field}' with {} coordinate(s) and {} variable(s)",
        out.coords().len(),
        out.data_vars().len()
    );
    Ok(out)
}
