//! The auxiliary variables recording the averaging interval behind each time
//! step, and how they are rebuilt after a reduction.
//!
//! Model output that is itself a time average carries, for every time step,
//! the start, end and length of the interval it averages over. A reduction
//! combines several such intervals into one, so these variables cannot be
//! averaged like data: the new start is the earliest start, the new end the
//! latest end and the new duration the sum of the durations.
use ndarray::{Array1, Array2, ArrayD};
use serde::{Deserialize, Serialize};

use crate::dataset::{Dataset, Variable};
use crate::error::{PpError, PpResult};

/// Names of the interval bookkeeping variables. The defaults are those
/// written by FMS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuxVarNames {
    /// Start of each averaging interval
    pub start: String,
    /// End of each averaging interval
    pub end: String,
    /// Length of each averaging interval, in days
    pub duration: String,
    /// Start and end together, shape (time, 2)
    pub bounds: String,
}

impl Default for AuxVarNames {
    fn default() -> Self {
        Self {
            start: "average_T1".to_string(),
            end: "average_T2".to_string(),
            duration: "average_DT".to_string(),
            bounds: "time_bnds".to_string(),
        }
    }
}

impl AuxVarNames {
    pub fn all(&self) -> [&str; 4] {
        [&self.start, &self.end, &self.duration, &self.bounds]
    }

    pub fn contains(&self, name: &str) -> bool {
        self.all().contains(&name)
    }
}

/// The bookkeeping values of one dataset as plain vectors along the time
/// axis. Any of them may be absent.
#[derive(Debug, Clone, Default)]
pub(crate) struct IntervalRecords {
    pub(crate) start: Option<Vec<f64>>,
    pub(crate) end: Option<Vec<f64>>,
    pub(crate) duration: Option<Vec<f64>>,
    /// (start, end) pairs
    pub(crate) bounds: Option<Vec<(f64, f64)>>,
}

impl IntervalRecords {
    /// Read whichever bookkeeping variables are present in `ds`.
    ///
    /// Each present variable must run along `avedim` (bounds as its first
    /// axis, with a second axis of length 2).
    pub(crate) fn read(ds: &Dataset, aux: &AuxVarNames, avedim: &str) -> PpResult<Self> {
        let start = read_1d(ds, &aux.start, avedim)?;
        let end = read_1d(ds, &aux.end, avedim)?;
        let duration = read_1d(ds, &aux.duration, avedim)?;

        let bounds = match ds.get(&aux.bounds) {
            None => None,
            Some(var) => {
                let values = numeric(var, &aux.bounds)?;
                if var.dims().first().map(|d| d.as_str()) != Some(avedim)
                    || values.ndim() != 2
                    || values.shape()[1] != 2
                {
                    return Err(PpError::invalid_argument(format!(
                        "'{}' must have shape ({avedim}, 2)",
                        aux.bounds
                    )));
                }
                let pairs = values
                    .outer_iter()
                    .map(|row| (row[0], row[1]))
                    .collect();
                Some(pairs)
            }
        };

        Ok(Self { start, end, duration, bounds })
    }

    /// Interval start of step `i`, from the bounds if present, else from
    /// the start variable.
    pub(crate) fn start_of(&self, i: usize) -> Option<f64> {
        self.bounds
            .as_ref()
            .map(|b| b[i].0)
            .or_else(|| self.start.as_ref().map(|s| s[i]))
    }

    /// Interval end of step `i`, from the bounds if present, else from the
    /// end variable.
    pub(crate) fn end_of(&self, i: usize) -> Option<f64> {
        self.bounds
            .as_ref()
            .map(|b| b[i].1)
            .or_else(|| self.end.as_ref().map(|e| e[i]))
    }

    /// Earliest interval start over the given steps.
    pub(crate) fn earliest_start(&self, indices: &[usize]) -> Option<f64> {
        let from_start = self
            .start
            .as_ref()
            .map(|s| fold_min(indices.iter().map(|&i| s[i])));
        from_start.or_else(|| {
            self.bounds
                .as_ref()
                .map(|b| fold_min(indices.iter().map(|&i| b[i].0)))
        })
    }

    /// Latest interval end over the given steps.
    pub(crate) fn latest_end(&self, indices: &[usize]) -> Option<f64> {
        let from_end = self
            .end
            .as_ref()
            .map(|e| fold_max(indices.iter().map(|&i| e[i])));
        from_end.or_else(|| {
            self.bounds
                .as_ref()
                .map(|b| fold_max(indices.iter().map(|&i| b[i].1)))
        })
    }

    /// Total duration over the given steps.
    pub(crate) fn total_duration(&self, indices: &[usize]) -> Option<f64> {
        self.duration
            .as_ref()
            .map(|d| indices.iter().map(|&i| d[i]).sum())
    }
}

/// The recomputed bookkeeping for one output time step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct IntervalSlot {
    pub(crate) start: Option<f64>,
    pub(crate) end: Option<f64>,
    pub(crate) duration: Option<f64>,
    /// Representative instant, the new time coordinate value
    pub(crate) time: f64,
}

/// Write the recomputed bookkeeping of the output steps into `out`.
///
/// A variable is only written if it existed in `input`; its attributes and
/// dimension names are kept, and its type is kept when it was single
/// precision.
pub(crate) fn write_interval_vars(
    out: &mut Dataset,
    input: &Dataset,
    aux: &AuxVarNames,
    slots: &[IntervalSlot],
) -> PpResult<()> {
    let n = slots.len();

    let scalar_vars = [
        (&aux.start, slots.iter().map(|s| s.start).collect::<Vec<_>>()),
        (&aux.end, slots.iter().map(|s| s.end).collect()),
        (&aux.duration, slots.iter().map(|s| s.duration).collect()),
    ];
    for (name, values) in scalar_vars {
        let Some(template) = input.get(name) else {
            continue;
        };
        let values = values
            .into_iter()
            .collect::<Option<Vec<f64>>>()
            .ok_or_else(|| PpError::missing_aux(name, "recomputing interval bookkeeping"))?;
        let arr = Array1::from_vec(values).into_dyn();
        let var = template.replace_data(template.data().float_like(arr))?;
        out.insert_var(name, var)?;
    }

    if let Some(template) = input.get(&aux.bounds) {
        let mut arr = Array2::<f64>::zeros((n, 2));
        for (mut row, slot) in arr.rows_mut().into_iter().zip(slots) {
            let (Some(start), Some(end)) = (slot.start, slot.end) else {
                return Err(PpError::missing_aux(&aux.bounds, "recomputing interval bounds"));
            };
            row[0] = start;
            row[1] = end;
        }
        let arr = arr.into_dyn();
        let var = template.replace_data(template.data().float_like(arr))?;
        out.insert_var(&aux.bounds, var)?;
    }

    Ok(())
}

/// Copy of `ds` without the bookkeeping variables.
pub fn strip_auxiliary(mut ds: Dataset, aux: &AuxVarNames) -> Dataset {
    for name in aux.all() {
        ds.remove(name);
    }
    ds
}

fn read_1d(ds: &Dataset, name: &str, avedim: &str) -> PpResult<Option<Vec<f64>>> {
    let Some(var) = ds.get(name) else {
        return Ok(None);
    };
    if var.dims().len() != 1 || var.dims()[0] != avedim {
        return Err(PpError::invalid_argument(format!(
            "'{name}' must be 1-D along '{avedim}'"
        )));
    }
    let values = numeric(var, name)?;
    Ok(Some(values.iter().copied().collect()))
}

fn numeric(var: &Variable, name: &str) -> PpResult<ArrayD<f64>> {
    var.to_f64()
        .ok_or_else(|| PpError::invalid_argument(format!("'{name}' is not numeric")))
}

fn fold_min<I: Iterator<Item = f64>>(it: I) -> f64 {
    it.fold(f64::INFINITY, f64::min)
}

fn fold_max<I: Iterator<Item = f64>>(it: I) -> f64 {
    it.fold(f64::NEG_INFINITY, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    fn monthly_records() -> Dataset {
        let mut ds = Dataset::new();
        let t1 = Variable::new(&["time"], arr1(&[0.0, 31.0, 59.0]).into_dyn().into()).unwrap();
        let t2 = Variable::new(&["time"], arr1(&[31.0, 59.0, 90.0]).into_dyn().into()).unwrap();
        let dt = Variable::new(&["time"], arr1(&[31.0, 28.0, 31.0]).into_dyn().into()).unwrap();
        let bnds = Variable::new(
            &["time", "nv"],
            arr2(&[[0.0, 31.0], [31.0, 59.0], [59.0, 90.0]]).into_dyn().into(),
        )
        .unwrap();
        ds.insert_var("average_T1", t1).unwrap();
        ds.insert_var("average_T2", t2).unwrap();
        ds.insert_var("average_DT", dt).unwrap();
        ds.insert_var("time_bnds", bnds).unwrap();
        ds
    }

    #[test]
    fn test_read_records() {
        let ds = monthly_records();
        let rec = IntervalRecords::read(&ds, &AuxVarNames::default(), "time").unwrap();
        assert_eq!(rec.earliest_start(&[0, 1, 2]), Some(0.0));
        assert_eq!(rec.latest_end(&[0, 1, 2]), Some(90.0));
        assert_eq!(rec.total_duration(&[0, 2]), Some(62.0));
        assert_eq!(rec.start_of(1), Some(31.0));
        assert_eq!(rec.end_of(1), Some(59.0));
    }

    #[test]
    fn test_bounds_fallback() {
        let mut ds = monthly_records();
        ds.remove("average_T1");
        ds.remove("average_T2");
        let rec = IntervalRecords::read(&ds, &AuxVarNames::default(), "time").unwrap();
        assert_eq!(rec.earliest_start(&[1, 2]), Some(31.0));
        assert_eq!(rec.latest_end(&[0, 1]), Some(59.0));
    }

    #[test]
    fn test_bad_bounds_shape() {
        let mut ds = Dataset::new();
        let bnds = Variable::new(&["time"], arr1(&[0.0, 31.0]).into_dyn().into()).unwrap();
        ds.insert_var("time_bnds", bnds).unwrap();
        assert!(IntervalRecords::read(&ds, &AuxVarNames::default(), "time").is_err());
    }

    #[test]
    fn test_strip_auxiliary() {
        let mut ds = monthly_records();
        let sst = Variable::new(&["time"], arr1(&[1.0, 2.0, 3.0]).into_dyn().into()).unwrap();
        ds.insert_var("sst", sst).unwrap();
        let stripped = strip_auxiliary(ds, &AuxVarNames::default());
        assert_eq!(stripped.data_vars().len(), 1);
        assert!(stripped.contains("sst"));
    }
}
