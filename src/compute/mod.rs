//! Temporal reductions: annual means, day-weighted means and month-by-month
//! climatologies.
//!
//! Every reduction takes a dataset with a time dimension (`avedim`) and
//! returns a new one; the input is never modified. Data variables along
//! `avedim` are averaged, skipping NaNs. Variables without that dimension are
//! copied as they are. The interval bookkeeping variables named by
//! [`AuxVarNames`] are not averaged but rebuilt (see [`bookkeeping`]), and
//! the time coordinate is replaced by the representative instant of each new
//! interval.
use ndarray::{Array1, ArrayD, Axis, IxDyn, Zip};

use crate::dataset::{Dataset, NcArray, Variable};
use crate::error::{PpError, PpResult};
use crate::frequency::Frequency;

pub mod bookkeeping;

pub use bookkeeping::{strip_auxiliary, AuxVarNames};
use bookkeeping::{write_interval_vars, IntervalRecords, IntervalSlot};

/// Default name of the dimension averaged over.
pub const DEFAULT_AVEDIM: &str = "time";

/// The averaged products that can be made from a history dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AverageKind {
    /// One mean over the whole segment
    Annual,
    /// Twelve means, one per calendar month
    MonthlyClimatology,
}

/// Check that an average of `kind` can be made from data at frequency `freq`.
///
/// An unknown frequency and a climatology from yearly data are both
/// [`PpError::UnsupportedFrequency`].
pub fn check_average_frequency(kind: AverageKind, freq: Option<Frequency>) -> PpResult<Frequency> {
    let freq = freq.ok_or_else(|| {
        PpError::unsupported_frequency("the source frequency is needed to choose how to average")
    })?;
    if kind == AverageKind::MonthlyClimatology && freq == Frequency::Yearly {
        return Err(PpError::unsupported_frequency(
            "a monthly climatology cannot be made from yearly data",
        ));
    }
    Ok(freq)
}

/// Make the average of `kind` appropriate for data at frequency `freq`.
///
/// Annual averages of monthly data are weighted by the duration variable
/// when it is available, otherwise by the calendar length of each month.
/// Other annual averages are plain means, since their time steps are of
/// equal length.
pub fn average(
    ds: &Dataset,
    kind: AverageKind,
    freq: Option<Frequency>,
    avedim: &str,
    aux: &AuxVarNames,
) -> PpResult<Dataset> {
    let freq = check_average_frequency(kind, freq)?;
    match kind {
        AverageKind::Annual if freq == Frequency::Monthly => {
            if ds.contains(&aux.duration) {
                log::debug!("Weighting monthly data by '{}'", aux.duration);
                weighted_by_duration_average(ds, avedim, aux)
            } else {
                log::info!(
                    "'{}' not found, weighting monthly data by the calendar length of each month",
                    aux.duration
                );
                weighted_by_month_length_average(ds, avedim, aux)
            }
        }
        AverageKind::Annual => simple_average(ds, avedim, aux),
        AverageKind::MonthlyClimatology => month_by_month_average(ds, avedim, aux),
    }
}

/// Mean over the whole of `avedim`, kept as a length-1 dimension.
///
/// The new interval starts at the earliest start, ends at the latest end and
/// lasts the sum of the durations; its time is the midpoint of start and end.
/// Without start/end information the time is the mean of the input times.
pub fn simple_average(ds: &Dataset, avedim: &str, aux: &AuxVarNames) -> PpResult<Dataset> {
    let ntime = time_len(ds, avedim)?;
    let records = IntervalRecords::read(ds, aux, avedim)?;
    let all = (0..ntime).collect::<Vec<_>>();
    let slot = whole_interval_slot(ds, &records, &all, avedim)?;
    reduce(ds, avedim, aux, &[all], None, &[slot])
}

/// Mean over the whole of `avedim` with each step weighted by its interval
/// duration: `sum(v[i] * d[i]) / sum(d[i])` over the non-NaN values.
///
/// The bookkeeping variables are rebuilt as in [`simple_average`]. The
/// duration variable must be present.
pub fn weighted_by_duration_average(ds: &Dataset, avedim: &str, aux: &AuxVarNames) -> PpResult<Dataset> {
    let records = IntervalRecords::read(ds, aux, avedim)?;
    let weights = records
        .duration
        .clone()
        .ok_or_else(|| PpError::missing_aux(&aux.duration, "a duration-weighted average"))?;
    weighted_average(ds, avedim, aux, &records, &weights)
}

/// Mean over the whole of `avedim` with each step weighted by the number of
/// days in the calendar month its time falls in, for monthly data without a
/// duration variable.
///
/// The time coordinate needs units (and a calendar, "standard" if absent) so
/// its values can be decoded to months.
pub fn weighted_by_month_length_average(ds: &Dataset, avedim: &str, aux: &AuxVarNames) -> PpResult<Dataset> {
    let records = IntervalRecords::read(ds, aux, avedim)?;
    let units = ds.time_units(avedim)?;
    let weights = coordinate_values(ds, avedim)?
        .into_iter()
        .map(|t| {
            let date = units.decode(t)?;
            Ok(f64::from(units.calendar.days_in_month(date.year, date.month)?))
        })
        .collect::<PpResult<Vec<f64>>>()?;
    weighted_average(ds, avedim, aux, &records, &weights)
}

fn weighted_average(
    ds: &Dataset,
    avedim: &str,
    aux: &AuxVarNames,
    records: &IntervalRecords,
    weights: &[f64],
) -> PpResult<Dataset> {
    let ntime = time_len(ds, avedim)?;
    let all = (0..ntime).collect::<Vec<_>>();
    let slot = whole_interval_slot(ds, records, &all, avedim)?;
    reduce(ds, avedim, aux, &[all], Some(weights), &[slot])
}

/// Mean of each calendar month across all years: always 12 output steps,
/// January to December.
///
/// For each month, the interval starts at the start of its first occurrence
/// and ends at the end of its last occurrence, and its duration is the sum of
/// all occurrences. The representative time is the middle of the *last*
/// occurrence only (its end minus half its duration), not of the whole span.
/// That matches the existing pp products and should be reviewed before
/// anyone relies on it.
pub fn month_by_month_average(ds: &Dataset, avedim: &str, aux: &AuxVarNames) -> PpResult<Dataset> {
    let ntime = time_len(ds, avedim)?;
    let records = IntervalRecords::read(ds, aux, avedim)?;
    let durations = records
        .duration
        .as_ref()
        .ok_or_else(|| PpError::missing_aux(&aux.duration, "a month-by-month average"))?;
    if records.bounds.is_none() && (records.start.is_none() || records.end.is_none()) {
        return Err(PpError::missing_aux(
            format!("{} (or {} and {})", aux.bounds, aux.start, aux.end),
            "a month-by-month average",
        ));
    }

    let units = ds.time_units(avedim)?;
    let times = coordinate_values(ds, avedim)?;
    let mut groups: Vec<Vec<usize>> = vec![vec![]; 12];
    for (i, &t) in times.iter().enumerate().take(ntime) {
        let month = units.decode(t)?.month;
        groups[(month - 1) as usize].push(i);
    }

    let mut slots = Vec::with_capacity(12);
    for (imonth, group) in groups.iter().enumerate() {
        let (Some(&first), Some(&last)) = (group.first(), group.last()) else {
            return Err(PpError::invalid_argument(format!(
                "no time step falls in month {}, a climatology needs at least one full year",
                imonth + 1
            )));
        };
        let start = records.start_of(first);
        let end = records.end_of(last);
        let last_end = end.unwrap_or(f64::NAN);
        let time = last_end - units.from_days(0.5 * durations[last]);
        slots.push(IntervalSlot {
            start,
            end,
            duration: records.total_duration(group),
            time,
        });
    }

    log::debug!(
        "Month-by-month average of {ntime} steps, {} to {} per month",
        groups.iter().map(|g| g.len()).min().unwrap_or(0),
        groups.iter().map(|g| g.len()).max().unwrap_or(0)
    );
    reduce(ds, avedim, aux, &groups, None, &slots)
}

/// Take month `month` (1 to 12) out of the result of
/// [`month_by_month_average`], as a dataset with a length-1 `avedim`.
pub fn extract_month_slot(averaged: &Dataset, month: u32, avedim: &str) -> PpResult<Dataset> {
    if !(1..=12).contains(&month) {
        return Err(PpError::invalid_argument(format!(
            "month must be between 1 and 12, got {month}"
        )));
    }
    let ntime = time_len(averaged, avedim)?;
    let index = (month - 1) as usize;
    if index >= ntime {
        return Err(PpError::invalid_argument(format!(
            "month {month} requested but '{avedim}' has only {ntime} steps"
        )));
    }

    let mut out = Dataset::new();
    out.set_attrs(averaged.attrs().clone());
    for (name, coord) in averaged.coords() {
        out.insert_coord(name, select_if_along(coord, avedim, index)?)?;
    }
    for (name, var) in averaged.data_vars() {
        out.insert_var(name, select_if_along(var, avedim, index)?)?;
    }
    Ok(out)
}

fn select_if_along(var: &Variable, avedim: &str, index: usize) -> PpResult<Variable> {
    if var.has_dim(avedim) {
        var.select(avedim, &[index])
    } else {
        Ok(var.clone())
    }
}

/// The bookkeeping for one interval covering all of `indices`.
fn whole_interval_slot(
    ds: &Dataset,
    records: &IntervalRecords,
    indices: &[usize],
    avedim: &str,
) -> PpResult<IntervalSlot> {
    let start = records.earliest_start(indices);
    let end = records.latest_end(indices);
    let time = match (start, end) {
        (Some(start), Some(end)) => start + 0.5 * (end - start),
        _ => {
            log::debug!("No interval bounds found, using the mean of '{avedim}' as the new time");
            let times = coordinate_values(ds, avedim)?;
            indices.iter().map(|&i| times[i]).sum::<f64>() / indices.len() as f64
        }
    };
    Ok(IntervalSlot {
        start,
        end,
        duration: records.total_duration(indices),
        time,
    })
}

/// Build the reduced dataset: one output step per group of input steps.
fn reduce(
    ds: &Dataset,
    avedim: &str,
    aux: &AuxVarNames,
    groups: &[Vec<usize>],
    weights: Option<&[f64]>,
    slots: &[IntervalSlot],
) -> PpResult<Dataset> {
    let mut out = Dataset::new();
    out.set_attrs(ds.attrs().clone());

    let time = ds.require(avedim)?;
    let new_times = Array1::from_iter(slots.iter().map(|s| s.time)).into_dyn();
    out.insert_coord(avedim, time.replace_data(time.data().float_like(new_times))?)?;

    for (name, coord) in ds.coords() {
        if name == avedim {
            continue;
        }
        if coord.has_dim(avedim) {
            log::debug!("Dropping coordinate '{name}', which varies along '{avedim}'");
            continue;
        }
        out.insert_coord(name, coord.clone())?;
    }

    for (name, var) in ds.data_vars() {
        if aux.contains(name) {
            continue;
        }
        let Some(axis) = var.axis_of(avedim) else {
            out.insert_var(name, var.clone())?;
            continue;
        };
        let Some(values) = var.to_f64() else {
            log::debug!("Dropping non-numeric variable '{name}'");
            continue;
        };
        let reduced = reduce_groups(&values, Axis(axis), groups, weights)?;
        out.insert_var(name, var.replace_data(var.data().float_like(reduced))?)?;
    }

    write_interval_vars(&mut out, ds, aux, slots)?;
    Ok(out)
}

/// NaN-skipping (weighted) mean of each group of indices along `axis`, the
/// results stacked along that same axis.
fn reduce_groups(
    values: &ArrayD<f64>,
    axis: Axis,
    groups: &[Vec<usize>],
    weights: Option<&[f64]>,
) -> PpResult<ArrayD<f64>> {
    let mut lane_shape = values.shape().to_vec();
    lane_shape.remove(axis.index());

    let mut means = Vec::with_capacity(groups.len());
    for group in groups {
        let mut sum = ArrayD::<f64>::zeros(IxDyn(&lane_shape));
        let mut total_weight = ArrayD::<f64>::zeros(IxDyn(&lane_shape));
        for &i in group {
            let w = weights.map_or(1.0, |w| w[i]);
            let lane = values.index_axis(axis, i);
            Zip::from(&mut sum)
                .and(&mut total_weight)
                .and(&lane)
                .for_each(|s, tw, &v| {
                    if !v.is_nan() {
                        *s += w * v;
                        *tw += w;
                    }
                });
        }
        let mean = Zip::from(&sum)
            .and(&total_weight)
            .map_collect(|&s, &tw| if tw == 0.0 { f64::NAN } else { s / tw });
        means.push(mean.insert_axis(axis));
    }

    let views = means.iter().map(|m| m.view()).collect::<Vec<_>>();
    ndarray::concatenate(axis, &views)
        .map_err(|e| PpError::invalid_argument(format!("could not stack averaged values: {e}")))
}

fn time_len(ds: &Dataset, avedim: &str) -> PpResult<usize> {
    let n = ds
        .dim_len(avedim)
        .ok_or_else(|| PpError::missing_variable(avedim))?;
    if n == 0 {
        return Err(PpError::invalid_argument(format!("dimension '{avedim}' is empty")));
    }
    Ok(n)
}

fn coordinate_values(ds: &Dataset, avedim: &str) -> PpResult<Vec<f64>> {
    let time = ds.require(avedim)?;
    match time.data() {
        NcArray::Char(_) => Err(PpError::invalid_argument(format!(
            "coordinate '{avedim}' is not numeric"
        ))),
        data => Ok(data
            .to_f64()
            .map(|a| a.iter().copied().collect())
            .unwrap_or_default()),
    }
}
