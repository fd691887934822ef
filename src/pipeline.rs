//! The post-processed products: time series, annual averages and monthly
//! climatologies of one field over a range of years.
//!
//! Each `write_*` function names its output, reads the history archives,
//! builds the product and writes it, then releases the extracted files. Names
//! are resolved before anything is read so that a bad frequency or year
//! range fails fast.
use std::path::PathBuf;

use error_stack::ResultExt;

use crate::compute::{average, check_average_frequency, extract_month_slot, AverageKind};
use crate::config::PpConfig;
use crate::dataset::Dataset;
use crate::error::PpError;
use crate::extract::extract_field;
use crate::frequency::{resolve_frequency, Frequency};
use crate::io::archive::ArchiveHandles;
use crate::io::nc_read::assemble;
use crate::io::nc_write::{persist, WriteOptions};
use crate::naming::{
    archives_for_years, average_filename, ensure_output_dir, files_for_years, subdir_name,
    timeseries_filename, AverageSuffix, ProductType, YearRange,
};

impl PpConfig {
    pub fn write_options(&self) -> WriteOptions {
        WriteOptions {
            time_dim: self.time_dim.clone(),
            fill_value: self.fill_value,
            chunks: self.chunks.clone(),
        }
    }
}

/// Read `field` from the `base_name` history files of `years`.
///
/// The handles keep the extracted files alive; release them once the
/// dataset is no longer needed.
pub fn load_timeseries(
    field: &str,
    base_name: &str,
    years: YearRange,
    cfg: &PpConfig,
) -> error_stack::Result<(Dataset, ArchiveHandles), PpError> {
    let archives = archives_for_years(years.start(), years.end(), &cfg.history_dir)?;
    let files = files_for_years(base_name, years.start(), years.end(), &cfg.file_kind, &cfg.file_prefix)?;
    let strategy = cfg.extraction.strategy()?;

    let (ds, handles) = assemble(&files, &archives, strategy.as_ref(), &cfg.time_dim)
        .change_context_lazy(|| PpError::context(format!("Could not load {base_name} for years {years}")))?;
    let ds = extract_field(&ds, field, &cfg.aux)
        .change_context_lazy(|| PpError::context(format!("Could not extract '{field}' from {base_name}")))?;
    Ok((ds, handles))
}

/// Write the time series of `field` to
/// `{pp_dir}/{base}/ts/{freq}/{n}yr/{base}.{start}-{end}.{field}.{kind}`.
pub fn write_timeseries(
    field: &str,
    base_name: &str,
    years: YearRange,
    freq: Option<Frequency>,
    cfg: &PpConfig,
) -> error_stack::Result<PathBuf, PpError> {
    let subdir = subdir_name(base_name, years.start(), years.end(), freq, ProductType::TimeSeries)?;
    let fname = timeseries_filename(field, base_name, years.start(), years.end(), freq, &cfg.file_kind)?;
    let outdir = ensure_output_dir(&cfg.pp_dir, &subdir)?;

    let (ts, mut handles) = load_timeseries(field, base_name, years, cfg)?;
    let path = outdir.join(fname);
    persist(&ts, &path, &cfg.write_options())?;
    handles.release();
    Ok(path)
}

/// Write the average of `field` over all of `years` to
/// `{pp_dir}/{base}/av/{freq}_{n}yr/{base}.{Y1}-{Y2}.ann.{kind}`.
pub fn write_annual_average(
    field: &str,
    base_name: &str,
    years: YearRange,
    freq: Option<Frequency>,
    cfg: &PpConfig,
) -> error_stack::Result<PathBuf, PpError> {
    let freq = check_average_frequency(AverageKind::Annual, resolve_frequency(base_name, freq))?;
    let subdir = subdir_name(base_name, years.start(), years.end(), Some(freq), ProductType::Average)?;
    let suffix = AverageSuffix::Annual.to_string();
    let fname = average_filename(base_name, years.start(), years.end(), &suffix, &cfg.file_kind)?;
    let outdir = ensure_output_dir(&cfg.pp_dir, &subdir)?;

    let (ts, mut handles) = load_timeseries(field, base_name, years, cfg)?;
    let avg = average(&ts, AverageKind::Annual, Some(freq), &cfg.time_dim, &cfg.aux)
        .change_context_lazy(|| PpError::context(format!("Could not average '{field}' over {years}")))?;
    let path = outdir.join(fname);
    persist(&avg, &path, &cfg.write_options())?;
    handles.release();
    Ok(path)
}

/// Write the twelve monthly means of `field` over `years`, one file per
/// month, to `{pp_dir}/{base}/av/{freq}_{n}yr/{base}.{Y1}-{Y2}.{01..12}.{kind}`.
pub fn write_monthly_climatology(
    field: &str,
    base_name: &str,
    years: YearRange,
    freq: Option<Frequency>,
    cfg: &PpConfig,
) -> error_stack::Result<Vec<PathBuf>, PpError> {
    let freq = check_average_frequency(AverageKind::MonthlyClimatology, resolve_frequency(base_name, freq))?;
    let subdir = subdir_name(base_name, years.start(), years.end(), Some(freq), ProductType::Average)?;
    let mut fnames = Vec::with_capacity(12);
    for month in 1..=12 {
        let suffix = AverageSuffix::month(month)?.to_string();
        fnames.push((month, average_filename(base_name, years.start(), years.end(), &suffix, &cfg.file_kind)?));
    }
    let outdir = ensure_output_dir(&cfg.pp_dir, &subdir)?;

    let (ts, mut handles) = load_timeseries(field, base_name, years, cfg)?;
    let clim = average(&ts, AverageKind::MonthlyClimatology, Some(freq), &cfg.time_dim, &cfg.aux)
        .change_context_lazy(|| {
            PpError::context(format!("Could not compute the monthly climatology of '{field}' over {years}"))
        })?;

    let opts = cfg.write_options();
    let mut written = Vec::with_capacity(12);
    for (month, fname) in fnames {
        let slot = extract_month_slot(&clim, month, &cfg.time_dim)?;
        let path = outdir.join(fname);
        persist(&slot, &path, &opts)?;
        written.push(path);
    }
    handles.release();
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{NcArray, Variable};
    use crate::io::nc_read::read_dataset;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, Array2};
    use std::path::Path;

    const MONTH_DAYS: [f64; 12] = [31., 28., 31., 30., 31., 30., 31., 31., 30., 31., 30., 31.];

    /// One year of noleap monthly ocean output, `sst` equal to the month
    /// number plus 100 per year.
    fn history_year(year: i32) -> Dataset {
        let year_start = 365.0 * (year - 1) as f64;
        let mut t1 = vec![];
        let mut t2 = vec![];
        let mut start = year_start;
        for len in MONTH_DAYS {
            t1.push(start);
            t2.push(start + len);
            start += len;
        }
        let times = t1.iter().zip(&t2).map(|(a, b)| 0.5 * (a + b)).collect::<Vec<_>>();
        let bnds = Array2::from_shape_fn((12, 2), |(i, j)| if j == 0 { t1[i] } else { t2[i] });
        let sst = Array2::from_shape_fn((12, 2), |(i, _)| (i + 1) as f32 + 100.0 * year as f32);

        let mut ds = Dataset::new();
        let time = Variable::new(&["time"], arr1(&times).into_dyn().into())
            .unwrap()
            .with_attr("units", "days since 0001-01-01 00:00:00")
            .with_attr("calendar_type", "NOLEAP");
        ds.insert_coord("time", time).unwrap();
        ds.insert_coord("xh", Variable::new(&["xh"], arr1(&[0.5, 1.5]).into_dyn().into()).unwrap())
            .unwrap();
        ds.insert_var("sst", Variable::new(&["time", "xh"], sst.into_dyn().into()).unwrap())
            .unwrap();
        ds.insert_var("sss", Variable::new(&["time", "xh"], Array2::<f32>::zeros((12, 2)).into_dyn().into()).unwrap())
            .unwrap();
        ds.insert_var("average_T1", Variable::new(&["time"], arr1(&t1).into_dyn().into()).unwrap())
            .unwrap();
        ds.insert_var("average_T2", Variable::new(&["time"], arr1(&t2).into_dyn().into()).unwrap())
            .unwrap();
        ds.insert_var("average_DT", Variable::new(&["time"], arr1(&MONTH_DAYS).into_dyn().into()).unwrap())
            .unwrap();
        ds.insert_var("time_bnds", Variable::new(&["time", "nv"], bnds.into_dyn().into()).unwrap())
            .unwrap();
        ds
    }

    /// A history directory with an archive per year and an existing pp directory.
    fn setup(root: &Path, years: YearRange, scratch: bool) -> PpConfig {
        let history_dir = root.join("history");
        let pp_dir = root.join("pp");
        std::fs::create_dir_all(&history_dir).unwrap();
        std::fs::create_dir_all(&pp_dir).unwrap();

        for year in years.years() {
            let nc_path = root.join(format!("{year:04}0101.ocean_monthly.nc"));
            persist(&history_year(year), &nc_path, &WriteOptions::default()).unwrap();
            let tar_path = history_dir.join(format!("{year:04}0101.nc.tar"));
            let mut builder = tar::Builder::new(std::fs::File::create(tar_path).unwrap());
            builder
                .append_path_with_name(&nc_path, format!("./{year:04}0101.ocean_monthly.nc"))
                .unwrap();
            builder.finish().unwrap();
        }

        let mut cfg = PpConfig { history_dir, pp_dir, ..Default::default() };
        if scratch {
            cfg.extraction.mode = crate::io::archive::ExtractionMode::Disk;
            cfg.extraction.scratch_dir = Some(root.join("scratch"));
        }
        cfg
    }

    fn read(path: &Path) -> Dataset {
        let nc = netcdf::open(path).unwrap();
        read_dataset(&nc).unwrap()
    }

    fn values(ds: &Dataset, name: &str) -> Vec<f64> {
        ds.get(name).unwrap().to_f64().unwrap().iter().copied().collect()
    }

    #[test]
    fn test_write_timeseries() {
        let dir = tempfile::tempdir().unwrap();
        let years = YearRange::new(1, 2).unwrap();
        let cfg = setup(dir.path(), years, false);
        let path = write_timeseries("sst", "ocean_monthly", years, None, &cfg).unwrap();
        assert_eq!(
            path,
            cfg.pp_dir.join("ocean_monthly/ts/monthly/2yr/ocean_monthly.000101-000212.sst.nc")
        );

        let ts = read(&path);
        assert_eq!(ts.dim_len("time"), Some(24));
        assert!(ts.contains("average_DT"));
        assert!(!ts.contains("sss"));
        assert!(matches!(ts.get("sst").unwrap().data(), NcArray::F32(_)));
    }

    #[test]
    fn test_write_annual_average() {
        let dir = tempfile::tempdir().unwrap();
        let years = YearRange::new(1, 2).unwrap();
        let cfg = setup(dir.path(), years, true);
        let path = write_annual_average("sst", "ocean_monthly", years, None, &cfg).unwrap();
        assert_eq!(path, cfg.pp_dir.join("ocean_monthly/av/monthly_2yr/ocean_monthly.0001-0002.ann.nc"));

        let avg = read(&path);
        assert_eq!(avg.dim_len("time"), Some(1));
        assert_eq!(values(&avg, "average_DT"), vec![730.0]);
        assert_eq!(values(&avg, "time"), vec![365.0]);
        // Month-length weighted mean of 1..=12, plus the mean yearly offset of 150
        let weighted = MONTH_DAYS.iter().enumerate().map(|(i, d)| (i + 1) as f64 * d).sum::<f64>() / 365.0;
        for v in values(&avg, "sst") {
            assert_abs_diff_eq!(v, weighted + 150.0, epsilon = 1e-3);
        }
        // Extracted files are kept in disk mode
        assert!(dir.path().join("scratch/00010101.ocean_monthly.nc").exists());
    }

    #[test]
    fn test_write_monthly_climatology() {
        let dir = tempfile::tempdir().unwrap();
        let years = YearRange::new(1, 3).unwrap();
        let cfg = setup(dir.path(), years, false);
        let paths = write_monthly_climatology("sst", "ocean_monthly", years, None, &cfg).unwrap();
        assert_eq!(paths.len(), 12);
        assert_eq!(
            paths[2],
            cfg.pp_dir.join("ocean_monthly/av/monthly_3yr/ocean_monthly.0001-0003.03.nc")
        );

        let march = read(&paths[2]);
        assert_eq!(march.dim_len("time"), Some(1));
        assert_eq!(values(&march, "sst"), vec![203.0, 203.0]);
        assert_eq!(values(&march, "average_DT"), vec![93.0]);
        assert_eq!(values(&march, "time_bnds"), vec![59.0, 730.0 + 90.0]);
    }

    #[test]
    fn test_unsupported_frequency() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = PpConfig { pp_dir: dir.path().to_path_buf(), ..Default::default() };
        let years = YearRange::new(1, 2).unwrap();

        let err = write_monthly_climatology("sst", "ocean_annual", years, None, &cfg).unwrap_err();
        assert!(matches!(err.current_context(), PpError::UnsupportedFrequency(_)));
        let err = write_annual_average("sst", "ocean", years, None, &cfg).unwrap_err();
        assert!(matches!(err.current_context(), PpError::UnsupportedFrequency(_)));
        // Nothing created
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
