//! Names of the history archives read and of the pp directories and files written.
//!
//! Everything here is a pure function of the dataset name, the years covered
//! and the frequency, except [`ensure_output_dir`], which creates the output
//! directory. The layout follows the FRE post-processing tree:
//!
//! - history: `{historydir}/{YYYY}0101.nc.tar`, each holding `./{YYYY}0101.{base}.nc`;
//! - averages: `{ppdir}/{base}/av/{label}_{n}yr/{base}.{Y1}-{Y2}.{ann|01..12}.nc`;
//! - time series: `{ppdir}/{base}/ts/{label}/{n}yr/{base}.{start}-{end}.{field}.nc`.
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use error_stack::ResultExt;

use crate::error::{PpError, PpResult};
use crate::frequency::{resolve_frequency, Frequency};

/// Suffix of the per-year history archives.
pub const ARCHIVE_SUFFIX: &str = ".nc.tar";
/// Prefix of the files inside the history archives.
pub const DEFAULT_FILE_PREFIX: &str = "./";
/// Default file kind; tiled output uses e.g. "tile1.nc".
pub const DEFAULT_FILE_KIND: &str = "nc";

/// An inclusive range of model years, guaranteed to have `end >= start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearRange {
    start: i32,
    end: i32,
}

impl YearRange {
    pub fn new(start: i32, end: i32) -> PpResult<Self> {
        check_bounds(start, end)?;
        Ok(Self { start, end })
    }

    pub fn start(&self) -> i32 {
        self.start
    }

    pub fn end(&self) -> i32 {
        self.end
    }

    /// Number of years in the range, both ends included.
    pub fn nyears(&self) -> usize {
        (self.end - self.start + 1) as usize
    }

    pub fn years(&self) -> std::ops::RangeInclusive<i32> {
        self.start..=self.end
    }
}

impl Display for YearRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:04}", self.start, self.end)
    }
}

/// Kind of pp product, which selects the branch of the directory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductType {
    /// Temporal averages, under "av"
    Average,
    /// Single-field time series, under "ts"
    TimeSeries,
}

impl Display for ProductType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProductType::Average => write!(f, "av"),
            ProductType::TimeSeries => write!(f, "ts"),
        }
    }
}

impl FromStr for ProductType {
    type Err = PpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "av" => Ok(Self::Average),
            "ts" => Ok(Self::TimeSeries),
            _ => Err(PpError::invalid_argument(format!(
                "unknown pp type '{s}', available are av and ts"
            ))),
        }
    }
}

/// Suffix of an average file: "ann" for the annual mean, "01" to "12" for
/// one month of a climatology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AverageSuffix {
    Annual,
    Month(u32),
}

impl AverageSuffix {
    pub fn month(month: u32) -> PpResult<Self> {
        if (1..=12).contains(&month) {
            Ok(Self::Month(month))
        } else {
            Err(PpError::invalid_argument(format!(
                "month must be between 1 and 12, got {month}"
            )))
        }
    }
}

impl Display for AverageSuffix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AverageSuffix::Annual => write!(f, "ann"),
            AverageSuffix::Month(m) => write!(f, "{m:02}"),
        }
    }
}

/// How the first and last year of a segment are written in a file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundsFormat {
    /// YYYY
    Year,
    /// YYYYMM, from January to December
    YearMonth,
    /// YYYYMMDD, from Jan 1 to Dec 31
    YearMonthDay,
    /// YYYYMMDDHH, from Jan 1 00h to Dec 31 23h
    YearMonthDayHour,
}

impl BoundsFormat {
    pub fn for_frequency(freq: Frequency) -> Self {
        match freq {
            Frequency::Yearly => Self::Year,
            Frequency::Monthly => Self::YearMonth,
            Frequency::Daily => Self::YearMonthDay,
            Frequency::SixHourly | Frequency::ThreeHourly => Self::YearMonthDayHour,
        }
    }
}

/// Check that the last year of a segment is not before the first.
pub fn check_bounds(start: i32, end: i32) -> PpResult<()> {
    if end < start {
        return Err(PpError::InvalidRange { start, end });
    }
    Ok(())
}

/// Format the first and last year of a segment for a file name.
pub fn format_year_bounds(start: i32, end: i32, format: BoundsFormat) -> (String, String) {
    match format {
        BoundsFormat::Year => (format!("{start:04}"), format!("{end:04}")),
        BoundsFormat::YearMonth => (format!("{start:04}01"), format!("{end:04}12")),
        BoundsFormat::YearMonthDay => (format!("{start:04}0101"), format!("{end:04}1231")),
        BoundsFormat::YearMonthDayHour => (format!("{start:04}010100"), format!("{end:04}123123")),
    }
}

/// List the history archives needed for the years `start` to `end`.
pub fn archives_for_years(start: i32, end: i32, historydir: &Path) -> PpResult<Vec<PathBuf>> {
    check_bounds(start, end)?;
    let archives = (start..=end)
        .map(|year| historydir.join(format!("{year:04}0101{ARCHIVE_SUFFIX}")))
        .collect();
    Ok(archives)
}

/// List the files to read inside the history archives for the years `start`
/// to `end`, one per archive, in the same order as [`archives_for_years`].
pub fn files_for_years(
    base_name: &str,
    start: i32,
    end: i32,
    file_kind: &str,
    prefix: &str,
) -> PpResult<Vec<String>> {
    check_bounds(start, end)?;
    let files = (start..=end)
        .map(|year| format!("{prefix}{year:04}0101.{base_name}.{file_kind}"))
        .collect();
    Ok(files)
}

/// Name of the pp subdirectory for a product, relative to the pp directory.
///
/// If `freq` is `None`, it is inferred from `base_name`; failing that this
/// returns [`PpError::UnsupportedFrequency`].
pub fn subdir_name(
    base_name: &str,
    start: i32,
    end: i32,
    freq: Option<Frequency>,
    product: ProductType,
) -> PpResult<String> {
    require_nonempty(base_name, "dataset name")?;
    check_bounds(start, end)?;
    let nyears = end - start + 1;
    let freq = require_frequency(base_name, freq)?;
    let label = freq.dir_label();

    let subdir = match product {
        ProductType::Average => format!("{base_name}/av/{label}_{nyears}yr"),
        ProductType::TimeSeries => format!("{base_name}/ts/{label}/{nyears}yr"),
    };
    Ok(subdir)
}

/// Name of an average file, e.g. "ocean_annual.1981-1985.ann.nc".
pub fn average_filename(
    base_name: &str,
    start: i32,
    end: i32,
    suffix: &str,
    file_kind: &str,
) -> PpResult<String> {
    require_nonempty(base_name, "dataset name")?;
    require_nonempty(suffix, "suffix")?;
    check_bounds(start, end)?;
    let (cstart, cend) = format_year_bounds(start, end, BoundsFormat::Year);
    Ok(format!("{base_name}.{cstart}-{cend}.{suffix}.{file_kind}"))
}

/// Name of a time series file, e.g. "ocean_monthly.198101-198512.so.nc".
///
/// The width of the dates depends on the frequency, which is inferred from
/// `base_name` when `freq` is `None`.
pub fn timeseries_filename(
    field: &str,
    base_name: &str,
    start: i32,
    end: i32,
    freq: Option<Frequency>,
    file_kind: &str,
) -> PpResult<String> {
    require_nonempty(field, "field")?;
    require_nonempty(base_name, "dataset name")?;
    check_bounds(start, end)?;
    let freq = require_frequency(base_name, freq)?;
    let (cstart, cend) = format_year_bounds(start, end, BoundsFormat::for_frequency(freq));
    Ok(format!("{base_name}.{cstart}-{cend}.{field}.{file_kind}"))
}

/// Make sure `ppdir/subdir` exists, creating `subdir` as needed.
///
/// `ppdir` itself must already exist; if not, this returns
/// [`PpError::MissingPath`] rather than creating a whole new tree somewhere
/// unexpected.
pub fn ensure_output_dir(ppdir: &Path, subdir: &str) -> error_stack::Result<PathBuf, PpError> {
    if !ppdir.is_dir() {
        error_stack::bail!(PpError::MissingPath(ppdir.to_path_buf()));
    }

    let outdir = ppdir.join(subdir);
    if !outdir.exists() {
        log::debug!("Creating output directory {}", outdir.display());
        std::fs::create_dir_all(&outdir).change_context_lazy(|| {
            PpError::context(format!("Could not create {}", outdir.display()))
        })?;
    }
    Ok(outdir)
}

pub(crate) fn require_frequency(base_name: &str, freq: Option<Frequency>) -> PpResult<Frequency> {
    resolve_frequency(base_name, freq).ok_or_else(|| {
        PpError::unsupported_frequency(format!(
            "frequency not inferred from name '{base_name}', please provide it explicitly"
        ))
    })
}

fn require_nonempty(value: &str, what: &str) -> PpResult<()> {
    if value.is_empty() {
        return Err(PpError::invalid_argument(format!("{what} cannot be empty")));
    }
    Ok(())
}
