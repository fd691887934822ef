//! Writing [`Dataset`]s to netCDF4 files.
use std::path::{Path, PathBuf};

use error_stack::ResultExt;
use indexmap::IndexMap;
use netcdf::{AttributeValue, Extent, Extents};

use crate::compute::DEFAULT_AVEDIM;
use crate::dataset::{AttrValue, Dataset, NcArray, Variable};
use crate::error::PpError;

/// Fill value given to floating point data variables that do not have one.
pub const DEFAULT_FILL_VALUE: f64 = 1.0e20;

/// How a dataset is laid out on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOptions {
    /// The dimension written as unlimited
    pub time_dim: String,
    /// Fill value for floating point data variables without a `_FillValue`
    pub fill_value: f64,
    /// Chunk size per dimension. Dimensions not listed use their full
    /// length; if empty, the library default chunking is used.
    pub chunks: IndexMap<String, usize>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            time_dim: DEFAULT_AVEDIM.to_string(),
            fill_value: DEFAULT_FILL_VALUE,
            chunks: IndexMap::new(),
        }
    }
}

/// Write `ds` to `path`.
///
/// The file is first written as `<path>.tmp` and only renamed to `path` once
/// complete; on failure the temporary file is removed and `path` is left
/// untouched. NaNs in floating point variables are written as the fill value.
pub fn persist(ds: &Dataset, path: &Path, opts: &WriteOptions) -> error_stack::Result<(), PpError> {
    let tmp = tmp_path(path);
    if let Err(e) = write_file(ds, &tmp, opts) {
        if tmp.exists() {
            if let Err(rm_err) = std::fs::remove_file(&tmp) {
                log::warn!("Could not remove incomplete file {}: {rm_err}", tmp.display());
            }
        }
        return Err(e.change_context(PpError::context(format!("Could not write {}", path.display()))));
    }

    std::fs::rename(&tmp, path).change_context_lazy(|| {
        PpError::context(format!("Could not move {} to {}", tmp.display(), path.display()))
    })?;
    log::info!("Wrote {}", path.display());
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn write_file(ds: &Dataset, path: &Path, opts: &WriteOptions) -> error_stack::Result<(), PpError> {
    let mut nc = netcdf::create(path)
        .change_context_lazy(|| PpError::context(format!("Could not create {}", path.display())))?;

    for (name, value) in ds.attrs() {
        nc.add_attribute(name, to_nc_attribute(value)).change_context_lazy(|| {
            PpError::context(format!("Could not write global attribute '{name}'"))
        })?;
    }

    for (dim, len) in ds.dims() {
        let res = if dim == opts.time_dim {
            nc.add_unlimited_dimension(&dim).map(|_| ())
        } else {
            nc.add_dimension(&dim, len).map(|_| ())
        };
        res.change_context_lazy(|| PpError::context(format!("Could not create dimension '{dim}'")))?;
    }

    for (name, var) in ds.coords() {
        put_variable(&mut nc, name, var, opts, None)
            .change_context_lazy(|| PpError::context(format!("Could not write coordinate '{name}'")))?;
    }
    for (name, var) in ds.data_vars() {
        put_variable(&mut nc, name, var, opts, Some(opts.fill_value))
            .change_context_lazy(|| PpError::context(format!("Could not write variable '{name}'")))?;
    }
    Ok(())
}

/// Create variable `name` in `nc` and write `var` to it.
///
/// Floating point variables get their own `_FillValue` if they have one,
/// otherwise `default_fill`; integer variables only keep an existing one.
fn put_variable(
    nc: &mut netcdf::FileMut,
    name: &str,
    var: &Variable,
    opts: &WriteOptions,
    default_fill: Option<f64>,
) -> error_stack::Result<(), netcdf::Error> {
    let dims = var.dims().iter().map(|d| d.as_str()).collect::<Vec<_>>();
    let own_fill = var.attrs().get("_FillValue").and_then(|v| v.as_f64());
    let chunks = chunk_sizes(var, &opts.chunks);
    let shape = var.shape().to_vec();
    let extents = if shape.is_empty() {
        Extents::All
    } else {
        Extents::Extent(
            shape
                .iter()
                .map(|&count| Extent::SliceCount { start: 0, count, stride: 1 })
                .collect(),
        )
    };

    macro_rules! put_array {
        ($t:ty, $arr:expr, $fill:expr) => {{
            let mut ncvar = nc.add_variable::<$t>(name, &dims)?;
            if let Some(fill) = $fill {
                ncvar.set_fill_value(fill)?;
            }
            if let Some(chunks) = &chunks {
                ncvar.set_chunking(chunks)?;
            }
            for (att_name, value) in var.attrs() {
                if att_name != "_FillValue" {
                    ncvar.put_attribute(att_name, to_nc_attribute(value))?;
                }
            }
            if !$arr.is_empty() {
                ncvar.put($arr.view(), extents)?;
            }
        }};
    }

    let float_fill = own_fill.or(default_fill);
    match var.data() {
        NcArray::F32(arr) => {
            let fill = float_fill.map(|f| f as f32);
            let arr = match fill {
                Some(f) => arr.mapv(|v| if v.is_nan() { f } else { v }),
                None => arr.clone(),
            };
            put_array!(f32, arr, fill)
        }
        NcArray::F64(arr) => {
            let arr = match float_fill {
                Some(f) => arr.mapv(|v| if v.is_nan() { f } else { v }),
                None => arr.clone(),
            };
            put_array!(f64, arr, float_fill)
        }
        NcArray::I8(arr) => put_array!(i8, arr, own_fill.map(|f| f as i8)),
        NcArray::I16(arr) => put_array!(i16, arr, own_fill.map(|f| f as i16)),
        NcArray::I32(arr) => put_array!(i32, arr, own_fill.map(|f| f as i32)),
        NcArray::I64(arr) => put_array!(i64, arr, own_fill.map(|f| f as i64)),
        NcArray::U8(arr) => put_array!(u8, arr, own_fill.map(|f| f as u8)),
        NcArray::U16(arr) => put_array!(u16, arr, own_fill.map(|f| f as u16)),
        NcArray::U32(arr) => put_array!(u32, arr, own_fill.map(|f| f as u32)),
        NcArray::U64(arr) => put_array!(u64, arr, own_fill.map(|f| f as u64)),
        NcArray::Char(arr) => put_array!(u8, arr, None::<u8>),
    }
    Ok(())
}

/// Chunk shape of `var`, or `None` to leave chunking to the library.
fn chunk_sizes(var: &Variable, chunks: &IndexMap<String, usize>) -> Option<Vec<usize>> {
    if chunks.is_empty() || var.dims().is_empty() {
        return None;
    }
    let sizes = var
        .dims()
        .iter()
        .zip(var.shape())
        .map(|(dim, &len)| chunks.get(dim).copied().unwrap_or(len).min(len).max(1))
        .collect();
    Some(sizes)
}

fn to_nc_attribute(value: &AttrValue) -> AttributeValue {
    match value {
        AttrValue::Str(s) => AttributeValue::Str(s.clone()),
        AttrValue::Strs(s) => AttributeValue::Strs(s.clone()),
        AttrValue::Int(v) => AttributeValue::Longlong(*v),
        AttrValue::Ints(v) => AttributeValue::Longlongs(v.clone()),
        AttrValue::Float(v) => AttributeValue::Double(*v),
        AttrValue::Floats(v) => AttributeValue::Doubles(v.clone()),
    }
}
