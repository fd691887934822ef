//! Reading netCDF history files into [`Dataset`]s and merging them.
use error_stack::ResultExt;
use netcdf::types::{FloatType, IntType, NcVariableType};
use netcdf::{AttributeValue, Extents};

use super::archive::{extract_all, ArchiveHandles, ExtractedFile, ExtractionStrategy};
use crate::dataset::{AttrValue, Attributes, Dataset, NcArray, Variable};
use crate::error::{PpError, PpResult};

/// Extract `files` from `archives` (pairwise, in order) and merge them along
/// `time_dim` into one dataset.
///
/// The returned handles own whatever the extraction produced and should be
/// released once the dataset has been written.
pub fn assemble<S: ExtractionStrategy + ?Sized, P: AsRef<std::path::Path>>(
    files: &[String],
    archives: &[P],
    strategy: &S,
    time_dim: &str,
) -> error_stack::Result<(Dataset, ArchiveHandles), PpError> {
    let handles = extract_all(files, archives, strategy)?;
    let mut parts = Vec::with_capacity(handles.len());
    for file in handles.files() {
        parts.push(read_extracted(file)?);
    }
    let merged = concat_along(&parts, time_dim).change_context_lazy(|| {
        PpError::context(format!("Could not merge {} files along '{time_dim}'", parts.len()))
    })?;
    Ok((merged, handles))
}

/// Read an extracted file, whether it is in memory or on disk.
pub fn read_extracted(file: &ExtractedFile) -> error_stack::Result<Dataset, PpError> {
    let ctx = || PpError::context(format!("Could not read netCDF file {}", file.describe()));
    match file {
        ExtractedFile::InMemory { name, bytes } => {
            let nc = netcdf::open_mem(Some(name.as_str()), bytes).change_context_lazy(ctx)?;
            read_dataset(&nc).change_context_lazy(ctx)
        }
        ExtractedFile::OnDisk(path) => {
            let nc = netcdf::open(path).change_context_lazy(ctx)?;
            read_dataset(&nc).change_context_lazy(ctx)
        }
    }
}

/// Read every variable and attribute of an open netCDF file.
///
/// Float values equal to the variable's `_FillValue` or `missing_value`
/// become NaN. A 1-D variable named after its dimension is a coordinate.
pub fn read_dataset(nc: &netcdf::File) -> error_stack::Result<Dataset, PpError> {
    let mut ds = Dataset::new();
    ds.set_attrs(read_attributes(nc.attributes())?);

    for var in nc.variables() {
        let name = var.name();
        let dims = var.dimensions().iter().map(|d| d.name()).collect::<Vec<_>>();
        let attrs = read_attributes(var.attributes())?;
        let data = get_array(&var)
            .change_context_lazy(|| PpError::context(format!("Could not read variable '{name}'")))?;
        let data = mask_fill_values(data, &attrs);
        let variable = Variable::new(&dims, data)?.with_attrs(attrs);

        if dims.len() == 1 && dims[0] == name {
            ds.insert_coord(&name, variable)?;
        } else {
            ds.insert_var(&name, variable)?;
        }
    }
    Ok(ds)
}

/// Concatenate datasets along `time_dim`.
///
/// Variables that have that dimension are joined in order; all others are
/// taken from the first dataset. The attributes are the first dataset's.
pub fn concat_along(parts: &[Dataset], time_dim: &str) -> PpResult<Dataset> {
    let (first, rest) = parts
        .split_first()
        .ok_or_else(|| PpError::invalid_argument("no datasets to concatenate"))?;
    if rest.is_empty() {
        return Ok(first.clone());
    }

    let mut out = Dataset::new();
    out.set_attrs(first.attrs().clone());
    let is_coord = |name: &str| first.coords().contains_key(name);

    for (name, var) in first.variables() {
        let var = match var.axis_of(time_dim) {
            None => var.clone(),
            Some(axis) => {
                let mut arrays = vec![var.data()];
                for (i, other) in rest.iter().enumerate() {
                    let other_var = other.get(name).ok_or_else(|| {
                        PpError::invalid_argument(format!(
                            "variable '{name}' is in the first file but not in file {}",
                            i + 2
                        ))
                    })?;
                    if other_var.dims() != var.dims() {
                        return Err(PpError::invalid_argument(format!(
                            "variable '{name}' has dimensions {:?} in file {} but {:?} in the first",
                            other_var.dims(),
                            i + 2,
                            var.dims()
                        )));
                    }
                    arrays.push(other_var.data());
                }
                var.replace_data(NcArray::concatenate(axis, &arrays)?)?
            }
        };

        if is_coord(name.as_str()) {
            out.insert_coord(name, var)?;
        } else {
            out.insert_var(name, var)?;
        }
    }
    Ok(out)
}

fn get_array(var: &netcdf::Variable) -> error_stack::Result<NcArray, netcdf::Error> {
    let arr = match var.vartype() {
        NcVariableType::Int(IntType::I8) => NcArray::I8(var.get::<i8, _>(Extents::All)?),
        NcVariableType::Int(IntType::I16) => NcArray::I16(var.get::<i16, _>(Extents::All)?),
        NcVariableType::Int(IntType::I32) => NcArray::I32(var.get::<i32, _>(Extents::All)?),
        NcVariableType::Int(IntType::I64) => NcArray::I64(var.get::<i64, _>(Extents::All)?),
        NcVariableType::Int(IntType::U8) => NcArray::U8(var.get::<u8, _>(Extents::All)?),
        NcVariableType::Int(IntType::U16) => NcArray::U16(var.get::<u16, _>(Extents::All)?),
        NcVariableType::Int(IntType::U32) => NcArray::U32(var.get::<u32, _>(Extents::All)?),
        NcVariableType::Int(IntType::U64) => NcArray::U64(var.get::<u64, _>(Extents::All)?),
        NcVariableType::Float(FloatType::F32) => NcArray::F32(var.get::<f32, _>(Extents::All)?),
        NcVariableType::Float(FloatType::F64) => NcArray::F64(var.get::<f64, _>(Extents::All)?),
        NcVariableType::Char => NcArray::Char(var.get::<u8, _>(Extents::All)?),
        _ => {
            return Err(error_stack::Report::new(netcdf::Error::Str(
                "compound, opaque, enum, variable length and string variables are not supported".to_string(),
            )))
        }
    };
    Ok(arr)
}

fn mask_fill_values(data: NcArray, attrs: &Attributes) -> NcArray {
    let fills = ["_FillValue", "missing_value"]
        .iter()
        .filter_map(|k| attrs.get(*k).and_then(|v| v.as_f64()))
        .collect::<Vec<_>>();
    if fills.is_empty() {
        return data;
    }

    match data {
        NcArray::F32(arr) => {
            let fills = fills.iter().map(|&f| f as f32).collect::<Vec<_>>();
            NcArray::F32(arr.mapv(|v| if fills.contains(&v) { f32::NAN } else { v }))
        }
        NcArray::F64(arr) => NcArray::F64(arr.mapv(|v| if fills.contains(&v) { f64::NAN } else { v })),
        other => other,
    }
}

fn read_attributes<'a, I: Iterator<Item = netcdf::Attribute<'a>>>(
    attributes: I,
) -> error_stack::Result<Attributes, PpError> {
    let mut attrs = Attributes::new();
    for att in attributes {
        let name = att.name().to_string();
        let value = att
            .value()
            .change_context_lazy(|| PpError::context(format!("Could not read attribute '{name}'")))?;
        match convert_attribute(value) {
            Some(v) => {
                attrs.insert(name, v);
            }
            None => log::debug!("Skipping attribute '{name}' of unsupported type"),
        }
    }
    Ok(attrs)
}

fn convert_attribute(value: AttributeValue) -> Option<AttrValue> {
    let v = match value {
        AttributeValue::Str(s) => AttrValue::Str(s),
        AttributeValue::Strs(s) => AttrValue::Strs(s),
        AttributeValue::Uchar(v) => AttrValue::Int(v.into()),
        AttributeValue::Schar(v) => AttrValue::Int(v.into()),
        AttributeValue::Ushort(v) => AttrValue::Int(v.into()),
        AttributeValue::Short(v) => AttrValue::Int(v.into()),
        AttributeValue::Uint(v) => AttrValue::Int(v.into()),
        AttributeValue::Int(v) => AttrValue::Int(v.into()),
        AttributeValue::Longlong(v) => AttrValue::Int(v),
        AttributeValue::Ulonglong(v) => AttrValue::Int(i64::try_from(v).ok()?),
        AttributeValue::Float(v) => AttrValue::Float(v.into()),
        AttributeValue::Double(v) => AttrValue::Float(v),
        AttributeValue::Uchars(v) => AttrValue::Ints(v.into_iter().map(i64::from).collect()),
        AttributeValue::Schars(v) => AttrValue::Ints(v.into_iter().map(i64::from).collect()),
        AttributeValue::Ushorts(v) => AttrValue::Ints(v.into_iter().map(i64::from).collect()),
        AttributeValue::Shorts(v) => AttrValue::Ints(v.into_iter().map(i64::from).collect()),
        AttributeValue::Uints(v) => AttrValue::Ints(v.into_iter().map(i64::from).collect()),
        AttributeValue::Ints(v) => AttrValue::Ints(v.into_iter().map(i64::from).collect()),
        AttributeValue::Longlongs(v) => AttrValue::Ints(v),
        AttributeValue::Ulonglongs(v) => {
            AttrValue::Ints(v.into_iter().map(i64::try_from).collect::<Result<_, _>>().ok()?)
        }
        AttributeValue::Floats(v) => AttrValue::Floats(v.into_iter().map(f64::from).collect()),
        AttributeValue::Doubles(v) => AttrValue::Floats(v),
        #[allow(unreachable_patterns)]
        _ => return None,
    };
    Some(v)
}
