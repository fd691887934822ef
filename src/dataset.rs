//! In-memory datasets: named-dimension arrays, coordinates and attributes.
//!
//! This is the one representation every stage works on. The netCDF reader
//! builds it, the extraction and reduction steps transform it, and the writer
//! persists it; none of them depend on how it was stored on disk.
use std::str::FromStr;

use indexmap::IndexMap;
use itertools::Itertools;
use ndarray::{ArrayD, Axis};

use crate::calendar::{Calendar, TimeUnits};
use crate::error::{PpError, PpResult};

/// A type that can hold any of the primitive arrays that might be stored in
/// a netCDF file.
#[derive(Debug, Clone, PartialEq)]
pub enum NcArray {
    I8(ArrayD<i8>),
    I16(ArrayD<i16>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    U8(ArrayD<u8>),
    U16(ArrayD<u16>),
    U32(ArrayD<u32>),
    U64(ArrayD<u64>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
    Char(ArrayD<u8>),
}

/// Apply an expression to the inner array whatever the variant, returning the
/// same variant.
macro_rules! map_nc_array {
    ($value:expr, $arr:ident => $body:expr) => {
        match $value {
            NcArray::I8($arr) => NcArray::I8($body),
            NcArray::I16($arr) => NcArray::I16($body),
            NcArray::I32($arr) => NcArray::I32($body),
            NcArray::I64($arr) => NcArray::I64($body),
            NcArray::U8($arr) => NcArray::U8($body),
            NcArray::U16($arr) => NcArray::U16($body),
            NcArray::U32($arr) => NcArray::U32($body),
            NcArray::U64($arr) => NcArray::U64($body),
            NcArray::F32($arr) => NcArray::F32($body),
            NcArray::F64($arr) => NcArray::F64($body),
            NcArray::Char($arr) => NcArray::Char($body),
        }
    };
}

/// Evaluate an expression on the inner array whatever the variant.
macro_rules! with_nc_array {
    ($value:expr, $arr:ident => $body:expr) => {
        match $value {
            NcArray::I8($arr) => $body,
            NcArray::I16($arr) => $body,
            NcArray::I32($arr) => $body,
            NcArray::I64($arr) => $body,
            NcArray::U8($arr) => $body,
            NcArray::U16($arr) => $body,
            NcArray::U32($arr) => $body,
            NcArray::U64($arr) => $body,
            NcArray::F32($arr) => $body,
            NcArray::F64($arr) => $body,
            NcArray::Char($arr) => $body,
        }
    };
}

impl NcArray {
    pub fn shape(&self) -> &[usize] {
        with_nc_array!(self, arr => arr.shape())
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Short type name, used in log and error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            NcArray::I8(_) => "i8",
            NcArray::I16(_) => "i16",
            NcArray::I32(_) => "i32",
            NcArray::I64(_) => "i64",
            NcArray::U8(_) => "u8",
            NcArray::U16(_) => "u16",
            NcArray::U32(_) => "u32",
            NcArray::U64(_) => "u64",
            NcArray::F32(_) => "f32",
            NcArray::F64(_) => "f64",
            NcArray::Char(_) => "char",
        }
    }

    /// Convert to double precision. Returns `None` for character arrays.
    pub fn to_f64(&self) -> Option<ArrayD<f64>> {
        let arr = match self {
            NcArray::I8(a) => a.mapv(f64::from),
            NcArray::I16(a) => a.mapv(f64::from),
            NcArray::I32(a) => a.mapv(f64::from),
            NcArray::I64(a) => a.mapv(|v| v as f64),
            NcArray::U8(a) => a.mapv(f64::from),
            NcArray::U16(a) => a.mapv(f64::from),
            NcArray::U32(a) => a.mapv(f64::from),
            NcArray::U64(a) => a.mapv(|v| v as f64),
            NcArray::F32(a) => a.mapv(f64::from),
            NcArray::F64(a) => a.clone(),
            NcArray::Char(_) => return None,
        };
        Some(arr)
    }

    /// Wrap the result of a computation done in double precision, keeping
    /// single precision if this array was single precision.
    pub fn float_like(&self, values: ArrayD<f64>) -> NcArray {
        match self {
            NcArray::F32(_) => NcArray::F32(values.mapv(|v| v as f32)),
            _ => NcArray::F64(values),
        }
    }

    /// Take the given indices along `axis`, in order.
    pub fn select(&self, axis: usize, indices: &[usize]) -> NcArray {
        map_nc_array!(self, arr => arr.select(Axis(axis), indices))
    }

    /// Join arrays of the same type along `axis`.
    pub fn concatenate(axis: usize, parts: &[&NcArray]) -> PpResult<NcArray> {
        let first = parts
            .first()
            .ok_or_else(|| PpError::invalid_argument("cannot concatenate zero arrays"))?;

        macro_rules! concat_variant {
            ($variant:ident) => {{
                let mut views = Vec::with_capacity(parts.len());
                for part in parts {
                    match part {
                        NcArray::$variant(a) => views.push(a.view()),
                        other => {
                            return Err(PpError::invalid_argument(format!(
                                "cannot concatenate a {} array onto a {} array",
                                other.type_name(),
                                first.type_name()
                            )))
                        }
                    }
                }
                let joined = ndarray::concatenate(Axis(axis), &views).map_err(|e| {
                    PpError::invalid_argument(format!("arrays could not be concatenated: {e}"))
                })?;
                NcArray::$variant(joined)
            }};
        }

        let joined = match first {
            NcArray::I8(_) => concat_variant!(I8),
            NcArray::I16(_) => concat_variant!(I16),
            NcArray::I32(_) => concat_variant!(I32),
            NcArray::I64(_) => concat_variant!(I64),
            NcArray::U8(_) => concat_variant!(U8),
            NcArray::U16(_) => concat_variant!(U16),
            NcArray::U32(_) => concat_variant!(U32),
            NcArray::U64(_) => concat_variant!(U64),
            NcArray::F32(_) => concat_variant!(F32),
            NcArray::F64(_) => concat_variant!(F64),
            NcArray::Char(_) => concat_variant!(Char),
        };
        Ok(joined)
    }
}

impl From<ArrayD<f64>> for NcArray {
    fn from(value: ArrayD<f64>) -> Self {
        NcArray::F64(value)
    }
}

impl From<ArrayD<f32>> for NcArray {
    fn from(value: ArrayD<f32>) -> Self {
        NcArray::F32(value)
    }
}

impl From<ArrayD<i32>> for NcArray {
    fn from(value: ArrayD<i32>) -> Self {
        NcArray::I32(value)
    }
}

/// Value of a dataset or variable attribute.
///
/// Integer and floating point attributes are widened to 64 bits.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Str(String),
    Strs(Vec<String>),
    Int(i64),
    Ints(Vec<i64>),
    Float(f64),
    Floats(Vec<f64>),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            AttrValue::Strs(v) if v.len() == 1 => Some(&v[0]),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Int(v) => Some(*v as f64),
            AttrValue::Ints(v) if v.len() == 1 => Some(v[0] as f64),
            AttrValue::Float(v) => Some(*v),
            AttrValue::Floats(v) if v.len() == 1 => Some(v[0]),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Str(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Float(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

pub type Attributes = IndexMap<String, AttrValue>;

/// An array with named dimensions and attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    dims: Vec<String>,
    data: NcArray,
    attrs: Attributes,
}

impl Variable {
    /// Create a variable, checking that there is one dimension name per
    /// array axis.
    pub fn new<S: AsRef<str>>(dims: &[S], data: NcArray) -> PpResult<Self> {
        if dims.len() != data.ndim() {
            return Err(PpError::invalid_argument(format!(
                "{} dimension names given for a {}-D array",
                dims.len(),
                data.ndim()
            )));
        }
        let dims = dims.iter().map(|d| d.as_ref().to_string()).collect();
        Ok(Self { dims, data, attrs: Attributes::new() })
    }

    pub fn with_attr<V: Into<AttrValue>>(mut self, name: &str, value: V) -> Self {
        self.attrs.insert(name.to_string(), value.into());
        self
    }

    pub fn with_attrs(mut self, attrs: Attributes) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    pub fn data(&self) -> &NcArray {
        &self.data
    }

    pub fn attrs(&self) -> &Attributes {
        &self.attrs
    }

    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).and_then(|v| v.as_str())
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Index of the axis named `dim`, if this variable has it.
    pub fn axis_of(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    pub fn has_dim(&self, dim: &str) -> bool {
        self.axis_of(dim).is_some()
    }

    pub fn len_of(&self, dim: &str) -> Option<usize> {
        self.axis_of(dim).map(|i| self.data.shape()[i])
    }

    pub fn to_f64(&self) -> Option<ArrayD<f64>> {
        self.data.to_f64()
    }

    /// A copy of this variable with new data of the same dimensions and the
    /// same attributes.
    pub fn replace_data(&self, data: NcArray) -> PpResult<Self> {
        Ok(Variable::new(&self.dims, data)?.with_attrs(self.attrs.clone()))
    }

    /// Take the given indices along dimension `dim`.
    pub fn select(&self, dim: &str, indices: &[usize]) -> PpResult<Self> {
        let axis = self
            .axis_of(dim)
            .ok_or_else(|| PpError::invalid_argument(format!("variable does not have dimension '{dim}'")))?;
        self.replace_data(self.data.select(axis, indices))
    }
}

/// A collection of variables sharing named dimensions.
///
/// Coordinates (1-D variables named after their dimension, like `time`) are
/// kept apart from the data variables, as in CF datasets. All variables
/// sharing a dimension name must agree on its length; the insertion methods
/// enforce this.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    coords: IndexMap<String, Variable>,
    data_vars: IndexMap<String, Variable>,
    attrs: Attributes,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attrs(&self) -> &Attributes {
        &self.attrs
    }

    pub fn set_attrs(&mut self, attrs: Attributes) {
        self.attrs = attrs;
    }

    pub fn coords(&self) -> &IndexMap<String, Variable> {
        &self.coords
    }

    pub fn data_vars(&self) -> &IndexMap<String, Variable> {
        &self.data_vars
    }

    /// Iterate over coordinates then data variables.
    pub fn variables(&self) -> impl Iterator<Item = (&String, &Variable)> {
        self.coords.iter().chain(self.data_vars.iter())
    }

    /// Look up a data variable or coordinate by name.
    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.data_vars.get(name).or_else(|| self.coords.get(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Like [`Dataset::get`] but an absent variable is a [`PpError::MissingVariable`].
    pub fn require(&self, name: &str) -> PpResult<&Variable> {
        self.get(name).ok_or_else(|| PpError::missing_variable(name))
    }

    /// Length of dimension `dim`, if any variable uses it.
    pub fn dim_len(&self, dim: &str) -> Option<usize> {
        self.variables().find_map(|(_, var)| var.len_of(dim))
    }

    /// All dimensions and their lengths, in order of first use.
    pub fn dims(&self) -> IndexMap<String, usize> {
        let mut dims = IndexMap::new();
        for (_, var) in self.variables() {
            for (name, len) in var.dims().iter().zip(var.shape()) {
                dims.entry(name.clone()).or_insert(*len);
            }
        }
        dims
    }

    /// Add or replace a coordinate variable.
    pub fn insert_coord(&mut self, name: &str, var: Variable) -> PpResult<()> {
        if var.dims().len() != 1 || var.dims()[0] != name {
            return Err(PpError::invalid_argument(format!(
                "coordinate '{name}' must be 1-D along dimension '{name}', got dimensions ({})",
                var.dims().iter().join(", ")
            )));
        }
        self.check_dims(name, &var)?;
        self.coords.insert(name.to_string(), var);
        Ok(())
    }

    /// Add or replace a data variable.
    pub fn insert_var(&mut self, name: &str, var: Variable) -> PpResult<()> {
        self.check_dims(name, &var)?;
        self.data_vars.insert(name.to_string(), var);
        Ok(())
    }

    /// Remove a data variable or coordinate, returning it.
    pub fn remove(&mut self, name: &str) -> Option<Variable> {
        self.data_vars
            .shift_remove(name)
            .or_else(|| self.coords.shift_remove(name))
    }

    /// Parse the units and calendar of coordinate `dim` (usually "time").
    ///
    /// The calendar is read from the `calendar` attribute, then from the
    /// FMS `calendar_type` attribute, defaulting to "standard".
    pub fn time_units(&self, dim: &str) -> PpResult<TimeUnits> {
        let time = self
            .coords
            .get(dim)
            .or_else(|| self.data_vars.get(dim))
            .ok_or_else(|| PpError::missing_variable(dim))?;
        let units = time.attr_str("units").ok_or_else(|| {
            PpError::calendar(format!("time coordinate '{dim}' has no units attribute"))
        })?;
        let calendar = match time.attr_str("calendar").or_else(|| time.attr_str("calendar_type")) {
            Some(c) => Calendar::from_str(c)?,
            None => Calendar::Gregorian,
        };
        TimeUnits::parse(units, calendar)
    }

    fn check_dims(&self, name: &str, var: &Variable) -> PpResult<()> {
        for (dim, &len) in var.dims().iter().zip(var.shape()) {
            // The variable being replaced may be the only one defining this dimension
            let existing = self
                .variables()
                .filter(|(other, _)| other.as_str() != name)
                .find_map(|(_, other)| other.len_of(dim));
            if let Some(existing) = existing {
                if existing != len {
                    return Err(PpError::invalid_argument(format!(
                        "variable '{name}' has length {len} along dimension '{dim}', but the dataset has length {existing}"
                    )));
                }
            }
        }
        Ok(())
    }
}
