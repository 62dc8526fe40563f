//! Typed variable payloads moving between granules and the merged output.
//!
//! A payload is read from an origin granule, padded on the high side of each
//! axis up to the aggregated maximum dimensions, then written as one slab
//! into `output_var[subset_index, ..]`. Variables absent from a granule are
//! synthesized entirely from the fill value.

use ndarray::{ArrayD, IxDyn, Slice};
use netcdf::types::{FloatType, IntType, NcVariableType};
use netcdf::AttributeValue;

use crate::error::{ConciseError, Result};
use crate::schema::VariableInfo;

/// One variable's worth of data in its native datatype.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    I8(Vec<i8>),
    U8(Vec<u8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    I64(Vec<i64>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    Str(Vec<String>),
}

impl Payload {
    /// Approximate heap size, used for the staging budget.
    pub fn nbytes(&self) -> usize {
        match self {
            Payload::I8(v) => v.len(),
            Payload::U8(v) => v.len(),
            Payload::I16(v) => v.len() * 2,
            Payload::U16(v) => v.len() * 2,
            Payload::I32(v) => v.len() * 4,
            Payload::U32(v) => v.len() * 4,
            Payload::I64(v) => v.len() * 8,
            Payload::U64(v) => v.len() * 8,
            Payload::F32(v) => v.len() * 4,
            Payload::F64(v) => v.len() * 8,
            Payload::Str(v) => v.iter().map(String::len).sum(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Payload::I8(v) => v.len(),
            Payload::U8(v) => v.len(),
            Payload::I16(v) => v.len(),
            Payload::U16(v) => v.len(),
            Payload::I32(v) => v.len(),
            Payload::U32(v) => v.len(),
            Payload::I64(v) => v.len(),
            Payload::U64(v) => v.len(),
            Payload::F32(v) => v.len(),
            Payload::F64(v) => v.len(),
            Payload::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A padded payload staged for the writer, addressed by subset index and
/// variable path. `shape` excludes the leading `subset_index` axis.
#[derive(Debug)]
pub struct StagedVariable {
    pub subset_index: usize,
    pub var_path: String,
    pub shape: Vec<usize>,
    pub data: Payload,
}

impl StagedVariable {
    pub fn nbytes(&self) -> usize {
        self.data.nbytes()
    }
}

trait FillFrom: Sized {
    fn from_attr(attr: &AttributeValue) -> Option<Self>;
    fn zero() -> Self;
}

macro_rules! impl_fill_from {
    ($($t:ty),*) => {$(
        impl FillFrom for $t {
            fn from_attr(attr: &AttributeValue) -> Option<Self> {
                match attr {
                    AttributeValue::Uchar(x) => Some(*x as $t),
                    AttributeValue::Schar(x) => Some(*x as $t),
                    AttributeValue::Ushort(x) => Some(*x as $t),
                    AttributeValue::Short(x) => Some(*x as $t),
                    AttributeValue::Uint(x) => Some(*x as $t),
                    AttributeValue::Int(x) => Some(*x as $t),
                    AttributeValue::Ulonglong(x) => Some(*x as $t),
                    AttributeValue::Longlong(x) => Some(*x as $t),
                    AttributeValue::Float(x) => Some(*x as $t),
                    AttributeValue::Double(x) => Some(*x as $t),
                    _ => None,
                }
            }

            fn zero() -> Self {
                0 as $t
            }
        }
    )*};
}

impl_fill_from!(i8, u8, i16, u16, i32, u32, i64, u64, f32, f64);

fn fill_scalar<T: FillFrom>(fill: Option<&AttributeValue>) -> T {
    fill.and_then(T::from_attr).unwrap_or_else(T::zero)
}

fn fill_string(fill: Option<&AttributeValue>) -> String {
    match fill {
        Some(AttributeValue::Str(s)) => s.clone(),
        _ => String::new(),
    }
}

/// Walks all indices of `shape` in row-major order. An empty shape visits
/// the single scalar index once; a shape with a zero extent visits nothing.
fn for_each_index(
    shape: &[usize],
    mut f: impl FnMut(&[usize]) -> Result<()>,
) -> Result<()> {
    if shape.iter().any(|&s| s == 0) {
        return Ok(());
    }
    let mut idx = vec![0_usize; shape.len()];
    loop {
        f(&idx)?;

        let mut axis = shape.len();
        loop {
            if axis == 0 {
                return Ok(());
            }
            axis -= 1;
            idx[axis] += 1;
            if idx[axis] < shape[axis] {
                break;
            }
            idx[axis] = 0;
        }
    }
}

fn read_strings(var: &netcdf::Variable, shape: &[usize]) -> Result<Vec<String>> {
    let mut out = Vec::with_capacity(shape.iter().product());
    for_each_index(shape, |idx| {
        let ones = vec![1_usize; idx.len()];
        out.push(var.get_string((idx.to_vec(), ones))?);
        Ok(())
    })?;
    Ok(out)
}

/// Reads a variable's full payload in its native datatype.
pub fn read_variable(var: &netcdf::Variable, shape: &[usize]) -> Result<Payload> {
    let payload = match var.vartype() {
        NcVariableType::Int(IntType::I8) => Payload::I8(var.get_values::<i8, _>(..)?),
        NcVariableType::Int(IntType::U8) => Payload::U8(var.get_values::<u8, _>(..)?),
        NcVariableType::Int(IntType::I16) => Payload::I16(var.get_values::<i16, _>(..)?),
        NcVariableType::Int(IntType::U16) => Payload::U16(var.get_values::<u16, _>(..)?),
        NcVariableType::Int(IntType::I32) => Payload::I32(var.get_values::<i32, _>(..)?),
        NcVariableType::Int(IntType::U32) => Payload::U32(var.get_values::<u32, _>(..)?),
        NcVariableType::Int(IntType::I64) => Payload::I64(var.get_values::<i64, _>(..)?),
        NcVariableType::Int(IntType::U64) => Payload::U64(var.get_values::<u64, _>(..)?),
        NcVariableType::Float(FloatType::F32) => Payload::F32(var.get_values::<f32, _>(..)?),
        NcVariableType::Float(FloatType::F64) => Payload::F64(var.get_values::<f64, _>(..)?),
        NcVariableType::String => Payload::Str(read_strings(var, shape)?),
        other => {
            return Err(ConciseError::InvalidInput {
                reason: format!(
                    "unsupported datatype {:?} for variable {}",
                    other,
                    var.name()
                ),
            })
        }
    };
    Ok(payload)
}

fn pad<T: Clone>(values: Vec<T>, shape: &[usize], target: &[usize], fill: T) -> Result<Vec<T>> {
    let source = ArrayD::from_shape_vec(IxDyn(shape), values).map_err(|e| {
        ConciseError::InvariantViolation {
            detail: format!("payload does not match its declared shape: {e}"),
        }
    })?;
    let mut padded = ArrayD::from_elem(IxDyn(target), fill);
    padded
        .slice_each_axis_mut(|ax| Slice::from(0..shape[ax.axis.index()]))
        .assign(&source);
    Ok(padded.into_raw_vec())
}

/// Pads a payload on the high side of each axis up to `target`, filling new
/// cells with the variable's fill value or zero. 0-dimensional payloads and
/// payloads already at the target size pass through unchanged.
pub fn resize_payload(
    data: Payload,
    shape: &[usize],
    target: &[usize],
    fill: Option<&AttributeValue>,
) -> Result<(Payload, Vec<usize>)> {
    if shape == target {
        return Ok((data, target.to_vec()));
    }

    let padded = match data {
        Payload::I8(v) => Payload::I8(pad(v, shape, target, fill_scalar::<i8>(fill))?),
        Payload::U8(v) => Payload::U8(pad(v, shape, target, fill_scalar::<u8>(fill))?),
        Payload::I16(v) => Payload::I16(pad(v, shape, target, fill_scalar::<i16>(fill))?),
        Payload::U16(v) => Payload::U16(pad(v, shape, target, fill_scalar::<u16>(fill))?),
        Payload::I32(v) => Payload::I32(pad(v, shape, target, fill_scalar::<i32>(fill))?),
        Payload::U32(v) => Payload::U32(pad(v, shape, target, fill_scalar::<u32>(fill))?),
        Payload::I64(v) => Payload::I64(pad(v, shape, target, fill_scalar::<i64>(fill))?),
        Payload::U64(v) => Payload::U64(pad(v, shape, target, fill_scalar::<u64>(fill))?),
        Payload::F32(v) => Payload::F32(pad(v, shape, target, fill_scalar::<f32>(fill))?),
        Payload::F64(v) => Payload::F64(pad(v, shape, target, fill_scalar::<f64>(fill))?),
        Payload::Str(v) => Payload::Str(pad(v, shape, target, fill_string(fill))?),
    };
    Ok((padded, target.to_vec()))
}

/// Builds a full-shape fill payload for a variable a granule does not carry.
pub fn synthesize(info: &VariableInfo, target: &[usize]) -> Result<(Payload, Vec<usize>)> {
    let count: usize = target.iter().product();
    let fill = info.fill_value();

    let payload = match info.datatype() {
        NcVariableType::Int(IntType::I8) => Payload::I8(vec![fill_scalar::<i8>(fill); count]),
        NcVariableType::Int(IntType::U8) => Payload::U8(vec![fill_scalar::<u8>(fill); count]),
        NcVariableType::Int(IntType::I16) => Payload::I16(vec![fill_scalar::<i16>(fill); count]),
        NcVariableType::Int(IntType::U16) => Payload::U16(vec![fill_scalar::<u16>(fill); count]),
        NcVariableType::Int(IntType::I32) => Payload::I32(vec![fill_scalar::<i32>(fill); count]),
        NcVariableType::Int(IntType::U32) => Payload::U32(vec![fill_scalar::<u32>(fill); count]),
        NcVariableType::Int(IntType::I64) => Payload::I64(vec![fill_scalar::<i64>(fill); count]),
        NcVariableType::Int(IntType::U64) => Payload::U64(vec![fill_scalar::<u64>(fill); count]),
        NcVariableType::Float(FloatType::F32) => Payload::F32(vec![fill_scalar::<f32>(fill); count]),
        NcVariableType::Float(FloatType::F64) => Payload::F64(vec![fill_scalar::<f64>(fill); count]),
        NcVariableType::String => Payload::Str(vec![fill_string(fill); count]),
        other => {
            return Err(ConciseError::InvalidInput {
                reason: format!("unsupported datatype {:?} for {}", other, info.name()),
            })
        }
    };
    Ok((payload, target.to_vec()))
}

/// Writes a staged payload into `var[subset_index, ..]`. Writes are indexed
/// rather than appended, so arrival order between slabs never matters.
pub fn write_slab(
    var: &mut netcdf::VariableMut,
    subset_index: usize,
    shape: &[usize],
    data: &Payload,
) -> Result<()> {
    if shape.iter().any(|&s| s == 0) {
        return Ok(());
    }

    let mut start = Vec::with_capacity(shape.len() + 1);
    start.push(subset_index);
    start.extend(std::iter::repeat(0).take(shape.len()));
    let mut count = Vec::with_capacity(shape.len() + 1);
    count.push(1);
    count.extend_from_slice(shape);

    match data {
        Payload::I8(v) => var.put_values(v, (start, count))?,
        Payload::U8(v) => var.put_values(v, (start, count))?,
        Payload::I16(v) => var.put_values(v, (start, count))?,
        Payload::U16(v) => var.put_values(v, (start, count))?,
        Payload::I32(v) => var.put_values(v, (start, count))?,
        Payload::U32(v) => var.put_values(v, (start, count))?,
        Payload::I64(v) => var.put_values(v, (start, count))?,
        Payload::U64(v) => var.put_values(v, (start, count))?,
        Payload::F32(v) => var.put_values(v, (start, count))?,
        Payload::F64(v) => var.put_values(v, (start, count))?,
        Payload::Str(items) => {
            let mut flat = 0;
            for_each_index(shape, |idx| {
                let mut point = Vec::with_capacity(idx.len() + 1);
                point.push(subset_index);
                point.extend_from_slice(idx);
                let ones = vec![1_usize; point.len()];
                var.put_string(&items[flat], (point, ones))?;
                flat += 1;
                Ok(())
            })?;
        }
    }
    Ok(())
}

/// Applies a variable's fill value at creation time, converting the stored
/// attribute value into the variable's declared datatype.
pub fn apply_fill_value(
    var: &mut netcdf::VariableMut,
    datatype: &NcVariableType,
    fill: &AttributeValue,
) -> Result<()> {
    match datatype {
        NcVariableType::Int(IntType::I8) => var.set_fill_value(fill_scalar::<i8>(Some(fill)))?,
        NcVariableType::Int(IntType::U8) => var.set_fill_value(fill_scalar::<u8>(Some(fill)))?,
        NcVariableType::Int(IntType::I16) => var.set_fill_value(fill_scalar::<i16>(Some(fill)))?,
        NcVariableType::Int(IntType::U16) => var.set_fill_value(fill_scalar::<u16>(Some(fill)))?,
        NcVariableType::Int(IntType::I32) => var.set_fill_value(fill_scalar::<i32>(Some(fill)))?,
        NcVariableType::Int(IntType::U32) => var.set_fill_value(fill_scalar::<u32>(Some(fill)))?,
        NcVariableType::Int(IntType::I64) => var.set_fill_value(fill_scalar::<i64>(Some(fill)))?,
        NcVariableType::Int(IntType::U64) => var.set_fill_value(fill_scalar::<u64>(Some(fill)))?,
        NcVariableType::Float(FloatType::F32) => var.set_fill_value(fill_scalar::<f32>(Some(fill)))?,
        NcVariableType::Float(FloatType::F64) => var.set_fill_value(fill_scalar::<f64>(Some(fill)))?,
        // String variables never take a scalar fill at creation
        _ => {}
    }
    Ok(())
}
