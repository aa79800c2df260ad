#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Null,
    Bool,
    Int64,
    Float64,
    Utf8,
}

impl DType {
    /// Cells of this dtype convert losslessly to `f64`.
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Bool | Self::Int64 | Self::Float64)
    }

    /// Cells of this dtype form a finite set of labels.
    #[must_use]
    pub fn is_nominal(self) -> bool {
        matches!(self, Self::Bool | Self::Utf8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullKind {
    Null,
    NaN,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Scalar {
    Null(NullKind),
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
}

/// Hashable view of a cell used as a category label.
///
/// All missing representations collapse into `Missing`, which is a category
/// of its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum NominalKey {
    Missing,
    Bool(bool),
    Int64(i64),
    /// Raw bit pattern of a non-NaN float.
    Float64Bits(u64),
    Utf8(String),
}

impl fmt::Display for NominalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "?"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64Bits(bits) => write!(f, "{}", f64::from_bits(*bits)),
            Self::Utf8(v) => write!(f, "{v}"),
        }
    }
}

impl Scalar {
    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Self::Null(_) => DType::Null,
            Self::Bool(_) => DType::Bool,
            Self::Int64(_) => DType::Int64,
            Self::Float64(_) => DType::Float64,
            Self::Utf8(_) => DType::Utf8,
        }
    }

    #[must_use]
    pub fn is_missing(&self) -> bool {
        match self {
            Self::Null(_) => true,
            Self::Float64(v) => v.is_nan(),
            _ => false,
        }
    }

    #[must_use]
    pub fn missing_for_dtype(dtype: DType) -> Self {
        match dtype {
            DType::Float64 => Self::Null(NullKind::NaN),
            DType::Null | DType::Bool | DType::Int64 | DType::Utf8 => Self::Null(NullKind::Null),
        }
    }

    pub fn to_f64(&self) -> Result<f64, TypeError> {
        match self {
            Self::Bool(v) => Ok(if *v { 1.0 } else { 0.0 }),
            Self::Int64(v) => Ok(*v as f64),
            Self::Float64(v) if !v.is_nan() => Ok(*v),
            Self::Float64(_) => Err(TypeError::ValueIsMissing {
                kind: NullKind::NaN,
            }),
            Self::Null(kind) => Err(TypeError::ValueIsMissing { kind: *kind }),
            Self::Utf8(v) => Err(TypeError::NonNumericValue {
                value: v.clone(),
                dtype: DType::Utf8,
            }),
        }
    }

    #[must_use]
    pub fn nominal_key(&self) -> NominalKey {
        match self {
            Self::Null(_) => NominalKey::Missing,
            Self::Float64(v) if v.is_nan() => NominalKey::Missing,
            // -0.0 and 0.0 are one category
            Self::Float64(v) if *v == 0.0 => NominalKey::Float64Bits(0.0_f64.to_bits()),
            Self::Float64(v) => NominalKey::Float64Bits(v.to_bits()),
            Self::Bool(v) => NominalKey::Bool(*v),
            Self::Int64(v) => NominalKey::Int64(*v),
            Self::Utf8(v) => NominalKey::Utf8(v.clone()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null(_) => write!(f, "?"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Utf8(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypeError {
    #[error("dtype coercion from {left:?} to {right:?} has no compatible common type")]
    IncompatibleDtypes { left: DType, right: DType },
    #[error("cannot cast scalar of dtype {from:?} to {to:?}")]
    InvalidCast { from: DType, to: DType },
    #[error("cannot cast float {value} to int64 without loss")]
    LossyFloatToInt { value: f64 },
    #[error("value {value:?} has non-numeric dtype {dtype:?}")]
    NonNumericValue { value: String, dtype: DType },
    #[error("value is missing ({kind:?})")]
    ValueIsMissing { kind: NullKind },
}

pub fn common_dtype(left: DType, right: DType) -> Result<DType, TypeError> {
    use DType::{Bool, Float64, Int64, Null};

    let out = match (left, right) {
        (a, b) if a == b => a,
        (Null, other) | (other, Null) => other,
        (Bool, Int64) | (Int64, Bool) => Int64,
        (Bool, Float64) | (Float64, Bool) => Float64,
        (Int64, Float64) | (Float64, Int64) => Float64,
        _ => return Err(TypeError::IncompatibleDtypes { left, right }),
    };

    Ok(out)
}

pub fn infer_dtype<'a>(values: impl IntoIterator<Item = &'a Scalar>) -> Result<DType, TypeError> {
    let mut current = DType::Null;
    for value in values {
        current = common_dtype(current, value.dtype())?;
    }
    Ok(current)
}

/// Cast a scalar to `target`, passing the value through untouched when it
/// already has that dtype.
pub fn cast_scalar_owned(value: Scalar, target: DType) -> Result<Scalar, TypeError> {
    if value.is_missing() {
        return Ok(Scalar::missing_for_dtype(target));
    }
    let from = value.dtype();
    if from == target {
        return Ok(value);
    }

    match (value, target) {
        (Scalar::Bool(v), DType::Int64) => Ok(Scalar::Int64(i64::from(v))),
        (Scalar::Bool(v), DType::Float64) => Ok(Scalar::Float64(if v { 1.0 } else { 0.0 })),
        (Scalar::Int64(v), DType::Float64) => Ok(Scalar::Float64(v as f64)),
        (Scalar::Float64(v), DType::Int64) => {
            if !v.is_finite() || v != v.trunc() || v < i64::MIN as f64 || v > i64::MAX as f64 {
                return Err(TypeError::LossyFloatToInt { value: v });
            }
            Ok(Scalar::Int64(v as i64))
        }
        _ => Err(TypeError::InvalidCast { from, to: target }),
    }
}
