//! Runtime type model for compiled entrypoints.
//!
//! The IR toolkit converts its own function types into [`FunctionType`]
//! through the type converter in the compilation options. Everything the
//! runtime decides about shapes, constraints and calling conventions works on
//! these types only.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

const POINTER_SIZE: usize = std::mem::size_of::<*const u8>();

/// Element type of scalars and shaped buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    I1,
    I8,
    I16,
    I32,
    I64,
    UI8,
    UI16,
    UI32,
    UI64,
    F16,
    BF16,
    F32,
    F64,
}

impl DType {
    /// Size of one element in host memory.
    pub const fn host_size(self) -> usize {
        match self {
            Self::I1 | Self::I8 | Self::UI8 => 1,
            Self::I16 | Self::UI16 | Self::F16 | Self::BF16 => 2,
            Self::I32 | Self::UI32 | Self::F32 => 4,
            Self::I64 | Self::UI64 | Self::F64 => 8,
        }
    }

    pub const fn is_integer(self) -> bool {
        !matches!(self, Self::F16 | Self::BF16 | Self::F32 | Self::F64)
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::I1 => "i1",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::UI8 => "ui8",
            Self::UI16 => "ui16",
            Self::UI32 => "ui32",
            Self::UI64 => "ui64",
            Self::F16 => "f16",
            Self::BF16 => "bf16",
            Self::F32 => "f32",
            Self::F64 => "f64",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid type `{input}`: {reason}")]
pub struct TypeParseError {
    input: String,
    reason: &'static str,
}

impl TypeParseError {
    fn new(input: &str, reason: &'static str) -> Self {
        Self {
            input: input.to_string(),
            reason,
        }
    }
}

impl FromStr for DType {
    type Err = TypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "i1" => Self::I1,
            "i8" => Self::I8,
            "i16" => Self::I16,
            "i32" => Self::I32,
            "i64" => Self::I64,
            "ui8" => Self::UI8,
            "ui16" => Self::UI16,
            "ui32" => Self::UI32,
            "ui64" => Self::UI64,
            "f16" => Self::F16,
            "bf16" => Self::BF16,
            "f32" => Self::F32,
            "f64" => Self::F64,
            _ => return Err(TypeParseError::new(s, "unknown element type")),
        })
    }
}

/// Operand or result type of a compiled function. Ranked shapes use `None`
/// for dynamic dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Scalar(DType),
    Memref {
        dtype: DType,
        sizes: Vec<Option<i64>>,
    },
    RankedTensor {
        dtype: DType,
        sizes: Vec<Option<i64>>,
    },
    UnrankedMemref {
        dtype: DType,
    },
    UnrankedTensor {
        dtype: DType,
    },
    AsyncToken,
    AsyncValue(Box<Type>),
    KernelContext,
    Opaque,
}

impl Type {
    pub const fn memref(dtype: DType, sizes: Vec<Option<i64>>) -> Self {
        Self::Memref { dtype, sizes }
    }

    pub const fn tensor(dtype: DType, sizes: Vec<Option<i64>>) -> Self {
        Self::RankedTensor { dtype, sizes }
    }

    /// Strips any number of async value wrappers.
    pub fn value_type(&self) -> &Self {
        let mut ty = self;
        while let Self::AsyncValue(inner) = ty {
            ty = inner;
        }
        ty
    }

    pub const fn is_shaped(&self) -> bool {
        matches!(
            self,
            Self::Memref { .. }
                | Self::RankedTensor { .. }
                | Self::UnrankedMemref { .. }
                | Self::UnrankedTensor { .. }
        )
    }

    pub const fn dtype(&self) -> Option<DType> {
        match self {
            Self::Scalar(dtype)
            | Self::Memref { dtype, .. }
            | Self::RankedTensor { dtype, .. }
            | Self::UnrankedMemref { dtype }
            | Self::UnrankedTensor { dtype } => Some(*dtype),
            _ => None,
        }
    }

    /// Dimension sizes of a ranked shaped type.
    pub fn sizes(&self) -> Option<&[Option<i64>]> {
        match self {
            Self::Memref { sizes, .. } | Self::RankedTensor { sizes, .. } => Some(sizes),
            _ => None,
        }
    }

    pub fn rank(&self) -> Option<usize> {
        self.sizes().map(<[Option<i64>]>::len)
    }

    /// Non-shaped types trivially have a static shape; unranked types never do.
    pub fn has_static_shape(&self) -> bool {
        match self.value_type() {
            Self::UnrankedMemref { .. } | Self::UnrankedTensor { .. } => false,
            ty => ty
                .sizes()
                .is_none_or(|sizes| sizes.iter().all(Option::is_some)),
        }
    }

    /// Returns the same shaped type with its dimensions replaced, keeping the
    /// ranked/unranked memref or tensor kind. Non-shaped types are returned
    /// unchanged.
    #[must_use]
    pub fn with_sizes(&self, sizes: Vec<Option<i64>>) -> Self {
        match self {
            Self::Memref { dtype, .. } | Self::UnrankedMemref { dtype } => Self::Memref {
                dtype: *dtype,
                sizes,
            },
            Self::RankedTensor { dtype, .. } | Self::UnrankedTensor { dtype } => {
                Self::RankedTensor {
                    dtype: *dtype,
                    sizes,
                }
            }
            other => other.clone(),
        }
    }

    /// Number of pointer-sized slots the type occupies when passed to the
    /// native entrypoint.
    pub fn num_abi_args(&self) -> Result<usize, String> {
        match self {
            Self::Scalar(_)
            | Self::AsyncToken
            | Self::AsyncValue(_)
            | Self::KernelContext
            | Self::Opaque => Ok(1),
            // base pointer, aligned pointer, offset, sizes, strides
            Self::Memref { sizes, .. } => Ok(3 + 2 * sizes.len()),
            _ => Err(format!("unsupported argument type: {self}")),
        }
    }

    /// Size and alignment of the type when returned from the native
    /// entrypoint through the results buffer.
    pub fn result_abi_layout(&self) -> Result<(usize, usize), String> {
        match self {
            Self::Scalar(dtype) => Ok((dtype.host_size(), dtype.host_size())),
            Self::AsyncToken | Self::AsyncValue(_) | Self::Opaque => {
                Ok((POINTER_SIZE, POINTER_SIZE))
            }
            Self::Memref { sizes, .. } => {
                // two pointers followed by offset, sizes and strides
                let size = 2 * POINTER_SIZE + 8 * (1 + 2 * sizes.len());
                Ok((size, POINTER_SIZE))
            }
            _ => Err(format!("unsupported result type: {self}")),
        }
    }
}

fn write_shaped(
    f: &mut fmt::Formatter<'_>,
    kind: &str,
    dtype: DType,
    sizes: Option<&[Option<i64>]>,
) -> fmt::Result {
    write!(f, "{kind}<")?;
    match sizes {
        None => f.write_str("*x")?,
        Some(sizes) => {
            for size in sizes {
                match size {
                    Some(size) => write!(f, "{size}x")?,
                    None => f.write_str("?x")?,
                }
            }
        }
    }
    write!(f, "{dtype}>")
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(dtype) => write!(f, "{dtype}"),
            Self::Memref { dtype, sizes } => write_shaped(f, "memref", *dtype, Some(sizes)),
            Self::RankedTensor { dtype, sizes } => write_shaped(f, "tensor", *dtype, Some(sizes)),
            Self::UnrankedMemref { dtype } => write_shaped(f, "memref", *dtype, None),
            Self::UnrankedTensor { dtype } => write_shaped(f, "tensor", *dtype, None),
            Self::AsyncToken => f.write_str("!async.token"),
            Self::AsyncValue(inner) => write!(f, "!async.value<{inner}>"),
            Self::KernelContext => f.write_str("!rt.kernel_context"),
            Self::Opaque => f.write_str("!rt.opaque"),
        }
    }
}

fn parse_shaped(input: &str, body: &str, tensor: bool) -> Result<Type, TypeParseError> {
    let mut parts: Vec<&str> = body.split('x').collect();
    let dtype: DType = parts
        .pop()
        .ok_or_else(|| TypeParseError::new(input, "missing element type"))?
        .parse()
        .map_err(|_| TypeParseError::new(input, "unknown element type"))?;

    if parts == ["*"] {
        return Ok(if tensor {
            Type::UnrankedTensor { dtype }
        } else {
            Type::UnrankedMemref { dtype }
        });
    }

    let sizes = parts
        .iter()
        .map(|part| match *part {
            "?" => Ok(None),
            digits => digits
                .parse::<i64>()
                .ok()
                .filter(|size| *size >= 0)
                .map(Some)
                .ok_or_else(|| TypeParseError::new(input, "invalid dimension size")),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(if tensor {
        Type::RankedTensor { dtype, sizes }
    } else {
        Type::Memref { dtype, sizes }
    })
}

impl FromStr for Type {
    type Err = TypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "!async.token" => return Ok(Self::AsyncToken),
            "!rt.kernel_context" => return Ok(Self::KernelContext),
            "!rt.opaque" => return Ok(Self::Opaque),
            _ => {}
        }

        if let Some(inner) = s
            .strip_prefix("!async.value<")
            .and_then(|rest| rest.strip_suffix('>'))
        {
            return Ok(Self::AsyncValue(Box::new(inner.parse()?)));
        }
        if let Some(body) = s.strip_prefix("memref<").and_then(|r| r.strip_suffix('>')) {
            return parse_shaped(s, body, false);
        }
        if let Some(body) = s.strip_prefix("tensor<").and_then(|r| r.strip_suffix('>')) {
            return parse_shaped(s, body, true);
        }

        s.parse::<DType>()
            .map(Self::Scalar)
            .map_err(|_| TypeParseError::new(s, "unknown type"))
    }
}

/// Signature of a compiled function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FunctionType {
    operands: Vec<Type>,
    results: Vec<Type>,
}

impl FunctionType {
    pub const fn new(operands: Vec<Type>, results: Vec<Type>) -> Self {
        Self { operands, results }
    }

    pub fn operands(&self) -> &[Type] {
        &self.operands
    }

    pub fn results(&self) -> &[Type] {
        &self.results
    }

    pub fn num_operands(&self) -> usize {
        self.operands.len()
    }

    pub fn num_results(&self) -> usize {
        self.results.len()
    }

    pub fn operand(&self, index: usize) -> &Type {
        &self.operands[index]
    }

    pub fn result(&self, index: usize) -> &Type {
        &self.results[index]
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, types: &[Type]) -> fmt::Result {
    f.write_str("(")?;
    for (index, ty) in types.iter().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{ty}")?;
    }
    f.write_str(")")
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_list(f, &self.operands)?;
        f.write_str(" -> ")?;
        write_list(f, &self.results)
    }
}

/// Splits on `separator` outside of `<...>` and `(...)` nesting.
pub(crate) fn split_top_level(input: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (index, ch) in input.char_indices() {
        match ch {
            '<' | '(' => depth += 1,
            '>' | ')' => depth = depth.saturating_sub(1),
            c if c == separator && depth == 0 => {
                parts.push(input[start..index].trim());
                start = index + ch.len_utf8();
            }
            _ => {}
        }
    }
    let last = input[start..].trim();
    if !last.is_empty() || !parts.is_empty() {
        parts.push(last);
    }
    parts
}

fn parse_type_list(input: &str, list: &str) -> Result<Vec<Type>, TypeParseError> {
    let inner = list
        .trim()
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| TypeParseError::new(input, "expected a parenthesized type list"))?;
    split_top_level(inner, ',')
        .into_iter()
        .filter(|part| !part.is_empty())
        .map(str::parse)
        .collect()
}

impl FromStr for FunctionType {
    type Err = TypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (operands, results) = s
            .split_once("->")
            .ok_or_else(|| TypeParseError::new(s, "expected `->`"))?;
        Ok(Self::new(
            parse_type_list(s, operands)?,
            parse_type_list(s, results)?,
        ))
    }
}
