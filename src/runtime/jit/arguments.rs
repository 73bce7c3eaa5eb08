//! Runtime arguments passed to `JitExecutable::get_executable`.
//!
//! Arguments borrow the caller's buffers for the duration of one call; the
//! runtime never keeps them beyond that.

use std::fmt;

use super::types::{DType, Type};
use crate::utils::errors::JitError;

/// Strided view of a caller-owned buffer.
#[derive(Clone, Copy)]
pub struct MemrefDesc<'a> {
    dtype: DType,
    data: &'a [u8],
    offset: usize,
    sizes: &'a [i64],
    strides: &'a [i64],
}

impl<'a> MemrefDesc<'a> {
    pub const fn new(
        dtype: DType,
        data: &'a [u8],
        offset: usize,
        sizes: &'a [i64],
        strides: &'a [i64],
    ) -> Self {
        Self {
            dtype,
            data,
            offset,
            sizes,
            strides,
        }
    }

    pub const fn dtype(&self) -> DType {
        self.dtype
    }

    pub const fn rank(&self) -> usize {
        self.sizes.len()
    }

    pub const fn sizes(&self) -> &'a [i64] {
        self.sizes
    }

    pub const fn strides(&self) -> &'a [i64] {
        self.strides
    }

    pub const fn offset(&self) -> usize {
        self.offset
    }

    pub const fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn size(&self, dim: usize) -> i64 {
        self.sizes[dim]
    }

    /// Bytes backing a rank 0 or rank 1 buffer, starting at the element
    /// offset. Returns `None` for higher ranks or if the buffer is too short.
    pub fn value_bytes(&self) -> Option<&'a [u8]> {
        let num_values = match self.sizes {
            [] => 1,
            [len] => usize::try_from(*len).ok()?,
            _ => return None,
        };
        let element = self.dtype.host_size();
        let start = self.offset.checked_mul(element)?;
        let len = num_values.checked_mul(element)?;
        self.data.get(start..start.checked_add(len)?)
    }
}

impl fmt::Debug for MemrefDesc<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemrefDesc")
            .field("dtype", &self.dtype)
            .field("bytes", &self.data.len())
            .field("offset", &self.offset)
            .field("sizes", &self.sizes)
            .field("strides", &self.strides)
            .finish()
    }
}

/// A single runtime argument.
#[derive(Debug, Clone, Copy)]
pub enum Argument<'a> {
    Memref(MemrefDesc<'a>),
    /// Address of a value the runtime treats as opaque.
    Opaque(usize),
}

impl<'a> Argument<'a> {
    pub const fn as_memref(&self) -> Option<&MemrefDesc<'a>> {
        match self {
            Self::Memref(memref) => Some(memref),
            Self::Opaque(_) => None,
        }
    }
}

impl<'a> From<MemrefDesc<'a>> for Argument<'a> {
    fn from(memref: MemrefDesc<'a>) -> Self {
        Self::Memref(memref)
    }
}

fn shape_error(index: usize, message: String) -> JitError {
    JitError::ShapeMismatch { index, message }
}

fn type_error(index: usize, message: String) -> JitError {
    JitError::TypeMismatch { index, message }
}

fn verify_sizes(
    index: usize,
    ty: &Type,
    dtype: DType,
    sizes: &[Option<i64>],
    memref: &MemrefDesc<'_>,
) -> Result<(), JitError> {
    if memref.dtype() != dtype {
        return Err(type_error(
            index,
            format!(
                "type mismatch: operand type {ty}, argument element type {}",
                memref.dtype()
            ),
        ));
    }

    if memref.rank() != sizes.len() {
        return Err(shape_error(
            index,
            format!(
                "rank mismatch: operand type {ty} has rank {}, argument rank {}",
                sizes.len(),
                memref.rank()
            ),
        ));
    }

    for (dim, (expected, actual)) in sizes.iter().zip(memref.sizes()).enumerate() {
        if *actual < 0 {
            return Err(shape_error(
                index,
                format!("negative size {actual} at dimension #{dim}"),
            ));
        }
        if expected.is_some_and(|expected| expected != *actual) {
            return Err(shape_error(
                index,
                format!(
                    "dimension #{dim} mismatch: operand type {ty}, argument size {actual}"
                ),
            ));
        }
    }

    Ok(())
}

/// Checks one memref argument against its declared operand type and reports
/// the exact mismatch.
pub fn verify_memref_argument(
    index: usize,
    ty: &Type,
    memref: &MemrefDesc<'_>,
) -> Result<(), JitError> {
    match ty.value_type() {
        Type::Memref { dtype, sizes } | Type::RankedTensor { dtype, sizes } => {
            verify_sizes(index, ty, *dtype, sizes, memref)
        }
        Type::UnrankedMemref { dtype } | Type::UnrankedTensor { dtype } => {
            let unknown = vec![None; memref.rank()];
            verify_sizes(index, ty, *dtype, &unknown, memref)
        }
        _ => Err(type_error(
            index,
            format!("expected shaped operand, got: {ty}"),
        )),
    }
}

/// Checks one argument of any kind against its declared operand type.
pub fn verify_argument(index: usize, ty: &Type, argument: &Argument<'_>) -> Result<(), JitError> {
    match (argument, ty.value_type().is_shaped()) {
        (Argument::Memref(memref), true) => verify_memref_argument(index, ty, memref),
        (Argument::Opaque(_), true) => Err(type_error(
            index,
            format!("expected memref argument for operand type {ty}"),
        )),
        (Argument::Memref(_), false) => Err(type_error(
            index,
            format!("unexpected memref argument for operand type {ty}"),
        )),
        (Argument::Opaque(_), false) => Ok(()),
    }
}
