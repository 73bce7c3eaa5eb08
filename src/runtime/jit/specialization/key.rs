use std::fmt;
use std::hash::{BuildHasher, Hasher};

use ahash::RandomState;

use super::constraints::ArgumentConstraint;
use crate::runtime::jit::arguments::Argument;
use crate::utils::errors::JitError;

/// Key identifying one specialized executable: the symbolic shape hash of the
/// arguments, extended with the bytes of value-constrained operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpecializationKey(u64);

impl SpecializationKey {
    pub const fn from_shape_hash(hash: u64) -> Self {
        Self(hash)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Folds the exact content of every `Value` constrained operand into the
    /// key. Two buffers produce the same key only if they are byte-identical.
    pub fn combine_with_values(
        self,
        state: &RandomState,
        arguments: &[Argument<'_>],
        constraints: &[ArgumentConstraint],
    ) -> Result<Self, JitError> {
        let mut hasher = state.build_hasher();
        hasher.write_u64(self.0);

        for (index, (argument, constraint)) in arguments.iter().zip(constraints).enumerate() {
            if *constraint != ArgumentConstraint::Value {
                continue;
            }

            let memref = argument.as_memref().ok_or_else(|| JitError::TypeMismatch {
                index,
                message: "value constrained operand must be a memref".to_string(),
            })?;
            let bytes = memref.value_bytes().ok_or_else(|| JitError::ShapeMismatch {
                index,
                message: format!(
                    "value constrained operand of rank {} does not fit its buffer of {} bytes",
                    memref.rank(),
                    memref.data().len()
                ),
            })?;

            hasher.write_usize(index);
            hasher.write_usize(bytes.len());
            hasher.write(bytes);
        }

        Ok(Self(hasher.finish()))
    }
}

impl fmt::Display for SpecializationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
