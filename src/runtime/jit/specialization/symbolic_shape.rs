use std::hash::{BuildHasher, Hasher};

use ahash::{AHashMap, AHashSet, RandomState};
use thiserror::Error;

use super::constraints::ArgumentConstraint;
use crate::runtime::jit::arguments::Argument;
use crate::runtime::jit::types::{DType, FunctionType, Type};

/// One dimension of a symbolic shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolicDim {
    /// The compiled code may assume this exact extent.
    Known(i64),
    /// Unknown extent; every dimension carrying the same symbol within one
    /// call has the same runtime size.
    Symbol(u32),
}

pub type SymbolicShape = Vec<SymbolicDim>;

/// Arguments are not compatible with the entrypoint signature. The resolver
/// only reports where it stopped; callers verify the operand to produce a
/// precise message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("failed to resolve symbolic shape of argument #{index}")]
pub struct SymbolicShapeMismatch {
    pub index: usize,
}

#[derive(Debug, Clone)]
enum OperandShape {
    NotShaped,
    Unranked,
    Ranked(Vec<Option<i64>>),
}

impl OperandShape {
    fn of(ty: &Type) -> Self {
        let ty = ty.value_type();
        match ty.sizes() {
            Some(sizes) => Self::Ranked(sizes.to_vec()),
            None if ty.is_shaped() => Self::Unranked,
            None => Self::NotShaped,
        }
    }
}

/// Receives the classification produced by the resolver, operand by operand.
trait ShapeSink {
    fn operand(&mut self, index: usize, rank: Option<usize>);
    fn dim(&mut self, dim: SymbolicDim);
}

struct Collect(Vec<SymbolicShape>);

impl ShapeSink for Collect {
    fn operand(&mut self, _index: usize, rank: Option<usize>) {
        self.0.push(Vec::with_capacity(rank.unwrap_or(0)));
    }

    fn dim(&mut self, dim: SymbolicDim) {
        if let Some(shape) = self.0.last_mut() {
            shape.push(dim);
        }
    }
}

struct HashInto<H>(H);

impl<H: Hasher> ShapeSink for HashInto<H> {
    fn operand(&mut self, index: usize, rank: Option<usize>) {
        self.0.write_usize(index);
        match rank {
            Some(rank) => {
                self.0.write_u8(1);
                self.0.write_usize(rank);
            }
            None => self.0.write_u8(0),
        }
    }

    fn dim(&mut self, dim: SymbolicDim) {
        match dim {
            SymbolicDim::Known(size) => {
                self.0.write_u8(0);
                self.0.write_i64(size);
            }
            SymbolicDim::Symbol(symbol) => {
                self.0.write_u8(1);
                self.0.write_u32(symbol);
            }
        }
    }
}

/// Classifies concrete argument shapes into symbolic shapes, so that calls
/// differing only in dimensions the compiled code treats symbolically share
/// one specialization.
///
/// Classification rules per dimension:
///
/// - statically known in the signature: must match, stays known;
/// - operand carries a `Shape` or `Value` constraint: the runtime size;
/// - runtime size 1, or a size that appears statically anywhere in the
///   signature: the runtime size;
/// - otherwise a symbol, shared by all dimensions of the same runtime size.
#[derive(Debug, Clone)]
pub struct SymbolicShapesResolver {
    constraints: Vec<ArgumentConstraint>,
    operands: Vec<OperandShape>,
    dtypes: Vec<Option<DType>>,
    seen_static_sizes: AHashSet<i64>,
    hash_state: RandomState,
}

impl SymbolicShapesResolver {
    pub fn new(signature: &FunctionType, constraints: &[ArgumentConstraint]) -> Self {
        let operands: Vec<OperandShape> =
            signature.operands().iter().map(OperandShape::of).collect();

        let seen_static_sizes = operands
            .iter()
            .filter_map(|operand| match operand {
                OperandShape::Ranked(sizes) => Some(sizes.iter().flatten().copied()),
                _ => None,
            })
            .flatten()
            .collect();

        let dtypes = signature
            .operands()
            .iter()
            .map(|ty| ty.value_type().dtype())
            .collect();

        Self {
            constraints: constraints.to_vec(),
            operands,
            dtypes,
            seen_static_sizes,
            hash_state: RandomState::with_seeds(
                0x6a69_7472_745f_7368,
                0x6170_6573_5f68_6173,
                0x685f_7631_0000_0000,
                0x0000_0000_0000_0001,
            ),
        }
    }

    pub fn num_operands(&self) -> usize {
        self.operands.len()
    }

    pub fn constraints(&self) -> &[ArgumentConstraint] {
        &self.constraints
    }

    /// Hasher state shared by shape hashing and value hashing.
    pub const fn hash_state(&self) -> &RandomState {
        &self.hash_state
    }

    pub fn resolve(
        &self,
        arguments: &[Argument<'_>],
    ) -> Result<Vec<SymbolicShape>, SymbolicShapeMismatch> {
        let mut sink = Collect(Vec::with_capacity(arguments.len()));
        self.walk(arguments, &mut sink)?;
        Ok(sink.0)
    }

    /// Hash of exactly what [`resolve`](Self::resolve) returns for the same
    /// arguments, computed without materializing the shapes.
    pub fn resolve_hash(&self, arguments: &[Argument<'_>]) -> Result<u64, SymbolicShapeMismatch> {
        let mut sink = HashInto(self.hash_state.build_hasher());
        self.walk(arguments, &mut sink)?;
        Ok(sink.0.finish())
    }

    fn walk<S: ShapeSink>(
        &self,
        arguments: &[Argument<'_>],
        sink: &mut S,
    ) -> Result<(), SymbolicShapeMismatch> {
        if arguments.len() != self.operands.len() {
            return Err(SymbolicShapeMismatch {
                index: arguments.len().min(self.operands.len()),
            });
        }

        let mut symbols: AHashMap<i64, u32> = AHashMap::new();

        for (index, (operand, argument)) in self.operands.iter().zip(arguments).enumerate() {
            let mismatch = SymbolicShapeMismatch { index };

            let static_sizes = match operand {
                OperandShape::NotShaped => {
                    sink.operand(index, None);
                    continue;
                }
                OperandShape::Unranked => None,
                OperandShape::Ranked(sizes) => Some(sizes.as_slice()),
            };

            let memref = argument.as_memref().ok_or(mismatch)?;
            let declared = self.dtypes.get(index).copied().flatten();
            if declared.is_some_and(|dtype| dtype != memref.dtype()) {
                return Err(mismatch);
            }
            let runtime_sizes = memref.sizes();
            if static_sizes.is_some_and(|sizes| sizes.len() != runtime_sizes.len()) {
                return Err(mismatch);
            }

            sink.operand(index, Some(runtime_sizes.len()));
            let constrained = self
                .constraints
                .get(index)
                .is_some_and(|constraint| *constraint != ArgumentConstraint::Resolved);

            for (dim, &size) in runtime_sizes.iter().enumerate() {
                if size < 0 {
                    return Err(mismatch);
                }

                let static_size = static_sizes.and_then(|sizes| sizes[dim]);
                let symbolic = match static_size {
                    Some(expected) if expected != size => return Err(mismatch),
                    Some(expected) => SymbolicDim::Known(expected),
                    None if constrained || size == 1 || self.seen_static_sizes.contains(&size) => {
                        SymbolicDim::Known(size)
                    }
                    None => {
                        let next = u32::try_from(symbols.len()).unwrap_or(u32::MAX);
                        SymbolicDim::Symbol(*symbols.entry(size).or_insert(next))
                    }
                };
                sink.dim(symbolic);
            }
        }

        Ok(())
    }
}

/// Operand type after specialization: known dimensions become static,
/// symbolic dimensions stay dynamic. Non-shaped types are unchanged.
pub fn specialize_type(ty: &Type, shape: &[SymbolicDim]) -> Type {
    if !ty.value_type().is_shaped() {
        return ty.clone();
    }
    let sizes = shape
        .iter()
        .map(|dim| match dim {
            SymbolicDim::Known(size) => Some(*size),
            SymbolicDim::Symbol(_) => None,
        })
        .collect();
    ty.value_type().with_sizes(sizes)
}
