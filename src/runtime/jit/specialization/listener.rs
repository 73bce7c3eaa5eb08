use crate::runtime::jit::types::Type;

use super::symbolic_shape::SymbolicShape;

/// Observer of entrypoint specialization. Purely diagnostic: it can't
/// influence what gets compiled.
pub trait SpecializationListener: Send + Sync {
    /// Called once per specialization with the rewritten operand types and
    /// the symbolic shapes they were derived from.
    fn notify_modified_operands(&self, _operands: &[Type], _symbolic_shapes: &[SymbolicShape]) {}

    /// Called for every value constrained operand sunk into the function
    /// body as a constant.
    fn notify_value_specialized(&self, _index: usize, _ty: &Type, _value: &[u8]) {}
}
