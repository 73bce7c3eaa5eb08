// Shape and value specialization of compiled entrypoints
pub mod constraints;
pub mod key;
pub mod listener;
pub mod symbolic_shape;

pub use constraints::{
    ArgumentConstraint, format_constraints, has_static_shape_operands, has_value_constraints,
    is_specialization_only, resolve_constraints,
};
pub use key::SpecializationKey;
pub use listener::SpecializationListener;
pub use symbolic_shape::{
    SymbolicDim, SymbolicShape, SymbolicShapeMismatch, SymbolicShapesResolver, specialize_type,
};
