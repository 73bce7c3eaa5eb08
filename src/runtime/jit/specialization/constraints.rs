use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::runtime::jit::types::{FunctionType, Type};
use crate::utils::errors::JitError;

/// How an entrypoint operand participates in specialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArgumentConstraint {
    /// The operand never forces a specialization.
    #[default]
    Resolved,
    /// The compiled code needs the concrete shape of the operand.
    Shape,
    /// The compiled code needs the concrete content of the operand.
    Value,
}

impl ArgumentConstraint {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Resolved => "resolved",
            Self::Shape => "shape",
            Self::Value => "value",
        }
    }
}

impl fmt::Display for ArgumentConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArgumentConstraint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "resolved" => Ok(Self::Resolved),
            "shape" => Ok(Self::Shape),
            "value" => Ok(Self::Value),
            other => Err(format!("unknown argument constraint `{other}`")),
        }
    }
}

/// Returns true if any operand must be specialized before it can be compiled.
pub fn is_specialization_only(constraints: &[ArgumentConstraint]) -> bool {
    constraints
        .iter()
        .any(|constraint| *constraint != ArgumentConstraint::Resolved)
}

pub fn has_value_constraints(constraints: &[ArgumentConstraint]) -> bool {
    constraints.contains(&ArgumentConstraint::Value)
}

/// Returns true if every operand of the signature has a statically known
/// shape.
pub fn has_static_shape_operands(signature: &FunctionType) -> bool {
    signature.operands().iter().all(Type::has_static_shape)
}

fn resolve_constraint(
    index: usize,
    constraint: ArgumentConstraint,
    ty: &Type,
) -> Result<ArgumentConstraint, String> {
    let value_type = ty.value_type();
    match constraint {
        ArgumentConstraint::Resolved => Ok(constraint),

        ArgumentConstraint::Shape if !value_type.is_shaped() => Err(format!(
            "shape constraint on non-shaped operand #{index} of type {ty}"
        )),
        ArgumentConstraint::Shape if value_type.has_static_shape() => {
            Ok(ArgumentConstraint::Resolved)
        }
        ArgumentConstraint::Shape => Ok(constraint),

        ArgumentConstraint::Value => {
            let supported = value_type.rank().is_some_and(|rank| rank <= 1)
                && value_type.dtype().is_some_and(|dtype| dtype.is_integer());
            if supported {
                Ok(constraint)
            } else {
                Err(format!(
                    "value constraint on operand #{index} of type {ty} is not supported, \
                     expected an integer memref or tensor of rank 0 or 1"
                ))
            }
        }
    }
}

/// Resolves the constraints declared on the entrypoint operands against the
/// operand types. Shape constraints on statically shaped operands are
/// already satisfied and become `Resolved`.
pub fn resolve_constraints(
    signature: &FunctionType,
    declared: &[ArgumentConstraint],
) -> Result<Vec<ArgumentConstraint>, JitError> {
    if declared.len() != signature.num_operands() {
        return Err(JitError::Config(format!(
            "expected {} operand constraints, got {}",
            signature.num_operands(),
            declared.len()
        )));
    }

    signature
        .operands()
        .iter()
        .zip(declared)
        .enumerate()
        .map(|(index, (ty, constraint))| resolve_constraint(index, *constraint, ty))
        .collect::<Result<Vec<_>, _>>()
        .map_err(JitError::Config)
}

/// Formats a constraint list as `[shape, resolved, ...]` for error messages.
pub fn format_constraints(constraints: &[ArgumentConstraint]) -> String {
    let items: Vec<&str> = constraints.iter().map(|c| c.as_str()).collect();
    format!("[{}]", items.join(", "))
}
