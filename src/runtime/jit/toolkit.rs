//! Interface to the IR toolkit that parses, transforms and lowers modules.
//!
//! The runtime owns the orchestration (when to parse, what to specialize,
//! where the code lives); everything that understands the IR itself sits
//! behind [`IrToolkit`].

use std::any::Any;
use std::ffi::c_void;
use std::fmt;

use ahash::AHashMap;

use super::arguments::Argument;
use super::memory::CodeMemory;
use super::specialization::{ArgumentConstraint, SymbolicShape};
use super::types::Type;
use crate::config::OptLevel;
use crate::utils::errors::Diagnostics;

/// Native entry of a compiled executable. Takes a pointer to an array of
/// pointers: packed arguments followed by result slots.
pub type EntrypointFn = unsafe extern "C" fn(*mut *mut c_void);

/// Addresses of runtime symbols made visible to compiled code.
#[derive(Debug, Clone, Default)]
pub struct SymbolBindings {
    symbols: AHashMap<String, usize>,
}

impl SymbolBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to `address`, replacing any previous binding.
    pub fn bind(&mut self, name: impl Into<String>, address: usize) {
        self.symbols.insert(name.into(), address);
    }

    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.symbols.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.symbols
            .iter()
            .map(|(name, address)| (name.as_str(), *address))
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Instrumentation requested from a pass manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassOptions {
    pub print_ir: bool,
    pub timing: bool,
}

/// Options for translating a lowered module to native code.
pub struct JitOptions<'a> {
    pub opt_level: OptLevel,
    pub symbols: SymbolBindings,
    /// Memory the native code must be placed in.
    pub code_memory: &'a mut CodeMemory,
}

impl fmt::Debug for JitOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JitOptions")
            .field("opt_level", &self.opt_level)
            .field("symbols", &self.symbols.len())
            .field("code_memory", &self.code_memory.name())
            .finish()
    }
}

/// Native code produced by [`IrToolkit::translate_and_load`].
pub struct LoadedEntry {
    pub entrypoint: EntrypointFn,
    /// Whatever the toolkit needs to keep alive while the code runs.
    pub engine: Box<dyn Any + Send + Sync>,
}

/// Inputs of one entrypoint specialization.
#[derive(Debug, Clone, Copy)]
pub struct SpecializationRequest<'a> {
    pub arguments: &'a [Argument<'a>],
    pub symbolic_shapes: &'a [SymbolicShape],
    pub constraints: &'a [ArgumentConstraint],
    /// Operand types after specialization, one per operand.
    pub operands: &'a [Type],
}

pub trait IrToolkit: Send + Sync + 'static {
    type DialectRegistry: Default + 'static;
    type Module: Send + 'static;
    /// Handle to a function inside a module.
    type Function: Clone + Send + 'static;
    /// Function type in the toolkit's own type system.
    type FuncType: Clone + fmt::Display + 'static;
    type PassManager: 'static;

    /// Parses `source`, reporting problems into `diagnostics`.
    fn parse(
        &self,
        registry: &Self::DialectRegistry,
        source: &str,
        diagnostics: &mut Diagnostics,
    ) -> Option<Self::Module>;

    fn module_name(&self, module: &Self::Module) -> Option<String>;

    fn lookup_function(&self, module: &Self::Module, name: &str) -> Option<Self::Function>;

    fn function_name(&self, module: &Self::Module, function: &Self::Function) -> String;

    fn function_type(&self, module: &Self::Module, function: &Self::Function) -> Self::FuncType;

    /// Constraints declared on the function operands, one per operand.
    fn argument_constraints(
        &self,
        module: &Self::Module,
        function: &Self::Function,
    ) -> Result<Vec<ArgumentConstraint>, String>;

    /// Rewrites `function` for the concrete arguments: updates its signature
    /// to `request.operands`, records the symbolic shapes and sinks the
    /// content of value constrained operands into the body.
    fn specialize_function(
        &self,
        module: &mut Self::Module,
        function: &Self::Function,
        request: &SpecializationRequest<'_>,
        diagnostics: &mut Diagnostics,
    ) -> Result<(), String>;

    /// Marks `function` as the function the lowering must expose as native
    /// entry.
    fn mark_entrypoint(&self, module: &mut Self::Module, function: &Self::Function);

    fn new_pass_manager(&self, options: &PassOptions) -> Self::PassManager;

    fn run_passes(
        &self,
        passes: &mut Self::PassManager,
        module: &mut Self::Module,
        diagnostics: &mut Diagnostics,
    ) -> Result<(), String>;

    /// Translates a fully lowered module to native code placed in
    /// `options.code_memory` and resolves the entry of `entrypoint`.
    fn translate_and_load(
        &self,
        module: Self::Module,
        entrypoint: &Self::Function,
        options: JitOptions<'_>,
    ) -> Result<LoadedEntry, String>;
}
