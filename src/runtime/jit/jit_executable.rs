//! Entry point of the runtime: owns the IR source, the default executable
//! and every specialization compiled from it.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::arguments::{Argument, verify_argument};
use super::cache::{CacheStats, Specializations};
use super::context::JitCompilationContext;
use super::executable::Executable;
use super::options::CompilationOptions;
use super::runner::{CompilationTask, CompilationTaskRunner, UserData};
use super::specialization::{
    ArgumentConstraint, SpecializationKey, SpecializationListener, SymbolicShapeMismatch,
    SymbolicShapesResolver, format_constraints, has_static_shape_operands, has_value_constraints,
    is_specialization_only, resolve_constraints,
};
use super::toolkit::IrToolkit;
use super::types::FunctionType;
use crate::config::Specialization;
use crate::runtime::async_value::{AllAvailable, AsyncValue, AsyncValueRef};
use crate::utils::errors::JitError;

/// Settles a specialization slot with an error if the compile task is
/// dropped, or unwinds, before producing a result.
struct PendingSlot(AsyncValueRef<Executable>);

impl Drop for PendingSlot {
    fn drop(&mut self) {
        if self
            .0
            .set_error(JitError::compile("compilation task was dropped before completion", ""))
        {
            warn!("specialization compile task dropped without a result");
        }
    }
}

/// Compiles an IR module once into a default executable (when possible) and
/// on demand into executables specialized for the shapes and values of the
/// call arguments.
pub struct JitExecutable<T: IrToolkit> {
    toolkit: Arc<T>,
    source: String,
    entrypoint: String,
    memory_region_name: String,
    options: CompilationOptions<T>,
    runner: Arc<dyn CompilationTaskRunner>,
    signature: FunctionType,
    constraints: Vec<ArgumentConstraint>,
    has_value_constraints: bool,
    symbolic_shapes_resolver: SymbolicShapesResolver,
    default_executable: AsyncValueRef<Executable>,
    has_default_executable: bool,
    specializations: Specializations<Executable>,
}

impl<T: IrToolkit> JitExecutable<T> {
    pub fn instantiate(
        toolkit: Arc<T>,
        source: &str,
        entrypoint: &str,
        options: CompilationOptions<T>,
        memory_region_name: &str,
        runner: Arc<dyn CompilationTaskRunner>,
    ) -> Result<Self, JitError> {
        let mut options = options;
        let context = JitCompilationContext::instantiate(
            Arc::clone(&toolkit),
            options.clone(),
            source,
            entrypoint,
        )?;

        let signature = context.signature()?;
        let constraints = resolve_constraints(&signature, &context.argument_constraints()?)?;
        let specialization_only = is_specialization_only(&constraints);

        if has_static_shape_operands(&signature)
            && !specialization_only
            && options.specialization != Specialization::Always
        {
            options.specialization = Specialization::Disabled;
        }

        if options.specialization == Specialization::Disabled && specialization_only {
            return Err(JitError::Config(format!(
                "compilation options disabled specialization, yet operands have unresolved \
                 constraints: {}",
                format_constraints(&constraints)
            )));
        }

        let default_executable =
            if options.specialization == Specialization::Always || specialization_only {
                None
            } else {
                Some(context.compile(memory_region_name, None)?)
            };

        debug!(
            entrypoint,
            signature = %signature,
            constraints = %format_constraints(&constraints),
            specialization = %options.specialization,
            has_default = default_executable.is_some(),
            "instantiated jit executable"
        );

        Ok(Self::new(
            toolkit,
            source,
            entrypoint,
            memory_region_name,
            options,
            runner,
            signature,
            constraints,
            default_executable,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        toolkit: Arc<T>,
        source: &str,
        entrypoint: &str,
        memory_region_name: &str,
        options: CompilationOptions<T>,
        runner: Arc<dyn CompilationTaskRunner>,
        signature: FunctionType,
        constraints: Vec<ArgumentConstraint>,
        default_executable: Option<Executable>,
    ) -> Self {
        let has_default_executable = default_executable.is_some();
        let default_executable = default_executable.map_or_else(
            || AsyncValue::error(JitError::DefaultUnavailable),
            AsyncValue::available,
        );

        Self {
            symbolic_shapes_resolver: SymbolicShapesResolver::new(&signature, &constraints),
            has_value_constraints: has_value_constraints(&constraints),
            toolkit,
            source: source.to_string(),
            entrypoint: entrypoint.to_string(),
            memory_region_name: memory_region_name.to_string(),
            options,
            runner,
            signature,
            constraints,
            default_executable,
            has_default_executable,
            specializations: Specializations::new(),
        }
    }

    /// The default executable, or a value failed with
    /// [`JitError::DefaultUnavailable`] when the module must be specialized.
    pub fn default_executable(&self) -> AsyncValueRef<Executable> {
        AsyncValueRef::clone(&self.default_executable)
    }

    pub const fn has_default_executable(&self) -> bool {
        self.has_default_executable
    }

    pub fn constraints(&self) -> &[ArgumentConstraint] {
        &self.constraints
    }

    pub const fn signature(&self) -> &FunctionType {
        &self.signature
    }

    /// Specialization policy in effect, after the adjustments made at
    /// instantiation.
    pub const fn specialization(&self) -> Specialization {
        self.options.specialization
    }

    pub fn num_specializations(&self) -> usize {
        self.specializations.len()
    }

    pub fn specialization_stats(&self) -> CacheStats {
        self.specializations.stats()
    }

    /// Resolves once every specialization allocated so far has finished
    /// compiling, successfully or not.
    pub fn all_executables_compiled(&self) -> AllAvailable<Executable> {
        self.specializations.all_available()
    }

    /// Returns the executable to run for `arguments`.
    ///
    /// Never blocks on compilation: when a specialization is still being
    /// compiled the default executable is returned if one exists, otherwise
    /// the pending specialization.
    pub fn get_executable(
        &self,
        arguments: &[Argument<'_>],
        user_data: UserData<'_>,
        listener: Option<&dyn SpecializationListener>,
    ) -> Result<AsyncValueRef<Executable>, JitError> {
        if self.options.specialization == Specialization::Disabled {
            return Ok(self.default_executable());
        }

        if arguments.len() != self.signature.num_operands() {
            return Err(JitError::Arity {
                expected: self.signature.num_operands(),
                got: arguments.len(),
            });
        }

        let hash = self
            .symbolic_shapes_resolver
            .resolve_hash(arguments)
            .map_err(|mismatch| self.explain_mismatch(arguments, mismatch))?;

        let mut key = SpecializationKey::from_shape_hash(hash);
        if self.has_value_constraints {
            key = key.combine_with_values(
                self.symbolic_shapes_resolver.hash_state(),
                arguments,
                &self.constraints,
            )?;
        }

        if let Some(cached) = self.specializations.find(key) {
            debug!(%key, state = ?cached.state(), "specialization cache hit");
            return Ok(self.select(key, cached));
        }

        let entry = self.specializations.allocate(key);
        if !entry.allocated {
            debug!(%key, "lost the specialization race");
            return Ok(self.select(key, entry.value));
        }

        debug!(%key, ordinal = entry.ordinal, "specialization cache miss");
        match self.specialize(arguments, listener) {
            Ok(context) => {
                let task = self.compile_task(context, entry.ordinal, &entry.value);
                self.runner
                    .run(entry.ordinal, &self.constraints, arguments, task, user_data);
            }
            Err(err) => {
                warn!(%key, ordinal = entry.ordinal, %err, "failed to specialize executable");
                entry.value.set_error(err);
            }
        }

        if self.has_default_executable && self.options.specialization != Specialization::Always {
            if entry.value.is_error() {
                return Ok(self.select(key, entry.value));
            }
            return Ok(self.default_executable());
        }
        Ok(entry.value)
    }

    /// Picks between a cached specialization and the default executable.
    fn select(
        &self,
        key: SpecializationKey,
        cached: AsyncValueRef<Executable>,
    ) -> AsyncValueRef<Executable> {
        if self.options.specialization == Specialization::Always || !self.has_default_executable
        {
            return cached;
        }

        if !cached.is_available() {
            return self.default_executable();
        }

        if let Some(Err(err)) = cached.try_get() {
            debug!(%key, %err, "specialization failed, using the default executable");
            return self.default_executable();
        }

        cached
    }

    fn specialize(
        &self,
        arguments: &[Argument<'_>],
        listener: Option<&dyn SpecializationListener>,
    ) -> Result<JitCompilationContext<T>, JitError> {
        let mut context = JitCompilationContext::instantiate(
            Arc::clone(&self.toolkit),
            self.options.clone(),
            &self.source,
            &self.entrypoint,
        )?;

        let symbolic_shapes = self
            .symbolic_shapes_resolver
            .resolve(arguments)
            .map_err(|mismatch| self.explain_mismatch(arguments, mismatch))?;

        context.specialize(arguments, &symbolic_shapes, &self.constraints, listener)?;
        Ok(context)
    }

    fn compile_task(
        &self,
        context: JitCompilationContext<T>,
        specialization: usize,
        slot: &AsyncValueRef<Executable>,
    ) -> CompilationTask {
        let slot = PendingSlot(AsyncValueRef::clone(slot));
        let region = self.memory_region_name.clone();

        CompilationTask::new(specialization, move || {
            let result = context.compile(&region, Some(specialization));
            if let Err(err) = &result {
                warn!(specialization, %err, "failed to compile specialized executable");
            }
            slot.0.settle(result);
        })
    }

    /// Verifies every operand to turn a symbolic shape mismatch into a
    /// precise error.
    fn explain_mismatch(&self, arguments: &[Argument<'_>], mismatch: SymbolicShapeMismatch) -> JitError {
        self.signature
            .operands()
            .iter()
            .zip(arguments)
            .enumerate()
            .find_map(|(index, (ty, argument))| verify_argument(index, ty, argument).err())
            .unwrap_or_else(|| JitError::ShapeMismatch {
                index: mismatch.index,
                message: "failed to resolve symbolic shapes".to_string(),
            })
    }
}

impl<T: IrToolkit> fmt::Debug for JitExecutable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JitExecutable")
            .field("entrypoint", &self.entrypoint)
            .field("memory_region_name", &self.memory_region_name)
            .field("signature", &self.signature.to_string())
            .field("constraints", &self.constraints)
            .field("specialization", &self.options.specialization)
            .field("has_default_executable", &self.has_default_executable)
            .field("specializations", &self.specializations.len())
            .finish_non_exhaustive()
    }
}
