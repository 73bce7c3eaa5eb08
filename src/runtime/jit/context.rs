//! One parse, specialize and compile lifecycle of an IR module.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use super::arguments::{Argument, verify_argument};
use super::executable::{ArgumentsMemoryLayout, Executable, ExecutableParts, ResultsMemoryLayout};
use super::memory::{CodeMemory, memory_region_name};
use super::options::{CompilationOptions, PipelineBuilder};
use super::specialization::{
    ArgumentConstraint, SpecializationListener, SymbolicShape, specialize_type,
};
use super::toolkit::{IrToolkit, JitOptions, SpecializationRequest, SymbolBindings};
use super::types::{FunctionType, Type};
use crate::utils::errors::{Diagnostics, JitError};

const SOURCE_ID: &str = "<jitrt>";

/// A parsed module with a resolved entrypoint. The entrypoint can be
/// specialized at most once; compiling consumes the context.
pub struct JitCompilationContext<T: IrToolkit> {
    toolkit: Arc<T>,
    options: CompilationOptions<T>,
    diagnostics: Diagnostics,
    module: T::Module,
    entrypoint: T::Function,
    specialized: bool,
}

impl<T: IrToolkit> JitCompilationContext<T> {
    pub fn instantiate(
        toolkit: Arc<T>,
        options: CompilationOptions<T>,
        source: &str,
        entrypoint: &str,
    ) -> Result<Self, JitError> {
        let mut diagnostics = Diagnostics::new(SOURCE_ID, source);

        let mut registry = T::DialectRegistry::default();
        if let Some(register) = &options.register_dialects {
            register(&mut registry);
        }

        let Some(module) = toolkit.parse(&registry, source, &mut diagnostics) else {
            return Err(JitError::parse(
                "failed to parse the IR source",
                diagnostics.render(),
            ));
        };

        let Some(entrypoint) = toolkit.lookup_function(&module, entrypoint) else {
            return Err(JitError::parse(
                "failed to resolve entrypoint function",
                diagnostics.render(),
            ));
        };

        Ok(Self {
            toolkit,
            options,
            diagnostics,
            module,
            entrypoint,
            specialized: false,
        })
    }

    pub const fn options(&self) -> &CompilationOptions<T> {
        &self.options
    }

    pub const fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub const fn is_specialized(&self) -> bool {
        self.specialized
    }

    pub fn module_name(&self) -> String {
        self.toolkit
            .module_name(&self.module)
            .unwrap_or_else(|| "<unknown>".to_string())
    }

    pub fn entrypoint_name(&self) -> String {
        self.toolkit.function_name(&self.module, &self.entrypoint)
    }

    /// Entrypoint type in the toolkit's type system.
    pub fn entrypoint_type(&self) -> T::FuncType {
        self.toolkit.function_type(&self.module, &self.entrypoint)
    }

    /// Entrypoint type converted by the options' type converter.
    pub fn signature(&self) -> Result<FunctionType, JitError> {
        let declared = self.entrypoint_type();
        (self.options.type_converter)(&declared).map_err(|err| {
            JitError::compile(
                format!("failed to convert entrypoint type {declared}: {err}"),
                self.diagnostics.render(),
            )
        })
    }

    /// Constraints declared on the entrypoint operands, not yet resolved
    /// against the operand types.
    pub fn argument_constraints(&self) -> Result<Vec<ArgumentConstraint>, JitError> {
        self.toolkit
            .argument_constraints(&self.module, &self.entrypoint)
            .map_err(|err| JitError::Config(format!("failed to read operand constraints: {err}")))
    }

    fn specialization_error(&self, message: impl Into<String>) -> JitError {
        JitError::specialization(message, self.diagnostics.render())
    }

    /// Rewrites the entrypoint for the concrete `arguments`.
    pub fn specialize(
        &mut self,
        arguments: &[Argument<'_>],
        symbolic_shapes: &[SymbolicShape],
        constraints: &[ArgumentConstraint],
        listener: Option<&dyn SpecializationListener>,
    ) -> Result<(), JitError> {
        if self.specialized {
            return Err(self.specialization_error("entrypoint is already specialized"));
        }
        self.specialized = true;

        let signature = self.signature().map_err(|err| match err {
            JitError::Compile { message, .. } => self.specialization_error(message),
            other => other,
        })?;
        let num_operands = signature.num_operands();
        if arguments.len() != num_operands
            || symbolic_shapes.len() != num_operands
            || constraints.len() != num_operands
        {
            return Err(self.specialization_error(format!(
                "expected {num_operands} arguments, shapes and constraints, got {}, {} and {}",
                arguments.len(),
                symbolic_shapes.len(),
                constraints.len()
            )));
        }

        for (index, (ty, argument)) in signature.operands().iter().zip(arguments).enumerate() {
            verify_argument(index, ty, argument)?;
        }

        let operands: Vec<Type> = signature
            .operands()
            .iter()
            .zip(symbolic_shapes)
            .map(|(ty, shape)| specialize_type(ty, shape))
            .collect();

        if let Some(listener) = listener {
            listener.notify_modified_operands(&operands, symbolic_shapes);
            for (index, constraint) in constraints.iter().enumerate() {
                if *constraint != ArgumentConstraint::Value {
                    continue;
                }
                if let Some(bytes) = arguments[index]
                    .as_memref()
                    .and_then(|memref| memref.value_bytes())
                {
                    listener.notify_value_specialized(index, &operands[index], bytes);
                }
            }
        }

        let request = SpecializationRequest {
            arguments,
            symbolic_shapes,
            constraints,
            operands: &operands,
        };
        if let Err(err) = self.toolkit.specialize_function(
            &mut self.module,
            &self.entrypoint,
            &request,
            &mut self.diagnostics,
        ) {
            return Err(self.specialization_error(err));
        }

        if let Some(pipeline) = self.options.create_specialization_pipeline.clone() {
            if let Err(err) = self.run_pipeline("specialization", &pipeline) {
                return Err(
                    self.specialization_error(format!("failed to run specialization pipeline: {err}"))
                );
            }
        }

        debug!(
            entrypoint = %self.entrypoint_name(),
            operands = ?operands.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "specialized entrypoint"
        );
        Ok(())
    }

    fn run_pipeline(&mut self, name: &str, pipeline: &PipelineBuilder<T>) -> Result<(), String> {
        let pass_options = self.options.pass_options();
        let mut passes = self.toolkit.new_pass_manager(&pass_options);
        pipeline(&mut passes);

        let start = Instant::now();
        let result = self
            .toolkit
            .run_passes(&mut passes, &mut self.module, &mut self.diagnostics);
        if pass_options.timing {
            debug!(pipeline = name, elapsed = ?start.elapsed(), "pipeline finished");
        }
        result
    }

    fn compile_error(&self, message: impl Into<String>) -> JitError {
        JitError::compile(message, self.diagnostics.render())
    }

    /// Lowers the module and loads it as native code tagged with a memory
    /// region derived from `region_name`.
    pub fn compile(
        mut self,
        region_name: &str,
        specialization: Option<usize>,
    ) -> Result<Executable, JitError> {
        let start = Instant::now();
        let entrypoint_name = self.entrypoint_name();
        let declared = self.entrypoint_type();

        let signature = (self.options.type_converter)(&declared).map_err(|err| {
            self.compile_error(format!("failed to convert entrypoint type {declared}: {err}"))
        })?;

        let Some(calling_convention) = self.options.calling_convention.clone() else {
            return Err(self.compile_error("calling convention is not defined"));
        };
        let runtime_type = calling_convention(&declared).ok_or_else(|| {
            self.compile_error(format!(
                "calling convention failed to convert entrypoint type {declared}"
            ))
        })?;
        let runtime_signature = (self.options.type_converter)(&runtime_type).map_err(|err| {
            self.compile_error(format!(
                "failed to convert entrypoint runtime type {runtime_type}: {err}"
            ))
        })?;

        let arguments_memory_layout = ArgumentsMemoryLayout::for_signature(&runtime_signature)
            .map_err(|err| self.compile_error(format!("failed to lay out arguments: {err}")))?;
        let results_memory_layout = ResultsMemoryLayout::for_signature(&runtime_signature)
            .map_err(|err| self.compile_error(format!("failed to lay out results: {err}")))?;

        self.toolkit.mark_entrypoint(&mut self.module, &self.entrypoint);

        if let Some(pipeline) = self.options.create_compilation_pipeline.clone() {
            self.run_pipeline("compilation", &pipeline).map_err(|err| {
                self.compile_error(format!("failed to run compilation pipeline: {err}"))
            })?;
        }

        let region = memory_region_name(
            region_name,
            &self.module_name(),
            &entrypoint_name,
            specialization,
        );

        let mut symbols = SymbolBindings::new();
        if let Some(bind) = &self.options.runtime_symbol_map {
            bind(&mut symbols);
        }

        let Self {
            toolkit,
            options,
            diagnostics,
            module,
            entrypoint,
            ..
        } = self;

        let mut code_memory = CodeMemory::new(region);
        let loaded = toolkit
            .translate_and_load(
                module,
                &entrypoint,
                JitOptions {
                    opt_level: options.jit_code_opt_level,
                    symbols,
                    code_memory: &mut code_memory,
                },
            )
            .map_err(|err| {
                JitError::compile(
                    format!("failed to compile the module to native code: {err}"),
                    diagnostics.render(),
                )
            })?;

        let time_to_compile = start.elapsed();
        info!(
            entrypoint = %entrypoint_name,
            region = code_memory.name(),
            specialization,
            bytes = code_memory.allocated_bytes(),
            elapsed = ?time_to_compile,
            "compiled executable"
        );

        Ok(Executable::from_parts(ExecutableParts {
            name: entrypoint_name,
            signature,
            runtime_signature,
            arguments_memory_layout,
            results_memory_layout,
            entrypoint: loaded.entrypoint,
            engine: loaded.engine,
            code_memory,
            specialization,
            time_to_compile,
        }))
    }
}
