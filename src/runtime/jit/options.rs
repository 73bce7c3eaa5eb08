use std::fmt;
use std::sync::Arc;

use super::toolkit::{IrToolkit, PassOptions, SymbolBindings};
use super::types::FunctionType;
use crate::config::{OptLevel, RuntimeConfig, Specialization};

pub type RegisterDialects<T> = Arc<dyn Fn(&mut <T as IrToolkit>::DialectRegistry) + Send + Sync>;
pub type PipelineBuilder<T> = Arc<dyn Fn(&mut <T as IrToolkit>::PassManager) + Send + Sync>;
pub type TypeConverter<T> =
    Arc<dyn Fn(&<T as IrToolkit>::FuncType) -> Result<FunctionType, String> + Send + Sync>;
pub type CallingConvention<T> = Arc<
    dyn Fn(&<T as IrToolkit>::FuncType) -> Option<<T as IrToolkit>::FuncType> + Send + Sync,
>;
pub type RuntimeSymbolMap = Arc<dyn Fn(&mut SymbolBindings) + Send + Sync>;

/// Compile debugging switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugOptions {
    pub print_ir: bool,
    pub pass_timing: bool,
}

/// Everything needed to turn an IR module into an executable.
pub struct CompilationOptions<T: IrToolkit> {
    pub register_dialects: Option<RegisterDialects<T>>,
    /// Lowers a (possibly specialized) module to the form accepted by
    /// [`IrToolkit::translate_and_load`].
    pub create_compilation_pipeline: Option<PipelineBuilder<T>>,
    /// Runs right after an entrypoint was specialized.
    pub create_specialization_pipeline: Option<PipelineBuilder<T>>,
    /// Converts toolkit function types into runtime function types.
    pub type_converter: TypeConverter<T>,
    /// Maps the entrypoint type to the type of the native entry. Compilation
    /// fails without one.
    pub calling_convention: Option<CallingConvention<T>>,
    pub specialization: Specialization,
    pub jit_code_opt_level: OptLevel,
    pub runtime_symbol_map: Option<RuntimeSymbolMap>,
    pub debug: DebugOptions,
}

impl<T: IrToolkit> CompilationOptions<T> {
    pub fn new<F>(type_converter: F) -> Self
    where
        F: Fn(&T::FuncType) -> Result<FunctionType, String> + Send + Sync + 'static,
    {
        Self {
            register_dialects: None,
            create_compilation_pipeline: None,
            create_specialization_pipeline: None,
            type_converter: Arc::new(type_converter),
            calling_convention: None,
            specialization: Specialization::default(),
            jit_code_opt_level: OptLevel::default(),
            runtime_symbol_map: None,
            debug: DebugOptions::default(),
        }
    }

    #[must_use]
    pub fn with_dialects<F>(mut self, register: F) -> Self
    where
        F: Fn(&mut T::DialectRegistry) + Send + Sync + 'static,
    {
        self.register_dialects = Some(Arc::new(register));
        self
    }

    #[must_use]
    pub fn with_compilation_pipeline<F>(mut self, build: F) -> Self
    where
        F: Fn(&mut T::PassManager) + Send + Sync + 'static,
    {
        self.create_compilation_pipeline = Some(Arc::new(build));
        self
    }

    #[must_use]
    pub fn with_specialization_pipeline<F>(mut self, build: F) -> Self
    where
        F: Fn(&mut T::PassManager) + Send + Sync + 'static,
    {
        self.create_specialization_pipeline = Some(Arc::new(build));
        self
    }

    #[must_use]
    pub fn with_calling_convention<F>(mut self, convention: F) -> Self
    where
        F: Fn(&T::FuncType) -> Option<T::FuncType> + Send + Sync + 'static,
    {
        self.calling_convention = Some(Arc::new(convention));
        self
    }

    #[must_use]
    pub fn with_runtime_symbols<F>(mut self, bind: F) -> Self
    where
        F: Fn(&mut SymbolBindings) + Send + Sync + 'static,
    {
        self.runtime_symbol_map = Some(Arc::new(bind));
        self
    }

    #[must_use]
    pub const fn with_specialization(mut self, specialization: Specialization) -> Self {
        self.specialization = specialization;
        self
    }

    #[must_use]
    pub const fn with_opt_level(mut self, opt_level: OptLevel) -> Self {
        self.jit_code_opt_level = opt_level;
        self
    }

    /// Applies the overrides set in `config`.
    #[must_use]
    pub fn with_runtime_config(mut self, config: &RuntimeConfig) -> Self {
        if let Some(specialization) = config.specialization {
            self.specialization = specialization;
        }
        if let Some(opt_level) = config.opt_level {
            self.jit_code_opt_level = opt_level;
        }
        self.debug.print_ir |= config.debug_compile;
        self.debug.pass_timing |= config.pass_timing;
        self
    }

    pub(crate) const fn pass_options(&self) -> PassOptions {
        PassOptions {
            print_ir: self.debug.print_ir,
            timing: self.debug.pass_timing,
        }
    }
}

impl<T: IrToolkit> Clone for CompilationOptions<T> {
    fn clone(&self) -> Self {
        Self {
            register_dialects: self.register_dialects.clone(),
            create_compilation_pipeline: self.create_compilation_pipeline.clone(),
            create_specialization_pipeline: self.create_specialization_pipeline.clone(),
            type_converter: Arc::clone(&self.type_converter),
            calling_convention: self.calling_convention.clone(),
            specialization: self.specialization,
            jit_code_opt_level: self.jit_code_opt_level,
            runtime_symbol_map: self.runtime_symbol_map.clone(),
            debug: self.debug,
        }
    }
}

impl<T: IrToolkit> fmt::Debug for CompilationOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilationOptions")
            .field("register_dialects", &self.register_dialects.is_some())
            .field("compilation_pipeline", &self.create_compilation_pipeline.is_some())
            .field(
                "specialization_pipeline",
                &self.create_specialization_pipeline.is_some(),
            )
            .field("calling_convention", &self.calling_convention.is_some())
            .field("specialization", &self.specialization)
            .field("jit_code_opt_level", &self.jit_code_opt_level)
            .field("runtime_symbol_map", &self.runtime_symbol_map.is_some())
            .field("debug", &self.debug)
            .finish()
    }
}
