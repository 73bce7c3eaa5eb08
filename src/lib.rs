//! Just-in-time compilation runtime with shape and value specialization.
//!
//! A [`JitExecutable`] owns an IR module and an entrypoint. It compiles a
//! default executable when the entrypoint allows one, and compiles
//! specialized executables for the argument shapes (and selected argument
//! values) seen at run time. The IR itself is handled by an [`IrToolkit`].

pub mod config;
pub mod runtime;
pub mod utils;

pub use config::{OptLevel, RuntimeConfig, Specialization};
pub use runtime::async_value::{AllAvailable, AsyncState, AsyncValue, AsyncValueRef};
pub use runtime::jit::{
    Argument, ArgumentConstraint, CompilationOptions, CompilationTask, CompilationTaskRunner,
    DType, Executable, FunctionType, InlineTaskRunner, IrToolkit, JitCompilationContext,
    JitExecutable, MemrefDesc, SchedulerTaskRunner, SpecializationListener, Type,
};
pub use utils::errors::{Diagnostic, DiagnosticSeverity, Diagnostics, JitError, JitResult};
pub use utils::logger::init_logging;
