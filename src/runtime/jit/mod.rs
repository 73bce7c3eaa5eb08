// JIT runtime: compilation, specialization and caching of executables
pub mod arguments;
pub mod cache;
pub mod context;
pub mod executable;
pub mod jit_executable;
pub mod memory;
pub mod options;
pub mod runner;
pub mod specialization;
pub mod toolkit;
pub mod types;

pub use arguments::{Argument, MemrefDesc, verify_argument, verify_memref_argument};
pub use cache::{CacheStats, Specializations};
pub use context::JitCompilationContext;
pub use executable::{ArgumentsMemoryLayout, Executable, ResultsMemoryLayout};
pub use jit_executable::JitExecutable;
pub use memory::{CodeMemory, memory_region_name};
pub use options::{CompilationOptions, DebugOptions};
pub use runner::{
    CompilationTask, CompilationTaskRunner, InlineTaskRunner, SchedulerTaskRunner, UserData,
};
pub use specialization::{
    ArgumentConstraint, SpecializationKey, SpecializationListener, SymbolicDim, SymbolicShape,
    SymbolicShapesResolver,
};
pub use toolkit::{
    EntrypointFn, IrToolkit, JitOptions, LoadedEntry, PassOptions, SpecializationRequest,
    SymbolBindings,
};
pub use types::{DType, FunctionType, Type};
