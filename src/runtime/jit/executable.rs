use std::any::Any;
use std::ffi::c_void;
use std::fmt;
use std::time::Duration;

use super::memory::CodeMemory;
use super::toolkit::EntrypointFn;
use super::types::{FunctionType, Type};
use crate::utils::errors::JitError;

/// How arguments are packed into the pointer array passed to the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgumentsMemoryLayout {
    /// Number of pointers taken by the packed arguments.
    pub num_args_ptrs: usize,
}

impl ArgumentsMemoryLayout {
    pub fn for_signature(runtime_signature: &FunctionType) -> Result<Self, String> {
        let num_args_ptrs = runtime_signature
            .operands()
            .iter()
            .map(Type::num_abi_args)
            .sum::<Result<usize, String>>()?;
        Ok(Self { num_args_ptrs })
    }
}

/// Where the entry writes every result in the results buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultsMemoryLayout {
    /// At least one result is an async token or value.
    pub has_async_results: bool,
    /// Size in bytes of the results buffer.
    pub size: usize,
    /// Byte offset of every result.
    pub offsets: Vec<usize>,
}

impl ResultsMemoryLayout {
    pub fn for_signature(runtime_signature: &FunctionType) -> Result<Self, String> {
        let mut size = 0usize;
        let mut offsets = Vec::with_capacity(runtime_signature.num_results());
        let mut has_async_results = false;

        for result in runtime_signature.results() {
            has_async_results |= matches!(result, Type::AsyncToken | Type::AsyncValue(_));
            let (result_size, alignment) = result.result_abi_layout()?;
            let offset = size.next_multiple_of(alignment.max(1));
            offsets.push(offset);
            size = offset + result_size;
        }

        Ok(Self {
            has_async_results,
            size,
            offsets,
        })
    }
}

/// A compiled entrypoint and the memory its code lives in. Immutable once
/// constructed.
pub struct Executable {
    name: String,
    signature: FunctionType,
    runtime_signature: FunctionType,
    arguments_memory_layout: ArgumentsMemoryLayout,
    results_memory_layout: ResultsMemoryLayout,
    entrypoint: EntrypointFn,
    engine: Box<dyn Any + Send + Sync>,
    code_memory: CodeMemory,
    specialization: Option<usize>,
    time_to_compile: Duration,
}

pub(crate) struct ExecutableParts {
    pub name: String,
    pub signature: FunctionType,
    pub runtime_signature: FunctionType,
    pub arguments_memory_layout: ArgumentsMemoryLayout,
    pub results_memory_layout: ResultsMemoryLayout,
    pub entrypoint: EntrypointFn,
    pub engine: Box<dyn Any + Send + Sync>,
    pub code_memory: CodeMemory,
    pub specialization: Option<usize>,
    pub time_to_compile: Duration,
}

impl Executable {
    pub(crate) fn from_parts(parts: ExecutableParts) -> Self {
        Self {
            name: parts.name,
            signature: parts.signature,
            runtime_signature: parts.runtime_signature,
            arguments_memory_layout: parts.arguments_memory_layout,
            results_memory_layout: parts.results_memory_layout,
            entrypoint: parts.entrypoint,
            engine: parts.engine,
            code_memory: parts.code_memory,
            specialization: parts.specialization,
            time_to_compile: parts.time_to_compile,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn signature(&self) -> &FunctionType {
        &self.signature
    }

    pub const fn runtime_signature(&self) -> &FunctionType {
        &self.runtime_signature
    }

    pub const fn arguments_memory_layout(&self) -> ArgumentsMemoryLayout {
        self.arguments_memory_layout
    }

    pub const fn results_memory_layout(&self) -> &ResultsMemoryLayout {
        &self.results_memory_layout
    }

    pub const fn num_results(&self) -> usize {
        self.results_memory_layout.offsets.len()
    }

    /// Specialization id, `None` for the default executable.
    pub const fn specialization(&self) -> Option<usize> {
        self.specialization
    }

    pub const fn time_to_compile(&self) -> Duration {
        self.time_to_compile
    }

    pub const fn code_memory(&self) -> &CodeMemory {
        &self.code_memory
    }

    pub fn engine(&self) -> &(dyn Any + Send + Sync) {
        self.engine.as_ref()
    }

    /// Calls the native entry with packed argument and result pointers.
    ///
    /// # Safety
    ///
    /// Every pointer in `packed` must point to memory laid out as the runtime
    /// signature and the results memory layout require, and must stay valid
    /// for the duration of the call.
    pub unsafe fn execute(&self, packed: &mut [*mut c_void]) -> Result<(), JitError> {
        let expected = self.arguments_memory_layout.num_args_ptrs + self.num_results();
        if packed.len() != expected {
            return Err(JitError::Arity {
                expected,
                got: packed.len(),
            });
        }
        // SAFETY: the entry reads exactly `expected` pointers, the caller
        // guarantees they are valid.
        unsafe { (self.entrypoint)(packed.as_mut_ptr()) };
        Ok(())
    }
}

impl fmt::Debug for Executable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executable")
            .field("name", &self.name)
            .field("signature", &self.signature.to_string())
            .field("runtime_signature", &self.runtime_signature.to_string())
            .field("specialization", &self.specialization)
            .field("code_memory", &self.code_memory)
            .field("time_to_compile", &self.time_to_compile)
            .finish_non_exhaustive()
    }
}
