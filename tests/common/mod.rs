#![allow(dead_code)]

//! Line oriented toy IR used by the integration tests.
//!
//! ```text
//! module @kernels
//! func @compute(memref<?x4xf32>, memref<?xi32> {value}) -> (memref<?x4xf32>)
//! ```

use std::ffi::c_void;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use jitrt::runtime::jit::runner::UserData;
use jitrt::runtime::jit::toolkit::{
    JitOptions, LoadedEntry, PassOptions, SpecializationRequest,
};
use jitrt::{
    Argument, ArgumentConstraint, CompilationOptions, CompilationTask, CompilationTaskRunner,
    DType, Diagnostics, FunctionType, IrToolkit, MemrefDesc, SpecializationListener, Type,
};

pub static ENTRY_CALLS: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C" fn counting_entry(_args: *mut *mut c_void) {
    ENTRY_CALLS.fetch_add(1, Ordering::SeqCst);
}

#[derive(Debug, Clone)]
pub struct MockFunction {
    pub name: String,
    pub operands: Vec<Type>,
    pub constraints: Vec<ArgumentConstraint>,
    pub results: Vec<Type>,
    pub sunk_values: Vec<(usize, Vec<u8>)>,
}

impl MockFunction {
    fn function_type(&self) -> FunctionType {
        FunctionType::new(self.operands.clone(), self.results.clone())
    }
}

#[derive(Debug, Default)]
pub struct MockModule {
    pub name: Option<String>,
    pub functions: Vec<MockFunction>,
    pub entrypoint: Option<usize>,
    pub passes_run: Vec<String>,
}

#[derive(Debug, Default)]
pub struct MockRegistry {
    pub dialects: Vec<String>,
}

/// Toy toolkit. Counts the work it does and can be told to fail.
#[derive(Debug, Default)]
pub struct MockToolkit {
    pub parses: AtomicUsize,
    pub specializations: AtomicUsize,
    pub compiles: AtomicUsize,
    pub fail_specialization: AtomicBool,
    pub fail_compile: AtomicBool,
    pub regions: Mutex<Vec<String>>,
    pub bound_symbols: Mutex<Vec<String>>,
    pub specialized_signatures: Mutex<Vec<String>>,
}

impl MockToolkit {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn compiles(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }
}

/// Splits on commas that are not nested in `<...>`, `(...)` or `{...}`.
fn split_operands(list: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (index, ch) in list.char_indices() {
        match ch {
            '<' | '(' | '{' => depth += 1,
            '>' | ')' | '}' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(list[start..index].trim());
                start = index + 1;
            }
            _ => {}
        }
    }
    let last = list[start..].trim();
    if !last.is_empty() {
        parts.push(last);
    }
    parts
}

fn parse_operand(text: &str) -> Option<(Type, ArgumentConstraint)> {
    match text.split_once('{') {
        Some((ty, attr)) => {
            let constraint = attr.trim_end_matches('}').trim().parse().ok()?;
            Some((ty.trim().parse().ok()?, constraint))
        }
        None => Some((text.parse().ok()?, ArgumentConstraint::Resolved)),
    }
}

fn parse_function(line: &str) -> Option<MockFunction> {
    let rest = line.strip_prefix("func @")?;
    let (name, rest) = rest.split_once('(')?;
    let (operands, results) = rest.split_once("->")?;
    let operands = operands.trim().strip_suffix(')')?;
    let results = results
        .trim()
        .strip_prefix('(')?
        .strip_suffix(')')?;

    let mut types = Vec::new();
    let mut constraints = Vec::new();
    for operand in split_operands(operands) {
        let (ty, constraint) = parse_operand(operand)?;
        types.push(ty);
        constraints.push(constraint);
    }
    let results = split_operands(results)
        .into_iter()
        .map(str::parse)
        .collect::<Result<Vec<Type>, _>>()
        .ok()?;

    Some(MockFunction {
        name: name.trim().to_string(),
        operands: types,
        constraints,
        results,
        sunk_values: Vec::new(),
    })
}

impl IrToolkit for MockToolkit {
    type DialectRegistry = MockRegistry;
    type Module = MockModule;
    type Function = usize;
    type FuncType = FunctionType;
    type PassManager = Vec<String>;

    fn parse(
        &self,
        _registry: &MockRegistry,
        source: &str,
        diagnostics: &mut Diagnostics,
    ) -> Option<MockModule> {
        self.parses.fetch_add(1, Ordering::SeqCst);
        let mut module = MockModule::default();
        let mut offset = 0;

        for line in source.lines() {
            let span = offset..offset + line.len();
            offset += line.len() + 1;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(name) = trimmed.strip_prefix("module") {
                module.name = name.trim().strip_prefix('@').map(str::to_string);
                continue;
            }
            match parse_function(trimmed) {
                Some(function) => module.functions.push(function),
                None => {
                    diagnostics.error_at(span, "expected a function declaration");
                    return None;
                }
            }
        }

        Some(module)
    }

    fn module_name(&self, module: &MockModule) -> Option<String> {
        module.name.clone()
    }

    fn lookup_function(&self, module: &MockModule, name: &str) -> Option<usize> {
        module.functions.iter().position(|f| f.name == name)
    }

    fn function_name(&self, module: &MockModule, function: &usize) -> String {
        module.functions[*function].name.clone()
    }

    fn function_type(&self, module: &MockModule, function: &usize) -> FunctionType {
        module.functions[*function].function_type()
    }

    fn argument_constraints(
        &self,
        module: &MockModule,
        function: &usize,
    ) -> Result<Vec<ArgumentConstraint>, String> {
        Ok(module.functions[*function].constraints.clone())
    }

    fn specialize_function(
        &self,
        module: &mut MockModule,
        function: &usize,
        request: &SpecializationRequest<'_>,
        diagnostics: &mut Diagnostics,
    ) -> Result<(), String> {
        self.specializations.fetch_add(1, Ordering::SeqCst);
        if self.fail_specialization.load(Ordering::SeqCst) {
            diagnostics.error("cannot specialize operand types");
            return Err("specialization rejected".to_string());
        }

        let function = &mut module.functions[*function];
        function.operands = request.operands.to_vec();
        for (index, constraint) in request.constraints.iter().enumerate() {
            if *constraint == ArgumentConstraint::Value {
                let bytes = request.arguments[index]
                    .as_memref()
                    .and_then(|memref| memref.value_bytes())
                    .ok_or_else(|| format!("operand #{index} has no value"))?;
                function.sunk_values.push((index, bytes.to_vec()));
            }
        }
        self.specialized_signatures
            .lock()
            .push(function.function_type().to_string());
        Ok(())
    }

    fn mark_entrypoint(&self, module: &mut MockModule, function: &usize) {
        module.entrypoint = Some(*function);
    }

    fn new_pass_manager(&self, _options: &PassOptions) -> Vec<String> {
        Vec::new()
    }

    fn run_passes(
        &self,
        passes: &mut Vec<String>,
        module: &mut MockModule,
        diagnostics: &mut Diagnostics,
    ) -> Result<(), String> {
        for pass in passes.drain(..) {
            if pass == "fail" {
                diagnostics.error(format!("pass `{pass}` failed"));
                return Err(format!("pass `{pass}` failed"));
            }
            module.passes_run.push(pass);
        }
        Ok(())
    }

    fn translate_and_load(
        &self,
        module: MockModule,
        entrypoint: &usize,
        options: JitOptions<'_>,
    ) -> Result<LoadedEntry, String> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        if self.fail_compile.load(Ordering::SeqCst) {
            return Err("code generation failed".to_string());
        }
        if module.entrypoint != Some(*entrypoint) {
            return Err("entrypoint was not marked".to_string());
        }

        options
            .code_memory
            .map_code(&[0xC3])
            .map_err(|err| err.to_string())?;
        self.regions
            .lock()
            .push(options.code_memory.name().to_string());
        self.bound_symbols
            .lock()
            .extend(options.symbols.iter().map(|(name, _)| name.to_string()));

        Ok(LoadedEntry {
            entrypoint: counting_entry,
            engine: Box::new(module.passes_run),
        })
    }
}

pub fn options() -> CompilationOptions<MockToolkit> {
    jitrt::init_logging();
    CompilationOptions::<MockToolkit>::new(|ty: &FunctionType| Ok(ty.clone()))
        .with_calling_convention(|ty: &FunctionType| {
            let operands = std::iter::once(Type::KernelContext)
                .chain(ty.operands().iter().cloned())
                .collect();
            Some(FunctionType::new(operands, ty.results().to_vec()))
        })
        .with_compilation_pipeline(|passes: &mut Vec<String>| {
            passes.push("lower-to-native".to_string());
        })
}

pub static ZEROS: [u8; 4096] = [0; 4096];

pub fn f32_memref<'a>(sizes: &'a [i64]) -> Argument<'a> {
    Argument::Memref(MemrefDesc::new(DType::F32, &ZEROS, 0, sizes, &[]))
}

pub fn i32_memref<'a>(data: &'a [u8], sizes: &'a [i64]) -> Argument<'a> {
    Argument::Memref(MemrefDesc::new(DType::I32, data, 0, sizes, &[]))
}

/// Runner that queues tasks until the test runs them.
#[derive(Default)]
pub struct QueueRunner {
    pub tasks: Mutex<Vec<CompilationTask>>,
    pub submitted: AtomicUsize,
}

impl QueueRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }

    pub fn run_all(&self) -> usize {
        let tasks: Vec<CompilationTask> = self.tasks.lock().drain(..).collect();
        let count = tasks.len();
        for task in tasks {
            task.run();
        }
        count
    }
}

impl CompilationTaskRunner for QueueRunner {
    fn run(
        &self,
        specialization: usize,
        _constraints: &[ArgumentConstraint],
        _arguments: &[Argument<'_>],
        task: CompilationTask,
        _user_data: UserData<'_>,
    ) {
        assert_eq!(task.specialization(), specialization);
        self.submitted.fetch_add(1, Ordering::SeqCst);
        self.tasks.lock().push(task);
    }
}

#[derive(Default)]
pub struct RecordingListener {
    pub modified: Mutex<Vec<Vec<String>>>,
    pub values: Mutex<Vec<(usize, Vec<u8>)>>,
}

impl SpecializationListener for RecordingListener {
    fn notify_modified_operands(&self, operands: &[Type], _shapes: &[jitrt::runtime::jit::SymbolicShape]) {
        self.modified
            .lock()
            .push(operands.iter().map(ToString::to_string).collect());
    }

    fn notify_value_specialized(&self, index: usize, _ty: &Type, value: &[u8]) {
        self.values.lock().push((index, value.to_vec()));
    }
}
