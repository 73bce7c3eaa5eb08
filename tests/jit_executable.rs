mod common;

use std::ffi::c_void;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Result;

use common::{
    ENTRY_CALLS, MockToolkit, QueueRunner, RecordingListener, ZEROS, f32_memref, i32_memref,
    options,
};
use jitrt::runtime::jit::runner::UserData;
use jitrt::runtime::jit::SchedulerTaskRunner;
use jitrt::runtime::task::{SchedulerConfig, TaskScheduler};
use jitrt::{
    Argument, ArgumentConstraint, AsyncState, CompilationTask, CompilationTaskRunner, DType,
    InlineTaskRunner, JitError, JitExecutable, MemrefDesc, RuntimeConfig, Specialization,
};

const STATIC_IR: &str = "module @kernels\nfunc @compute(memref<2x4xf32>, i32) -> (memref<2x4xf32>)\n";
const DYNAMIC_IR: &str = "module @kernels\nfunc @compute(memref<?x4xf32>, memref<?xf32>) -> ()\n";
const SHAPE_IR: &str = "module @kernels\nfunc @compute(memref<?x4xf32> {shape}) -> ()\n";
const VALUE_IR: &str =
    "module @kernels\nfunc @compute(memref<?x4xf32>, memref<?xi32> {value}) -> ()\n";

fn instantiate(
    toolkit: &Arc<MockToolkit>,
    source: &str,
    specialization: Specialization,
    runner: Arc<dyn CompilationTaskRunner>,
) -> Result<JitExecutable<MockToolkit>, JitError> {
    JitExecutable::instantiate(
        Arc::clone(toolkit),
        source,
        "compute",
        options().with_specialization(specialization),
        "",
        runner,
    )
}

#[test]
fn static_operands_always_use_the_default() -> Result<()> {
    let toolkit = MockToolkit::new();
    let runner = QueueRunner::new();
    let exe = instantiate(&toolkit, STATIC_IR, Specialization::Enabled, runner.clone())?;

    assert_eq!(toolkit.compiles(), 1);
    assert_eq!(exe.specialization(), Specialization::Disabled);
    assert!(exe.has_default_executable());

    let default = exe.default_executable();
    for _ in 0..3 {
        let args = [f32_memref(&[2, 4]), Argument::Opaque(0)];
        let handle = exe.get_executable(&args, None, None)?;
        assert!(Arc::ptr_eq(&handle, &default));
    }

    assert_eq!(runner.submitted(), 0);
    assert_eq!(exe.num_specializations(), 0);
    assert_eq!(toolkit.compiles(), 1);
    Ok(())
}

#[test]
fn missing_entrypoint_is_a_parse_error() {
    let toolkit = MockToolkit::new();
    let err = JitExecutable::instantiate(
        toolkit,
        STATIC_IR,
        "absent",
        options(),
        "",
        Arc::new(InlineTaskRunner),
    )
    .unwrap_err();

    match err {
        JitError::Parse { message, .. } => {
            assert_eq!(message, "failed to resolve entrypoint function");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn malformed_source_reports_diagnostics() {
    let toolkit = MockToolkit::new();
    let source = "module @kernels\nfunc @compute(memref<?xf99>) -> ()\n";
    let err = instantiate(&toolkit, source, Specialization::Enabled, Arc::new(InlineTaskRunner))
        .unwrap_err();

    assert!(matches!(err, JitError::Parse { .. }));
    assert!(err.to_string().starts_with("failed to parse the IR source"));
    assert!(err.diagnostics().contains("expected a function declaration"));
}

#[tokio::test]
async fn shape_constrained_entrypoint_compiles_on_demand() -> Result<()> {
    let toolkit = MockToolkit::new();
    let runner = QueueRunner::new();
    let exe = instantiate(&toolkit, SHAPE_IR, Specialization::Enabled, runner.clone())?;

    assert_eq!(toolkit.compiles(), 0);
    assert!(!exe.has_default_executable());
    assert_eq!(
        exe.default_executable().try_get().map(|r| r.err().cloned()),
        Some(Some(JitError::DefaultUnavailable))
    );
    assert_eq!(exe.constraints(), &[ArgumentConstraint::Shape]);

    let handle = exe.get_executable(&[f32_memref(&[8, 4])], None, None)?;
    assert_eq!(handle.state(), AsyncState::Pending);
    assert_eq!(runner.submitted(), 1);
    assert_eq!(exe.num_specializations(), 1);

    let compiled = exe.all_executables_compiled();
    assert!(!compiled.is_ready());
    assert_eq!(runner.run_all(), 1);
    tokio::time::timeout(Duration::from_secs(5), compiled).await?;

    let executable = handle.wait().map_err(Clone::clone)?;
    assert_eq!(executable.specialization(), Some(0));
    assert_eq!(executable.signature().to_string(), "(memref<8x4xf32>) -> ()");
    assert_eq!(
        toolkit.regions.lock().last().map(String::as_str),
        Some("/jitrt:@kernels::@compute:specialized:0")
    );
    Ok(())
}

#[test]
fn arity_mismatch_allocates_nothing() -> Result<()> {
    let toolkit = MockToolkit::new();
    let exe = instantiate(&toolkit, SHAPE_IR, Specialization::Enabled, QueueRunner::new())?;

    let err = exe.get_executable(&[], None, None).unwrap_err();
    assert_eq!(err, JitError::Arity { expected: 1, got: 0 });
    assert_eq!(err.to_string(), "expected 1 arguments, got: 0");
    assert_eq!(exe.num_specializations(), 0);
    Ok(())
}

#[test]
fn symbol_bound_dimensions_share_one_specialization() -> Result<()> {
    let toolkit = MockToolkit::new();
    let runner = QueueRunner::new();
    let exe = instantiate(&toolkit, DYNAMIC_IR, Specialization::Always, runner.clone())?;
    assert!(!exe.has_default_executable());

    let first = exe.get_executable(&[f32_memref(&[8, 4]), f32_memref(&[8])], None, None)?;
    let second = exe.get_executable(&[f32_memref(&[16, 4]), f32_memref(&[16])], None, None)?;
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(runner.submitted(), 1);

    runner.run_all();
    let again = exe.get_executable(&[f32_memref(&[32, 4]), f32_memref(&[32])], None, None)?;
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(again.state(), AsyncState::Ready);
    assert_eq!(runner.submitted(), 1);

    // Breaking the equality between the two dynamic dimensions is a new
    // symbolic shape.
    let split = exe.get_executable(&[f32_memref(&[8, 4]), f32_memref(&[16])], None, None)?;
    assert!(!Arc::ptr_eq(&first, &split));
    assert_eq!(runner.submitted(), 2);
    assert_eq!(toolkit.compiles(), 1);
    Ok(())
}

#[test]
fn value_constrained_bytes_select_specializations() -> Result<()> {
    let toolkit = MockToolkit::new();
    let runner = QueueRunner::new();
    let listener = RecordingListener::default();
    let exe = instantiate(&toolkit, VALUE_IR, Specialization::Enabled, runner.clone())?;
    assert!(!exe.has_default_executable());

    let a = [1u8, 0, 0, 0, 2, 0, 0, 0];
    let b = [1u8, 0, 0, 0, 3, 0, 0, 0];

    let first = exe.get_executable(
        &[f32_memref(&[8, 4]), i32_memref(&a, &[2])],
        None,
        Some(&listener),
    )?;
    let same = exe.get_executable(&[f32_memref(&[8, 4]), i32_memref(&a, &[2])], None, None)?;
    let other = exe.get_executable(&[f32_memref(&[8, 4]), i32_memref(&b, &[2])], None, None)?;

    assert!(Arc::ptr_eq(&first, &same));
    assert!(!Arc::ptr_eq(&first, &other));
    assert_eq!(runner.submitted(), 2);

    assert_eq!(
        *listener.modified.lock(),
        vec![vec!["memref<?x4xf32>".to_string(), "memref<2xi32>".to_string()]]
    );
    assert_eq!(*listener.values.lock(), vec![(1, a.to_vec())]);

    runner.run_all();
    let (first, other) = (
        first.wait().map_err(Clone::clone)?,
        other.wait().map_err(Clone::clone)?,
    );
    assert_eq!(first.specialization(), Some(0));
    assert_eq!(other.specialization(), Some(1));
    Ok(())
}

#[test]
fn concurrent_callers_share_one_compile() -> Result<()> {
    let toolkit = MockToolkit::new();
    let runner = QueueRunner::new();
    let exe = instantiate(&toolkit, DYNAMIC_IR, Specialization::Always, runner.clone())?;

    let handles: Vec<_> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..16)
            .map(|_| {
                scope.spawn(|| {
                    exe.get_executable(&[f32_memref(&[64, 4]), f32_memref(&[64])], None, None)
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().expect("caller thread panicked"))
            .collect::<Result<_, _>>()
    })?;

    assert_eq!(runner.submitted(), 1);
    assert_eq!(toolkit.specializations.load(Ordering::SeqCst), 1);
    assert!(handles.iter().all(|handle| Arc::ptr_eq(handle, &handles[0])));

    runner.run_all();
    assert!(handles.iter().all(|handle| handle.state() == AsyncState::Ready));
    assert_eq!(toolkit.compiles(), 1);
    Ok(())
}

#[test]
fn disabled_policy_rejects_unresolved_constraints() {
    let toolkit = MockToolkit::new();
    let err = instantiate(&toolkit, SHAPE_IR, Specialization::Disabled, QueueRunner::new())
        .unwrap_err();

    match err {
        JitError::Config(message) => assert!(message.ends_with("[shape]"), "{message}"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn pending_specialization_falls_back_to_default() -> Result<()> {
    let toolkit = MockToolkit::new();
    let runner = QueueRunner::new();
    let exe = instantiate(&toolkit, DYNAMIC_IR, Specialization::Enabled, runner.clone())?;
    let default = exe.default_executable();
    assert_eq!(toolkit.compiles(), 1);

    let args = [f32_memref(&[8, 4]), f32_memref(&[8])];
    assert!(Arc::ptr_eq(&exe.get_executable(&args, None, None)?, &default));
    assert!(Arc::ptr_eq(&exe.get_executable(&args, None, None)?, &default));
    assert_eq!(runner.submitted(), 1);

    runner.run_all();
    let specialized = exe.get_executable(&args, None, None)?;
    assert!(!Arc::ptr_eq(&specialized, &default));
    let executable = specialized.wait().map_err(Clone::clone)?;
    assert_eq!(executable.specialization(), Some(0));
    assert_eq!(toolkit.compiles(), 2);
    Ok(())
}

#[test]
fn failed_compile_settles_the_slot_once() -> Result<()> {
    let toolkit = MockToolkit::new();
    let runner = QueueRunner::new();
    let exe = instantiate(&toolkit, SHAPE_IR, Specialization::Enabled, runner.clone())?;
    toolkit.fail_compile.store(true, Ordering::SeqCst);

    let handle = exe.get_executable(&[f32_memref(&[8, 4])], None, None)?;
    runner.run_all();

    let err = handle.wait().unwrap_err();
    assert!(matches!(err, JitError::Compile { .. }));
    assert!(
        err.to_string()
            .contains("failed to compile the module to native code")
    );

    let again = exe.get_executable(&[f32_memref(&[8, 4])], None, None)?;
    assert!(Arc::ptr_eq(&handle, &again));
    assert_eq!(runner.submitted(), 1);
    assert_eq!(exe.specialization_stats().failed, 1);
    Ok(())
}

#[test]
fn failed_specialization_is_served_by_the_default() -> Result<()> {
    let toolkit = MockToolkit::new();
    let runner = QueueRunner::new();
    let exe = instantiate(&toolkit, DYNAMIC_IR, Specialization::Enabled, runner.clone())?;
    toolkit.fail_specialization.store(true, Ordering::SeqCst);

    let args = [f32_memref(&[8, 4]), f32_memref(&[8])];
    for _ in 0..2 {
        let handle = exe.get_executable(&args, None, None)?;
        assert!(Arc::ptr_eq(&handle, &exe.default_executable()));
    }

    assert_eq!(runner.submitted(), 0);
    assert_eq!(toolkit.specializations.load(Ordering::SeqCst), 1);
    assert_eq!(exe.specialization_stats().failed, 1);
    Ok(())
}

#[test]
fn failed_specialization_without_default_is_reported_in_the_slot() -> Result<()> {
    let toolkit = MockToolkit::new();
    let exe = instantiate(&toolkit, SHAPE_IR, Specialization::Enabled, QueueRunner::new())?;
    toolkit.fail_specialization.store(true, Ordering::SeqCst);

    let handle = exe.get_executable(&[f32_memref(&[8, 4])], None, None)?;
    let err = handle.wait().unwrap_err();
    assert!(matches!(err, JitError::Specialization { .. }));
    assert!(err.to_string().starts_with("failed to specialize executable"));
    assert!(err.diagnostics().contains("cannot specialize operand types"));
    Ok(())
}

#[test]
fn mismatched_arguments_get_a_precise_error() -> Result<()> {
    let toolkit = MockToolkit::new();
    let exe = instantiate(&toolkit, DYNAMIC_IR, Specialization::Enabled, QueueRunner::new())?;

    let err = exe
        .get_executable(&[f32_memref(&[8, 5]), f32_memref(&[8])], None, None)
        .unwrap_err();
    assert!(matches!(err, JitError::ShapeMismatch { index: 0, .. }));
    assert!(err.to_string().contains("dimension #1"), "{err}");

    let err = exe
        .get_executable(&[f32_memref(&[8, 4]), Argument::Opaque(0)], None, None)
        .unwrap_err();
    assert!(matches!(err, JitError::TypeMismatch { index: 1, .. }));
    assert_eq!(exe.num_specializations(), 0);
    Ok(())
}

#[test]
fn wrong_element_type_is_rejected_before_caching() -> Result<()> {
    let toolkit = MockToolkit::new();
    let runner = QueueRunner::new();
    let exe = instantiate(&toolkit, DYNAMIC_IR, Specialization::Always, runner.clone())?;

    let sizes = [8, 4];
    let wrong = Argument::Memref(MemrefDesc::new(DType::I64, &ZEROS, 0, &sizes, &[]));
    let err = exe
        .get_executable(&[wrong, f32_memref(&[8])], None, None)
        .unwrap_err();

    assert!(matches!(err, JitError::TypeMismatch { index: 0, .. }), "{err}");
    assert!(err.to_string().contains("element type i64"), "{err}");
    assert_eq!(exe.num_specializations(), 0);
    assert_eq!(runner.submitted(), 0);
    assert_eq!(toolkit.specializations.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn inline_runner_compiles_before_returning() -> Result<()> {
    let toolkit = MockToolkit::new();
    let exe = instantiate(&toolkit, SHAPE_IR, Specialization::Enabled, Arc::new(InlineTaskRunner))?;

    let handle = exe.get_executable(&[f32_memref(&[3, 4])], None, None)?;
    assert_eq!(handle.state(), AsyncState::Ready);
    assert!(exe.all_executables_compiled().is_ready());
    assert_eq!(toolkit.compiles(), 1);
    Ok(())
}

fn run_with_user_data(
    specialization: usize,
    constraints: &[ArgumentConstraint],
    arguments: &[Argument<'_>],
    task: CompilationTask,
    user_data: UserData<'_>,
) {
    assert_eq!(specialization, 0);
    assert_eq!(constraints, &[ArgumentConstraint::Shape]);
    assert_eq!(arguments.len(), 1);
    assert_eq!(
        user_data.and_then(|data| data.downcast_ref::<u32>()),
        Some(&7)
    );
    task.run();
}

#[test]
fn plain_functions_can_run_compile_tasks() -> Result<()> {
    let toolkit = MockToolkit::new();
    let exe = instantiate(
        &toolkit,
        SHAPE_IR,
        Specialization::Enabled,
        Arc::new(run_with_user_data),
    )?;

    let user_data = 7u32;
    let handle = exe.get_executable(&[f32_memref(&[3, 4])], Some(&user_data), None)?;
    assert_eq!(handle.state(), AsyncState::Ready);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scheduler_runner_compiles_on_worker_threads() -> Result<()> {
    let scheduler = TaskScheduler::new(&SchedulerConfig {
        max_workers: 2,
        thread_name: "test-compile".to_string(),
    })?;
    let toolkit = MockToolkit::new();
    let exe = instantiate(
        &toolkit,
        SHAPE_IR,
        Specialization::Enabled,
        Arc::new(SchedulerTaskRunner::new(scheduler.clone())),
    )?;

    let first = exe.get_executable(&[f32_memref(&[8, 4])], None, None)?;
    let second = exe.get_executable(&[f32_memref(&[16, 4])], None, None)?;
    assert!(!Arc::ptr_eq(&first, &second));

    tokio::time::timeout(Duration::from_secs(5), exe.all_executables_compiled()).await?;
    assert_eq!(first.state(), AsyncState::Ready);
    assert_eq!(second.state(), AsyncState::Ready);
    assert_eq!(toolkit.compiles(), 2);

    scheduler.shutdown();
    Ok(())
}

#[test]
fn shared_compile_scheduler_runs_tasks() -> Result<()> {
    let runner = SchedulerTaskRunner::shared()?;
    assert!(!runner.scheduler().is_shutdown());

    let toolkit = MockToolkit::new();
    let exe = instantiate(&toolkit, SHAPE_IR, Specialization::Enabled, Arc::new(runner))?;
    let handle = exe.get_executable(&[f32_memref(&[5, 4])], None, None)?;

    let executable = handle.wait().map_err(Clone::clone)?;
    assert_eq!(executable.specialization(), Some(0));
    Ok(())
}

#[test]
fn runtime_config_overrides_the_policy() -> Result<()> {
    let toolkit = MockToolkit::new();
    let config = RuntimeConfig {
        specialization: Some(Specialization::Always),
        ..RuntimeConfig::default()
    };
    let exe = JitExecutable::instantiate(
        Arc::clone(&toolkit),
        DYNAMIC_IR,
        "compute",
        options().with_runtime_config(&config),
        "",
        QueueRunner::new(),
    )?;

    assert_eq!(exe.specialization(), Specialization::Always);
    assert!(!exe.has_default_executable());
    assert_eq!(toolkit.compiles(), 0);
    Ok(())
}

#[test]
fn default_executable_is_tagged_and_callable() -> Result<()> {
    let toolkit = MockToolkit::new();
    let exe = JitExecutable::instantiate(
        Arc::clone(&toolkit),
        STATIC_IR,
        "compute",
        options().with_runtime_symbols(|symbols| symbols.bind("jitrt_alloc", 0x1000)),
        "tf/kernels",
        Arc::new(InlineTaskRunner),
    )?;

    let default = exe.default_executable();
    let executable = default.wait().map_err(Clone::clone)?;
    assert_eq!(
        executable.code_memory().name(),
        "/jitrt:tf__kernels:@kernels::@compute:default"
    );
    assert_eq!(*toolkit.bound_symbols.lock(), vec!["jitrt_alloc".to_string()]);
    assert_eq!(
        executable.runtime_signature().to_string(),
        "(!rt.kernel_context, memref<2x4xf32>, i32) -> (memref<2x4xf32>)"
    );

    // kernel context, memref descriptor with two dims, scalar, one result
    assert_eq!(executable.arguments_memory_layout().num_args_ptrs, 9);
    assert_eq!(executable.num_results(), 1);

    let before = ENTRY_CALLS.load(Ordering::SeqCst);
    let mut packed = vec![std::ptr::null_mut::<c_void>(); 10];
    unsafe { executable.execute(&mut packed) }?;
    assert!(ENTRY_CALLS.load(Ordering::SeqCst) > before);

    let mut short = vec![std::ptr::null_mut::<c_void>(); 3];
    let err = unsafe { executable.execute(&mut short) }.unwrap_err();
    assert_eq!(err, JitError::Arity { expected: 10, got: 3 });
    Ok(())
}

#[test]
fn pipeline_failures_carry_diagnostics() {
    let toolkit = MockToolkit::new();
    let err = JitExecutable::instantiate(
        Arc::clone(&toolkit),
        STATIC_IR,
        "compute",
        options().with_compilation_pipeline(|passes: &mut Vec<String>| {
            passes.push("fail".to_string());
        }),
        "",
        Arc::new(InlineTaskRunner),
    )
    .unwrap_err();

    assert!(matches!(err, JitError::Compile { .. }));
    assert!(err.to_string().contains("failed to run compilation pipeline"));
    assert!(err.diagnostics().contains("pass `fail` failed"));
}

#[test]
fn specialization_pipeline_runs_before_lowering() -> Result<()> {
    let toolkit = MockToolkit::new();
    let exe = JitExecutable::instantiate(
        Arc::clone(&toolkit),
        SHAPE_IR,
        "compute",
        options().with_specialization_pipeline(|passes: &mut Vec<String>| {
            passes.push("canonicalize".to_string());
        }),
        "",
        Arc::new(InlineTaskRunner),
    )?;

    let handle = exe.get_executable(&[f32_memref(&[8, 4])], None, None)?;
    let executable = handle.wait().map_err(Clone::clone)?;
    let passes = executable
        .engine()
        .downcast_ref::<Vec<String>>()
        .expect("mock engine keeps the pass list");
    assert_eq!(passes, &["canonicalize", "lower-to-native"]);
    Ok(())
}
