/// tiercall - drives a small workload through the adaptive runtime and
/// prints what happened to every call target
use std::env;
use std::fs;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tiercall::runtime::debug::to_toml;
use tiercall::runtime::{CallTarget, Runtime, RuntimeOptions, Value};
use tiercall::tree::{programs, TreeCompiler};
use tracing::Level;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Upper bound on waiting for background compilations to drain
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

fn print_usage() {
    eprintln!("tiercall v{}", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    tiercall [OPTIONS]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -h, --help              Print this help message");
    eprintln!("    -v, --version           Print version information");
    eprintln!("    -c, --config <FILE>     Load runtime options from a TOML file");
    eprintln!("    -n, --calls <N>         Calls per workload phase (default: 2000)");
    eprintln!("    -t, --threshold <N>     Compilation threshold (overrides config)");
    eprintln!("    -o, --output <FILE>     Write the report to FILE (default: stdout)");
    eprintln!("    --sync                  Compile on the calling thread");
    eprintln!("    --trace-profile         Log every profiling event");
    eprintln!("    --interpreter-only      Never compile");
    eprintln!("    --log-level <LEVEL>     trace, debug, info, warn or error (default: warn)");
    eprintln!("    --print-config          Print the effective options and exit");
    eprintln!();
    eprintln!("EXAMPLES:");
    eprintln!("    tiercall --calls 500 --threshold 50");
    eprintln!("    tiercall --sync --log-level debug");
    eprintln!("    tiercall --config tiercall.toml -o report.toml");
}

fn print_version() {
    println!("tiercall {}", VERSION);
}

struct Options {
    config: Option<String>,
    output: Option<String>,
    calls: u64,
    threshold: Option<u32>,
    sync: bool,
    trace_profile: bool,
    interpreter_only: bool,
    log_level: Level,
    print_config: bool,
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();

    let mut options = Options {
        config: None,
        output: None,
        calls: 2000,
        threshold: None,
        sync: false,
        trace_profile: false,
        interpreter_only: false,
        log_level: Level::WARN,
        print_config: false,
    };
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                process::exit(0);
            }
            "-c" | "--config" => {
                options.config = Some(value_after(&args, &mut i)?.to_string());
            }
            "-o" | "--output" => {
                options.output = Some(value_after(&args, &mut i)?.to_string());
            }
            "-n" | "--calls" => {
                let value = value_after(&args, &mut i)?;
                options.calls = value
                    .parse()
                    .map_err(|_| format!("Invalid call count: {}", value))?;
            }
            "-t" | "--threshold" => {
                let value = value_after(&args, &mut i)?;
                options.threshold = Some(
                    value
                        .parse()
                        .map_err(|_| format!("Invalid threshold: {}", value))?,
                );
            }
            "--log-level" => {
                let value = value_after(&args, &mut i)?;
                options.log_level = value
                    .parse()
                    .map_err(|_| format!("Invalid log level: {}", value))?;
            }
            "--sync" => options.sync = true,
            "--trace-profile" => options.trace_profile = true,
            "--interpreter-only" => options.interpreter_only = true,
            "--print-config" => options.print_config = true,
            arg => {
                return Err(format!("Unknown option: {}", arg));
            }
        }
        i += 1;
    }

    Ok(options)
}

fn value_after<'a>(args: &'a [String], i: &mut usize) -> Result<&'a str, String> {
    let flag = &args[*i];
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("Missing value after {}", flag))
}

fn runtime_options(options: &Options) -> Result<RuntimeOptions, String> {
    let mut runtime_options = match &options.config {
        Some(path) => RuntimeOptions::load(path).map_err(|e| e.to_string())?,
        None => RuntimeOptions::default().with_threshold(100),
    };
    if let Some(threshold) = options.threshold {
        runtime_options = runtime_options.with_threshold(threshold);
    }
    if options.sync {
        runtime_options = runtime_options.synchronous();
    }
    if options.trace_profile {
        runtime_options = runtime_options.with_call_target_profiling();
    }
    if options.interpreter_only {
        runtime_options.compilation_enabled = false;
    }
    Ok(runtime_options)
}

fn wait_for_compilations(runtime: &Runtime) {
    let started = Instant::now();
    while runtime.stats().pending > 0 && started.elapsed() < DRAIN_TIMEOUT {
        thread::sleep(Duration::from_millis(1));
    }
}

/// One round of calls against every target. Returns the number of
/// application exceptions seen.
fn run_phase(targets: &Targets, calls: u64, step: &Value) -> Result<u64, String> {
    let mut raised = 0;
    for i in 0..calls {
        let n = (i % 16) as i64;
        targets
            .sum
            .call_direct(&[Value::Long(n), step.clone()])
            .map_err(|e| format!("sum raised: {}", e))?;
        if i % 2 == 0 {
            targets
                .sum_split
                .call_direct(&[Value::Long(n), Value::Long(1)])
                .map_err(|e| format!("sum split raised: {}", e))?;
        }
        targets
            .max
            .call(&[Value::Long(n), Value::Long(8)])
            .map_err(|e| format!("max raised: {}", e))?;
        if targets.check.call_direct(&[Value::Long(n - 4)]).is_err() {
            raised += 1;
        }
    }
    Ok(raised)
}

struct Targets {
    sum: Arc<CallTarget>,
    sum_split: Arc<CallTarget>,
    max: Arc<CallTarget>,
    check: Arc<CallTarget>,
}

impl Targets {
    fn create(runtime: &Arc<Runtime>) -> Result<Self, String> {
        let sum = runtime
            .create_call_target(Arc::new(programs::sum_loop("sum")))
            .map_err(|e| e.to_string())?;
        let max = runtime
            .create_call_target(Arc::new(programs::max("max")))
            .map_err(|e| e.to_string())?;
        let check = runtime
            .create_call_target(Arc::new(programs::check_non_negative("check")))
            .map_err(|e| e.to_string())?;
        let sum_split = sum.clone_uninitialized().map_err(|e| e.to_string())?;
        Ok(Self {
            sum,
            sum_split,
            max,
            check,
        })
    }

    fn all(&self) -> [&Arc<CallTarget>; 4] {
        [&self.sum, &self.sum_split, &self.max, &self.check]
    }
}

fn run(options: &Options, runtime_options: RuntimeOptions) -> Result<String, String> {
    let runtime = Runtime::builder(Arc::new(TreeCompiler::new()))
        .options(runtime_options)
        .build();
    let targets = Targets::create(&runtime)?;

    // Integer phase, then a phase that breaks the integer speculation of
    // `sum`, then integers again so it gets recompiled.
    let mut raised = run_phase(&targets, options.calls, &Value::Long(1))?;
    wait_for_compilations(&runtime);
    raised += run_phase(&targets, options.calls / 4, &Value::Double(0.5))?;
    wait_for_compilations(&runtime);
    raised += run_phase(&targets, options.calls, &Value::Long(2))?;
    wait_for_compilations(&runtime);

    let stats = runtime.stats();
    let mut report = String::new();
    report.push_str("[scheduler]\n");
    report.push_str(&format!("submitted = {}\n", stats.submitted));
    report.push_str(&format!("installed = {}\n", stats.installed));
    report.push_str(&format!("discarded = {}\n", stats.discarded));
    report.push_str(&format!("failed = {}\n", stats.failed));
    report.push_str(&format!("cancelled = {}\n", stats.cancelled));
    report.push_str(&format!("application_exceptions = {}\n", raised));
    report.push_str(&format!("stub_reinstalls = {}\n", runtime.stub_reinstall_count()));

    for target in targets.all() {
        let properties = to_toml(&target.debug_properties()).map_err(|e| e.to_string())?;
        report.push_str(&format!("\n[target.{}]\n{}", target.id().0, properties));
    }

    runtime.shutdown();
    Ok(report)
}

fn main() {
    let options = match parse_args() {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_max_level(options.log_level)
        .with_writer(std::io::stderr)
        .init();

    let runtime_options = match runtime_options(&options) {
        Ok(runtime_options) => runtime_options,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    if options.print_config {
        match runtime_options.to_toml_string() {
            Ok(text) => print!("{}", text),
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    let report = match run(&options, runtime_options) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let written = match &options.output {
        Some(path) => fs::write(path, &report).map_err(|e| format!("Failed to write '{}': {}", path, e)),
        None => {
            print!("{}", report);
            Ok(())
        }
    };
    if let Err(e) = written {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
