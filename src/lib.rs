//! tiercall - Adaptive Call-Target Runtime
//!
//! This library manages the life of units of interpreted code in a
//! self-optimizing execution engine: it profiles them, decides when to move
//! them to optimized code, compiles them in the background, and drops back to
//! interpretation when optimized assumptions stop holding.
//!
//! # Architecture
//!
//! 1. **Profiling** (`runtime::profile`)
//!    - Call and loop counters against compile thresholds
//!    - Argument and return shape stability, exception history
//!    - Void / default / tracing variants selected once per target
//!
//! 2. **Call targets** (`runtime::call_target`)
//!    - Ordinary, direct and inlined calls
//!    - Double-checked compile submission, invalidation, splitting
//!    - Deoptimization on failed speculation
//!
//! 3. **Compilation** (`runtime::scheduler`, `runtime::thread_pool`)
//!    - Inline or background compilation against a pluggable backend
//!    - Atomic install, cancellation, failure policies
//!
//! 4. **Registry** (`runtime::registry`)
//!    - Explicitly constructed `Runtime` owning options, backend and targets
//!
//! 5. **Reference units** (`tree`)
//!    - A self-specializing expression tree and its compiler
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tiercall::runtime::{Runtime, RuntimeOptions, Value};
//! use tiercall::tree::{programs, TreeCompiler};
//!
//! let runtime = Runtime::builder(Arc::new(TreeCompiler::new()))
//!     .options(RuntimeOptions::default().with_threshold(10).synchronous())
//!     .build();
//! let sum = runtime
//!     .create_call_target(Arc::new(programs::sum_loop("sum")))
//!     .unwrap();
//!
//! for _ in 0..20 {
//!     assert_eq!(sum.call_direct(&[Value::Long(3), Value::Long(2)]).unwrap(), Value::Long(6));
//! }
//! assert!(sum.is_valid());
//! runtime.shutdown();
//! ```

pub mod runtime;
pub mod tree;

pub use runtime::{
    CallTarget, CompilationFailure, CompilerBackend, Exception, ExecutableUnit, Runtime,
    RuntimeOptions, Value,
};
