//! The looper scripting language.
//!
//! Scripts are compiled in three passes ([`compile`]): each file is parsed
//! into a tree of [`stmt::Block`]s, every name a statement mentions is
//! bound to a [`reference::Reference`], and calls between scripts are linked
//! once the whole batch is known.  The result is an immutable
//! [`Environment`].
//!
//! Execution is cooperative.  An [`Interpreter`] runs one invocation from the
//! audio thread until it must wait for something (a loop position, an engine
//! event, a file job), then records the wait on its explicit [`stack`] and
//! returns.  [`ScriptRuntime`] owns every live interpreter and feeds them
//! triggers, audio blocks and completion notices.
//!
//! # Quick start
//!
//! ```rust
//! use mscript::engine::{Catalog, Direction};
//! use mscript::script::{Compiler, ScriptRuntime, SourceUnit};
//! use mscript::sim::SimEngine;
//!
//! let catalog = Catalog::standard();
//! let units = [SourceUnit::new("Hello", "Variable n = 6 * 7\nMessage n\n")];
//! let (env, errors) = Compiler::new(&catalog).compile(&units);
//! assert!(errors.is_empty());
//!
//! let mut runtime = ScriptRuntime::new(catalog, env);
//! let mut engine = SimEngine::new(2, 44_100);
//! runtime.trigger(&mut engine, "Hello", Direction::Down, vec![]).unwrap();
//! assert_eq!(engine.messages, vec!["42"]);
//! ```

pub mod compile;
pub mod env;
pub mod expr;
pub mod interp;
pub mod parse;
pub mod reference;
pub mod runtime;
pub mod stack;
pub mod stmt;
pub mod value;
pub mod vars;
pub mod wait;

pub use compile::{CompileError, CompileErrorKind, Compiler, SourceUnit};
pub use env::Environment;
pub use expr::EvalContext;
pub use interp::Interpreter;
pub use runtime::{ReloadError, ScriptRuntime};
pub use stmt::{Script, ScriptId};
pub use value::Value;
