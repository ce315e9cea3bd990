//! A tree-walking interpreter for ALMA, a small Lisp with packages,
//! quasiquotation and `gamma` macros.
//!
//! ```
//! use alma::{LispContext, LispValue};
//!
//! let mut ctx = LispContext::new();
//! let out = ctx.eval_source("(defun f (a b) (+ a b)) (f 3 4)").unwrap();
//! assert_eq!(out, LispValue::Integer(7));
//! ```

#![forbid(unsafe_code)]

pub mod util;
pub use crate::util::{LispError, LispValue, Result};
pub mod package;
pub use crate::package::{LispPackage, LispSymbol, PackageRegistry};
pub mod parser;
pub use crate::parser::LispParser;
pub mod eval;
pub use crate::eval::{eval, macroexpand_1};
pub mod env;
pub use crate::env::LispEnv;
pub mod context;
pub use crate::context::{ErrorPolicy, LispContext, SharedBuffer};
pub mod backend;
pub use crate::backend::{InstructionEmitter, InstructionLog};
mod builtins;
mod specials;
