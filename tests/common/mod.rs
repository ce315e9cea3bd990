#![allow(unused)]

pub use alma::{
    ErrorPolicy, InstructionLog, LispContext, LispError, LispValue, Result, SharedBuffer,
};
pub use alma::backend::{Instruction, Register};
pub use std::sync::Arc;

/// A context whose `print`/`emit` output lands in the returned buffer.
pub fn testing_context() -> (LispContext, SharedBuffer) {
    let out = SharedBuffer::new();
    (LispContext::new().with_output(out.clone()), out)
}

#[inline]
pub fn eval_str(input: &str) -> Result<LispValue> {
    let (mut ctx, _) = testing_context();
    ctx.eval_source(input)
}

#[inline]
pub fn eval_str_in_ctx(input: &str, ctx: &mut LispContext) -> Result<LispValue> {
    ctx.eval_source(input)
}

/// Reads one form without evaluating it.
pub fn read(input: &str, ctx: &LispContext) -> LispValue {
    let mut forms = ctx.parse_all(input).unwrap();
    assert_eq!(forms.len(), 1, "expected exactly one form in {:?}", input);
    forms.remove(0)
}

pub fn sym(name: &str, ctx: &LispContext) -> LispValue {
    ctx.registry().intern(name).into()
}

#[macro_export]
macro_rules! eval {
    ($code:expr) => {
        eval_str($code).unwrap()
    };
    ($code:expr, $ctx:expr) => {
        eval_str_in_ctx($code, $ctx).unwrap()
    };
}
