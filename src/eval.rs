use im::Vector;
use tracing::debug;
use crate::{LispError, LispValue, Result, expect};
use crate::context::LispContext;
use crate::env::LispEnv;
use crate::specials::eval_special;
use crate::util::{LispFunc, LispProcedure};

/// Evaluates one form. Symbols are looked up, lists are procedure calls, and
/// everything else evaluates to itself.
pub fn eval(value: &LispValue, env: &mut LispEnv, ctx: &mut LispContext) -> Result<LispValue> {
    match value {
        LispValue::Symbol(sym) => env.lookup(sym),
        LispValue::Cons(cell) => {
            let sym = cell.car.expect_symbol()?;
            let procedure = sym
                .function()
                .ok_or_else(|| LispError::NotAProcedure(sym.name().to_owned()))?;
            let args = cell.cdr.try_into_vec()?;
            apply(&procedure, args, env, ctx)
        },
        _ => Ok(value.clone()),
    }
}

/// Applies a procedure to unevaluated argument forms, with the calling
/// convention its kind demands.
pub fn apply(
    procedure: &LispProcedure,
    args: Vector<LispValue>,
    env: &mut LispEnv,
    ctx: &mut LispContext,
) -> Result<LispValue> {
    match procedure {
        LispProcedure::Special(form) => eval_special(*form, args, env, ctx),
        LispProcedure::Function(func) => {
            let args = args
                .iter()
                .map(|arg| eval(arg, env, ctx))
                .collect::<Result<Vector<_>>>()?;
            call_function(func, args, env, ctx)
        },
        LispProcedure::Macro(mac) => {
            let expansion = call_function(mac, args, env, ctx)?;
            debug!(
                mac = mac.name().unwrap_or("<anonymous>"),
                expansion = %expansion.inspect(),
                "expanded macro call"
            );
            eval(&expansion, env, ctx)
        },
    }
}

/// Runs a procedure body on arguments that are already in final form.
///
/// A user procedure binds its parameters in one new layer on top of the
/// environment it closed over; `env` is only passed on to builtins.
pub fn call_function(
    func: &LispFunc,
    args: Vector<LispValue>,
    env: &mut LispEnv,
    ctx: &mut LispContext,
) -> Result<LispValue> {
    match func {
        LispFunc::Builtin { f, .. } => f(args, env, ctx),
        LispFunc::User { params, body, closure, .. } => {
            expect!(params.len() == args.len(), LispError::IncorrectArguments(params.len(), args.len()));
            let mut call_env = closure.make_env();
            let mut scope = call_env.push_layer(params.iter().cloned().zip(args));
            eval_body(body, &mut scope, ctx)
        },
    }
}

/// Evaluates forms in order and returns the last value, `nil` if there are
/// none.
pub fn eval_body(body: &Vector<LispValue>, env: &mut LispEnv, ctx: &mut LispContext) -> Result<LispValue> {
    let mut last = LispValue::Nil;
    for form in body.iter() {
        last = eval(form, env, ctx)?;
    }
    Ok(last)
}

/// Expands `form` once if its head names a macro, otherwise returns it as is.
pub fn macroexpand_1(form: &LispValue, env: &mut LispEnv, ctx: &mut LispContext) -> Result<LispValue> {
    let cell = form.expect_cons()?;
    let sym = cell.car.expect_symbol()?;
    match sym.function() {
        Some(LispProcedure::Macro(mac)) => {
            let args = cell.cdr.try_into_vec()?;
            call_function(&mac, args, env, ctx)
        },
        _ => Ok(form.clone()),
    }
}
