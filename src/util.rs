use std::fmt;
use std::sync::Arc;
use derivative::Derivative;
use im::Vector;
use itertools::Itertools;
use thiserror::Error;
use crate::context::LispContext;
use crate::env::{LispClosure, LispEnv};
use crate::package::{LispPackage, LispSymbol};

#[macro_export]
macro_rules! expect {
    ($cond:expr, $err:expr) => {
        if !$cond {
            return Err($err);
        }
    }
}

pub type Result<T> = std::result::Result<T, LispError>;

/// Native procedure body. Functions receive evaluated arguments, macros and
/// special forms receive the unevaluated argument forms.
pub type LispBuiltinFunc = fn(Vector<LispValue>, &mut LispEnv, &mut LispContext) -> Result<LispValue>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LispSpecialForm {
    Quote,
    Quasiquote,
    Unquote,
    SliceUnquote,
    Progn,
    Let,
    If,
    Lambda,
    Gamma,
}

#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub enum LispFunc {
    Builtin {
        name: &'static str,
        #[derivative(Debug = "ignore")]
        f: LispBuiltinFunc,
    },
    User {
        name: Option<String>,
        params: Vec<LispSymbol>,
        body: Vector<LispValue>,
        closure: LispClosure,
    },
}

impl LispFunc {
    pub fn name(&self) -> Option<&str> {
        match self {
            LispFunc::Builtin { name, .. } => Some(*name),
            LispFunc::User { name, .. } => name.as_deref(),
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, LispFunc::User { .. })
    }

    /// A copy of a user procedure that remembers `new_name`; builtins and
    /// already-named procedures are returned unchanged.
    pub(crate) fn named(func: &Arc<LispFunc>, new_name: &str) -> Arc<LispFunc> {
        match &**func {
            LispFunc::User { name: None, params, body, closure } => Arc::new(LispFunc::User {
                name: Some(new_name.to_owned()),
                params: params.clone(),
                body: body.clone(),
                closure: closure.clone(),
            }),
            _ => func.clone(),
        }
    }
}

/// What a symbol's function cell can hold.
#[derive(Clone, Debug)]
pub enum LispProcedure {
    Special(LispSpecialForm),
    Function(Arc<LispFunc>),
    Macro(Arc<LispFunc>),
}

#[derive(Clone, Debug)]
pub struct LispCons {
    pub car: LispValue,
    pub cdr: LispValue,
}

impl Drop for LispCons {
    // Unlinks uniquely owned cells one at a time instead of letting each
    // cell's drop recurse into its `cdr`.
    fn drop(&mut self) {
        let mut next = std::mem::replace(&mut self.cdr, LispValue::Nil);
        while let LispValue::Cons(cell) = next {
            match Arc::try_unwrap(cell) {
                Ok(mut cell) => next = std::mem::replace(&mut cell.cdr, LispValue::Nil),
                Err(_) => break,
            }
        }
    }
}

#[derive(Clone, Debug)]
pub enum LispValue {
    Integer(i64),
    String(Arc<str>),
    Symbol(LispSymbol),
    Cons(Arc<LispCons>),
    Nil,
    Function(Arc<LispFunc>),
    Macro(Arc<LispFunc>),
    Package(LispPackage),
}

impl LispValue {
    pub fn cons(car: LispValue, cdr: LispValue) -> Self {
        Self::Cons(Arc::new(LispCons { car, cdr }))
    }

    /// Builds a list ending in `tail` instead of `Nil`.
    pub fn list_with_tail<I>(items: I, tail: LispValue) -> Self
    where
        I: IntoIterator<Item = LispValue>,
        I::IntoIter: DoubleEndedIterator,
    {
        items.into_iter().rev().fold(tail, |acc, x| Self::cons(x, acc))
    }

    pub fn list_from<I>(items: I) -> Self
    where
        I: IntoIterator<Item = LispValue>,
        I::IntoIter: DoubleEndedIterator,
    {
        Self::list_with_tail(items, Self::Nil)
    }

    pub fn string(s: &str) -> Self {
        Self::String(Arc::from(s))
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Self::Integer(_) => "integer",
            Self::String(_) => "string",
            Self::Symbol(_) => "symbol",
            Self::Cons(_) => "cons",
            Self::Nil => "null",
            Self::Function(_) => "function",
            Self::Macro(_) => "macro",
            Self::Package(_) => "package",
        }
    }

    /// `(typep value 'name)`. `t` matches everything; procedures also match
    /// the names of the kinds they specialise.
    pub fn type_test(&self, name: &str) -> bool {
        if name == "t" || name == self.type_of() {
            return true;
        }
        match self {
            Self::Cons(_) | Self::Nil => name == "list",
            Self::Function(f) => name == "procedure" || (f.is_user() && name == "function-user"),
            Self::Macro(f) => name == "procedure" || (f.is_user() && name == "macro-user"),
            _ => false,
        }
    }

    pub fn truthiness(&self) -> bool {
        !self.is_nil()
    }
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }
    pub fn is_procedure(&self) -> bool {
        matches!(self, Self::Function(_) | Self::Macro(_))
    }

    /// Identity comparison for `eq`. Integers have no identity of their own
    /// and compare by value.
    pub fn is_eq(&self, other: &LispValue) -> bool {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::String(a), Self::String(b)) => Arc::ptr_eq(a, b),
            (Self::Symbol(a), Self::Symbol(b)) => a == b,
            (Self::Cons(a), Self::Cons(b)) => Arc::ptr_eq(a, b),
            (Self::Nil, Self::Nil) => true,
            (Self::Function(a), Self::Function(b)) => Arc::ptr_eq(a, b),
            (Self::Macro(a), Self::Macro(b)) => Arc::ptr_eq(a, b),
            (Self::Package(a), Self::Package(b)) => a == b,
            _ => false,
        }
    }

    pub fn expect_symbol(&self) -> Result<LispSymbol> {
        match self {
            Self::Symbol(s) => Ok(s.clone()),
            _ => Err(self.type_error("symbol")),
        }
    }
    pub fn expect_integer(&self) -> Result<i64> {
        match self {
            Self::Integer(i) => Ok(*i),
            _ => Err(self.type_error("integer")),
        }
    }
    pub fn expect_cons(&self) -> Result<&LispCons> {
        match self {
            Self::Cons(c) => Ok(&**c),
            _ => Err(self.type_error("cons")),
        }
    }
    pub fn expect_string(&self) -> Result<&str> {
        match self {
            Self::String(s) => Ok(&**s),
            _ => Err(self.type_error("string")),
        }
    }
    pub fn expect_package(&self) -> Result<LispPackage> {
        match self {
            Self::Package(p) => Ok(p.clone()),
            _ => Err(self.type_error("package")),
        }
    }
    pub fn expect_procedure(&self) -> Result<LispProcedure> {
        match self {
            Self::Function(f) => Ok(LispProcedure::Function(f.clone())),
            Self::Macro(m) => Ok(LispProcedure::Macro(m.clone())),
            _ => Err(self.type_error("procedure")),
        }
    }

    pub(crate) fn type_error(&self, expected: &'static str) -> LispError {
        LispError::InvalidDataType(expected, self.to_string())
    }

    /// Elements of a proper list; `Nil` is the empty list.
    pub fn try_into_vec(&self) -> Result<Vector<LispValue>> {
        let (items, tail) = self.split_tail();
        match tail {
            LispValue::Nil => Ok(items),
            _ if items.is_empty() => Err(self.type_error("list")),
            _ => Err(LispError::ImproperList(self.to_string())),
        }
    }

    /// Splits a possibly improper list into its elements and whatever the last
    /// `cdr` is (`Nil` for proper lists, the value itself for atoms).
    pub fn split_tail(&self) -> (Vector<LispValue>, LispValue) {
        let mut items = Vector::new();
        let mut cur = self;
        while let LispValue::Cons(cell) = cur {
            items.push_back(cell.car.clone());
            cur = &cell.cdr;
        }
        (items, cur.clone())
    }

    /// Readable printed form: like `Display`, but strings are quoted and
    /// escaped and the empty list prints as `()`, so that the output reads
    /// back as the same data.
    pub fn inspect(&self) -> String {
        match self {
            LispValue::String(s) => format!("\"{}\"", escape(s)),
            LispValue::Nil => "()".to_owned(),
            LispValue::Cons(_) => {
                let (items, tail) = self.split_tail();
                let body = items.iter().map(|x| x.inspect()).join(" ");
                match tail {
                    LispValue::Nil => format!("({})", body),
                    tail => format!("({} . {})", body, tail.inspect()),
                }
            },
            _ => self.to_string(),
        }
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

impl From<i64> for LispValue {
    fn from(item: i64) -> Self {
        Self::Integer(item)
    }
}
impl From<&str> for LispValue {
    fn from(item: &str) -> Self {
        Self::string(item)
    }
}
impl From<String> for LispValue {
    fn from(item: String) -> Self {
        Self::String(Arc::from(item))
    }
}
impl From<LispSymbol> for LispValue {
    fn from(item: LispSymbol) -> Self {
        Self::Symbol(item)
    }
}
impl From<LispPackage> for LispValue {
    fn from(item: LispPackage) -> Self {
        Self::Package(item)
    }
}
impl From<Vector<LispValue>> for LispValue {
    fn from(item: Vector<LispValue>) -> Self {
        Self::list_from(item)
    }
}
impl FromIterator<LispValue> for LispValue {
    fn from_iter<I: IntoIterator<Item = LispValue>>(iter: I) -> Self {
        let items: Vec<LispValue> = iter.into_iter().collect();
        Self::list_from(items)
    }
}

/// Structural equality: lists and strings compare by content, symbols,
/// packages and procedures by identity.
impl std::cmp::PartialEq for LispValue {
    fn eq(&self, other: &LispValue) -> bool {
        match (self, other) {
            (LispValue::Integer(a), LispValue::Integer(b)) => a == b,
            (LispValue::String(a), LispValue::String(b)) => a == b,
            (LispValue::Symbol(a), LispValue::Symbol(b)) => a == b,
            (LispValue::Cons(a), LispValue::Cons(b)) => cons_eq(a, b),
            (LispValue::Nil, LispValue::Nil) => true,
            (LispValue::Package(a), LispValue::Package(b)) => a == b,
            (LispValue::Function(a), LispValue::Function(b)) => Arc::ptr_eq(a, b),
            (LispValue::Macro(a), LispValue::Macro(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}
impl std::cmp::Eq for LispValue { }

// Walks the spine in a loop so long lists do not recurse once per cell.
fn cons_eq(mut a: &Arc<LispCons>, mut b: &Arc<LispCons>) -> bool {
    loop {
        if Arc::ptr_eq(a, b) {
            return true;
        }
        if a.car != b.car {
            return false;
        }
        match (&a.cdr, &b.cdr) {
            (LispValue::Cons(x), LispValue::Cons(y)) => {
                a = x;
                b = y;
            },
            (x, y) => return x == y,
        }
    }
}

impl fmt::Display for LispValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LispValue::Integer(n) => write!(f, "{}", n),
            LispValue::String(s) => write!(f, "{}", s),
            LispValue::Symbol(s) => write!(f, "{}", s),
            LispValue::Nil => write!(f, "nil"),
            LispValue::Cons(_) => {
                let (items, tail) = self.split_tail();
                write!(f, "({}", items.iter().join(" "))?;
                if !tail.is_nil() {
                    write!(f, " . {}", tail)?;
                }
                write!(f, ")")
            },
            LispValue::Function(func) => match func.name() {
                Some(name) => write!(f, "#<function {}>", name),
                None => write!(f, "#<function>"),
            },
            LispValue::Macro(func) => match func.name() {
                Some(name) => write!(f, "#<macro {}>", name),
                None => write!(f, "#<macro>"),
            },
            LispValue::Package(p) => write!(f, "#<package {}>", p.name()),
        }
    }
}

#[derive(Error, Debug)]
pub enum LispError {
    #[error("syntax error at line {0}, column {1}: unexpected '{2}'")]
    SyntaxError(usize, usize, char),
    #[error("missing delimiter ')' (expected {0} more)")]
    UnbalancedDelim(usize),
    #[error("prefix `{0}` not followed by any form")]
    MissingToken(&'static str),
    #[error("unterminated string literal starting at line {0}, column {1}")]
    UnterminatedString(usize, usize),
    #[error("integer literal `{0}` does not fit in 64 bits")]
    IntegerOutOfRange(String),
    #[error("the symbol `{0}` is not bound")]
    UndefinedVariable(String),
    #[error("the symbol `{0}` has a corrupted dynamic binding")]
    CorruptedSymbol(String),
    #[error("the symbol `{0}` does not denote a procedure")]
    NotAProcedure(String),
    #[error("the symbol {0} does not denote a package")]
    NotAPackage(String),
    #[error("invalid data type. expected {0}, received {1}")]
    InvalidDataType(&'static str, String),
    #[error("unexpected arguments. expected {0}, received {1}")]
    IncorrectArguments(usize, usize),
    #[error("unexpected arguments. expected at least {0}, received {1}")]
    TooFewArguments(usize, usize),
    #[error("unexpected arguments. expected {0} to {1}, received {2}")]
    ArgumentRange(usize, usize, usize),
    #[error("cannot use the improper list {0} here")]
    ImproperList(String),
    #[error("a binding clause must be a (symbol value) list, received {0}")]
    InvalidBinding(String),
    #[error("{0} outside quasiquote")]
    OnlyInQuasiquote(&'static str),
    #[error("slice-unquote cannot appear directly inside quasiquote")]
    SliceAtTopLevel,
    #[error("slice-unquote cannot follow a dot")]
    SliceInDottedTail,
    #[error("a procedure cannot be emitted: {0}")]
    CannotEmit(String),
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("no native backend is configured")]
    NoBackend,
    #[error("`{0}` is not a 64-bit register")]
    UnknownRegister(String),
    #[error("error writing output: {0}")]
    OSFailure(#[from] std::io::Error),
}
