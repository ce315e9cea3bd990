//! Packages and interned symbols.
//!
//! A symbol is an identity-carrying cell: two occurrences of the same name in
//! the same package are the *same* `LispSymbol`, and equality and hashing are
//! by address rather than by name. Symbols carry the mutable cells the
//! evaluator needs (bound procedure, dynamic value stack and the package the
//! symbol denotes, if any).

use std::fmt;
use std::sync::Arc;
use by_address::ByAddress;
use dashmap::DashMap;
use parking_lot::RwLock;
use crate::{LispError, LispValue, Result};
use crate::util::LispProcedure;

/// Name of the package every builtin lives in.
pub const ROOT_PACKAGE: &str = "alma";

pub struct SymbolCell {
    name: String,
    function: RwLock<Option<LispProcedure>>,
    // `None` means the symbol was never given a dynamic value
    values: RwLock<Option<Vec<LispValue>>>,
    package: RwLock<Option<LispPackage>>,
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct LispSymbol(ByAddress<Arc<SymbolCell>>);

impl LispSymbol {
    /// Creates a fresh, uninterned symbol. Use [`LispPackage::intern`] to get
    /// the canonical symbol for a name.
    pub fn uninterned(name: &str) -> Self {
        LispSymbol(ByAddress(Arc::new(SymbolCell {
            name: name.to_owned(),
            function: RwLock::new(None),
            values: RwLock::new(None),
            package: RwLock::new(None),
        })))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn function(&self) -> Option<LispProcedure> {
        self.0.function.read().clone()
    }
    pub fn set_function(&self, procedure: LispProcedure) {
        *self.0.function.write() = Some(procedure);
    }

    /// The package this symbol denotes when used as a qualifier.
    pub fn package(&self) -> Option<LispPackage> {
        self.0.package.read().clone()
    }
    pub fn set_package(&self, package: LispPackage) {
        *self.0.package.write() = Some(package);
    }

    /// Current dynamic value, `Ok(None)` if the symbol is unbound.
    pub fn dynamic_value(&self) -> Result<Option<LispValue>> {
        match &*self.0.values.read() {
            None => Ok(None),
            Some(stack) => match stack.last() {
                Some(val) => Ok(Some(val.clone())),
                None => Err(LispError::CorruptedSymbol(self.name().to_owned())),
            },
        }
    }

    pub fn push_dynamic(&self, val: LispValue) {
        self.0.values.write().get_or_insert_with(Vec::new).push(val);
    }

    /// Removes the innermost dynamic value. The symbol stays marked as bound,
    /// so popping the last value leaves it corrupted until a new one is pushed.
    pub fn pop_dynamic(&self) -> Option<LispValue> {
        self.0.values.write().as_mut().and_then(|stack| stack.pop())
    }

    /// Replaces the innermost dynamic value.
    pub fn set_dynamic(&self, val: LispValue) -> Result<()> {
        let mut lock = self.0.values.write();
        match lock.as_mut() {
            None => Err(LispError::UndefinedVariable(self.name().to_owned())),
            Some(stack) => match stack.last_mut() {
                Some(top) => {
                    *top = val;
                    Ok(())
                },
                None => Err(LispError::CorruptedSymbol(self.name().to_owned())),
            },
        }
    }
}

impl fmt::Debug for LispSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LispSymbol({})", self.name())
    }
}

impl fmt::Display for LispSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub struct PackageCell {
    name: String,
    symbols: DashMap<String, LispSymbol>,
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct LispPackage(ByAddress<Arc<PackageCell>>);

impl LispPackage {
    pub fn new(name: &str) -> Self {
        LispPackage(ByAddress(Arc::new(PackageCell {
            name: name.to_owned(),
            symbols: DashMap::new(),
        })))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn find(&self, name: &str) -> Option<LispSymbol> {
        self.0.symbols.get(name).map(|sym| sym.value().clone())
    }

    pub fn intern(&self, name: &str) -> LispSymbol {
        if let Some(sym) = self.find(name) {
            return sym;
        }
        self.0
            .symbols
            .entry(name.to_owned())
            .or_insert_with(|| LispSymbol::uninterned(name))
            .value()
            .clone()
    }

    /// Resolves a possibly-qualified name such as `outer::inner::name`.
    ///
    /// Every component but the last is interned in the package reached so far
    /// and must denote a package; the last one is interned in the package
    /// the walk ends in.
    pub fn resolve(&self, token: &str) -> Result<LispSymbol> {
        let components = split_qualified(token);
        let Some((last, qualifiers)) = components.split_last() else {
            unreachable!("split_qualified yields at least one component")
        };
        let mut package = self.clone();
        for (idx, component) in qualifiers.iter().enumerate() {
            let sym = package.intern(component);
            package = sym.package().ok_or_else(|| {
                LispError::NotAPackage(components[..=idx].join("::"))
            })?;
        }
        Ok(package.intern(last))
    }
}

impl fmt::Debug for LispPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LispPackage({})", self.name())
    }
}

/// Splits a token on package separators, trying `::` before `:` at each step.
fn split_qualified(token: &str) -> Vec<&str> {
    let mut out = vec![];
    let mut rest = token;
    loop {
        let found = ["::", ":"]
            .iter()
            .find_map(|sep| rest.find(sep).map(|idx| (idx, sep.len())));
        match found {
            Some((idx, len)) => {
                out.push(&rest[..idx]);
                rest = &rest[idx + len..];
            },
            None => {
                out.push(rest);
                break out;
            },
        }
    }
}

/// Symbols the reader and evaluator refer to by identity.
#[derive(Clone, Debug)]
pub struct KnownSymbols {
    pub t: LispSymbol,
    pub nil: LispSymbol,
    pub quote: LispSymbol,
    pub quasiquote: LispSymbol,
    pub unquote: LispSymbol,
    pub slice_unquote: LispSymbol,
    pub lambda: LispSymbol,
    pub gamma: LispSymbol,
    pub set_symbol_function: LispSymbol,
    pub current_package: LispSymbol,
}

/// The process-wide symbol table, owned by a [`crate::LispContext`] and passed
/// explicitly to whatever needs to intern or resolve names.
#[derive(Clone, Debug)]
pub struct PackageRegistry {
    root: LispPackage,
    known: KnownSymbols,
}

impl PackageRegistry {
    pub fn new() -> Self {
        let root = LispPackage::new(ROOT_PACKAGE);
        let known = KnownSymbols {
            t: root.intern("t"),
            nil: root.intern("nil"),
            quote: root.intern("quote"),
            quasiquote: root.intern("quasiquote"),
            unquote: root.intern("unquote"),
            slice_unquote: root.intern("slice-unquote"),
            lambda: root.intern("lambda"),
            gamma: root.intern("gamma"),
            set_symbol_function: root.intern("set-symbol-function"),
            current_package: root.intern("*current-package*"),
        };
        PackageRegistry { root, known }
    }

    pub fn root(&self) -> &LispPackage {
        &self.root
    }

    pub fn known(&self) -> &KnownSymbols {
        &self.known
    }

    /// The package `*current-package*` is bound to, or the root package if it
    /// is unbound or bound to something else.
    pub fn current(&self) -> LispPackage {
        match self.known.current_package.dynamic_value() {
            Ok(Some(LispValue::Package(pkg))) => pkg,
            _ => self.root.clone(),
        }
    }

    pub fn intern(&self, name: &str) -> LispSymbol {
        self.root.intern(name)
    }

    /// Resolves a reader token against the current package.
    pub fn resolve(&self, token: &str) -> Result<LispSymbol> {
        self.current().resolve(token)
    }
}

impl Default for PackageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let pkg = LispPackage::new("test");
        let a = pkg.intern("foo");
        let b = pkg.intern("foo");
        assert_eq!(a, b);
        assert_eq!(pkg.find("foo"), Some(a));
    }

    #[test]
    fn same_name_different_packages() {
        let one = LispPackage::new("one");
        let two = LispPackage::new("two");
        assert_ne!(one.intern("foo"), two.intern("foo"));
        assert_ne!(LispSymbol::uninterned("foo"), one.intern("foo"));
    }

    #[test]
    fn find_does_not_create() {
        let pkg = LispPackage::new("test");
        assert!(pkg.find("missing").is_none());
        assert!(pkg.find("missing").is_none());
    }

    #[test]
    fn split_most_specific_first() {
        assert_eq!(split_qualified("abc"), vec!["abc"]);
        assert_eq!(split_qualified("a::b"), vec!["a", "b"]);
        assert_eq!(split_qualified("a:b"), vec!["a", "b"]);
        assert_eq!(split_qualified("a:b::c"), vec!["a:b", "c"]);
        assert_eq!(split_qualified("a::b::c"), vec!["a", "b", "c"]);
    }

    #[test]
    fn qualified_resolution() {
        let root = LispPackage::new("root");
        let inner = LispPackage::new("inner");
        root.intern("inner").set_package(inner.clone());
        let sym = root.resolve("inner::x").unwrap();
        assert_eq!(sym, inner.intern("x"));
        assert_ne!(sym, root.intern("x"));
    }

    #[test]
    fn qualifier_must_denote_package() {
        let root = LispPackage::new("root");
        let inner = LispPackage::new("inner");
        root.intern("inner").set_package(inner);
        match root.resolve("inner::nope::x") {
            Err(LispError::NotAPackage(name)) => assert_eq!(name, "inner::nope"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn dynamic_value_stack() {
        let sym = LispSymbol::uninterned("x");
        assert!(matches!(sym.dynamic_value(), Ok(None)));
        assert!(sym.set_dynamic(LispValue::Integer(1)).is_err());
        sym.push_dynamic(LispValue::Integer(1));
        sym.push_dynamic(LispValue::Integer(2));
        assert_eq!(sym.dynamic_value().unwrap(), Some(LispValue::Integer(2)));
        sym.set_dynamic(LispValue::Integer(3)).unwrap();
        assert_eq!(sym.pop_dynamic(), Some(LispValue::Integer(3)));
        assert_eq!(sym.dynamic_value().unwrap(), Some(LispValue::Integer(1)));
        sym.pop_dynamic();
        assert!(matches!(sym.dynamic_value(), Err(LispError::CorruptedSymbol(_))));
    }

    #[test]
    fn current_package_follows_binding() {
        let registry = PackageRegistry::new();
        assert_eq!(&registry.current(), registry.root());
        let other = LispPackage::new("other");
        registry.known().current_package.push_dynamic(LispValue::Package(other.clone()));
        assert_eq!(registry.current(), other);
        assert_eq!(registry.resolve("y").unwrap(), other.intern("y"));
    }
}
