use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use im::HashMap;
use parking_lot::RwLock;
use crate::{LispError, LispValue, Result};
use crate::package::LispSymbol;

struct Layer {
    data: RwLock<HashMap<LispSymbol, LispValue>>,
    enclosing: Option<Arc<Layer>>,
}

/// A lexical environment: a chain of binding layers, innermost first.
///
/// Layers are shared by every closure created while they were on top, so
/// cloning a `LispEnv` never copies bindings. The set of symbols a layer
/// binds is fixed when it is pushed; `setq` may update the value in place.
#[derive(Clone, Default)]
pub struct LispEnv {
    top: Option<Arc<Layer>>,
}

/// The environment a user function or macro closed over.
#[derive(Clone, Debug)]
pub struct LispClosure(LispEnv);

impl LispClosure {
    pub fn make_env(&self) -> LispEnv {
        self.0.clone()
    }
}

impl LispEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.layers().count()
    }

    fn layers(&self) -> impl Iterator<Item = &Layer> {
        std::iter::successors(self.top.as_deref(), |layer| layer.enclosing.as_deref())
    }

    pub fn make_closure(&self) -> LispClosure {
        LispClosure(self.clone())
    }

    /// Innermost lexical binding of `sym`, ignoring its dynamic value.
    pub fn get(&self, sym: &LispSymbol) -> Option<LispValue> {
        self.layers().find_map(|layer| layer.data.read().get(sym).cloned())
    }

    pub fn is_bound(&self, sym: &LispSymbol) -> bool {
        self.layers().any(|layer| layer.data.read().contains_key(sym))
    }

    /// Value of `sym` as seen by evaluation: the innermost lexical binding,
    /// falling back to the symbol's dynamic value.
    pub fn lookup(&self, sym: &LispSymbol) -> Result<LispValue> {
        if let Some(val) = self.get(sym) {
            return Ok(val);
        }
        sym.dynamic_value()?
            .ok_or_else(|| LispError::UndefinedVariable(sym.name().to_owned()))
    }

    /// Updates the innermost existing lexical binding of `sym`. Returns
    /// `false` if no layer binds it.
    pub fn set(&self, sym: &LispSymbol, val: LispValue) -> bool {
        for layer in self.layers() {
            let mut data = layer.data.write();
            if let Some(slot) = data.get_mut(sym) {
                *slot = val;
                return true;
            }
        }
        false
    }

    /// Pushes one layer holding `bindings`. The layer is popped when the
    /// returned guard is dropped, whichever way the caller leaves its scope.
    pub fn push_layer<I>(&mut self, bindings: I) -> LayerGuard<'_>
    where
        I: IntoIterator<Item = (LispSymbol, LispValue)>,
    {
        let saved = self.top.clone();
        self.top = Some(Arc::new(Layer {
            data: RwLock::new(bindings.into_iter().collect()),
            enclosing: saved.clone(),
        }));
        LayerGuard { env: self, saved }
    }
}

impl fmt::Debug for LispEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let layers: Vec<Vec<String>> = self
            .layers()
            .map(|layer| layer.data.read().keys().map(|sym| sym.name().to_owned()).collect())
            .collect();
        f.debug_struct("LispEnv").field("layers", &layers).finish()
    }
}

/// Scope guard returned by [`LispEnv::push_layer`].
pub struct LayerGuard<'a> {
    env: &'a mut LispEnv,
    saved: Option<Arc<Layer>>,
}

impl Deref for LayerGuard<'_> {
    type Target = LispEnv;
    fn deref(&self) -> &LispEnv {
        self.env
    }
}

impl DerefMut for LayerGuard<'_> {
    fn deref_mut(&mut self) -> &mut LispEnv {
        self.env
    }
}

impl Drop for LayerGuard<'_> {
    fn drop(&mut self) {
        self.env.top = self.saved.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(name: &str) -> LispSymbol {
        LispSymbol::uninterned(name)
    }

    #[test]
    fn shadowing() {
        let x = sym("x");
        let mut env = LispEnv::new();
        let mut outer = env.push_layer(vec![(x.clone(), 1.into())]);
        assert_eq!(outer.get(&x), Some(1.into()));
        {
            let inner = outer.push_layer(vec![(x.clone(), 2.into())]);
            assert_eq!(inner.get(&x), Some(2.into()));
            assert_eq!(inner.depth(), 2);
        }
        assert_eq!(outer.get(&x), Some(1.into()));
        assert_eq!(outer.depth(), 1);
        drop(outer);
        assert_eq!(env.depth(), 0);
        assert!(env.get(&x).is_none());
    }

    #[test]
    fn guard_pops_on_early_return() {
        fn fails(env: &mut LispEnv, x: &LispSymbol) -> Result<()> {
            let scope = env.push_layer(vec![(x.clone(), 1.into())]);
            scope.lookup(&sym("unbound"))?;
            Ok(())
        }
        let x = sym("x");
        let mut env = LispEnv::new();
        assert!(fails(&mut env, &x).is_err());
        assert_eq!(env.depth(), 0);
        assert!(!env.is_bound(&x));
    }

    #[test]
    fn lookup_falls_back_to_dynamic() {
        let x = sym("x");
        let env = LispEnv::new();
        assert!(matches!(env.lookup(&x), Err(LispError::UndefinedVariable(_))));
        x.push_dynamic(7.into());
        assert_eq!(env.lookup(&x).unwrap(), 7.into());
    }

    #[test]
    fn closures_keep_their_layers() {
        let x = sym("x");
        let mut env = LispEnv::new();
        let closure = {
            let scope = env.push_layer(vec![(x.clone(), 1.into())]);
            scope.make_closure()
        };
        assert!(env.get(&x).is_none());
        assert_eq!(closure.make_env().get(&x), Some(1.into()));
    }

    #[test]
    fn set_updates_shared_layer() {
        let x = sym("x");
        let mut env = LispEnv::new();
        let scope = env.push_layer(vec![(x.clone(), 1.into())]);
        let closure = scope.make_closure();
        assert!(scope.set(&x, 5.into()));
        assert_eq!(closure.make_env().get(&x), Some(5.into()));
        assert!(!scope.set(&sym("y"), 5.into()));
    }
}
