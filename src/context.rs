use std::io::{self, Write};
use std::sync::Arc;
use cfg_if::cfg_if;
use derivative::Derivative;
use parking_lot::Mutex;
use tracing::{debug, warn};
use crate::{LispError, LispValue, Result};
use crate::backend::InstructionEmitter;
use crate::env::LispEnv;
use crate::eval::eval;
use crate::package::PackageRegistry;
use crate::parser::LispParser;

cfg_if! {
    if #[cfg(feature = "io-stdlib")] {
        fn default_output() -> Box<dyn Write> {
            Box::new(io::stdout())
        }
    } else {
        fn default_output() -> Box<dyn Write> {
            Box::new(io::sink())
        }
    }
}

/// What [`LispContext::run`] does after a top-level form fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Report the error and skip every remaining form.
    #[default]
    AbortRemaining,
    /// Report the error and go on with the next top-level form.
    ContinueNextForm,
}

/// Everything evaluation needs besides the lexical environment: the symbol
/// registry, where printed and emitted text goes, and the native backend.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct LispContext {
    registry: PackageRegistry,
    #[derivative(Debug = "ignore")]
    output: Box<dyn Write>,
    #[derivative(Debug = "ignore")]
    emitter: Option<Box<dyn Write>>,
    #[derivative(Debug = "ignore")]
    backend: Option<Box<dyn InstructionEmitter>>,
    policy: ErrorPolicy,
}

impl LispContext {
    /// A fresh registry with every builtin registered and `t`, `nil` and
    /// `*current-package*` bound.
    pub fn new() -> Self {
        let registry = PackageRegistry::new();
        crate::builtins::bootstrap(&registry);
        LispContext {
            registry,
            output: default_output(),
            emitter: None,
            backend: None,
            policy: ErrorPolicy::default(),
        }
    }

    pub fn with_output(mut self, output: impl Write + 'static) -> Self {
        self.output = Box::new(output);
        self
    }

    /// Sink for `emit`. Without one, emitted text goes to the output.
    pub fn with_emitter(mut self, emitter: impl Write + 'static) -> Self {
        self.emitter = Some(Box::new(emitter));
        self
    }

    pub fn with_backend(mut self, backend: impl InstructionEmitter + 'static) -> Self {
        self.backend = Some(Box::new(backend));
        self
    }

    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn registry(&self) -> &PackageRegistry {
        &self.registry
    }

    pub fn policy(&self) -> ErrorPolicy {
        self.policy
    }

    pub fn output(&mut self) -> &mut dyn Write {
        &mut *self.output
    }

    pub fn emitter(&mut self) -> &mut dyn Write {
        match &mut self.emitter {
            Some(emitter) => &mut **emitter,
            None => &mut *self.output,
        }
    }

    pub fn backend(&mut self) -> Result<&mut dyn InstructionEmitter> {
        match &mut self.backend {
            Some(backend) => Ok(&mut **backend),
            None => Err(LispError::NoBackend),
        }
    }

    /// `t` or `nil`.
    pub fn truth(&self, cond: bool) -> LispValue {
        if cond {
            self.registry.known().t.clone().into()
        } else {
            LispValue::Nil
        }
    }

    pub fn parse_all(&self, source: &str) -> Result<Vec<LispValue>> {
        LispParser::parse_all(source, &self.registry)
    }

    /// Reads and evaluates every form of `source` in one top-level
    /// environment, stopping at the first error. Returns the value of the
    /// last form, `nil` if there were none.
    pub fn eval_source(&mut self, source: &str) -> Result<LispValue> {
        let forms = self.parse_all(source)?;
        let mut env = LispEnv::new();
        let mut last = LispValue::Nil;
        for form in forms.iter() {
            last = eval(form, &mut env, self)?;
        }
        Ok(last)
    }

    /// Runs a whole program the way the driver does: the source is read in
    /// full, then each form is evaluated in order. Errors are written to the
    /// output and handled according to the context's [`ErrorPolicy`]; the
    /// returned error is only ever a failure to write that report.
    pub fn run(&mut self, source: &str) -> Result<()> {
        let forms = match self.parse_all(source) {
            Ok(forms) => forms,
            Err(err) => return self.report(err),
        };
        let mut env = LispEnv::new();
        for form in forms.iter() {
            debug!(form = %form.inspect(), "evaluating top-level form");
            if let Err(err) = eval(form, &mut env, self) {
                self.report(err)?;
                if self.policy() == ErrorPolicy::AbortRemaining {
                    break;
                }
            }
        }
        self.output.flush()?;
        Ok(())
    }

    fn report(&mut self, err: LispError) -> Result<()> {
        warn!(error = %err, "top-level form failed");
        writeln!(self.output, "Err: {}", err)?;
        self.output.flush()?;
        Ok(())
    }
}

impl Default for LispContext {
    fn default() -> Self {
        Self::new()
    }
}

/// An in-memory sink that stays readable after being handed to a context.
#[derive(Clone, Debug, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
