use std::collections::HashSet;

use lasso::{Rodeo, Spur};

/// A name as written, paired with its scope-qualified form
/// (`outer.inner.name`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol {
    pub local: Spur,
    pub qualified: Spur,
}

/// A user function visible to call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Function {
    pub symbol: Symbol,
    pub arity: usize,
}

/// One function definition currently being generated.
#[derive(Debug, Clone, Copy)]
struct Frame {
    function: Symbol,
    // scope stack heights when the body started
    variables_base: usize,
    functions_base: usize,
}

#[derive(thiserror::Error, Debug)]
#[error("function already defined")]
pub struct AlreadyDefined;

/// The compile-time view of what is bound where.
///
/// Variables live on a LIFO stack that is unwound back to its height at
/// function entry when the function body ends. Functions are visible from
/// their definition until the end of the enclosing body.
#[derive(Debug, Default)]
pub struct Scopes {
    rodeo: Rodeo,
    variables: Vec<Symbol>,
    functions: Vec<Function>,
    frames: Vec<Frame>,
    /// every qualified function name handed out, so labels stay unique
    defined: HashSet<Spur>,
}

impl Scopes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, spur: Spur) -> &str {
        self.rodeo.resolve(&spur)
    }

    /// How many function bodies enclose the current position.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    fn qualify(&mut self, local: &str) -> Symbol {
        let mut qualified = String::new();
        for frame in &self.frames {
            qualified.push_str(self.rodeo.resolve(&frame.function.local));
            qualified.push('.');
        }
        qualified.push_str(local);
        Symbol {
            local: self.rodeo.get_or_intern(local),
            qualified: self.rodeo.get_or_intern(qualified),
        }
    }

    /// Introduces a new binding of `local` in the innermost scope.
    pub fn bind(&mut self, local: &str) -> Symbol {
        let symbol = self.qualify(local);
        self.variables.push(symbol);
        symbol
    }

    /// Finds the innermost live binding of `local`.
    pub fn variable(&self, local: &str) -> Option<Symbol> {
        let spur = self.rodeo.get(local)?;
        self.variables
            .iter()
            .rev()
            .find(|symbol| symbol.local == spur)
            .copied()
    }

    pub fn function(&self, local: &str) -> Option<Function> {
        let spur = self.rodeo.get(local)?;
        self.functions
            .iter()
            .rev()
            .find(|function| function.symbol.local == spur)
            .copied()
    }

    /// Registers a function in the current scope and opens its body.
    ///
    /// The function is registered before the body opens so the body can
    /// call it.
    pub fn enter_function(&mut self, local: &str, arity: usize) -> Result<Symbol, AlreadyDefined> {
        let symbol = self.qualify(local);
        if !self.defined.insert(symbol.qualified) {
            return Err(AlreadyDefined);
        }
        self.functions.push(Function { symbol, arity });
        self.frames.push(Frame {
            function: symbol,
            variables_base: self.variables.len(),
            functions_base: self.functions.len(),
        });
        Ok(symbol)
    }

    /// Bindings made since the innermost function began, innermost first.
    pub fn frame_bindings(&self) -> Vec<Symbol> {
        let base = self.frames.last().map_or(0, |frame| frame.variables_base);
        self.variables[base..].iter().rev().copied().collect()
    }

    /// Closes the innermost function body, returning the function and the
    /// bindings that went out of scope (innermost first).
    pub fn exit_function(&mut self) -> Option<(Symbol, Vec<Symbol>)> {
        let frame = self.frames.pop()?;
        let released = self
            .variables
            .drain(frame.variables_base..)
            .rev()
            .collect();
        self.functions.truncate(frame.functions_base);
        Some((frame.function, released))
    }
}
