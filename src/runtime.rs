//! Runtimes execute a compiled program (or its syntax tree directly) and
//! report interrupt output to a [`Host`].
pub mod treewalk;
pub mod vm;

use core::fmt;

pub use crate::ops::Interrupt;

/// Where interrupt output goes.
pub trait Host {
    fn print(&mut self, value: f64);
}

impl<H: Host + ?Sized> Host for &mut H {
    fn print(&mut self, value: f64) {
        (**self).print(value)
    }
}

/// Collects printed values, mostly for tests.
impl Host for Vec<f64> {
    fn print(&mut self, value: f64) {
        self.push(value);
    }
}

/// Prints `=> {value}` lines to standard error.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrHost;

impl Host for StderrHost {
    fn print(&mut self, value: f64) {
        eprintln!("{}", PrintedValue(value));
    }
}

/// The textual form of a printed value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrintedValue(pub f64);

impl fmt::Display for PrintedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "=> {}", self.0)
    }
}
