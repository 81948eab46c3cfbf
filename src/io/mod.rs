//! Source and target collaborators.
//!
//! The pipeline only ever sees these two traits: a [`Source`] yields a finite
//! sequence of elements of a declared [`PType`] and may be re-read from the
//! start; a [`Target`] accepts a sequence and names its destination.
//!
//! Adapters shipped with the crate:
//! - [`mem`]: in-memory source and target, mostly for tests.
//! - [`text`] (feature `io-text`): line-oriented text files.

pub mod mem;

#[cfg_attr(docsrs, doc(cfg(feature = "io-text")))]
#[cfg(feature = "io-text")]
pub mod text;

use crate::types::PType;
use crate::value::Value;
use anyhow::Result;

pub use mem::{MemSource, MemTarget};
#[cfg(feature = "io-text")]
pub use text::{TextFileSource, TextFileTarget};

pub trait Source: Send + Sync {
    fn ptype(&self) -> PType;

    /// Read the whole input from the start. May be called more than once.
    fn read(&self) -> Result<Vec<Value>>;

    fn describe(&self) -> String {
        "source".to_string()
    }
}

pub trait Target: Send + Sync {
    fn ptype(&self) -> PType;

    /// Destination, reported as the stage output location.
    fn location(&self) -> String;

    fn write(&self, values: Vec<Value>) -> Result<()>;
}
