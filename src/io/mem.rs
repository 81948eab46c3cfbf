//! In-memory collaborators.

use super::{Source, Target};
use crate::types::PType;
use crate::value::Value;
use anyhow::Result;
use std::sync::{Arc, Mutex, PoisonError};

/// A fixed list of elements.
#[derive(Clone, Debug)]
pub struct MemSource {
    ptype: PType,
    values: Arc<Vec<Value>>,
}

impl MemSource {
    pub fn new<I, V>(ptype: PType, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            ptype,
            values: Arc::new(values.into_iter().map(Into::into).collect()),
        }
    }
}

impl Source for MemSource {
    fn ptype(&self) -> PType {
        self.ptype.clone()
    }

    fn read(&self) -> Result<Vec<Value>> {
        Ok(self.values.as_ref().clone())
    }

    fn describe(&self) -> String {
        format!("mem[{}]", self.values.len())
    }
}

/// Collects written elements in a shared buffer. Clones share the buffer, so
/// keep one clone to inspect what the pipeline wrote.
#[derive(Clone, Debug)]
pub struct MemTarget {
    name: String,
    ptype: PType,
    buf: Arc<Mutex<Vec<Value>>>,
}

impl MemTarget {
    pub fn new(name: &str, ptype: PType) -> Self {
        Self {
            name: name.to_string(),
            ptype,
            buf: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Everything written so far, in write order.
    #[must_use]
    pub fn contents(&self) -> Vec<Value> {
        self.buf
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Target for MemTarget {
    fn ptype(&self) -> PType {
        self.ptype.clone()
    }

    fn location(&self) -> String {
        format!("mem://{}", self.name)
    }

    fn write(&self, values: Vec<Value>) -> Result<()> {
        self.buf
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(values);
        Ok(())
    }
}
