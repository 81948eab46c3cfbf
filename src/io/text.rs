//! Line-oriented text files.
//!
//! [`TextFileSource`] yields one `string` element per line, blank lines
//! included, without the line terminator.
//! [`TextFileTarget`] writes one element per line using the element's text
//! rendering, so a `(key, value)` pair becomes `key<TAB>value`.

use super::{Source, Target};
use crate::types::{Family, PType};
use crate::value::Value;
use anyhow::{Context, Result};
use std::fs::{File, create_dir_all};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
pub struct TextFileSource {
    path: PathBuf,
    family: Family,
}

impl TextFileSource {
    /// Lines as `binary:string`; use [`in_family`](Self::in_family) to switch.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            family: Family::Binary,
        }
    }

    #[must_use]
    pub fn in_family(mut self, family: Family) -> Self {
        self.family = family;
        self
    }
}

impl Source for TextFileSource {
    fn ptype(&self) -> PType {
        self.family.strings()
    }

    fn read(&self) -> Result<Vec<Value>> {
        let path = &self.path;
        let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let mut out = Vec::new();
        for (i, line) in BufReader::new(f).lines().enumerate() {
            let line =
                line.with_context(|| format!("read line {} in {}", i + 1, path.display()))?;
            out.push(Value::Str(line));
        }
        Ok(out)
    }

    fn describe(&self) -> String {
        format!("text:{}", self.path.display())
    }
}

#[derive(Clone, Debug)]
pub struct TextFileTarget {
    path: PathBuf,
    ptype: PType,
}

impl TextFileTarget {
    pub fn new(path: impl AsRef<Path>, ptype: PType) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ptype,
        }
    }
}

impl Target for TextFileTarget {
    fn ptype(&self) -> PType {
        self.ptype.clone()
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }

    /// Creates parent directories if needed and replaces any existing file.
    fn write(&self, values: Vec<Value>) -> Result<()> {
        let path = &self.path;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            create_dir_all(parent).with_context(|| format!("mkdir -p {}", parent.display()))?;
        }
        let f = File::create(path).with_context(|| format!("create {}", path.display()))?;
        let mut w = BufWriter::new(f);
        for v in &values {
            writeln!(w, "{v}").with_context(|| format!("write {}", path.display()))?;
        }
        w.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lines_round_trip_through_files() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested/out.txt");
        let f = Family::Binary;
        let target = TextFileTarget::new(&path, f.pair_of(&f.strings(), &f.longs())?);
        target.write(vec![Value::pair("a", 1i64), Value::pair("b", 2i64)])?;

        let lines = TextFileSource::new(&path).read()?;
        assert_eq!(lines, vec![Value::from("a\t1"), Value::from("b\t2")]);
        Ok(())
    }

    #[test]
    fn blank_lines_are_elements_too() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("in.txt");
        std::fs::write(&path, "a b\n\n  \nc\r\n")?;

        let lines = TextFileSource::new(&path).read()?;
        assert_eq!(
            lines,
            vec![Value::from("a b"), Value::from(""), Value::from("  "), Value::from("c")]
        );
        Ok(())
    }
}
