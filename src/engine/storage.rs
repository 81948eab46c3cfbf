//! Durable intermediate files.
//!
//! Layout: the 8-byte magic `ICRUNCH1`, then per record a little-endian `u32`
//! length followed by the record encoded with its [`PType`], then a 32-byte
//! SHA-256 of everything before it. Files are written to `<location>.partial`
//! and renamed into place on commit, so a reader never sees a half-written
//! file under the final name; readers still verify the trailer.

use crate::types::PType;
use crate::value::Value;
use anyhow::{Context, Result, bail, ensure};
use sha2::{Digest, Sha256};
use std::fs::{self, File, create_dir_all};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 8] = b"ICRUNCH1";
const DIGEST_LEN: usize = 32;

fn partial_path(location: &Path) -> PathBuf {
    let mut s = location.as_os_str().to_os_string();
    s.push(".partial");
    PathBuf::from(s)
}

/// Encode `values` and commit them atomically at `location`.
pub fn write_records(location: &str, ptype: &PType, values: &[Value]) -> Result<()> {
    let path = Path::new(location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        create_dir_all(parent).with_context(|| format!("mkdir -p {}", parent.display()))?;
    }
    let partial = partial_path(path);
    let f = File::create(&partial).with_context(|| format!("create {}", partial.display()))?;
    let mut w = BufWriter::new(f);
    let mut hasher = Sha256::new();

    let mut put = |bytes: &[u8], w: &mut BufWriter<File>| -> Result<()> {
        hasher.update(bytes);
        w.write_all(bytes)
            .with_context(|| format!("write {}", partial.display()))
    };
    put(MAGIC, &mut w)?;
    for (i, v) in values.iter().enumerate() {
        let rec = ptype
            .encode(v)
            .with_context(|| format!("encode record #{i} as {ptype}"))?;
        let len = u32::try_from(rec.len()).context("record larger than 4 GiB")?;
        put(&len.to_le_bytes(), &mut w)?;
        put(&rec, &mut w)?;
    }
    let digest = hasher.finalize();
    w.write_all(&digest)?;
    w.flush()?;
    drop(w);

    fs::rename(&partial, path)
        .with_context(|| format!("commit {} -> {}", partial.display(), path.display()))?;
    Ok(())
}

/// Read and verify a committed file.
pub fn read_records(location: &str, ptype: &PType) -> Result<Vec<Value>> {
    let bytes = fs::read(location).with_context(|| format!("read {location}"))?;
    ensure!(
        bytes.len() >= MAGIC.len() + DIGEST_LEN,
        "{location}: truncated ({} bytes)",
        bytes.len()
    );
    let (body, trailer) = bytes.split_at(bytes.len() - DIGEST_LEN);
    if Sha256::digest(body).as_slice() != trailer {
        bail!("{location}: checksum mismatch");
    }
    ensure!(body.starts_with(MAGIC), "{location}: bad magic");

    let mut rest = &body[MAGIC.len()..];
    let mut out = Vec::new();
    while !rest.is_empty() {
        ensure!(rest.len() >= 4, "{location}: truncated record header");
        let (len, tail) = rest.split_at(4);
        let len = u32::from_le_bytes([len[0], len[1], len[2], len[3]]) as usize;
        ensure!(tail.len() >= len, "{location}: truncated record");
        let (rec, tail) = tail.split_at(len);
        out.push(
            ptype
                .decode(rec)
                .with_context(|| format!("{location}: decode record #{}", out.len()))?,
        );
        rest = tail;
    }
    Ok(out)
}

/// Remove both the committed file and any leftover partial write.
pub fn remove(location: &str) -> Result<()> {
    let path = Path::new(location);
    for p in [path.to_path_buf(), partial_path(path)] {
        match fs::remove_file(&p) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("remove {}", p.display())),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Family;
    use tempfile::tempdir;

    #[test]
    fn records_round_trip_and_tamper_is_detected() -> Result<()> {
        let dir = tempdir()?;
        let loc = dir.path().join("p0").display().to_string();
        let f = Family::Binary;
        let t = f.table_of(&f.strings(), &f.longs())?;
        let vals = vec![Value::pair("a", 1i64), Value::pair("b", 2i64)];

        write_records(&loc, &t, &vals)?;
        assert!(!partial_path(Path::new(&loc)).exists());
        assert_eq!(read_records(&loc, &t)?, vals);

        let mut bytes = fs::read(&loc)?;
        bytes[MAGIC.len() + 5] ^= 0xff;
        fs::write(&loc, bytes)?;
        let err = read_records(&loc, &t).unwrap_err();
        assert!(err.to_string().contains("checksum"));
        Ok(())
    }

    #[test]
    fn empty_file_is_valid() -> Result<()> {
        let dir = tempdir()?;
        let loc = dir.path().join("empty").display().to_string();
        let t = Family::Json.strings();
        write_records(&loc, &t, &[])?;
        assert!(read_records(&loc, &t)?.is_empty());
        remove(&loc)?;
        assert!(!Path::new(&loc).exists());
        Ok(())
    }
}
