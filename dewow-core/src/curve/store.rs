//! On-disk speed curves.
//!
//! Each curve is a NumPy `.npy` v1.0 file holding a C-order `<f8` array of
//! shape `(n, 2)` with columns `(time_seconds, frequency_hz)`. Block curves
//! are named `<stem>_<index:03>.npy`, the whole-file curve `<stem>.npy`, both
//! next to the traced source.

use std::borrow::Cow;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{BlockCurve, CurveProvider, SpeedCurve, SpeedPoint};
use crate::error::{DewowError, Result};

const NPY_MAGIC: &[u8] = b"\x93NUMPY";
/// Header alignment required by the format.
const NPY_ALIGN: usize = 64;

#[derive(Debug, Clone)]
pub struct CurveStore {
    dir: PathBuf,
    stem: String,
}

impl CurveStore {
    pub fn new(dir: impl Into<PathBuf>, stem: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            stem: stem.into(),
        }
    }

    /// Store that keeps curves next to `source`, named after its file stem.
    pub fn for_source(source: &Path) -> Self {
        let dir = source
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new(dir, stem)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn block_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}_{index:03}.npy", self.stem))
    }

    pub fn whole_path(&self) -> PathBuf {
        self.dir.join(format!("{}.npy", self.stem))
    }

    pub fn save_block(&self, block: &BlockCurve) -> Result<PathBuf> {
        let path = self.block_path(block.index);
        write_npy(&path, block.curve.points())?;
        debug!(index = block.index, path = %path.display(), points = block.curve.len(), "saved block curve");
        Ok(path)
    }

    pub fn save_whole(&self, curve: &SpeedCurve) -> Result<PathBuf> {
        let path = self.whole_path();
        write_npy(&path, curve.points())?;
        debug!(path = %path.display(), points = curve.len(), "saved whole-file curve");
        Ok(path)
    }

    pub fn load_whole(&self) -> Result<SpeedCurve> {
        read_npy(&self.whole_path()).map(SpeedCurve::new)
    }

    /// Block curve files in this store, sorted by their embedded index.
    pub fn discover(&self) -> Result<Vec<(usize, PathBuf)>> {
        let prefix = format!("{}_", self.stem);
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(digits) = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".npy"))
            else {
                continue;
            };
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }
            if let Ok(index) = digits.parse::<usize>() {
                found.push((index, path));
            }
        }
        found.sort_by_key(|(index, _)| *index);
        Ok(found)
    }

    /// Load block `index`'s curve.
    ///
    /// # Errors
    /// `DewowError::MissingCurve` when no file for `index` exists,
    /// `DewowError::MalformedCurve` naming the block when its file is unreadable.
    pub fn load_block(&self, index: usize) -> Result<SpeedCurve> {
        let path = self.block_path(index);
        if path.is_file() {
            return read_block(index, &path);
        }
        // tolerate other zero-padding widths
        match self.discover()?.into_iter().find(|(i, _)| *i == index) {
            Some((_, path)) => read_block(index, &path),
            None => Err(DewowError::MissingCurve { block: index }),
        }
    }
}

impl CurveProvider for CurveStore {
    fn block_curve(&self, index: usize) -> Result<Cow<'_, SpeedCurve>> {
        let curve = self.load_block(index)?;
        debug!(index, points = curve.len(), "loaded block curve");
        Ok(Cow::Owned(curve))
    }
}

fn read_block(index: usize, path: &Path) -> Result<SpeedCurve> {
    read_npy(path).map(SpeedCurve::new).map_err(|err| match err {
        DewowError::MalformedCurve { path, reason, .. } => DewowError::MalformedCurve {
            block: Some(index),
            path,
            reason,
        },
        other => other,
    })
}

/// Write `points` as an `(n, 2)` little-endian f64 array.
pub fn write_npy(path: &Path, points: &[SpeedPoint]) -> Result<()> {
    let mut header = format!(
        "{{'descr': '<f8', 'fortran_order': False, 'shape': ({}, 2), }}",
        points.len()
    );
    // magic(6) + version(2) + header_len(2) + header + '\n'
    let unpadded = NPY_MAGIC.len() + 4 + header.len() + 1;
    let padding = (NPY_ALIGN - unpadded % NPY_ALIGN) % NPY_ALIGN;
    header.push_str(&" ".repeat(padding));
    header.push('\n');
    let header_len = u16::try_from(header.len())
        .map_err(|_| DewowError::InvalidConfig("npy header too long".into()))?;

    let mut w = BufWriter::new(fs::File::create(path)?);
    w.write_all(NPY_MAGIC)?;
    w.write_all(&[1, 0])?;
    w.write_all(&header_len.to_le_bytes())?;
    w.write_all(header.as_bytes())?;
    for p in points {
        w.write_all(&p.time.to_le_bytes())?;
        w.write_all(&p.frequency.to_le_bytes())?;
    }
    w.flush()?;
    Ok(())
}

/// Read an `(n, 2)` `<f8` array written by [`write_npy`] or NumPy.
pub fn read_npy(path: &Path) -> Result<Vec<SpeedPoint>> {
    let malformed = |reason: &str| DewowError::MalformedCurve {
        block: None,
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };
    let bytes = fs::read(path)?;
    if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
        return Err(malformed("not an npy file"));
    }
    let (header_len, header_start) = match bytes[6] {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 if bytes.len() >= 12 => (
            u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
            12,
        ),
        _ => return Err(malformed("unsupported npy version")),
    };
    let data_start = header_start + header_len;
    if bytes.len() < data_start {
        return Err(malformed("truncated header"));
    }
    let header = std::str::from_utf8(&bytes[header_start..data_start])
        .map_err(|_| malformed("header is not text"))?;

    if header_value(header, "descr").map(|v| v.trim_matches(|c| c == '\'' || c == '"'))
        != Some("<f8")
    {
        return Err(malformed("expected dtype <f8"));
    }
    if header_value(header, "fortran_order") != Some("False") {
        return Err(malformed("expected C order"));
    }
    let rows = header_value(header, "shape")
        .and_then(parse_shape)
        .ok_or_else(|| malformed("expected shape (n, 2)"))?;

    let data = &bytes[data_start..];
    if data.len() != rows * 16 {
        return Err(malformed("data length does not match shape"));
    }
    Ok(data
        .chunks_exact(16)
        .map(|row| {
            let mut t = [0u8; 8];
            let mut f = [0u8; 8];
            t.copy_from_slice(&row[..8]);
            f.copy_from_slice(&row[8..]);
            SpeedPoint::new(f64::from_le_bytes(t), f64::from_le_bytes(f))
        })
        .collect())
}

/// Raw value of `'key': value` in an npy header dict.
fn header_value<'h>(header: &'h str, key: &str) -> Option<&'h str> {
    let pattern = format!("'{key}':");
    let rest = header[header.find(&pattern)? + pattern.len()..].trim_start();
    let end = if rest.starts_with('(') {
        rest.find(')')? + 1
    } else {
        rest.find([',', '}'])?
    };
    Some(rest[..end].trim())
}

/// Rows of a `(n, 2)` shape tuple.
fn parse_shape(shape: &str) -> Option<usize> {
    let inner = shape.strip_prefix('(')?.strip_suffix(')')?;
    let dims: Vec<&str> = inner
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .collect();
    match dims.as_slice() {
        [rows, "2"] => rows.parse().ok(),
        _ => None,
    }
}
