//! On-disk persistence for the vector graph's point data.
//!
//! `hnsw_rs::Hnsw` ties a loaded graph's lifetime to its `HnswIo` loader in
//! a way that creates self-referential struct issues when the loader needs
//! to outlive the function that opened it — the same limitation the
//! teacher documents in `vector/hnsw.rs` ("`HnswIo::load_hnsw` has lifetime
//! constraints that create self-referential struct issues"). The teacher's
//! answer is to never load the graph and always rebuild it from embeddings
//! held by the row store. This crate has no row-store dependency, so it
//! keeps its own flat record of `(slot, vector)` pairs — `index.bin` — and
//! rebuilds the in-memory `Hnsw` graph from that on `initialize()`. This
//! makes `index.bin` self-contained rather than a literal `hnsw_rs` graph
//! dump, while still satisfying the "if files exist, load graph" and
//! the atomic-persist contract.

use std::fs;
use std::io::Read;
use std::path::Path;

use memoria_core::index_error::IndexError;
use memoria_core::error::Result;

pub const GRAPH_FILE: &str = "index.bin";
const MAGIC: &[u8; 4] = b"MIDX";
const FORMAT_VERSION: u32 = 1;

/// Writes `(slot, vector)` pairs via temp-file + rename for atomicity.
pub fn save(dir: &Path, dimension: usize, points: &[(usize, Vec<f32>)]) -> Result<()> {
    fs::create_dir_all(dir)?;
    let mut buf = Vec::with_capacity(16 + points.len() * (8 + dimension * 4));
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&(dimension as u32).to_le_bytes());
    buf.extend_from_slice(&(points.len() as u64).to_le_bytes());
    for (slot, vector) in points {
        buf.extend_from_slice(&(*slot as u64).to_le_bytes());
        for x in vector {
            buf.extend_from_slice(&x.to_le_bytes());
        }
    }
    let final_path = dir.join(GRAPH_FILE);
    let tmp_path = dir.join(format!("{GRAPH_FILE}.tmp"));
    fs::write(&tmp_path, &buf)?;
    fs::rename(&tmp_path, &final_path)?;
    Ok(())
}

/// Loads `(slot, vector)` pairs. Returns `None` if `index.bin` is absent —
/// a fresh index — and `IndexCorrupt` if the file exists but fails to
/// parse (magic mismatch, truncated, dimension inconsistency).
pub fn load(dir: &Path) -> Result<Option<Vec<(usize, Vec<f32>)>>> {
    let path = dir.join(GRAPH_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let mut file = fs::File::open(&path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    parse(&bytes).map(Some)
}

fn parse(bytes: &[u8]) -> Result<Vec<(usize, Vec<f32>)>> {
    let corrupt = |details: String| -> memoria_core::error::MemoriaError {
        IndexError::Corrupt { details }.into()
    };
    if bytes.len() < 16 {
        return Err(corrupt("index.bin truncated header".into()));
    }
    if &bytes[0..4] != MAGIC {
        return Err(corrupt("index.bin bad magic".into()));
    }
    let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    if version != FORMAT_VERSION {
        return Err(corrupt(format!("index.bin unsupported version {version}")));
    }
    let dimension = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
    if bytes.len() < 20 {
        return Err(corrupt("index.bin truncated count".into()));
    }
    let count = u64::from_le_bytes(bytes[12..20].try_into().unwrap());
    let mut cursor = 20usize;
    let record_len = 8 + dimension * 4;
    let mut points = Vec::new();
    for _ in 0..count {
        if cursor + record_len > bytes.len() {
            return Err(corrupt("index.bin truncated record".into()));
        }
        let slot = u64::from_le_bytes(bytes[cursor..cursor + 8].try_into().unwrap()) as usize;
        cursor += 8;
        let mut vector = Vec::with_capacity(dimension);
        for _ in 0..dimension {
            let chunk: [u8; 4] = bytes[cursor..cursor + 4].try_into().unwrap();
            vector.push(f32::from_le_bytes(chunk));
            cursor += 4;
        }
        points.push((slot, vector));
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_empty() {
        let dir = tempfile::tempdir().unwrap();
        save(dir.path(), 4, &[]).unwrap();
        let loaded = load(dir.path()).unwrap().unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn roundtrip_points() {
        let dir = tempfile::tempdir().unwrap();
        let points = vec![(0usize, vec![1.0, 2.0, 3.0]), (2usize, vec![4.0, 5.0, 6.0])];
        save(dir.path(), 3, &points).unwrap();
        let loaded = load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded, points);
    }

    #[test]
    fn missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn bad_magic_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(GRAPH_FILE), b"nope").unwrap();
        assert!(load(dir.path()).is_err());
    }
}
