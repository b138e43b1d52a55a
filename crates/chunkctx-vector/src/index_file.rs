//! Durable index file and the load-or-rebuild policy.
//!
//! Layout (little endian):
//! `magic "CKVX" | version u16 | reserved u16 | dim u32 | nlist u32 | nprobe u32 |
//!  count u64 | fingerprint [32] | centroids f32[nlist*dim] |
//!  per list: len u32, ids i64[len], vectors f32[len*dim] | blake3 of all preceding bytes [32]`
//!
//! Every vector is stored next to its chunk id; nothing is positional.
use std::io::Write;
use std::path::Path;

use chunkctx_core::error::{Error, Result};
use chunkctx_core::traits::CorpusStore;
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::index::{fingerprint_ids, InvertedList, VectorIndex};
use crate::index_build::{build, IvfParams};

pub const INDEX_MAGIC: [u8; 4] = *b"CKVX";
pub const INDEX_VERSION: u16 = 1;
const HEADER_LEN: usize = 4 + 2 + 2 + 4 + 4 + 4 + 8 + 32;
const CHECKSUM_LEN: usize = 32;

/// Why `load_or_build` did not use the file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildReason {
    Missing,
    /// The corpus' embedded id set changed since the file was written.
    Stale,
    Unreadable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexSource {
    Loaded,
    Rebuilt(RebuildReason),
}

impl VectorIndex {
    pub fn to_bytes(&self) -> Vec<u8> {
        let count = self.len();
        let mut buf = Vec::with_capacity(HEADER_LEN + (self.nlist() + count) * self.dim * 4 + count * 12 + CHECKSUM_LEN);
        buf.extend_from_slice(&INDEX_MAGIC);
        buf.extend_from_slice(&INDEX_VERSION.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&(self.dim as u32).to_le_bytes());
        buf.extend_from_slice(&(self.nlist() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.nprobe as u32).to_le_bytes());
        buf.extend_from_slice(&(count as u64).to_le_bytes());
        buf.extend_from_slice(&self.fingerprint);
        for c in &self.centroids {
            put_f32s(&mut buf, c);
        }
        for list in &self.lists {
            buf.extend_from_slice(&(list.ids.len() as u32).to_le_bytes());
            for id in &list.ids {
                buf.extend_from_slice(&id.to_le_bytes());
            }
            put_f32s(&mut buf, &list.vectors);
        }
        let checksum = blake3::hash(&buf);
        buf.extend_from_slice(checksum.as_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
            return Err(Error::CorruptIndex(format!("file too short ({} bytes)", bytes.len())));
        }
        let (body, trailer) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
        if blake3::hash(body).as_bytes() != trailer {
            return Err(Error::CorruptIndex("checksum mismatch".into()));
        }

        let mut r = ByteReader { buf: body, pos: 0 };
        if r.take(4)? != INDEX_MAGIC {
            return Err(Error::CorruptIndex("bad magic".into()));
        }
        let version = r.u16()?;
        if version != INDEX_VERSION {
            return Err(Error::CorruptIndex(format!("unsupported version {version}")));
        }
        let _reserved = r.u16()?;
        let dim = r.u32()? as usize;
        let nlist = r.u32()? as usize;
        let nprobe = r.u32()? as usize;
        let count = r.u64()? as usize;
        let mut fingerprint = [0u8; 32];
        fingerprint.copy_from_slice(r.take(32)?);
        if dim == 0 || nlist == 0 {
            return Err(Error::CorruptIndex(format!("invalid shape dim={dim} nlist={nlist}")));
        }

        let mut centroids = Vec::with_capacity(nlist);
        for _ in 0..nlist {
            centroids.push(r.f32s(dim)?);
        }
        let mut lists = Vec::with_capacity(nlist);
        let mut seen = 0usize;
        for _ in 0..nlist {
            let len = r.u32()? as usize;
            let mut ids = Vec::with_capacity(len);
            for _ in 0..len {
                ids.push(r.i64()?);
            }
            let vectors = r.f32s(len * dim)?;
            seen += len;
            lists.push(InvertedList { ids, vectors });
        }
        if seen != count {
            return Err(Error::CorruptIndex(format!("header says {count} vectors, lists hold {seen}")));
        }
        if r.pos != body.len() {
            return Err(Error::CorruptIndex("trailing bytes after last list".into()));
        }
        Ok(VectorIndex { dim, nprobe: nprobe.clamp(1, nlist), centroids, lists, fingerprint })
    }

    /// Writes atomically: a temp file in the target directory, then rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(&self.to_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(format!("index file {}", path.display())),
            _ => Error::Io(e),
        })?;
        Self::from_bytes(&bytes)
    }
}

/// Loads the index at `path`, rebuilding from `store` (and persisting) when
/// the file is missing, unreadable, or built from a different id set.
pub fn load_or_build(path: &Path, store: &dyn CorpusStore, params: &IvfParams) -> Result<(VectorIndex, IndexSource)> {
    let reason = if path.exists() {
        match VectorIndex::load(path) {
            Ok(index) => {
                let current = fingerprint_ids(&store.list_embedded_ids()?);
                if &current == index.fingerprint() {
                    info!(path = %path.display(), vectors = index.len(), "vector index loaded");
                    return Ok((index.with_nprobe(params.nprobe), IndexSource::Loaded));
                }
                RebuildReason::Stale
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "index file unreadable");
                RebuildReason::Unreadable(e.to_string())
            }
        }
    } else {
        RebuildReason::Missing
    };

    info!(path = %path.display(), ?reason, "rebuilding vector index");
    let index = build(store.list_all_embedded_chunks()?, params)?;
    index.save(path)?;
    Ok((index, IndexSource::Rebuilt(reason)))
}

fn put_f32s(buf: &mut Vec<u8>, values: &[f32]) {
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
}

struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.buf.len());
        match end {
            Some(end) => {
                let out = &self.buf[self.pos..end];
                self.pos = end;
                Ok(out)
            }
            None => Err(Error::CorruptIndex(format!("truncated at byte {}", self.pos))),
        }
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16> { Ok(u16::from_le_bytes(self.array()?)) }

    fn u32(&mut self) -> Result<u32> { Ok(u32::from_le_bytes(self.array()?)) }

    fn u64(&mut self) -> Result<u64> { Ok(u64::from_le_bytes(self.array()?)) }

    fn i64(&mut self) -> Result<i64> { Ok(i64::from_le_bytes(self.array()?)) }

    fn f32s(&mut self, n: usize) -> Result<Vec<f32>> {
        let bytes = self.take(n.checked_mul(4).ok_or_else(|| Error::CorruptIndex("length overflow".into()))?)?;
        Ok(bytes.chunks_exact(4).map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])).collect())
    }
}
