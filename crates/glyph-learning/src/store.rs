//! Durable proto-glyph state: one JSON document, replaced atomically
//!
//! Writes go to `<path>.tmp` and are renamed over the target, so a crash
//! mid-write leaves the previous document intact. Loading salvages what it
//! can: a malformed proto or promotion entry is skipped with a warning, while
//! a document that is not JSON at all, or that was written for a different
//! vector length, is refused.

use chrono::{DateTime, Utc};
use glyph_core::{AffectSpace, Error, PromotionRecord, ProtoGlyph, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

pub const STORE_VERSION: u32 = 1;

/// Everything the proto-glyph manager persists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    pub vector_dimensions: usize,
    pub next_seq: u64,
    pub protos: BTreeMap<String, ProtoGlyph>,
    pub promotions: Vec<PromotionRecord>,
    pub last_saved: Option<DateTime<Utc>>,
}

impl StoreSnapshot {
    pub fn empty(vector_dimensions: usize) -> Self {
        Self {
            version: STORE_VERSION,
            vector_dimensions,
            next_seq: 0,
            protos: BTreeMap::new(),
            promotions: Vec::new(),
            last_saved: None,
        }
    }

    /// Parse a stored document, skipping entries that do not fit `space`.
    pub fn parse(content: &str, space: &AffectSpace) -> Result<Self> {
        let raw: RawSnapshot = serde_json::from_str(content)
            .map_err(|e| Error::persistence(format!("unreadable proto store: {}", e)))?;

        if raw.vector_dimensions != space.dims() {
            return Err(Error::invalid_input(format!(
                "proto store was written for {} dimensions, configured for {}",
                raw.vector_dimensions,
                space.dims()
            )));
        }

        let mut protos = BTreeMap::new();
        let mut max_seq = None;
        for (id, value) in raw.protos {
            let proto: ProtoGlyph = match serde_json::from_value(value) {
                Ok(p) => p,
                Err(e) => {
                    warn!(proto_id = %id, "Skipping malformed proto entry: {}", e);
                    continue;
                }
            };
            if proto.id != id {
                warn!(proto_id = %id, "Skipping proto stored under a foreign key");
                continue;
            }
            if let Err(e) = space.check(&proto.vector) {
                warn!(proto_id = %id, "Skipping proto with bad vector: {}", e);
                continue;
            }
            if !in_unit_range(&proto) {
                warn!(
                    proto_id = %id,
                    confidence = proto.confidence,
                    "Skipping proto with values outside [0, 1]"
                );
                continue;
            }
            max_seq = max_seq.max(Some(proto.seq));
            protos.insert(id, proto);
        }

        let mut promotions = Vec::new();
        for (i, value) in raw.promotions.into_iter().enumerate() {
            match serde_json::from_value::<PromotionRecord>(value) {
                Ok(record) => promotions.push(record),
                Err(e) => warn!(index = i, "Skipping malformed promotion record: {}", e),
            }
        }

        // Never hand out a seq an existing proto already holds.
        let next_seq = raw.next_seq.max(max_seq.map_or(0, |s| s + 1));

        Ok(Self {
            version: raw.version,
            vector_dimensions: raw.vector_dimensions,
            next_seq,
            protos,
            promotions,
            last_saved: raw.last_saved,
        })
    }
}

fn in_unit_range(proto: &ProtoGlyph) -> bool {
    let unit = |x: f64| (0.0..=1.0).contains(&x);
    unit(proto.confidence) && proto.vector.as_slice().iter().all(|&c| unit(c))
}

/// Lenient shape used while loading; entries are decoded one by one.
#[derive(Deserialize)]
struct RawSnapshot {
    #[serde(default = "default_version")]
    version: u32,
    vector_dimensions: usize,
    #[serde(default)]
    next_seq: u64,
    #[serde(default)]
    protos: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    promotions: Vec<serde_json::Value>,
    #[serde(default)]
    last_saved: Option<DateTime<Utc>>,
}

fn default_version() -> u32 {
    STORE_VERSION
}

/// Narrow persistence interface behind the proto-glyph manager.
pub trait ProtoStore: Send + Sync {
    /// `None` when nothing has been stored yet.
    fn load(&self, space: &AffectSpace) -> Result<Option<StoreSnapshot>>;
    fn save(&self, snapshot: &StoreSnapshot) -> Result<()>;
    fn describe(&self) -> String;
}

/// JSON document on local disk.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProtoStore for JsonFileStore {
    fn load(&self, space: &AffectSpace) -> Result<Option<StoreSnapshot>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No proto store at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(Error::persistence(format!(
                    "cannot read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        StoreSnapshot::parse(&content, space).map(Some)
    }

    fn save(&self, snapshot: &StoreSnapshot) -> Result<()> {
        let json = serde_json::to_vec_pretty(snapshot)?;
        write_atomic(&self.path, &json)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-process store for tests and ephemeral hosts.
#[derive(Default)]
pub struct MemoryStore {
    snapshot: Mutex<Option<StoreSnapshot>>,
    fail_writes: std::sync::atomic::AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `save` fail, to exercise persistence failures.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Last successfully saved snapshot.
    pub fn saved(&self) -> Option<StoreSnapshot> {
        self.snapshot.lock().ok().and_then(|s| s.clone())
    }
}

impl ProtoStore for MemoryStore {
    fn load(&self, _space: &AffectSpace) -> Result<Option<StoreSnapshot>> {
        Ok(self.saved())
    }

    fn save(&self, snapshot: &StoreSnapshot) -> Result<()> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::persistence("memory store refusing writes"));
        }
        let mut slot = self
            .snapshot
            .lock()
            .map_err(|_| Error::persistence("memory store lock poisoned"))?;
        *slot = Some(snapshot.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".into()
    }
}

/// Write `bytes` to `<path>.tmp`, then rename over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            Error::persistence(format!("cannot create {}: {}", parent.display(), e))
        })?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)
        .map_err(|e| Error::persistence(format!("cannot write {}: {}", tmp.display(), e)))?;
    std::fs::rename(&tmp, path).map_err(|e| {
        Error::persistence(format!("cannot replace {}: {}", path.display(), e))
    })?;
    Ok(())
}
