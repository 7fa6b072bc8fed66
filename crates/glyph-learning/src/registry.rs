//! GlyphRegistry - promoted glyphs in insertion order
//!
//! Read-mostly. The consolidation pipeline is the only writer in a running
//! core; readers (orchestrator, host lookups) take a shared lock.

use crate::store::write_atomic;
use glyph_core::{AffectSpace, EmotionVector, Error, Glyph, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Default)]
struct RegistryInner {
    glyphs: Vec<Glyph>,
    by_name: HashMap<String, usize>,
}

pub struct GlyphRegistry {
    space: AffectSpace,
    inner: RwLock<RegistryInner>,
}

/// On-disk registry snapshot for cold-start reload.
#[derive(Serialize, Deserialize)]
struct RegistrySnapshot {
    vector_dimensions: usize,
    glyphs: Vec<Glyph>,
}

impl GlyphRegistry {
    pub fn new(space: AffectSpace) -> Self {
        Self {
            space,
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Register a glyph. Re-adding an identical record is a no-op that returns
    /// `false`; a different record under a taken name is `DuplicateName`.
    pub async fn add(&self, glyph: Glyph) -> Result<bool> {
        if glyph.name.trim().is_empty() {
            return Err(Error::invalid_input("glyph name is empty"));
        }
        self.space.check(&glyph.vector)?;
        glyph.gate.validate(&self.space)?;

        let mut inner = self.inner.write().await;
        if let Some(&i) = inner.by_name.get(&glyph.name) {
            if inner.glyphs[i] == glyph {
                return Ok(false);
            }
            return Err(Error::DuplicateName(glyph.name));
        }
        debug!(glyph = %glyph.name, "Registering glyph");
        let index = inner.glyphs.len();
        inner.by_name.insert(glyph.name.clone(), index);
        inner.glyphs.push(glyph);
        Ok(true)
    }

    pub async fn get(&self, name: &str) -> Option<Glyph> {
        let inner = self.inner.read().await;
        inner.by_name.get(name).map(|&i| inner.glyphs[i].clone())
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.inner.read().await.by_name.contains_key(name)
    }

    /// The `k` glyphs most similar to `vector`, best first; ties keep insertion order.
    pub async fn nearest(&self, vector: &EmotionVector, k: usize) -> Result<Vec<(Glyph, f64)>> {
        self.space.check(vector)?;
        let inner = self.inner.read().await;
        let mut scored: Vec<(usize, f64)> = inner
            .glyphs
            .iter()
            .enumerate()
            .map(|(i, g)| (i, g.vector.cosine(vector)))
            .collect();
        // Stable sort: equal similarities stay in insertion order.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored
            .into_iter()
            .take(k)
            .map(|(i, s)| (inner.glyphs[i].clone(), s))
            .collect())
    }

    /// Highest cosine similarity to any registered glyph, `None` when empty.
    pub async fn max_similarity(&self, vector: &EmotionVector) -> Result<Option<(String, f64)>> {
        Ok(self
            .nearest(vector, 1)
            .await?
            .into_iter()
            .next()
            .map(|(g, s)| (g.name, s)))
    }

    /// All glyphs in insertion order.
    pub async fn list(&self) -> Vec<Glyph> {
        self.inner.read().await.glyphs.clone()
    }

    pub async fn names(&self) -> Vec<String> {
        self.inner.read().await.glyphs.iter().map(|g| g.name.clone()).collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.glyphs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Reload glyphs from a snapshot. A missing file loads nothing.
    pub async fn load_snapshot(&self, path: &Path) -> Result<usize> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let snapshot: RegistrySnapshot = serde_json::from_str(&content)
            .map_err(|e| Error::persistence(format!("unreadable registry snapshot: {}", e)))?;
        if snapshot.vector_dimensions != self.space.dims() {
            return Err(Error::invalid_input(format!(
                "registry snapshot was written for {} dimensions, configured for {}",
                snapshot.vector_dimensions,
                self.space.dims()
            )));
        }
        let mut loaded = 0;
        for glyph in snapshot.glyphs {
            if self.add(glyph).await? {
                loaded += 1;
            }
        }
        info!("Loaded {} glyphs from {}", loaded, path.display());
        Ok(loaded)
    }

    pub async fn save_snapshot(&self, path: &Path) -> Result<()> {
        let snapshot = RegistrySnapshot {
            vector_dimensions: self.space.dims(),
            glyphs: self.list().await,
        };
        let json = serde_json::to_vec_pretty(&snapshot)?;
        write_atomic(path, &json)
    }
}
