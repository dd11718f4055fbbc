use crate::handle::Handle;
use crate::sync::FrameIndex;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

pub struct PipelineTag;
pub type PipelineHandle = Handle<PipelineTag>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    TriangleList,
    TriangleStrip,
    LineList,
    PointList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub enabled: bool,
    pub src_factor: u8,
    pub dst_factor: u8,
}

impl Default for BlendState {
    fn default() -> Self {
        Self {
            enabled: false,
            src_factor: 0,
            dst_factor: 0,
        }
    }
}

/// The wire-level tuple exchanged with the client: enough to intern and
/// hash a pipeline without touching a live shader-program object.
#[derive(Debug, Clone, Hash)]
pub struct PipelineDescriptor {
    pub shader_program: u64,
    pub vertex_format_hash: u64,
    pub topology: PrimitiveTopology,
    pub blend_per_target: Vec<BlendState>,
    pub rasterizer_state_hash: u64,
    pub alpha_to_coverage: bool,
    /// Folds in the primitive-restart-index flag from the ambient
    /// supplement: the GFXDevice header keys pipeline state on topology
    /// plus a format hash that already includes this bit.
    pub primitive_restart: bool,
}

impl Default for PipelineDescriptor {
    fn default() -> Self {
        Self {
            shader_program: 0,
            vertex_format_hash: 0,
            topology: PrimitiveTopology::TriangleList,
            blend_per_target: Vec::new(),
            rasterizer_state_hash: 0,
            alpha_to_coverage: false,
            primitive_restart: false,
        }
    }
}

impl PipelineDescriptor {
    pub fn content_hash(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

struct CacheEntry {
    handle: PipelineHandle,
    last_used_frame: FrameIndex,
}

/// Interns pipelines by descriptor hash. First reference builds the
/// backend object (via `build`); later references with an equal hash
/// return the cached handle. Eviction is frame-based LRU once the cache
/// exceeds `high_watermark`.
pub struct PipelineCache<P> {
    by_hash: HashMap<u64, CacheEntry>,
    objects: crate::handle::Pool<P>,
    high_watermark: usize,
    hits: u64,
    misses: u64,
}

impl<P> PipelineCache<P> {
    pub fn new(high_watermark: usize) -> Self {
        Self {
            by_hash: HashMap::new(),
            objects: crate::handle::Pool::default(),
            high_watermark,
            hits: 0,
            misses: 0,
        }
    }

    /// Returns the cached handle for `descriptor`, building a new backend
    /// object via `build` on a miss.
    pub fn get_or_create(
        &mut self,
        descriptor: &PipelineDescriptor,
        current_frame: FrameIndex,
        build: impl FnOnce() -> P,
    ) -> PipelineHandle {
        let hash = descriptor.content_hash();
        if let Some(entry) = self.by_hash.get_mut(&hash) {
            entry.last_used_frame = current_frame;
            self.hits += 1;
            return entry.handle;
        }
        self.misses += 1;
        let handle = self.objects.insert(build());
        self.by_hash.insert(
            hash,
            CacheEntry {
                handle,
                last_used_frame: current_frame,
            },
        );
        if self.by_hash.len() > self.high_watermark {
            self.evict_oldest();
        }
        handle
    }

    pub fn get(&self, handle: PipelineHandle) -> Option<&P> {
        self.objects.get(handle)
    }

    fn evict_oldest(&mut self) {
        let Some((&oldest_hash, _)) = self
            .by_hash
            .iter()
            .min_by_key(|(_, entry)| entry.last_used_frame)
        else {
            return;
        };
        if let Some(entry) = self.by_hash.remove(&oldest_hash) {
            self.objects.remove(entry.handle);
        }
    }

    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_hash_descriptors_share_a_handle() {
        let mut cache: PipelineCache<u32> = PipelineCache::new(16);
        let d1 = PipelineDescriptor::default();
        let d2 = PipelineDescriptor::default();
        let mut build_calls = 0;
        let h1 = cache.get_or_create(&d1, 0, || {
            build_calls += 1;
            42
        });
        let h2 = cache.get_or_create(&d2, 1, || {
            build_calls += 1;
            43
        });
        assert_eq!(h1, h2);
        assert_eq!(build_calls, 1);
        assert_eq!(cache.stats(), (1, 1));
    }

    #[test]
    fn watermark_evicts_lru() {
        let mut cache: PipelineCache<u32> = PipelineCache::new(1);
        let mut d0 = PipelineDescriptor::default();
        d0.shader_program = 0;
        let mut d1 = PipelineDescriptor::default();
        d1.shader_program = 1;
        cache.get_or_create(&d0, 0, || 0);
        cache.get_or_create(&d1, 1, || 1);
        assert_eq!(cache.len(), 1);
    }
}
