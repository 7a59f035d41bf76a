use std::collections::VecDeque;

use crate::pipeline::generation::GenerationResult;
use crate::pipeline::post_ops::PostOpSpec;

pub const DEFAULT_ARTIFACT_CAPACITY: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub result: GenerationResult,
    pub processed: Option<Vec<u8>>,
    pub pipeline: Vec<PostOpSpec>,
}

impl Artifact {
    pub fn id(&self) -> &str {
        self.result.id.as_str()
    }
}

/// Most-recent-first store of generation outputs; the oldest entry falls off
/// once capacity is reached.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    capacity: usize,
    items: VecDeque<Artifact>,
}

impl Default for ArtifactStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_ARTIFACT_CAPACITY)
    }
}

impl ArtifactStore {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            items: VecDeque::new(),
        }
    }

    pub fn push(&mut self, result: GenerationResult) -> &Artifact {
        self.items.push_front(Artifact {
            result,
            processed: None,
            pipeline: Vec::new(),
        });
        self.items.truncate(self.capacity);
        &self.items[0]
    }

    pub fn get(&self, id: &str) -> Option<&Artifact> {
        self.items.iter().find(|a| a.id() == id)
    }

    pub fn latest(&self, count: usize) -> Vec<&Artifact> {
        self.items.iter().take(count).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Records a post-processed rendition; returns false when the id is gone.
    pub fn set_processed(&mut self, id: &str, processed: Vec<u8>, pipeline: Vec<PostOpSpec>) -> bool {
        match self.items.iter_mut().find(|a| a.id() == id) {
            Some(artifact) => {
                artifact.processed = Some(processed);
                artifact.pipeline = pipeline;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Artifact> {
        let idx = self.items.iter().position(|a| a.id() == id)?;
        self.items.remove(idx)
    }
}
