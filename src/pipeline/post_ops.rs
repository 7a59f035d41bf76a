use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::pipeline::inspect::{decode, encode_png, InspectError, Raster};

mod pixel_ops;

pub type PostOpParams = Map<String, Value>;

/// Pure raster transform registered under an operation id.
pub type PostOpApply = fn(&Raster, &PostOpParams) -> Result<Raster, PostOpError>;

#[derive(Clone)]
pub struct PostOp {
    pub label: String,
    pub apply: PostOpApply,
}

impl std::fmt::Debug for PostOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostOp").field("label", &self.label).finish()
    }
}

/// One step of a pipeline: the operation id and its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostOpSpec {
    #[serde(alias = "operationId", alias = "operation_id")]
    pub id: String,
    #[serde(default)]
    pub params: PostOpParams,
}

impl PostOpSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            params: PostOpParams::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum PostOpError {
    #[error(transparent)]
    Image(#[from] InspectError),
    #[error("invalid params for post-op '{op}': {message}")]
    InvalidParams { op: String, message: String },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PostOpDescriptor {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRun {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
}

/// Operation id to transform. Unknown ids are a lookup miss, not an error.
#[derive(Debug, Clone)]
pub struct PostOpRegistry {
    ops: BTreeMap<String, PostOp>,
}

impl Default for PostOpRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("trim", "Trim transparent", pixel_ops::trim);
        registry.register("resize", "Resize (nearest)", pixel_ops::resize);
        registry.register("chroma", "Chroma key", pixel_ops::chroma);
        registry
    }
}

impl PostOpRegistry {
    pub fn empty() -> Self {
        Self {
            ops: BTreeMap::new(),
        }
    }

    /// Adds or replaces an operation.
    pub fn register(&mut self, id: impl Into<String>, label: impl Into<String>, apply: PostOpApply) {
        self.ops.insert(
            id.into(),
            PostOp {
                label: label.into(),
                apply,
            },
        );
    }

    pub fn get(&self, id: &str) -> Option<&PostOp> {
        self.ops.get(id)
    }

    pub fn descriptors(&self) -> Vec<PostOpDescriptor> {
        self.ops
            .iter()
            .map(|(id, op)| PostOpDescriptor {
                id: id.clone(),
                label: op.label.clone(),
            })
            .collect()
    }

    /// Threads the raster through `ops` in order, skipping unknown ids.
    pub fn apply_all(
        &self,
        source: Raster,
        ops: &[PostOpSpec],
    ) -> Result<(Raster, Vec<String>, Vec<String>), PostOpError> {
        let mut raster = source;
        let mut applied = Vec::new();
        let mut skipped = Vec::new();
        for step in ops {
            let Some(op) = self.get(step.id.as_str()) else {
                warn!(op = %step.id, "skipping unknown post-op");
                skipped.push(step.id.clone());
                continue;
            };
            raster = (op.apply)(&raster, &step.params)?;
            debug!(
                op = %step.id,
                width = raster.width(),
                height = raster.height(),
                "applied post-op"
            );
            applied.push(step.id.clone());
        }
        Ok((raster, applied, skipped))
    }

    /// Decodes once, applies every step, encodes once as PNG.
    pub fn run(&self, source_bytes: &[u8], ops: &[PostOpSpec]) -> Result<PipelineRun, PostOpError> {
        let source = decode(source_bytes)?;
        let (raster, applied, skipped) = self.apply_all(source, ops)?;
        let bytes = encode_png(&raster)?;
        Ok(PipelineRun {
            bytes,
            width: raster.width(),
            height: raster.height(),
            applied,
            skipped,
        })
    }
}

pub fn run_pipeline(source_bytes: &[u8], ops: &[PostOpSpec]) -> Result<Vec<u8>, PostOpError> {
    run_pipeline_with_registry(&PostOpRegistry::default(), source_bytes, ops)
}

pub fn run_pipeline_with_registry(
    registry: &PostOpRegistry,
    source_bytes: &[u8],
    ops: &[PostOpSpec],
) -> Result<Vec<u8>, PostOpError> {
    registry.run(source_bytes, ops).map(|run| run.bytes)
}

/// Raster-level entry point for callers that already hold a decoded image.
pub fn apply_ops_to_raster(
    registry: &PostOpRegistry,
    source: Raster,
    ops: &[PostOpSpec],
) -> Result<Raster, PostOpError> {
    registry.apply_all(source, ops).map(|(raster, _, _)| raster)
}
