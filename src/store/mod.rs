//! Process-lifetime store of ingested documents.
//!
//! Each document id owns a slot:
//!
//! ```text
//! FrameStore ── RwLock<HashMap<id, Arc<DocumentSlot>>>
//!                                      ├─ writer: Arc<Mutex<()>>   (one ingestion at a time)
//!                                      ├─ state:  Pending | Ready(Arc<DocumentRecord>)
//!                                      └─ flattened: memoized overlay
//! ```
//!
//! A record is published in one step once every frame is encoded, so readers
//! never observe a partially populated document. Published records are
//! immutable and shared by `Arc`; the flattened overlay is the only thing
//! added afterwards.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

use crate::checksum::Checksum;
use crate::error::FrameError;
use crate::format::{EyeSide, SourceFile, SourceFormat};

// =============================================================================
// Records
// =============================================================================

/// Normalized representative slice kept for on-demand flattening.
#[derive(Debug, Clone)]
pub struct MiddleSlice {
    pub index: usize,
    pub raster: Array2<u8>,
}

/// Frames of a single-volume document.
#[derive(Debug, Clone, Default)]
pub struct VolumeFrames {
    pub frames: BTreeMap<u32, Bytes>,

    /// Source bytes, kept so the flattened slice can be re-derived
    pub raw_container: Option<SourceFile>,

    pub middle_slice: Option<MiddleSlice>,
}

/// Image keys of one eye, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EyeGroup {
    /// Fundus photographs
    pub raw: Vec<String>,

    /// Tomography slices, original and flattened
    pub tomography: Vec<String>,
}

impl EyeGroup {
    /// Every key of the group, raw images first.
    pub fn keys(&self) -> Vec<String> {
        self.raw.iter().chain(&self.tomography).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.raw.len() + self.tomography.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Left/right grouping reported to viewers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EyeTree {
    pub left_eye: EyeGroup,
    pub right_eye: EyeGroup,
}

impl EyeTree {
    pub fn group(&self, side: EyeSide) -> &EyeGroup {
        match side {
            EyeSide::Left => &self.left_eye,
            EyeSide::Right => &self.right_eye,
        }
    }

    pub fn group_mut(&mut self, side: EyeSide) -> &mut EyeGroup {
        match side {
            EyeSide::Left => &mut self.left_eye,
            EyeSide::Right => &mut self.right_eye,
        }
    }
}

/// Frames of a dual-eye document, addressed by key.
#[derive(Debug, Clone, Default)]
pub struct DualEyeFrames {
    pub images: HashMap<String, Bytes>,

    /// Keys in frame-index order
    pub order: Vec<String>,

    pub eyes: EyeTree,
}

impl DualEyeFrames {
    /// Add an image under `side`, as raw or tomography.
    pub fn insert(&mut self, side: EyeSide, key: String, image: Bytes, tomography: bool) {
        let group = self.eyes.group_mut(side);
        if tomography {
            group.tomography.push(key.clone());
        } else {
            group.raw.push(key.clone());
        }
        self.order.push(key.clone());
        self.images.insert(key, image);
    }
}

/// What a document holds.
#[derive(Debug, Clone)]
pub enum DocumentContent {
    Volume(VolumeFrames),
    DualEye(DualEyeFrames),
}

/// A fully ingested document.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub document_id: String,
    pub checksum: Checksum,
    pub format: SourceFormat,
    pub created_at: DateTime<Utc>,
    pub content: DocumentContent,
}

impl DocumentRecord {
    pub fn new(
        document_id: impl Into<String>,
        checksum: Checksum,
        format: SourceFormat,
        content: DocumentContent,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            checksum,
            format,
            created_at: Utc::now(),
            content,
        }
    }

    pub fn frame_count(&self) -> usize {
        match &self.content {
            DocumentContent::Volume(volume) => volume.frames.len(),
            DocumentContent::DualEye(eyes) => eyes.order.len(),
        }
    }

    /// Frame by integer index; dual-eye documents index their key order.
    pub fn frame(&self, index: u32) -> Option<Bytes> {
        match &self.content {
            DocumentContent::Volume(volume) => volume.frames.get(&index).cloned(),
            DocumentContent::DualEye(eyes) => eyes
                .order
                .get(index as usize)
                .and_then(|key| eyes.images.get(key))
                .cloned(),
        }
    }
}

/// Readiness of a document id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Readiness {
    pub ready: bool,
    pub frame_count: usize,
}

// =============================================================================
// Slots
// =============================================================================

#[derive(Debug)]
enum SlotState {
    Pending,
    Ready(Arc<DocumentRecord>),
}

#[derive(Debug)]
struct DocumentSlot {
    writer: Arc<Mutex<()>>,
    state: RwLock<SlotState>,
    flattened: RwLock<Option<Bytes>>,
}

impl DocumentSlot {
    fn new() -> Self {
        Self {
            writer: Arc::new(Mutex::new(())),
            state: RwLock::new(SlotState::Pending),
            flattened: RwLock::new(None),
        }
    }
}

// =============================================================================
// FrameStore
// =============================================================================

/// In-memory documents keyed by id.
#[derive(Debug, Default)]
pub struct FrameStore {
    documents: RwLock<HashMap<String, Arc<DocumentSlot>>>,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, document_id: &str) -> Option<Arc<DocumentSlot>> {
        self.documents.read().await.get(document_id).cloned()
    }

    async fn slot_or_insert(&self, document_id: &str) -> Arc<DocumentSlot> {
        if let Some(slot) = self.slot(document_id).await {
            return slot;
        }
        let mut documents = self.documents.write().await;
        documents
            .entry(document_id.to_string())
            .or_insert_with(|| Arc::new(DocumentSlot::new()))
            .clone()
    }

    /// Serialize writers of one document id.
    ///
    /// Creates the slot if needed; the returned guard is held for the whole
    /// ingestion or derived-frame computation.
    pub async fn lock_writer(&self, document_id: &str) -> OwnedMutexGuard<()> {
        // Cloned under the map lock so `abandon` can count queued writers
        let existing = self
            .documents
            .read()
            .await
            .get(document_id)
            .map(|slot| slot.writer.clone());
        let writer = match existing {
            Some(writer) => writer,
            None => self
                .documents
                .write()
                .await
                .entry(document_id.to_string())
                .or_insert_with(|| Arc::new(DocumentSlot::new()))
                .writer
                .clone(),
        };
        writer.lock_owned().await
    }

    /// Mark a document as being ingested.
    ///
    /// A previously published record stays visible until the new one is
    /// completed.
    pub async fn begin(&self, document_id: &str) {
        self.slot_or_insert(document_id).await;
        debug!(document_id, "Document ingestion started");
    }

    /// Publish a fully populated record, replacing any earlier one.
    pub async fn complete(&self, record: DocumentRecord) -> Arc<DocumentRecord> {
        let slot = self.slot_or_insert(&record.document_id).await;
        let record = Arc::new(record);
        *slot.state.write().await = SlotState::Ready(record.clone());
        *slot.flattened.write().await = None;
        debug!(
            document_id = %record.document_id,
            frames = record.frame_count(),
            "Document published"
        );
        record
    }

    /// Drop a slot whose ingestion failed, unless it already holds a record.
    ///
    /// Called by the current writer. The slot is kept while other writers
    /// are queued on it, so they keep sharing its lock.
    pub async fn abandon(&self, document_id: &str) {
        let mut documents = self.documents.write().await;
        let Some(slot) = documents.get(document_id).cloned() else {
            return;
        };
        if !matches!(*slot.state.read().await, SlotState::Pending) {
            return;
        }

        // One reference from the slot, one from the caller's guard
        let queued = Arc::strong_count(&slot.writer).saturating_sub(2);
        if queued == 0 {
            documents.remove(document_id);
            debug!(document_id, "Abandoned pending document");
        } else {
            debug!(document_id, queued, "Pending document kept for queued writers");
        }
    }

    /// The published record for a document.
    pub async fn record(&self, document_id: &str) -> Result<Arc<DocumentRecord>, FrameError> {
        let not_found = || FrameError::DocumentNotFound {
            document_id: document_id.to_string(),
        };
        let slot = self.slot(document_id).await.ok_or_else(not_found)?;
        let state = slot.state.read().await;
        match &*state {
            SlotState::Ready(record) => Ok(record.clone()),
            SlotState::Pending => Err(FrameError::NotReady {
                document_id: document_id.to_string(),
            }),
        }
    }

    pub async fn frame(&self, document_id: &str, index: u32) -> Result<Bytes, FrameError> {
        self.record(document_id)
            .await?
            .frame(index)
            .ok_or_else(|| FrameError::FrameNotFound {
                document_id: document_id.to_string(),
                frame: index.to_string(),
            })
    }

    /// A keyed auxiliary image of a dual-eye document.
    pub async fn aux_frame(&self, document_id: &str, key: &str) -> Result<Bytes, FrameError> {
        let record = self.record(document_id).await?;
        let image = match &record.content {
            DocumentContent::DualEye(eyes) => eyes.images.get(key).cloned(),
            DocumentContent::Volume(_) => None,
        };
        image.ok_or_else(|| FrameError::FrameNotFound {
            document_id: document_id.to_string(),
            frame: key.to_string(),
        })
    }

    /// Ordered keys of one eye, raw images first.
    pub async fn eye_frames(&self, document_id: &str, side: EyeSide) -> Result<Vec<String>, FrameError> {
        Ok(self.eye_tree(document_id).await?.group(side).keys())
    }

    pub async fn eye_tree(&self, document_id: &str) -> Result<EyeTree, FrameError> {
        let record = self.record(document_id).await?;
        match &record.content {
            DocumentContent::DualEye(eyes) => Ok(eyes.eyes.clone()),
            DocumentContent::Volume(_) => Err(FrameError::NotDualEye {
                document_id: document_id.to_string(),
            }),
        }
    }

    /// Whether a document is published, and with how many frames.
    pub async fn is_ready(&self, document_id: &str) -> Readiness {
        match self.record(document_id).await {
            Ok(record) => Readiness {
                ready: true,
                frame_count: record.frame_count(),
            },
            Err(_) => Readiness {
                ready: false,
                frame_count: 0,
            },
        }
    }

    pub async fn frame_indices(&self, document_id: &str) -> Result<Vec<u32>, FrameError> {
        let record = self.record(document_id).await?;
        Ok(match &record.content {
            DocumentContent::Volume(volume) => volume.frames.keys().copied().collect(),
            DocumentContent::DualEye(eyes) => (0..eyes.order.len() as u32).collect(),
        })
    }

    pub async fn flattened(&self, document_id: &str) -> Option<Bytes> {
        let slot = self.slot(document_id).await?;
        let flattened = slot.flattened.read().await;
        flattened.clone()
    }

    /// Memoize the flattened overlay of a published document.
    pub async fn set_flattened(&self, document_id: &str, image: Bytes) -> Result<(), FrameError> {
        self.record(document_id).await?;
        if let Some(slot) = self.slot(document_id).await {
            *slot.flattened.write().await = Some(image);
        }
        Ok(())
    }

    pub async fn remove(&self, document_id: &str) -> bool {
        self.documents.write().await.remove(document_id).is_some()
    }

    /// Number of document slots, pending ones included.
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every document.
    pub async fn clear(&self) {
        let mut documents = self.documents.write().await;
        let count = documents.len();
        documents.clear();
        debug!(count, "Frame store cleared");
    }
}

// =============================================================================
// Tests
// =============================================================================
