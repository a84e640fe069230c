//! The ingestion service and its query operations.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bytes::Bytes;
use ndarray::Array2;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{CachedFrames, EyeLayout, FrameCache, SourceDescriptor};
use crate::checksum::{checksum_of_bytes, Checksum, ChecksumService, ChecksumSource, RemoteDescriptor};
use crate::decode::DecoderRegistry;
use crate::error::{FrameError, IngestError, ReaderError};
use crate::flatten::{middle_index, to_gray, FlatteningEngine};
use crate::format::{
    detect_format, resolve_laterality, DualEyeExtraction, EyeSide, Extraction, FormatFamily,
    ReaderSet, SampleVolume, SourceFile, SourceFormat,
};
use crate::raster::{normalize, split_frames, FrameEncoder, WindowHint};
use crate::store::{
    DocumentContent, DocumentRecord, DualEyeFrames, EyeTree, FrameStore, MiddleSlice, Readiness,
    VolumeFrames,
};

use super::{
    fundus_key, oct_flattened_key, oct_original_key, CacheSource, CacheStatus, CompressionInfo,
    DocumentInfo, DocumentSummary, IngestRequest, SupportReport,
};

/// Bytes handed to format detection.
const DETECT_HEAD_LEN: usize = 256;

// =============================================================================
// Shared Build Results
// =============================================================================

/// Frames built once per checksum, shared by coalesced ingestions.
#[derive(Debug, Clone)]
struct BuiltDocument {
    content: DocumentContent,
    cache_source: CacheSource,
    compression: Option<CompressionInfo>,
}

/// `None` means no reader is registered for the format.
type BuildResult = Result<Option<Arc<BuiltDocument>>, IngestError>;

/// State for an in-flight build.
struct InFlightBuild {
    notify: Notify,
    result: Mutex<Option<BuildResult>>,
}

// =============================================================================
// IngestService
// =============================================================================

/// Orchestrates ingestion and serves document queries.
///
/// Every collaborator is shared by `Arc`, so CPU-bound stages can move
/// handles into `spawn_blocking` tasks.
///
/// An ingestion future that is dropped midway leaves followers of the same
/// checksum waiting; callers that may be cancelled (request handlers) run
/// `ingest` on a spawned task.
pub struct IngestService {
    store: Arc<FrameStore>,
    cache: Arc<FrameCache>,
    checksums: Arc<ChecksumService>,
    decoders: Arc<DecoderRegistry>,
    readers: ReaderSet,
    encoder: FrameEncoder,
    flattener: Arc<FlatteningEngine>,

    /// In-flight builds keyed by `{format}/{checksum}`
    in_flight: Mutex<HashMap<String, Arc<InFlightBuild>>>,
}

impl IngestService {
    /// A service over `cache` with the built-in readers and every compiled-in
    /// decoder backend.
    pub fn new(cache: FrameCache) -> Self {
        Self {
            store: Arc::new(FrameStore::new()),
            cache: Arc::new(cache),
            checksums: Arc::new(ChecksumService::new()),
            decoders: Arc::new(DecoderRegistry::detect()),
            readers: ReaderSet::builtin(),
            encoder: FrameEncoder::new(),
            flattener: Arc::new(FlatteningEngine::default()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_readers(mut self, readers: ReaderSet) -> Self {
        self.readers = readers;
        self
    }

    pub fn with_decoders(mut self, decoders: DecoderRegistry) -> Self {
        self.decoders = Arc::new(decoders);
        self
    }

    pub fn with_encoder(mut self, encoder: FrameEncoder) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn with_flattener(mut self, flattener: FlatteningEngine) -> Self {
        self.flattener = Arc::new(flattener);
        self
    }

    pub fn with_checksums(mut self, checksums: ChecksumService) -> Self {
        self.checksums = Arc::new(checksums);
        self
    }

    pub fn store(&self) -> &FrameStore {
        &self.store
    }

    pub fn cache(&self) -> &FrameCache {
        &self.cache
    }

    // =========================================================================
    // Ingestion
    // =========================================================================

    /// Ingest one container and publish it under a document id.
    ///
    /// Unrecognised or unprocessed formats are not an error: the summary
    /// reports [`CacheSource::NotSupported`] and nothing is published.
    pub async fn ingest(&self, request: IngestRequest) -> Result<DocumentSummary, IngestError> {
        let IngestRequest {
            document_id,
            source,
            checksum,
        } = request;
        let document_id = document_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let checksum = match checksum {
            Some(checksum) => checksum,
            None => {
                let bytes = source.bytes.clone();
                blocking(move || checksum_of_bytes(&bytes)).await?
            }
        };
        self.checksums.remember(source.name.clone(), checksum).await;

        let head = &source.bytes[..source.bytes.len().min(DETECT_HEAD_LEN)];
        let format = match detect_format(&source.name, head) {
            Some(format) if format.family() != FormatFamily::Unsupported => format,
            other => {
                info!(
                    document_id = %document_id,
                    file = %source.name,
                    format = ?other,
                    "Format not supported"
                );
                return Ok(not_supported(document_id, checksum, other));
            }
        };

        let _writer = self.store.lock_writer(&document_id).await;
        self.store.begin(&document_id).await;

        let built = match self.build_shared(checksum, format, &source).await {
            Ok(Some(built)) => built,
            Ok(None) => {
                self.store.abandon(&document_id).await;
                return Ok(not_supported(document_id, checksum, Some(format)));
            }
            Err(err) => {
                self.store.abandon(&document_id).await;
                warn!(document_id = %document_id, checksum = %checksum, error = %err, "Ingestion failed");
                return Err(err);
            }
        };

        let eyes = match &built.content {
            DocumentContent::DualEye(frames) => Some(frames.eyes.clone()),
            DocumentContent::Volume(_) => None,
        };
        let record = self
            .store
            .complete(DocumentRecord::new(
                document_id.clone(),
                checksum,
                format,
                built.content.clone(),
            ))
            .await;

        info!(
            document_id = %document_id,
            checksum = %checksum,
            format = format.tag(),
            frames = record.frame_count(),
            source = ?built.cache_source,
            "Document ingested"
        );

        Ok(DocumentSummary {
            document_id,
            checksum,
            format: Some(format),
            frame_count: record.frame_count(),
            cache_source: built.cache_source,
            compression: built.compression.clone(),
            eyes,
        })
    }

    /// Build frames for a checksum, coalescing concurrent callers.
    async fn build_shared(
        &self,
        checksum: Checksum,
        format: SourceFormat,
        source: &SourceFile,
    ) -> BuildResult {
        let key = format!("{}/{}", format.tag(), checksum);

        loop {
            let state = {
                let mut in_flight = self.in_flight.lock().await;

                if let Some(state) = in_flight.get(&key) {
                    state.clone()
                } else {
                    let state = Arc::new(InFlightBuild {
                        notify: Notify::new(),
                        result: Mutex::new(None),
                    });
                    in_flight.insert(key.clone(), state.clone());
                    drop(in_flight);

                    let result = self.build(checksum, format, source).await;

                    *state.result.lock().await = Some(result.clone());
                    self.in_flight.lock().await.remove(&key);
                    state.notify.notify_waiters();

                    return result;
                }
            };

            debug!(checksum = %checksum, "Waiting for in-flight build");

            // Register before checking so a completion in between is not missed
            let notified = state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let finished = state.result.lock().await.clone();
            if let Some(result) = finished {
                return result;
            }
            notified.await;
            let finished = state.result.lock().await.clone();
            if let Some(result) = finished {
                return result;
            }
        }
    }

    async fn build(&self, checksum: Checksum, format: SourceFormat, source: &SourceFile) -> BuildResult {
        if let Some(built) = self.load_cached(checksum, source).await {
            return Ok(Some(Arc::new(built)));
        }

        let Some(reader) = self.readers.get(format) else {
            warn!(format = format.tag(), "No reader registered for format");
            return Ok(None);
        };

        let extraction = reader.read(source).await?;
        let built = match extraction {
            Extraction::Container(container) => {
                let decoders = self.decoders.clone();
                let (volume, window, frames, compression) =
                    blocking(move || -> Result<_, IngestError> {
                        let decoded = decoders.decode(&container)?;
                        let compression = CompressionInfo {
                            label: decoded.encoding_label.to_string(),
                            is_compressed: decoded.compressed,
                            strategy: decoded.strategy.to_string(),
                        };
                        Ok((decoded.volume, container.window, container.layout.frames, compression))
                    })
                    .await??;
                self.build_volume(volume, window, frames, compression, source).await?
            }
            Extraction::Samples(volume) => {
                let (volume, frames) = unstack(volume);
                let compression = CompressionInfo {
                    label: "Uncompressed".to_string(),
                    is_compressed: false,
                    strategy: "reader".to_string(),
                };
                self.build_volume(volume, None, frames, compression, source).await?
            }
            Extraction::DualEye(extraction) => self.build_dual_eye(extraction, &source.name).await?,
        };

        self.store_in_cache(checksum, format, source, &built).await;
        Ok(Some(Arc::new(built)))
    }

    /// Rebuild a document from the persistent cache, if it holds a valid entry.
    async fn load_cached(&self, checksum: Checksum, source: &SourceFile) -> Option<BuiltDocument> {
        let cache = self.cache.clone();
        let CachedFrames { frames, metadata } = blocking(move || cache.get(checksum)).await.ok().flatten()?;
        let file_info = metadata.file_info;

        let (content, compression) = match file_info.eye_layout {
            Some(layout) => match rebuild_dual_eye(&frames, layout) {
                Some(eyes) => (DocumentContent::DualEye(eyes), None),
                None => {
                    warn!(checksum = %checksum, "Cached eye layout does not match frames, discarding");
                    let cache = self.cache.clone();
                    let _ = blocking(move || cache.remove(checksum)).await;
                    return None;
                }
            },
            None => {
                let compression = CompressionInfo {
                    label: file_info.compression_type,
                    is_compressed: file_info.is_compressed,
                    strategy: "cache".to_string(),
                };
                let volume = VolumeFrames {
                    frames,
                    raw_container: Some(source.clone()),
                    middle_slice: None,
                };
                (DocumentContent::Volume(volume), Some(compression))
            }
        };

        info!(checksum = %checksum, frames = metadata.number_of_frames, "Serving frames from disk cache");
        Some(BuiltDocument {
            content,
            cache_source: CacheSource::Disk,
            compression,
        })
    }

    async fn build_volume(
        &self,
        volume: SampleVolume,
        window: Option<WindowHint>,
        frame_count: usize,
        compression: CompressionInfo,
        source: &SourceFile,
    ) -> Result<BuiltDocument, IngestError> {
        let encoder = self.encoder;

        let (frames, middle_slice) = blocking(move || -> Result<_, IngestError> {
            if volume.is_empty() {
                return Err(IngestError::EmptyVolume);
            }

            let normalized = normalize(&volume, window)?;
            let rasters = split_frames(&normalized, frame_count);

            let mut frames = BTreeMap::new();
            for (index, raster) in rasters.iter().enumerate() {
                frames.insert(index as u32, encoder.encode_jpeg(raster.view())?);
            }

            let middle_slice = if rasters.len() > 1 {
                let index = middle_index(rasters.len());
                match to_gray(rasters[index].view()) {
                    Ok(raster) => Some(MiddleSlice { index, raster }),
                    Err(err) => {
                        warn!(error = %err, "Could not keep middle slice");
                        None
                    }
                }
            } else {
                None
            };

            Ok((frames, middle_slice))
        })
        .await??;

        debug!(
            frames = frames.len(),
            middle_slice = ?middle_slice.as_ref().map(|m| m.index),
            "Encoded volume frames"
        );

        // Without a middle slice the flattened view is re-derived from source
        let raw_container = middle_slice.is_none().then(|| source.clone());

        Ok(BuiltDocument {
            content: DocumentContent::Volume(VolumeFrames {
                frames,
                raw_container,
                middle_slice,
            }),
            cache_source: CacheSource::Fresh,
            compression: Some(compression),
        })
    }

    async fn build_dual_eye(
        &self,
        extraction: DualEyeExtraction,
        file_name: &str,
    ) -> Result<BuiltDocument, IngestError> {
        let encoder = self.encoder;
        let flattener = self.flattener.clone();
        let file_name = file_name.to_string();

        let frames =
            blocking(move || dual_eye_frames(extraction, &file_name, encoder, &flattener)).await?;
        if frames.order.is_empty() {
            return Err(IngestError::EmptyVolume);
        }

        debug!(
            left = frames.eyes.left_eye.len(),
            right = frames.eyes.right_eye.len(),
            "Encoded dual-eye images"
        );

        Ok(BuiltDocument {
            content: DocumentContent::DualEye(frames),
            cache_source: CacheSource::Fresh,
            compression: None,
        })
    }

    async fn store_in_cache(
        &self,
        checksum: Checksum,
        format: SourceFormat,
        source: &SourceFile,
        built: &BuiltDocument,
    ) {
        let (frames, eye_layout): (BTreeMap<u32, Bytes>, _) = match &built.content {
            DocumentContent::Volume(volume) => (volume.frames.clone(), None),
            DocumentContent::DualEye(eyes) => (
                (0u32..)
                    .zip(&eyes.order)
                    .filter_map(|(index, key)| eyes.images.get(key).map(|image| (index, image.clone())))
                    .collect(),
                Some(EyeLayout {
                    keys: eyes.order.clone(),
                    eyes: eyes.eyes.clone(),
                }),
            ),
        };

        let (compression_type, is_compressed) = match &built.compression {
            Some(info) => (info.label.clone(), info.is_compressed),
            None => ("Uncompressed".to_string(), false),
        };
        let descriptor = SourceDescriptor {
            name: source.name.clone(),
            size: source.bytes.len() as u64,
            compression_type,
            is_compressed,
            eye_layout,
        };

        let cache = self.cache.clone();
        match blocking(move || cache.put(checksum, format, &frames, descriptor)).await {
            Ok(true) => {}
            Ok(false) => warn!(checksum = %checksum, "Frames were not cached"),
            Err(err) => warn!(checksum = %checksum, error = %err, "Cache write task failed"),
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get_frame(&self, document_id: &str, index: u32) -> Result<Bytes, FrameError> {
        self.store.frame(document_id, index).await
    }

    pub async fn frame_indices(&self, document_id: &str) -> Result<Vec<u32>, FrameError> {
        self.store.frame_indices(document_id).await
    }

    pub async fn document_info(&self, document_id: &str) -> Result<DocumentInfo, FrameError> {
        let record = self.store.record(document_id).await?;
        Ok(DocumentInfo::from(record.as_ref()))
    }

    pub async fn is_ready(&self, document_id: &str) -> Readiness {
        self.store.is_ready(document_id).await
    }

    pub async fn eye_tree(&self, document_id: &str) -> Result<EyeTree, FrameError> {
        self.store.eye_tree(document_id).await
    }

    /// Ordered image keys of one eye, fundus first.
    pub async fn list_eye_frames(
        &self,
        document_id: &str,
        side: EyeSide,
    ) -> Result<Vec<String>, FrameError> {
        self.store.eye_frames(document_id, side).await
    }

    /// The `n`-th image of one eye, in [`list_eye_frames`](Self::list_eye_frames) order.
    pub async fn get_eye_frame(
        &self,
        document_id: &str,
        side: EyeSide,
        n: usize,
    ) -> Result<Bytes, FrameError> {
        let keys = self.store.eye_frames(document_id, side).await?;
        let key = keys.get(n).ok_or_else(|| FrameError::FrameNotFound {
            document_id: document_id.to_string(),
            frame: format!("{}/{}", side.code(), n),
        })?;
        self.store.aux_frame(document_id, key).await
    }

    pub async fn get_aux_frame(&self, document_id: &str, key: &str) -> Result<Bytes, FrameError> {
        self.store.aux_frame(document_id, key).await
    }

    /// Flattened PNG of a volume's representative cross-section.
    ///
    /// Computed on first request and memoized. The source slice is, in order
    /// of preference: the retained middle slice, the middle slice re-derived
    /// from the retained container bytes, or the stored middle frame.
    pub async fn get_flattened(&self, document_id: &str) -> Result<Bytes, FrameError> {
        let not_volume = || FrameError::NotVolume {
            document_id: document_id.to_string(),
        };

        let record = self.store.record(document_id).await?;
        if !matches!(record.content, DocumentContent::Volume(_)) {
            return Err(not_volume());
        }
        if let Some(image) = self.store.flattened(document_id).await {
            return Ok(image);
        }

        let _writer = self.store.lock_writer(document_id).await;
        if let Some(image) = self.store.flattened(document_id).await {
            return Ok(image);
        }

        // The record may have been replaced while waiting for the lock
        let record = self.store.record(document_id).await?;
        let DocumentContent::Volume(volume) = &record.content else {
            return Err(not_volume());
        };

        let slice = self
            .flatten_source(&record, volume)
            .await
            .ok_or_else(|| FrameError::NothingToFlatten {
                document_id: document_id.to_string(),
            })?;

        let flattener = self.flattener.clone();
        let encoder = self.encoder;
        let image = tokio::task::spawn_blocking(move || {
            let flat = flattener.flatten(slice.view().into_dyn());
            encoder.encode_png(flat.view())
        })
        .await
        .map_err(|e| FrameError::Internal(e.to_string()))??;

        self.store.set_flattened(document_id, image.clone()).await?;
        info!(document_id, bytes = image.len(), "Flattened cross-section ready");
        Ok(image)
    }

    async fn flatten_source(&self, record: &DocumentRecord, volume: &VolumeFrames) -> Option<Array2<u8>> {
        if let Some(middle) = &volume.middle_slice {
            return Some(middle.raster.clone());
        }

        if let Some(raw) = &volume.raw_container {
            match self.rederive_middle_slice(record.format, raw).await {
                Ok(slice) => return Some(slice),
                Err(err) => warn!(
                    document_id = %record.document_id,
                    error = %err,
                    "Could not re-derive middle slice, using stored frame"
                ),
            }
        }

        let (_, frame) = volume.frames.iter().nth(middle_index(volume.frames.len()))?;
        let frame = frame.clone();
        let encoder = self.encoder;
        match blocking(move || encoder.decode_gray(&frame)).await {
            Ok(Ok(slice)) => Some(slice),
            Ok(Err(err)) => {
                warn!(document_id = %record.document_id, error = %err, "Stored frame is not decodable");
                None
            }
            Err(err) => {
                warn!(document_id = %record.document_id, error = %err, "Frame decode task failed");
                None
            }
        }
    }

    async fn rederive_middle_slice(
        &self,
        format: SourceFormat,
        raw: &SourceFile,
    ) -> Result<Array2<u8>, IngestError> {
        let reader = self.readers.get(format).ok_or_else(|| ReaderError::Unsupported {
            reason: format!("no reader for {}", format.name()),
        })?;
        let extraction = reader.read(raw).await?;
        let decoders = self.decoders.clone();

        blocking(move || -> Result<Array2<u8>, IngestError> {
            let (normalized, frames) = match extraction {
                Extraction::Container(container) => {
                    let decoded = decoders.decode(&container)?;
                    (normalize(&decoded.volume, container.window)?, container.layout.frames)
                }
                Extraction::Samples(volume) => {
                    let (volume, frames) = unstack(volume);
                    (normalize(&volume, None)?, frames)
                }
                Extraction::DualEye(_) => {
                    return Err(IngestError::Internal(
                        "reader returned dual-eye images for a volume document".to_string(),
                    ))
                }
            };

            let rasters = split_frames(&normalized, frames);
            let middle = rasters
                .get(middle_index(rasters.len()))
                .ok_or(IngestError::EmptyVolume)?;
            to_gray(middle.view()).map_err(|e| IngestError::Internal(e.to_string()))
        })
        .await?
    }

    // =========================================================================
    // Maintenance and Status
    // =========================================================================

    /// Checksum for a remote object, preferring the path memo.
    pub async fn checksum_for_descriptor(
        &self,
        descriptor: &RemoteDescriptor,
    ) -> (Checksum, ChecksumSource) {
        self.checksums.checksum_for_descriptor(descriptor).await
    }

    pub async fn cache_status(&self) -> CacheStatus {
        let cache = self.cache.clone();
        let stats = blocking(move || cache.stats()).await.unwrap_or_default();

        CacheStatus {
            cache_dir: self.cache.root().display().to_string(),
            ttl_hours: self.cache.ttl().as_secs() / 3600,
            entries: stats.entries,
            total_bytes: stats.total_bytes,
            partitions: stats.partitions,
            documents: self.store.len().await,
            checksum_memo: self.checksums.memo_len().await,
        }
    }

    pub fn support_status(&self) -> SupportReport {
        SupportReport {
            decoders: self.decoders.support_status(),
            readers: self.readers.formats(),
        }
    }

    /// Delete cache entries older than the TTL.
    pub async fn evict_expired(&self) -> usize {
        let cache = self.cache.clone();
        let ttl = cache.ttl();
        match blocking(move || cache.evict_older_than(ttl)).await {
            Ok(removed) => removed,
            Err(err) => {
                warn!(error = %err, "Cache eviction task failed");
                0
            }
        }
    }

    /// Drop every in-memory document.
    pub async fn shutdown(&self) {
        let documents = self.store.len().await;
        self.store.clear().await;
        self.checksums.clear().await;
        info!(documents, "Frame store cleared");
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Run CPU-bound or blocking work off the async workers.
async fn blocking<F, T>(work: F) -> Result<T, IngestError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| IngestError::Internal(e.to_string()))
}

fn not_supported(
    document_id: String,
    checksum: Checksum,
    format: Option<SourceFormat>,
) -> DocumentSummary {
    DocumentSummary {
        document_id,
        checksum,
        format,
        frame_count: 0,
        cache_source: CacheSource::NotSupported,
        compression: None,
        eyes: None,
    }
}

/// Reader-decoded samples are `[rows, columns]` or a `[frames, rows, columns]`
/// stack. A one-frame stack is reduced to its only raster.
fn unstack(volume: SampleVolume) -> (SampleVolume, usize) {
    if volume.ndim() < 3 {
        return (volume, 1);
    }
    let frames = volume.shape()[0];
    if frames == 1 {
        if let Some(only) = volume.frame(0) {
            return (only, 1);
        }
    }
    (volume, frames)
}

fn rebuild_dual_eye(frames: &BTreeMap<u32, Bytes>, layout: EyeLayout) -> Option<DualEyeFrames> {
    if layout.keys.len() != frames.len() {
        return None;
    }

    let mut images = HashMap::with_capacity(layout.keys.len());
    for (index, key) in (0u32..).zip(&layout.keys) {
        images.insert(key.clone(), frames.get(&index)?.clone());
    }

    Some(DualEyeFrames {
        images,
        order: layout.keys,
        eyes: layout.eyes,
    })
}

/// Encode fundus photographs and tomogram middle slices, skipping failures.
fn dual_eye_frames(
    extraction: DualEyeExtraction,
    file_name: &str,
    encoder: FrameEncoder,
    flattener: &FlatteningEngine,
) -> DualEyeFrames {
    let mut frames = DualEyeFrames::default();

    for (index, fundus) in extraction.fundus.into_iter().enumerate() {
        let side = resolve_laterality(fundus.laterality, file_name);
        let key = fundus_key(side, index);
        let encoded = normalize(&fundus.samples, None)
            .map_err(IngestError::from)
            .and_then(|raster| encoder.encode_jpeg(raster.view()).map_err(IngestError::from));

        match encoded {
            Ok(image) => frames.insert(side, key, image, false),
            Err(err) => warn!(key = %key, error = %err, "Skipping fundus image"),
        }
    }

    for (index, tomogram) in extraction.tomograms.into_iter().enumerate() {
        let side = resolve_laterality(tomogram.laterality, file_name);
        match tomogram_images(&tomogram.volume, encoder, flattener) {
            Ok((original, flattened)) => {
                frames.insert(side, oct_original_key(side, index), original, true);
                frames.insert(side, oct_flattened_key(side, index), flattened, true);
            }
            Err(err) => warn!(side = side.code(), index, error = %err, "Skipping tomogram"),
        }
    }

    frames
}

/// Original and flattened JPEGs of a tomogram's middle B-scan.
fn tomogram_images(
    volume: &SampleVolume,
    encoder: FrameEncoder,
    flattener: &FlatteningEngine,
) -> Result<(Bytes, Bytes), IngestError> {
    // The B-scan is scaled by its own range, not the whole volume's
    let slice = if volume.ndim() >= 3 {
        let middle = volume
            .frame(middle_index(volume.shape()[0]))
            .ok_or(IngestError::EmptyVolume)?;
        normalize(&middle, None)?
    } else {
        normalize(volume, None)?
    };

    let original = encoder.encode_jpeg(slice.view())?;
    let flat = flattener.flatten(slice.view());
    let flattened = encoder.encode_jpeg(flat.view().into_dyn())?;
    Ok((original, flattened))
}

// =============================================================================
// Tests
// =============================================================================
