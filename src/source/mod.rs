//! VolumeSource: turns a tile key into per-z-slice fetches.
//!
//! The surrounding dataset/service layer supplies a request generator (which
//! URLs to fetch for a tile) and optionally a decoder (raw bytes -> pixel
//! buffer). The source fans the requests out through a transport and emits
//! one event per arrived slice; slices arrive concurrently with no ordering
//! guarantee, and a failed slice is dropped without affecting the others.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use crate::error::{VolumeError, VolumeResult};
use crate::grid::{TileGrid, TileKey, VolumeExtent};

/// One z-sample to fetch for a tile: a URL plus an optional POST body.
#[derive(Debug, Clone)]
pub struct SliceRequest {
    pub z: f64,
    pub url: String,
    pub post_data: Option<String>,
}

/// Decoded pixel payload of one slice. The payload kind determines the atlas
/// texture format: 4-channel 8-bit for images, single-channel float or byte
/// for numeric arrays.
#[derive(Debug, Clone)]
pub enum SliceData {
    Rgba8 {
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    },
    F32 {
        width: u32,
        height: u32,
        values: Vec<f32>,
    },
    U8 {
        width: u32,
        height: u32,
        values: Vec<u8>,
    },
}

impl SliceData {
    pub fn width(&self) -> u32 {
        match self {
            SliceData::Rgba8 { width, .. }
            | SliceData::F32 { width, .. }
            | SliceData::U8 { width, .. } => *width,
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            SliceData::Rgba8 { height, .. }
            | SliceData::F32 { height, .. }
            | SliceData::U8 { height, .. } => *height,
        }
    }
}

/// Decoded slice at one z position within a tile.
#[derive(Debug, Clone)]
pub struct Slice {
    pub z: f64,
    pub data: SliceData,
}

/// Externally supplied descriptor generator: which slices to fetch for a tile.
pub trait SliceRequests: Send + Sync {
    fn requests(&self, key: TileKey, extent: &VolumeExtent) -> Vec<SliceRequest>;
}

impl<F> SliceRequests for F
where
    F: Fn(TileKey, &VolumeExtent) -> Vec<SliceRequest> + Send + Sync,
{
    fn requests(&self, key: TileKey, extent: &VolumeExtent) -> Vec<SliceRequest> {
        self(key, extent)
    }
}

/// Optional per-slice decoder. When absent, bytes are decoded as an encoded
/// image (PNG/JPEG) into `Rgba8`.
pub trait SliceDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> VolumeResult<SliceData>;
}

impl<F> SliceDecoder for F
where
    F: Fn(&[u8]) -> VolumeResult<SliceData> + Send + Sync,
{
    fn decode(&self, bytes: &[u8]) -> VolumeResult<SliceData> {
        self(bytes)
    }
}

/// Default decode path: treat the payload as an encoded image.
pub fn decode_image_bytes(bytes: &[u8]) -> VolumeResult<SliceData> {
    let img = image::load_from_memory(bytes).map_err(|e| VolumeError::Decode(e.to_string()))?;
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(SliceData::Rgba8 {
        width,
        height,
        pixels: rgba.into_raw(),
    })
}

/// Completion callback handed to a transport fetch.
pub type FetchDone = Box<dyn FnOnce(VolumeResult<Vec<u8>>) + Send>;

/// Byte transport seam. `fetch` begins an asynchronous retrieval and hands
/// the bytes to the completion callback; it must not block the caller.
pub trait SliceTransport: Send + Sync {
    fn fetch(&self, request: SliceRequest, done: FetchDone);
}

/// Counters for transport activity.
#[derive(Debug, Default)]
pub struct TransportStats {
    pub requests: AtomicU64,
    pub bytes_fetched: AtomicU64,
    pub failures: AtomicU64,
}

impl TransportStats {
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn bytes_fetched(&self) -> u64 {
        self.bytes_fetched.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// HTTP transport on a tokio runtime. GET by default, POST when the request
/// carries a body; `file://` URLs read from disk.
pub struct HttpTransport {
    client: reqwest::Client,
    runtime: tokio::runtime::Handle,
    stats: Arc<TransportStats>,
}

impl HttpTransport {
    /// Requires an ambient tokio runtime (e.g. called from within one).
    pub fn new() -> VolumeResult<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| VolumeError::Transport(format!("no tokio runtime: {}", e)))?;
        Self::new_with_runtime(runtime)
    }

    pub fn new_with_runtime(runtime: tokio::runtime::Handle) -> VolumeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            runtime,
            stats: Arc::new(TransportStats::default()),
        })
    }

    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }
}

async fn fetch_bytes(client: &reqwest::Client, request: &SliceRequest) -> VolumeResult<Vec<u8>> {
    if let Some(path) = request.url.strip_prefix("file://") {
        return Ok(std::fs::read(path)?);
    }

    let builder = match &request.post_data {
        Some(body) => client.post(&request.url).body(body.clone()),
        None => client.get(&request.url),
    };
    let response = builder.send().await?;
    if !response.status().is_success() {
        return Err(VolumeError::Transport(format!(
            "request for {} failed with status: {}",
            request.url,
            response.status()
        )));
    }
    Ok(response.bytes().await?.to_vec())
}

impl SliceTransport for HttpTransport {
    fn fetch(&self, request: SliceRequest, done: FetchDone) {
        self.stats.requests.fetch_add(1, Ordering::Relaxed);
        let client = self.client.clone();
        let stats = Arc::clone(&self.stats);
        self.runtime.spawn(async move {
            let result = fetch_bytes(&client, &request).await;
            match &result {
                Ok(bytes) => {
                    stats
                        .bytes_fetched
                        .fetch_add(bytes.len() as u64, Ordering::Relaxed);
                }
                Err(_) => {
                    stats.failures.fetch_add(1, Ordering::Relaxed);
                }
            }
            done(result);
        });
    }
}

/// One arrived slice, stamped with the source revision its load was started
/// under. The revision is the epoch carried by every asynchronous completion:
/// the receiver compares it against the current source revision and discards
/// stale events instead of cancelling in-flight fetches.
#[derive(Debug)]
pub struct SliceEvent {
    pub key: TileKey,
    pub revision: u64,
    pub total: u32,
    pub slice: Slice,
}

/// Clonable sender half of the slice channel, bound to one source revision.
#[derive(Clone)]
pub struct SliceSink {
    tx: Sender<SliceEvent>,
    revision: u64,
}

impl SliceSink {
    pub fn new(tx: Sender<SliceEvent>, revision: u64) -> Self {
        Self { tx, revision }
    }

    pub fn send(&self, key: TileKey, total: u32, slice: Slice) {
        let event = SliceEvent {
            key,
            revision: self.revision,
            total,
            slice,
        };
        // The receiver disappears when the TileSet is dropped mid-load.
        if self.tx.send(event).is_err() {
            log::debug!("slice for {:?} arrived after receiver was dropped", key);
        }
    }
}

/// Volume dataset source: a tile grid plus the seams that resolve a tile to
/// slice bytes. Stateless beyond its configuration; replacing the source is
/// how a dataset change propagates.
pub struct VolumeSource {
    pub grid: TileGrid,
    requests: Arc<dyn SliceRequests>,
    decoder: Option<Arc<dyn SliceDecoder>>,
    transport: Arc<dyn SliceTransport>,
}

impl VolumeSource {
    pub fn new(
        grid: TileGrid,
        requests: Arc<dyn SliceRequests>,
        decoder: Option<Arc<dyn SliceDecoder>>,
        transport: Arc<dyn SliceTransport>,
    ) -> Self {
        Self {
            grid,
            requests,
            decoder,
            transport,
        }
    }

    pub fn compute_tile_extent(&self, key: TileKey) -> VolumeExtent {
        self.grid.tile_extent(key)
    }

    /// Begin loading every slice of a tile. Returns the number of slices
    /// requested. Each arrival is decoded off the render thread and emitted
    /// through the sink; a failed slice is logged and dropped, leaving its
    /// atlas region unpopulated.
    pub fn load_tile_data(&self, key: TileKey, sink: &SliceSink) -> u32 {
        let extent = self.compute_tile_extent(key);
        let requests = self.requests.requests(key, &extent);
        let total = requests.len() as u32;

        for request in requests {
            let z = request.z;
            let url = request.url.clone();
            let decoder = self.decoder.clone();
            let sink = sink.clone();
            self.transport.fetch(
                request,
                Box::new(move |result| {
                    let decoded = result.and_then(|bytes| match &decoder {
                        Some(d) => d.decode(&bytes),
                        None => decode_image_bytes(&bytes),
                    });
                    match decoded {
                        Ok(data) => sink.send(key, total, Slice { z, data }),
                        Err(e) => {
                            log::warn!("slice z={} of {:?} failed ({}): {}", z, key, url, e);
                        }
                    }
                }),
            );
        }
        total
    }
}
