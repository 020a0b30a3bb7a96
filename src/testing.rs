//! Test fixtures: synthetic containers and an in-memory transport

use async_trait::async_trait;
use bytes::{BufMut, Bytes};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

use crate::error::{AppError, Result};
use crate::media::ogg::{page_checksum, PAGE_TYPE_BEGINNING_OF_STREAM};
use crate::media::DecodedUnit;
use crate::webrtc::track::{SampleWriter, TrackDescriptor};
use crate::webrtc::transport::{
    SessionBootstrap, TrackRegistration, TrackSender, TransportConnection,
};

/// Builds IVF files in memory
pub struct IvfBuilder {
    numerator: u32,
    denominator: u32,
    header_len: u16,
    frames: Vec<Vec<u8>>,
}

impl IvfBuilder {
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
            header_len: 32,
            frames: Vec::new(),
        }
    }

    pub fn header_len(mut self, len: u16) -> Self {
        self.header_len = len;
        self
    }

    pub fn frame(mut self, payload: &[u8]) -> Self {
        self.frames.push(payload.to_vec());
        self
    }

    /// `count` frames of `size` bytes; the first byte of each is its index
    pub fn frames(mut self, count: usize, size: usize) -> Self {
        for i in 0..count {
            let mut payload = vec![0xAA; size.max(1)];
            payload[0] = i as u8;
            self.frames.push(payload);
        }
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.put_slice(b"DKIF");
        out.put_u16_le(0);
        out.put_u16_le(self.header_len);
        out.put_slice(b"VP80");
        out.put_u16_le(320);
        out.put_u16_le(240);
        out.put_u32_le(self.denominator);
        out.put_u32_le(self.numerator);
        out.put_u32_le(self.frames.len() as u32);
        out.put_u32_le(0);
        out.resize(self.header_len as usize, 0);

        for (i, frame) in self.frames.iter().enumerate() {
            out.put_u32_le(frame.len() as u32);
            out.put_u64_le(i as u64);
            out.put_slice(frame);
        }
        out
    }
}

/// Builds Ogg/Opus files in memory, starting with an `OpusHead` page
pub struct OggBuilder {
    out: Vec<u8>,
    granule: u64,
    sequence: u32,
}

impl OggBuilder {
    pub fn new() -> Self {
        let mut head = Vec::from(&b"OpusHead"[..]);
        head.put_u8(1); // version
        head.put_u8(2); // channels
        head.put_u16_le(312); // pre-skip
        head.put_u32_le(48000);
        head.put_u16_le(0); // output gain
        head.put_u8(0); // mapping family

        Self {
            out: Self::raw_page(PAGE_TYPE_BEGINNING_OF_STREAM, 0, 0, &head),
            granule: 0,
            sequence: 1,
        }
    }

    /// Append one page carrying `samples` more 48 kHz samples
    pub fn page(mut self, payload: &[u8], samples: u64) -> Self {
        self.granule += samples;
        let page = Self::raw_page(0, self.granule, self.sequence, payload);
        self.out.extend_from_slice(&page);
        self.sequence += 1;
        self
    }

    /// Append a page with an explicit granule position
    pub fn page_at(mut self, payload: &[u8], granule: u64) -> Self {
        self.granule = granule;
        let page = Self::raw_page(0, granule, self.sequence, payload);
        self.out.extend_from_slice(&page);
        self.sequence += 1;
        self
    }

    pub fn pages(mut self, count: usize, samples: u64) -> Self {
        for i in 0..count {
            self = self.page(&[i as u8, 0xF8, 0xFF, 0xFE], samples);
        }
        self
    }

    pub fn build(&self) -> Vec<u8> {
        self.out.clone()
    }

    /// Encode a single page with a valid checksum
    pub fn raw_page(header_type: u8, granule: u64, sequence: u32, payload: &[u8]) -> Vec<u8> {
        let mut segments = vec![255u8; payload.len() / 255];
        segments.push((payload.len() % 255) as u8);

        let mut page = Vec::new();
        page.put_slice(b"OggS");
        page.put_u8(0);
        page.put_u8(header_type);
        page.put_u64_le(granule);
        page.put_u32_le(0x5EED);
        page.put_u32_le(sequence);
        page.put_u32_le(0);
        page.put_u8(segments.len() as u8);
        page.put_slice(&segments);
        page.put_slice(payload);

        let crc = page_checksum(&page);
        page[22..26].copy_from_slice(&crc.to_le_bytes());
        page
    }
}

/// Write `P240.ivf`, `P360.ivf`, `P480.ivf` and `P.ogg` under `dir`
pub fn write_source_files(dir: &Path, prefix: &str, ivf: &[u8], ogg: &[u8]) {
    for suffix in ["240", "360", "480"] {
        std::fs::write(dir.join(format!("{}{}.ivf", prefix, suffix)), ivf).unwrap();
    }
    std::fs::write(dir.join(format!("{}.ogg", prefix)), ogg).unwrap();
}

/// One write seen by the in-memory transport
#[derive(Debug, Clone)]
pub struct RecordedUnit {
    pub at: Instant,
    pub unit: DecodedUnit,
}

#[derive(Default)]
struct FakeState {
    descriptors: Mutex<Vec<TrackDescriptor>>,
    tracks: AtomicUsize,
    writes: Mutex<HashMap<String, Vec<RecordedUnit>>>,
    stalled: Mutex<HashSet<String>>,
    failing: Mutex<HashMap<String, usize>>,
    negotiations: AtomicUsize,
    closes: AtomicUsize,
}

/// In-memory transport connection that records every unit
#[derive(Clone, Default)]
pub struct FakeConnection {
    state: Arc<FakeState>,
}

impl FakeConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes to `label` never complete
    pub fn stall(&self, label: &str) {
        self.state.stalled.lock().insert(label.to_string());
    }

    /// Writes to `label` fail immediately
    pub fn fail_writes(&self, label: &str) {
        self.fail_writes_after(label, 0);
    }

    /// Writes to `label` fail once `ok` writes succeeded
    pub fn fail_writes_after(&self, label: &str, ok: usize) {
        self.state.failing.lock().insert(label.to_string(), ok);
    }

    pub fn descriptors(&self) -> Vec<TrackDescriptor> {
        self.state.descriptors.lock().clone()
    }

    /// Number of `add_track` calls
    pub fn track_count(&self) -> usize {
        self.state.tracks.load(Ordering::SeqCst)
    }

    pub fn writes(&self, label: &str) -> Vec<RecordedUnit> {
        self.state
            .writes
            .lock()
            .get(label)
            .cloned()
            .unwrap_or_default()
    }

    pub fn payloads(&self, label: &str) -> Vec<Bytes> {
        self.writes(label)
            .into_iter()
            .map(|r| r.unit.payload)
            .collect()
    }

    pub fn negotiations(&self) -> usize {
        self.state.negotiations.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    fn writer(&self, descriptor: &TrackDescriptor) -> Arc<dyn SampleWriter> {
        self.state.descriptors.lock().push(descriptor.clone());
        Arc::new(FakeWriter {
            label: descriptor.label().to_string(),
            state: self.state.clone(),
        })
    }
}

#[async_trait]
impl TransportConnection for FakeConnection {
    async fn add_track(&self, descriptor: &TrackDescriptor) -> Result<TrackRegistration> {
        self.state.tracks.fetch_add(1, Ordering::SeqCst);
        Ok(TrackRegistration {
            sender: Arc::new(self.clone()),
            writer: self.writer(descriptor),
        })
    }

    async fn negotiate(&self) -> Result<()> {
        self.state.negotiations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl TrackSender for FakeConnection {
    async fn add_encoding_layer(&self, descriptor: &TrackDescriptor) -> Result<Arc<dyn SampleWriter>> {
        Ok(self.writer(descriptor))
    }
}

struct FakeWriter {
    label: String,
    state: Arc<FakeState>,
}

#[async_trait]
impl SampleWriter for FakeWriter {
    fn label(&self) -> &str {
        &self.label
    }

    async fn write_unit(&self, unit: &DecodedUnit) -> Result<()> {
        let stalled = self.state.stalled.lock().contains(&self.label);
        if stalled {
            std::future::pending::<()>().await;
        }

        let written = self
            .state
            .writes
            .lock()
            .get(&self.label)
            .map_or(0, |w| w.len());
        if let Some(&ok) = self.state.failing.lock().get(&self.label) {
            if written >= ok {
                return Err(AppError::TransportWrite {
                    track: self.label.clone(),
                    reason: "connection closed".to_string(),
                });
            }
        }

        self.state
            .writes
            .lock()
            .entry(self.label.clone())
            .or_default()
            .push(RecordedUnit {
                at: Instant::now(),
                unit: unit.clone(),
            });
        Ok(())
    }
}

/// Bootstrap handing out one shared [`FakeConnection`]
#[derive(Default)]
pub struct FakeBootstrap {
    pub connection: FakeConnection,
    connects: AtomicUsize,
    published: Mutex<Vec<(String, Vec<String>)>>,
    fail_connect: bool,
}

impl FakeBootstrap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_connect: true,
            ..Default::default()
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<(String, Vec<String>)> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl SessionBootstrap for FakeBootstrap {
    type Session = String;

    async fn connect(&self, address: &str) -> Result<String> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            return Err(AppError::Bootstrap(format!("{} refused", address)));
        }
        Ok(address.to_string())
    }

    async fn publish(
        &self,
        _session: &String,
        stream_name: &str,
        stream_ids: &[String],
    ) -> Result<Arc<dyn TransportConnection>> {
        self.published
            .lock()
            .push((stream_name.to_string(), stream_ids.to_vec()));
        Ok(Arc::new(self.connection.clone()))
    }
}
