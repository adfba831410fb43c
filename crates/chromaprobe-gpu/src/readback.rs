//! Non-blocking readback of the combined reduction result.
//!
//! Two staging slots alternate so one frame's result can map while the next
//! frame's copy is recorded. The capture thread never waits on the GPU: when
//! every slot is still in flight the oldest frame is abandoned and the new
//! frame gets a spare slot. A buffer that is still mapping cannot be reused,
//! so spares are allocated on demand up to [`MAX_SLOTS`] and recycled once
//! their abandoned maps complete.

use std::sync::Arc;

use chromaprobe_core::measurement::CameraSettings;
use chromaprobe_core::uniforms::TilePartial;
use chromaprobe_core::Channel;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::buffers::{ReductionBuffers, create_buffer_checked};
use crate::error::GpuError;

pub const SLOT_COUNT: usize = 2;
/// Upper bound on staging slots, spares included.
pub const MAX_SLOTS: usize = 4;

/// Which frame a slot's bytes belong to and how to interpret them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadbackTag {
    pub generation: u64,
    pub timestamp: f64,
    pub channel: Channel,
    pub camera: Option<CameraSettings>,
}

/// A finished readback.
#[derive(Debug)]
pub struct CompletedReadback {
    pub tag: ReadbackTag,
    pub total: Result<TilePartial, GpuError>,
}

type MapStatus = Arc<Mutex<Option<Result<(), wgpu::BufferAsyncError>>>>;

#[derive(Debug, Clone, Copy, PartialEq)]
enum SlotState {
    Free,
    /// Copy recorded, waiting for `queue.submit`.
    Recorded(ReadbackTag),
    Mapping(ReadbackTag),
    /// Still mapping, but nobody wants the result.
    Abandoned,
}

struct ReadbackSlot {
    staging: wgpu::Buffer,
    /// Filled by the map_async callback.
    status: MapStatus,
    state: SlotState,
}

fn staging_descriptor(label: &str) -> wgpu::BufferDescriptor<'_> {
    wgpu::BufferDescriptor {
        label: Some(label),
        size: ReductionBuffers::RESULT_BYTES,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    }
}

impl ReadbackSlot {
    fn new(device: &wgpu::Device, slot_label: &str) -> Self {
        let label = format!("chromaprobe_stats_staging_{slot_label}");
        Self::with_staging(device.create_buffer(&staging_descriptor(&label)))
    }

    fn spare(device: &wgpu::Device) -> Result<Self, GpuError> {
        let label = "chromaprobe_stats_staging_spare";
        Ok(Self::with_staging(create_buffer_checked(device, label, &staging_descriptor(label))?))
    }

    fn with_staging(staging: wgpu::Buffer) -> Self {
        Self {
            staging,
            status: Arc::new(Mutex::new(None)),
            state: SlotState::Free,
        }
    }

    fn is_ready(&self) -> bool {
        self.status.lock().is_some()
    }

    fn begin_map(&self) {
        *self.status.lock() = None;
        let status = Arc::clone(&self.status);
        self.staging.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            *status.lock() = Some(result);
        });
    }

    /// Read the mapped result, unmap and free the slot.
    fn consume(&mut self) -> Result<TilePartial, GpuError> {
        let status = self.status.lock().take();
        self.state = SlotState::Free;
        match status {
            Some(Ok(())) => {
                let total = {
                    let data = self.staging.slice(..).get_mapped_range();
                    bytemuck::pod_read_unaligned::<TilePartial>(&data[..ReductionBuffers::RESULT_BYTES as usize])
                };
                self.staging.unmap();
                Ok(total)
            }
            Some(Err(err)) => Err(GpuError::Map(err)),
            None => Err(GpuError::Map(wgpu::BufferAsyncError)),
        }
    }
}

pub struct StatsReadback {
    slots: Vec<ReadbackSlot>,
}

impl StatsReadback {
    pub fn new(device: &wgpu::Device) -> Self {
        Self {
            slots: vec![ReadbackSlot::new(device, "a"), ReadbackSlot::new(device, "b")],
        }
    }

    /// A slot for the next frame.
    ///
    /// Prefers a free slot. Otherwise a spare slot is allocated and the
    /// oldest in-flight frame is abandoned. `None` when [`MAX_SLOTS`] slots
    /// are all still mapping.
    pub fn acquire(&mut self, device: &wgpu::Device) -> Result<Option<usize>, GpuError> {
        self.reclaim_abandoned();
        if let Some(idx) = self.slots.iter().position(|slot| slot.state == SlotState::Free) {
            return Ok(Some(idx));
        }

        if self.slots.len() >= MAX_SLOTS {
            return Ok(None);
        }
        let spare = ReadbackSlot::spare(device)?;

        let oldest = self
            .slots
            .iter_mut()
            .filter_map(|slot| match slot.state {
                SlotState::Mapping(tag) => Some((tag.generation, slot)),
                _ => None,
            })
            .min_by_key(|(generation, _)| *generation);
        if let Some((generation, slot)) = oldest {
            debug!("Abandoning in-flight readback for generation {generation}");
            slot.state = SlotState::Abandoned;
        }

        self.slots.push(spare);
        debug!("Allocated spare readback slot ({} total)", self.slots.len());
        Ok(Some(self.slots.len() - 1))
    }

    /// Free abandoned slots whose map has completed.
    fn reclaim_abandoned(&mut self) {
        for slot in &mut self.slots {
            if slot.state == SlotState::Abandoned && slot.is_ready() {
                let _ = slot.consume();
            }
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Record the copy of the combined result into slot `idx`.
    pub fn record_copy(
        &mut self,
        idx: usize,
        encoder: &mut wgpu::CommandEncoder,
        reduction: &ReductionBuffers,
        tag: ReadbackTag,
    ) {
        let slot = &mut self.slots[idx];
        encoder.copy_buffer_to_buffer(&reduction.result, 0, &slot.staging, 0, ReductionBuffers::RESULT_BYTES);
        slot.state = SlotState::Recorded(tag);
    }

    /// Begin map_async on slot `idx`. Call this AFTER `queue.submit()`.
    pub fn begin_map(&mut self, idx: usize) {
        let slot = &mut self.slots[idx];
        if let SlotState::Recorded(tag) = slot.state {
            slot.begin_map();
            slot.state = SlotState::Mapping(tag);
        }
    }

    /// Non-blocking poll. Returns the newest finished result; older finished
    /// results are discarded.
    pub fn try_consume(&mut self, device: &wgpu::Device) -> Result<Option<CompletedReadback>, GpuError> {
        // Drive the GPU event loop without blocking.
        if let Err(err) = device.poll(wgpu::PollType::Poll) {
            warn!("Device poll failed, readbacks cannot complete: {err}");
            return Err(err.into());
        }

        let mut ready: Vec<(usize, ReadbackTag)> = Vec::with_capacity(SLOT_COUNT);
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if !slot.is_ready() {
                continue;
            }
            match slot.state {
                SlotState::Abandoned => {
                    let _ = slot.consume();
                }
                SlotState::Mapping(tag) => ready.push((idx, tag)),
                SlotState::Free | SlotState::Recorded(_) => {}
            }
        }

        ready.sort_by_key(|(_, tag)| tag.generation);
        let newest = ready.pop();
        for (idx, tag) in ready {
            debug!("Discarding stale readback for generation {}", tag.generation);
            let _ = self.slots[idx].consume();
        }
        let Some((idx, tag)) = newest else {
            return Ok(None);
        };
        let total = self.slots[idx].consume();
        Ok(Some(CompletedReadback { tag, total }))
    }

    /// Drop interest in every in-flight result.
    pub fn abandon_all(&mut self) {
        for slot in &mut self.slots {
            match slot.state {
                SlotState::Mapping(_) => slot.state = SlotState::Abandoned,
                SlotState::Recorded(_) => slot.state = SlotState::Free,
                SlotState::Free | SlotState::Abandoned => {}
            }
        }
    }

    /// Whether a readback is currently in flight.
    pub fn has_pending(&self) -> bool {
        self.slots
            .iter()
            .any(|slot| matches!(slot.state, SlotState::Mapping(_) | SlotState::Abandoned))
    }
}
