//! CPU/GPU synchronization: timeline fences and the per-back-buffer fence ring.
//!
//! Every back buffer owns a [`FrameSlot`] with its own fence, fence value and
//! command allocator. A slot moves through
//! `Idle(v) -> Recording -> Submitted(v + 1) -> Idle(v + 1)`; the CPU only
//! reuses a slot's allocator once the fence has reached the value recorded
//! for the slot's last submission.
//!
//! # Example
//!
//! ```ignore
//! let list = ring.begin(back_buffer_index)?;
//! list.clear_render_target(back_buffer, [0.0, 0.0, 0.0, 1.0]);
//! ring.submit(&queue, Some(swap_chain))?;
//!
//! // Before teardown or resize:
//! ring.flush(&queue)?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::backend::{FenceId, GpuBackend, SwapChainId};
use crate::command::{CommandAllocator, CommandList, CommandQueue, QueueKind};
use crate::device::GpuDevice;
use crate::error::GraphicsError;

/// Timeout used where the wait is expected to always complete.
pub const INFINITE: Duration = Duration::MAX;

/// A timeline fence: a counter the GPU advances as submitted work completes.
pub struct Fence {
    backend: Arc<dyn GpuBackend>,
    id: FenceId,
}

impl Fence {
    pub fn new(device: &GpuDevice, initial_value: u64) -> Result<Self, GraphicsError> {
        let id = device.backend().create_fence(initial_value)?;
        Ok(Self {
            backend: device.backend().clone(),
            id,
        })
    }

    pub fn id(&self) -> FenceId {
        self.id
    }

    /// Last value the GPU has signaled.
    pub fn completed_value(&self) -> Result<u64, GraphicsError> {
        self.backend.fence_completed_value(self.id)
    }

    /// Whether the fence has reached `value`, without blocking.
    pub fn is_complete(&self, value: u64) -> Result<bool, GraphicsError> {
        Ok(self.completed_value()? >= value)
    }

    /// Block until the fence reaches `value`. See [`wait_for_fence_value`].
    pub fn wait(&self, value: u64, timeout: Duration) -> Result<(), GraphicsError> {
        wait_for_fence_value(self, value, timeout)
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        self.backend.destroy_fence(self.id);
    }
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence").field("id", &self.id).finish()
    }
}

/// Block the calling thread until `fence` reaches `target`.
///
/// Returns immediately when the completed value is already at or past the
/// target.
///
/// # Errors
///
/// [`GraphicsError::FenceTimeout`] if `timeout` elapses first.
pub fn wait_for_fence_value(
    fence: &Fence,
    target: u64,
    timeout: Duration,
) -> Result<(), GraphicsError> {
    if fence.completed_value()? >= target {
        return Ok(());
    }
    if fence.backend.wait_fence(fence.id, target, timeout)? {
        return Ok(());
    }
    let completed = fence.completed_value()?;
    log::error!("Fence {:?} wait for {target} timed out at {completed}", fence.id);
    Err(GraphicsError::FenceTimeout { target, completed })
}

/// Where a frame slot is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotState {
    /// No GPU work references the slot.
    Idle,
    /// The CPU is recording the slot's command list.
    Recording,
    /// Work was submitted and may still be executing.
    Submitted,
}

/// Per-back-buffer synchronization and recording resources.
pub struct FrameSlot {
    fence: Fence,
    fence_value: u64,
    allocator: CommandAllocator,
    state: SlotState,
}

impl FrameSlot {
    fn new(device: &GpuDevice) -> Result<Self, GraphicsError> {
        Ok(Self {
            fence: Fence::new(device, 0)?,
            fence_value: 0,
            allocator: CommandAllocator::new(device, QueueKind::Direct)?,
            state: SlotState::Idle,
        })
    }

    pub fn fence(&self) -> &Fence {
        &self.fence
    }

    /// Value the slot's last submission signals.
    pub fn fence_value(&self) -> u64 {
        self.fence_value
    }

    pub fn allocator(&self) -> &CommandAllocator {
        &self.allocator
    }

    /// Current state; a submitted slot whose fence has completed reads as idle.
    pub fn state(&self) -> Result<SlotState, GraphicsError> {
        match self.state {
            SlotState::Submitted if self.fence.is_complete(self.fence_value)? => {
                Ok(SlotState::Idle)
            }
            state => Ok(state),
        }
    }
}

/// Ring of frame slots, one per back buffer, sharing one command list.
pub struct FenceRing {
    slots: Vec<FrameSlot>,
    list: CommandList,
    recording: Option<u32>,
    timeout: Duration,
}

impl FenceRing {
    /// Create `slot_count` slots with fences starting at 0.
    ///
    /// The command list is created closed.
    pub fn new(
        device: &GpuDevice,
        slot_count: u32,
        timeout: Duration,
    ) -> Result<Self, GraphicsError> {
        if slot_count == 0 {
            return Err(GraphicsError::InvalidParameter(
                "fence ring needs at least one slot".to_string(),
            ));
        }
        let slots = (0..slot_count)
            .map(|_| FrameSlot::new(device))
            .collect::<Result<Vec<_>, _>>()?;
        log::debug!("Created fence ring with {slot_count} slots");
        Ok(Self {
            slots,
            list: CommandList::new(QueueKind::Direct, "frame"),
            recording: None,
            timeout,
        })
    }

    pub fn slot_count(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn slot(&self, index: u32) -> Option<&FrameSlot> {
        self.slots.get(index as usize)
    }

    /// Slot currently being recorded.
    pub fn recording_slot(&self) -> Option<u32> {
        self.recording
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start recording into slot `index`.
    ///
    /// Waits for the slot's previous submission, advances its fence value,
    /// then resets the allocator and the command list.
    pub fn begin(&mut self, index: u32) -> Result<&mut CommandList, GraphicsError> {
        if let Some(current) = self.recording {
            return Err(GraphicsError::InvalidParameter(format!(
                "frame slot {index} started while slot {current} is still recording"
            )));
        }
        let timeout = self.timeout;
        let slot = self.slots.get_mut(index as usize).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("frame slot {index} out of range"))
        })?;

        wait_for_fence_value(&slot.fence, slot.fence_value, timeout)?;
        slot.fence_value += 1;
        slot.allocator.reset()?;
        self.list.reset(&slot.allocator)?;
        slot.state = SlotState::Recording;
        self.recording = Some(index);
        log::trace!("Frame slot {index} recording, fence value {}", slot.fence_value);
        Ok(&mut self.list)
    }

    /// The list being recorded.
    pub fn list_mut(&mut self) -> Result<&mut CommandList, GraphicsError> {
        if self.recording.is_none() {
            return Err(GraphicsError::InvalidParameter(
                "no frame is being recorded".to_string(),
            ));
        }
        Ok(&mut self.list)
    }

    /// Close the list, submit it to `queue` and signal the slot's fence.
    ///
    /// Returns the submitted slot index.
    pub fn submit(
        &mut self,
        queue: &CommandQueue,
        present_sync: Option<SwapChainId>,
    ) -> Result<u32, GraphicsError> {
        let index = self.recording.take().ok_or_else(|| {
            GraphicsError::InvalidParameter("end of frame without a matching start".to_string())
        })?;
        let slot = &mut self.slots[index as usize];
        // The slot no longer records even if submission fails below.
        slot.state = SlotState::Idle;

        self.list.close()?;
        match present_sync {
            Some(swap_chain) => queue.execute_for_present(&[&self.list], swap_chain)?,
            None => queue.execute(&[&self.list])?,
        }
        queue.signal(&slot.fence, slot.fence_value)?;
        slot.state = SlotState::Submitted;
        log::trace!("Frame slot {index} submitted, fence value {}", slot.fence_value);
        Ok(index)
    }

    /// Whether any slot is recording or still has work on the GPU.
    pub fn in_flight(&self) -> Result<bool, GraphicsError> {
        for slot in &self.slots {
            if slot.state()? != SlotState::Idle {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Whether every slot's fence has reached its recorded value.
    pub fn is_idle(&self) -> Result<bool, GraphicsError> {
        Ok(!self.in_flight()?)
    }

    /// Drain the GPU: signal every slot's fence to a new value and wait for all.
    ///
    /// A frame still being recorded is discarded.
    pub fn flush(&mut self, queue: &CommandQueue) -> Result<(), GraphicsError> {
        if let Some(index) = self.recording.take() {
            log::warn!("Discarding frame in progress on slot {index}");
            if let Err(close) = self.list.close() {
                log::warn!("Closing abandoned frame list failed: {close}");
            }
            self.slots[index as usize].state = SlotState::Idle;
        }

        for slot in &mut self.slots {
            slot.fence_value += 1;
            queue.signal(&slot.fence, slot.fence_value)?;
        }
        for slot in &mut self.slots {
            wait_for_fence_value(&slot.fence, slot.fence_value, INFINITE)?;
            slot.state = SlotState::Idle;
        }
        log::debug!("Fence ring flushed");
        Ok(())
    }
}

impl std::fmt::Debug for FenceRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FenceRing")
            .field("slots", &self.slots.len())
            .field("recording", &self.recording)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::device::{AdapterInfo, AdapterType, test_device};

    fn paused_device() -> (Arc<DummyBackend>, GpuDevice) {
        let dummy = Arc::new(DummyBackend::new());
        let device = GpuDevice::new(
            AdapterInfo::new(0, "Test Adapter", AdapterType::Discrete, 1 << 30),
            dummy.clone(),
        );
        (dummy, device)
    }

    #[test]
    fn test_wait_returns_immediately_when_complete() {
        let device = test_device();
        let fence = Fence::new(&device, 5).unwrap();
        fence.wait(3, Duration::ZERO).unwrap();
        fence.wait(5, Duration::ZERO).unwrap();
    }

    #[test]
    fn test_wait_times_out() {
        let (dummy, device) = paused_device();
        let queue = CommandQueue::new(&device, QueueKind::Direct, "direct").unwrap();
        let fence = Fence::new(&device, 0).unwrap();
        queue.signal(&fence, 1).unwrap();
        dummy.set_paused(true);

        let err = fence.wait(1, Duration::from_millis(10)).unwrap_err();
        assert_eq!(
            err,
            GraphicsError::FenceTimeout {
                target: 1,
                completed: 0
            }
        );
    }

    #[test]
    fn test_wait_unblocks_when_gpu_resumes() {
        let (dummy, device) = paused_device();
        let queue = CommandQueue::new(&device, QueueKind::Direct, "direct").unwrap();
        let fence = Fence::new(&device, 0).unwrap();
        queue.signal(&fence, 1).unwrap();
        dummy.set_paused(true);

        // Simulate the GPU finishing from another thread
        let resume = dummy.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            resume.set_paused(false);
        });

        fence.wait(1, Duration::from_secs(5)).unwrap();
        assert_eq!(fence.completed_value().unwrap(), 1);
        handle.join().unwrap();
    }

    #[test]
    fn test_ring_slot_lifecycle() {
        let device = test_device();
        let queue = CommandQueue::new(&device, QueueKind::Direct, "direct").unwrap();
        let mut ring = FenceRing::new(&device, 3, INFINITE).unwrap();
        assert!(ring.is_idle().unwrap());

        ring.begin(0).unwrap();
        assert_eq!(ring.slot(0).unwrap().state().unwrap(), SlotState::Recording);
        assert_eq!(ring.slot(0).unwrap().fence_value(), 1);
        assert!(ring.in_flight().unwrap());

        assert_eq!(ring.submit(&queue, None).unwrap(), 0);
        assert_eq!(ring.slot(0).unwrap().state().unwrap(), SlotState::Submitted);

        // Reusing the slot waits for the submission before resetting.
        ring.begin(0).unwrap();
        assert_eq!(ring.slot(0).unwrap().fence().completed_value().unwrap(), 1);
        assert_eq!(ring.slot(0).unwrap().fence_value(), 2);
        ring.submit(&queue, None).unwrap();
    }

    #[test]
    fn test_ring_rejects_nested_begin() {
        let device = test_device();
        let mut ring = FenceRing::new(&device, 2, INFINITE).unwrap();
        ring.begin(0).unwrap();
        assert!(ring.begin(1).is_err());
        assert!(ring.begin(5).is_err());
    }

    #[test]
    fn test_submit_without_begin() {
        let device = test_device();
        let queue = CommandQueue::new(&device, QueueKind::Direct, "direct").unwrap();
        let mut ring = FenceRing::new(&device, 2, INFINITE).unwrap();
        assert!(ring.submit(&queue, None).is_err());
        assert!(ring.list_mut().is_err());
    }

    #[test]
    fn test_flush_drains_all_slots() {
        let device = test_device();
        let queue = CommandQueue::new(&device, QueueKind::Direct, "direct").unwrap();
        let mut ring = FenceRing::new(&device, 3, INFINITE).unwrap();
        for index in 0..3 {
            ring.begin(index).unwrap();
            ring.submit(&queue, None).unwrap();
        }
        assert!(ring.in_flight().unwrap());

        ring.flush(&queue).unwrap();
        assert!(ring.is_idle().unwrap());
        for index in 0..3 {
            let slot = ring.slot(index).unwrap();
            assert_eq!(slot.fence_value(), 2);
            assert_eq!(slot.fence().completed_value().unwrap(), 2);
        }
    }

    #[test]
    fn test_flush_discards_recording_frame() {
        let device = test_device();
        let queue = CommandQueue::new(&device, QueueKind::Direct, "direct").unwrap();
        let mut ring = FenceRing::new(&device, 2, INFINITE).unwrap();
        ring.begin(1).unwrap();
        ring.flush(&queue).unwrap();
        assert_eq!(ring.recording_slot(), None);
        assert!(ring.is_idle().unwrap());
        ring.begin(1).unwrap();
    }
}
