use crate::device::GpuDevice;
use crate::error::DeviceError;
use crate::pass::{quad_vertices, InputSurface};
use crate::types::{Size, TexelFormat};

/// Number of ring slots: the current frame plus `PREV` through `PREV6`.
pub const HISTORY_SLOTS: usize = 8;

/// Number of past frames shaders can address.
pub const HISTORY_DEPTH: usize = HISTORY_SLOTS - 1;

const SLOT_MASK: usize = HISTORY_SLOTS - 1;

/// Name prefix shaders use for the frame `back` steps into the past (1 = `PREV`).
pub fn history_name(back: usize) -> String {
    match back {
        1 => "PREV".to_string(),
        n => format!("PREV{}", n - 1),
    }
}

/// Ring of recently uploaded first-stage frames.
///
/// The current slot doubles as pass 0's input texture. The pointer moves exactly
/// once per completed frame.
pub(crate) struct HistoryRing<D: GpuDevice> {
    slots: Vec<InputSurface<D>>,
    ptr: usize,
}

impl<D: GpuDevice> HistoryRing<D> {
    /// Allocates every slot at `size` and clears it so early reads sample black.
    pub fn new(device: &mut D, size: Size, format: TexelFormat) -> Result<Self, DeviceError> {
        let mut slots = Vec::with_capacity(HISTORY_SLOTS);
        for index in 0..HISTORY_SLOTS {
            let label = format!("history slot {index}");
            let mut slot = InputSurface::allocate(device, &label, size, format)?;
            device.clear_texture(&slot.texture)?;
            device.write_vertices(&slot.vertex_buffer, &quad_vertices(size, size, size))?;
            slot.needs_clear = false;
            slots.push(slot);
        }
        Ok(Self { slots, ptr: 0 })
    }

    pub fn current(&self) -> &InputSurface<D> {
        &self.slots[self.ptr]
    }

    pub fn current_mut(&mut self) -> &mut InputSurface<D> {
        &mut self.slots[self.ptr]
    }

    /// Slot index holding the frame `back` steps before the current one.
    pub fn slot_index(&self, back: usize) -> usize {
        self.ptr.wrapping_sub(back) & SLOT_MASK
    }

    pub fn slot(&self, index: usize) -> &InputSurface<D> {
        &self.slots[index & SLOT_MASK]
    }

    pub fn slots_mut(&mut self) -> impl Iterator<Item = &mut InputSurface<D>> {
        self.slots.iter_mut()
    }

    /// Moves to the next slot after a completed frame.
    pub fn advance(&mut self) {
        self.ptr = (self.ptr + 1) & SLOT_MASK;
    }

    pub fn texture_size(&self) -> Size {
        self.current().size
    }
}
