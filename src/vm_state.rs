/// VM state buffer
///
/// The host-VM collaborator interface the matcher assumes (§6): a
/// scratch buffer of 32-bit cells the matcher asks for, reallocating
/// when it runs out and reporting the new size back to the VM. Owned
/// by one VM instance for its whole lifetime (§5) — grown on demand,
/// never shrunk except by an explicit caller request, never shared
/// across a concurrent match (at most one outstanding match per VM
/// instance).

/// Host-defined initial capacity, in cells, before the first grow.
pub const K_INITIAL_STATE_SIZE: usize = 4096;

pub struct VmState {
    cells: Vec<i32>,
    frame_len: usize,
    high_water_frames: usize,
}

impl VmState {
    pub fn new(frame_len: usize) -> Self {
        VmState {
            cells: vec![0; K_INITIAL_STATE_SIZE],
            frame_len: frame_len.max(1),
            high_water_frames: 0,
        }
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    pub fn capacity_cells(&self) -> usize {
        self.cells.len()
    }

    /// Grows the buffer if it cannot hold `frames` backtrack frames yet.
    /// Never shrinks — only `shrink_to_initial` does that, on request.
    pub fn ensure_capacity(&mut self, frames: usize) {
        self.high_water_frames = self.high_water_frames.max(frames);
        let needed = frames * self.frame_len;
        if self.cells.len() < needed {
            self.cells.resize(needed, 0);
        }
    }

    /// Drops back to the host-defined initial size. Callers use this
    /// between matches against very different subjects to release
    /// memory a one-off large match grew; never called automatically.
    pub fn shrink_to_initial(&mut self) {
        self.cells.truncate(K_INITIAL_STATE_SIZE);
        self.cells.shrink_to_fit();
        self.high_water_frames = 0;
    }

    pub fn high_water_frames(&self) -> usize {
        self.high_water_frames
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut i32 {
        self.cells.as_mut_ptr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_the_host_defined_initial_size() {
        let state = VmState::new(8);
        assert_eq!(state.capacity_cells(), K_INITIAL_STATE_SIZE);
    }

    #[test]
    fn grows_to_fit_requested_frames_and_remembers_the_high_water_mark() {
        let mut state = VmState::new(8);
        let huge = K_INITIAL_STATE_SIZE; // frames, not cells — forces a grow
        state.ensure_capacity(huge);
        assert!(state.capacity_cells() >= huge * 8);
        assert_eq!(state.high_water_frames(), huge);
    }

    #[test]
    fn shrink_to_initial_drops_back_down_on_request_only() {
        let mut state = VmState::new(8);
        state.ensure_capacity(K_INITIAL_STATE_SIZE);
        state.shrink_to_initial();
        assert_eq!(state.capacity_cells(), K_INITIAL_STATE_SIZE);
        assert_eq!(state.high_water_frames(), 0);
    }
}
