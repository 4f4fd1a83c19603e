use crate::hal::GuestPhysAddr;
use crate::state::NestedPpcState;

/// Private timebase facility of a nested vCPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GuestTimebase {
    /// Timebase frequency, in Hz.
    freq: u64,
    /// Decrementer frequency, in Hz. Equal to the timebase on server parts.
    decr_freq: u64,
    /// Offset from the host timebase.
    tb_offset: u64,
}

impl GuestTimebase {
    /// A timebase running at `freq` Hz, in sync with the host.
    pub const fn new(freq: u64) -> Self {
        Self {
            freq,
            decr_freq: freq,
            tb_offset: 0,
        }
    }

    pub const fn freq(&self) -> u64 {
        self.freq
    }

    pub const fn decr_freq(&self) -> u64 {
        self.decr_freq
    }

    pub const fn tb_offset(&self) -> u64 {
        self.tb_offset
    }

    pub fn set_tb_offset(&mut self, offset: u64) {
        self.tb_offset = offset;
    }
}

/// A guest buffer registered for the run-vCPU protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunBuffer {
    pub addr: GuestPhysAddr,
    pub size: u64,
}

impl RunBuffer {
    /// No buffer.
    pub const NONE: Self = Self {
        addr: GuestPhysAddr::from_usize(0),
        size: 0,
    };

    /// Whether a buffer has been registered.
    pub fn is_registered(&self) -> bool {
        self.addr.as_usize() != 0
    }
}

/// A vCPU of a PAPR nested guest.
#[derive(Clone, Debug)]
pub struct NestedGuestVcpu {
    enabled: bool,
    /// Execution context. Starts zeroed: nothing is inherited from the L1.
    state: NestedPpcState,
    /// Processor version register seen by the guest.
    pvr: u64,
    runbuf_in: RunBuffer,
    runbuf_out: RunBuffer,
    tb: GuestTimebase,
}

impl NestedGuestVcpu {
    /// Create a new, disabled vCPU with a zeroed context.
    pub(crate) fn new(pvr: u64, timebase_freq: u64) -> Self {
        Self {
            enabled: false,
            state: NestedPpcState::default(),
            pvr,
            runbuf_in: RunBuffer::NONE,
            runbuf_out: RunBuffer::NONE,
            tb: GuestTimebase::new(timebase_freq),
        }
    }

    /// Whether the vCPU finished creation and may be run.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn enable(&mut self) {
        self.enabled = true;
    }

    /// The saved execution context of the vCPU.
    pub fn state(&self) -> &NestedPpcState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut NestedPpcState {
        &mut self.state
    }

    /// Processor version register seen by the guest.
    pub fn pvr(&self) -> u64 {
        self.pvr
    }

    pub fn timebase(&self) -> &GuestTimebase {
        &self.tb
    }

    pub fn timebase_mut(&mut self) -> &mut GuestTimebase {
        &mut self.tb
    }

    /// The registered `(input, output)` run buffers.
    pub fn run_buffers(&self) -> (RunBuffer, RunBuffer) {
        (self.runbuf_in, self.runbuf_out)
    }

    /// Registers the input and output buffers of the run-vCPU protocol.
    pub fn set_run_buffers(&mut self, input: RunBuffer, output: RunBuffer) {
        self.runbuf_in = input;
        self.runbuf_out = output;
    }
}
