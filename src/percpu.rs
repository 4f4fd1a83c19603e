use alloc::boxed::Box;

use crate::state::NestedPpcState;

/// Per physical vCPU nesting state.
///
/// Every physical vCPU of the machine owns one of these, next to its
/// execution context. While the vCPU runs an L2, the L1 register state it
/// will return to is parked here.
///
/// Recommended usage: keep it alongside the engine's CPU object and pass both
/// to [`NestedCpuState::enter`] from the hypercall path and to
/// [`NestedCpuState::exit`] from interrupt delivery whenever
/// [`in_nested`](NestedCpuState::in_nested) is set.
#[derive(Debug, Default)]
pub struct NestedCpuState {
    /// Saved L1 state. `Some` exactly while an L2 is running.
    pub(crate) host_state: Option<Box<NestedPpcState>>,
}

impl NestedCpuState {
    /// Create a new per-vCPU state, not running nested.
    pub const fn new() -> Self {
        Self { host_state: None }
    }

    /// Whether this vCPU is currently executing an L2.
    pub fn in_nested(&self) -> bool {
        self.host_state.is_some()
    }

    /// The L1 state to be restored on the next exit, if nested.
    pub fn host_state(&self) -> Option<&NestedPpcState> {
        self.host_state.as_deref()
    }
}
