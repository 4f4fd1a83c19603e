use crate::exit::PpcException;
use crate::regs::{PpcReg, Spr};

/// The live execution context of one physical PowerPC vCPU.
///
/// This trait is the seam between the nested core and the execution engine
/// (interpreter or JIT) that actually runs guest code. The nested core only
/// moves architected state in and out of it; decoding, translation and
/// interrupt delivery stay on the engine side.
///
/// # Context switches
///
/// Whenever the nested core replaces the whole register set (entering or
/// leaving an L2), it calls, in order:
///
/// 1. [`compute_hflags`](PpcArchVCpu::compute_hflags)
/// 2. [`maybe_interrupt`](PpcArchVCpu::maybe_interrupt)
/// 3. [`tlb_flush`](PpcArchVCpu::tlb_flush)
/// 4. [`reset_reservation`](PpcArchVCpu::reset_reservation)
///
/// Translation caches are not tagged by L1/L2, so the flush is mandatory.
pub trait PpcArchVCpu {
    /// Reads general-purpose register `idx` (`0..32`).
    fn gpr(&self, idx: usize) -> u64;

    /// Writes general-purpose register `idx` (`0..32`).
    fn set_gpr(&mut self, idx: usize, val: u64);

    /// Reads a non-SPR architected register.
    fn reg(&self, reg: PpcReg) -> u64;

    /// Writes a non-SPR architected register.
    ///
    /// Writing [`PpcReg::Msr`] must not recompute derived state; the nested
    /// core calls [`compute_hflags`](PpcArchVCpu::compute_hflags) itself once
    /// the whole context is in place.
    fn set_reg(&mut self, reg: PpcReg, val: u64);

    /// Reads a special purpose register.
    fn spr(&self, spr: Spr) -> u64;

    /// Writes a special purpose register without side effects.
    fn set_spr(&mut self, spr: Spr, val: u64);

    /// The timebase offset currently applied to this vCPU.
    fn tb_offset(&self) -> u64;

    /// Sets the timebase offset applied to this vCPU.
    fn set_tb_offset(&mut self, offset: u64);

    /// Reads the current timebase, including the offset.
    fn timebase(&self) -> u64;

    /// The exception vector address of `excp` on this processor model.
    fn exception_vector(&self, excp: PpcException) -> u64 {
        excp.default_vector()
    }

    /// Implementation mask of the LPCR bits this processor model supports.
    fn lpcr_mask(&self) -> u64;

    /// Implementation mask of the MSR bits this processor model supports.
    fn msr_mask(&self) -> u64;

    /// Starts the hypervisor decrementer with `value` ticks remaining.
    fn arm_hdecr(&mut self, value: u64);

    /// Stops the hypervisor decrementer.
    fn disarm_hdecr(&mut self);

    /// Recomputes execution-mode flags derived from MSR and LPCR.
    fn compute_hflags(&mut self);

    /// Raises any interrupt the new context has unmasked.
    fn maybe_interrupt(&mut self);

    /// Invalidates every cached address translation.
    fn tlb_flush(&mut self);

    /// Drops any outstanding `larx` reservation.
    fn reset_reservation(&mut self);
}
