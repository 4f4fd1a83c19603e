use zerocopy::FromBytes;

use crate::arch_vcpu::PpcArchVCpu;
use crate::hal::{map_exact, GuestMemory, GuestPhysAddr};
use crate::hcall::{HcallError, HcallParam, HcallResult};
use crate::percpu::NestedCpuState;
use crate::regs::{Spr, LPCR_L2_FORCED, LPCR_L2_GUEST_MASK, LPCR_LPES0};
use crate::state::{HvGuestState, NestedPpcState, PtRegs, HV_GUEST_STATE_VERSION};

/// Computes the LPCR an L2 runs with.
///
/// The L1 may only choose the bits in [`LPCR_L2_GUEST_MASK`]; everything else
/// is inherited from the live (L1) LPCR, then the hypervisor-mode bits the
/// nested run depends on are forced.
pub fn nested_lpcr(live_lpcr: u64, guest_lpcr: u64, impl_mask: u64) -> u64 {
    let mut lpcr = (live_lpcr & !LPCR_L2_GUEST_MASK) | (guest_lpcr & LPCR_L2_GUEST_MASK);
    lpcr |= LPCR_L2_FORCED;
    lpcr &= !LPCR_LPES0;
    lpcr & impl_mask
}

impl NestedCpuState {
    /// Switches `cpu` from the calling L1 to the L2 described by the
    /// `hv_guest_state` at `hv_ptr` and the `pt_regs` at `regs_ptr`.
    ///
    /// On success the live context already is the L2 one: the caller must not
    /// write a return value to r3. Any error leaves the vCPU untouched.
    ///
    /// # Panics
    ///
    /// Panics if this vCPU is already running nested.
    pub fn enter<C, M>(
        &mut self,
        cpu: &mut C,
        mem: &M,
        hv_ptr: GuestPhysAddr,
        regs_ptr: GuestPhysAddr,
    ) -> HcallResult<()>
    where
        C: PpcArchVCpu + ?Sized,
        M: GuestMemory + ?Sized,
    {
        assert!(!self.in_nested(), "nested entry from an L2 is not allowed");

        let now = cpu.timebase();

        let hv_state = map_exact(mem, hv_ptr, HvGuestState::SIZE)
            .ok()
            .and_then(|buf| HvGuestState::read_from_bytes(buf).ok())
            .ok_or(HcallError::InvalidArgument(HcallParam::Any))?;

        // Versions 1 and 2 are accepted; the version 2 fields (DAWR1/DAWRX1) have
        // no emulation behind them.
        if hv_state.version > HV_GUEST_STATE_VERSION {
            debug!("H_ENTER_NESTED: unsupported hv_guest_state version {}", hv_state.version);
            return Err(HcallError::InvalidArgument(HcallParam::Any));
        }
        if hv_state.lpid == 0 {
            return Err(HcallError::InvalidArgument(HcallParam::Any));
        }

        let mut host_state =
            NestedPpcState::try_new_boxed().map_err(|_| HcallError::ResourceExhausted)?;

        debug_assert_eq!(cpu.spr(Spr::Lpidr), 0);
        debug_assert_eq!(cpu.spr(Spr::Dpdes), 0);
        host_state.save_from(cpu);

        // `host_state` is dropped on this error path.
        let regs = map_exact(mem, regs_ptr, PtRegs::SIZE)
            .ok()
            .and_then(|buf| PtRegs::read_from_bytes(buf).ok())
            .ok_or(HcallError::InvalidArgument(HcallParam::P2))?;

        let mut l2_state = NestedPpcState::default();
        regs.apply_to(&mut l2_state);
        hv_state.apply_to(&mut l2_state);
        l2_state.lpidr = u64::from(hv_state.lpid);
        l2_state.lpcr = nested_lpcr(cpu.spr(Spr::Lpcr), hv_state.lpcr, cpu.lpcr_mask());
        l2_state.tb_offset = cpu.tb_offset().wrapping_add(hv_state.tb_offset);

        l2_state.load_into(cpu);

        let hdec = hv_state.hdec_expiry.wrapping_sub(now);
        cpu.arm_hdecr(hdec);

        // `vcpu_token` needs no tracking: translations are flushed on every
        // transition, so an L2 vCPU moving between physical vCPUs is harmless.
        self.host_state = Some(host_state);

        debug!(
            "H_ENTER_NESTED: lpid {} nip {:#x} hdec {:#x}",
            hv_state.lpid, l2_state.nip, hdec
        );
        Ok(())
    }
}
