use alloc::alloc::{alloc_zeroed, Layout};
use alloc::boxed::Box;
use core::mem::size_of;

use axerrno::{ax_err, AxResult};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::arch_vcpu::PpcArchVCpu;
use crate::regs::{PpcReg, Spr, NUM_GPRS};

/// Highest `hv_guest_state` version accepted by `H_ENTER_NESTED`.
///
/// Version 2 only adds DAWR1/DAWRX1, which are carried but not emulated.
pub const HV_GUEST_STATE_VERSION: u64 = 2;

/// The architected register state switched on every L1 <-> L2 transition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NestedPpcState {
    pub gpr: [u64; NUM_GPRS],
    pub lr: u64,
    pub ctr: u64,
    pub cfar: u64,
    pub msr: u64,
    pub nip: u64,
    pub cr: u64,
    pub xer: u64,

    pub lpcr: u64,
    pub lpidr: u64,
    pub pcr: u64,
    pub dpdes: u64,
    pub hfscr: u64,
    pub srr0: u64,
    pub srr1: u64,
    pub sprg: [u64; 4],
    pub pidr: u64,
    pub ppr: u64,

    pub tb_offset: u64,
}

impl NestedPpcState {
    /// Allocates a zeroed state on the heap, reporting allocation failure
    /// instead of aborting.
    pub fn try_new_boxed() -> AxResult<Box<Self>> {
        let layout = Layout::new::<Self>();
        // SAFETY: `Self` is not zero-sized.
        let ptr = unsafe { alloc_zeroed(layout) } as *mut Self;
        if ptr.is_null() {
            return ax_err!(NoMemory, "cannot allocate nested host state");
        }
        // SAFETY: `ptr` comes from the global allocator with `Self`'s layout, and
        // an all-zero bit pattern is a valid `Self` (plain integers only).
        Ok(unsafe { Box::from_raw(ptr) })
    }

    /// Captures the live register state of `cpu`.
    pub fn save<C: PpcArchVCpu + ?Sized>(cpu: &C) -> Self {
        let mut state = Self::default();
        state.save_from(cpu);
        state
    }

    /// Overwrites `self` with the live register state of `cpu`.
    pub fn save_from<C: PpcArchVCpu + ?Sized>(&mut self, cpu: &C) {
        for (idx, gpr) in self.gpr.iter_mut().enumerate() {
            *gpr = cpu.gpr(idx);
        }

        self.lr = cpu.reg(PpcReg::Lr);
        self.ctr = cpu.reg(PpcReg::Ctr);
        self.cfar = cpu.reg(PpcReg::Cfar);
        self.msr = cpu.reg(PpcReg::Msr);
        self.nip = cpu.reg(PpcReg::Nip);
        self.cr = cpu.reg(PpcReg::Cr);
        self.xer = cpu.reg(PpcReg::Xer);

        self.lpcr = cpu.spr(Spr::Lpcr);
        self.lpidr = cpu.spr(Spr::Lpidr);
        self.pcr = cpu.spr(Spr::Pcr);
        self.dpdes = cpu.spr(Spr::Dpdes);
        self.hfscr = cpu.spr(Spr::Hfscr);
        self.srr0 = cpu.spr(Spr::Srr0);
        self.srr1 = cpu.spr(Spr::Srr1);
        for (sprg, spr) in self.sprg.iter_mut().zip(Spr::SPRG) {
            *sprg = cpu.spr(spr);
        }
        self.pidr = cpu.spr(Spr::Pidr);
        self.ppr = cpu.spr(Spr::Ppr);

        self.tb_offset = cpu.tb_offset();
    }

    /// Makes `self` the live register state of `cpu`.
    ///
    /// This is a full context switch: derived mode flags are recomputed from
    /// the new MSR, newly unmasked interrupts are raised, translation caches
    /// are flushed and any `larx` reservation is dropped.
    pub fn load_into<C: PpcArchVCpu + ?Sized>(&self, cpu: &mut C) {
        for (idx, gpr) in self.gpr.iter().enumerate() {
            cpu.set_gpr(idx, *gpr);
        }

        cpu.set_reg(PpcReg::Lr, self.lr);
        cpu.set_reg(PpcReg::Ctr, self.ctr);
        cpu.set_reg(PpcReg::Cfar, self.cfar);
        cpu.set_reg(PpcReg::Msr, self.msr);
        cpu.set_reg(PpcReg::Nip, self.nip);
        cpu.set_reg(PpcReg::Cr, self.cr);
        cpu.set_reg(PpcReg::Xer, self.xer);

        cpu.set_spr(Spr::Lpcr, self.lpcr);
        cpu.set_spr(Spr::Lpidr, self.lpidr);
        cpu.set_spr(Spr::Pcr, self.pcr);
        cpu.set_spr(Spr::Dpdes, self.dpdes);
        cpu.set_spr(Spr::Hfscr, self.hfscr);
        cpu.set_spr(Spr::Srr0, self.srr0);
        cpu.set_spr(Spr::Srr1, self.srr1);
        for (sprg, spr) in self.sprg.iter().zip(Spr::SPRG) {
            cpu.set_spr(spr, *sprg);
        }
        cpu.set_spr(Spr::Pidr, self.pidr);
        cpu.set_spr(Spr::Ppr, self.ppr);

        cpu.set_tb_offset(self.tb_offset);

        trace!("nested context switch: lpid {:#x} nip {:#x}", self.lpidr, self.nip);

        // MSR changed: recompute hflags and possible interrupts.
        cpu.compute_hflags();
        cpu.maybe_interrupt();
        // L1 and L2 translations share untagged caches.
        cpu.tlb_flush();
        cpu.reset_reservation();
    }
}

/// `struct hv_guest_state`: the L2 hypervisor state an L1 passes to
/// `H_ENTER_NESTED` and gets back on exit.
///
/// Laid out in guest memory exactly as declared, in native byte order.
#[repr(C)]
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
pub struct HvGuestState {
    pub version: u64,
    pub lpid: u32,
    pub vcpu_token: u32,
    pub lpcr: u64,
    pub pcr: u64,
    /// Not used: there is no AMOR emulation for an L2.
    pub amor: u64,
    pub dpdes: u64,
    pub hfscr: u64,
    /// Delta added to the L1's own timebase offset.
    pub tb_offset: u64,
    pub dawr0: u64,
    pub dawrx0: u64,
    pub ciabr: u64,
    pub hdec_expiry: u64,
    pub purr: u64,
    pub spurr: u64,
    pub ic: u64,
    pub vtb: u64,
    pub hdar: u64,
    pub hdsisr: u32,
    pub heir: u32,
    pub asdr: u64,
    pub srr0: u64,
    pub srr1: u64,
    pub sprg: [u64; 4],
    pub pidr: u64,
    pub cfar: u64,
    pub ppr: u64,
    // Version 2.
    pub dawr1: u64,
    pub dawrx1: u64,
}

impl HvGuestState {
    /// Size of the structure in guest memory.
    pub const SIZE: usize = size_of::<Self>();

    /// Copies the SPRs the L1 controls directly into an L2 state.
    ///
    /// LPCR, LPIDR and the timebase offset need host-side adjustment and are
    /// left to the caller.
    pub fn apply_to(&self, state: &mut NestedPpcState) {
        state.cfar = self.cfar;
        state.pcr = self.pcr;
        state.dpdes = self.dpdes;
        state.hfscr = self.hfscr;
        state.srr0 = self.srr0;
        state.srr1 = self.srr1;
        state.sprg = self.sprg;
        state.pidr = self.pidr;
        state.ppr = self.ppr;
    }

    /// Reports the final L2 SPR values back to the L1.
    pub fn update_from(&mut self, state: &NestedPpcState) {
        self.cfar = state.cfar;
        self.lpcr = state.lpcr;
        self.pcr = state.pcr;
        self.dpdes = state.dpdes;
        self.hfscr = state.hfscr;
        self.srr0 = state.srr0;
        self.srr1 = state.srr1;
        self.sprg = state.sprg;
        self.pidr = state.pidr;
        self.ppr = state.ppr;
    }
}

/// `struct pt_regs`: the L2 user-visible registers, in native byte order.
#[repr(C)]
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
pub struct PtRegs {
    pub gpr: [u64; NUM_GPRS],
    pub nip: u64,
    pub msr: u64,
    pub orig_gpr3: u64,
    pub ctr: u64,
    pub link: u64,
    pub xer: u64,
    pub ccr: u64,
    pub softe: u64,
    pub trap: u64,
    pub dar: u64,
    pub dsisr: u64,
    pub result: u64,
}

impl PtRegs {
    /// Size of the structure in guest memory.
    pub const SIZE: usize = size_of::<Self>();

    /// Copies the user-visible registers into an L2 state.
    pub fn apply_to(&self, state: &mut NestedPpcState) {
        state.gpr = self.gpr;
        state.lr = self.link;
        state.ctr = self.ctr;
        state.xer = self.xer;
        state.cr = self.ccr;
        state.msr = self.msr;
        state.nip = self.nip;
    }

    /// Reports the final L2 registers back to the L1.
    ///
    /// `nip` and `msr` are passed separately because the resume point depends
    /// on the interrupt that ended the L2 run.
    pub fn update_from(&mut self, state: &NestedPpcState, nip: u64, msr: u64) {
        self.gpr = state.gpr;
        self.link = state.lr;
        self.ctr = state.ctr;
        self.xer = state.xer;
        self.ccr = state.cr;
        self.nip = nip;
        self.msr = msr;
    }
}

const _: () = assert!(HvGuestState::SIZE == 240);
const _: () = assert!(PtRegs::SIZE == (NUM_GPRS + 12) * 8);
