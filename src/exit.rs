use zerocopy::{FromBytes, IntoBytes};

use crate::arch_vcpu::PpcArchVCpu;
use crate::hal::{map_exact_mut, GuestMemory, GuestPhysAddr};
use crate::hcall::{HcallError, HcallParam, HcallResult};
use crate::percpu::NestedCpuState;
use crate::regs::Spr;
use crate::state::{HvGuestState, NestedPpcState, PtRegs};

/// The interrupt that ends an L2 run.
///
/// Any interrupt taken while an L2 executes is reflected to the L1 as the
/// return from its `H_ENTER_NESTED` call, with the vector of the interrupt as
/// the hcall return value.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PpcException {
    SystemReset,
    MachineCheck,
    DataStorage,
    DataSegment,
    InstructionStorage,
    InstructionSegment,
    External,
    Alignment,
    Program,
    FpUnavailable,
    Decrementer,
    HvDecrementer,
    Doorbell,
    SystemCall,
    Trace,
    /// Hypervisor data storage interrupt.
    HvDataStorage,
    /// Hypervisor instruction storage interrupt.
    HvInstructionStorage,
    HvEmulationAssistance,
    HvDoorbell,
    HvVirtualization,
    PerfMonitor,
    VecUnavailable,
    VsxUnavailable,
    FacilityUnavailable,
    HvFacilityUnavailable,
}

impl PpcException {
    /// The Book3S-64 (POWER8 onwards) vector offset of this interrupt.
    pub const fn default_vector(self) -> u64 {
        match self {
            Self::SystemReset => 0x100,
            Self::MachineCheck => 0x200,
            Self::DataStorage => 0x300,
            Self::DataSegment => 0x380,
            Self::InstructionStorage => 0x400,
            Self::InstructionSegment => 0x480,
            Self::External => 0x500,
            Self::Alignment => 0x600,
            Self::Program => 0x700,
            Self::FpUnavailable => 0x800,
            Self::Decrementer => 0x900,
            Self::HvDecrementer => 0x980,
            Self::Doorbell => 0xa00,
            Self::SystemCall => 0xc00,
            Self::Trace => 0xd00,
            Self::HvDataStorage => 0xe00,
            Self::HvInstructionStorage => 0xe20,
            Self::HvEmulationAssistance => 0xe40,
            Self::HvDoorbell => 0xe80,
            Self::HvVirtualization => 0xea0,
            Self::PerfMonitor => 0xf00,
            Self::VecUnavailable => 0xf20,
            Self::VsxUnavailable => 0xf40,
            Self::FacilityUnavailable => 0xf60,
            Self::HvFacilityUnavailable => 0xf80,
        }
    }

    /// Whether this interrupt saves its context in SRR0/SRR1 rather than
    /// HSRR0/HSRR1.
    ///
    /// Everything else that ends an L2 run is delivered to the hypervisor
    /// level and thus uses the HSRR pair.
    pub const fn uses_srr(self) -> bool {
        matches!(self, Self::MachineCheck | Self::SystemReset | Self::SystemCall)
    }
}

/// Interrupt-time registers which are not part of [`NestedPpcState`].
#[derive(Clone, Copy, Debug, Default)]
struct TrapRegs {
    hsrr0: u64,
    hsrr1: u64,
    hdar: u64,
    hdsisr: u64,
    asdr: u64,
}

impl TrapRegs {
    fn save<C: PpcArchVCpu + ?Sized>(cpu: &C) -> Self {
        Self {
            hsrr0: cpu.spr(Spr::Hsrr0),
            hsrr1: cpu.spr(Spr::Hsrr1),
            hdar: cpu.spr(Spr::Hdar),
            hdsisr: cpu.spr(Spr::Hdsisr),
            asdr: cpu.spr(Spr::Asdr),
        }
    }
}

impl NestedCpuState {
    /// Switches `cpu` back from the running L2 to its L1, as the return of the
    /// L1's `H_ENTER_NESTED` call, because `excp` was raised in the L2.
    ///
    /// The L1 context is restored unconditionally and r3 holds the vector of
    /// `excp`. The L2 state is then written back to the `hv_guest_state` and
    /// `pt_regs` the L1 passed at entry. A failed write-back is reported
    /// through r3 and the returned error, but the switch is never undone.
    ///
    /// # Panics
    ///
    /// Panics if this vCPU is not running nested.
    pub fn exit<C, M>(&mut self, cpu: &mut C, mem: &mut M, excp: PpcException) -> HcallResult<()>
    where
        C: PpcArchVCpu + ?Sized,
        M: GuestMemory + ?Sized,
    {
        let Some(host_state) = self.host_state.take() else {
            panic!("nested exit without a nested entry");
        };

        let l2_state = NestedPpcState::save(cpu);
        let trap = TrapRegs::save(cpu);

        // Back to the L1, including for any error below.
        debug_assert_ne!(cpu.spr(Spr::Lpidr), 0);
        host_state.load_into(cpu);
        let vector = cpu.exception_vector(excp);
        cpu.set_gpr(3, vector);

        cpu.disarm_hdecr();

        // The buffers are the L1's own hcall arguments.
        let hv_ptr = GuestPhysAddr::from_hcall_arg(host_state.gpr[4]);
        let regs_ptr = GuestPhysAddr::from_hcall_arg(host_state.gpr[5]);
        drop(host_state);

        debug!(
            "nested exit: lpid {} {:?} nip {:#x}",
            l2_state.lpidr, excp, l2_state.nip
        );

        let msr_mask = cpu.msr_mask();
        let result = write_back_hv_state(mem, hv_ptr, &l2_state, &trap, excp)
            .and_then(|_| write_back_regs(mem, regs_ptr, &l2_state, &trap, excp, msr_mask));
        if let Err(err) = result {
            warn!("nested exit: cannot write back L2 state: {}", err);
            cpu.set_gpr(3, err.code() as u64);
        }
        result
    }
}

fn write_back_hv_state<M: GuestMemory + ?Sized>(
    mem: &mut M,
    hv_ptr: GuestPhysAddr,
    l2_state: &NestedPpcState,
    trap: &TrapRegs,
    excp: PpcException,
) -> HcallResult<()> {
    let err = HcallError::InvalidArgument(HcallParam::Any);
    let buf = map_exact_mut(mem, hv_ptr, HvGuestState::SIZE).map_err(|_| err)?;

    // Fields the L1 owns (`vcpu_token`, `hdec_expiry`, ...) are written back
    // unchanged.
    let mut hv_state = HvGuestState::read_from_bytes(buf).map_err(|_| err)?;
    hv_state.update_from(l2_state);
    match excp {
        PpcException::HvDataStorage => {
            hv_state.hdar = trap.hdar;
            hv_state.hdsisr = trap.hdsisr as u32;
            hv_state.asdr = trap.asdr;
        }
        PpcException::HvInstructionStorage => {
            hv_state.asdr = trap.asdr;
        }
        _ => {}
    }
    hv_state.write_to(buf).map_err(|_| err)
}

fn write_back_regs<M: GuestMemory + ?Sized>(
    mem: &mut M,
    regs_ptr: GuestPhysAddr,
    l2_state: &NestedPpcState,
    trap: &TrapRegs,
    excp: PpcException,
    msr_mask: u64,
) -> HcallResult<()> {
    let err = HcallError::InvalidArgument(HcallParam::P2);
    let buf = map_exact_mut(mem, regs_ptr, PtRegs::SIZE).map_err(|_| err)?;

    let (nip, msr) = if excp.uses_srr() {
        (l2_state.srr0, l2_state.srr1)
    } else {
        (trap.hsrr0, trap.hsrr1)
    };

    let mut regs = PtRegs::read_from_bytes(buf).map_err(|_| err)?;
    regs.update_from(l2_state, nip, msr & msr_mask);
    regs.write_to(buf).map_err(|_| err)
}
