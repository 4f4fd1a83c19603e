use crate::arch_vcpu::PpcArchVCpu;
use crate::config::NestedConfig;
use crate::exit::PpcException;
use crate::guest::NestedGuests;
use crate::hal::{GuestMemory, GuestPhysAddr};
use crate::hcall::{
    HcallError, HcallFamily, HcallParam, HcallResult, HcallRet, HcallReturn, NestedHcall,
    H_NO_CONTINUE_TOKEN,
};
use crate::percpu::NestedCpuState;
use crate::regs::{PowerGeneration, Spr, H_GUEST_CAPABILITIES_COPY_MEM, PTCR_PRTS_MASK};

/// Machine-wide state of the nested virtualization core.
///
/// Hypercalls are serialized by the machine's dispatch layer, so every
/// handler simply takes `&mut self`. Per physical vCPU state lives in
/// [`NestedCpuState`] instead.
///
/// Note that growing a guest's vCPU list while one of that guest's vCPUs is
/// running is not guarded here; callers must serialize guest configuration
/// against execution of the same guest.
#[derive(Debug)]
pub struct SpaprNested {
    config: NestedConfig,
    /// Partition table control register of the KVM-HV API; 0 until set.
    ptcr: u64,
    capabilities_set: bool,
    /// PVR latched by capability negotiation, inherited by new guests.
    pvr_base: u64,
    /// Created on the first `H_GUEST_CREATE`.
    guests: Option<NestedGuests>,
}

impl SpaprNested {
    /// Create the nested state of a machine.
    pub const fn new(config: NestedConfig) -> Self {
        Self {
            config,
            ptcr: 0,
            capabilities_set: false,
            pvr_base: 0,
            guests: None,
        }
    }

    /// The configuration the machine was created with.
    pub const fn config(&self) -> &NestedConfig {
        &self.config
    }

    /// The registered partition table control register, 0 if none.
    pub const fn ptcr(&self) -> u64 {
        self.ptcr
    }

    /// Whether the L1 completed capability negotiation.
    pub const fn capabilities_set(&self) -> bool {
        self.capabilities_set
    }

    /// The processor version new guests are created with.
    pub const fn pvr_base(&self) -> u64 {
        self.pvr_base
    }

    /// The guest registry, once the first guest was created.
    pub fn guests(&self) -> Option<&NestedGuests> {
        self.guests.as_ref()
    }

    /// Mutable access to the guest registry, once the first guest was created.
    pub fn guests_mut(&mut self) -> Option<&mut NestedGuests> {
        self.guests.as_mut()
    }

    /// Whether the hypercalls of `family` are offered to the L1.
    pub const fn family_enabled(&self, family: HcallFamily) -> bool {
        match family {
            HcallFamily::KvmHv => self.config.kvm_hv,
            HcallFamily::Papr => self.config.papr,
        }
    }

    /// `KVMPPC_H_SET_PARTITION_TABLE`: registers the L1's partition table.
    pub fn set_partition_table(&mut self, ptcr: u64) -> HcallResult<()> {
        if !self.config.kvm_hv {
            return Err(HcallError::FeatureDisabled);
        }
        if (ptcr & PTCR_PRTS_MASK) + 12 - 4 > 12 {
            return Err(HcallError::InvalidArgument(HcallParam::Any));
        }
        self.ptcr = ptcr;
        Ok(())
    }

    /// `KVMPPC_H_ENTER_NESTED`: starts running an L2 on `cpu`.
    ///
    /// Returns [`HcallReturn::Resumed`] on success; see
    /// [`NestedCpuState::enter`].
    pub fn enter_nested<C, M>(
        &self,
        cpu: &mut C,
        nested_cpu: &mut NestedCpuState,
        mem: &M,
        hv_ptr: GuestPhysAddr,
        regs_ptr: GuestPhysAddr,
    ) -> HcallResult
    where
        C: PpcArchVCpu + ?Sized,
        M: GuestMemory + ?Sized,
    {
        if self.ptcr == 0 {
            return Err(HcallError::NotAvailable);
        }
        nested_cpu.enter(cpu, mem, hv_ptr, regs_ptr)?;
        Ok(HcallReturn::Resumed)
    }

    /// Returns `cpu` from its L2 to the L1 after `excp` was taken.
    ///
    /// Called by interrupt delivery, not through a hypercall.
    pub fn exit_nested<C, M>(
        &self,
        cpu: &mut C,
        nested_cpu: &mut NestedCpuState,
        mem: &mut M,
        excp: PpcException,
    ) -> HcallResult<()>
    where
        C: PpcArchVCpu + ?Sized,
        M: GuestMemory + ?Sized,
    {
        nested_cpu.exit(cpu, mem, excp)
    }

    /// `KVMPPC_H_TLB_INVALIDATE`.
    ///
    /// Nothing to do: no L2 translation survives an L1 <-> L2 transition.
    pub fn tlb_invalidate(&self) -> HcallResult<()> {
        Ok(())
    }

    /// `KVMPPC_H_COPY_TOFROM_GUEST`.
    ///
    /// Not provided; the L1 falls back to walking the L2 page tables itself.
    pub fn copy_tofrom_guest(&self) -> HcallResult<()> {
        Err(HcallError::Unsupported)
    }

    /// `H_GUEST_GET_CAPABILITIES`: the capabilities offered on this host
    /// processor.
    ///
    /// Returns `None` on a processor with no nested mode: the call still
    /// succeeds, but leaves r4 alone.
    pub fn get_capabilities<C>(&self, cpu: &C, flags: u64) -> HcallResult<Option<u64>>
    where
        C: PpcArchVCpu + ?Sized,
    {
        if flags != 0 {
            return Err(HcallError::InvalidArgument(HcallParam::Any));
        }
        Ok(PowerGeneration::from_pvr(cpu.spr(Spr::Pvr)).map(PowerGeneration::mode_capability))
    }

    /// `H_GUEST_SET_CAPABILITIES`: fixes the capabilities all later guests
    /// are created with.
    pub fn set_capabilities<C>(&mut self, cpu: &C, flags: u64, capabilities: u64) -> HcallResult<()>
    where
        C: PpcArchVCpu + ?Sized,
    {
        if flags != 0 {
            return Err(HcallError::InvalidArgument(HcallParam::Any));
        }
        if capabilities & H_GUEST_CAPABILITIES_COPY_MEM != 0 {
            return Err(HcallError::CapabilityRejected { reason: 0 });
        }

        let pvr = cpu.spr(Spr::Pvr);
        if let Some(generation) = PowerGeneration::from_pvr(pvr) {
            if capabilities & generation.mode_capability() == 0 {
                return Err(HcallError::CapabilityRejected {
                    reason: generation.missing_mode_reason(),
                });
            }
        }

        self.capabilities_set = true;
        self.pvr_base = pvr;
        debug!("nested capabilities set: {:#x}, pvr {:#x}", capabilities, pvr);
        Ok(())
    }

    /// `H_GUEST_CREATE`: creates a guest and returns its lpid.
    pub fn create_guest(&mut self, flags: u64, continue_token: u64) -> HcallResult<u64> {
        if flags != 0 {
            return Err(HcallError::UnsupportedFlag);
        }
        if continue_token != H_NO_CONTINUE_TOKEN {
            return Err(HcallError::InvalidArgument(HcallParam::P2));
        }
        if !self.config.papr {
            return Err(HcallError::FeatureDisabled);
        }
        if !self.capabilities_set {
            return Err(HcallError::WrongState);
        }

        let config = self.config;
        self.guests
            .get_or_insert_with(|| NestedGuests::new(&config))
            .create(self.pvr_base)
            .map_err(|_| HcallError::ResourceExhausted)
    }

    /// `H_GUEST_CREATE_VCPU`: adds vCPU `vcpuid` to guest `lpid`.
    pub fn create_vcpu<C>(&mut self, cpu: &C, flags: u64, lpid: u64, vcpuid: u64) -> HcallResult<()>
    where
        C: PpcArchVCpu + ?Sized,
    {
        if flags != 0 {
            return Err(HcallError::UnsupportedFlag);
        }
        let guest = self
            .guests
            .as_mut()
            .and_then(|guests| guests.get_mut(lpid))
            .ok_or(HcallError::InvalidArgument(HcallParam::P2))?;
        guest.create_vcpu(vcpuid, cpu.spr(Spr::Pvr))
    }

    /// Handles hypercall `opcode` with arguments `args` (r4 onwards) issued by
    /// the L1 running on `cpu`.
    ///
    /// Returns `None` if `opcode` is not a nested hypercall of an enabled
    /// family, so the caller can try other handlers. Otherwise the outcome is
    /// already applied to `cpu`: r3 (and r4 where the call has a secondary
    /// output) are written for [`HcallReturn::Completed`], and nothing is
    /// written for [`HcallReturn::Resumed`].
    pub fn dispatch<C, M>(
        &mut self,
        cpu: &mut C,
        nested_cpu: &mut NestedCpuState,
        mem: &M,
        opcode: u64,
        args: &[u64],
    ) -> Option<HcallReturn>
    where
        C: PpcArchVCpu + ?Sized,
        M: GuestMemory + ?Sized,
    {
        let hcall = NestedHcall::from_opcode(opcode)?;
        if !self.family_enabled(hcall.family()) {
            return None;
        }
        let arg = |idx: usize| args.get(idx).copied().unwrap_or(0);

        let result = match hcall {
            NestedHcall::SetPartitionTable => {
                self.set_partition_table(arg(0)).map(|()| HcallRet::SUCCESS)
            }
            NestedHcall::EnterNested => {
                let hv_ptr = GuestPhysAddr::from_hcall_arg(arg(0));
                let regs_ptr = GuestPhysAddr::from_hcall_arg(arg(1));
                match self.enter_nested(cpu, nested_cpu, mem, hv_ptr, regs_ptr) {
                    Ok(HcallReturn::Completed(ret)) => Ok(ret),
                    Ok(HcallReturn::Resumed) => return Some(HcallReturn::Resumed),
                    Err(err) => Err(err),
                }
            }
            NestedHcall::TlbInvalidate => self.tlb_invalidate().map(|()| HcallRet::SUCCESS),
            NestedHcall::CopyTofromGuest => self.copy_tofrom_guest().map(|()| HcallRet::SUCCESS),
            NestedHcall::GuestGetCapabilities => self
                .get_capabilities(cpu, arg(0))
                .map(|caps| caps.map_or(HcallRet::SUCCESS, HcallRet::success_with)),
            NestedHcall::GuestSetCapabilities => self
                .set_capabilities(cpu, arg(0), arg(1))
                .map(|()| HcallRet::SUCCESS),
            NestedHcall::GuestCreate => self
                .create_guest(arg(0), arg(1))
                .map(HcallRet::success_with),
            NestedHcall::GuestCreateVcpu => self
                .create_vcpu(cpu, arg(0), arg(1), arg(2))
                .map(|()| HcallRet::SUCCESS),
        };

        let ret = result.unwrap_or_else(|err| {
            debug!("{:?} failed: {}", hcall, err);
            HcallRet::from(err)
        });
        cpu.set_gpr(3, ret.status as u64);
        if let Some(r4) = ret.r4 {
            cpu.set_gpr(4, r4);
        }
        Some(HcallReturn::Completed(ret))
    }
}
