use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use axerrno::{ax_err, AxResult};

use crate::config::NestedConfig;
use crate::hcall::{HcallError, HcallParam, HcallResult};
use crate::vcpu::NestedGuestVcpu;

/// A guest created through the PAPR nested API.
#[derive(Clone, Debug)]
pub struct NestedGuest {
    lpid: u64,
    /// PVR the guest's vCPUs report, latched from capability negotiation.
    pvr_logical: u64,
    vcpu_max: usize,
    timebase_freq: u64,
    /// Indexed by vCPU id; only ever grows.
    vcpus: Vec<NestedGuestVcpu>,
}

impl NestedGuest {
    fn new(lpid: u64, pvr_logical: u64, config: &NestedConfig) -> Self {
        Self {
            lpid,
            pvr_logical,
            vcpu_max: config.vcpu_max,
            timebase_freq: config.timebase_freq,
            vcpus: Vec::new(),
        }
    }

    pub const fn lpid(&self) -> u64 {
        self.lpid
    }

    pub const fn pvr_logical(&self) -> u64 {
        self.pvr_logical
    }

    /// Number of vCPUs created so far.
    pub fn vcpu_count(&self) -> usize {
        self.vcpus.len()
    }

    pub fn vcpu(&self, vcpuid: u64) -> Option<&NestedGuestVcpu> {
        self.vcpus.get(usize::try_from(vcpuid).ok()?)
    }

    pub fn vcpu_mut(&mut self, vcpuid: u64) -> Option<&mut NestedGuestVcpu> {
        self.vcpus.get_mut(usize::try_from(vcpuid).ok()?)
    }

    /// Whether `vcpuid` names a usable vCPU, and if `inoutbuf` is set, whether
    /// both of its run buffers are registered.
    pub fn vcpu_check(&self, vcpuid: u64, inoutbuf: bool) -> bool {
        if vcpuid >= self.vcpu_max as u64 {
            return false;
        }
        let Some(vcpu) = self.vcpu(vcpuid) else {
            return false;
        };
        if !vcpu.is_enabled() {
            return false;
        }
        if !inoutbuf {
            return true;
        }
        let (input, output) = vcpu.run_buffers();
        input.is_registered() && output.is_registered()
    }

    /// Appends vCPU `vcpuid`, which must be the next free index.
    ///
    /// The new vCPU starts from a zeroed context with `host_pvr` as its
    /// processor version.
    pub fn create_vcpu(&mut self, vcpuid: u64, host_pvr: u64) -> HcallResult<()> {
        let count = self.vcpus.len();
        if vcpuid < count as u64 {
            return Err(HcallError::AlreadyInUse);
        }
        if count >= self.vcpu_max {
            return Err(HcallError::VcpuLimit);
        }
        if vcpuid != count as u64 {
            // vCPU ids are handed out linearly.
            return Err(HcallError::InvalidArgument(HcallParam::Any));
        }

        self.vcpus
            .try_reserve(1)
            .map_err(|_| HcallError::ResourceExhausted)?;
        let mut vcpu = NestedGuestVcpu::new(host_pvr, self.timebase_freq);
        vcpu.enable();
        self.vcpus.push(vcpu);

        if !self.vcpu_check(vcpuid, false) {
            return Err(HcallError::InvalidArgument(HcallParam::Any));
        }
        Ok(())
    }
}

/// Registry of PAPR nested guests, keyed by lpid.
///
/// Guests live in an arena for the lifetime of the machine; the lpid map
/// only holds indices into it.
#[derive(Clone, Debug)]
pub struct NestedGuests {
    config: NestedConfig,
    arena: Vec<NestedGuest>,
    by_lpid: BTreeMap<u64, usize>,
}

impl NestedGuests {
    /// An empty registry with the limits of `config`.
    pub fn new(config: &NestedConfig) -> Self {
        Self {
            config: *config,
            arena: Vec::new(),
            by_lpid: BTreeMap::new(),
        }
    }

    /// Highest lpid this registry hands out.
    pub const fn lpid_max(&self) -> u64 {
        self.config.lpid_max
    }

    pub fn len(&self) -> usize {
        self.by_lpid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_lpid.is_empty()
    }

    pub fn get(&self, lpid: u64) -> Option<&NestedGuest> {
        self.by_lpid.get(&lpid).map(|&idx| &self.arena[idx])
    }

    pub fn get_mut(&mut self, lpid: u64) -> Option<&mut NestedGuest> {
        let idx = *self.by_lpid.get(&lpid)?;
        Some(&mut self.arena[idx])
    }

    /// Guests in ascending lpid order.
    pub fn iter(&self) -> impl Iterator<Item = &NestedGuest> {
        self.by_lpid.values().map(|&idx| &self.arena[idx])
    }

    /// Creates a guest with the lowest free lpid and returns that lpid.
    ///
    /// lpid 0 is the host's and never handed out.
    pub fn create(&mut self, pvr_logical: u64) -> AxResult<u64> {
        let lpid_max = self.config.lpid_max;
        if self.len() as u64 >= lpid_max {
            return ax_err!(NoMemory, "nested guest limit reached");
        }

        let Some(lpid) = (1..=lpid_max).find(|lpid| !self.by_lpid.contains_key(lpid)) else {
            return ax_err!(NoMemory, "no free nested lpid");
        };

        self.arena
            .try_reserve(1)
            .or_else(|_| ax_err!(NoMemory, "cannot allocate nested guest"))?;
        self.arena
            .push(NestedGuest::new(lpid, pvr_logical, &self.config));
        self.by_lpid.insert(lpid, self.arena.len() - 1);

        info!("nested guest created: lpid {} (max {})", lpid, lpid_max);
        Ok(lpid)
    }
}
