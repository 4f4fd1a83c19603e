/// Default upper bound on PAPR nested guests per machine.
pub const NESTED_GUEST_MAX: u64 = 4096;

/// Default upper bound on vCPUs per PAPR nested guest.
pub const NESTED_GUEST_VCPU_MAX: usize = 2048;

/// Default timebase frequency of sPAPR machines, in Hz.
pub const SPAPR_TIMEBASE_FREQ: u64 = 512_000_000;

/// Machine-level configuration of the nested virtualization core.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NestedConfig {
    /// Offer the KVM-HV nested API (`cap-nested-hv`).
    pub kvm_hv: bool,
    /// Offer the PAPR nested API (`cap-nested-papr`).
    pub papr: bool,
    /// Maximum number of PAPR nested guests, i.e. the highest lpid handed out.
    pub lpid_max: u64,
    /// Maximum number of vCPUs per PAPR nested guest.
    pub vcpu_max: usize,
    /// Timebase frequency given to new nested vCPUs.
    pub timebase_freq: u64,
}

impl NestedConfig {
    /// Both APIs disabled, default limits.
    pub const fn new() -> Self {
        Self {
            kvm_hv: false,
            papr: false,
            lpid_max: NESTED_GUEST_MAX,
            vcpu_max: NESTED_GUEST_VCPU_MAX,
            timebase_freq: SPAPR_TIMEBASE_FREQ,
        }
    }

    /// Enables or disables the KVM-HV nested hypercalls.
    pub const fn with_kvm_hv(mut self, enabled: bool) -> Self {
        self.kvm_hv = enabled;
        self
    }

    /// Enables or disables the PAPR nested hypercalls.
    pub const fn with_papr(mut self, enabled: bool) -> Self {
        self.papr = enabled;
        self
    }

    /// Sets the number of PAPR nested guests a machine can hold.
    pub const fn with_lpid_max(mut self, lpid_max: u64) -> Self {
        self.lpid_max = lpid_max;
        self
    }

    /// Sets the number of vCPUs each PAPR nested guest can hold.
    pub const fn with_vcpu_max(mut self, vcpu_max: usize) -> Self {
        self.vcpu_max = vcpu_max;
        self
    }

    /// Sets the timebase frequency, in Hz, of new nested vCPUs.
    pub const fn with_timebase_freq(mut self, freq: u64) -> Self {
        self.timebase_freq = freq;
        self
    }
}

impl Default for NestedConfig {
    fn default() -> Self {
        Self::new()
    }
}
