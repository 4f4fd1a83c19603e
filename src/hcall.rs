use core::fmt;

use axerrno::AxError;

// sPAPR hypercall return codes.
pub const H_SUCCESS: i64 = 0;
pub const H_NOT_AVAILABLE: i64 = 3;
pub const H_FUNCTION: i64 = -2;
pub const H_PARAMETER: i64 = -4;
pub const H_NO_MEM: i64 = -9;
pub const H_P2: i64 = -55;
pub const H_P3: i64 = -56;
pub const H_STATE: i64 = -75;
pub const H_IN_USE: i64 = -77;
pub const H_UNSUPPORTED_FLAG: i64 = -256;

/// `continue_token` value of a call that does not resume an earlier one.
pub const H_NO_CONTINUE_TOKEN: u64 = u64::MAX;

/// Which hypercall argument an [`HcallError::InvalidArgument`] blames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HcallParam {
    /// No specific argument (`H_PARAMETER`).
    Any,
    /// The second argument (`H_P2`).
    P2,
    /// The third argument (`H_P3`).
    P3,
}

/// Failure of a nested-virtualization hypercall.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HcallError {
    /// The machine does not offer this nested API.
    FeatureDisabled,
    /// A malformed, zero or out-of-range argument, or a guest buffer that
    /// cannot be mapped in full.
    InvalidArgument(HcallParam),
    /// Nonzero flags were passed where none are defined.
    UnsupportedFlag,
    /// The requested slot already exists.
    AlreadyInUse,
    /// No free id, or an allocation failed.
    ResourceExhausted,
    /// The guest already has the maximum number of vCPUs.
    VcpuLimit,
    /// `H_ENTER_NESTED` before a partition table was registered.
    NotAvailable,
    /// Guest management before capabilities were negotiated.
    WrongState,
    /// The operation is not implemented; the caller has a fallback.
    Unsupported,
    /// `H_GUEST_SET_CAPABILITIES` refused the requested capabilities.
    CapabilityRejected {
        /// Index of the offending capability, reported in r4.
        reason: u64,
    },
}

impl HcallError {
    /// The sPAPR return code reported in r3.
    pub const fn code(&self) -> i64 {
        match self {
            Self::FeatureDisabled | Self::Unsupported => H_FUNCTION,
            Self::InvalidArgument(HcallParam::Any) => H_PARAMETER,
            Self::InvalidArgument(HcallParam::P2) => H_P2,
            Self::InvalidArgument(HcallParam::P3) => H_P3,
            Self::UnsupportedFlag => H_UNSUPPORTED_FLAG,
            Self::AlreadyInUse => H_IN_USE,
            Self::ResourceExhausted => H_NO_MEM,
            Self::VcpuLimit => H_P3,
            Self::NotAvailable => H_NOT_AVAILABLE,
            Self::WrongState => H_STATE,
            Self::CapabilityRejected { .. } => H_P2,
        }
    }

    /// The value reported in r4 alongside the error, if any.
    pub const fn secondary(&self) -> Option<u64> {
        match self {
            Self::CapabilityRejected { reason } => Some(*reason),
            _ => None,
        }
    }
}

impl fmt::Display for HcallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FeatureDisabled => write!(f, "nested virtualization API not enabled"),
            Self::InvalidArgument(HcallParam::Any) => write!(f, "invalid parameter"),
            Self::InvalidArgument(HcallParam::P2) => write!(f, "invalid second parameter"),
            Self::InvalidArgument(HcallParam::P3) => write!(f, "invalid third parameter"),
            Self::UnsupportedFlag => write!(f, "unsupported flags"),
            Self::AlreadyInUse => write!(f, "already in use"),
            Self::ResourceExhausted => write!(f, "out of resources"),
            Self::VcpuLimit => write!(f, "too many vcpus"),
            Self::NotAvailable => write!(f, "partition table not set"),
            Self::WrongState => write!(f, "capabilities not negotiated"),
            Self::Unsupported => write!(f, "not supported"),
            Self::CapabilityRejected { reason } => {
                write!(f, "capability rejected (reason {})", reason)
            }
        }
    }
}

impl From<HcallError> for AxError {
    fn from(err: HcallError) -> Self {
        match err {
            HcallError::FeatureDisabled | HcallError::Unsupported => AxError::Unsupported,
            HcallError::InvalidArgument(_)
            | HcallError::UnsupportedFlag
            | HcallError::CapabilityRejected { .. } => AxError::InvalidInput,
            HcallError::AlreadyInUse => AxError::AlreadyExists,
            HcallError::ResourceExhausted | HcallError::VcpuLimit => AxError::NoMemory,
            HcallError::NotAvailable | HcallError::WrongState => AxError::BadState,
        }
    }
}

/// Result of a nested hypercall handler.
pub type HcallResult<T = HcallReturn> = Result<T, HcallError>;

/// Register values a completed hypercall hands back to its caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HcallRet {
    /// Return code for r3.
    pub status: i64,
    /// Secondary output for r4.
    pub r4: Option<u64>,
}

impl HcallRet {
    /// `H_SUCCESS` without outputs.
    pub const SUCCESS: Self = Self {
        status: H_SUCCESS,
        r4: None,
    };

    /// `H_SUCCESS` with `r4` as secondary output.
    pub const fn success_with(r4: u64) -> Self {
        Self {
            status: H_SUCCESS,
            r4: Some(r4),
        }
    }
}

impl From<HcallError> for HcallRet {
    fn from(err: HcallError) -> Self {
        Self {
            status: err.code(),
            r4: err.secondary(),
        }
    }
}

/// How a hypercall finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HcallReturn {
    /// The call returned normally to its caller.
    Completed(HcallRet),
    /// The caller's context was switched out (the vCPU now runs an L2); no
    /// return value must be written.
    Resumed,
}

/// The hypercall family an opcode belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HcallFamily {
    /// The KVM-HV nested API, where the L1 passes raw register state.
    KvmHv,
    /// The PAPR nested API, where the L0 owns guests and vCPUs.
    Papr,
}

/// The hypercalls handled by this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NestedHcall {
    SetPartitionTable,
    EnterNested,
    TlbInvalidate,
    CopyTofromGuest,
    GuestGetCapabilities,
    GuestSetCapabilities,
    GuestCreate,
    GuestCreateVcpu,
}

impl NestedHcall {
    /// All hypercalls, in opcode order of their family.
    pub const ALL: [NestedHcall; 8] = [
        Self::SetPartitionTable,
        Self::EnterNested,
        Self::TlbInvalidate,
        Self::CopyTofromGuest,
        Self::GuestGetCapabilities,
        Self::GuestSetCapabilities,
        Self::GuestCreate,
        Self::GuestCreateVcpu,
    ];

    /// The hypercall number.
    pub const fn opcode(self) -> u64 {
        match self {
            Self::SetPartitionTable => 0xf800,
            Self::EnterNested => 0xf804,
            Self::TlbInvalidate => 0xf808,
            Self::CopyTofromGuest => 0xf80c,
            Self::GuestGetCapabilities => 0x460,
            Self::GuestSetCapabilities => 0x464,
            Self::GuestCreate => 0x470,
            Self::GuestCreateVcpu => 0x474,
        }
    }

    /// Looks up the hypercall with number `opcode`.
    pub fn from_opcode(opcode: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|hcall| hcall.opcode() == opcode)
    }

    /// The family this hypercall belongs to.
    pub const fn family(self) -> HcallFamily {
        match self {
            Self::SetPartitionTable
            | Self::EnterNested
            | Self::TlbInvalidate
            | Self::CopyTofromGuest => HcallFamily::KvmHv,
            Self::GuestGetCapabilities
            | Self::GuestSetCapabilities
            | Self::GuestCreate
            | Self::GuestCreateVcpu => HcallFamily::Papr,
        }
    }
}
