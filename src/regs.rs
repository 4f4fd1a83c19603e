// Copyright 2025 The Axvisor Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! PowerPC register identifiers and bit definitions used by the nested core.
//!
//! Bit constants follow the Power ISA numbering (bit 0 is the MSB), converted
//! with [`ppc_bit`].

/// Converts an ISA bit number (0 = most significant) into a 64-bit mask.
pub const fn ppc_bit(bit: u32) -> u64 {
    0x8000_0000_0000_0000 >> bit
}

/// Number of general-purpose registers.
pub const NUM_GPRS: usize = 32;

/// Non-SPR architected registers of the live context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PpcReg {
    /// Link register.
    Lr,
    /// Count register.
    Ctr,
    /// Come-from address register.
    Cfar,
    /// Machine state register.
    Msr,
    /// Next instruction address.
    Nip,
    /// Condition register, as the 32-bit architected value.
    Cr,
    /// Fixed-point exception register, as the architected value.
    Xer,
}

/// Special purpose registers the nested core reads or writes.
///
/// The discriminant is the architected SPR number.
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Spr {
    Srr0 = 26,
    Srr1 = 27,
    Pidr = 48,
    Dpdes = 176,
    Hfscr = 190,
    Sprg0 = 272,
    Sprg1 = 273,
    Sprg2 = 274,
    Sprg3 = 275,
    Pvr = 287,
    Hdsisr = 306,
    Hdar = 307,
    Hsrr0 = 314,
    Hsrr1 = 315,
    Lpcr = 318,
    Lpidr = 319,
    Pcr = 338,
    Asdr = 816,
    Ppr = 896,
}

impl Spr {
    /// SPRG0-3 in order.
    pub const SPRG: [Spr; 4] = [Spr::Sprg0, Spr::Sprg1, Spr::Sprg2, Spr::Sprg3];

    /// The architected SPR number.
    pub const fn number(self) -> u16 {
        self as u16
    }
}

// LPCR fields.
pub const LPCR_DPFD_SHIFT: u32 = 63 - 11;
pub const LPCR_DPFD: u64 = 0x7 << LPCR_DPFD_SHIFT;
pub const LPCR_AIL_SHIFT: u32 = 63 - 40;
pub const LPCR_AIL: u64 = 0x3 << LPCR_AIL_SHIFT;
pub const LPCR_ILE: u64 = ppc_bit(38);
pub const LPCR_UPRT: u64 = ppc_bit(41);
pub const LPCR_HR: u64 = ppc_bit(43);
pub const LPCR_LD: u64 = ppc_bit(46);
pub const LPCR_MER: u64 = ppc_bit(52);
pub const LPCR_GTSE: u64 = ppc_bit(53);
pub const LPCR_LPES0: u64 = ppc_bit(60);
pub const LPCR_HVICE: u64 = ppc_bit(62);
pub const LPCR_HDICE: u64 = ppc_bit(63);

/// LPCR bits an L1 hypervisor may choose for its L2.
pub const LPCR_L2_GUEST_MASK: u64 = LPCR_DPFD | LPCR_ILE | LPCR_AIL | LPCR_LD | LPCR_MER;

/// LPCR bits always set while running an L2.
pub const LPCR_L2_FORCED: u64 = LPCR_HR | LPCR_UPRT | LPCR_GTSE | LPCR_HVICE | LPCR_HDICE;

/// Size-class field of the partition table control register.
pub const PTCR_PRTS_MASK: u64 = 0x1f;

// Processor version register.
pub const PVR_POWER_SERVER_MASK: u64 = 0xffff_0000;
pub const PVR_POWER9_BASE: u64 = 0x004e_0000;
pub const PVR_POWER10_BASE: u64 = 0x0080_0000;

/// Server processor generations the PAPR nested API distinguishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerGeneration {
    Power9,
    Power10,
}

impl PowerGeneration {
    /// Classifies a PVR value by its major version.
    pub const fn from_pvr(pvr: u64) -> Option<Self> {
        match pvr & PVR_POWER_SERVER_MASK {
            PVR_POWER9_BASE => Some(Self::Power9),
            PVR_POWER10_BASE => Some(Self::Power10),
            _ => None,
        }
    }

    /// The `H_GUEST_*_CAPABILITIES` mode bit of this generation.
    pub const fn mode_capability(self) -> u64 {
        match self {
            Self::Power9 => H_GUEST_CAPABILITIES_P9_MODE,
            Self::Power10 => H_GUEST_CAPABILITIES_P10_MODE,
        }
    }

    /// The reason code `H_GUEST_SET_CAPABILITIES` reports when the mode bit
    /// of this generation is missing.
    pub const fn missing_mode_reason(self) -> u64 {
        match self {
            Self::Power9 => 1,
            Self::Power10 => 2,
        }
    }
}

// Capability bits of the PAPR nested API.
pub const H_GUEST_CAPABILITIES_COPY_MEM: u64 = ppc_bit(0);
pub const H_GUEST_CAPABILITIES_P9_MODE: u64 = ppc_bit(1);
pub const H_GUEST_CAPABILITIES_P10_MODE: u64 = ppc_bit(2);
