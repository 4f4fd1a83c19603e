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

//! spapr_nested - Nested virtualization core for sPAPR (pseries) PowerPC hypervisors.
//!
//! This crate lets a hypervisor running as a pseries guest (the L1) run guests of
//! its own (L2s) on an emulated machine. It implements the machine side of the two
//! nested APIs of the platform, and leaves instruction execution and guest memory
//! to the emulator through the [`PpcArchVCpu`] and [`GuestMemory`] traits.
//!
//! # Features
//!
//! - KVM-HV nested API: partition table registration, `H_ENTER_NESTED` and the
//!   matching exit path driven by interrupts taken in the L2
//! - PAPR nested API: capability negotiation, guest and vCPU creation
//! - A single register snapshot type ([`NestedPpcState`]) shared by every
//!   L1 <-> L2 transition, with adapters for the guest memory structures
//! - Per physical vCPU nesting state ([`NestedCpuState`])

#![cfg_attr(not(test), no_std)]

extern crate alloc;
#[macro_use]
extern crate log;

// Core modules
mod arch_vcpu; // Live execution context trait
mod config; // Machine configuration and limits
mod enter; // H_ENTER_NESTED
mod exit; // Interrupt-driven return from an L2
mod guest; // PAPR nested guest registry
mod hal; // Guest memory interfaces
mod hcall; // Hypercall numbers, return codes and errors
mod nested; // Machine-wide state and hypercall handlers
mod percpu; // Per physical vCPU nesting state
mod regs; // Register identifiers and bit definitions
mod state; // Register snapshots and guest memory structures
mod vcpu; // PAPR nested guest vCPUs

// Public API exports
pub use arch_vcpu::PpcArchVCpu;
pub use config::*;
pub use enter::nested_lpcr;
pub use exit::PpcException;
pub use guest::{NestedGuest, NestedGuests};
pub use hal::{GuestMemory, GuestPhysAddr};
pub use hcall::*;
pub use nested::SpaprNested;
pub use percpu::NestedCpuState;
pub use regs::*;
pub use state::{HvGuestState, NestedPpcState, PtRegs, HV_GUEST_STATE_VERSION};
pub use vcpu::{GuestTimebase, NestedGuestVcpu, RunBuffer};
