use axerrno::{ax_err, AxResult};

memory_addr::def_usize_addr! {
    /// Guest physical address, as seen by the L1 issuing a hypercall.
    pub type GuestPhysAddr;
}

memory_addr::def_usize_addr_formatter! {
    GuestPhysAddr = "GPA:{}";
}

impl GuestPhysAddr {
    /// Converts a hypercall argument into a guest physical address.
    pub const fn from_hcall_arg(arg: u64) -> Self {
        Self::from_usize(arg as usize)
    }
}

/// The guest memory interfaces the underlying emulator must implement.
///
/// Mapping may come back shorter than requested (for example when the range
/// crosses the end of RAM or into MMIO). Dropping the returned slice unmaps
/// it.
pub trait GuestMemory {
    /// Maps `len` bytes at `gpa` for reading.
    fn map(&self, gpa: GuestPhysAddr, len: usize) -> AxResult<&[u8]>;

    /// Maps `len` bytes at `gpa` for writing.
    fn map_mut(&mut self, gpa: GuestPhysAddr, len: usize) -> AxResult<&mut [u8]>;
}

/// Maps exactly `len` bytes at `gpa` for reading, treating a short mapping as an error.
pub(crate) fn map_exact<M: GuestMemory + ?Sized>(
    mem: &M,
    gpa: GuestPhysAddr,
    len: usize,
) -> AxResult<&[u8]> {
    let buf = mem.map(gpa, len)?;
    if buf.len() != len {
        return ax_err!(BadAddress, "short guest memory mapping");
    }
    Ok(buf)
}

/// Maps exactly `len` bytes at `gpa` for writing, treating a short mapping as an error.
pub(crate) fn map_exact_mut<M: GuestMemory + ?Sized>(
    mem: &mut M,
    gpa: GuestPhysAddr,
    len: usize,
) -> AxResult<&mut [u8]> {
    let buf = mem.map_mut(gpa, len)?;
    if buf.len() != len {
        return ax_err!(BadAddress, "short guest memory mapping");
    }
    Ok(buf)
}
