// src/swap.rs
//! The swap-file collaborator interface.
//!
//! A process's swap store is reached through two function pointers on
//! `Proc`, `read_swap` and `write_swap`, rather than through a `dyn Trait`
//! or an `extern "C"` block: plain C-ABI-shaped function pointers cost
//! nothing in a `no_std`, allocation-free kernel, and a test can install its
//! own pair to exercise `fault::page_fault` without a real backing store.
//!
//! The default pair below backs the swap file with a fixed in-kernel
//! buffer sized to exactly `MAX_PSYC_PAGES` pages, in place of the disk
//! file the original wrote through `writeToSwapFile`/`readFromSwapFile`.

use crate::param::MAX_PSYC_PAGES;
use crate::proc::Proc;
use crate::riscv::PGSIZE;

pub const SWAP_FILE_BYTES: usize = MAX_PSYC_PAGES * PGSIZE as usize;

pub type ReadSwapFn = unsafe fn(p: *mut Proc, dst: *mut u8, offset: u64, len: u64) -> i32;
pub type WriteSwapFn = unsafe fn(p: *mut Proc, src: *const u8, offset: u64, len: u64) -> i32;

/// Copy `len` bytes from the process's swap buffer at `offset` into `dst`.
/// Returns -1 if the range falls outside the buffer, 0 on success.
pub unsafe fn read_swap_default(p: *mut Proc, dst: *mut u8, offset: u64, len: u64) -> i32 {
    if offset.saturating_add(len) > SWAP_FILE_BYTES as u64 {
        return -1;
    }
    let src = (*p).swap_file.as_ptr().add(offset as usize);
    core::ptr::copy_nonoverlapping(src, dst, len as usize);
    0
}

/// Copy `len` bytes from `src` into the process's swap buffer at `offset`.
/// Returns -1 if the range falls outside the buffer, 0 on success.
pub unsafe fn write_swap_default(p: *mut Proc, src: *const u8, offset: u64, len: u64) -> i32 {
    if offset.saturating_add(len) > SWAP_FILE_BYTES as u64 {
        return -1;
    }
    let dst = (*p).swap_file.as_mut_ptr().add(offset as usize);
    core::ptr::copy_nonoverlapping(src, dst, len as usize);
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::MaybeUninit;

    #[test]
    fn round_trips_through_default_buffer() {
        let mut proc_storage: MaybeUninit<Proc> = MaybeUninit::zeroed();
        let p = proc_storage.as_mut_ptr();
        unsafe {
            let pattern: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];
            assert_eq!(write_swap_default(p, pattern.as_ptr(), 0, 8), 0);

            let mut out = [0u8; 8];
            assert_eq!(read_swap_default(p, out.as_mut_ptr(), 0, 8), 0);
            assert_eq!(out, pattern);
        }
    }

    #[test]
    fn rejects_out_of_range_offset() {
        let mut proc_storage: MaybeUninit<Proc> = MaybeUninit::zeroed();
        let p = proc_storage.as_mut_ptr();
        unsafe {
            let byte = [0u8; 1];
            assert_eq!(
                write_swap_default(p, byte.as_ptr(), SWAP_FILE_BYTES as u64, 1),
                -1
            );
        }
    }
}
