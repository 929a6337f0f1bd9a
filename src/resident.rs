// src/resident.rs
//! Per-process resident-set bookkeeping for demand paging.
//!
//! Every user process keeps two fixed-size tables alongside its page table:
//! `ram` tracks which of its pages currently sit in physical memory, `swap`
//! tracks which occupy a slot in its private swap file. A page is recorded
//! in at most one of the two at a time; the page table's `PTE_PG` bit is the
//! authoritative switch between them (see `vm::Pte`).

use crate::param::MAX_PSYC_PAGES;
use spin::Mutex;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SlotState {
    Free,
    Used,
}

/// A page resident in physical memory.
#[derive(Copy, Clone, Debug)]
pub struct RamSlot {
    pub state: SlotState,
    pub vaddr: u64,
    pub creation_time: u64,
    /// Aging counter used by NFUA/LAPA; unused under SCFIFO.
    pub access_counter: u32,
}

impl RamSlot {
    const fn empty() -> Self {
        RamSlot {
            state: SlotState::Free,
            vaddr: 0,
            creation_time: 0,
            access_counter: 0,
        }
    }
}

/// A page evicted to the process's swap file.
#[derive(Copy, Clone, Debug)]
pub struct SwapSlot {
    pub state: SlotState,
    pub vaddr: u64,
}

impl SwapSlot {
    const fn empty() -> Self {
        SwapSlot {
            state: SlotState::Free,
            vaddr: 0,
        }
    }

    /// Byte offset of this slot within the process's swap file.
    pub fn offset(index: usize) -> u64 {
        (index * crate::riscv::PGSIZE as usize) as u64
    }
}

/// The resident-set tables carried on every `Proc`.
#[derive(Copy, Clone)]
pub struct ResidentSet {
    pub ram: [RamSlot; MAX_PSYC_PAGES],
    pub swap: [SwapSlot; MAX_PSYC_PAGES],
}

impl ResidentSet {
    pub const fn new() -> Self {
        ResidentSet {
            ram: [RamSlot::empty(); MAX_PSYC_PAGES],
            swap: [SwapSlot::empty(); MAX_PSYC_PAGES],
        }
    }

    /// Reset both tables, e.g. when a `Proc` is recycled by `freeproc`.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Index of a free RAM slot, or `None` if all `MAX_PSYC_PAGES` are used.
    pub fn empty_ram_slot(&self) -> Option<usize> {
        self.ram.iter().position(|s| s.state == SlotState::Free)
    }

    /// Index of a free swap slot, or `None` if the swap file is full.
    pub fn empty_swap_slot(&self) -> Option<usize> {
        self.swap.iter().position(|s| s.state == SlotState::Free)
    }

    pub fn find_ram_by_vaddr(&self, va: u64) -> Option<usize> {
        self.ram
            .iter()
            .position(|s| s.state == SlotState::Used && s.vaddr == va)
    }

    pub fn find_swap_by_vaddr(&self, va: u64) -> Option<usize> {
        self.swap
            .iter()
            .position(|s| s.state == SlotState::Used && s.vaddr == va)
    }

    pub fn occupy_ram(&mut self, index: usize, va: u64, counter_reset: u32) {
        self.ram[index] = RamSlot {
            state: SlotState::Used,
            vaddr: va,
            creation_time: next_creation_time(),
            access_counter: counter_reset,
        };
    }

    pub fn occupy_swap(&mut self, index: usize, va: u64) {
        self.swap[index] = SwapSlot {
            state: SlotState::Used,
            vaddr: va,
        };
    }

    pub fn free_ram(&mut self, index: usize) {
        self.ram[index] = RamSlot::empty();
    }

    pub fn free_swap(&mut self, index: usize) {
        self.swap[index] = SwapSlot::empty();
    }

    /// Drop any bookkeeping for `va`, from whichever table holds it.
    /// Mirrors xv6's uvmunmap cleanup of the per-process tables.
    pub fn forget(&mut self, va: u64) {
        if let Some(i) = self.find_ram_by_vaddr(va) {
            self.free_ram(i);
        }
        if let Some(i) = self.find_swap_by_vaddr(va) {
            self.free_swap(i);
        }
    }
}

static NEXT_CREATION_TIME: Mutex<u64> = Mutex::new(1);

/// Monotonically increasing timestamp used to order SCFIFO's second-chance
/// queue. A `spin::Mutex` replaces the original's racy `next < 2` lazy init.
pub fn next_creation_time() -> u64 {
    let mut next = NEXT_CREATION_TIME.lock();
    let t = *next;
    *next += 1;
    t
}
