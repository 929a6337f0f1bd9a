// src/fault.rs
//! The demand-paging fault path: bringing an evicted page back from swap,
//! evicting another one first if the process's RAM quota is full.

use crate::kalloc::{kalloc, kfree};
use crate::policy::{self, ReplacementPolicy};
use crate::println;
use crate::proc::{self, Proc};
use crate::resident::SwapSlot;
use crate::riscv::{pgrounddown, PGSIZE, PTE_PG, PTE_R, PTE_U, PTE_V, PTE_W, PTE_X};
use crate::vm::{self, PageTable};

/// Evict the page the active replacement policy picks, freeing a `ram[]`
/// slot for reuse. Returns the freed slot's index, mirroring the original's
/// `ramIntoDisc`. Panics if the process's swap file has no free slot left,
/// the same as the original's unconditional `panic("no more memory")`.
pub unsafe fn evict_ram_to_disk(p: *mut Proc) -> usize {
    let victim = policy::ACTIVE_POLICY.choose_victim(p);
    let va = (*p).resident.ram[victim].vaddr;
    let pa = vm::walkaddr((*p).pagetable, va);

    let swap_index = (*p).resident.empty_swap_slot().expect("no more memory");
    let offset = SwapSlot::offset(swap_index);
    if ((*p).write_swap)(p, pa as *const u8, offset, PGSIZE) == -1 {
        panic!("evict_ram_to_disk: write_swap failed");
    }
    (*p).resident.occupy_swap(swap_index, va);

    let pte = vm::walk((*p).pagetable, va, false);
    *pte |= PTE_PG;
    *pte &= !PTE_V;

    kfree(pa as *mut u8);
    (*p).resident.free_ram(victim);

    println!(
        "[paging] pid={} evicted va={:#x} ram_slot={} -> swap_slot={}",
        (*p).pid,
        va,
        victim,
        swap_index
    );

    victim
}

/// Handle a page fault on the current process, as dispatched from `trap.rs`.
pub unsafe fn page_fault(faulting_va: u64) {
    page_fault_for(proc::myproc(), faulting_va);
}

/// Handle a page fault on a page `p`'s page table marks `PG` (resident in
/// swap, not RAM): allocate a physical page, evicting another resident page
/// first if none is free, read the faulting page back in, and remap it.
/// Kills the process if the faulting PTE isn't a paged-out mapping, matching
/// the original's fallback for any other kind of fault.
pub unsafe fn page_fault_for(p: *mut Proc, faulting_va: u64) {
    let va = pgrounddown(faulting_va);

    let pte = vm::walk((*p).pagetable, va, false);
    if pte.is_null() || (*pte & PTE_PG) == 0 {
        (*p).killed = 1;
        return;
    }

    let pa = kalloc();
    if pa.is_null() {
        panic!("page_fault: kalloc");
    }

    let ram_index = match (*p).resident.empty_ram_slot() {
        Some(i) => i,
        None => evict_ram_to_disk(p),
    };

    let swap_index = (*p)
        .resident
        .find_swap_by_vaddr(va)
        .expect("page_fault: page marked PG has no swap slot");
    let offset = SwapSlot::offset(swap_index);
    if ((*p).read_swap)(p, pa, offset, PGSIZE) == -1 {
        panic!("page_fault: read_swap failed");
    }
    (*p).resident.free_swap(swap_index);
    (*p).resident
        .occupy_ram(ram_index, va, policy::ACTIVE_POLICY.initial_counter());

    // mappages overwrites the PTE wholesale, so the stale PG bit from the
    // swapped-out mapping is dropped along with it.
    let pagetable: PageTable = (*p).pagetable;
    *pte = 0;
    vm::mappages(
        pagetable,
        va,
        PGSIZE,
        pa as u64,
        PTE_W | PTE_R | PTE_X | PTE_U,
        vm::MapMode::SpecMap,
    );

    println!("[paging] pid={} faulted in va={:#x} ram_slot={}", (*p).pid, va, ram_index);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resident::SlotState;
    use crate::riscv::PGSIZE;
    use crate::swap::{read_swap_default, write_swap_default};
    use crate::vm::{mappages, uvmcreate};

    unsafe fn new_test_proc() -> Proc {
        let mut p = proc::test_proc();
        p.pid = 3; // > 2, so paging bookkeeping applies
        p.pagetable = uvmcreate();
        p.read_swap = read_swap_default;
        p.write_swap = write_swap_default;
        p
    }

    #[test]
    fn fault_on_non_paged_pte_kills_process() {
        unsafe {
            let mut p = new_test_proc();
            let pa = kalloc();
            mappages(p.pagetable, 0, PGSIZE, pa as u64, PTE_R | PTE_W | PTE_U, crate::vm::MapMode::RegMap);

            page_fault_for(&mut p as *mut Proc, 0);
            assert_eq!(p.killed, 1);
        }
    }

    #[test]
    fn evict_then_fault_back_in_round_trips_data() {
        unsafe {
            let mut p = new_test_proc();
            let pp = &mut p as *mut Proc;

            let pa = kalloc();
            core::ptr::write_bytes(pa, 0xAB, PGSIZE as usize);
            mappages(p.pagetable, 0x1000, PGSIZE, pa as u64, PTE_R | PTE_W | PTE_U, crate::vm::MapMode::RegMap);
            p.resident.occupy_ram(0, 0x1000, policy::ACTIVE_POLICY.initial_counter());

            evict_ram_to_disk(pp);
            assert_eq!(p.resident.ram[0].state, SlotState::Free);
            let pte = vm::walk(p.pagetable, 0x1000, false);
            assert_ne!(*pte & PTE_PG, 0);
            assert_eq!(*pte & PTE_V, 0);

            page_fault_for(pp, 0x1000);
            let pte = vm::walk(p.pagetable, 0x1000, false);
            assert_ne!(*pte & PTE_V, 0);
            assert_eq!(*pte & PTE_PG, 0);

            let restored_pa = vm::walkaddr(p.pagetable, 0x1000);
            assert_eq!(*(restored_pa as *const u8), 0xAB);
        }
    }
}
