#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), no_main)]

pub mod console;
pub mod fault;
pub mod kalloc;
pub mod lang_items;
pub mod memlayout;
pub mod param;
pub mod plic;
pub mod policy;
pub mod proc;
pub mod resident;
pub mod riscv;
pub mod sbi;
pub mod spinlock;
pub mod start;
pub mod string;
pub mod swap;
pub mod types;
pub mod uart;
pub mod vm;

// `trap.rs` dispatches into `trampoline.S`'s `uservec`/`userret`/`kernelvec`
// and declares `trampoline` itself as an `extern "C"` symbol; all four are
// boot-time assembly this crate treats as an external collaborator (see
// SPEC_FULL.md's scope note on boot-time construction), so the module only
// makes sense once that assembly exists to link against a real hart.
#[cfg(target_arch = "riscv64")]
pub mod trap;

// On-target-only: needs a booted hart (`test.rs`) or SiFive test-device MMIO
// (`test_device.rs`), neither of which exists on the host running `cargo
// test`. `#[test_case]` here isn't wired to a `#![test_runner]` yet (that
// needs the nightly `custom_test_frameworks` feature); it's the harness for
// whole-hart scenarios (trap dispatch, SBI shutdown) that the pure-logic
// `#[cfg(test)]` unit tests elsewhere in this tree can't reach.
#[cfg(target_arch = "riscv64")]
pub mod test;
#[cfg(target_arch = "riscv64")]
pub mod test_device;

/// Bring up the kernel's address-space and process machinery on this hart.
///
/// `start.rs`'s `start()` drops out of M-mode straight into this function.
/// There is no scheduler or user-space exec path in this tree (see
/// SPEC_FULL.md's non-goals): once the core subsystems are initialized, the
/// hart parks waiting for the timer/page-fault traps this crate exists to
/// demonstrate.
#[cfg(target_arch = "riscv64")]
#[no_mangle]
pub unsafe extern "C" fn rust_main() -> ! {
    static mut STARTED: bool = false;

    if riscv::r_tp() == 0 {
        uart::init();
        println!("paging-kernel: booting");

        vm::kvminit();
        proc::procinit();
        trap::trapinit();
        plic::plicinit();

        STARTED = true;
        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
    } else {
        while !STARTED {
            core::hint::spin_loop();
        }
        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
    }

    kalloc::kinit();
    vm::kvminithart();
    trap::trapinithart();
    plic::plicinithart();

    println!("paging-kernel: hart {} up", riscv::r_tp());

    loop {
        core::hint::spin_loop();
    }
}

// Host (`cargo test`) builds have no hart to boot and no linker script
// providing `start`'s entry symbol; `rust_main` is still referenced by
// `start.rs` (taken by address, never actually called on the host), so it
// needs a definition here too, just one that never runs.
#[cfg(not(target_arch = "riscv64"))]
#[no_mangle]
pub unsafe extern "C" fn rust_main() -> ! {
    loop {
        core::hint::spin_loop();
    }
}
