use crate::println;
use crate::sbi::shutdown;
use core::panic::PanicInfo;

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    println!("Custom panic handler called: {}", info);
    shutdown(true)
}