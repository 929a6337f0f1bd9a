// param.rs

// Process and CPU related
pub const NPROC: usize = 64; // maximum number of processes
pub const NCPU: usize = 8; // maximum number of CPUs

// Path and stack related
pub const USERSTACK: usize = 1; // user stack pages

// Demand-paging / swap related.
//
// Each process keeps a fixed number of resident pages in RAM and the same
// number of slots in its private swap file; together they bound how much
// user memory a process may have mapped at once.
pub const MAX_PSYC_PAGES: usize = 16; // resident pages per process
pub const MAX_TOTAL_PAGES: usize = MAX_PSYC_PAGES * 2; // + swap file slots
