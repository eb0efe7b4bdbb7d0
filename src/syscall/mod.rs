pub mod linux;
pub mod syscall;
pub mod test;

pub use syscall::{create_syscall, Syscall};
