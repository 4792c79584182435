pub mod spinlock;

pub use spinlock::{SpinGuard, SpinLock};
