pub mod frame;
pub mod manager;
pub mod replacement;

pub use frame::{Frame, FrameInfo};
pub use manager::{BufferManager, BufferManagerBuilder, BufferPoolStats, PageRef};
pub use replacement::{ReplacementPolicy, ReplacementStrategy};
