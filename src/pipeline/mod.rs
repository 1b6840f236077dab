pub mod latest;
pub mod pool;

pub use latest::LatestFrame;
pub use pool::{FramePool, PoolStats};
