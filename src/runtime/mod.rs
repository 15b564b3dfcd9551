//! Call-stack bookkeeping shared by the dispatcher and the lifecycle.
pub mod stack;

pub use stack::{Frame, FrameGuard, HOST, RuntimeStack};
