pub mod async_value;
pub mod jit;
pub mod task;

pub use async_value::{AllAvailable, AsyncState, AsyncValue, AsyncValueRef, WhenReady};
