// Specialization cache
pub mod specializations;

pub use specializations::{CacheStats, Entry, Specializations};
