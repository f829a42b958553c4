//! Sample storage.

pub mod storage;

pub use storage::SampleLogStore;
