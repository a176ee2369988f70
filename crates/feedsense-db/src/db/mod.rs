//! Database repositories and connection setup.

pub mod feedback;
pub mod pool;
