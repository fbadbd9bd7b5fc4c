//! Process runtime utilities for blockminer.

pub mod shutdown;
