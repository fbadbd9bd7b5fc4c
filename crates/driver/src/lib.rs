//! Blockminer driver: live and history collectors feeding the Postgres saver.

pub mod driver;
pub use driver::Driver;

pub mod fetcher;
pub mod history;
pub mod live;
pub mod saver;

#[cfg(any(test, feature = "test-util"))]
pub mod test_utils;
