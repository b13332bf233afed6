pub mod entity;
pub mod error;
pub mod frame;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
