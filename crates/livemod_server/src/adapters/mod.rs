#![forbid(unsafe_code)]

pub mod demo;
pub mod null;

pub use demo::{DemoSource, DemoSourceFactory};
pub use null::{NullSource, NullSourceFactory};
