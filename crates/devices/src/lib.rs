#![forbid(unsafe_code)]

pub mod clock;

pub mod i8155;

pub use i8155::{I8155, I8155Config, Space, Variant};
