//! Small building blocks shared by the rest of the crate.

pub mod no_destruct;

pub use no_destruct::{EternalSingleton, NoDestruct};
