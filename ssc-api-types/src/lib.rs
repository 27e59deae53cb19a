//! Basic API types shared by the SSC tape driver layers.

mod mtio;
pub use mtio::*;

mod drive;
pub use drive::*;
