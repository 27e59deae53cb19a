//! Magnetic tape device layer

mod error;
pub use error::*;

mod position;
pub use position::*;

mod state;
pub use state::*;

mod dispatch;
pub use dispatch::*;

mod device;
pub use device::*;

mod mtio;

mod registry;
pub use registry::*;

pub mod virtual_tape;

#[cfg(test)]
mod test;
