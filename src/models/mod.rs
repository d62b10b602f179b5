mod customer;
mod dead_letter;
mod event;
mod order;
mod payment;

pub use customer::*;
pub use dead_letter::*;
pub use event::*;
pub use order::*;
pub use payment::*;
