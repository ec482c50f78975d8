//! Shape broadcasting and memoization utilities.

pub mod broadcast;
pub mod memo;

pub use broadcast::{align_inputs, broadcast_shapes, AlignedInputs};
pub use memo::Memo;
