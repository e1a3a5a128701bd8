//! Bounded ring buffers backing the search context's pipeline stages.

pub mod blocking_ring;
pub mod drain_rate;
pub mod ring;
pub mod ring2;

pub use blocking_ring::{BlockingRing, Closed};
pub use drain_rate::DrainRate;
pub use ring::Ring;
pub use ring2::Ring2;
