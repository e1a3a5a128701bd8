//! Filter compiler and evaluator: compiles a declarative filter set into
//! an ordered chain and walks it per-object against the cache,
//! short-circuiting on the first drop.

pub mod error;
pub mod eval;
pub mod filter;

pub use error::{CevalError, CevalResult};
pub use eval::{CevalState, ContinueCb, FilterStepCb, FiltersOutcome};
pub use filter::{Filter, FilterChain, FilterRunOutcome, FilterSpec};
