//! Shared primitives for the on-device search evaluation/caching core:
//! signatures, attribute sets, lock ordering, configuration and path
//! resolution used by every other `diamond-*` crate.

pub mod attr;
pub mod config;
pub mod error;
pub mod lock_order;
pub mod paths;
pub mod sig;

pub use attr::{Attr, AttrSet, CacheAttrEntry, SubsetCheck};
pub use config::Config;
pub use error::{CoreError, CoreResult};
pub use lock_order::{LockLevel, LockScope, OrderedMutex, OrderedRwLock};
pub use paths::default_cache_root;
pub use sig::Sig128;
