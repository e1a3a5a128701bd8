//! Transport adaptor contract. The wire socket itself is out of scope;
//! these traits are the capability boundary the core is coded against,
//! in the same trait-split style as this crate's `odisk` module.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::dctl::DctlEntry;
use crate::error::ContractResult;
use crate::odisk::ObjectId;

/// Opaque per-connection handle, assigned by [`CoreInbound::new_conn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AppCookie(pub u64);

/// A generation number, carried on every state-changing inbound command.
/// Commands arriving with a generation older than the context's current
/// one are rejected.
pub type Gen = u64;

/// A registered device, as a group-id-to-device map (out of scope here)
/// would resolve a destination to. `version` lets callers detect that a
/// handle has been reassigned without taking a lock to compare cookies.
#[derive(Debug)]
pub struct DeviceHandle {
    pub device_id: u64,
    pub version: AtomicU64,
}

impl DeviceHandle {
    #[must_use]
    pub fn new(device_id: u64) -> Self {
        Self {
            device_id,
            version: AtomicU64::new(0),
        }
    }

    pub fn bump_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    #[must_use]
    pub fn current_version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

/// Commands the transport invokes on the core. All calls are
/// non-blocking: implementations enqueue onto `bg_ops` and return
/// immediately, surfacing failures asynchronously via `CoreOutbound`.
pub trait CoreInbound: Send + Sync {
    /// Register a new connection, returning its cookie.
    ///
    /// # Errors
    /// Returns an error if a core-side resource (e.g. an evaluator thread)
    /// cannot be created.
    fn new_conn(&self) -> ContractResult<AppCookie>;

    /// Tear down a connection and release its resources.
    ///
    /// # Errors
    /// Returns an error if `cookie` is unknown.
    fn close_conn(&self, cookie: AppCookie) -> ContractResult<()>;

    /// # Errors
    /// Returns [`crate::error::ContractError::StaleGeneration`] if `gen`
    /// is older than the context's current generation.
    fn start(&self, cookie: AppCookie, gen: Gen) -> ContractResult<()>;

    /// # Errors
    /// Returns [`crate::error::ContractError::StaleGeneration`] if `gen`
    /// is older than the context's current generation.
    fn stop(&self, cookie: AppCookie, gen: Gen) -> ContractResult<()>;

    /// Compile `filter_blob`/`spec_blob` into a filter chain and warm the
    /// relevant filter caches.
    ///
    /// # Errors
    /// Returns [`crate::error::ContractError::StaleGeneration`] for a
    /// stale `gen`, or a configuration error if the blobs don't compile.
    fn set_searchlet(
        &self,
        cookie: AppCookie,
        gen: Gen,
        filter_blob: &[u8],
        spec_blob: &[u8],
    ) -> ContractResult<()>;

    /// Bump the generation number; older in-flight objects are dropped at
    /// the proc-ring boundary.
    ///
    /// # Errors
    /// Returns an error if `cookie` is unknown.
    fn set_list(&self, cookie: AppCookie, gen: Gen) -> ContractResult<()>;

    /// # Errors
    /// Returns [`crate::error::ContractError::StaleGeneration`] if `gen`
    /// is older than the context's current generation.
    fn term(&self, cookie: AppCookie, gen: Gen) -> ContractResult<()>;

    /// # Errors
    /// Returns an error if `cookie` is unknown.
    fn get_stats(&self, cookie: AppCookie, gen: Gen) -> ContractResult<Vec<DctlEntry>>;

    /// Return an object to the core, decrementing `pend_count`.
    ///
    /// # Errors
    /// Returns an error if `cookie` or `obj` is unknown.
    fn release_obj(&self, cookie: AppCookie, obj: ObjectId) -> ContractResult<()>;

    /// Request pipeline characteristics (e.g. estimated throughput).
    ///
    /// # Errors
    /// Returns an error if `cookie` is unknown.
    fn get_char(&self, cookie: AppCookie, gen: Gen) -> ContractResult<Vec<DctlEntry>>;
}

/// Methods the core invokes on the transport to ship results back to the
/// client.
pub trait CoreOutbound: Send + Sync {
    /// Ship a fully (`complete = true`) or partially evaluated object.
    ///
    /// # Errors
    /// Returns an error on a transport-side send failure.
    fn send_obj(&self, cookie: AppCookie, obj: ObjectId, ver: u64, complete: bool)
        -> ContractResult<()>;

    /// Pull the next object queued for partial-preview delivery.
    ///
    /// # Errors
    /// Returns an error on a transport-side failure.
    fn get_partial(&self, cookie: AppCookie) -> ContractResult<Option<ObjectId>>;

    /// Flush all objects buffered for `cookie` up to `ver`.
    ///
    /// # Errors
    /// Returns an error on a transport-side failure.
    fn flush_objs(&self, cookie: AppCookie, ver: u64) -> ContractResult<()>;

    /// Fetch an object by its attribute signature (client-initiated
    /// random access, e.g. re-requesting a thumbnail).
    ///
    /// # Errors
    /// Returns an error on a transport-side failure.
    fn get_obj(&self, cookie: AppCookie, sig: diamond_core::Sig128) -> ContractResult<Option<ObjectId>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_handle_version_increments() {
        let handle = DeviceHandle::new(7);
        assert_eq!(handle.current_version(), 0);
        assert_eq!(handle.bump_version(), 1);
        assert_eq!(handle.bump_version(), 2);
        assert_eq!(handle.current_version(), 2);
    }
}
