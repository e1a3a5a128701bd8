//! Trait contracts for the core's external collaborators: the object
//! store, the transport adaptor, and the control-tree. These are
//! out-of-process wire/device boundaries; this crate is the typed seam
//! the core is coded against instead of raw cookies.

pub mod dctl;
pub mod error;
pub mod odisk;
pub mod transport;

pub use dctl::{ControlTree, DctlEntry, DctlMessage, DctlType, InMemoryControlTree};
pub use error::{ContractError, ContractResult};
pub use odisk::{MemoryObjectDisk, ObjectDisk, ObjectId};
pub use transport::{AppCookie, CoreInbound, CoreOutbound, DeviceHandle, Gen};
