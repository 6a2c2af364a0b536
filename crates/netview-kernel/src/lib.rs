//! NetView kernel — RPC routing, method dispatch and ownership arbitration.
//!
//! One [`NetworkRuntime`] per peer ties the pieces together:
//!
//! - **MethodRegistry**: per-object table of remote-callable methods
//! - **OwnershipTable**: which participant has authority over each object
//! - **NetworkObjectDirectory**: live objects, each with its own ordering domain
//! - **RpcRouter**: relays calls per delivery policy and performs final dispatch
//! - **Diagnostics**: bounded history of recoverable failures

pub mod config;
pub mod diagnostics;
pub mod directory;
pub mod domain;
pub mod error;
pub mod methods;
pub mod ownership;
pub mod router;
pub mod runtime;
pub mod supervisor;

pub use diagnostics::{Diagnostic, Diagnostics};
pub use directory::NetworkObjectDirectory;
pub use error::{KernelError, KernelResult};
pub use methods::{MethodDescriptor, MethodRegistry, NetworkedObject};
pub use ownership::{OwnershipRecord, OwnershipTable};
pub use router::{plan, FanOut, RelayPlan, RpcRouter};
pub use runtime::{join_server, start_server, NetworkRuntime, Role};
