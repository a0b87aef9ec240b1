//! Background trust engine for zero-knowledge membership identities.
//!
//! Stores Semaphore/RLN identities in an encrypted vault, gates every
//! sensitive operation behind the unlock secret and a per-origin approval
//! step, and orchestrates membership proof generation against an injected
//! SNARK prover.

pub mod approval;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod history;
pub mod identities;
pub mod identity;
pub mod keeper;
pub mod merkle_resolver;
pub mod merkle_tree;
pub mod permissions;
pub mod primitives;
pub mod proof;
pub mod storage;
pub mod vault;

// private modules
mod http;

pub use error::{Result, ZKeeperError};
pub use keeper::{FeatureFlags, ZKeeper};
pub use primitives::Field;
