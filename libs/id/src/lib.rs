//! # sm-id
//!
//! Typed identifiers for server-manager.
//!
//! Two families of IDs exist:
//!
//! - Row IDs wrap the `BIGINT` primary keys of database tables
//!   (`TemplateId`, `NodeId`, `ServerId`, `UserId`). They serialize as
//!   plain JSON numbers and parse from decimal strings, so path segments
//!   like `/v1/servers/7` map straight onto them.
//! - Request IDs are prefixed ULIDs (`req_01HV4Z2WQXKJNM8GPQY6VBKC3D`) used
//!   only for log and error correlation.
//!
//! Typing the IDs keeps a `NodeId` from being passed where a `ServerId`
//! is expected.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
