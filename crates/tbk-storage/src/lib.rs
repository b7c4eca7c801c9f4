//! tbk-storage: the passive remote blob store behind a vault
//!
//! The engine sees only [`RemoteStore`]: put/get/exists/list/delete of opaque
//! byte blobs under string keys. [`OpendalStore`] implements it over any
//! OpenDAL operator; [`connect`] builds one for a profile's remote with
//! bounded exponential backoff for transient faults.

pub mod layout;
pub mod operator;
pub mod remote;
pub mod retry;

pub use layout::Layout;
pub use operator::{build_operator, connect};
pub use remote::{OpendalStore, RemoteStore};
pub use retry::RetryPolicy;
