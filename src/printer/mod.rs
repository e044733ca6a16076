//! # Printer Status Module
//!
//! Everything that turns printer telemetry into the status shown to viewers.
//!
//! ```text
//! printer/
//! ├── status.rs        - StatusRecord value type and display formatting
//! ├── decoder.rs       - Raw report payload -> StatusRecord
//! └── status_store.rs  - Thread-safe holder of the latest StatusRecord
//! ```
//!
//! Data flows one way: the MQTT session hands each payload to [`decoder::decode`],
//! writes the result into the [`status_store::StatusStore`], and readers copy the
//! current snapshot out whenever they need it.

pub mod decoder;
pub mod status;
pub mod status_store;

pub use decoder::{decode, DecodeError};
pub use status::StatusRecord;
pub use status_store::StatusStore;
