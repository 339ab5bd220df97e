//! Bulwark Core: clock sources, versioned record types, validation, and pagination.

pub mod clock;
pub mod filters;
pub mod types;
pub mod validation;

pub use clock::{ClockSource, ManualClock, SystemClock};
pub use filters::{Filters, Metadata, SortDirection};
pub use types::{
    Movie, MovieFields, Permissions, RecordId, Runtime, User, Version, VersionedRecord,
    INITIAL_VERSION, MOVIES_READ, MOVIES_WRITE,
};
pub use validation::Validator;
