//! Versioned record types shared between the storage layer and the HTTP surface.

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Unique record identifier assigned by the store at creation.
pub type RecordId = i64;

/// Optimistic-concurrency version. Starts at 1 and increases by exactly 1 on
/// every successful conditional write.
pub type Version = u32;

/// Version assigned to every freshly inserted record.
pub const INITIAL_VERSION: Version = 1;

/// Movie runtime in minutes.
///
/// Rendered on the wire as `"<n> mins"`. Accepts either that string form or a
/// bare integer on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Runtime(pub i32);

impl Serialize for Runtime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{} mins", self.0))
    }
}

impl<'de> Deserialize<'de> for Runtime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RuntimeVisitor;

        impl Visitor<'_> for RuntimeVisitor {
            type Value = Runtime;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an integer or a string of the form \"<n> mins\"")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Runtime, E> {
                i32::try_from(v)
                    .map(Runtime)
                    .map_err(|_| E::custom("runtime out of range"))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Runtime, E> {
                i32::try_from(v)
                    .map(Runtime)
                    .map_err(|_| E::custom("runtime out of range"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Runtime, E> {
                let invalid = || E::custom("invalid runtime format");
                let (minutes, unit) = v.split_once(' ').ok_or_else(invalid)?;
                if unit != "mins" {
                    return Err(invalid());
                }
                minutes.parse::<i32>().map(Runtime).map_err(|_| invalid())
            }
        }

        deserializer.deserialize_any(RuntimeVisitor)
    }
}

/// The mutable payload of a movie record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MovieFields {
    pub title: String,
    pub year: i32,
    pub runtime: Runtime,
    pub genres: Vec<String>,
}

/// A movie as stored: identity, creation time, payload and version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Movie {
    pub id: RecordId,
    /// Creation time in milliseconds since Unix epoch. Server-internal.
    #[serde(skip)]
    pub created_at: u64,
    #[serde(flatten)]
    pub fields: MovieFields,
    pub version: Version,
}

impl Movie {
    /// Returns a copy of this movie carrying `fields` and `version` instead.
    #[must_use]
    pub fn with_update(&self, fields: MovieFields, version: Version) -> Self {
        Self {
            id: self.id,
            created_at: self.created_at,
            fields,
            version,
        }
    }
}

/// A record whose writes are guarded by a monotonically increasing version.
///
/// `(id(), version())` identifies one historical snapshot of the record.
pub trait VersionedRecord {
    type Fields;

    fn id(&self) -> RecordId;

    /// The version the holder of this value last observed.
    fn version(&self) -> Version;

    fn fields(&self) -> &Self::Fields;
}

impl VersionedRecord for Movie {
    type Fields = MovieFields;

    fn id(&self) -> RecordId {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn fields(&self) -> &MovieFields {
        &self.fields
    }
}

/// A registered user. The password never leaves the user store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: RecordId,
    #[serde(skip)]
    pub created_at: u64,
    pub name: String,
    pub email: String,
    pub activated: bool,
    #[serde(skip)]
    pub version: Version,
}

/// Permission code for reading movies.
pub const MOVIES_READ: &str = "movies:read";

/// Permission code for creating, editing and deleting movies.
pub const MOVIES_WRITE: &str = "movies:write";

/// Permission codes granted to one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Permissions(pub Vec<String>);

impl Permissions {
    #[must_use]
    pub fn include(&self, code: &str) -> bool {
        self.0.iter().any(|c| c == code)
    }

    /// Adds `code` unless it is already present.
    pub fn grant(&mut self, code: &str) {
        if !self.include(code) {
            self.0.push(code.to_string());
        }
    }
}
