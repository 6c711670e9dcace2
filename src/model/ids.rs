//! String identifiers for the entities the core reads and writes.
//!
//! Student IDs are assigned externally by administrators; position and
//! candidate IDs are generated when the reference data is created.

use mongodb::bson::{oid::ObjectId, Bson};
use rocket::{
    http::{
        impl_from_uri_param_identity,
        uri::fmt::{Formatter, Path, UriDisplay},
    },
    request::FromParam,
};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }

        impl From<$name> for Bson {
            fn from(id: $name) -> Self {
                Bson::String(id.0)
            }
        }

        impl<'a> FromParam<'a> for $name {
            type Error = &'a str;

            fn from_param(param: &'a str) -> Result<Self, Self::Error> {
                if param.trim().is_empty() {
                    Err(param)
                } else {
                    Ok(Self::new(param))
                }
            }
        }

        impl UriDisplay<Path> for $name {
            fn fmt(&self, formatter: &mut Formatter<'_, Path>) -> fmt::Result {
                formatter.write_value(&self.0)
            }
        }

        impl_from_uri_param_identity!([Path] $name);
    };
}

string_id!(
    /// Unique, administrator-assigned student identifier.
    StudentId
);

string_id!(
    /// Identifier of an elected position.
    PositionId
);

string_id!(
    /// Identifier of a candidate standing for a position.
    CandidateId
);

string_id!(
    /// Subject of a privileged identity issued by the external identity provider.
    AdminId
);

impl PositionId {
    pub fn generate() -> Self {
        Self(ObjectId::new().to_hex())
    }
}

impl CandidateId {
    pub fn generate() -> Self {
        Self(ObjectId::new().to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_params_are_rejected() {
        assert!(StudentId::from_param("").is_err());
        assert!(StudentId::from_param("  ").is_err());
        assert_eq!(StudentId::from_param("S1001"), Ok(StudentId::new("S1001")));
    }

    #[test]
    fn generated_ids_are_distinct() {
        assert_ne!(PositionId::generate(), PositionId::generate());
        assert_ne!(CandidateId::generate(), CandidateId::generate());
    }
}
