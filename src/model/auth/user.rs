use std::fmt::Display;

use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::model::{
    ids::{AdminId, StudentId},
    student::Student,
};

/// A kind of principal that can hold an [`super::AuthToken`].
pub trait User {
    const RIGHTS: Rights;

    type Id: for<'a> From<&'a str> + Display;
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum Rights {
    Student = 0,
    Admin = 1,
}

impl Display for Rights {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "{}",
            match self {
                Self::Student => "student",
                Self::Admin => "admin",
            }
        )
    }
}

impl User for Student {
    const RIGHTS: Rights = Rights::Student;

    type Id = StudentId;
}

/// A privileged identity vouched for by the external identity provider.
///
/// The core never authenticates administrators itself; it only verifies
/// tokens carrying admin rights.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Administrator {
    pub id: AdminId,
}

impl User for Administrator {
    const RIGHTS: Rights = Rights::Admin;

    type Id = AdminId;
}
