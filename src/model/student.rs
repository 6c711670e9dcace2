use argon2::Config as Argon2Config;
use chrono::{DateTime, Utc};
use log::error;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

use crate::model::{device::DeviceHash, ids::StudentId, mongodb::optional_datetime};

/// Length of generated replacement credentials.
pub const GENERATED_CREDENTIAL_LENGTH: usize = 8;

const SESSION_KEY_LENGTH: usize = 32;

/// Random identifier of a single login, carried in the student's auth cookie.
///
/// Each login mints a fresh key, so a cookie from an earlier session no
/// longer matches once the student logs in again or is evicted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn generate() -> Self {
        Self(random_alphanumeric(SESSION_KEY_LENGTH))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A student voter, as stored in the database.
///
/// `has_voted` implies `!is_logged_in` and `bound_device == None`; the only
/// methods that touch those fields preserve this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    #[serde(rename = "_id")]
    pub id: StudentId,
    pub name: String,
    /// Program of study, which doubles as the student's department.
    pub program: String,
    pub semester: u32,
    pub class_name: String,
    /// Argon2 encoded hash of the login credential.
    pub credential_hash: String,
    pub has_voted: bool,
    pub is_logged_in: bool,
    /// Digest of the device holding the current session.
    pub bound_device: Option<DeviceHash>,
    /// Key of the current session.
    #[serde(default)]
    pub session_key: Option<SessionKey>,
    #[serde(with = "optional_datetime")]
    pub last_login: Option<DateTime<Utc>>,
    #[serde(with = "optional_datetime")]
    pub vote_timestamp: Option<DateTime<Utc>>,
    /// Bumped by the store on every write, for optimistic concurrency control.
    #[serde(default)]
    pub revision: i64,
}

impl Student {
    /// Check whether the given credential is correct.
    pub fn verify_credential(&self, credential: &str) -> bool {
        match argon2::verify_encoded(&self.credential_hash, credential.as_bytes()) {
            Ok(matches) => matches,
            Err(err) => {
                error!("Malformed credential hash for student {}: {err}", self.id);
                false
            }
        }
    }

    /// Bind a new session to the given device, returning its key.
    pub fn open_session(&mut self, device: DeviceHash, now: DateTime<Utc>) -> SessionKey {
        let key = SessionKey::generate();
        self.is_logged_in = true;
        self.bound_device = Some(device);
        self.session_key = Some(key.clone());
        self.last_login = Some(now);
        key
    }

    /// Is the given key that of the session currently open?
    pub fn holds_session(&self, key: &SessionKey) -> bool {
        self.is_logged_in && self.session_key.as_ref() == Some(key)
    }

    /// Drop the current session, if any.
    pub fn close_session(&mut self) {
        self.is_logged_in = false;
        self.bound_device = None;
        self.session_key = None;
    }

    /// Irrevocably mark the student as having voted, which also ends the session.
    pub fn record_vote(&mut self, now: DateTime<Utc>) {
        self.close_session();
        self.has_voted = true;
        self.vote_timestamp = Some(now);
    }

    /// Administrative repair: forget that the student voted.
    pub fn clear_vote(&mut self) {
        self.close_session();
        self.has_voted = false;
        self.vote_timestamp = None;
    }
}

/// Hash a plaintext credential with a fresh random salt.
pub fn hash_credential(credential: &str) -> Result<String, argon2::Error> {
    // 16 bytes is recommended for password hashing:
    //  https://en.wikipedia.org/wiki/Argon2
    let mut salt = [0_u8; 16];
    rand::thread_rng().fill(&mut salt);
    argon2::hash_encoded(credential.as_bytes(), &salt, &Argon2Config::default())
}

/// Generate a random alphanumeric credential.
pub fn generate_credential() -> String {
    random_alphanumeric(GENERATED_CREDENTIAL_LENGTH)
}

fn random_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// A student as submitted by an administrator. The credential is in plaintext
/// and is never stored; if absent, one is generated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStudent {
    pub id: StudentId,
    pub name: String,
    pub program: String,
    pub semester: u32,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl NewStudent {
    /// Hash the credential and build the stored record.
    ///
    /// Returns the generated credential alongside, if one had to be generated.
    pub fn into_student(self) -> Result<(Student, Option<String>), argon2::Error> {
        let (credential, generated) = match self.credential {
            Some(credential) if !credential.is_empty() => (credential, false),
            _ => (generate_credential(), true),
        };
        let class_name = self
            .class_name
            .unwrap_or_else(|| format!("{}-Sem{}", self.program, self.semester));
        let student = Student {
            id: self.id,
            name: self.name,
            program: self.program,
            semester: self.semester,
            class_name,
            credential_hash: hash_credential(&credential)?,
            has_voted: false,
            is_logged_in: false,
            bound_device: None,
            session_key: None,
            last_login: None,
            vote_timestamp: None,
            revision: 0,
        };
        Ok((student, generated.then_some(credential)))
    }
}

/// The student's profile as seen by their own session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub id: StudentId,
    pub name: String,
    pub program: String,
    pub semester: u32,
    pub class_name: String,
}

impl From<&Student> for StudentProfile {
    fn from(student: &Student) -> Self {
        Self {
            id: student.id.clone(),
            name: student.name.clone(),
            program: student.program.clone(),
            semester: student.semester,
            class_name: student.class_name.clone(),
        }
    }
}
