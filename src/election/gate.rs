use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;

use crate::config::Config;
use crate::logging::AUDIT;
use crate::model::{
    device::{DeviceHash, DeviceHasher, DeviceToken},
    ids::{AdminId, StudentId},
    student::{SessionKey, StudentProfile},
};
use crate::store::{with_retries, SharedStore};

use super::EligibilityError;

/// A successfully opened session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub student: StudentProfile,
    pub logged_in_at: DateTime<Utc>,
    /// Goes into the auth cookie only.
    #[serde(skip)]
    pub key: SessionKey,
}

/// Decides whether a student may log in, and binds their session to one device.
pub struct EligibilityGate {
    store: SharedStore,
    hasher: DeviceHasher,
    retries: u32,
}

impl EligibilityGate {
    pub fn new(store: SharedStore, config: &Config) -> Self {
        Self {
            store,
            hasher: config.device_hasher(),
            retries: config.txn_retries(),
        }
    }

    /// Log a student in from the given device.
    ///
    /// Checks, in order: the student exists, the credential verifies, they
    /// have not voted, they are not logged in elsewhere, and this device has
    /// not already been used by them to vote. Nothing is written unless every
    /// check passes.
    pub async fn authenticate(
        &self,
        student_id: &StudentId,
        credential: &str,
        device: &DeviceToken,
    ) -> Result<Session, EligibilityError> {
        if device.is_empty() {
            return Err(EligibilityError::MissingDevice);
        }
        let device = &self.hasher.digest(device);

        match with_retries(self.retries, move || {
            self.try_authenticate(student_id, credential, device, None)
        })
        .await
        {
            Ok((session, _)) => {
                info!("Student {student_id} logged in");
                Ok(session)
            }
            Err(err) => {
                info!("Rejected login for student {student_id}: {err}");
                Err(err)
            }
        }
    }

    /// Log a student in on behalf of an administrator, evicting any session
    /// they already hold. Every other check still applies.
    pub async fn force_authenticate(
        &self,
        admin: &AdminId,
        student_id: &StudentId,
        credential: &str,
        device: &DeviceToken,
    ) -> Result<Session, EligibilityError> {
        if device.is_empty() {
            return Err(EligibilityError::MissingDevice);
        }
        let device = &self.hasher.digest(device);

        let (session, evicted) = with_retries(self.retries, move || {
            self.try_authenticate(student_id, credential, device, Some(admin))
        })
        .await
        .map_err(|err| {
            warn!(target: AUDIT, "Admin {admin} failed to force login for student {student_id}: {err}");
            err
        })?;

        match evicted {
            Some(evicted) => warn!(
                target: AUDIT,
                "Admin {admin} forced login for student {student_id}, evicting session on device {evicted}"
            ),
            None => warn!(
                target: AUDIT,
                "Admin {admin} forced login for student {student_id}, who had no session"
            ),
        }
        Ok(session)
    }

    /// One attempt at a login. Returns the session and the device of any evicted session.
    async fn try_authenticate(
        &self,
        student_id: &StudentId,
        credential: &str,
        device: &DeviceHash,
        forced_by: Option<&AdminId>,
    ) -> Result<(Session, Option<DeviceHash>), EligibilityError> {
        let mut txn = self.store.begin().await?;

        let mut student = txn
            .student(student_id)
            .await?
            .ok_or(EligibilityError::NotFound)?;
        if !student.verify_credential(credential) {
            return Err(EligibilityError::InvalidCredential);
        }
        if student.has_voted {
            return Err(EligibilityError::AlreadyVoted);
        }

        let mut evicted = None;
        if student.is_logged_in {
            if forced_by.is_none() {
                return Err(EligibilityError::SessionConflict);
            }
            evicted = student.bound_device.clone();
        }

        if let Some(usage) = txn.device_usage(device, student_id).await? {
            if usage.used {
                return Err(EligibilityError::DeviceExhausted);
            }
        }

        let now = Utc::now();
        let key = student.open_session(device.clone(), now);
        txn.update_student(&student).await?;
        txn.commit().await?;

        let session = Session {
            student: (&student).into(),
            logged_in_at: now,
            key,
        };
        Ok((session, evicted))
    }

    /// End the given session of a student.
    ///
    /// Unknown, logged-out and already-voted students are left as they are,
    /// as is a student whose current session has a different key.
    pub async fn end_session(
        &self,
        student_id: &StudentId,
        session: &SessionKey,
    ) -> Result<(), EligibilityError> {
        match with_retries(self.retries, move || {
            self.try_end_session(student_id, Some(session))
        })
        .await
        {
            Ok(Some(_)) => {
                info!("Student {student_id} logged out");
                Ok(())
            }
            Ok(None) | Err(EligibilityError::NotFound) => {
                debug!("Logout of student {student_id} without a matching session");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Log a student out on behalf of an administrator, e.g. after their client crashed.
    ///
    /// Returns whether there was a session to end.
    pub async fn release_session(
        &self,
        admin: &AdminId,
        student_id: &StudentId,
    ) -> Result<bool, EligibilityError> {
        let released =
            with_retries(self.retries, move || self.try_end_session(student_id, None)).await?;
        match &released {
            Some(device) => warn!(
                target: AUDIT,
                "Admin {admin} released session of student {student_id} on device {device}"
            ),
            None => info!("Admin {admin} released student {student_id}, who had no session"),
        }
        Ok(released.is_some())
    }

    /// One attempt at a logout, of the given session or of whichever is open.
    /// Returns the device whose session was closed, if any.
    async fn try_end_session(
        &self,
        student_id: &StudentId,
        only: Option<&SessionKey>,
    ) -> Result<Option<DeviceHash>, EligibilityError> {
        let mut txn = self.store.begin().await?;
        let mut student = txn
            .student(student_id)
            .await?
            .ok_or(EligibilityError::NotFound)?;
        let device = match (&student.bound_device, student.is_logged_in, student.has_voted) {
            (Some(device), true, false) => device.clone(),
            _ => return Ok(None),
        };
        if only.map_or(false, |key| !student.holds_session(key)) {
            return Ok(None);
        }

        student.close_session();
        txn.update_student(&student).await?;
        txn.commit().await?;
        Ok(Some(device))
    }
}
