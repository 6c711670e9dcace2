use jsonwebtoken::errors::{Error as JwtError, ErrorKind as JwtErrorKind};
use log::{debug, error};
use rocket::{
    http::{Status, StatusClass},
    response::{self, Responder},
    serde::json::Json,
    Request,
};
use serde::Serialize;
use thiserror::Error;

use crate::election::{AdminError, CastError, EligibilityError, ScheduleError};
use crate::logging::RequestId;
use crate::model::schedule::InactiveReason;
use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Eligibility(#[from] EligibilityError),
    #[error(transparent)]
    Cast(#[from] CastError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    Admin(#[from] AdminError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("{0} is not in managed state")]
    Unconfigured(&'static str),
}

impl Error {
    pub fn status(&self) -> Status {
        match self {
            Self::Eligibility(err) => match err {
                EligibilityError::NotFound => Status::NotFound,
                EligibilityError::InvalidCredential => Status::Unauthorized,
                EligibilityError::AlreadyVoted | EligibilityError::SessionConflict => {
                    Status::Conflict
                }
                EligibilityError::DeviceExhausted => Status::Forbidden,
                EligibilityError::MissingDevice => Status::UnprocessableEntity,
                EligibilityError::Store(_) => Status::ServiceUnavailable,
            },
            Self::Cast(err) => match err {
                CastError::NotFound => Status::NotFound,
                CastError::AlreadyVoted => Status::Conflict,
                CastError::NoActiveSession => Status::Unauthorized,
                CastError::VotingNotActive(_) | CastError::CrossDepartmentForbidden(_) => {
                    Status::Forbidden
                }
                CastError::MalformedBallot(_)
                | CastError::UnknownPosition(_)
                | CastError::UnknownCandidate(_) => Status::UnprocessableEntity,
                CastError::Store(_) => Status::ServiceUnavailable,
            },
            Self::Schedule(err) => match err {
                ScheduleError::InvalidWindow => Status::UnprocessableEntity,
                ScheduleError::Store(_) => Status::ServiceUnavailable,
            },
            Self::Admin(err) => match err {
                AdminError::NotFound(_) => Status::NotFound,
                AdminError::AlreadyExists(_) => Status::Conflict,
                AdminError::UnknownPosition(_) => Status::UnprocessableEntity,
                AdminError::Credential(_) => Status::InternalServerError,
                AdminError::Store(_) => Status::ServiceUnavailable,
            },
            Self::Store(_) => Status::ServiceUnavailable,
            Self::Jwt(_) | Self::Unauthorized(_) => Status::Unauthorized,
            Self::Forbidden(_) => Status::Forbidden,
            Self::Unconfigured(_) => Status::InternalServerError,
        }
    }

    /// Machine-readable name of the rejection, for clients to pick a message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Eligibility(err) => err.kind(),
            Self::Cast(err) => err.kind(),
            Self::Schedule(err) => err.kind(),
            Self::Admin(err) => err.kind(),
            Self::Store(_) => "StoreUnavailable",
            Self::Jwt(err) => match err.kind() {
                JwtErrorKind::ExpiredSignature => "SessionExpired",
                _ => "Unauthorized",
            },
            Self::Unauthorized(_) => "Unauthorized",
            Self::Forbidden(_) => "Forbidden",
            Self::Unconfigured(_) => "Internal",
        }
    }

    fn reason(&self) -> Option<InactiveReason> {
        match self {
            Self::Cast(CastError::VotingNotActive(reason)) => Some(*reason),
            _ => None,
        }
    }
}

/// The JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(flatten)]
    pub reason: Option<InactiveReason>,
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status();
        let id = req.local_cache(RequestId::next);
        if status.class() == StatusClass::ServerError {
            error!("req{id} failed: {self}");
        } else {
            debug!("req{id} rejected: {self}");
        }

        // Never echo internal details to the client.
        let message = match status.class() {
            StatusClass::ServerError => status.reason_lossy().to_string(),
            _ => self.to_string(),
        };
        let body = ErrorBody {
            error: self.kind(),
            message,
            reason: self.reason(),
        };
        (status, Json(body)).respond_to(req)
    }
}

/// Gives guard failures and unmatched routes the same JSON shape as [`Error`].
#[catch(default)]
pub fn default_catcher(status: Status, _req: &Request<'_>) -> (Status, Json<ErrorBody>) {
    let body = ErrorBody {
        error: match status.code {
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "NotFound",
            422 => "BadRequest",
            _ if status.class() == StatusClass::ServerError => "Internal",
            _ => "BadRequest",
        },
        message: status.reason_lossy().to_string(),
        reason: None,
    };
    (status, Json(body))
}
