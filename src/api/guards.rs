//! Request guards that build the election services from managed state.

use std::sync::Arc;

use rocket::{
    http::Status,
    request::{FromRequest, Outcome},
    Request,
};

use crate::election::{AdminConsole, BallotEngine, ElectionSchedule, EligibilityGate};
use crate::error::Error;
use crate::store::SharedStore;
use crate::Config;

macro_rules! service_guard {
    ($($service:ident),* $(,)?) => {$(
        #[rocket::async_trait]
        impl<'r> FromRequest<'r> for $service {
            type Error = Error;

            /// Build the service on top of the managed store and config.
            async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
                let Some(store) = req.rocket().state::<SharedStore>() else {
                    return Outcome::Failure((
                        Status::InternalServerError,
                        Error::Unconfigured("SharedStore"),
                    ));
                };
                let Some(config) = req.rocket().state::<Config>() else {
                    return Outcome::Failure((
                        Status::InternalServerError,
                        Error::Unconfigured("Config"),
                    ));
                };
                Outcome::Success($service::new(Arc::clone(store), config))
            }
        }
    )*};
}

service_guard!(EligibilityGate, BallotEngine, ElectionSchedule, AdminConsole);
