use rocket::{
    http::{Cookie, CookieJar},
    serde::json::Json,
    Route,
};
use serde::Deserialize;

use crate::{
    election::{BallotEngine, CastError},
    error::Result,
    model::{
        auth::{AuthToken, AUTH_TOKEN_COOKIE},
        student::Student,
        vote::{Receipt, Selection},
    },
};

pub fn routes() -> Vec<Route> {
    routes![cast_ballot]
}

#[derive(Deserialize)]
pub struct Ballot {
    pub selections: Vec<Selection>,
}

/// Cast the logged-in student's ballot. Their session ends with it.
#[post("/ballot", data = "<ballot>", format = "json")]
pub async fn cast_ballot(
    token: AuthToken<Student>,
    ballot: Json<Ballot>,
    cookies: &CookieJar<'_>,
    engine: BallotEngine,
) -> Result<Json<Receipt>> {
    let session = token.session().ok_or(CastError::NoActiveSession)?;
    let receipt = engine
        .cast_ballot(&token.id(), session, &ballot.selections)
        .await?;
    cookies.remove(Cookie::named(AUTH_TOKEN_COOKIE));
    Ok(Json(receipt))
}
