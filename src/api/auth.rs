use rocket::{
    http::{Cookie, CookieJar},
    serde::json::Json,
    Route, State,
};
use serde::Deserialize;

use crate::{
    election::{EligibilityGate, Session},
    error::Result,
    model::{
        auth::{Administrator, AuthToken, AUTH_TOKEN_COOKIE},
        device::DeviceToken,
        ids::StudentId,
        student::Student,
    },
    Config,
};

pub fn routes() -> Vec<Route> {
    routes![login, logout, force_login]
}

/// Student credentials plus the fingerprint of the device they are using.
#[derive(Deserialize)]
pub struct LoginRequest {
    pub student_id: StudentId,
    pub credential: String,
    pub device_token: DeviceToken,
}

#[post("/auth/student", data = "<request>", format = "json")]
pub async fn login(
    request: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    gate: EligibilityGate,
    config: &State<Config>,
) -> Result<Json<Session>> {
    let session = gate
        .authenticate(
            &request.student_id,
            &request.credential,
            &request.device_token,
        )
        .await?;

    let token = AuthToken::<Student>::for_id(&session.student.id).with_session(session.key.clone());
    cookies.add(token.into_cookie(config));

    Ok(Json(session))
}

#[delete("/auth/student")]
pub async fn logout(
    token: AuthToken<Student>,
    cookies: &CookieJar<'_>,
    gate: EligibilityGate,
) -> Result<()> {
    // A token without a session key was never issued for a login here.
    if let Some(session) = token.session() {
        gate.end_session(&token.id(), session).await?;
    }
    cookies.remove(Cookie::named(AUTH_TOKEN_COOKIE));
    Ok(())
}

/// An administrator unlocks a student whose session is stuck on another
/// device. The terminal the request comes from becomes the student's session.
#[post("/auth/student/force", data = "<request>", format = "json")]
pub async fn force_login(
    admin: AuthToken<Administrator>,
    request: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    gate: EligibilityGate,
    config: &State<Config>,
) -> Result<Json<Session>> {
    let session = gate
        .force_authenticate(
            &admin.id(),
            &request.student_id,
            &request.credential,
            &request.device_token,
        )
        .await?;

    let token = AuthToken::<Student>::for_id(&session.student.id).with_session(session.key.clone());
    cookies.add(token.into_cookie(config));

    Ok(Json(session))
}
