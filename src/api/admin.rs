use chrono::Utc;
use rocket::{serde::json::Json, Route};
use serde::Serialize;

use crate::{
    election::{
        AdminConsole, CreatedStudent, EligibilityGate, ElectionSchedule, IssuedCredential, Tally,
        VotesReset,
    },
    error::Result,
    model::{
        auth::{Administrator, AuthToken},
        election::{Candidate, NewCandidate, NewPosition, Position},
        ids::StudentId,
        schedule::ElectionConfigSpec,
        student::NewStudent,
    },
};

pub fn routes() -> Vec<Route> {
    routes![
        get_config,
        put_config,
        start_voting,
        end_voting,
        create_student,
        reset_credential,
        reset_all_credentials,
        release_session,
        clear_votes,
        clear_all_votes,
        create_position,
        create_candidate,
        tally,
    ]
}

#[derive(Serialize)]
pub struct CredentialReset {
    pub credential: String,
}

#[derive(Serialize)]
pub struct Released {
    pub released: bool,
}

#[derive(Serialize)]
pub struct Cleared {
    pub cleared: u64,
}

#[get("/admin/config")]
pub async fn get_config(
    _token: AuthToken<Administrator>,
    schedule: ElectionSchedule,
) -> Result<Json<Option<ElectionConfigSpec>>> {
    Ok(Json(schedule.config().await?.map(ElectionConfigSpec::from)))
}

#[put("/admin/config", data = "<spec>", format = "json")]
pub async fn put_config(
    token: AuthToken<Administrator>,
    spec: Json<ElectionConfigSpec>,
    schedule: ElectionSchedule,
) -> Result<Json<ElectionConfigSpec>> {
    let config = schedule.set_config(&token.id(), spec.into_inner()).await?;
    Ok(Json(config.into()))
}

#[post("/admin/config/start")]
pub async fn start_voting(
    token: AuthToken<Administrator>,
    schedule: ElectionSchedule,
) -> Result<Json<ElectionConfigSpec>> {
    Ok(Json(schedule.start_now(&token.id(), Utc::now()).await?.into()))
}

#[post("/admin/config/end")]
pub async fn end_voting(
    token: AuthToken<Administrator>,
    schedule: ElectionSchedule,
) -> Result<Json<ElectionConfigSpec>> {
    Ok(Json(schedule.end_now(&token.id(), Utc::now()).await?.into()))
}

#[post("/admin/students", data = "<student>", format = "json")]
pub async fn create_student(
    token: AuthToken<Administrator>,
    student: Json<NewStudent>,
    console: AdminConsole,
) -> Result<Json<CreatedStudent>> {
    let created = console
        .create_student(&token.id(), student.into_inner())
        .await?;
    Ok(Json(created))
}

#[post("/admin/students/<student_id>/credential")]
pub async fn reset_credential(
    token: AuthToken<Administrator>,
    student_id: StudentId,
    console: AdminConsole,
) -> Result<Json<CredentialReset>> {
    let credential = console.reset_credential(&token.id(), &student_id).await?;
    Ok(Json(CredentialReset { credential }))
}

/// Issue every student a new credential. The plaintext list is only ever returned here.
#[post("/admin/students/credentials")]
pub async fn reset_all_credentials(
    token: AuthToken<Administrator>,
    console: AdminConsole,
) -> Result<Json<Vec<IssuedCredential>>> {
    Ok(Json(console.reset_all_credentials(&token.id()).await?))
}

/// Drop a student's session without logging in on their behalf.
#[post("/admin/students/<student_id>/release")]
pub async fn release_session(
    token: AuthToken<Administrator>,
    student_id: StudentId,
    gate: EligibilityGate,
) -> Result<Json<Released>> {
    let released = gate.release_session(&token.id(), &student_id).await?;
    Ok(Json(Released { released }))
}

#[delete("/admin/students/<student_id>/votes")]
pub async fn clear_votes(
    token: AuthToken<Administrator>,
    student_id: StudentId,
    console: AdminConsole,
) -> Result<Json<Cleared>> {
    let cleared = console.clear_student_votes(&token.id(), &student_id).await?;
    Ok(Json(Cleared { cleared }))
}

#[delete("/admin/votes")]
pub async fn clear_all_votes(
    token: AuthToken<Administrator>,
    console: AdminConsole,
) -> Result<Json<VotesReset>> {
    Ok(Json(console.clear_all_votes(&token.id()).await?))
}

#[post("/admin/positions", data = "<position>", format = "json")]
pub async fn create_position(
    token: AuthToken<Administrator>,
    position: Json<NewPosition>,
    console: AdminConsole,
) -> Result<Json<Position>> {
    let position = console
        .create_position(&token.id(), position.into_inner())
        .await?;
    Ok(Json(position))
}

#[post("/admin/candidates", data = "<candidate>", format = "json")]
pub async fn create_candidate(
    token: AuthToken<Administrator>,
    candidate: Json<NewCandidate>,
    console: AdminConsole,
) -> Result<Json<Candidate>> {
    let candidate = console
        .create_candidate(&token.id(), candidate.into_inner())
        .await?;
    Ok(Json(candidate))
}

#[get("/admin/tally")]
pub async fn tally(_token: AuthToken<Administrator>, console: AdminConsole) -> Result<Json<Tally>> {
    Ok(Json(console.tally().await?))
}
