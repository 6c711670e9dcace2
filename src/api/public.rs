use chrono::Utc;
use rocket::{serde::json::Json, Route};

use crate::{
    election::{BallotEngine, ElectionSchedule},
    error::Result,
    model::{election::BallotPosition, schedule::VotingStatus},
};

pub fn routes() -> Vec<Route> {
    routes![status, positions]
}

#[get("/status")]
pub async fn status(schedule: ElectionSchedule) -> Result<Json<VotingStatus>> {
    Ok(Json(schedule.status(Utc::now()).await?))
}

/// Every position with its candidates, ordered by position name.
#[get("/positions")]
pub async fn positions(engine: BallotEngine) -> Result<Json<Vec<BallotPosition>>> {
    Ok(Json(engine.ballot_options().await?))
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use rocket::{http::Status, local::asynchronous::Client, serde::json::Value};

    use super::*;
    use crate::model::schedule::ElectionConfig;
    use crate::store::MemoryStore;

    #[backend_test]
    async fn status_without_a_schedule(client: Client) {
        let response = client.get(uri!(status)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let status: Value = response.into_json().await.unwrap();
        assert_eq!(status["state"], "not_scheduled");
        assert_eq!(status["voting_start"], Value::Null);
        assert_eq!(status["seconds_remaining"], Value::Null);
    }

    #[backend_test]
    async fn status_counts_down_while_active(client: Client, store: MemoryStore) {
        store.put_config(ElectionConfig::open_at(Utc::now())).await;

        let status: VotingStatus = client
            .get(uri!(status))
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert!(matches!(
            status.state,
            crate::model::schedule::WindowState::Active { .. }
        ));
        let remaining = status.seconds_remaining.unwrap();
        assert!(remaining > 0);
        assert!(remaining <= Duration::minutes(50).num_seconds());
    }

    #[backend_test]
    async fn positions_group_candidates(client: Client, store: MemoryStore) {
        store.put_reference_data().await;

        let response = client.get(uri!(positions)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let positions: Vec<BallotPosition> = response.into_json().await.unwrap();
        assert_eq!(positions.len(), 2);
        let first = positions
            .iter()
            .find(|p| p.position.id.as_str() == "pos1")
            .unwrap();
        assert_eq!(first.candidates.len(), 2);
    }

    #[backend_test]
    async fn positions_are_empty_before_setup(client: Client) {
        let positions: Vec<BallotPosition> = client
            .get(uri!(positions))
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert!(positions.is_empty());
    }
}
