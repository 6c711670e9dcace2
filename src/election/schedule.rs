use chrono::{DateTime, Duration, Utc};
use log::warn;

use crate::config::Config;
use crate::logging::AUDIT;
use crate::model::{
    ids::AdminId,
    schedule::{ElectionConfig, ElectionConfigSpec, VotingStatus, DEFAULT_VOTING_HOURS},
};
use crate::store::{with_retries, SharedStore, StoreError};

use super::ScheduleError;

/// Reads and writes the election config singleton.
pub struct ElectionSchedule {
    store: SharedStore,
    retries: u32,
}

impl ElectionSchedule {
    pub fn new(store: SharedStore, config: &Config) -> Self {
        Self {
            store,
            retries: config.txn_retries(),
        }
    }

    pub async fn config(&self) -> Result<Option<ElectionConfig>, StoreError> {
        let mut txn = self.store.begin().await?;
        txn.election_config().await
    }

    /// The window as the public sees it at `now`.
    pub async fn status(&self, now: DateTime<Utc>) -> Result<VotingStatus, StoreError> {
        let config = self.config().await?;
        Ok(VotingStatus::at(config.as_ref(), now))
    }

    /// Replace the config. Last writer wins.
    pub async fn set_config(
        &self,
        admin: &AdminId,
        spec: ElectionConfigSpec,
    ) -> Result<ElectionConfig, ScheduleError> {
        if !spec.is_valid() {
            return Err(ScheduleError::InvalidWindow);
        }
        let config = &spec.into_config(Utc::now());
        with_retries(self.retries, move || self.put(config)).await?;
        warn!(
            target: AUDIT,
            "Admin {admin} set the voting window to {} - {} (active: {})",
            config.voting_start,
            config.voting_end,
            config.is_active
        );
        Ok(config.clone())
    }

    /// Open voting from `now`, keeping the scheduled end if it is still ahead.
    pub async fn start_now(
        &self,
        admin: &AdminId,
        now: DateTime<Utc>,
    ) -> Result<ElectionConfig, ScheduleError> {
        let config = with_retries(self.retries, move || {
            self.update(now, move |existing| {
                let voting_end = existing
                    .map(|config| config.voting_end)
                    .filter(|end| *end > now)
                    .unwrap_or_else(|| now + Duration::hours(DEFAULT_VOTING_HOURS));
                (now, voting_end, true)
            })
        })
        .await?;
        warn!(target: AUDIT, "Admin {admin} started voting, ending at {}", config.voting_end);
        Ok(config)
    }

    /// Close and disable voting at `now`.
    ///
    /// The start is pulled back to before `now` if needed, so the stored
    /// window always has its start strictly before its end.
    pub async fn end_now(
        &self,
        admin: &AdminId,
        now: DateTime<Utc>,
    ) -> Result<ElectionConfig, ScheduleError> {
        let config = with_retries(self.retries, move || {
            self.update(now, move |existing| {
                let latest_start = now - Duration::seconds(1);
                let voting_start = existing
                    .map(|config| config.voting_start.min(latest_start))
                    .unwrap_or(latest_start);
                (voting_start, now, false)
            })
        })
        .await?;
        warn!(target: AUDIT, "Admin {admin} ended voting");
        Ok(config)
    }

    async fn put(&self, config: &ElectionConfig) -> Result<(), ScheduleError> {
        let mut txn = self.store.begin().await?;
        txn.put_election_config(config).await?;
        txn.commit().await?;
        Ok(())
    }

    /// Rewrite the window from the existing config, keeping the departmental flags.
    async fn update<F>(&self, now: DateTime<Utc>, window: F) -> Result<ElectionConfig, ScheduleError>
    where
        F: FnOnce(Option<&ElectionConfig>) -> (DateTime<Utc>, DateTime<Utc>, bool),
    {
        let mut txn = self.store.begin().await?;
        let existing = txn.election_config().await?;
        let (voting_start, voting_end, is_active) = window(existing.as_ref());
        let config = ElectionConfig {
            voting_start,
            voting_end,
            is_active,
            enable_departmental_voting: existing
                .as_ref()
                .map_or(false, |config| config.enable_departmental_voting),
            allow_cross_department_voting: existing
                .as_ref()
                .map_or(true, |config| config.allow_cross_department_voting),
            updated_at: Some(now),
        };
        txn.put_election_config(&config).await?;
        txn.commit().await?;
        Ok(config)
    }
}
