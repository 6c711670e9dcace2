//! The election's voting window and the pull-based state machine over it.
//!
//! Nothing here runs on a timer: every state is recomputed from the stored
//! config and the current time whenever a decision is made.

use chrono::{DateTime, Duration, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::mongodb::optional_datetime;

/// The database ID of the config singleton.
pub const CONFIG_ID: &str = "electionConfig";

/// Length of the window opened by "start now" when no future end is set.
pub const DEFAULT_VOTING_HOURS: i64 = 8;

/// The election config singleton, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionConfig {
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub voting_start: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub voting_end: DateTime<Utc>,
    /// Manual override: when false, voting is disabled whatever the window says.
    pub is_active: bool,
    pub enable_departmental_voting: bool,
    pub allow_cross_department_voting: bool,
    #[serde(with = "optional_datetime", default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ElectionConfig {
    /// Are students restricted to candidates from their own department?
    pub fn restricts_departments(&self) -> bool {
        self.enable_departmental_voting && !self.allow_cross_department_voting
    }
}

fn default_true() -> bool {
    true
}

/// An election config as submitted by, or shown to, an administrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionConfigSpec {
    pub voting_start: DateTime<Utc>,
    pub voting_end: DateTime<Utc>,
    pub is_active: bool,
    #[serde(default)]
    pub enable_departmental_voting: bool,
    #[serde(default = "default_true")]
    pub allow_cross_department_voting: bool,
}

impl ElectionConfigSpec {
    /// Is the window well-formed, i.e. does it start strictly before it ends?
    pub fn is_valid(&self) -> bool {
        self.voting_start < self.voting_end
    }

    pub fn into_config(self, now: DateTime<Utc>) -> ElectionConfig {
        ElectionConfig {
            voting_start: self.voting_start,
            voting_end: self.voting_end,
            is_active: self.is_active,
            enable_departmental_voting: self.enable_departmental_voting,
            allow_cross_department_voting: self.allow_cross_department_voting,
            updated_at: Some(now),
        }
    }
}

impl From<ElectionConfig> for ElectionConfigSpec {
    fn from(config: ElectionConfig) -> Self {
        Self {
            voting_start: config.voting_start,
            voting_end: config.voting_end,
            is_active: config.is_active,
            enable_departmental_voting: config.enable_departmental_voting,
            allow_cross_department_voting: config.allow_cross_department_voting,
        }
    }
}

/// Effective state of the voting window at some instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WindowState {
    /// No config has ever been written.
    NotScheduled,
    /// Scheduled, but the window has not opened yet.
    Pending { starts_at: DateTime<Utc> },
    /// Votes are being accepted.
    Active { ends_at: DateTime<Utc> },
    /// The window has closed.
    Ended { ended_at: DateTime<Utc> },
    /// Switched off by an administrator, overriding the window.
    Disabled,
}

impl WindowState {
    /// Compute the state from the stored config. Both window bounds are inclusive.
    pub fn at(config: Option<&ElectionConfig>, now: DateTime<Utc>) -> Self {
        let Some(config) = config else {
            return Self::NotScheduled;
        };
        if !config.is_active {
            Self::Disabled
        } else if now < config.voting_start {
            Self::Pending {
                starts_at: config.voting_start,
            }
        } else if now > config.voting_end {
            Self::Ended {
                ended_at: config.voting_end,
            }
        } else {
            Self::Active {
                ends_at: config.voting_end,
            }
        }
    }

    /// Succeeds only while votes may be cast.
    pub fn check_open(self) -> Result<(), InactiveReason> {
        match self {
            Self::Active { .. } => Ok(()),
            Self::NotScheduled => Err(InactiveReason::NotScheduled),
            Self::Pending { starts_at } => Err(InactiveReason::NotStarted { starts_at }),
            Self::Ended { ended_at } => Err(InactiveReason::Ended { ended_at }),
            Self::Disabled => Err(InactiveReason::Disabled),
        }
    }

    /// Time left until the next transition, if one is scheduled.
    pub fn remaining(self, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            Self::Pending { starts_at } => Some(starts_at - now),
            Self::Active { ends_at } => Some(ends_at - now),
            _ => None,
        }
    }

    pub fn message(self) -> String {
        if let Self::Active { ends_at } = self {
            return format!("Voting is active until {ends_at}");
        }
        self.check_open()
            .err()
            .map(|reason| capitalise(&reason.to_string()))
            .unwrap_or_default()
    }
}

fn capitalise(message: &str) -> String {
    let mut chars = message.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Why a ballot cannot be cast right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum InactiveReason {
    #[error("voting schedule has not been set")]
    NotScheduled,
    #[error("voting will begin at {starts_at}")]
    NotStarted { starts_at: DateTime<Utc> },
    #[error("voting ended at {ended_at}")]
    Ended { ended_at: DateTime<Utc> },
    #[error("voting is currently disabled by the administrator")]
    Disabled,
}

/// The public view of the window, for clients to render countdowns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingStatus {
    #[serde(flatten)]
    pub state: WindowState,
    pub voting_start: Option<DateTime<Utc>>,
    pub voting_end: Option<DateTime<Utc>>,
    pub seconds_remaining: Option<i64>,
    pub message: String,
}

impl VotingStatus {
    pub fn at(config: Option<&ElectionConfig>, now: DateTime<Utc>) -> Self {
        let state = WindowState::at(config, now);
        Self {
            state,
            voting_start: config.map(|c| c.voting_start),
            voting_end: config.map(|c| c.voting_end),
            seconds_remaining: state.remaining(now).map(|d| d.num_seconds()),
            message: state.message(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_is_not_scheduled() {
        let now = Utc::now();
        assert_eq!(WindowState::at(None, now), WindowState::NotScheduled);
        assert_eq!(
            WindowState::at(None, now).check_open(),
            Err(InactiveReason::NotScheduled)
        );
    }

    #[test]
    fn window_transitions_with_the_clock() {
        let now = Utc::now();
        let config = ElectionConfig::open_at(now);
        let start = config.voting_start;
        let end = config.voting_end;

        let before = start - Duration::seconds(1);
        assert_eq!(
            WindowState::at(Some(&config), before),
            WindowState::Pending { starts_at: start }
        );
        assert_eq!(
            WindowState::at(Some(&config), start),
            WindowState::Active { ends_at: end }
        );
        assert_eq!(
            WindowState::at(Some(&config), end),
            WindowState::Active { ends_at: end }
        );
        let after = end + Duration::seconds(1);
        assert_eq!(
            WindowState::at(Some(&config), after),
            WindowState::Ended { ended_at: end }
        );
        assert_eq!(
            WindowState::at(Some(&config), after).check_open(),
            Err(InactiveReason::Ended { ended_at: end })
        );
    }

    #[test]
    fn disabled_overrides_every_timestamp() {
        let now = Utc::now();
        let mut config = ElectionConfig::open_at(now);
        config.is_active = false;
        for instant in [
            config.voting_start - Duration::hours(1),
            now,
            config.voting_end + Duration::hours(1),
        ] {
            assert_eq!(
                WindowState::at(Some(&config), instant),
                WindowState::Disabled
            );
        }
    }

    #[test]
    fn status_reports_countdowns() {
        let now = Utc::now();
        let config = ElectionConfig::open_at(now);

        let status = VotingStatus::at(Some(&config), now);
        assert_eq!(status.seconds_remaining, Some(50 * 60));
        assert!(status.message.starts_with("Voting is active until"));

        let early = now - Duration::minutes(30);
        let status = VotingStatus::at(Some(&config), early);
        assert_eq!(status.seconds_remaining, Some(20 * 60));
        assert!(status.message.starts_with("Voting will begin at"));

        let status = VotingStatus::at(None, now);
        assert_eq!(status.state, WindowState::NotScheduled);
        assert_eq!(status.seconds_remaining, None);
        assert_eq!(status.message, "Voting schedule has not been set");
    }

    #[test]
    fn submitted_windows_must_start_before_they_end() {
        let now = Utc::now();
        let mut spec = ElectionConfigSpec::from(ElectionConfig::open_at(now));
        assert!(spec.is_valid());
        spec.voting_end = spec.voting_start;
        assert!(!spec.is_valid());
    }

    #[test]
    fn cross_department_restriction_needs_both_flags() {
        let mut config = ElectionConfig::open_at(Utc::now());
        assert!(!config.restricts_departments());
        config.enable_departmental_voting = true;
        assert!(!config.restricts_departments());
        config.allow_cross_department_voting = false;
        assert!(config.restricts_departments());
    }
}
