//! The side a participant plays in a lab engagement.

use serde::{Deserialize, Serialize};

/// SMALLINT representation of a team in the database.
pub type TeamId = i16;

/// Which side of an engagement a participant plays.
///
/// Discriminants match the values stored in the `team` column of
/// `match_requests` (and implied by the attacker/defender columns of
/// `lab_sessions`).
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Team {
    Attacker = 1,
    Defender = 2,
}

impl Team {
    /// Return the database column value.
    pub fn id(self) -> TeamId {
        self as TeamId
    }

    /// The side a compatible counterpart must be playing.
    pub fn opposite(self) -> Team {
        match self {
            Team::Attacker => Team::Defender,
            Team::Defender => Team::Attacker,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Team::Attacker => "attacker",
            Team::Defender => "defender",
        }
    }
}

impl From<Team> for TeamId {
    fn from(value: Team) -> Self {
        value as TeamId
    }
}

impl TryFrom<TeamId> for Team {
    type Error = crate::error::CoreError;

    fn try_from(value: TeamId) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Team::Attacker),
            2 => Ok(Team::Defender),
            other => Err(crate::error::CoreError::Validation(format!(
                "Unknown team id: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposite_is_involutive() {
        assert_eq!(Team::Attacker.opposite(), Team::Defender);
        assert_eq!(Team::Defender.opposite(), Team::Attacker);
        assert_eq!(Team::Attacker.opposite().opposite(), Team::Attacker);
    }

    #[test]
    fn round_trips_through_team_id() {
        for team in [Team::Attacker, Team::Defender] {
            assert_eq!(Team::try_from(team.id()).unwrap(), team);
        }
        assert!(Team::try_from(0).is_err());
        assert!(Team::try_from(3).is_err());
    }

    #[test]
    fn serializes_as_lowercase_string() {
        assert_eq!(serde_json::to_string(&Team::Attacker).unwrap(), "\"attacker\"");
        let parsed: Team = serde_json::from_str("\"defender\"").unwrap();
        assert_eq!(parsed, Team::Defender);
    }
}
