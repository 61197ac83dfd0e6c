//! Hunter/runner split and randomized role assignment.

use std::fmt;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::ParticipantId;

/// Side a participant plays in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Hunter,
    Runner,
    Spectator,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Hunter => "hunter",
            Role::Runner => "runner",
            Role::Spectator => "spectator",
        })
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum RoleError {
    #[error("need at least 2 participants, got {0}")]
    NotEnoughParticipants(usize),
}

/// Result of one assignment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleAssignment {
    pub hunters: Vec<ParticipantId>,
    pub runners: Vec<ParticipantId>,
}

/// Computes how a roster is split and who ends up on which side.
#[derive(Debug, Clone, Copy)]
pub struct RoleAssigner {
    max_runners: usize,
    runner_ratio: f64,
}

impl RoleAssigner {
    pub fn new(max_runners: usize, runner_ratio: f64) -> Self {
        Self {
            max_runners,
            runner_ratio,
        }
    }

    /// `(hunters, runners)` for a roster of `n`. Always at least one of each for `n >= 2`.
    pub fn split(&self, n: usize) -> (usize, usize) {
        let wanted = (n as f64 * self.runner_ratio).ceil() as usize;
        let mut runners = wanted.clamp(1, self.max_runners.max(1));
        if runners >= n {
            runners = n.saturating_sub(1);
        }
        let mut hunters = n - runners;
        if hunters < 1 {
            hunters = 1;
            runners = n.saturating_sub(1);
        }
        (hunters, runners)
    }

    /// Shuffle the roster and split it.
    pub fn assign(&self, roster: &[ParticipantId]) -> Result<RoleAssignment, RoleError> {
        self.assign_with_rng(roster, &mut rand::thread_rng())
    }

    pub fn assign_with_rng<R: Rng + ?Sized>(
        &self,
        roster: &[ParticipantId],
        rng: &mut R,
    ) -> Result<RoleAssignment, RoleError> {
        let n = roster.len();
        if n < 2 {
            return Err(RoleError::NotEnoughParticipants(n));
        }

        let (_, runner_count) = self.split(n);
        let mut shuffled = roster.to_vec();
        shuffled.shuffle(rng);
        let hunters = shuffled.split_off(runner_count);

        Ok(RoleAssignment {
            hunters,
            runners: shuffled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn roster(n: usize) -> Vec<ParticipantId> {
        (0..n).map(|i| format!("player-{i}")).collect()
    }

    #[test]
    fn test_two_players_always_one_each() {
        for ratio in [0.01, 0.25, 0.5, 0.75, 1.0] {
            for max_runners in [1, 3, 10] {
                let assigner = RoleAssigner::new(max_runners, ratio);
                assert_eq!(assigner.split(2), (1, 1), "ratio={ratio} max={max_runners}");

                let assignment = assigner.assign(&roster(2)).unwrap();
                assert_eq!(assignment.hunters.len(), 1);
                assert_eq!(assignment.runners.len(), 1);
            }
        }
    }

    #[test]
    fn test_split_bounds() {
        // maxHunters=5, maxRunners=3, ratio=0.5 -> capacity 8.
        let assigner = RoleAssigner::new(3, 0.5);
        for n in 2..=8 {
            let (hunters, runners) = assigner.split(n);
            assert!(hunters >= 1, "n={n}");
            assert!(runners >= 1, "n={n}");
            assert!(runners <= 3, "n={n}");
            assert_eq!(hunters + runners, n);
        }
    }

    #[test]
    fn test_full_ratio_keeps_one_hunter() {
        let assigner = RoleAssigner::new(20, 1.0);
        assert_eq!(assigner.split(6), (1, 5));
    }

    #[test]
    fn test_runner_cap() {
        let assigner = RoleAssigner::new(2, 0.9);
        assert_eq!(assigner.split(7), (5, 2));
    }

    #[test]
    fn test_assignment_partitions_roster() {
        let assigner = RoleAssigner::new(3, 0.5);
        let players = roster(7);
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..50 {
            let assignment = assigner.assign_with_rng(&players, &mut rng).unwrap();
            let (hunters, runners) = assigner.split(players.len());
            assert_eq!(assignment.hunters.len(), hunters);
            assert_eq!(assignment.runners.len(), runners);

            let all: HashSet<_> = assignment
                .hunters
                .iter()
                .chain(assignment.runners.iter())
                .cloned()
                .collect();
            assert_eq!(all, players.iter().cloned().collect());
        }
    }

    #[test]
    fn test_assignment_is_randomized() {
        let assigner = RoleAssigner::new(1, 0.5);
        let players = roster(4);
        let mut seen_runners = HashSet::new();

        for _ in 0..200 {
            let assignment = assigner.assign(&players).unwrap();
            seen_runners.insert(assignment.runners[0].clone());
        }
        // Every participant should get to run at least once over 200 draws.
        assert_eq!(seen_runners.len(), 4);
    }

    #[test]
    fn test_rejects_tiny_roster() {
        let assigner = RoleAssigner::new(3, 0.5);
        assert_eq!(
            assigner.assign(&roster(1)),
            Err(RoleError::NotEnoughParticipants(1))
        );
    }
}
