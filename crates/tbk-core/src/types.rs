use serde::{Deserialize, Serialize};

/// Argon2id cost parameters, stored per profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl KdfParams {
    /// Lowest accepted cost (OWASP Argon2id baseline: 19 MiB, t=2, p=1).
    pub const MINIMUM: KdfParams = KdfParams {
        mem_cost_kib: 19 * 1024,
        time_cost: 2,
        parallelism: 1,
    };

    /// Returns the first parameter that falls below [`KdfParams::MINIMUM`].
    pub fn below_floor(&self) -> Option<String> {
        let floor = Self::MINIMUM;
        if self.mem_cost_kib < floor.mem_cost_kib {
            return Some(format!(
                "mem_cost_kib {} < {}",
                self.mem_cost_kib, floor.mem_cost_kib
            ));
        }
        if self.time_cost < floor.time_cost {
            return Some(format!("time_cost {} < {}", self.time_cost, floor.time_cost));
        }
        if self.parallelism < floor.parallelism {
            return Some(format!(
                "parallelism {} < {}",
                self.parallelism, floor.parallelism
            ));
        }
        None
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

/// Difference between a stored snapshot and a source tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
    /// Plaintext bytes of distinct chunks that are not yet stored
    pub bytes_to_upload: u64,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params_above_floor() {
        assert_eq!(KdfParams::default().below_floor(), None);
        assert_eq!(KdfParams::MINIMUM.below_floor(), None);
    }

    #[test]
    fn test_floor_rejects_each_parameter() {
        let low_mem = KdfParams {
            mem_cost_kib: 1024,
            ..KdfParams::default()
        };
        assert!(low_mem.below_floor().unwrap().contains("mem_cost_kib"));

        let low_time = KdfParams {
            time_cost: 1,
            ..KdfParams::default()
        };
        assert!(low_time.below_floor().unwrap().contains("time_cost"));

        let no_lanes = KdfParams {
            parallelism: 0,
            ..KdfParams::default()
        };
        assert!(no_lanes.below_floor().unwrap().contains("parallelism"));
    }

    #[test]
    fn test_diff_empty_ignores_bytes() {
        let diff = Diff::default();
        assert!(diff.is_empty());

        let diff = Diff {
            removed: vec!["old.txt".into()],
            ..Diff::default()
        };
        assert!(!diff.is_empty());
    }
}
