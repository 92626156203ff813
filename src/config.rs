//! Options consumed by the [`TestingEngine`](crate::TestingEngine).

use crate::strategy::*;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Names a scheduling strategy and its parameter, e.g. `pct:3` or `rdb:2`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StrategyKind {
    Random,
    Dfs,
    Iddfs,
    Pct { bug_depth: usize },
    DelayBounding { max_delays: usize },
    RandomDelayBounding { max_delays: usize },
    RandomOperationBounding { max_switches: usize },
    PrioritizedOperationBounding { bug_depth: usize },
    MaceMc,
}

impl StrategyKind {
    /// Whether the strategy reads operation ids.
    pub fn is_operation_aware(&self) -> bool {
        matches!(
            self,
            StrategyKind::RandomOperationBounding { .. } | StrategyKind::PrioritizedOperationBounding { .. }
        )
    }
}

impl Display for StrategyKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::Random => write!(f, "random"),
            StrategyKind::Dfs => write!(f, "dfs"),
            StrategyKind::Iddfs => write!(f, "iddfs"),
            StrategyKind::Pct { bug_depth } => write!(f, "pct:{bug_depth}"),
            StrategyKind::DelayBounding { max_delays } => write!(f, "db:{max_delays}"),
            StrategyKind::RandomDelayBounding { max_delays } => write!(f, "rdb:{max_delays}"),
            StrategyKind::RandomOperationBounding { max_switches } => write!(f, "rob:{max_switches}"),
            StrategyKind::PrioritizedOperationBounding { bug_depth } => write!(f, "pob:{bug_depth}"),
            StrategyKind::MaceMc => write!(f, "macemc"),
        }
    }
}

impl FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, raw) = match s.split_once(':') {
            Some((name, raw)) => (name, Some(raw)),
            None => (s, None),
        };
        let parameter = |default: usize| -> Result<usize, Error> {
            match raw {
                None => Ok(default),
                Some(p) => p.parse().map_err(|_| Error::InvalidStrategyParameter {
                    strategy: name.to_string(),
                    reason: format!("`{p}` is not a non-negative integer"),
                }),
            }
        };
        let no_parameter = |kind: StrategyKind| -> Result<StrategyKind, Error> {
            match raw {
                None => Ok(kind),
                Some(_) => Err(Error::InvalidStrategyParameter {
                    strategy: name.to_string(),
                    reason: "takes no parameter".to_string(),
                }),
            }
        };
        match name.to_ascii_lowercase().as_str() {
            "random" => no_parameter(StrategyKind::Random),
            "dfs" => no_parameter(StrategyKind::Dfs),
            "iddfs" => no_parameter(StrategyKind::Iddfs),
            "macemc" => no_parameter(StrategyKind::MaceMc),
            "pct" => Ok(StrategyKind::Pct { bug_depth: parameter(2)? }),
            "db" => Ok(StrategyKind::DelayBounding { max_delays: parameter(2)? }),
            "rdb" => Ok(StrategyKind::RandomDelayBounding { max_delays: parameter(2)? }),
            "rob" => Ok(StrategyKind::RandomOperationBounding { max_switches: parameter(2)? }),
            "pob" => Ok(StrategyKind::PrioritizedOperationBounding { bug_depth: parameter(2)? }),
            _ => Err(Error::UnknownStrategy(s.to_string())),
        }
    }
}

impl TryFrom<String> for StrategyKind {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<StrategyKind> for String {
    fn from(kind: StrategyKind) -> Self {
        kind.to_string()
    }
}

/// Knobs for a batch of iterations. Build one with the setters or deserialize it from JSON;
/// unspecified fields take their defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub iterations: usize,
    /// Maximum decisions per iteration. Zero means unbounded.
    pub depth_bound: usize,
    /// Length of the exhaustive prefix explored by [`StrategyKind::MaceMc`].
    pub safety_prefix_bound: usize,
    /// Seed for every randomized strategy. Absent means a time-derived seed.
    pub seed: Option<u64>,
    pub strategy: StrategyKind,
    /// Log operation ids alongside sends and raises.
    pub bound_operations: bool,
    /// Allow [`Cx::spawn_task`](crate::Cx::spawn_task).
    pub schedule_intra_actor_concurrency: bool,
    pub check_liveness: bool,
    pub cache_program_state: bool,
    /// Keep running iterations after a bug instead of stopping at the first one.
    pub full_exploration: bool,
    pub deadlock_is_bug: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            iterations: 1,
            depth_bound: 10_000,
            safety_prefix_bound: 0,
            seed: None,
            strategy: StrategyKind::Random,
            bound_operations: false,
            schedule_intra_actor_concurrency: false,
            check_liveness: false,
            cache_program_state: false,
            full_exploration: false,
            deadlock_is_bug: true,
        }
    }
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn depth_bound(mut self, depth_bound: usize) -> Self {
        self.depth_bound = depth_bound;
        self
    }

    pub fn safety_prefix_bound(mut self, safety_prefix_bound: usize) -> Self {
        self.safety_prefix_bound = safety_prefix_bound;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Operation-aware strategies also enable operation bounding, since they schedule by the
    /// operation ids it tracks.
    pub fn strategy(mut self, strategy: StrategyKind) -> Self {
        if strategy.is_operation_aware() {
            self.bound_operations = true;
        }
        self.strategy = strategy;
        self
    }

    pub fn bound_operations(mut self, enabled: bool) -> Self {
        self.bound_operations = enabled;
        self
    }

    pub fn schedule_intra_actor_concurrency(mut self, enabled: bool) -> Self {
        self.schedule_intra_actor_concurrency = enabled;
        self
    }

    /// Also enables program-state caching, which liveness checking relies on.
    pub fn check_liveness(mut self, enabled: bool) -> Self {
        self.check_liveness = enabled;
        if enabled {
            self.cache_program_state = true;
        }
        self
    }

    pub fn cache_program_state(mut self, enabled: bool) -> Self {
        self.cache_program_state = enabled;
        self
    }

    pub fn full_exploration(mut self, enabled: bool) -> Self {
        self.full_exploration = enabled;
        self
    }

    pub fn deadlock_is_bug(mut self, enabled: bool) -> Self {
        self.deadlock_is_bug = enabled;
        self
    }

    /// Parses a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let mut config: Configuration = serde_json::from_str(json)?;
        if config.strategy.is_operation_aware() {
            config.bound_operations = true;
        }
        config.validate()?;
        Ok(config)
    }

    /// Rejects inconsistent settings.
    pub fn validate(&self) -> Result<(), Error> {
        if self.iterations == 0 {
            return Err(Error::InvalidConfiguration("iterations must be positive".to_string()));
        }
        match self.strategy {
            StrategyKind::Iddfs if self.depth_bound == 0 => Err(Error::InvalidConfiguration(
                "iddfs needs a positive depth bound as its maximum depth".to_string(),
            )),
            StrategyKind::MaceMc if self.depth_bound == 0 || self.safety_prefix_bound == 0 => {
                Err(Error::InvalidConfiguration(
                    "macemc needs a positive depth bound and safety prefix bound".to_string(),
                ))
            }
            StrategyKind::MaceMc if self.safety_prefix_bound >= self.depth_bound => Err(
                Error::InvalidConfiguration("safety prefix bound must be below the depth bound".to_string()),
            ),
            StrategyKind::Pct { bug_depth: 0 } | StrategyKind::PrioritizedOperationBounding { bug_depth: 0 } => {
                Err(Error::InvalidStrategyParameter {
                    strategy: self.strategy.to_string(),
                    reason: "bug depth must be positive".to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Instantiates the configured strategy with the given seed.
    pub fn build_strategy(&self, seed: u64) -> Box<dyn SchedulingStrategy> {
        let depth_bound = self.depth_bound;
        match self.strategy {
            StrategyKind::Random => Box::new(RandomStrategy::new(seed, depth_bound)),
            StrategyKind::Dfs => Box::new(DfsStrategy::new(depth_bound)),
            StrategyKind::Iddfs => Box::new(IddfsStrategy::new(depth_bound)),
            StrategyKind::Pct { bug_depth } => Box::new(PctStrategy::new(seed, depth_bound, bug_depth)),
            StrategyKind::DelayBounding { max_delays } => {
                Box::new(DelayBoundingStrategy::new(depth_bound, max_delays))
            }
            StrategyKind::RandomDelayBounding { max_delays } => {
                Box::new(RandomDelayBoundingStrategy::new(seed, depth_bound, max_delays))
            }
            StrategyKind::RandomOperationBounding { max_switches } => Box::new(
                RandomOperationBoundingStrategy::new(seed, depth_bound, max_switches),
            ),
            StrategyKind::PrioritizedOperationBounding { bug_depth } => Box::new(
                PrioritizedOperationBoundingStrategy::new(seed, depth_bound, bug_depth),
            ),
            StrategyKind::MaceMc => {
                Box::new(MaceMcStrategy::new(seed, depth_bound, self.safety_prefix_bound))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_strategy_names() {
        assert_eq!("random".parse::<StrategyKind>().unwrap(), StrategyKind::Random);
        assert_eq!("DFS".parse::<StrategyKind>().unwrap(), StrategyKind::Dfs);
        assert_eq!("pct:5".parse::<StrategyKind>().unwrap(), StrategyKind::Pct { bug_depth: 5 });
        assert_eq!("pct".parse::<StrategyKind>().unwrap(), StrategyKind::Pct { bug_depth: 2 });
        assert_eq!(
            "rob:3".parse::<StrategyKind>().unwrap(),
            StrategyKind::RandomOperationBounding { max_switches: 3 }
        );
        assert!(matches!("bogus".parse::<StrategyKind>(), Err(Error::UnknownStrategy(_))));
        assert!(matches!(
            "pct:x".parse::<StrategyKind>(),
            Err(Error::InvalidStrategyParameter { .. })
        ));
        assert!(matches!(
            "dfs:1".parse::<StrategyKind>(),
            Err(Error::InvalidStrategyParameter { .. })
        ));
    }

    #[test]
    fn names_round_trip_through_display() {
        for kind in [
            StrategyKind::Iddfs,
            StrategyKind::MaceMc,
            StrategyKind::DelayBounding { max_delays: 1 },
            StrategyKind::RandomDelayBounding { max_delays: 4 },
            StrategyKind::PrioritizedOperationBounding { bug_depth: 3 },
        ] {
            assert_eq!(kind.to_string().parse::<StrategyKind>().unwrap(), kind);
        }
    }

    #[test]
    fn loads_json_with_defaults() {
        let config = Configuration::from_json(r#"{"iterations": 50, "strategy": "pct:3", "seed": 7}"#).unwrap();
        assert_eq!(config.iterations, 50);
        assert_eq!(config.strategy, StrategyKind::Pct { bug_depth: 3 });
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.depth_bound, Configuration::default().depth_bound);
        assert!(config.deadlock_is_bug);

        assert!(matches!(
            Configuration::from_json(r#"{"strategy": "nope"}"#),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn rejects_inconsistent_settings() {
        assert!(Configuration::new().iterations(0).validate().is_err());
        assert!(Configuration::new().strategy(StrategyKind::Iddfs).depth_bound(0).validate().is_err());
        assert!(Configuration::new().strategy(StrategyKind::MaceMc).validate().is_err());
        assert!(Configuration::new()
            .strategy(StrategyKind::MaceMc)
            .safety_prefix_bound(10)
            .depth_bound(100)
            .validate()
            .is_ok());
        assert!(Configuration::new()
            .strategy(StrategyKind::Pct { bug_depth: 0 })
            .validate()
            .is_err());
    }

    #[test]
    fn operation_aware_strategies_bound_operations() {
        assert!(!Configuration::new().strategy(StrategyKind::Pct { bug_depth: 2 }).bound_operations);
        assert!(Configuration::new()
            .strategy(StrategyKind::RandomOperationBounding { max_switches: 2 })
            .bound_operations);
        assert!(Configuration::new()
            .strategy(StrategyKind::PrioritizedOperationBounding { bug_depth: 2 })
            .bound_operations);

        let config = Configuration::from_json(r#"{"strategy": "pob:2"}"#).unwrap();
        assert!(config.bound_operations);
        let config = Configuration::from_json(r#"{"strategy": "random"}"#).unwrap();
        assert!(!config.bound_operations);
    }

    #[test]
    fn liveness_enables_caching() {
        let config = Configuration::new().check_liveness(true);
        assert!(config.cache_program_state);
    }

    #[test]
    fn builds_described_strategies() {
        let config = Configuration::new().strategy(StrategyKind::Pct { bug_depth: 3 }).depth_bound(50);
        let strategy = config.build_strategy(9);
        assert_eq!(strategy.depth_bound(), 50);
        assert!(strategy.description().starts_with("PCT[seed=9"));
    }
}
