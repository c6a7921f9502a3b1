//! Fault injection on the edges of a node.
//!
//! Every message a node sends or receives goes through its [`DeliveryBehavior`] first. The behaviour decides
//! whether the message goes through right away, after a delay, or not at all. Council members are told apart by
//! the behaviour profile they run with, and profiles are looked up by name in a [`BehaviorRegistry`].

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use paxos::prelude::*;

use crate::error::{CouncilError, Result};

/// What to do with a message crossing the edge of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Proceed,
    Defer(Duration),
    Drop,
}

pub trait DeliveryBehavior: Send {
    fn on_send(&mut self, message: &Message, target: &Host) -> Delivery;

    /// A [`Delivery::Drop`] makes the node ignore the message entirely.
    fn on_receive(&mut self, message: &Message) -> Delivery;
}

/// Parameters of a [`ConfiguredBehavior`]. Delays are ranges of milliseconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BehaviorConfig {
    pub drop_probability: f64,
    pub send_delay: Option<Range<u64>>,
    pub receive_delay: Option<Range<u64>>,
    pub unavailable: bool,
}

impl BehaviorConfig {
    /// Delivers everything immediately.
    pub fn instant() -> Self {
        BehaviorConfig::default()
    }

    pub fn with_drop_probability(mut self, drop_probability: f64) -> Self {
        self.drop_probability = drop_probability.max(0.0).min(1.0);
        self
    }

    pub fn with_send_delay(mut self, millis: Range<u64>) -> Self {
        self.send_delay = Some(millis);
        self
    }

    pub fn with_receive_delay(mut self, millis: Range<u64>) -> Self {
        self.receive_delay = Some(millis);
        self
    }

    pub fn with_delay(self, millis: Range<u64>) -> Self {
        self.with_send_delay(millis.clone()).with_receive_delay(millis)
    }

    /// Neither sends nor receives anything.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }
}

/// A [`DeliveryBehavior`] driven by a [`BehaviorConfig`].
///
/// Sends are dropped with the configured probability; receives are never dropped unless the member is
/// unavailable.
pub struct ConfiguredBehavior {
    config: BehaviorConfig,
    random: StdRng,
}

impl ConfiguredBehavior {
    pub fn new(config: BehaviorConfig) -> Self {
        ConfiguredBehavior {
            config,
            random: StdRng::from_entropy(),
        }
    }

    /// A behaviour whose random choices are reproducible.
    pub fn with_seed(config: BehaviorConfig, seed: u64) -> Self {
        ConfiguredBehavior {
            config,
            random: StdRng::seed_from_u64(seed),
        }
    }

    pub fn config(&self) -> &BehaviorConfig {
        &self.config
    }

    fn delay(&mut self, millis: Option<Range<u64>>) -> Delivery {
        match millis {
            Some(millis) if !millis.is_empty() => {
                Delivery::Defer(Duration::from_millis(self.random.gen_range(millis)))
            }
            _ => Delivery::Proceed,
        }
    }
}

impl fmt::Debug for ConfiguredBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfiguredBehavior")
            .field("config", &self.config)
            .finish()
    }
}

impl DeliveryBehavior for ConfiguredBehavior {
    fn on_send(&mut self, _message: &Message, _target: &Host) -> Delivery {
        if self.config.unavailable {
            return Delivery::Drop;
        }

        if self.config.drop_probability > 0.0 && self.random.gen_bool(self.config.drop_probability) {
            return Delivery::Drop;
        }

        self.delay(self.config.send_delay.clone())
    }

    fn on_receive(&mut self, _message: &Message) -> Delivery {
        if self.config.unavailable {
            return Delivery::Drop;
        }

        self.delay(self.config.receive_delay.clone())
    }
}

type BehaviorFactory = Box<dyn Fn() -> Box<dyn DeliveryBehavior> + Send + Sync>;

/// Behaviour constructors by profile name. Names are case-insensitive.
pub struct BehaviorRegistry {
    factories: HashMap<String, BehaviorFactory>,
}

/// The profile used by hosts that do not name one.
pub const DEFAULT_PROFILE: &str = "M1";

impl BehaviorRegistry {
    pub fn new() -> Self {
        BehaviorRegistry {
            factories: HashMap::new(),
        }
    }

    /// The council's usual members:
    /// - `M1` (`instant`) answers immediately;
    /// - `M2` (`lagging`) answers after one to six seconds;
    /// - `M3` (`lossy`) loses one message out of ten, and `camping` loses all of them;
    /// - `M4_9` (`busy`) answers within five seconds.
    pub fn with_defaults() -> Self {
        let mut registry = BehaviorRegistry::new();

        let instant = BehaviorConfig::instant();
        let lagging = BehaviorConfig::instant().with_delay(1_000..6_000);
        let lossy = BehaviorConfig::instant().with_drop_probability(0.1);
        let camping = BehaviorConfig::instant().unavailable();
        let busy = BehaviorConfig::instant().with_delay(0..5_000);

        for (names, config) in vec![
            (["M1", "instant"], instant),
            (["M2", "lagging"], lagging),
            (["M3", "lossy"], lossy),
            (["M3_camping", "camping"], camping),
            (["M4_9", "busy"], busy),
        ] {
            for name in names.iter() {
                registry.register_config(*name, config.clone());
            }
        }

        registry
    }

    pub fn register<N, F>(&mut self, name: N, factory: F)
    where
        N: AsRef<str>,
        F: Fn() -> Box<dyn DeliveryBehavior> + Send + Sync + 'static,
    {
        self.factories
            .insert(name.as_ref().to_ascii_lowercase(), Box::new(factory));
    }

    pub fn register_config<N: AsRef<str>>(&mut self, name: N, config: BehaviorConfig) {
        self.register(name, move || {
            Box::new(ConfiguredBehavior::new(config.clone())) as Box<dyn DeliveryBehavior>
        });
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&name.to_ascii_lowercase())
    }

    pub fn resolve(&self, name: &str) -> Result<Box<dyn DeliveryBehavior>> {
        match self.factories.get(&name.to_ascii_lowercase()) {
            Some(factory) => Ok(factory()),
            None => Err(CouncilError::UnknownProfile(name.to_string())),
        }
    }

    /// Resolves the profile `host` is tagged with, or [`DEFAULT_PROFILE`] when it has none.
    pub fn resolve_for(&self, host: &Host) -> Result<Box<dyn DeliveryBehavior>> {
        self.resolve(host.behavior_profile().unwrap_or(DEFAULT_PROFILE))
    }
}

impl Default for BehaviorRegistry {
    fn default() -> Self {
        BehaviorRegistry::with_defaults()
    }
}
