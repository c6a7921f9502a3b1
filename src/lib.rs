//! A council of networked nodes electing one president with single-decree Paxos.
//!
//! Every [`Node`] plays one Paxos role and talks to the others over TCP. What a node does with the messages it
//! sends and receives is decided by its [`DeliveryBehavior`], which is how slow, lossy or absent council members
//! are simulated. An [`ElectionDriver`] starts the election and stops the council once a learner knows the
//! president.

#[cfg(test)]
#[macro_use]
extern crate serial_test;

pub mod behavior;
pub mod election;
pub mod error;
pub mod node;
pub mod topology;
pub mod transport;
mod util;

pub use behavior::{BehaviorConfig, BehaviorRegistry, ConfiguredBehavior, Delivery, DeliveryBehavior};
pub use election::{ElectionConfig, ElectionDriver};
pub use error::{CouncilError, Result};
pub use node::{Node, NodeConfig, NodeState};
pub use topology::{load_topology, parse_topology, setup_nodes, Topology};
pub use util::CancellationToken;
