//! Running one election over a set of started nodes and noticing when it is over.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{info, warn};

use paxos::prelude::*;

use crate::error::{CouncilError, Result};
use crate::node::Node;
use crate::util::lock_then_release;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// How often the learners are checked for a president.
    pub poll_interval: Duration,
    /// How long to wait for a president before giving up. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        ElectionConfig {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }
}

/// Starts an election and stops every node once a learner knows the president.
///
/// The driver polls the learners from its own thread. The first value a learner reports ends the election: every
/// node is stopped and [`wait_for_election_to_end`](Self::wait_for_election_to_end) returns.
pub struct ElectionDriver {
    nodes: Vec<Arc<Node>>,
    config: ElectionConfig,
    consensus: Arc<Mutex<Option<String>>>,
    concluded_sender: Mutex<Option<Sender<()>>>,
    concluded_receiver: Receiver<()>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl ElectionDriver {
    pub fn new(nodes: Vec<Arc<Node>>, config: ElectionConfig) -> Self {
        let (concluded_sender, concluded_receiver) = bounded(1);

        ElectionDriver {
            nodes,
            config,
            consensus: Arc::new(Mutex::new(None)),
            concluded_sender: Mutex::new(Some(concluded_sender)),
            concluded_receiver,
            poller: Mutex::new(None),
        }
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    fn with_role(&self, role: Role) -> Vec<&Arc<Node>> {
        self.nodes.iter().filter(|node| node.role() == role).collect()
    }

    /// Lets the first proposer start the election.
    pub fn run_election(&self) -> Result<()> {
        let proposers = self.check_council()?;

        info!("{} initiating the election", proposers[0].host().id());
        proposers[0].initiate_election();

        self.start_consensus_check()
    }

    /// Lets every proposer start a round at the same time.
    pub fn run_election_with_simultaneous_proposals(&self) -> Result<()> {
        let proposers = self.check_council()?;

        let thread_pool = match rayon::ThreadPoolBuilder::new()
            .thread_name(|index| format!("proposal {}", index))
            .num_threads(proposers.len())
            .build()
        {
            Ok(thread_pool) => thread_pool,
            Err(err) => {
                self.conclude_without_polling();
                return Err(err.into());
            }
        };

        info!(
            "starting an election with {} proposers voting simultaneously",
            proposers.len()
        );
        thread_pool.scope(|scope| {
            for proposer in &proposers {
                scope.spawn(move |_| proposer.initiate_election());
            }
        });

        self.start_consensus_check()
    }

    /// Blocks until the election is over, returning the president.
    pub fn wait_for_election_to_end(&self) -> Result<String> {
        // an error only means the gate was closed without being opened, which ends the wait as well
        let _ = self.concluded_receiver.recv();

        let poller = lock_then_release(&self.poller).take();
        if let Some(poller) = poller {
            let _ = poller.join();
        }

        self.consensus_value().ok_or(CouncilError::ElectionTimedOut)
    }

    pub fn consensus_value(&self) -> Option<String> {
        lock_then_release(&self.consensus).clone()
    }

    fn check_council(&self) -> Result<Vec<&Arc<Node>>> {
        let proposers = self.with_role(Role::Proposer);
        if proposers.is_empty() {
            warn!("no proposers available to run the election");
            self.conclude_without_polling();
            return Err(CouncilError::NoProposers);
        }

        if self.with_role(Role::Acceptor).is_empty() {
            warn!("no acceptors available to vote in the election");
            self.conclude_without_polling();
            return Err(CouncilError::NoAcceptors);
        }

        Ok(proposers)
    }

    fn conclude_without_polling(&self) {
        lock_then_release(&self.concluded_sender).take();
    }

    fn start_consensus_check(&self) -> Result<()> {
        let concluded = match lock_then_release(&self.concluded_sender).take() {
            Some(concluded) => concluded,
            // already polling, or concluded
            None => return Ok(()),
        };

        let nodes = self.nodes.clone();
        let consensus = self.consensus.clone();
        let config = self.config.clone();

        let handle = thread::Builder::new()
            .name("election poller".to_string())
            .spawn(move || {
                let started = Instant::now();

                loop {
                    let learned = nodes
                        .iter()
                        .filter(|node| node.role() == Role::Learner)
                        .find_map(|node| node.consensus_value());

                    if let Some(value) = learned {
                        info!("consensus achieved for value {}", value);
                        *lock_then_release(&consensus) = Some(value);
                        break;
                    }

                    if let Some(timeout) = config.timeout {
                        if started.elapsed() >= timeout {
                            warn!("no consensus reached after {:?}", timeout);
                            break;
                        }
                    }

                    thread::sleep(config.poll_interval);
                }

                info!("concluding election");
                for node in &nodes {
                    node.stop();
                }

                let _ = concluded.send(());
            })?;

        *lock_then_release(&self.poller) = Some(handle);
        Ok(())
    }
}
