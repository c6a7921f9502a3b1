//! Learning the outcome of the election.

use std::collections::{HashMap, HashSet};

use log::info;

use crate::host::{Host, Role};
use crate::message::*;

/// The learner role of a council member.
///
/// A learner counts the ACCEPTED messages it receives from acceptors, per proposal. The first proposal accepted by a
/// majority of distinct acceptors decides the president and every later one is ignored. An ACCEPTED sent by another
/// learner reports a value that learner already knows to be chosen, so it is learned as is.
///
/// Learners of [`Role::Learner`] hosts gossip what they learned to the whole council. A learner embedded in another
/// role only learns.
#[derive(Debug)]
pub struct Learner {
    host: Host,
    quorum: usize,
    acceptances: HashMap<(ProposalNumber, String), HashSet<Host>>,
    learned_value: Option<String>,
}

impl Learner {
    /// Constructs a learner for `host` in a council of `acceptor_count` acceptors.
    pub fn new(host: Host, acceptor_count: usize) -> Self {
        Learner {
            host,
            quorum: majority(acceptor_count),
            acceptances: HashMap::new(),
            learned_value: None,
        }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    /// The number of acceptors that must accept one proposal before it is learned.
    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn has_learned(&self) -> bool {
        self.learned_value.is_some()
    }

    pub fn learned_value(&self) -> Option<&str> {
        self.learned_value.as_deref()
    }

    /// The number of distinct acceptors known to have accepted `value` under `number`.
    pub fn acceptance_count(&self, number: ProposalNumber, value: &str) -> usize {
        self.acceptances
            .get(&(number, value.to_string()))
            .map_or(0, HashSet::len)
    }

    /// Records an ACCEPTED, returning the ACCEPTED to gossip to the whole council when it decided the election.
    ///
    /// Returns `None` while no proposal has a majority, once a value has been learned, and always for learners
    /// embedded in other roles.
    #[must_use = "This function returns a Paxos message to be sent."]
    pub fn handle_accepted(&mut self, message: &Message) -> Option<SendableMessage> {
        if let Some(learned) = &self.learned_value {
            verbose!(
                self.host,
                "already learned {}, ignoring {} from {}",
                learned,
                message.proposed_value,
                message.sender_id()
            );
            return None;
        }

        let sender = message.sender.as_ref()?;
        match sender.role() {
            Role::Learner => {}
            Role::Acceptor => {
                let acceptors = self
                    .acceptances
                    .entry((message.proposal_number, message.proposed_value.clone()))
                    .or_default();
                acceptors.insert(sender.clone());

                if acceptors.len() < self.quorum {
                    verbose!(
                        self.host,
                        "{} of {} acceptances for {} under proposal {}",
                        acceptors.len(),
                        self.quorum,
                        message.proposed_value,
                        message.proposal_number
                    );
                    return None;
                }
            }
            Role::Proposer => {
                verbose!(self.host, "ignoring ACCEPTED from proposer {}", sender);
                return None;
            }
        }

        info!(
            "{} learned {} as president from {} under proposal {}",
            self.host.id(),
            message.proposed_value,
            message.sender_id(),
            message.proposal_number
        );
        self.learned_value = Some(message.proposed_value.clone());
        self.acceptances.clear();

        if !self.host.is(Role::Learner) {
            return None;
        }

        Some(SendableMessage {
            message: Message::accepted(
                message.proposal_number,
                message.proposed_value.as_str(),
                &self.host,
            ),
            dest: MessageDestination::Everyone,
        })
    }

    pub fn reset(&mut self) {
        self.acceptances.clear();
        self.learned_value = None;
    }
}
