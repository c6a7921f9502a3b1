//! Phase 1a and 2a: nominating a candidate and asking the acceptors to accept it.

use std::collections::HashSet;

use log::{debug, info};

use crate::host::Host;
use crate::message::*;

/// The proposer role of a council member.
///
/// A proposer nominates its own host id as president. A round starts with [`prepare`]; once a majority of acceptors
/// promised the round, [`handle_promise`] returns the PROPOSE message for it. If any promising acceptor reported a
/// value it accepted earlier, the proposer proposes the one reported under the highest proposal number instead of
/// its own id.
///
/// [`prepare`]: Self::prepare
/// [`handle_promise`]: Self::handle_promise
#[derive(Debug)]
pub struct Proposer {
    host: Host,
    quorum: usize,
    initial_number: ProposalNumber,
    proposal_number: ProposalNumber,
    proposal_value: Option<String>,

    // state of the current round
    promises: HashSet<Host>,
    highest_promised_id: ProposalNumber,
    adopted_value: Option<String>,
}

impl Proposer {
    /// Constructs a proposer for `host` in a council of `acceptor_count` acceptors.
    pub fn new(host: Host, acceptor_count: usize) -> Self {
        Proposer {
            host,
            quorum: majority(acceptor_count),
            initial_number: 0,
            proposal_number: 0,
            proposal_value: None,
            promises: HashSet::new(),
            highest_promised_id: NO_PROPOSAL,
            adopted_value: None,
        }
    }

    /// Starts numbering after `number` instead of 0, so that the first round uses `number + 1`.
    ///
    /// Proposers with distinct starting points never collide on their first round.
    pub fn starting_after(mut self, number: ProposalNumber) -> Self {
        self.initial_number = number;
        self.proposal_number = number;
        self
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    /// The number of promises needed before proposing.
    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn proposal_number(&self) -> ProposalNumber {
        self.proposal_number
    }

    pub fn proposal_value(&self) -> Option<&str> {
        self.proposal_value.as_deref()
    }

    pub fn adopted_value(&self) -> Option<&str> {
        self.adopted_value.as_deref()
    }

    pub fn promise_count(&self) -> usize {
        self.promises.len()
    }

    /// Starts a new round under a number greater than any this proposer used before, returning the PREPARE to
    /// broadcast to the acceptors.
    #[must_use = "This function returns a Paxos message to be sent."]
    pub fn prepare(&mut self) -> SendableMessage {
        self.proposal_number += 1;
        self.proposal_value = Some(self.host.id().to_string());
        self.promises.clear();
        self.highest_promised_id = NO_PROPOSAL;
        self.adopted_value = None;

        info!(
            "{} preparing proposal {} for {}",
            self.host.id(),
            self.proposal_number,
            self.host.id()
        );

        SendableMessage {
            message: Message::prepare(self.proposal_number, self.host.id(), &self.host),
            dest: MessageDestination::Acceptors,
        }
    }

    /// Returns the PROPOSE for the current round, carrying the adopted value if there is one.
    #[must_use = "This function returns a Paxos message to be sent."]
    pub fn propose(&self) -> SendableMessage {
        let value = self
            .adopted_value
            .as_deref()
            .or_else(|| self.proposal_value.as_deref())
            .unwrap_or_else(|| self.host.id());

        info!(
            "{} proposing {} under proposal {}",
            self.host.id(),
            value,
            self.proposal_number
        );

        SendableMessage {
            message: Message::propose(self.proposal_number, value, &self.host),
            dest: MessageDestination::Acceptors,
        }
    }

    /// Records a promise, returning the PROPOSE once the promise that completes the majority arrives.
    ///
    /// Each acceptor is counted once per round, and promises for any other round are ignored, so the PROPOSE is
    /// returned at most once per round.
    #[must_use = "This function returns a Paxos message to be sent."]
    pub fn handle_promise(&mut self, message: &Message) -> Option<SendableMessage> {
        let sender = message.sender.as_ref()?;

        if message.proposal_number != self.proposal_number {
            verbose!(
                self.host,
                "ignoring promise for {} from {}, current proposal is {}",
                message.proposal_number,
                sender,
                self.proposal_number
            );
            return None;
        }

        if !self.promises.insert(sender.clone()) {
            verbose!(self.host, "duplicate promise from {}", sender);
            return None;
        }

        if let Some(accepted_id) = message.accepted_proposal_number {
            if accepted_id > self.highest_promised_id {
                debug!(
                    "{} adopting {} accepted by {} under proposal {}",
                    self.host.id(),
                    message.proposed_value,
                    sender.id(),
                    accepted_id
                );
                self.highest_promised_id = accepted_id;
                self.adopted_value = Some(message.proposed_value.clone());
            }
        }

        verbose!(
            self.host,
            "{}/{} promises for proposal {}",
            self.promises.len(),
            self.quorum,
            self.proposal_number
        );

        if self.promises.len() == self.quorum {
            Some(self.propose())
        } else {
            None
        }
    }

    /// Moves numbering past the highest proposal number reported by a NACK.
    ///
    /// Returns `true` when the NACK reported a number at least as high as the current one; the current round is
    /// then abandoned and the caller should [`prepare`](Self::prepare) again.
    pub fn handle_nack(&mut self, message: &Message) -> bool {
        match message.highest_seen_proposal_number {
            Some(highest_seen) if highest_seen >= self.proposal_number => {
                info!(
                    "{} rejected by {}: proposal {} is behind {}",
                    self.host.id(),
                    message.sender_id(),
                    self.proposal_number,
                    highest_seen
                );
                self.proposal_number = highest_seen + 1;
                self.promises.clear();
                self.highest_promised_id = NO_PROPOSAL;
                self.adopted_value = None;
                true
            }
            _ => false,
        }
    }

    pub fn reset(&mut self) {
        self.proposal_number = self.initial_number;
        self.proposal_value = None;
        self.promises.clear();
        self.highest_promised_id = NO_PROPOSAL;
        self.adopted_value = None;
    }
}
