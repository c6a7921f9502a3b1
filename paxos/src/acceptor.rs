//! Phase 1b and 2b: promising and accepting proposals.

use log::info;

use crate::host::Host;
use crate::message::*;

/// Configurable policy of an [`Acceptor`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcceptorConfig {
    /// Answer stale PREPARE and PROPOSE messages with a NACK instead of ignoring them.
    ///
    /// A NACK lets the proposer jump straight past the highest number seen here instead of waiting to be retried.
    pub nack_stale_proposals: bool,
}

/// The acceptor role of a council member.
#[derive(Debug)]
pub struct Acceptor {
    host: Host,
    config: AcceptorConfig,

    // highest proposal number ever promised or accepted
    max_id_seen: ProposalNumber,
    accepted_id: ProposalNumber,
    accepted_value: Option<String>,
}

impl Acceptor {
    pub fn new(host: Host, config: AcceptorConfig) -> Self {
        Acceptor {
            host,
            config,
            max_id_seen: NO_PROPOSAL,
            accepted_id: NO_PROPOSAL,
            accepted_value: None,
        }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn max_id_seen(&self) -> ProposalNumber {
        self.max_id_seen
    }

    /// The last proposal accepted by this acceptor, with its number.
    pub fn accepted(&self) -> Option<(ProposalNumber, &str)> {
        self.accepted_value
            .as_deref()
            .map(|value| (self.accepted_id, value))
    }

    /// Promises a PREPARE numbered above anything seen so far, returning the PROMISE for its sender.
    ///
    /// When a value was accepted earlier the promise carries it along with its proposal number, otherwise it echoes
    /// the prepared value.
    #[must_use = "This function returns a Paxos message to be sent."]
    pub fn handle_prepare(&mut self, message: &Message) -> Option<SendableMessage> {
        let sender = message.sender.as_ref()?;
        let proposal_id = message.proposal_number;

        if proposal_id <= self.max_id_seen {
            verbose!(
                self.host,
                "stale prepare {} from {}, already seen {}",
                proposal_id,
                sender,
                self.max_id_seen
            );
            return self.reject(message, sender);
        }

        self.max_id_seen = proposal_id;
        info!(
            "{} promising proposal {} to {}",
            self.host.id(),
            proposal_id,
            sender.id()
        );

        let promise = match &self.accepted_value {
            Some(accepted_value) => Message::promise(proposal_id, accepted_value.as_str(), &self.host)
                .with_accepted_proposal(self.accepted_id),
            None => Message::promise(proposal_id, message.proposed_value.as_str(), &self.host),
        };

        Some(SendableMessage {
            message: promise,
            dest: MessageDestination::To(sender.clone()),
        })
    }

    /// Accepts a PROPOSE numbered at least as high as anything seen so far, returning the ACCEPTED for its sender
    /// and for every learner.
    #[must_use = "This function returns Paxos messages to be sent."]
    pub fn handle_propose(&mut self, message: &Message) -> Vec<SendableMessage> {
        let sender = match message.sender.as_ref() {
            Some(sender) => sender,
            None => return vec![],
        };
        let proposal_id = message.proposal_number;

        if proposal_id < self.max_id_seen {
            verbose!(
                self.host,
                "stale proposal {} from {}, already seen {}",
                proposal_id,
                sender,
                self.max_id_seen
            );
            return self.reject(message, sender).into_iter().collect();
        }

        self.max_id_seen = proposal_id;
        self.accepted_id = proposal_id;
        self.accepted_value = Some(message.proposed_value.clone());
        info!(
            "{} accepted {} under proposal {}",
            self.host.id(),
            message.proposed_value,
            proposal_id
        );

        let accepted = Message::accepted(proposal_id, message.proposed_value.as_str(), &self.host);
        vec![
            SendableMessage {
                message: accepted.clone(),
                dest: MessageDestination::To(sender.clone()),
            },
            SendableMessage {
                message: accepted,
                dest: MessageDestination::Learners,
            },
        ]
    }

    /// Raises the highest proposal number seen to the one carried by a NACK.
    pub fn handle_nack(&mut self, message: &Message) {
        let carried = message
            .highest_seen_proposal_number
            .unwrap_or(message.proposal_number);

        if carried > self.max_id_seen {
            verbose!(
                self.host,
                "raising highest seen proposal from {} to {}",
                self.max_id_seen,
                carried
            );
            self.max_id_seen = carried;
        }
    }

    /// Forgets every promise. The last accepted proposal is kept until the next acceptance overwrites it.
    pub fn reset(&mut self) {
        self.max_id_seen = NO_PROPOSAL;
    }

    fn reject(&self, message: &Message, sender: &Host) -> Option<SendableMessage> {
        if !self.config.nack_stale_proposals {
            return None;
        }

        Some(SendableMessage {
            message: Message::nack(
                message.proposal_number,
                message.proposed_value.as_str(),
                self.max_id_seen,
                &self.host,
            ),
            dest: MessageDestination::To(sender.clone()),
        })
    }
}
