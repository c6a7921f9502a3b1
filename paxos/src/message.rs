//! Paxos message types for sending between council members.
//!
//! The top-level message type is [`Message`]. Messages are serialized with protobuf through the `prost` crate; the
//! exact byte layout is not meant to be read by anything but another node built from this crate.

use core::fmt;

use bytes::{Buf, Bytes};
use prost::Message as _;

use crate::host::{Host, HostList};

/// The number identifying a proposal round. Higher numbers win.
pub type ProposalNumber = i64;

/// The number an acceptor has seen before it ever promised or accepted anything.
pub const NO_PROPOSAL: ProposalNumber = -1;

/// Returns the smallest number of acceptors forming a majority out of `acceptor_count`.
pub fn majority(acceptor_count: usize) -> usize {
    acceptor_count / 2 + 1
}

/// The kind of a [`Message`], one per step of the protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MessageType {
    /// Phase 1a, proposer to acceptors.
    Prepare = 0,
    /// Phase 1b, acceptor to proposer.
    Promise = 1,
    /// Phase 2a, proposer to acceptors.
    Propose = 2,
    /// Phase 2b, acceptor to proposer and learners. Learners gossip it to everyone.
    Accepted = 3,
    /// Rejection carrying the highest proposal number the rejecting node has seen.
    Nack = 4,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Prepare => "PREPARE",
            MessageType::Promise => "PROMISE",
            MessageType::Propose => "PROPOSE",
            MessageType::Accepted => "ACCEPTED",
            MessageType::Nack => "NACK",
        };
        f.write_str(name)
    }
}

/// A message sent between council members.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Message {
    #[prost(enumeration = "MessageType", tag = "1")]
    pub kind: i32,

    /// The proposal round this message belongs to.
    #[prost(int64, tag = "2")]
    pub proposal_number: ProposalNumber,

    /// The candidate being voted on.
    #[prost(string, tag = "3")]
    pub proposed_value: String,

    /// The member that sent this message.
    ///
    /// This field is only optional in order to support protobuf serialization; [`Message::from_bytes`] rejects
    /// messages without a sender.
    #[prost(message, optional, tag = "4")]
    pub sender: Option<Host>,

    /// The highest proposal number the sender has seen. Only set on [`MessageType::Nack`].
    #[prost(int64, optional, tag = "5")]
    pub highest_seen_proposal_number: Option<ProposalNumber>,

    /// On a [`MessageType::Promise`], the number of the proposal the acceptor accepted earlier, if any. The
    /// message's value is then that earlier accepted value.
    #[prost(int64, optional, tag = "6")]
    pub accepted_proposal_number: Option<ProposalNumber>,
}

/// An error returned when bytes read from a peer are not a valid [`Message`].
#[derive(Debug)]
pub enum MessageError {
    Decode(prost::DecodeError),
    UnknownType(i32),
    MissingSender,
    InvalidSender(String),
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(err) => write!(f, "malformed message: {}", err),
            Self::UnknownType(kind) => write!(f, "unknown message type {}", kind),
            Self::MissingSender => write!(f, "message has no sender"),
            Self::InvalidSender(reason) => write!(f, "invalid sender: {}", reason),
        }
    }
}

impl std::error::Error for MessageError {}

impl From<prost::DecodeError> for MessageError {
    fn from(err: prost::DecodeError) -> Self {
        Self::Decode(err)
    }
}

impl Message {
    pub fn new<V: Into<String>>(
        kind: MessageType,
        proposal_number: ProposalNumber,
        proposed_value: V,
        sender: &Host,
    ) -> Self {
        Message {
            kind: kind as i32,
            proposal_number,
            proposed_value: proposed_value.into(),
            sender: Some(sender.clone()),
            highest_seen_proposal_number: None,
            accepted_proposal_number: None,
        }
    }

    pub fn prepare<V: Into<String>>(number: ProposalNumber, value: V, sender: &Host) -> Self {
        Self::new(MessageType::Prepare, number, value, sender)
    }

    pub fn promise<V: Into<String>>(number: ProposalNumber, value: V, sender: &Host) -> Self {
        Self::new(MessageType::Promise, number, value, sender)
    }

    pub fn propose<V: Into<String>>(number: ProposalNumber, value: V, sender: &Host) -> Self {
        Self::new(MessageType::Propose, number, value, sender)
    }

    pub fn accepted<V: Into<String>>(number: ProposalNumber, value: V, sender: &Host) -> Self {
        Self::new(MessageType::Accepted, number, value, sender)
    }

    /// A rejection of proposal `number`, telling the sender that `highest_seen` has already been seen.
    pub fn nack<V: Into<String>>(
        number: ProposalNumber,
        value: V,
        highest_seen: ProposalNumber,
        sender: &Host,
    ) -> Self {
        let mut message = Self::new(MessageType::Nack, number, value, sender);
        message.highest_seen_proposal_number = Some(highest_seen);
        message
    }

    /// Marks a promise as carrying a value accepted earlier under proposal `number`.
    pub fn with_accepted_proposal(mut self, number: ProposalNumber) -> Self {
        self.accepted_proposal_number = Some(number);
        self
    }

    pub fn sender_id(&self) -> &str {
        self.sender.as_ref().map(Host::id).unwrap_or("?")
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = Vec::with_capacity(self.encoded_len());
        // a Vec grows as needed, so encoding cannot run out of capacity
        let _ = self.encode(&mut buf);
        Bytes::from(buf)
    }

    pub fn from_bytes<B: Buf>(buf: B) -> Result<Self, MessageError> {
        let message = Message::decode(buf)?;

        if !MessageType::is_valid(message.kind) {
            return Err(MessageError::UnknownType(message.kind));
        }

        match &message.sender {
            None => return Err(MessageError::MissingSender),
            Some(sender) => sender.validate().map_err(MessageError::InvalidSender)?,
        }

        Ok(message)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message{{type={}, proposalNumber={}, proposedValue={}, senderId={}}}",
            self.kind(),
            self.proposal_number,
            self.proposed_value,
            self.sender_id()
        )
    }
}

/// A [`Message`] to be sent to a destination.
#[derive(Debug, Clone, PartialEq)]
pub struct SendableMessage {
    /// The message to be sent.
    pub message: Message,

    /// The destination for the message.
    pub dest: MessageDestination,
}

/// The destination for a [`SendableMessage`].
#[derive(Debug, Clone, PartialEq)]
pub enum MessageDestination {
    /// The associated message should be sent to one particular member.
    To(Host),
    /// The associated message should be sent to every acceptor.
    Acceptors,
    /// The associated message should be sent to every learner.
    Learners,
    /// The associated message should be sent to every member of the council.
    Everyone,
}

impl MessageDestination {
    /// Returns the hosts of `hosts` this destination designates, in declaration order.
    pub fn resolve<'a>(&'a self, hosts: &'a HostList) -> Vec<&'a Host> {
        match self {
            MessageDestination::To(host) => vec![host],
            MessageDestination::Acceptors => hosts.acceptors().collect(),
            MessageDestination::Learners => hosts.learners().collect(),
            MessageDestination::Everyone => hosts.hosts().iter().collect(),
        }
    }
}
