//! Single-decree Paxos for electing one council president.
//!
//! The crate holds the three Paxos roles as plain state machines. None of them touch the network: every handler
//! returns the [`SendableMessage`]s it wants delivered, and the caller decides how (and whether) to deliver them.
//! A node that wants to take part in an election owns one [`Proposer`], one [`Acceptor`] and one [`Learner`] and
//! feeds inbound [`Message`]s to the role matching its [`Role`].
//!
//! [`Acceptor`]: crate::acceptor::Acceptor
//! [`Learner`]: crate::learner::Learner
//! [`Message`]: crate::message::Message
//! [`Proposer`]: crate::proposer::Proposer
//! [`Role`]: crate::host::Role
//! [`SendableMessage`]: crate::message::SendableMessage

#[macro_use]
mod macros;

pub mod acceptor;
pub mod host;
pub mod learner;
pub mod message;
pub mod proposer;

pub mod prelude {
    //! Re-exports of the types needed by most users of the crate.

    pub use crate::acceptor::{Acceptor, AcceptorConfig};
    pub use crate::host::{Host, HostList, ParseRoleError, Role};
    pub use crate::learner::Learner;
    pub use crate::message::{
        majority, Message, MessageDestination, MessageType, ProposalNumber, SendableMessage,
        NO_PROPOSAL,
    };
    pub use crate::proposer::Proposer;
}
