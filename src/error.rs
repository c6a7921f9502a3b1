use std::{
    fmt::{Display, Formatter},
    io,
};

use paxos::host::ParseRoleError;
use paxos::message::MessageError;
use rayon::ThreadPoolBuildError;

pub type Result<T> = std::result::Result<T, CouncilError>;

#[derive(Debug)]
pub enum CouncilError {
    Io(io::Error),
    // Bytes read from a peer are not a valid message
    Decode(MessageError),
    // Could not listen on the member's address
    Bind { address: String, source: io::Error },
    // No behaviour is registered under this profile name
    UnknownProfile(String),
    // A topology line could not be turned into a host
    Topology(String),
    ThreadPool(ThreadPoolBuildError),
    NoProposers,
    NoAcceptors,
    ElectionTimedOut,
}

impl Display for CouncilError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "{}", err),
            Self::Decode(err) => write!(f, "{}", err),
            Self::Bind { address, source } => {
                write!(f, "could not listen on {}: {}", address, source)
            }
            Self::UnknownProfile(name) => write!(f, "unknown behaviour profile {}", name),
            Self::Topology(reason) => write!(f, "invalid topology: {}", reason),
            Self::ThreadPool(err) => write!(f, "{}", err),
            Self::NoProposers => write!(f, "the council has no proposer to start an election"),
            Self::NoAcceptors => write!(f, "the council has no acceptor to vote"),
            Self::ElectionTimedOut => write!(f, "no president was elected before the timeout"),
        }
    }
}

impl std::error::Error for CouncilError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Decode(err) => Some(err),
            Self::Bind { source, .. } => Some(source),
            Self::ThreadPool(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for CouncilError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<MessageError> for CouncilError {
    fn from(err: MessageError) -> Self {
        Self::Decode(err)
    }
}

impl From<ParseRoleError> for CouncilError {
    fn from(err: ParseRoleError) -> Self {
        Self::Topology(err.to_string())
    }
}

impl From<ThreadPoolBuildError> for CouncilError {
    fn from(err: ThreadPoolBuildError) -> Self {
        Self::ThreadPool(err)
    }
}
