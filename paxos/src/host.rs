//! Council members and the roles they play.

use core::convert::TryFrom;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::iter::FromIterator;
use core::str::FromStr;

/// The Paxos role a council member plays for the whole election.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Role {
    Proposer = 0,
    Acceptor = 1,
    Learner = 2,
}

/// An error returned when a role name is not one of `proposer`, `acceptor` or `learner`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseRoleError(pub String);

impl fmt::Display for ParseRoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown paxos role `{}`", self.0)
    }
}

impl std::error::Error for ParseRoleError {}

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "proposer" => Ok(Role::Proposer),
            "acceptor" => Ok(Role::Acceptor),
            "learner" => Ok(Role::Learner),
            _ => Err(ParseRoleError(s.to_string())),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Proposer => "PROPOSER",
            Role::Acceptor => "ACCEPTOR",
            Role::Learner => "LEARNER",
        };
        f.write_str(name)
    }
}

/// A council member reachable at `address:port`.
///
/// Two hosts are the same member when they share an address and a port; the id, role and behaviour profile are
/// descriptive only. This makes `Host` usable as a set key when de-duplicating promises.
#[derive(Clone, prost::Message)]
pub struct Host {
    #[prost(string, tag = "1")]
    address: String,

    #[prost(uint32, tag = "2")]
    port: u32,

    #[prost(string, tag = "3")]
    id: String,

    #[prost(enumeration = "Role", tag = "4")]
    role: i32,

    /// Name of the delivery behaviour the member runs with, e.g. `M2`.
    #[prost(string, optional, tag = "5")]
    profile: Option<String>,
}

impl Host {
    pub fn new<A: Into<String>, I: Into<String>>(address: A, port: u16, id: I, role: Role) -> Self {
        Host {
            address: address.into(),
            port: u32::from(port),
            id: id.into(),
            role: role as i32,
            profile: None,
        }
    }

    /// Tags the host with the behaviour profile it should be run with.
    pub fn with_profile<P: Into<String>>(mut self, profile: P) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        // hosts built here take a u16 and decoded hosts are checked by `validate`
        u16::try_from(self.port).unwrap_or_default()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn behavior_profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }

    pub fn is(&self, role: Role) -> bool {
        self.role() == role
    }

    /// Checks the fields a decoded host may carry out of range.
    pub(crate) fn validate(&self) -> Result<(), String> {
        if u16::try_from(self.port).is_err() {
            return Err(format!("{} has port {} out of range", self.id, self.port));
        }
        if !Role::is_valid(self.role) {
            return Err(format!("{} has unknown role {}", self.id, self.role));
        }
        Ok(())
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.port == other.port && self.address == other.address
    }
}

impl Eq for Host {}

impl Hash for Host {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.id, self.address, self.port)
    }
}

/// Every member of the council, in declaration order.
///
/// Built once when the council is set up and then shared read-only between all nodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostList {
    hosts: Vec<Host>,
}

impl HostList {
    pub fn new() -> Self {
        HostList { hosts: Vec::new() }
    }

    pub fn push(&mut self, host: Host) {
        self.hosts.push(host);
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn with_role(&self, role: Role) -> impl Iterator<Item = &Host> + '_ {
        self.hosts.iter().filter(move |host| host.is(role))
    }

    pub fn proposers(&self) -> impl Iterator<Item = &Host> + '_ {
        self.with_role(Role::Proposer)
    }

    pub fn acceptors(&self) -> impl Iterator<Item = &Host> + '_ {
        self.with_role(Role::Acceptor)
    }

    pub fn learners(&self) -> impl Iterator<Item = &Host> + '_ {
        self.with_role(Role::Learner)
    }

    pub fn acceptor_count(&self) -> usize {
        self.acceptors().count()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

impl From<Vec<Host>> for HostList {
    fn from(hosts: Vec<Host>) -> Self {
        HostList { hosts }
    }
}

impl FromIterator<Host> for HostList {
    fn from_iter<T: IntoIterator<Item = Host>>(iter: T) -> Self {
        HostList {
            hosts: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use crate::message::{Message, MessageError};

    use super::*;

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("proposer".parse(), Ok(Role::Proposer));
        assert_eq!("ACCEPTOR".parse(), Ok(Role::Acceptor));
        assert_eq!(" Learner ".parse(), Ok(Role::Learner));
        assert!("president".parse::<Role>().is_err());
    }

    #[test]
    fn hosts_are_identified_by_address_and_port() {
        let a = Host::new("127.0.0.1", 4570, "M1", Role::Proposer);
        let same_socket = Host::new("127.0.0.1", 4570, "M9", Role::Learner).with_profile("M3");
        let other_port = Host::new("127.0.0.1", 4571, "M1", Role::Proposer);

        assert_eq!(a, same_socket);
        assert_ne!(a, other_port);

        let set: HashSet<Host> = vec![a, same_socket, other_port].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn host_list_views_filter_by_role() {
        let hosts: HostList = vec![
            Host::new("127.0.0.1", 1, "P", Role::Proposer),
            Host::new("127.0.0.1", 2, "A1", Role::Acceptor),
            Host::new("127.0.0.1", 3, "A2", Role::Acceptor),
            Host::new("127.0.0.1", 4, "L", Role::Learner),
        ]
        .into_iter()
        .collect();

        assert_eq!(hosts.len(), 4);
        assert_eq!(hosts.acceptor_count(), 2);
        assert_eq!(hosts.proposers().map(Host::id).collect::<Vec<_>>(), vec!["P"]);
        assert_eq!(hosts.learners().map(Host::id).collect::<Vec<_>>(), vec!["L"]);
    }

    #[test]
    fn sender_out_of_range_is_rejected_on_decode() {
        let wide_port = Host {
            port: 70_000,
            ..Host::new("127.0.0.1", 4570, "M1", Role::Proposer)
        };
        match Message::from_bytes(Message::prepare(1, "M1", &wide_port).to_bytes()) {
            Err(MessageError::InvalidSender(_)) => {}
            other => panic!("unexpected decode result: {:?}", other),
        }

        let unknown_role = Host {
            role: 9,
            ..Host::new("127.0.0.1", 4570, "M1", Role::Proposer)
        };
        match Message::from_bytes(Message::prepare(1, "M1", &unknown_role).to_bytes()) {
            Err(MessageError::InvalidSender(_)) => {}
            other => panic!("unexpected decode result: {:?}", other),
        }
    }
}
