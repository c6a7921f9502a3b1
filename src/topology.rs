//! Council layouts, one `address,port,profile,id,role` line per member.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use log::{info, warn};

use paxos::prelude::*;

use crate::behavior::{BehaviorRegistry, DEFAULT_PROFILE};
use crate::error::{CouncilError, Result};
use crate::node::{Node, NodeConfig};

/// Distance between the first proposal numbers of two proposers, so that their rounds never share a number.
pub const PROPOSAL_NUMBER_SPACING: ProposalNumber = 1_000;

pub const DEFAULT_PORT: u16 = 4570;

/// A line of a topology that did not describe a member.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedLine {
    pub line_number: usize,
    pub line: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Topology {
    pub hosts: HostList,
    pub skipped: Vec<SkippedLine>,
}

impl Topology {
    /// One proposer, one acceptor and one learner on localhost, all answering immediately.
    pub fn local() -> Self {
        let hosts = vec![
            (DEFAULT_PORT, "M1", Role::Proposer),
            (DEFAULT_PORT + 1, "M2", Role::Acceptor),
            (DEFAULT_PORT + 2, "M3", Role::Learner),
        ]
        .into_iter()
        .map(|(port, id, role)| Host::new("127.0.0.1", port, id, role).with_profile(DEFAULT_PROFILE))
        .collect();

        Topology {
            hosts,
            skipped: vec![],
        }
    }
}

/// Parses `address,port,profile,id,role`. Fields are trimmed, the role is case-insensitive and an empty profile
/// leaves the host untagged.
pub fn parse_host_line(line: &str) -> Result<Host> {
    let fields = line.split(',').map(str::trim).collect::<Vec<_>>();
    if fields.len() != 5 {
        return Err(CouncilError::Topology(format!(
            "expected 5 comma-separated fields, found {}",
            fields.len()
        )));
    }

    let (address, port, profile, id, role) = (fields[0], fields[1], fields[2], fields[3], fields[4]);
    if address.is_empty() {
        return Err(CouncilError::Topology("missing address".to_string()));
    }
    if id.is_empty() {
        return Err(CouncilError::Topology("missing id".to_string()));
    }

    let port = port
        .parse::<u16>()
        .map_err(|err| CouncilError::Topology(format!("invalid port `{}`: {}", port, err)))?;
    let role = role.parse::<Role>()?;

    let host = Host::new(address, port, id, role);
    if profile.is_empty() {
        Ok(host)
    } else {
        Ok(host.with_profile(profile))
    }
}

/// Reads every member of a topology. Blank lines and `#` comments are ignored; any other line that does not
/// describe a new member is logged and skipped.
pub fn parse_topology<R: BufRead>(reader: R) -> Result<Topology> {
    let mut topology = Topology::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let parsed = parse_host_line(trimmed).and_then(|host| {
            if topology.hosts.hosts().contains(&host) {
                Err(CouncilError::Topology(format!(
                    "{}:{} is already taken",
                    host.address(),
                    host.port()
                )))
            } else {
                Ok(host)
            }
        });

        match parsed {
            Ok(host) => topology.hosts.push(host),
            Err(err) => {
                warn!("skipping topology line {} `{}`: {}", index + 1, line, err);
                topology.skipped.push(SkippedLine {
                    line_number: index + 1,
                    line: line.clone(),
                    reason: err.to_string(),
                });
            }
        }
    }

    Ok(topology)
}

pub fn load_topology<P: AsRef<Path>>(path: P) -> Result<Topology> {
    let file = File::open(path.as_ref())?;
    let topology = parse_topology(BufReader::new(file))?;

    info!(
        "loaded {} members from {}",
        topology.hosts.len(),
        path.as_ref().display()
    );
    Ok(topology)
}

/// Builds and starts one node per member of `topology`, each with the behaviour its profile names.
///
/// Proposers are numbered [`PROPOSAL_NUMBER_SPACING`] apart so that concurrent rounds never collide. Nodes that
/// were already started are stopped again if a later one fails.
pub fn setup_nodes(
    topology: &Topology,
    registry: &BehaviorRegistry,
    config: &NodeConfig,
) -> Result<Vec<Arc<Node>>> {
    let hosts = Arc::new(topology.hosts.clone());
    let mut nodes = Vec::with_capacity(hosts.len());
    let mut proposers = 0;

    for host in hosts.hosts() {
        let behavior = registry.resolve_for(host)?;

        let mut node_config = config.clone();
        if host.is(Role::Proposer) {
            node_config.initial_proposal_number += proposers * PROPOSAL_NUMBER_SPACING;
            proposers += 1;
        }

        let node = Arc::new(Node::new(host.clone(), hosts.clone(), behavior, node_config));
        node.start()?;
        nodes.push(node);
    }

    Ok(nodes)
}
