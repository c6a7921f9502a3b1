#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaChaRng;

use paxos::prelude::*;

const RANDOM_SEED: u64 = 0;
const MAX_DELIVERIES: u32 = 100_000;
const BASE_PORT: u16 = 4570;

// distance between the first proposal numbers of two proposers
pub const PROPOSER_SPACING: ProposalNumber = 100;

pub struct TestMember {
    pub host: Host,
    pub proposer: Proposer,
    pub acceptor: Acceptor,
    pub learner: Learner,
}

/// An in-memory council delivering messages between members without a network.
pub struct TestCouncil {
    pub hosts: HostList,
    pub members: Vec<TestMember>,
    pub config: TestCouncilConfig,
    pub pending: Vec<(usize, usize, Message)>,
    pub accept_log: Vec<(usize, ProposalNumber, String)>,
    pub deliveries: u32,
    random: ChaChaRng,
}

#[derive(Clone, Default)]
pub struct TestCouncilConfig {
    pub drops: BTreeSet<(Option<usize>, Option<usize>)>,
    pub down: BTreeSet<usize>,
    pub drop_rate: f64,
    pub shuffle: bool,
    pub acceptor: AcceptorConfig,
}

pub struct TestLogger;

thread_local! {
    static LOGGER_CONTEXT: RefCell<Option<String>> = RefCell::new(None);
}

pub fn init_random() -> ChaChaRng {
    ChaChaRng::seed_from_u64(RANDOM_SEED)
}

pub fn host(index: usize, role: Role) -> Host {
    Host::new(
        "127.0.0.1",
        BASE_PORT + index as u16,
        format!("M{}", index + 1),
        role,
    )
}

/// Lays out a council as `M1..Mn`: proposers first, then acceptors, then learners.
pub fn council(proposers: usize, acceptors: usize, learners: usize) -> HostList {
    let roles = std::iter::repeat(Role::Proposer)
        .take(proposers)
        .chain(std::iter::repeat(Role::Acceptor).take(acceptors))
        .chain(std::iter::repeat(Role::Learner).take(learners));

    roles
        .enumerate()
        .map(|(index, role)| host(index, role))
        .collect()
}

pub fn config() -> TestCouncilConfig {
    TestCouncilConfig::default()
}

pub fn proposer(acceptor_count: usize) -> Proposer {
    TestLogger::init();
    Proposer::new(host(0, Role::Proposer), acceptor_count)
}

pub fn acceptor(config: AcceptorConfig) -> Acceptor {
    TestLogger::init();
    Acceptor::new(host(1, Role::Acceptor), config)
}

pub fn learner(acceptor_count: usize) -> Learner {
    TestLogger::init();
    Learner::new(host(2, Role::Learner), acceptor_count)
}

//
// TestCouncil impls
//

impl TestCouncil {
    pub fn new(hosts: HostList, config: TestCouncilConfig, random: &mut impl RngCore) -> Self {
        TestLogger::init();

        let acceptor_count = hosts.acceptor_count();
        let members = hosts
            .hosts()
            .iter()
            .enumerate()
            .map(|(index, host)| TestMember {
                host: host.clone(),
                proposer: Proposer::new(host.clone(), acceptor_count)
                    .starting_after(index as ProposalNumber * PROPOSER_SPACING),
                acceptor: Acceptor::new(host.clone(), config.acceptor),
                learner: Learner::new(host.clone(), acceptor_count),
            })
            .collect();

        TestCouncil {
            hosts,
            members,
            config,
            pending: Vec::new(),
            accept_log: Vec::new(),
            deliveries: 0,
            random: ChaChaRng::seed_from_u64(random.next_u64()),
        }
    }

    pub fn prepare_on(&mut self, index: usize) -> &mut Self {
        TestLogger::set_host(Some(self.members[index].host.id().to_string()));
        let sendable = self.members[index].proposer.prepare();
        self.send(index, sendable);
        self
    }

    pub fn run(&mut self) -> &mut Self {
        while !self.pending.is_empty() {
            self.deliveries += 1;
            assert!(
                self.deliveries < MAX_DELIVERIES,
                "council still busy after maximum simulation length"
            );

            let next = if self.config.shuffle {
                self.random.gen_range(0..self.pending.len())
            } else {
                0
            };
            let (from, to, message) = self.pending.remove(next);
            log::info!("{} -> {} {}", self.members[from].host.id(), self.members[to].host.id(), message);

            for sendable in self.deliver(to, message) {
                self.send(to, sendable);
            }
        }
        TestLogger::set_host(None);
        self
    }

    pub fn inspect(&mut self, fun: impl FnOnce(&Self)) -> &mut Self {
        fun(self);
        self
    }

    /// Values learned so far, one entry per learner.
    pub fn learned_values(&self) -> Vec<Option<String>> {
        self.members
            .iter()
            .filter(|member| member.host.is(Role::Learner))
            .map(|member| member.learner.learned_value().map(str::to_string))
            .collect()
    }

    /// Distinct values learned so far by any learner.
    pub fn distinct_learned_values(&self) -> BTreeSet<String> {
        self.learned_values().into_iter().flatten().collect()
    }

    /// Values accepted by a majority of acceptors under the same proposal number.
    pub fn chosen_values(&self) -> BTreeSet<String> {
        let mut votes: BTreeMap<(ProposalNumber, &str), BTreeSet<usize>> = BTreeMap::new();
        for (acceptor, number, value) in &self.accept_log {
            votes
                .entry((*number, value.as_str()))
                .or_default()
                .insert(*acceptor);
        }

        let quorum = majority(self.hosts.acceptor_count());
        votes
            .into_iter()
            .filter(|(_, acceptors)| acceptors.len() >= quorum)
            .map(|((_, value), _)| value.to_string())
            .collect()
    }

    fn index_of(&self, host: &Host) -> Option<usize> {
        self.hosts.hosts().iter().position(|member| member == host)
    }

    fn send(&mut self, from: usize, sendable: SendableMessage) {
        let targets: Vec<usize> = sendable
            .dest
            .resolve(&self.hosts)
            .into_iter()
            .filter_map(|host| self.index_of(host))
            .filter(|to| *to != from || matches!(sendable.dest, MessageDestination::To(_)))
            .collect();

        for to in targets {
            if self.config.should_drop(from, to)
                || (self.config.drop_rate > 0.0 && self.random.gen_bool(self.config.drop_rate))
            {
                log::info!(
                    "{} -> {} DROPPED {}",
                    self.members[from].host.id(),
                    self.members[to].host.id(),
                    sendable.message
                );
                continue;
            }
            self.pending.push((from, to, sendable.message.clone()));
        }
    }

    fn deliver(&mut self, to: usize, message: Message) -> Vec<SendableMessage> {
        let member = &mut self.members[to];
        TestLogger::set_host(Some(member.host.id().to_string()));

        match (member.host.role(), message.kind()) {
            (Role::Acceptor, MessageType::Prepare) => {
                member.acceptor.handle_prepare(&message).into_iter().collect()
            }
            (Role::Acceptor, MessageType::Propose) => {
                let replies = member.acceptor.handle_propose(&message);
                if replies
                    .iter()
                    .any(|reply| reply.message.kind() == MessageType::Accepted)
                {
                    self.accept_log
                        .push((to, message.proposal_number, message.proposed_value.clone()));
                }
                replies
            }
            (Role::Acceptor, MessageType::Nack) => {
                member.acceptor.handle_nack(&message);
                vec![]
            }
            (Role::Proposer, MessageType::Promise) => {
                member.proposer.handle_promise(&message).into_iter().collect()
            }
            (Role::Proposer, MessageType::Nack) => {
                member.proposer.handle_nack(&message);
                vec![]
            }
            (Role::Acceptor, MessageType::Accepted) | (Role::Learner, MessageType::Accepted) => {
                member.learner.handle_accepted(&message).into_iter().collect()
            }
            _ => vec![],
        }
    }
}

//
// TestCouncilConfig impls
//

impl TestCouncilConfig {
    pub fn node_down(mut self, index: usize) -> Self {
        self.down.insert(index);
        self
    }

    pub fn drop_between(mut self, from: usize, to: usize) -> Self {
        self.drops.insert((Some(from), Some(to)));
        self.drops.insert((Some(to), Some(from)));
        self
    }

    pub fn drop_rate(mut self, drop_rate: f64) -> Self {
        self.drop_rate = drop_rate;
        self
    }

    pub fn shuffled(mut self) -> Self {
        self.shuffle = true;
        self
    }

    pub fn nack_stale_proposals(mut self) -> Self {
        self.acceptor.nack_stale_proposals = true;
        self
    }

    pub fn should_drop(&self, from: usize, to: usize) -> bool {
        self.drops.contains(&(Some(from), Some(to)))
            || self.drops.contains(&(Some(from), None))
            || self.drops.contains(&(None, Some(to)))
            || self.down.contains(&from)
            || self.down.contains(&to)
    }
}

//
// TestLogger impls
//

impl TestLogger {
    pub fn init() {
        let _ignore = log::set_logger(&Self);
        log::set_max_level(log::LevelFilter::Debug);
    }

    pub fn set_host(host_id: Option<String>) {
        LOGGER_CONTEXT.with(|context| {
            *context.borrow_mut() = host_id;
        });
    }
}

impl log::Log for TestLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        LOGGER_CONTEXT.with(|context| match &*context.borrow() {
            Some(host_id) => eprintln!("{} {}", host_id, record.args()),
            None => eprintln!("{}", record.args()),
        })
    }

    fn flush(&self) {}
}
