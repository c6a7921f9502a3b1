
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};

use paxos::prelude::*;

use crate::behavior::{Delivery, DeliveryBehavior};
use crate::error::Result;
use crate::transport::{Transport, TransportConfig};
use crate::util::{lock_then_release, CancellationToken};

const DEFAULT_DISPATCH_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Everything a node's dispatch thread works on, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Peer(Message),
    InitiateElection,
    Reset,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    // how often the dispatch thread checks for cancellation while its inbox is empty
    pub poll_interval: Duration,
    pub transport: TransportConfig,
    pub acceptor: AcceptorConfig,
    /// Prepare a new round as soon as a NACK moves the proposal number forward.
    pub retry_on_nack: bool,
    /// The first round of this node's proposer is numbered one above this.
    pub initial_proposal_number: ProposalNumber,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            poll_interval: DEFAULT_DISPATCH_POLL_INTERVAL,
            transport: TransportConfig::default(),
            acceptor: AcceptorConfig::default(),
            retry_on_nack: true,
            initial_proposal_number: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum NodeState {
    Created,
    Started,
    Stopped,
}

struct Roles {
    proposer: Proposer,
    acceptor: Acceptor,
    learner: Learner,
}

impl Roles {
    fn reset(&mut self) {
        self.proposer.reset();
        self.acceptor.reset();
        self.learner.reset();
    }
}

/// Sends through the node's [`DeliveryBehavior`] and transport.
#[derive(Clone)]
struct Outbox {
    host: Host,
    transport: Arc<Transport>,
    behavior: Arc<Mutex<Box<dyn DeliveryBehavior>>>,
    cancelled: CancellationToken,
}

impl Outbox {
    fn send(&self, message: Message, target: &Host) {
        let delivery = lock_then_release(&self.behavior).on_send(&message, target);

        match delivery {
            Delivery::Proceed => self.transport.send_message(message, target),
            Delivery::Defer(delay) => {
                let transport = self.transport.clone();
                let cancelled = self.cancelled.clone();
                let target = target.clone();

                let spawned = thread::Builder::new()
                    .name(format!("{} delayed send", self.host.id()))
                    .spawn(move || {
                        // the node may have been stopped while the message was held back
                        if cancelled.sleep(delay) {
                            transport.send_message(message, &target);
                        }
                    });

                if let Err(err) = spawned {
                    warn!("{} could not delay a message: {}", self.host.id(), err);
                }
            }
            Delivery::Drop => {
                debug!("{} dropped {} to {}", self.host.id(), message, target);
            }
        }
    }

    fn broadcast<'a, I: IntoIterator<Item = &'a Host>>(&self, message: &Message, hosts: I) {
        for target in hosts {
            if *target != self.host {
                self.send(message.clone(), target);
            }
        }
    }
}

/// A council member: one role, one TCP address and three threads.
///
/// The node owns the state of every Paxos role, but only the role its host was declared with ever receives
/// messages. All role state is owned by the dispatch thread; the other threads talk to it through the inbox.
pub struct Node {
    host: Host,
    hosts: Arc<HostList>,
    config: NodeConfig,
    outbox: Outbox,
    consensus: Arc<Mutex<Option<String>>>,
    inbox_sender: Sender<Envelope>,
    inbox_receiver: Receiver<Envelope>,
    state: Mutex<NodeState>,
    roles: Mutex<Option<Roles>>,
    dispatch_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Node {
    pub fn new(
        host: Host,
        hosts: Arc<HostList>,
        behavior: Box<dyn DeliveryBehavior>,
        config: NodeConfig,
    ) -> Self {
        let (inbox_sender, inbox_receiver) = unbounded::<Envelope>();
        let roles = Roles {
            proposer: Proposer::new(host.clone(), hosts.acceptor_count())
                .starting_after(config.initial_proposal_number),
            acceptor: Acceptor::new(host.clone(), config.acceptor),
            learner: Learner::new(host.clone(), hosts.acceptor_count()),
        };

        Node {
            outbox: Outbox {
                host: host.clone(),
                transport: Arc::new(Transport::new(host.clone(), config.transport.clone())),
                behavior: Arc::new(Mutex::new(behavior)),
                cancelled: CancellationToken::new(),
            },
            host,
            hosts,
            config,
            consensus: Arc::new(Mutex::new(None)),
            inbox_sender,
            inbox_receiver,
            state: Mutex::new(NodeState::Created),
            roles: Mutex::new(Some(roles)),
            dispatch_thread: Mutex::new(None),
        }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn role(&self) -> Role {
        self.host.role()
    }

    pub fn hosts(&self) -> &HostList {
        &self.hosts
    }

    pub fn state(&self) -> NodeState {
        *lock_then_release(&self.state)
    }

    /// Starts listening, sending and dispatching. A node can only be started once.
    pub fn start(&self) -> Result<NodeState> {
        let mut state = lock_then_release(&self.state);
        if *state != NodeState::Created {
            return Ok(*state);
        }

        let roles = match lock_then_release(&self.roles).take() {
            Some(roles) => roles,
            None => return Ok(*state),
        };

        let transport = &self.outbox.transport;
        if let Err(err) = transport.start_listening(self.inbox_sender.clone()) {
            *lock_then_release(&self.roles) = Some(roles);
            return Err(err);
        }
        transport.start_sending()?;

        let dispatcher = Dispatcher {
            host: self.host.clone(),
            hosts: self.hosts.clone(),
            retry_on_nack: self.config.retry_on_nack,
            poll_interval: self.config.poll_interval,
            roles,
            outbox: self.outbox.clone(),
            consensus: self.consensus.clone(),
            inbox: self.inbox_receiver.clone(),
        };

        let handle = thread::Builder::new()
            .name(format!("{} dispatch", self.host.id()))
            .spawn(move || dispatcher.run())?;
        *lock_then_release(&self.dispatch_thread) = Some(handle);

        info!("{} started as {} on {}", self.host.id(), self.role(), self.host);
        *state = NodeState::Started;
        Ok(*state)
    }

    /// Cancels every loop of the node and waits for the ones that can be joined.
    pub fn stop(&self) -> NodeState {
        let mut state = lock_then_release(&self.state);
        if *state == NodeState::Stopped {
            return *state;
        }

        self.outbox.cancelled.cancel();
        self.outbox.transport.stop_listening();
        self.outbox.transport.stop_sending();

        let handle = lock_then_release(&self.dispatch_thread).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }

        info!("{} stopped", self.host.id());
        *state = NodeState::Stopped;
        *state
    }

    /// Asks the proposer to start a new round. Only proposers take part in elections this way.
    pub fn initiate_election(&self) {
        if !self.host.is(Role::Proposer) {
            info!(
                "{} is {}, only proposers can initiate elections",
                self.host.id(),
                self.role()
            );
            return;
        }

        let _ = self.inbox_sender.send(Envelope::InitiateElection);
    }

    pub fn has_reached_consensus(&self) -> bool {
        lock_then_release(&self.consensus).is_some()
    }

    pub fn consensus_value(&self) -> Option<String> {
        lock_then_release(&self.consensus).clone()
    }

    /// Forgets the outcome and resets every role. Messages still waiting in the inbox are discarded.
    pub fn reset(&self) {
        *lock_then_release(&self.consensus) = None;
        let _ = self.inbox_sender.send(Envelope::Reset);
    }

    /// Swaps the behaviour applied to every message from now on.
    pub fn set_behavior(&self, behavior: Box<dyn DeliveryBehavior>) {
        *lock_then_release(&self.outbox.behavior) = behavior;
    }

    pub fn send(&self, message: Message, target: &Host) {
        self.outbox.send(message, target);
    }

    /// Sends `message` to every host of `hosts` except this one.
    pub fn broadcast(&self, message: &Message, hosts: &[Host]) {
        self.outbox.broadcast(message, hosts);
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Dispatcher {
    host: Host,
    hosts: Arc<HostList>,
    retry_on_nack: bool,
    poll_interval: Duration,
    roles: Roles,
    outbox: Outbox,
    consensus: Arc<Mutex<Option<String>>>,
    inbox: Receiver<Envelope>,
}

impl Dispatcher {
    fn run(mut self) {
        loop {
            match self.inbox.recv_timeout(self.poll_interval) {
                Ok(envelope) => self.handle(envelope),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if self.outbox.cancelled.is_cancelled() {
                break;
            }
        }
    }

    fn handle(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::Peer(message) => self.receive(message),
            Envelope::InitiateElection => {
                let prepare = self.roles.proposer.prepare();
                self.dispatch(prepare);
            }
            Envelope::Reset => self.reset(),
        }
    }

    fn receive(&mut self, message: Message) {
        let delivery = lock_then_release(&self.outbox.behavior).on_receive(&message);

        match delivery {
            Delivery::Proceed => {}
            Delivery::Defer(delay) => {
                if !self.outbox.cancelled.sleep(delay) {
                    return;
                }
            }
            Delivery::Drop => {
                debug!("{} dropped incoming {}", self.host.id(), message);
                return;
            }
        }

        debug!("{} {} received {}", self.host.id(), self.host.role(), message);
        self.route(message);
    }

    fn route(&mut self, message: Message) {
        match (self.host.role(), message.kind()) {
            (Role::Proposer, MessageType::Promise) => {
                if let Some(propose) = self.roles.proposer.handle_promise(&message) {
                    self.dispatch(propose);
                }
            }
            (Role::Proposer, MessageType::Nack) => {
                if self.roles.proposer.handle_nack(&message) && self.retry_on_nack {
                    let prepare = self.roles.proposer.prepare();
                    self.dispatch(prepare);
                }
            }
            (Role::Acceptor, MessageType::Prepare) => {
                if let Some(promise) = self.roles.acceptor.handle_prepare(&message) {
                    self.dispatch(promise);
                }
            }
            (Role::Acceptor, MessageType::Propose) => {
                for accepted in self.roles.acceptor.handle_propose(&message) {
                    self.dispatch(accepted);
                }
            }
            (Role::Acceptor, MessageType::Nack) => self.roles.acceptor.handle_nack(&message),
            (Role::Acceptor, MessageType::Accepted) | (Role::Learner, MessageType::Accepted) => {
                self.learn(&message)
            }
            (role, kind) => {
                debug!("{} ignoring {} as {}", self.host.id(), kind, role);
            }
        }
    }

    fn learn(&mut self, message: &Message) {
        let had_learned = self.roles.learner.has_learned();
        let gossip = self.roles.learner.handle_accepted(message);

        if !had_learned && self.roles.learner.has_learned() {
            *lock_then_release(&self.consensus) =
                self.roles.learner.learned_value().map(str::to_string);
        }
        if let Some(gossip) = gossip {
            self.dispatch(gossip);
        }
    }

    fn reset(&mut self) {
        self.roles.reset();
        *lock_then_release(&self.consensus) = None;

        let mut discarded = 0;
        let mut elections = 0;
        for envelope in self.inbox.try_iter() {
            match envelope {
                Envelope::Peer(_) => discarded += 1,
                Envelope::InitiateElection => elections += 1,
                Envelope::Reset => {}
            }
        }
        info!(
            "{} reset, {} queued messages discarded",
            self.host.id(),
            discarded
        );

        for _ in 0..elections {
            self.handle(Envelope::InitiateElection);
        }
    }

    fn dispatch(&self, sendable: SendableMessage) {
        let SendableMessage { message, dest } = sendable;

        match &dest {
            MessageDestination::To(target) => self.outbox.send(message, target),
            _ => self.outbox.broadcast(&message, dest.resolve(&self.hosts)),
        }
    }
}
