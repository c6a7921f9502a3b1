use common::*;
use paxos::prelude::*;
use rstest::*;

mod common;

fn promise_from(index: usize, number: ProposalNumber) -> Message {
    Message::promise(number, "M1", &host(index, Role::Acceptor))
}

#[rstest]
#[case::single_acceptor(1, 1)]
#[case::two_acceptors(2, 2)]
#[case::three_acceptors(3, 2)]
#[case::six_acceptors(6, 4)]
#[case::seven_acceptors(7, 4)]
fn quorum_is_a_strict_majority(#[case] acceptor_count: usize, #[case] expected: usize) {
    assert_eq!(proposer(acceptor_count).quorum(), expected);
}

#[test]
pub fn prepare_increments_proposal_number() {
    let mut proposer = proposer(3);
    assert_eq!(proposer.proposal_number(), 0);

    let SendableMessage { message, dest } = proposer.prepare();
    assert_eq!(message.kind(), MessageType::Prepare);
    assert_eq!(message.proposal_number, 1);
    assert_eq!(message.proposed_value, "M1");
    assert_eq!(message.sender_id(), "M1");
    assert_eq!(dest, MessageDestination::Acceptors);
    assert_eq!(proposer.proposal_value(), Some("M1"));

    assert_eq!(proposer.prepare().message.proposal_number, 2);
}

#[test]
pub fn starting_after_offsets_first_round() {
    let mut proposer = proposer(3).starting_after(200);
    assert_eq!(proposer.prepare().message.proposal_number, 201);

    proposer.reset();
    assert_eq!(proposer.proposal_number(), 200);
    assert_eq!(proposer.proposal_value(), None);
}

#[test]
pub fn proposes_once_majority_promised() {
    let mut proposer = proposer(3);
    let number = proposer.prepare().message.proposal_number;

    assert_eq!(proposer.handle_promise(&promise_from(1, number)), None);

    let SendableMessage { message, dest } = proposer
        .handle_promise(&promise_from(2, number))
        .expect("second promise completes the majority");
    assert_eq!(message.kind(), MessageType::Propose);
    assert_eq!(message.proposal_number, number);
    assert_eq!(message.proposed_value, "M1");
    assert_eq!(dest, MessageDestination::Acceptors);

    // a late promise after the majority must not trigger a second proposal
    assert_eq!(proposer.handle_promise(&promise_from(3, number)), None);
    assert_eq!(proposer.promise_count(), 3);
}

#[test]
pub fn duplicate_promises_count_once() {
    let mut proposer = proposer(3);
    let number = proposer.prepare().message.proposal_number;

    assert_eq!(proposer.handle_promise(&promise_from(1, number)), None);
    assert_eq!(proposer.handle_promise(&promise_from(1, number)), None);
    assert_eq!(proposer.promise_count(), 1);

    assert!(proposer.handle_promise(&promise_from(2, number)).is_some());
}

#[test]
pub fn promises_for_other_rounds_are_ignored() {
    let mut proposer = proposer(3);
    let number = proposer.prepare().message.proposal_number;

    assert_eq!(proposer.handle_promise(&promise_from(1, number + 1)), None);
    assert_eq!(proposer.handle_promise(&promise_from(2, number - 1)), None);
    assert_eq!(proposer.promise_count(), 0);
}

#[test]
pub fn adopts_value_accepted_under_highest_proposal() {
    let mut proposer = proposer(5);
    let number = proposer.prepare().message.proposal_number;

    let earlier = Message::promise(number, "M7", &host(1, Role::Acceptor)).with_accepted_proposal(0);
    let later = Message::promise(number, "M8", &host(2, Role::Acceptor)).with_accepted_proposal(0);
    let fresh = promise_from(3, number);

    assert_eq!(proposer.handle_promise(&earlier), None);
    assert_eq!(proposer.adopted_value(), Some("M7"));

    // an equal accepted number does not replace the adopted value
    assert_eq!(proposer.handle_promise(&later), None);
    assert_eq!(proposer.adopted_value(), Some("M7"));

    let propose = proposer
        .handle_promise(&fresh)
        .expect("third promise completes the majority");
    assert_eq!(propose.message.proposed_value, "M7");
}

#[test]
pub fn higher_accepted_proposal_replaces_adopted_value() {
    let mut proposer = proposer(3).starting_after(10);
    let number = proposer.prepare().message.proposal_number;

    let low = Message::promise(number, "M4", &host(1, Role::Acceptor)).with_accepted_proposal(3);
    let high = Message::promise(number, "M5", &host(2, Role::Acceptor)).with_accepted_proposal(7);

    assert_eq!(proposer.handle_promise(&low), None);
    let propose = proposer.handle_promise(&high).unwrap();
    assert_eq!(propose.message.proposed_value, "M5");
}

#[test]
pub fn new_round_forgets_previous_promises() {
    let mut proposer = proposer(3);
    let first = proposer.prepare().message.proposal_number;
    let promise = Message::promise(first, "M9", &host(1, Role::Acceptor)).with_accepted_proposal(0);
    assert_eq!(proposer.handle_promise(&promise), None);

    let second = proposer.prepare().message.proposal_number;
    assert_eq!(proposer.promise_count(), 0);
    assert_eq!(proposer.adopted_value(), None);

    assert_eq!(proposer.handle_promise(&promise_from(1, second)), None);
    let propose = proposer.handle_promise(&promise_from(2, second)).unwrap();
    assert_eq!(propose.message.proposed_value, "M1");
}

#[test]
pub fn nack_moves_past_reported_number() {
    let mut proposer = proposer(3);
    let number = proposer.prepare().message.proposal_number;
    assert_eq!(proposer.handle_promise(&promise_from(1, number)), None);

    let nack = Message::nack(number, "M1", 5, &host(2, Role::Acceptor));
    assert!(proposer.handle_nack(&nack));
    assert_eq!(proposer.proposal_number(), 6);
    assert_eq!(proposer.promise_count(), 0);

    assert!(proposer.prepare().message.proposal_number > 5);
}

#[test]
pub fn nack_behind_current_round_is_ignored() {
    let mut proposer = proposer(3).starting_after(10);
    let number = proposer.prepare().message.proposal_number;

    let nack = Message::nack(number, "M1", 4, &host(2, Role::Acceptor));
    assert!(!proposer.handle_nack(&nack));
    assert_eq!(proposer.proposal_number(), number);
}
