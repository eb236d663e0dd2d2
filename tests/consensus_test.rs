//! End-to-end consensus over a local network of directly wired cores.

use std::time::Duration;

mod common;

use common::{make_block, setup_logger, test_system, wait_until};

const HEIGHTS: u64 = 3;

#[test]
fn four_validators_commit_successive_heights() {
    setup_logger();

    let nodes = test_system(4);
    for node in &nodes {
        node.core.start().unwrap();
    }

    // Every node keeps a candidate of its own on hand for each height; only
    // the round's proposer actually proposes one.
    for node in &nodes {
        for height in 1..=HEIGHTS {
            node.core.post_candidate_block(make_block(height, node.address));
        }
    }

    assert!(
        wait_until(Duration::from_secs(30), || nodes
            .iter()
            .all(|node| node.backend.committed_count() >= HEIGHTS as usize)),
        "not every node committed {} blocks in time",
        HEIGHTS
    );

    for node in &nodes {
        node.core.stop().unwrap();
    }

    // Safety: all nodes agree on every height, and each committed block
    // carries at least a quorum of seals.
    for height in 1..=HEIGHTS {
        let hash = nodes[0].backend.committed_hash(height).unwrap();
        for node in &nodes[1..] {
            assert_eq!(
                node.backend.committed_hash(height),
                Some(hash),
                "nodes disagree at height {}",
                height
            );
        }
        for node in &nodes {
            assert!(
                node.backend.committed_seal_count(height).unwrap() >= 3,
                "fewer than quorum seals at height {}",
                height
            );
        }
    }
}

#[test]
fn single_validator_commits_alone() {
    setup_logger();

    let nodes = test_system(1);
    let node = &nodes[0];
    node.core.start().unwrap();

    for height in 1..=HEIGHTS {
        node.core.post_candidate_block(make_block(height, node.address));
    }

    // With n = 1 the quorum is 1: the node's own prevote and precommit are
    // enough, no peer traffic required.
    assert!(
        wait_until(Duration::from_secs(30), || node.backend.committed_count()
            >= HEIGHTS as usize),
        "single node failed to commit {} blocks in time",
        HEIGHTS
    );

    node.core.stop().unwrap();

    for height in 1..=HEIGHTS {
        assert!(node.backend.committed_hash(height).is_some());
        assert_eq!(node.backend.committed_seal_count(height), Some(1));
    }
}

#[test]
fn is_validator_reflects_the_current_set() {
    setup_logger();

    let nodes = test_system(4);
    for node in &nodes {
        node.core.start().unwrap();
    }

    for node in &nodes {
        for peer in &nodes {
            assert!(node.core.is_validator(&peer.address));
        }
    }
    let stranger = tendermint_core::ValidatorAddress::new([0xfe; 20]);
    assert!(!nodes[0].core.is_validator(&stranger));

    for node in &nodes {
        node.core.stop().unwrap();
    }
}
