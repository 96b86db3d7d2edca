//! End-to-end tests over the public consensus service API.

use cinder_consensus::pipeline::ChainPolicies;
use cinder_consensus::{BlockOutcome, Consensus, ConsensusError};
use cinder_consensus_core::block::Block;
use cinder_consensus_core::config::{Config, SIMNET_PARAMS};
use cinder_consensus_core::errors::tx::TxRuleError;
use cinder_consensus_core::header::Header;
use cinder_consensus_core::testutils::{build_block, build_coinbase, build_spend};
use cinder_consensus_core::tx::TransactionOutpoint;
use cinder_database::utils::create_temp_db;
use cinder_mempool::errors::RuleError as PoolRuleError;
use cinder_mempool::MempoolConfig;

fn new_consensus() -> (tempfile::TempDir, tempfile::TempDir, Consensus) {
    let (db_lifetime, db) = create_temp_db();
    let blocks_dir = tempfile::tempdir().unwrap();
    let consensus = Consensus::new(
        Config::new(SIMNET_PARAMS),
        db,
        blocks_dir.path().to_path_buf(),
        ChainPolicies::permissive(&SIMNET_PARAMS),
        MempoolConfig::default(),
    )
    .unwrap();
    (db_lifetime, blocks_dir, consensus)
}

/// Builds an empty-block chain above `parent`, one block per height
fn build_chain(parent: &Header, parent_height: u64, length: u64, nonce_base: u64) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut parent = parent.clone();
    for i in 0..length {
        let height = parent_height + i;
        let block = build_block(&parent, height, SIMNET_PARAMS.block_subsidy(height + 1), vec![], nonce_base + i);
        parent = block.header.clone();
        blocks.push(block);
    }
    blocks
}

#[test]
fn selection_is_independent_of_arrival_order() {
    let genesis = SIMNET_PARAMS.genesis_block().header;
    let long_branch = build_chain(&genesis, 0, 3, 100);
    let short_branch = build_chain(&genesis, 0, 2, 200);

    let (_db_a, _dir_a, node_a) = new_consensus();
    for block in long_branch.iter().chain(short_branch.iter()) {
        node_a.process_block(block).unwrap();
    }

    let (_db_b, _dir_b, node_b) = new_consensus();
    for block in short_branch.iter().chain(long_branch.iter()) {
        node_b.process_block(block).unwrap();
    }

    assert_eq!(node_a.tip_hash(), node_b.tip_hash());
    assert_eq!(node_a.tip_hash(), long_branch.last().unwrap().hash());
    assert_eq!(node_a.tip_height(), 3);
    assert_eq!(node_b.block_locator(), node_a.block_locator());
}

#[test]
fn duplicate_delivery_changes_nothing() {
    let (_db, _dir, consensus) = new_consensus();
    let genesis = SIMNET_PARAMS.genesis_block().header;
    let blocks = build_chain(&genesis, 0, 2, 1);
    for block in blocks.iter() {
        assert_eq!(consensus.process_block(block).unwrap(), BlockOutcome::NewTip);
    }
    let receiver = consensus.subscribe();

    for block in blocks.iter() {
        assert_eq!(consensus.process_block(block).unwrap(), BlockOutcome::AlreadyKnown);
    }
    assert_eq!(consensus.tip_hash(), blocks[1].hash());
    assert_eq!(consensus.tip_height(), 2);
    assert_eq!(receiver.try_iter().count(), 0);
}

/// An immature reward spend is refused for the same reason whether it
/// arrives loose or inside a block: the pool rejects it outright, and a
/// block carrying it fails connection and never becomes the tip.
#[test]
fn maturity_is_enforced_in_pool_and_block_alike() {
    let (_db, _dir, consensus) = new_consensus();
    let genesis = SIMNET_PARAMS.genesis_block().header;
    let mut tip = genesis;
    for height in 0..5 {
        let block = build_block(&tip, height, SIMNET_PARAMS.block_subsidy(height + 1), vec![], height + 1);
        consensus.process_block(&block).unwrap();
        tip = block.header;
    }

    // The height-1 coinbase has 5 confirmations at spending height 6; 10 required
    let coinbase_outpoint = TransactionOutpoint::new(build_coinbase(1, SIMNET_PARAMS.block_subsidy(1)).id(), 0);
    let spend = build_spend(&[coinbase_outpoint], SIMNET_PARAMS.block_subsidy(1) - 100_000);

    let rejection = consensus.submit_transaction(spend.clone()).unwrap_err();
    assert!(matches!(
        rejection,
        PoolRuleError::RejectTxRule(TxRuleError::ImmatureSpend(_, 0, _, 5, 10))
    ));

    // The same spend inside a block fails connection: the block is stored
    // and marked invalid, and the tip does not move
    let bad = build_block(&tip, 5, SIMNET_PARAMS.block_subsidy(6), vec![spend], 50);
    assert_eq!(consensus.process_block(&bad).unwrap(), BlockOutcome::SideChain);
    assert_eq!(consensus.tip_hash(), tip.hash);
    assert_eq!(consensus.tip_height(), 5);

    let resubmission = consensus.process_block(&bad);
    assert!(matches!(resubmission, Err(ConsensusError::KnownInvalid(hash)) if hash == bad.hash()));

    // A healthy sibling still extends the chain afterwards
    let good = build_block(&tip, 5, SIMNET_PARAMS.block_subsidy(6), vec![], 51);
    assert_eq!(consensus.process_block(&good).unwrap(), BlockOutcome::NewTip);
    assert_eq!(consensus.tip_height(), 6);
}
