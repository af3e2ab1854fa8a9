use std::fs;
use std::path::Path;

use chaindex::config::{parse_args_from, CliAction, Config};
use chaindex::run_with_summary;
use chaindex_consensus::{bytes_to_hex, Hash256, ZERO_HASH};
use chaindex_primitives::encoding::encode;
use chaindex_primitives::{p2pkh_script, Block, BlockHeader, OutPoint, Transaction, TxIn, TxOut};

fn block(prev: Hash256, height: u32, nonce: u32) -> Block {
    let coinbase = Transaction {
        version: 1,
        inputs: vec![TxIn {
            prevout: OutPoint::null(),
            sequence: u32::MAX,
            value_in: 2_500,
            block_height: 0,
            block_index: 0,
            signature_script: Vec::new(),
        }],
        outputs: vec![TxOut {
            value: 2_500,
            version: 0,
            pk_script: p2pkh_script(&[nonce as u8; 20]),
        }],
        lock_time: height,
        expiry: 0,
    };
    Block {
        header: BlockHeader {
            version: 10,
            prev_block: prev,
            merkle_root: [0u8; 32],
            stake_root: [0u8; 32],
            vote_bits: 0x0001,
            final_state: [0u8; 6],
            voters: 0,
            fresh_stake: 0,
            revocations: 0,
            pool_size: 0,
            bits: 0x207f_ffff,
            sbits: 20_000,
            height,
            size: 0,
            timestamp: 1_700_000_000 + height * 300,
            nonce,
            extra_data: [0u8; 32],
            stake_version: 10,
        },
        transactions: vec![coinbase],
        stake_transactions: Vec::new(),
    }
}

fn chain(len: u32, nonce: u32, genesis: &Block) -> Vec<Block> {
    let mut out = vec![genesis.clone()];
    for height in 1..len {
        let prev = out[out.len() - 1].hash();
        out.push(block(prev, height, nonce));
    }
    out
}

fn write_blocks(path: &Path, main: &[Block], side: &[Block]) {
    let mut lines: Vec<String> = main
        .iter()
        .map(|block| format!("{{\"hex\":\"{}\",\"chainwork\":\"00\"}}", bytes_to_hex(&encode(block))))
        .collect();
    lines.extend(side.iter().map(|block| {
        format!(
            "{{\"hex\":\"{}\",\"chainwork\":\"00\",\"side\":true}}",
            bytes_to_hex(&encode(block))
        )
    }));
    fs::write(path, lines.join("\n")).expect("write blocks");
}

fn config(data_dir: &Path, extra: &[&str]) -> Config {
    let mut args = vec![
        "--data-dir".to_string(),
        data_dir.to_str().expect("utf8 path").to_string(),
        "--network".to_string(),
        "regtest".to_string(),
        "--log-level".to_string(),
        "error".to_string(),
    ];
    args.extend(extra.iter().map(|arg| arg.to_string()));
    match parse_args_from(args).expect("parse args") {
        CliAction::Run(config) => config,
        other => panic!("expected run, got {other:?}"),
    }
}

#[tokio::test]
async fn import_follows_reorgs_across_runs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let blocks = dir.path().join("blocks.jsonl");
    let genesis = block(ZERO_HASH, 0, 1);
    let first = chain(4, 1, &genesis);
    write_blocks(&blocks, &first, &[]);

    let path = blocks.to_str().expect("utf8 path");
    let summary = run_with_summary(config(dir.path(), &["--import", path]))
        .await
        .expect("first import");
    assert_eq!((summary.height, summary.stored, summary.rolled_back), (3, 4, 0));

    let second = chain(6, 2, &genesis);
    write_blocks(&blocks, &second, &first[1..]);
    let summary = run_with_summary(config(dir.path(), &["--import", path]))
        .await
        .expect("second import");
    assert_eq!(summary.height, 5);
    assert_eq!(summary.rolled_back, 3);
    assert_eq!(summary.stored, 5);
    assert_eq!(summary.side_blocks, 0);

    let summary = run_with_summary(config(dir.path(), &["--purge", "2"]))
        .await
        .expect("purge");
    assert_eq!((summary.purged, summary.height), (2, 3));

    let summary = run_with_summary(config(dir.path(), &["--status"]))
        .await
        .expect("status");
    assert_eq!(summary.height, 3);
}

#[tokio::test]
async fn import_stores_side_branches() {
    let dir = tempfile::tempdir().expect("tempdir");
    let blocks = dir.path().join("blocks.jsonl");
    let genesis = block(ZERO_HASH, 0, 1);
    let main = chain(3, 1, &genesis);
    let fork = chain(3, 7, &genesis);
    write_blocks(&blocks, &main, &fork[1..]);

    let path = blocks.to_str().expect("utf8 path");
    let summary = run_with_summary(config(dir.path(), &["--import", path]))
        .await
        .expect("import");
    assert_eq!(summary.height, 2);
    assert_eq!(summary.side_blocks, 2);
}

#[tokio::test]
async fn index_maintenance_runs_alone() {
    let dir = tempfile::tempdir().expect("tempdir");
    run_with_summary(config(dir.path(), &["--drop-indexes"]))
        .await
        .expect("drop indexes");
    run_with_summary(config(dir.path(), &["--create-indexes"]))
        .await
        .expect("create indexes");
}

#[tokio::test]
async fn import_rejects_a_malformed_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let blocks = dir.path().join("blocks.jsonl");
    fs::write(&blocks, "{\"hex\":\"zz\"}\n").expect("write blocks");
    let err = run_with_summary(config(dir.path(), &["--import", blocks.to_str().expect("utf8 path")]))
        .await
        .expect_err("bad file");
    assert!(err.contains("line 1"), "{err}");
}

#[tokio::test]
async fn import_reports_source_errors() {
    let dir = tempfile::tempdir().expect("tempdir");
    let blocks = dir.path().join("blocks.jsonl");
    let genesis = block(ZERO_HASH, 0, 1);
    let full = chain(4, 1, &genesis);
    write_blocks(&blocks, &full[2..], &[]);

    let err = run_with_summary(config(dir.path(), &["--import", blocks.to_str().expect("utf8 path")]))
        .await
        .expect_err("chain starts above the stored tip");
    assert!(err.starts_with("chain source: "), "{err}");
    assert!(err.contains("no main chain block at height 0"), "{err}");
}
