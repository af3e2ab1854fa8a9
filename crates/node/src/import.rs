//! Block source backed by a JSON-lines file.
//!
//! Each line is one block:
//!
//! ```text
//! {"hex": "<serialized block>", "chainwork": "…", "winners": ["<ticket hash>"],
//!  "expired": [], "missed": [], "side": false, "invalid": false}
//! ```
//!
//! Lines without `side` form the main chain and must be in height order.
//! Side blocks may appear anywhere; every side block that no other side block
//! builds on is reported as a chain tip.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use chaindex_chainstate::{ChainSource, ChainTipInfo, SourceBlock, StakeSnapshot, TipStatus};
use chaindex_consensus::{bytes_from_hex, hash256_from_hex, hash256_to_hex, Hash256};
use chaindex_primitives::encoding::decode;
use chaindex_primitives::Block;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct BlockRecord {
    hex: String,
    #[serde(default)]
    chainwork: String,
    #[serde(default)]
    winners: Vec<String>,
    #[serde(default)]
    expired: Vec<String>,
    #[serde(default)]
    missed: Vec<String>,
    #[serde(default)]
    side: bool,
    #[serde(default)]
    invalid: bool,
}

pub struct FileSource {
    main: Vec<SourceBlock>,
    side: HashMap<Hash256, SourceBlock>,
    invalid: HashSet<Hash256>,
}

impl FileSource {
    pub fn open(path: &Path) -> Result<Self, String> {
        let contents = fs::read_to_string(path).map_err(|err| format!("{}: {err}", path.display()))?;
        Self::parse(&contents).map_err(|err| format!("{}: {err}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self, String> {
        let mut source = FileSource {
            main: Vec::new(),
            side: HashMap::new(),
            invalid: HashSet::new(),
        };
        for (idx, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let lineno = idx + 1;
            let record: BlockRecord =
                serde_json::from_str(line).map_err(|err| format!("line {lineno}: {err}"))?;
            let fetched = source_block(&record).map_err(|err| format!("line {lineno}: {err}"))?;
            let hash = fetched.block.hash();

            if record.side {
                if record.invalid {
                    source.invalid.insert(hash);
                }
                source.side.insert(hash, fetched);
                continue;
            }
            if record.invalid {
                return Err(format!("line {lineno}: main chain block marked invalid"));
            }
            if let Some(prev) = source.main.last() {
                if fetched.block.header.prev_block != prev.block.hash()
                    || fetched.block.height() != prev.block.height() + 1
                {
                    return Err(format!(
                        "line {lineno}: block {} does not extend the main chain",
                        hash256_to_hex(&hash)
                    ));
                }
            }
            source.main.push(fetched);
        }
        if source.main.is_empty() {
            return Err("no main chain blocks".to_string());
        }
        Ok(source)
    }

    pub fn main_len(&self) -> usize {
        self.main.len()
    }

    fn base_height(&self) -> i64 {
        self.main.first().map(|first| first.block.height()).unwrap_or(0)
    }

    fn main_index(&self, hash: &Hash256) -> Option<usize> {
        self.main.iter().position(|fetched| fetched.block.hash() == *hash)
    }
}

fn source_block(record: &BlockRecord) -> Result<SourceBlock, String> {
    let bytes = bytes_from_hex(&record.hex).map_err(|err| format!("block hex: {err}"))?;
    let block: Block = decode(&bytes).map_err(|err| format!("block: {err}"))?;
    Ok(SourceBlock {
        block,
        snapshot: StakeSnapshot {
            winners: hashes(&record.winners)?,
            expired: hashes(&record.expired)?,
            missed: hashes(&record.missed)?,
        },
        chainwork: record.chainwork.clone(),
    })
}

fn hashes(raw: &[String]) -> Result<Vec<Hash256>, String> {
    raw.iter()
        .map(|hex| hash256_from_hex(hex).map_err(|err| format!("ticket hash '{hex}': {err}")))
        .collect()
}

impl ChainSource for FileSource {
    fn best_block(&self) -> Result<(i64, Hash256), String> {
        let tip = self.main.last().ok_or("empty chain")?;
        Ok((tip.block.height(), tip.block.hash()))
    }

    fn block_hash(&self, height: i64) -> Result<Hash256, String> {
        usize::try_from(height - self.base_height())
            .ok()
            .and_then(|idx| self.main.get(idx))
            .map(|fetched| fetched.block.hash())
            .ok_or_else(|| format!("no main chain block at height {height}"))
    }

    fn block(&self, hash: &Hash256) -> Result<SourceBlock, String> {
        self.main_index(hash)
            .map(|idx| &self.main[idx])
            .or_else(|| self.side.get(hash))
            .cloned()
            .ok_or_else(|| format!("unknown block {}", hash256_to_hex(hash)))
    }

    fn chain_tips(&self) -> Result<Vec<ChainTipInfo>, String> {
        let (height, hash) = self.best_block()?;
        let mut tips = vec![ChainTipInfo {
            height,
            hash,
            branch_len: 0,
            status: TipStatus::Active,
        }];

        let parents: HashSet<Hash256> = self
            .side
            .values()
            .map(|fetched| fetched.block.header.prev_block)
            .collect();
        let mut side: Vec<&SourceBlock> = self
            .side
            .iter()
            .filter(|(hash, _)| !parents.contains(*hash))
            .map(|(_, fetched)| fetched)
            .collect();
        side.sort_by_key(|fetched| (fetched.block.height(), fetched.block.hash()));

        for fetched in side {
            let mut branch_len = 0;
            let mut invalid = false;
            let mut cursor = Some(fetched);
            while let Some(current) = cursor {
                let hash = current.block.hash();
                invalid |= self.invalid.contains(&hash);
                branch_len += 1;
                cursor = self.side.get(&current.block.header.prev_block);
            }
            tips.push(ChainTipInfo {
                height: fetched.block.height(),
                hash: fetched.block.hash(),
                branch_len,
                status: if invalid {
                    TipStatus::Invalid
                } else {
                    TipStatus::ValidFork
                },
            });
        }
        Ok(tips)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaindex_consensus::{bytes_to_hex, ZERO_HASH};
    use chaindex_primitives::encoding::encode;
    use chaindex_primitives::{p2pkh_script, BlockHeader, OutPoint, Transaction, TxIn, TxOut};

    fn block(prev: Hash256, height: u32, nonce: u32) -> Block {
        let coinbase = Transaction {
            version: 1,
            inputs: vec![TxIn {
                prevout: OutPoint::null(),
                sequence: u32::MAX,
                value_in: 1_000,
                block_height: 0,
                block_index: 0,
                signature_script: Vec::new(),
            }],
            outputs: vec![TxOut {
                value: 1_000,
                version: 0,
                pk_script: p2pkh_script(&[0x11; 20]),
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

    fn line(block: &Block, extra: &str) -> String {
        format!(
            "{{\"hex\":\"{}\",\"chainwork\":\"{:02x}\"{extra}}}",
            bytes_to_hex(&encode(block)),
            block.header.height
        )
    }

    #[test]
    fn serves_main_chain_by_height_and_hash() {
        let genesis = block(ZERO_HASH, 0, 0);
        let next = block(genesis.hash(), 1, 0);
        let winner = hash256_to_hex(&[0x42; 32]);
        let contents = format!(
            "{}\n\n{}\n",
            line(&genesis, ""),
            line(&next, &format!(",\"winners\":[\"{winner}\"]"))
        );
        let source = FileSource::parse(&contents).expect("parse");
        assert_eq!(source.main_len(), 2);
        assert_eq!(source.best_block().expect("best"), (1, next.hash()));
        assert_eq!(source.block_hash(0).expect("hash"), genesis.hash());
        assert!(source.block_hash(2).is_err());

        let fetched = source.block(&next.hash()).expect("block");
        assert_eq!(fetched.snapshot.winners, vec![[0x42; 32]]);
        assert_eq!(fetched.chainwork, "01");
    }

    #[test]
    fn rejects_gaps_in_the_main_chain() {
        let genesis = block(ZERO_HASH, 0, 0);
        let orphan = block([0x07; 32], 1, 0);
        let contents = format!("{}\n{}\n", line(&genesis, ""), line(&orphan, ""));
        let err = FileSource::parse(&contents).err().expect("gap");
        assert!(err.starts_with("line 2:"), "{err}");
    }

    #[test]
    fn reports_side_branch_tips() {
        let genesis = block(ZERO_HASH, 0, 0);
        let main = block(genesis.hash(), 1, 0);
        let fork_a = block(genesis.hash(), 1, 7);
        let fork_b = block(fork_a.hash(), 2, 7);
        let bad = block(main.hash(), 2, 9);
        let contents = [
            line(&genesis, ""),
            line(&fork_a, ",\"side\":true"),
            line(&main, ""),
            line(&fork_b, ",\"side\":true"),
            line(&bad, ",\"side\":true,\"invalid\":true"),
        ]
        .join("\n");
        let source = FileSource::parse(&contents).expect("parse");
        let tips = source.chain_tips().expect("tips");
        assert_eq!(tips.len(), 3);
        assert_eq!(tips[0].status, TipStatus::Active);

        let fork = tips.iter().find(|tip| tip.hash == fork_b.hash()).expect("fork tip");
        assert_eq!((fork.branch_len, fork.status), (2, TipStatus::ValidFork));
        let invalid = tips.iter().find(|tip| tip.hash == bad.hash()).expect("invalid tip");
        assert_eq!((invalid.branch_len, invalid.status), (1, TipStatus::Invalid));
        assert!(source.block(&fork_a.hash()).is_ok());
    }
}
