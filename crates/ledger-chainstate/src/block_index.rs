//! In-memory block index (§4.2): a hash-keyed DAG of headers with
//! cumulative work and a monotone validity status (§4.4). Owns no coins and
//! does no I/O; `ChainstateManager` is the only caller.

use std::collections::HashMap;

use num_bigint::BigUint;

use ledger_consensus::{check_pow, work_from_bits, BlockHeader, ChainError, ErrorCode, Hash, NULL_HASH};
use ledger_crypto::CryptoProvider;
use ledger_store::{self, BlockStatus, FileRef};

#[derive(Clone, Debug)]
pub struct IndexEntry {
    pub header: BlockHeader,
    pub height: u32,
    pub chain_work: BigUint,
    pub status: BlockStatus,
    pub failed: bool,
    /// Insertion order, used only to break chain-work ties in
    /// `select_best_candidate` (earliest arrival wins).
    pub seq: u64,
    /// Set once the block's body has been stored (status >= TRANSACTIONS).
    pub file_ref: Option<FileRef>,
    pub tx_count: u32,
    /// Ancestor at `skip_height(height)`, Bitcoin's `CBlockIndex::pskip`
    /// trick so `get_ancestor` doesn't walk one parent pointer at a time.
    skip: Hash,
}

pub struct BlockIndex {
    entries: HashMap<Hash, IndexEntry>,
    children: HashMap<Hash, Vec<Hash>>,
    next_seq: u64,
}

impl Default for BlockIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockIndex {
    pub fn new() -> Self {
        Self { entries: HashMap::new(), children: HashMap::new(), next_seq: 0 }
    }

    pub fn get(&self, hash: &Hash) -> Option<&IndexEntry> {
        self.entries.get(hash)
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registers the genesis header directly: it has no parent to look up.
    pub fn insert_genesis(
        &mut self,
        provider: &dyn CryptoProvider,
        header: BlockHeader,
    ) -> Result<Hash, ChainError> {
        check_pow(provider, &header)?;
        let hash = header_hash(provider, &header);
        if self.entries.contains_key(&hash) {
            return Ok(hash);
        }
        let chain_work = work_from_bits(header.bits)?;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            hash,
            IndexEntry {
                header,
                height: 0,
                chain_work,
                status: BlockStatus::HeaderValid,
                failed: false,
                seq,
                file_ref: None,
                tx_count: 0,
                skip: NULL_HASH,
            },
        );
        Ok(hash)
    }

    /// §4.2 `insert_header`: idempotent; rejects a header that fails its
    /// context-free checks, whose parent is unknown, or whose parent is
    /// failed. Newly inserted headers start at `HEADER_VALID`.
    pub fn insert_header(
        &mut self,
        provider: &dyn CryptoProvider,
        header: BlockHeader,
    ) -> Result<Hash, ChainError> {
        check_pow(provider, &header)?;
        let hash = header_hash(provider, &header);
        if self.entries.contains_key(&hash) {
            return Ok(hash);
        }

        let parent = self
            .entries
            .get(&header.prev_hash)
            .ok_or_else(|| ChainError::new(ErrorCode::BadTx, "insert_header: unknown parent"))?;
        if parent.failed {
            return Err(ChainError::new(ErrorCode::BadTx, "insert_header: parent is marked failed"));
        }

        let height = parent.height + 1;
        let chain_work = parent.chain_work.clone() + work_from_bits(header.bits)?;
        let prev_hash = header.prev_hash;
        let skip = self
            .get_ancestor(&prev_hash, skip_height(height))
            .unwrap_or(NULL_HASH);

        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            hash,
            IndexEntry {
                header,
                height,
                chain_work,
                status: BlockStatus::HeaderValid,
                failed: false,
                seq,
                file_ref: None,
                tx_count: 0,
                skip,
            },
        );
        self.children.entry(prev_hash).or_default().push(hash);
        Ok(hash)
    }

    /// §4.2 `get_ancestor`: `height` must be ≤ `from`'s height.
    pub fn get_ancestor(&self, from: &Hash, height: u32) -> Option<Hash> {
        let start = self.entries.get(from)?;
        if height > start.height {
            return None;
        }
        let mut cur = *from;
        loop {
            let entry = self.entries.get(&cur)?;
            if entry.height == height {
                return Some(cur);
            }
            let next = match self.entries.get(&entry.skip) {
                Some(skip_entry) if skip_entry.height >= height => entry.skip,
                _ => entry.header.prev_hash,
            };
            cur = next;
        }
    }

    /// §4.2 `find_fork`: the lowest common ancestor of `a` and `b`.
    pub fn find_fork(&self, a: &Hash, b: &Hash) -> Option<Hash> {
        let ea = self.entries.get(a)?;
        let eb = self.entries.get(b)?;
        let mut ha = if ea.height > eb.height { self.get_ancestor(a, eb.height)? } else { *a };
        let mut hb = if eb.height > ea.height { self.get_ancestor(b, ea.height)? } else { *b };
        while ha != hb {
            ha = self.entries.get(&ha)?.header.prev_hash;
            hb = self.entries.get(&hb)?.header.prev_hash;
        }
        Some(ha)
    }

    /// §4.2 `select_best_candidate`: maximum chain work among non-failed
    /// entries, ties broken by earliest arrival.
    pub fn select_best_candidate(&self) -> Option<Hash> {
        let mut best: Option<(&Hash, &IndexEntry)> = None;
        for (hash, entry) in self.entries.iter() {
            if entry.failed {
                continue;
            }
            best = match best {
                None => Some((hash, entry)),
                Some((best_hash, best_entry)) => {
                    let better = entry.chain_work > best_entry.chain_work
                        || (entry.chain_work == best_entry.chain_work && entry.seq < best_entry.seq);
                    if better {
                        Some((hash, entry))
                    } else {
                        Some((best_hash, best_entry))
                    }
                }
            };
        }
        best.map(|(hash, _)| *hash)
    }

    /// Sticky failure bit, propagated to every known descendant (§4.3 step
    /// 3, §4.4).
    pub fn mark_failed(&mut self, hash: Hash) {
        let mut stack = vec![hash];
        while let Some(h) = stack.pop() {
            if let Some(entry) = self.entries.get_mut(&h) {
                entry.failed = true;
            }
            if let Some(kids) = self.children.get(&h) {
                stack.extend(kids.iter().copied());
            }
        }
    }

    /// Advances `hash`'s status, never moving it backwards along the
    /// lattice (§4.4).
    pub fn raise_status(&mut self, hash: &Hash, status: BlockStatus) {
        if let Some(entry) = self.entries.get_mut(hash) {
            if status > entry.status {
                entry.status = status;
            }
        }
    }

    /// Records where the block body landed in the flat files and raises
    /// the entry to `TRANSACTIONS` (§9: "block files are written before
    /// their index entries are advanced to TRANSACTIONS").
    pub fn set_stored(&mut self, hash: &Hash, file_ref: FileRef, tx_count: u32) {
        if let Some(entry) = self.entries.get_mut(hash) {
            entry.file_ref = Some(file_ref);
            entry.tx_count = tx_count;
            if BlockStatus::Transactions > entry.status {
                entry.status = BlockStatus::Transactions;
            }
        }
    }

    pub fn height_of(&self, hash: &Hash) -> Option<u32> {
        self.entries.get(hash).map(|e| e.height)
    }

    /// Rebuilds one entry from its persisted form on startup, trusting it
    /// wholesale (it already passed every check the first time it was
    /// written). Skip pointers are left null; call
    /// `rebuild_skip_pointers` once every entry has been restored.
    pub fn restore_entry(&mut self, hash: Hash, stored: &ledger_store::BlockIndexEntry, seq: u64) {
        self.next_seq = self.next_seq.max(seq + 1);
        self.children.entry(stored.header.prev_hash).or_default().push(hash);
        self.entries.insert(
            hash,
            IndexEntry {
                header: stored.header.clone(),
                height: stored.height,
                chain_work: BigUint::from_bytes_be(&stored.chain_work),
                status: stored.status,
                failed: stored.failed,
                seq,
                file_ref: stored.file_ref,
                tx_count: stored.tx_count,
                skip: NULL_HASH,
            },
        );
    }

    /// Recomputes every entry's skip pointer in height order. `restore_entry`
    /// cannot do this incrementally since entries may arrive in arbitrary
    /// order (the store's `iter_block_index` makes no ordering promise).
    pub fn rebuild_skip_pointers(&mut self) {
        let mut hashes: Vec<Hash> = self.entries.keys().copied().collect();
        hashes.sort_by_key(|h| self.entries[h].height);
        for h in hashes {
            let (height, prev_hash) = {
                let e = &self.entries[&h];
                (e.height, e.header.prev_hash)
            };
            let skip = self.get_ancestor(&prev_hash, skip_height(height)).unwrap_or(NULL_HASH);
            if let Some(e) = self.entries.get_mut(&h) {
                e.skip = skip;
            }
        }
    }
}

fn header_hash(provider: &dyn CryptoProvider, header: &BlockHeader) -> Hash {
    provider.hash256(&header.encode())
}

/// Bitcoin's `CBlockIndex::GetSkipHeight`: the height a skip-pointer built
/// at `height` should point at, giving `get_ancestor` amortized O(log n)
/// instead of a parent-pointer walk.
fn skip_height(height: u32) -> u32 {
    if height < 2 {
        return 0;
    }
    if height & 1 != 0 {
        invert_lowest_one(invert_lowest_one(height - 1)) + 1
    } else {
        invert_lowest_one(height)
    }
}

fn invert_lowest_one(n: u32) -> u32 {
    n & n.wrapping_sub(1)
}
