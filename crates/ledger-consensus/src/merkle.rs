//! Merkle tree over transaction ids (double-SHA256, duplicate-last-on-odd).

use crate::error::{ChainError, ErrorCode};
use crate::primitives::Hash;
use ledger_crypto::CryptoProvider;

pub fn merkle_root_txids(
    provider: &dyn CryptoProvider,
    txids: &[Hash],
) -> Result<Hash, ChainError> {
    if txids.is_empty() {
        return Err(ChainError::new(ErrorCode::BadMerkle, "merkle: empty tx list"));
    }

    let mut level: Vec<Hash> = txids.to_vec();
    while level.len() > 1 {
        let mut next: Vec<Hash> = Vec::with_capacity(level.len().div_ceil(2));
        let mut i = 0usize;
        while i < level.len() {
            let left = level[i];
            // Odd node at the end of a level is paired with itself.
            let right = if i + 1 < level.len() { level[i + 1] } else { level[i] };
            let mut preimage = [0u8; 64];
            preimage[..32].copy_from_slice(&left);
            preimage[32..].copy_from_slice(&right);
            next.push(provider.hash256(&preimage));
            i += 2;
        }
        level = next;
    }

    Ok(level[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_crypto::StdCryptoProvider;

    #[test]
    fn single_tx_root_is_itself() {
        let p = StdCryptoProvider;
        let txid = [9u8; 32];
        assert_eq!(merkle_root_txids(&p, &[txid]).unwrap(), txid);
    }

    #[test]
    fn pair_root_matches_manual_hash() {
        let p = StdCryptoProvider;
        let a = [1u8; 32];
        let b = [2u8; 32];
        let mut preimage = [0u8; 64];
        preimage[..32].copy_from_slice(&a);
        preimage[32..].copy_from_slice(&b);
        let expected = p.hash256(&preimage);
        assert_eq!(merkle_root_txids(&p, &[a, b]).unwrap(), expected);
    }

    #[test]
    fn odd_count_duplicates_last() {
        let p = StdCryptoProvider;
        let a = [1u8; 32];
        let b = [2u8; 32];
        let c = [3u8; 32];
        let three = merkle_root_txids(&p, &[a, b, c]).unwrap();
        let four = merkle_root_txids(&p, &[a, b, c, c]).unwrap();
        assert_eq!(three, four);
    }

    #[test]
    fn rejects_empty() {
        let p = StdCryptoProvider;
        assert!(merkle_root_txids(&p, &[]).is_err());
    }
}
