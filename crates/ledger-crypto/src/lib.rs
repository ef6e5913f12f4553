//! Cryptography provider interface for ledger implementations.
//!
//! Consensus code must depend only on this narrow interface, never on a
//! concrete hashing or signature crate directly.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

pub trait CryptoProvider: Send + Sync {
    /// Single SHA-256 round.
    fn sha256(&self, input: &[u8]) -> [u8; 32];

    /// Double SHA-256, the hash used for block/transaction identifiers and
    /// proof-of-work.
    fn hash256(&self, input: &[u8]) -> [u8; 32] {
        let once = self.sha256(input);
        self.sha256(&once)
    }

    /// RIPEMD160(SHA256(x)), used by P2PKH/P2SH script forms.
    fn hash160(&self, input: &[u8]) -> [u8; 20];

    /// Verify an ECDSA signature over secp256k1 against a 32-byte message
    /// digest and a serialized (compressed or uncompressed) public key.
    /// Returns `Ok(false)` for a well-formed but non-matching signature,
    /// `Err` only for malformed inputs.
    fn verify_ecdsa_secp256k1(
        &self,
        pubkey: &[u8],
        digest32: &[u8; 32],
        sig_der: &[u8],
    ) -> Result<bool, String>;
}

/// The production provider: real `sha2`/`ripemd`/`secp256k1` backing.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdCryptoProvider;

impl CryptoProvider for StdCryptoProvider {
    fn sha256(&self, input: &[u8]) -> [u8; 32] {
        let mut h = Sha256::new();
        h.update(input);
        let out = h.finalize();
        let mut r = [0u8; 32];
        r.copy_from_slice(&out);
        r
    }

    fn hash160(&self, input: &[u8]) -> [u8; 20] {
        let sha = self.sha256(input);
        let mut h = Ripemd160::new();
        h.update(sha);
        let out = h.finalize();
        let mut r = [0u8; 20];
        r.copy_from_slice(&out);
        r
    }

    fn verify_ecdsa_secp256k1(
        &self,
        pubkey: &[u8],
        digest32: &[u8; 32],
        sig_der: &[u8],
    ) -> Result<bool, String> {
        use secp256k1::ecdsa::Signature;
        use secp256k1::{Message, PublicKey, SECP256K1};

        let pk = PublicKey::from_slice(pubkey).map_err(|e| format!("bad pubkey: {e}"))?;
        let sig = Signature::from_der(sig_der).map_err(|e| format!("bad signature: {e}"))?;
        let msg = Message::from_digest(*digest32);
        Ok(SECP256K1.verify_ecdsa(&msg, &sig, &pk).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash256_is_double_sha256() {
        let p = StdCryptoProvider;
        let once = p.sha256(b"abc");
        let twice = p.sha256(&once);
        assert_eq!(p.hash256(b"abc"), twice);
    }

    #[test]
    fn hash160_matches_known_vector() {
        // hash160("") = ripemd160(sha256("")), a fixed known constant.
        let p = StdCryptoProvider;
        let got = p.hash160(b"");
        let expected = hex_literal(b"b472a266d0bd89c13706a4132ccfb16f7c3b9fcb");
        assert_eq!(got.to_vec(), expected);
    }

    fn hex_literal(hex: &[u8]) -> Vec<u8> {
        fn nibble(c: u8) -> u8 {
            match c {
                b'0'..=b'9' => c - b'0',
                b'a'..=b'f' => c - b'a' + 10,
                _ => unreachable!(),
            }
        }
        hex.chunks(2)
            .map(|pair| (nibble(pair[0]) << 4) | nibble(pair[1]))
            .collect()
    }
}
