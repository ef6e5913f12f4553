//! Signature-hash (SIGHASH) digest construction for script `CHECKSIG`.

use crate::error::{ChainError, ErrorCode};
use crate::primitives::{Hash, Transaction, TxIn, TxOut};
use ledger_crypto::CryptoProvider;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SighashBase {
    All,
    None,
    Single,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SighashType {
    pub base: SighashBase,
    pub anyone_can_pay: bool,
}

impl SighashType {
    pub const ALL: Self = Self {
        base: SighashBase::All,
        anyone_can_pay: false,
    };

    /// Decodes the one-byte sighash flag that is appended to a DER signature
    /// on the script stack.
    pub fn from_byte(b: u8) -> Result<Self, ChainError> {
        let anyone_can_pay = b & 0x80 != 0;
        let base = match b & 0x7f {
            0x01 => SighashBase::All,
            0x02 => SighashBase::None,
            0x03 => SighashBase::Single,
            _ => return Err(ChainError::new(ErrorCode::BadScript, "sighash: unknown type byte")),
        };
        Ok(Self { base, anyone_can_pay })
    }

    pub fn to_u32(self) -> u32 {
        let base = match self.base {
            SighashBase::All => 0x01u32,
            SighashBase::None => 0x02,
            SighashBase::Single => 0x03,
        };
        if self.anyone_can_pay {
            base | 0x80
        } else {
            base
        }
    }
}

/// Computes the legacy-style SIGHASH digest: a canonical serialization of
/// the transaction with `script_code` substituted for the signed input's
/// `script_sig`, masked according to `sighash_type`, double-SHA256'd with
/// the sighash type appended.
pub fn sighash_digest(
    provider: &dyn CryptoProvider,
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
    sighash_type: SighashType,
) -> Result<Hash, ChainError> {
    if input_index >= tx.inputs.len() {
        return Err(ChainError::new(ErrorCode::BadScript, "sighash: input index out of range"));
    }
    if sighash_type.base == SighashBase::Single && input_index >= tx.outputs.len() {
        return Err(ChainError::new(
            ErrorCode::BadScript,
            "sighash: SINGLE with no matching output",
        ));
    }

    let inputs: Vec<TxIn> = if sighash_type.anyone_can_pay {
        vec![TxIn {
            prevout: tx.inputs[input_index].prevout,
            script_sig: script_code.to_vec(),
            sequence: tx.inputs[input_index].sequence,
        }]
    } else {
        tx.inputs
            .iter()
            .enumerate()
            .map(|(i, input)| TxIn {
                prevout: input.prevout,
                script_sig: if i == input_index {
                    script_code.to_vec()
                } else {
                    Vec::new()
                },
                sequence: if i != input_index
                    && matches!(sighash_type.base, SighashBase::None | SighashBase::Single)
                {
                    0
                } else {
                    input.sequence
                },
            })
            .collect()
    };

    let outputs: Vec<TxOut> = match sighash_type.base {
        SighashBase::All => tx.outputs.clone(),
        SighashBase::None => Vec::new(),
        SighashBase::Single => {
            let mut out = Vec::with_capacity(input_index + 1);
            for _ in 0..input_index {
                out.push(TxOut {
                    value: -1,
                    script: Vec::new(),
                });
            }
            out.push(tx.outputs[input_index].clone());
            out
        }
    };

    let masked = Transaction {
        version: tx.version,
        inputs,
        outputs,
        locktime: tx.locktime,
    };

    let mut preimage = masked.encode();
    preimage.extend_from_slice(&sighash_type.to_u32().to_le_bytes());
    Ok(provider.hash256(&preimage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{OutPoint, TxIn};
    use ledger_crypto::StdCryptoProvider;

    fn two_in_two_out() -> Transaction {
        Transaction {
            version: 2,
            inputs: vec![
                TxIn {
                    prevout: OutPoint { txid: [1u8; 32], index: 0 },
                    script_sig: vec![],
                    sequence: 0xffff_ffff,
                },
                TxIn {
                    prevout: OutPoint { txid: [2u8; 32], index: 1 },
                    script_sig: vec![],
                    sequence: 0xffff_ffff,
                },
            ],
            outputs: vec![
                TxOut { value: 100, script: vec![0xaa] },
                TxOut { value: 200, script: vec![0xbb] },
            ],
            locktime: 0,
        }
    }

    #[test]
    fn all_digest_changes_if_any_output_changes() {
        let p = StdCryptoProvider;
        let tx = two_in_two_out();
        let d1 = sighash_digest(&p, &tx, 0, &[0x76], SighashType::ALL).unwrap();
        let mut tx2 = tx.clone();
        tx2.outputs[1].value = 999;
        let d2 = sighash_digest(&p, &tx2, 0, &[0x76], SighashType::ALL).unwrap();
        assert_ne!(d1, d2);
    }

    #[test]
    fn single_digest_ignores_other_outputs() {
        let p = StdCryptoProvider;
        let ty = SighashType { base: SighashBase::Single, anyone_can_pay: false };
        let tx = two_in_two_out();
        let d1 = sighash_digest(&p, &tx, 0, &[0x76], ty).unwrap();
        let mut tx2 = tx.clone();
        tx2.outputs[1].value = 999;
        let d2 = sighash_digest(&p, &tx2, 0, &[0x76], ty).unwrap();
        assert_eq!(d1, d2);
    }

    #[test]
    fn anyone_can_pay_ignores_other_inputs() {
        let p = StdCryptoProvider;
        let ty = SighashType { base: SighashBase::All, anyone_can_pay: true };
        let tx = two_in_two_out();
        let d1 = sighash_digest(&p, &tx, 0, &[0x76], ty).unwrap();
        let mut tx2 = tx.clone();
        tx2.inputs[1].prevout.index = 55;
        let d2 = sighash_digest(&p, &tx2, 0, &[0x76], ty).unwrap();
        assert_eq!(d1, d2);
    }
}
