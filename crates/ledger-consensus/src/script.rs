//! Stack-based script interpreter.
//!
//! Executes `script_sig ‖ script_pubkey` (and, for P2SH, the embedded redeem
//! script) against a bounded stack machine, computing SIGHASH digests and
//! delegating signature verification to a [`CryptoProvider`].

use crate::constants::{MAX_SCRIPT_BYTES, MAX_SCRIPT_ITEM_BYTES, MAX_SCRIPT_OPS, MAX_SCRIPT_STACK_ITEMS};
use crate::error::{ChainError, ErrorCode};
use crate::primitives::Transaction;
use crate::sighash::{sighash_digest, SighashType};
use ledger_crypto::CryptoProvider;

mod op {
    pub const PUSH_MAX_DIRECT: u8 = 0x4b;
    pub const PUSHDATA1: u8 = 0x4c;
    pub const PUSHDATA2: u8 = 0x4d;
    pub const PUSHDATA4: u8 = 0x4e;
    pub const OP_0: u8 = 0x00;
    pub const OP_1NEGATE: u8 = 0x4f;
    pub const OP_1: u8 = 0x51;
    pub const OP_16: u8 = 0x60;

    pub const OP_IF: u8 = 0x63;
    pub const OP_NOTIF: u8 = 0x64;
    pub const OP_ELSE: u8 = 0x67;
    pub const OP_ENDIF: u8 = 0x68;
    pub const OP_VERIFY: u8 = 0x69;
    pub const OP_RETURN: u8 = 0x6a;

    pub const OP_DUP: u8 = 0x76;
    pub const OP_EQUAL: u8 = 0x87;
    pub const OP_EQUALVERIFY: u8 = 0x88;

    pub const OP_NUMEQUAL: u8 = 0x9c;
    pub const OP_NUMEQUALVERIFY: u8 = 0x9d;
    pub const OP_NUMNOTEQUAL: u8 = 0x9e;
    pub const OP_LESSTHAN: u8 = 0x9f;
    pub const OP_GREATERTHAN: u8 = 0xa0;
    pub const OP_LESSTHANOREQUAL: u8 = 0xa1;
    pub const OP_GREATERTHANOREQUAL: u8 = 0xa2;

    pub const OP_HASH160: u8 = 0xa9;
    pub const OP_HASH256: u8 = 0xaa;
    pub const OP_CHECKSIG: u8 = 0xac;
    pub const OP_CHECKSIGVERIFY: u8 = 0xad;
    pub const OP_CHECKMULTISIG: u8 = 0xae;
    pub const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;

    pub const OP_CHECKLOCKTIMEVERIFY: u8 = 0xb1;
    pub const OP_CHECKSEQUENCEVERIFY: u8 = 0xb2;
}

/// Everything `CHECKSIG`/`CHECKLOCKTIMEVERIFY`/etc need about the
/// transaction being verified, beyond the script bytes themselves.
pub struct ScriptContext<'a> {
    pub tx: &'a Transaction,
    pub input_index: usize,
    pub input_value: i64,
}

type Stack = Vec<Vec<u8>>;

fn push_bounded(stack: &mut Stack, item: Vec<u8>) -> Result<(), ChainError> {
    if item.len() > MAX_SCRIPT_ITEM_BYTES {
        return Err(ChainError::new(ErrorCode::BadScript, "stack item exceeds size limit"));
    }
    if stack.len() >= MAX_SCRIPT_STACK_ITEMS {
        return Err(ChainError::new(ErrorCode::BadScript, "stack overflow"));
    }
    stack.push(item);
    Ok(())
}

fn pop(stack: &mut Stack) -> Result<Vec<u8>, ChainError> {
    stack
        .pop()
        .ok_or_else(|| ChainError::new(ErrorCode::BadScript, "stack underflow"))
}

fn cast_to_bool(item: &[u8]) -> bool {
    for (i, &b) in item.iter().enumerate() {
        if b != 0 {
            // Negative zero (0x80 in the last byte) is still falsy.
            if i == item.len() - 1 && b == 0x80 {
                return false;
            }
            return true;
        }
    }
    false
}

fn decode_script_num(item: &[u8]) -> Result<i64, ChainError> {
    if item.is_empty() {
        return Ok(0);
    }
    if item.len() > 8 {
        return Err(ChainError::new(ErrorCode::BadScript, "script number too wide"));
    }
    let mut result: i64 = 0;
    for (i, &b) in item.iter().enumerate() {
        result |= (b as i64) << (8 * i);
    }
    let last = item[item.len() - 1];
    if last & 0x80 != 0 {
        result &= !(0x80i64 << (8 * (item.len() - 1)));
        result = -result;
    }
    Ok(result)
}

fn encode_script_num(mut n: i64) -> Vec<u8> {
    if n == 0 {
        return Vec::new();
    }
    let negative = n < 0;
    if negative {
        n = -n;
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push((n & 0xff) as u8);
        n >>= 8;
    }
    if out.last().copied().unwrap_or(0) & 0x80 != 0 {
        out.push(if negative { 0x80 } else { 0x00 });
    } else if negative {
        let last = out.last_mut().unwrap();
        *last |= 0x80;
    }
    out
}

struct Interp<'a, 'b> {
    provider: &'a dyn CryptoProvider,
    ctx: &'a ScriptContext<'b>,
    stack: Stack,
    ops_executed: usize,
}

impl<'a, 'b> Interp<'a, 'b> {
    fn run(&mut self, script: &[u8]) -> Result<(), ChainError> {
        if script.len() > MAX_SCRIPT_BYTES {
            return Err(ChainError::new(ErrorCode::BadScript, "script exceeds byte limit"));
        }
        let mut pc = 0usize;
        // One entry per open IF/NOTIF: (branch_taken, seen_else).
        let mut cond_stack: Vec<(bool, bool)> = Vec::new();

        while pc < script.len() {
            let opcode = script[pc];
            pc += 1;

            let executing = cond_stack.iter().all(|&(taken, _)| taken);

            if opcode <= op::PUSH_MAX_DIRECT {
                let len = opcode as usize;
                let data = read_n(script, &mut pc, len)?;
                if executing {
                    push_bounded(&mut self.stack, data.to_vec())?;
                }
                continue;
            }
            match opcode {
                op::PUSHDATA1 => {
                    let len = read_n(script, &mut pc, 1)?[0] as usize;
                    let data = read_n(script, &mut pc, len)?;
                    if executing {
                        push_bounded(&mut self.stack, data.to_vec())?;
                    }
                    continue;
                }
                op::PUSHDATA2 => {
                    let b = read_n(script, &mut pc, 2)?;
                    let len = u16::from_le_bytes([b[0], b[1]]) as usize;
                    let data = read_n(script, &mut pc, len)?;
                    if executing {
                        push_bounded(&mut self.stack, data.to_vec())?;
                    }
                    continue;
                }
                op::PUSHDATA4 => {
                    let b = read_n(script, &mut pc, 4)?;
                    let len = u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize;
                    let data = read_n(script, &mut pc, len)?;
                    if executing {
                        push_bounded(&mut self.stack, data.to_vec())?;
                    }
                    continue;
                }
                _ => {}
            }

            self.ops_executed += 1;
            if self.ops_executed > MAX_SCRIPT_OPS {
                return Err(ChainError::new(ErrorCode::BadScript, "script exceeds op budget"));
            }

            if opcode == op::OP_IF || opcode == op::OP_NOTIF {
                let taken = if executing {
                    let v = cast_to_bool(&pop(&mut self.stack)?);
                    if opcode == op::OP_IF { v } else { !v }
                } else {
                    false
                };
                cond_stack.push((taken, false));
                continue;
            }
            if opcode == op::OP_ELSE {
                let top = cond_stack
                    .last_mut()
                    .ok_or_else(|| ChainError::new(ErrorCode::BadScript, "ELSE without IF"))?;
                if top.1 {
                    return Err(ChainError::new(ErrorCode::BadScript, "multiple ELSE"));
                }
                top.0 = !top.0;
                top.1 = true;
                continue;
            }
            if opcode == op::OP_ENDIF {
                cond_stack
                    .pop()
                    .ok_or_else(|| ChainError::new(ErrorCode::BadScript, "ENDIF without IF"))?;
                continue;
            }

            if !executing {
                continue;
            }

            match opcode {
                op::OP_0 => push_bounded(&mut self.stack, Vec::new())?,
                op::OP_1NEGATE => push_bounded(&mut self.stack, encode_script_num(-1))?,
                n if (op::OP_1..=op::OP_16).contains(&n) => {
                    push_bounded(&mut self.stack, encode_script_num((n - op::OP_1 + 1) as i64))?
                }
                op::OP_VERIFY => {
                    if !cast_to_bool(&pop(&mut self.stack)?) {
                        return Err(ChainError::new(ErrorCode::BadScript, "OP_VERIFY failed"));
                    }
                }
                op::OP_RETURN => {
                    return Err(ChainError::new(ErrorCode::BadScript, "OP_RETURN"));
                }
                op::OP_DUP => {
                    let top = self
                        .stack
                        .last()
                        .ok_or_else(|| ChainError::new(ErrorCode::BadScript, "stack underflow"))?
                        .clone();
                    push_bounded(&mut self.stack, top)?;
                }
                op::OP_EQUAL => {
                    let b = pop(&mut self.stack)?;
                    let a = pop(&mut self.stack)?;
                    push_bounded(&mut self.stack, encode_script_num((a == b) as i64))?;
                }
                op::OP_EQUALVERIFY => {
                    let b = pop(&mut self.stack)?;
                    let a = pop(&mut self.stack)?;
                    if a != b {
                        return Err(ChainError::new(ErrorCode::BadScript, "OP_EQUALVERIFY failed"));
                    }
                }
                op::OP_HASH160 => {
                    let a = pop(&mut self.stack)?;
                    push_bounded(&mut self.stack, self.provider.hash160(&a).to_vec())?;
                }
                op::OP_HASH256 => {
                    let a = pop(&mut self.stack)?;
                    push_bounded(&mut self.stack, self.provider.hash256(&a).to_vec())?;
                }
                op::OP_NUMEQUAL | op::OP_NUMEQUALVERIFY | op::OP_NUMNOTEQUAL
                | op::OP_LESSTHAN | op::OP_GREATERTHAN | op::OP_LESSTHANOREQUAL
                | op::OP_GREATERTHANOREQUAL => {
                    let b = decode_script_num(&pop(&mut self.stack)?)?;
                    let a = decode_script_num(&pop(&mut self.stack)?)?;
                    let result = match opcode {
                        op::OP_NUMEQUAL | op::OP_NUMEQUALVERIFY => a == b,
                        op::OP_NUMNOTEQUAL => a != b,
                        op::OP_LESSTHAN => a < b,
                        op::OP_GREATERTHAN => a > b,
                        op::OP_LESSTHANOREQUAL => a <= b,
                        op::OP_GREATERTHANOREQUAL => a >= b,
                        _ => unreachable!(),
                    };
                    if opcode == op::OP_NUMEQUALVERIFY {
                        if !result {
                            return Err(ChainError::new(
                                ErrorCode::BadScript,
                                "OP_NUMEQUALVERIFY failed",
                            ));
                        }
                    } else {
                        push_bounded(&mut self.stack, encode_script_num(result as i64))?;
                    }
                }
                op::OP_CHECKSIG | op::OP_CHECKSIGVERIFY => {
                    let pubkey = pop(&mut self.stack)?;
                    let sig_with_type = pop(&mut self.stack)?;
                    let ok = self.check_sig(script, &pubkey, &sig_with_type)?;
                    if opcode == op::OP_CHECKSIGVERIFY {
                        if !ok {
                            return Err(ChainError::new(ErrorCode::BadScript, "CHECKSIGVERIFY failed"));
                        }
                    } else {
                        push_bounded(&mut self.stack, encode_script_num(ok as i64))?;
                    }
                }
                op::OP_CHECKMULTISIG | op::OP_CHECKMULTISIGVERIFY => {
                    let ok = self.check_multisig(script)?;
                    if opcode == op::OP_CHECKMULTISIGVERIFY {
                        if !ok {
                            return Err(ChainError::new(
                                ErrorCode::BadScript,
                                "CHECKMULTISIGVERIFY failed",
                            ));
                        }
                    } else {
                        push_bounded(&mut self.stack, encode_script_num(ok as i64))?;
                    }
                }
                op::OP_CHECKLOCKTIMEVERIFY => {
                    let top = self
                        .stack
                        .last()
                        .ok_or_else(|| ChainError::new(ErrorCode::BadScript, "stack underflow"))?;
                    let locktime_req = decode_script_num(top)?;
                    if locktime_req < 0 {
                        return Err(ChainError::new(ErrorCode::BadScript, "CLTV: negative operand"));
                    }
                    let input = &self.ctx.tx.inputs[self.ctx.input_index];
                    if input.sequence == 0xffff_ffff {
                        return Err(ChainError::new(
                            ErrorCode::BadScript,
                            "CLTV: input sequence is final",
                        ));
                    }
                    let same_domain = (locktime_req < 500_000_000)
                        == ((self.ctx.tx.locktime as i64) < 500_000_000);
                    if !same_domain || (self.ctx.tx.locktime as i64) < locktime_req {
                        return Err(ChainError::new(ErrorCode::BadScript, "CLTV: not satisfied"));
                    }
                }
                op::OP_CHECKSEQUENCEVERIFY => {
                    let top = self
                        .stack
                        .last()
                        .ok_or_else(|| ChainError::new(ErrorCode::BadScript, "stack underflow"))?;
                    let req = decode_script_num(top)?;
                    if req < 0 {
                        return Err(ChainError::new(ErrorCode::BadScript, "CSV: negative operand"));
                    }
                    let seq = self.ctx.tx.inputs[self.ctx.input_index].sequence;
                    if req & (1 << 31) == 0 && seq & (1 << 31) != 0 {
                        return Err(ChainError::new(ErrorCode::BadScript, "CSV: not satisfied"));
                    }
                    let mask = (1u32 << 22) - 1;
                    let req_type = (req as u32) & (1 << 22);
                    let seq_type = seq & (1 << 22);
                    if req_type != seq_type || (seq & mask) < ((req as u32) & mask) {
                        return Err(ChainError::new(ErrorCode::BadScript, "CSV: not satisfied"));
                    }
                }
                _ => return Err(ChainError::new(ErrorCode::BadScript, "unsupported opcode")),
            }
        }

        if !cond_stack.is_empty() {
            return Err(ChainError::new(ErrorCode::BadScript, "unterminated IF"));
        }
        Ok(())
    }

    fn check_sig(
        &self,
        script_code: &[u8],
        pubkey: &[u8],
        sig_with_type: &[u8],
    ) -> Result<bool, ChainError> {
        if sig_with_type.is_empty() {
            return Ok(false);
        }
        let (sig_der, type_byte) = sig_with_type.split_at(sig_with_type.len() - 1);
        let sighash_type = SighashType::from_byte(type_byte[0])?;
        let digest = sighash_digest(
            self.provider,
            self.ctx.tx,
            self.ctx.input_index,
            script_code,
            sighash_type,
        )?;
        self.provider.verify_ecdsa_secp256k1(pubkey, &digest, sig_der)
    }

    fn check_multisig(&mut self, script_code: &[u8]) -> Result<bool, ChainError> {
        let n = decode_script_num(&pop(&mut self.stack)?)?;
        if !(0..=20).contains(&n) {
            return Err(ChainError::new(ErrorCode::BadScript, "CHECKMULTISIG: bad pubkey count"));
        }
        let mut pubkeys = Vec::with_capacity(n as usize);
        for _ in 0..n {
            pubkeys.push(pop(&mut self.stack)?);
        }
        let m = decode_script_num(&pop(&mut self.stack)?)?;
        if m < 0 || m > n {
            return Err(ChainError::new(ErrorCode::BadScript, "CHECKMULTISIG: bad sig count"));
        }
        let mut sigs = Vec::with_capacity(m as usize);
        for _ in 0..m {
            sigs.push(pop(&mut self.stack)?);
        }
        // Legacy off-by-one dummy element consumed by CHECKMULTISIG.
        pop(&mut self.stack)?;

        let mut pk_iter = pubkeys.iter().rev().peekable();
        for sig in sigs.iter().rev() {
            let mut matched = false;
            while let Some(pk) = pk_iter.next() {
                if self.check_sig(script_code, pk, sig)? {
                    matched = true;
                    break;
                }
            }
            if !matched {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn read_n<'a>(script: &'a [u8], pc: &mut usize, len: usize) -> Result<&'a [u8], ChainError> {
    let end = pc
        .checked_add(len)
        .ok_or_else(|| ChainError::new(ErrorCode::BadScript, "script: length overflow"))?;
    if end > script.len() {
        return Err(ChainError::new(ErrorCode::BadScript, "script: push truncated"));
    }
    let out = &script[*pc..end];
    *pc = end;
    Ok(out)
}

/// Standard forms recognized by the verifier: plain (script_pubkey executed
/// directly), P2PKH, and P2SH.
pub fn verify_script(
    provider: &dyn CryptoProvider,
    ctx: &ScriptContext<'_>,
    script_sig: &[u8],
    script_pubkey: &[u8],
) -> Result<(), ChainError> {
    let mut interp = Interp {
        provider,
        ctx,
        stack: Vec::new(),
        ops_executed: 0,
    };

    interp.run(script_sig)?;
    let stack_after_sig = interp.stack.clone();

    interp.run(script_pubkey)?;

    if is_p2sh(script_pubkey) {
        let redeem_script = stack_after_sig
            .last()
            .ok_or_else(|| ChainError::new(ErrorCode::BadScript, "P2SH: missing redeem script"))?
            .clone();
        let mut redeem_interp = Interp {
            provider,
            ctx,
            stack: stack_after_sig[..stack_after_sig.len() - 1].to_vec(),
            ops_executed: 0,
        };
        redeem_interp.run(&redeem_script)?;
        return finalize(&redeem_interp.stack);
    }

    finalize(&interp.stack)
}

fn finalize(stack: &Stack) -> Result<(), ChainError> {
    match stack.last() {
        Some(top) if cast_to_bool(top) => Ok(()),
        _ => Err(ChainError::new(ErrorCode::BadScript, "script did not end true")),
    }
}

fn is_p2sh(script_pubkey: &[u8]) -> bool {
    script_pubkey.len() == 23
        && script_pubkey[0] == op::OP_HASH160
        && script_pubkey[1] == 0x14
        && script_pubkey[22] == op::OP_EQUAL
}

/// Builds a standard P2PKH `scriptPubKey`: `DUP HASH160 <h160> EQUALVERIFY CHECKSIG`.
pub fn p2pkh_script(pubkey_hash160: &[u8; 20]) -> Vec<u8> {
    let mut out = vec![op::OP_DUP, op::OP_HASH160, 0x14];
    out.extend_from_slice(pubkey_hash160);
    out.push(op::OP_EQUALVERIFY);
    out.push(op::OP_CHECKSIG);
    out
}

/// Builds a standard P2SH `scriptPubKey`: `HASH160 <h160> EQUAL`.
pub fn p2sh_script(script_hash160: &[u8; 20]) -> Vec<u8> {
    let mut out = vec![op::OP_HASH160, 0x14];
    out.extend_from_slice(script_hash160);
    out.push(op::OP_EQUAL);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{OutPoint, TxIn, TxOut};
    use ledger_crypto::StdCryptoProvider;

    fn dummy_tx() -> Transaction {
        Transaction {
            version: 2,
            inputs: vec![TxIn {
                prevout: OutPoint { txid: [1u8; 32], index: 0 },
                script_sig: vec![],
                sequence: 0xffff_ffff,
            }],
            outputs: vec![TxOut { value: 100, script: vec![] }],
            locktime: 0,
        }
    }

    #[test]
    fn equal_true_path() {
        let p = StdCryptoProvider;
        let tx = dummy_tx();
        let ctx = ScriptContext { tx: &tx, input_index: 0, input_value: 0 };
        // push "a" twice, OP_EQUAL
        let script_sig = vec![0x01, b'a'];
        let script_pubkey = vec![0x01, b'a', op::OP_EQUAL];
        assert!(verify_script(&p, &ctx, &script_sig, &script_pubkey).is_ok());
    }

    #[test]
    fn equal_false_path_fails() {
        let p = StdCryptoProvider;
        let tx = dummy_tx();
        let ctx = ScriptContext { tx: &tx, input_index: 0, input_value: 0 };
        let script_sig = vec![0x01, b'a'];
        let script_pubkey = vec![0x01, b'b', op::OP_EQUAL];
        assert!(verify_script(&p, &ctx, &script_sig, &script_pubkey).is_err());
    }

    #[test]
    fn if_else_endif_selects_branch() {
        let p = StdCryptoProvider;
        let tx = dummy_tx();
        let ctx = ScriptContext { tx: &tx, input_index: 0, input_value: 0 };
        // push 0 (false) -> IF push "x" ELSE push "y" ENDIF -> compare to "y"
        let script_sig = vec![op::OP_0];
        let script_pubkey = vec![
            op::OP_IF, 0x01, b'x', op::OP_ELSE, 0x01, b'y', op::OP_ENDIF,
            0x01, b'y', op::OP_EQUAL,
        ];
        assert!(verify_script(&p, &ctx, &script_sig, &script_pubkey).is_ok());
    }

    #[test]
    fn p2pkh_round_trip_with_real_signature() {
        use secp256k1::{Message, PublicKey, SECP256K1, SecretKey};

        let p = StdCryptoProvider;
        let sk = SecretKey::from_slice(&[0x11; 32]).unwrap();
        let pk = PublicKey::from_secret_key(SECP256K1, &sk);
        let pk_bytes = pk.serialize();
        let h160 = p.hash160(&pk_bytes);

        let tx = dummy_tx();
        let script_pubkey = p2pkh_script(&h160);

        let digest = sighash_digest(&p, &tx, 0, &script_pubkey, SighashType::ALL).unwrap();
        let msg = Message::from_digest(digest);
        let sig = SECP256K1.sign_ecdsa(&msg, &sk);
        let mut sig_with_type = sig.serialize_der().to_vec();
        sig_with_type.push(SighashType::ALL.to_u32() as u8);

        let mut script_sig = Vec::new();
        script_sig.push(sig_with_type.len() as u8);
        script_sig.extend_from_slice(&sig_with_type);
        script_sig.push(pk_bytes.len() as u8);
        script_sig.extend_from_slice(&pk_bytes);

        let ctx = ScriptContext { tx: &tx, input_index: 0, input_value: 0 };
        assert!(verify_script(&p, &ctx, &script_sig, &script_pubkey).is_ok());
    }
}
