//! Cumulative chain work, the tie-breaker for best-chain selection.

use num_bigint::BigUint;
use num_traits::Zero;

use crate::error::ChainError;
use crate::pow::work_from_bits;

pub fn chain_work_from_bits(header_bits: &[u32]) -> Result<BigUint, ChainError> {
    let mut total = BigUint::zero();
    for bits in header_bits {
        total += work_from_bits(*bits)?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_per_header_work() {
        let bits = [0x1d00ffffu32, 0x1d00ffff];
        let total = chain_work_from_bits(&bits).unwrap();
        let single = chain_work_from_bits(&bits[..1]).unwrap();
        assert_eq!(total, &single * 2u32);
    }
}
