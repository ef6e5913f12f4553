//! CompactSize ("varint") encoding used throughout the wire format.

use crate::error::{ChainError, ErrorCode};

pub fn compact_size_encode(n: u64) -> Vec<u8> {
    if n < 0xfd {
        vec![n as u8]
    } else if n <= 0xffff {
        let mut v = vec![0xfd];
        v.extend_from_slice(&(n as u16).to_le_bytes());
        v
    } else if n <= 0xffff_ffff {
        let mut v = vec![0xfe];
        v.extend_from_slice(&(n as u32).to_le_bytes());
        v
    } else {
        let mut v = vec![0xff];
        v.extend_from_slice(&n.to_le_bytes());
        v
    }
}

/// Decodes a CompactSize integer from the front of `buf`, returning the
/// value and the number of bytes consumed. Rejects non-minimal encodings.
pub fn compact_size_decode(buf: &[u8]) -> Result<(u64, usize), ChainError> {
    let tag = *buf
        .first()
        .ok_or_else(|| ChainError::new(ErrorCode::BadTx, "compact size: truncated"))?;

    let (value, consumed, minimal) = match tag {
        0x00..=0xfc => (tag as u64, 1, true),
        0xfd => {
            let b = buf
                .get(1..3)
                .ok_or_else(|| ChainError::new(ErrorCode::BadTx, "compact size: truncated"))?;
            let v = u16::from_le_bytes([b[0], b[1]]) as u64;
            (v, 3, v >= 0xfd)
        }
        0xfe => {
            let b = buf
                .get(1..5)
                .ok_or_else(|| ChainError::new(ErrorCode::BadTx, "compact size: truncated"))?;
            let v = u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as u64;
            (v, 5, v > 0xffff)
        }
        0xff => {
            let b = buf
                .get(1..9)
                .ok_or_else(|| ChainError::new(ErrorCode::BadTx, "compact size: truncated"))?;
            let mut arr = [0u8; 8];
            arr.copy_from_slice(b);
            let v = u64::from_le_bytes(arr);
            (v, 9, v > 0xffff_ffff)
        }
    };

    if !minimal {
        return Err(ChainError::new(
            ErrorCode::BadTx,
            "compact size: non-minimal encoding",
        ));
    }

    Ok((value, consumed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_all_tiers() {
        for n in [0u64, 1, 0xfc, 0xfd, 0xffff, 0x1_0000, 0xffff_ffff, 0x1_0000_0000] {
            let enc = compact_size_encode(n);
            let (got, consumed) = compact_size_decode(&enc).unwrap();
            assert_eq!(got, n);
            assert_eq!(consumed, enc.len());
        }
    }

    #[test]
    fn rejects_non_minimal() {
        let bytes = [0xfd, 0x01, 0x00];
        assert!(compact_size_decode(&bytes).is_err());
    }
}
