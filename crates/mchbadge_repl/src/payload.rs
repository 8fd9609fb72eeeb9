//! Text encoding and chunking of the bitstream.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

/// Standard-alphabet base64 with `=` padding and no line breaks.
pub fn encode(payload: &[u8]) -> String {
    STANDARD.encode(payload)
}

pub fn decode(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(encoded.trim_end())
}

/// Split `encoded` into consecutive pieces of at most `size` bytes.
///
/// Concatenating the pieces in order yields `encoded` again. A cut never
/// lands inside a multi-byte character.
pub fn split(encoded: &str, size: usize) -> Vec<&str> {
    let size = size.max(1);
    let mut pieces = Vec::with_capacity(encoded.len().div_ceil(size));
    let mut rest = encoded;
    while !rest.is_empty() {
        let mut at = size.min(rest.len());
        while !rest.is_char_boundary(at) {
            at += 1;
        }
        let (head, tail) = rest.split_at(at);
        pieces.push(head);
        rest = tail;
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 + 7) as u8).collect()
    }

    #[test]
    fn round_trip_through_chunks() {
        for len in [0, 1, 2, 3, 10, 1000, 4096 + 17] {
            let payload = sample(len);
            let encoded = encode(&payload);
            let joined: String = split(&encoded, 64).concat();
            assert_eq!(decode(&joined).unwrap(), payload, "len {len}");
        }
    }

    #[test]
    fn split_is_total_and_ordered() {
        let encoded = encode(&sample(301));
        for size in [1, 3, 4, 7, 64, 384, encoded.len(), encoded.len() + 1] {
            let pieces = split(&encoded, size);
            assert_eq!(pieces.concat(), encoded);
            assert_eq!(pieces.len(), encoded.len().div_ceil(size));
            assert!(pieces.iter().all(|p| !p.is_empty() && p.len() <= size));
        }
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(split("", 16).is_empty());
        assert_eq!(encode(&[]), "");
    }

    #[test]
    fn encoding_is_single_line_ascii() {
        let encoded = encode(&sample(2000));
        assert!(encoded.is_ascii());
        assert!(!encoded.contains('\n'));
        assert!(!encoded.contains('\''));
    }

    #[test]
    fn split_respects_char_boundaries() {
        let pieces = split("aé", 2);
        assert_eq!(pieces, vec!["aé"]);
    }
}
