use derive_more::{Constructor, Display};
use std::convert::TryFrom;

use crate::error::Error;

const C1: i64 = 0x87c3_7b91_1142_53d5_u64 as i64;
const C2: i64 = 0x4cf5_ad43_2745_937f_u64 as i64;

/// A token on the ring. Only Murmur3 tokens are supported for now.
#[derive(
    Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Default, Debug, Hash, Constructor, Display,
)]
pub struct Murmur3Token {
    pub value: i64,
}

impl Murmur3Token {
    /// Computes the token of a serialized partition key the same way the cluster's
    /// `Murmur3Partitioner` does: the first half of the x64 128-bit Murmur3 hash, seed 0, with
    /// tail bytes sign-extended.
    pub fn generate(routing_key: &[u8]) -> Self {
        let length = routing_key.len();
        let block_count = length / 16;

        let mut h1: i64 = 0;
        let mut h2: i64 = 0;

        for block in routing_key.chunks_exact(16) {
            let mut k1 = read_block(&block[..8]);
            let mut k2 = read_block(&block[8..]);

            k1 = k1.wrapping_mul(C1);
            k1 = rotl(k1, 31);
            k1 = k1.wrapping_mul(C2);
            h1 ^= k1;

            h1 = rotl(h1, 27);
            h1 = h1.wrapping_add(h2);
            h1 = h1.wrapping_mul(5).wrapping_add(0x52dc_e729);

            k2 = k2.wrapping_mul(C2);
            k2 = rotl(k2, 33);
            k2 = k2.wrapping_mul(C1);
            h2 ^= k2;

            h2 = rotl(h2, 31);
            h2 = h2.wrapping_add(h1);
            h2 = h2.wrapping_mul(5).wrapping_add(0x3849_5ab5);
        }

        let tail = &routing_key[block_count * 16..];
        let mut k1: i64 = 0;
        let mut k2: i64 = 0;

        if tail.len() > 8 {
            for (index, byte) in tail[8..].iter().enumerate() {
                k2 ^= (*byte as i8 as i64) << (index * 8);
            }

            k2 = k2.wrapping_mul(C2);
            k2 = rotl(k2, 33);
            k2 = k2.wrapping_mul(C1);
            h2 ^= k2;
        }

        if !tail.is_empty() {
            for (index, byte) in tail.iter().take(8).enumerate() {
                k1 ^= (*byte as i8 as i64) << (index * 8);
            }

            k1 = k1.wrapping_mul(C1);
            k1 = rotl(k1, 31);
            k1 = k1.wrapping_mul(C2);
            h1 ^= k1;
        }

        h1 ^= length as i64;
        h2 ^= length as i64;

        h1 = h1.wrapping_add(h2);
        h2 = h2.wrapping_add(h1);

        h1 = fmix(h1);
        h2 = fmix(h2);

        h1 = h1.wrapping_add(h2);

        // i64::MIN is reserved by the partitioner as the minimum token
        if h1 == i64::MIN {
            Murmur3Token::new(i64::MAX)
        } else {
            Murmur3Token::new(h1)
        }
    }
}

#[inline]
fn read_block(bytes: &[u8]) -> i64 {
    let mut block = [0u8; 8];
    block.copy_from_slice(bytes);
    i64::from_le_bytes(block)
}

#[inline]
fn rotl(value: i64, shift: u32) -> i64 {
    (value as u64).rotate_left(shift) as i64
}

#[inline]
fn fmix(mut k: i64) -> i64 {
    k ^= ((k as u64) >> 33) as i64;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd_u64 as i64);
    k ^= ((k as u64) >> 33) as i64;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53_u64 as i64);
    k ^= ((k as u64) >> 33) as i64;
    k
}

impl TryFrom<String> for Murmur3Token {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value
            .parse()
            .map_err(|error| format!("Error parsing token: {}", error).into())
            .map(Murmur3Token::new)
    }
}

impl From<i64> for Murmur3Token {
    fn from(value: i64) -> Self {
        Murmur3Token::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::Murmur3Token;
    use std::convert::TryFrom;

    #[test]
    fn should_generate_partitioner_tokens() {
        for (key, token) in [
            ("test", -6017608668500074083),
            ("xd", 4507812186440344727),
            ("primary_key", -1632642444691073360),
            ("kremówki", 4354931215268080151),
        ] {
            assert_eq!(
                Murmur3Token::generate(key.as_bytes()),
                Murmur3Token::new(token),
                "{key}"
            );
        }
    }

    #[test]
    fn should_generate_stable_tokens_for_long_keys() {
        let key = b"a partition key spanning more than one sixteen byte block";
        assert_eq!(Murmur3Token::generate(key), Murmur3Token::generate(key));
        assert_ne!(
            Murmur3Token::generate(key),
            Murmur3Token::generate(&key[..key.len() - 1])
        );
    }

    #[test]
    fn should_parse_token_strings() {
        assert_eq!(
            Murmur3Token::try_from("-42".to_string()).unwrap(),
            Murmur3Token::new(-42)
        );
        assert!(Murmur3Token::try_from("token".to_string()).is_err());
    }
}
