use std::fmt::Debug;

use crc::{CRC_64_XZ, Crc};
use serde::{Serialize, de::DeserializeOwned};

/// Checksum used to derive layers for keys without positional structure.
const LAYER_CRC: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);

/// A key in the tree.
///
/// The [`Ord`] implementation supplies the order relation; a tree permanently
/// binds to one key type and therefore one order. [`TreeKey::layer`] supplies
/// the key's ideal distance from the leaves, which is what makes the tree's
/// shape a pure function of its contents: for a uniformly sampled key,
/// `Pr[layer = l] = (1 - 1/B) * (1/B)^l`.
///
/// Implementations are provided for the primitive integers (layer is the
/// number of trailing zero base-`B` digits) and for `String`/`Vec<u8>` (layer
/// of a 64-bit checksum of the bytes). Custom key types implement `layer`
/// themselves, commonly by delegating to [`blob_layer`] over a serialized
/// form.
pub trait TreeKey:
    Clone + Debug + Ord + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// This key's ideal level in a tree with the given branch factor; zero is
    /// a leaf.
    fn layer(&self, branch_factor: u32) -> u8;
}

/// A value stored in the tree.
///
/// Values are compared structurally wherever the tree needs to distinguish an
/// overwrite from a no-op.
pub trait TreeValue:
    Clone + Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

impl<T> TreeValue for T where
    T: Clone + Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

/// The layer of an unsigned integer: how many trailing base-`B` digits are
/// zero.
pub fn uint_layer(mut value: u64, branch_factor: u32) -> u8 {
    let base = u64::from(branch_factor);
    let mut layer = 0;
    while value != 0 && value % base == 0 {
        value /= base;
        layer += 1;
    }
    layer
}

/// The layer of a signed integer.
pub fn int_layer(mut value: i64, branch_factor: u32) -> u8 {
    let base = i64::from(branch_factor);
    let mut layer = 0;
    while value != 0 && value % base == 0 {
        value /= base;
        layer += 1;
    }
    layer
}

/// The layer of an opaque byte string, derived from a 64-bit checksum so that
/// layers follow the same geometric distribution as integer keys.
pub fn blob_layer(bytes: &[u8], branch_factor: u32) -> u8 {
    uint_layer(LAYER_CRC.checksum(bytes), branch_factor)
}

macro_rules! uint_key {
    ( $($ty:ty),* ) => {
        $(
            impl TreeKey for $ty {
                fn layer(&self, branch_factor: u32) -> u8 {
                    uint_layer(u64::from(*self), branch_factor)
                }
            }
        )*
    };
}

macro_rules! int_key {
    ( $($ty:ty),* ) => {
        $(
            impl TreeKey for $ty {
                fn layer(&self, branch_factor: u32) -> u8 {
                    int_layer(i64::from(*self), branch_factor)
                }
            }
        )*
    };
}

uint_key!(u8, u16, u32, u64);
int_key!(i8, i16, i32, i64);

impl TreeKey for String {
    fn layer(&self, branch_factor: u32) -> u8 {
        blob_layer(self.as_bytes(), branch_factor)
    }
}

impl TreeKey for Vec<u8> {
    fn layer(&self, branch_factor: u32) -> u8 {
        blob_layer(self, branch_factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, rng};

    #[test]
    fn integer_layers_count_trailing_zero_digits() {
        assert_eq!(0u64.layer(16), 0);
        assert_eq!(1u64.layer(16), 0);
        assert_eq!(16u64.layer(16), 1);
        assert_eq!(160u64.layer(16), 1);
        assert_eq!(256u64.layer(16), 2);
        assert_eq!(4096u64.layer(16), 3);
        assert_eq!(17u64.layer(16), 0);

        assert_eq!(4u32.layer(4), 1);
        assert_eq!(16u32.layer(4), 2);
        assert_eq!((-16i64).layer(16), 1);
        assert_eq!((-3i32).layer(16), 0);
    }

    #[test]
    fn blob_layers_have_expected_distribution() {
        let branch_factor = 16;
        let rounds = 100_000;

        let mut elevated = 0u32;
        for _ in 0..rounds {
            let mut buffer = [0u8; 24];
            rng().fill(&mut buffer[..]);
            if blob_layer(&buffer, branch_factor) >= 1 {
                elevated += 1;
            }
        }
        // Pr[layer >= 1] = 1/B.
        let observed = f64::from(elevated) / f64::from(rounds);
        let expected = 1.0 / f64::from(branch_factor);
        assert!(
            (observed - expected).abs() < 0.01,
            "observed {observed}, expected {expected}"
        );
    }

    #[test]
    fn blob_layers_are_deterministic() {
        assert_eq!(blob_layer(b"some key", 16), blob_layer(b"some key", 16));
    }
}
