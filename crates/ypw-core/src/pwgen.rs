use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use thiserror::Error;

use crate::secure_buffer::{BufferError, SecureBuffer};

pub const LOWERCASE_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
pub const UPPERCASE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
pub const DIGIT_CHARS: &[u8] = b"0123456789";
pub const PUNCTUATION_CHARS: &[u8] = b".,;:-!?'";
pub const SPECIAL_CHARS: &[u8] = b"_+\"*%&/()[]={}<>";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeneratorError {
    #[error("password length must be at least 1, got {0}")]
    InvalidLength(i32),
    #[error("no character pool is enabled")]
    NoPools,
    #[error("randomness source failed")]
    RandomFailure,
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CharacterPools(u8);

impl CharacterPools {
    pub const NONE: Self = Self(0);
    pub const LOWERCASE: Self = Self(1);
    pub const UPPERCASE: Self = Self(1 << 1);
    pub const DIGITS: Self = Self(1 << 2);
    pub const PUNCTUATION: Self = Self(1 << 3);
    pub const SPECIAL: Self = Self(1 << 4);
    pub const ALL: Self = Self(0b1_1111);

    const MEMBERS: [(Self, &'static [u8]); 5] = [
        (Self::LOWERCASE, LOWERCASE_CHARS),
        (Self::UPPERCASE, UPPERCASE_CHARS),
        (Self::DIGITS, DIGIT_CHARS),
        (Self::PUNCTUATION, PUNCTUATION_CHARS),
        (Self::SPECIAL, SPECIAL_CHARS),
    ];

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn set(&mut self, pool: Self, enabled: bool) {
        if enabled {
            self.0 |= pool.0;
        } else {
            self.0 &= !pool.0;
        }
    }

    /// Character arrays of the enabled pools, in a fixed order.
    #[must_use]
    pub fn pools(self) -> Vec<&'static [u8]> {
        Self::MEMBERS
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, chars)| *chars)
            .collect()
    }

    #[must_use]
    pub fn alphabet(self) -> Vec<u8> {
        self.pools().concat()
    }
}

impl BitOr for CharacterPools {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for CharacterPools {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

pub trait RandomSource {
    fn fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), GeneratorError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RngEngine {
    #[default]
    Os,
    Thread,
    Seeded(u64),
}

impl RngEngine {
    #[must_use]
    pub fn source(self) -> Box<dyn RandomSource> {
        match self {
            Self::Os => Box::new(OsSource),
            Self::Thread => Box::new(RngSource(rand::rng())),
            Self::Seeded(seed) => Box::new(RngSource(StdRng::seed_from_u64(seed))),
        }
    }
}

struct OsSource;

impl RandomSource for OsSource {
    fn fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), GeneratorError> {
        getrandom::fill(dest).map_err(|_| GeneratorError::RandomFailure)
    }
}

struct RngSource<R>(R);

impl<R: RngCore> RandomSource for RngSource<R> {
    fn fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), GeneratorError> {
        self.0.fill_bytes(dest);
        Ok(())
    }
}

/// Draws passwords from the enabled character pools.
///
/// Each position takes two draws: one picks a pool, each enabled pool being
/// equally likely whatever its size, the second picks a character inside
/// that pool. Characters of small pools therefore show up more often than
/// their share of the combined alphabet.
pub struct PasswordGenerator {
    pools: CharacterPools,
    source: Box<dyn RandomSource>,
}

impl PasswordGenerator {
    #[must_use]
    pub fn new(pools: CharacterPools, engine: RngEngine) -> Self {
        Self::with_source(pools, engine.source())
    }

    #[must_use]
    pub fn with_source(pools: CharacterPools, source: Box<dyn RandomSource>) -> Self {
        Self { pools, source }
    }

    #[must_use]
    pub fn pools(&self) -> CharacterPools {
        self.pools
    }

    pub fn set_pools(&mut self, pools: CharacterPools) {
        self.pools = pools;
    }

    /// Exactly `length` bytes, no terminator.
    pub fn generate(&mut self, length: i32) -> Result<SecureBuffer, GeneratorError> {
        if length < 1 {
            return Err(GeneratorError::InvalidLength(length));
        }
        let pools = self.pools.pools();
        if pools.is_empty() {
            return Err(GeneratorError::NoPools);
        }

        let size = u32::try_from(length).map_err(|_| GeneratorError::InvalidLength(length))?;
        let mut password = SecureBuffer::allocate(size)?;
        for slot in password.as_mut_slice() {
            let pool = pools[self.sample_index(pools.len())?];
            *slot = pool[self.sample_index(pool.len())?];
        }
        Ok(password)
    }

    fn sample_index(&mut self, limit: usize) -> Result<usize, GeneratorError> {
        let limit = u64::try_from(limit).map_err(|_| GeneratorError::NoPools)?;
        if limit == 0 {
            return Err(GeneratorError::NoPools);
        }

        let max = u64::MAX - (u64::MAX % limit);
        loop {
            let mut bytes = [0_u8; 8];
            self.source.fill_bytes(&mut bytes)?;
            let candidate = u64::from_le_bytes(bytes);
            if candidate < max {
                return usize::try_from(candidate % limit).map_err(|_| GeneratorError::NoPools);
            }
        }
    }
}

impl fmt::Debug for PasswordGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordGenerator")
            .field("pools", &self.pools)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CharacterPools, DIGIT_CHARS, GeneratorError, PUNCTUATION_CHARS, PasswordGenerator,
        RandomSource, RngEngine, SPECIAL_CHARS,
    };

    /// Replays a fixed byte script, wrapping around at the end.
    struct Scripted {
        bytes: Vec<u8>,
        cursor: usize,
    }

    impl RandomSource for Scripted {
        fn fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), GeneratorError> {
            for byte in dest {
                *byte = self.bytes[self.cursor % self.bytes.len()];
                self.cursor += 1;
            }
            Ok(())
        }
    }

    fn word(value: u64) -> [u8; 8] {
        value.to_le_bytes()
    }

    #[test]
    fn non_positive_lengths_are_rejected() {
        let mut generator = PasswordGenerator::new(CharacterPools::ALL, RngEngine::Os);
        assert_eq!(
            generator.generate(0).map(|_| ()),
            Err(GeneratorError::InvalidLength(0))
        );
        assert_eq!(
            generator.generate(-1).map(|_| ()),
            Err(GeneratorError::InvalidLength(-1))
        );
    }

    #[test]
    fn empty_pool_selection_is_rejected() {
        let mut generator = PasswordGenerator::new(CharacterPools::NONE, RngEngine::Thread);
        assert_eq!(
            generator.generate(8).map(|_| ()),
            Err(GeneratorError::NoPools)
        );
    }

    #[test]
    fn output_has_exact_length_and_stays_in_alphabet() {
        for pools in [
            CharacterPools::LOWERCASE,
            CharacterPools::DIGITS | CharacterPools::SPECIAL,
            CharacterPools::ALL,
        ] {
            let alphabet = pools.alphabet();
            let mut generator = PasswordGenerator::new(pools, RngEngine::Seeded(7));
            for length in [1, 16, 255] {
                let password = generator.generate(length).expect("generate");
                assert_eq!(password.len(), usize::try_from(length).expect("positive"));
                assert!(password.iter().all(|byte| alphabet.contains(byte)));
            }
        }
    }

    #[test]
    fn seeded_engine_is_reproducible() {
        let first = PasswordGenerator::new(CharacterPools::ALL, RngEngine::Seeded(42))
            .generate(32)
            .expect("generate");
        let second = PasswordGenerator::new(CharacterPools::ALL, RngEngine::Seeded(42))
            .generate(32)
            .expect("generate");
        assert_eq!(first, second);
    }

    #[test]
    fn pool_is_drawn_before_character() {
        // Pools in order: DIGITS, SPECIAL. Draw 1 selects the pool, draw 2
        // the character within it.
        let script = [word(1), word(3), word(0), word(9)].concat();
        let mut generator = PasswordGenerator::with_source(
            CharacterPools::DIGITS | CharacterPools::SPECIAL,
            Box::new(Scripted {
                bytes: script,
                cursor: 0,
            }),
        );

        let password = generator.generate(2).expect("generate");
        assert_eq!(password.as_slice(), &[SPECIAL_CHARS[3], DIGIT_CHARS[9]]);
    }

    #[test]
    fn small_pools_are_over_represented() {
        let pools = CharacterPools::LOWERCASE | CharacterPools::PUNCTUATION;
        let mut generator = PasswordGenerator::new(pools, RngEngine::Seeded(1));
        let password = generator.generate(4000).expect("generate");

        let punctuation = password
            .iter()
            .filter(|byte| PUNCTUATION_CHARS.contains(*byte))
            .count();
        // Roughly half the positions come from the 8-character pool, well
        // above its 8/34 share of the alphabet.
        assert!((1600..=2400).contains(&punctuation), "{punctuation}");
    }

    #[test]
    fn pool_flags_combine() {
        let mut pools = CharacterPools::LOWERCASE | CharacterPools::DIGITS;
        assert!(pools.contains(CharacterPools::DIGITS));
        assert!(!pools.contains(CharacterPools::UPPERCASE));

        pools.set(CharacterPools::DIGITS, false);
        pools |= CharacterPools::SPECIAL;
        assert_eq!(pools, CharacterPools::LOWERCASE | CharacterPools::SPECIAL);
        assert_eq!(CharacterPools::ALL.pools().len(), 5);
        assert!(CharacterPools::NONE.is_empty());
    }
}
