//! See [`Seq`].

use std::{
    cmp::Ordering,
    ops::{Add, AddAssign, Sub, SubAssign},
};

use arbitrary::Arbitrary;

use crate::bits::{BitReader, BitWriter, BitsReadError, BitsWriteError};

/// Half of the sequence number space.
///
/// Two sequence numbers this far apart sit exactly opposite each other on the
/// wrap-around circle.
pub const HALF_RANGE: u32 = 32_768;

/// Sequence number uniquely identifying a logical message sent across a
/// network.
///
/// The number is stored internally as a [`u16`], which means it will wrap
/// around fairly quickly as many messages can be sent per second. Users of a
/// sequence number should take this into account, and use the custom
/// [`Seq::cmp`] implementation which takes wraparound into consideration.
///
/// # Wraparound
///
/// The sequence number can be visualized as a circle, where [`u16::MAX`] is
/// right before `0`, `0` is before `1`, etc.:
///
/// ```text
///     65534  65535    0      1      2
/// ... --|------|------|------|------|-- ...
/// ```
///
/// `a` is considered newer than `b` when the shorter way around the circle
/// from `b` to `a` runs forwards: `a > b` exactly when
/// `(a - b) mod 65536` lies in `[1, 32768]`. Exactly one of `a > b`, `b > a`
/// and `a == b` holds for every pair, including pairs at distance exactly
/// [`HALF_RANGE`].
///
/// [Addition](Add) and [subtraction](Sub) always wrap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Arbitrary)]
pub struct Seq(pub u16);

impl Seq {
    /// Sequence number with value [`u16::MAX`].
    pub const MAX: Self = Self(u16::MAX);

    /// Number of bits a sequence number occupies on the wire.
    pub const ENCODE_BITS: usize = 16;

    /// Returns the current value and increments `self`, wrapping.
    #[must_use]
    pub fn get_inc(&mut self) -> Self {
        let cur = *self;
        self.0 = self.0.wrapping_add(1);
        cur
    }

    /// Gets the signed number of sequence values "elapsed" between `self` and
    /// `rhs`, in `(-32768, 32768]`.
    ///
    /// This is effectively `rhs - self` reduced the shorter way around the
    /// circle. A positive result means `rhs` is newer than `self`.
    ///
    /// # Example
    ///
    /// ```
    /// # use bitwire_proto::seq::Seq;
    /// assert_eq!(Seq(0).dist_to(Seq(0)), 0);
    /// assert_eq!(Seq(3).dist_to(Seq(5)), 2);
    /// assert_eq!(Seq(5).dist_to(Seq(3)), -2);
    ///
    /// // across the wrap point
    /// assert_eq!(Seq::MAX.dist_to(Seq(0)), 1);
    /// assert_eq!(Seq(0).dist_to(Seq::MAX), -1);
    ///
    /// // the exact opposite point is reported as ahead, not behind
    /// assert_eq!(Seq(0).dist_to(Seq(32_768)), 32_768);
    /// ```
    #[must_use]
    pub const fn dist_to(self, rhs: Self) -> i32 {
        #[allow(clippy::cast_possible_wrap)] // forward < 65536
        let forward = rhs.0.wrapping_sub(self.0) as i32;
        if forward > HALF_RANGE as i32 {
            forward - 65_536
        } else {
            forward
        }
    }

    /// Writes this sequence number as [`Seq::ENCODE_BITS`] bits.
    ///
    /// # Errors
    ///
    /// Errors if the underlying buffer is out of capacity.
    pub fn encode(self, w: &mut BitWriter) -> Result<(), BitsWriteError> {
        w.write_bits(u32::from(self.0), Self::ENCODE_BITS)
    }

    /// Reads a sequence number written by [`Seq::encode`].
    ///
    /// # Errors
    ///
    /// Errors if the stream is exhausted.
    pub fn decode(r: &mut BitReader) -> Result<Self, BitsReadError> {
        #[allow(clippy::cast_possible_truncation)] // 16-bit read
        Ok(Self(r.read_bits(Self::ENCODE_BITS)? as u16))
    }
}

impl Ord for Seq {
    /// Logically compares `self` to `other` in a way that respects
    /// wrap-around of sequence numbers, treating e.g. `0 cmp 1` as [`Less`]
    /// (as expected), but `0 cmp 65535` as [`Greater`].
    ///
    /// The forward branch is inclusive at [`HALF_RANGE`] and the wrapped
    /// branch is strict, so the trichotomy law holds even for pairs at
    /// distance exactly [`HALF_RANGE`]. Note that, as with any circular
    /// order, transitivity is only meaningful for values clustered within
    /// half the range of each other.
    ///
    /// [`Greater`]: Ordering::Greater
    /// [`Less`]: Ordering::Less
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (u32::from(self.0), u32::from(other.0));
        if a == b {
            Ordering::Equal
        } else if (a > b && a - b <= HALF_RANGE) || (a < b && b - a > HALF_RANGE) {
            Ordering::Greater
        } else {
            Ordering::Less
        }
    }
}

impl PartialOrd for Seq {
    /// See [`Seq::cmp`].
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Add for Seq {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0.wrapping_add(rhs.0))
    }
}

impl AddAssign for Seq {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Seq {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0.wrapping_sub(rhs.0))
    }
}

impl SubAssign for Seq {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

#[cfg(test)]
mod tests {
    use crate::bits::BitReader;

    use super::*;

    #[test]
    fn encode_decode() {
        let v = Seq(1234);
        let mut words = [0u32; 1];
        let mut w = BitWriter::new(&mut words);
        v.encode(&mut w).unwrap();
        assert_eq!(Seq::ENCODE_BITS, w.bits_written());
        w.flush();

        let mut r = BitReader::new(&words);
        assert_eq!(v, Seq::decode(&mut r).unwrap());
    }

    #[test]
    fn increasing_wraparound() {
        assert!(Seq(0) < Seq(1));
        assert!(Seq(1) < Seq(2));
        assert!(Seq(u16::MAX - 3) < Seq(u16::MAX));
        assert!(Seq(u16::MAX - 1) < Seq(u16::MAX));

        assert!(Seq(u16::MAX) < Seq(0));
        assert!(Seq(u16::MAX) < Seq(1));
        assert!(Seq(u16::MAX - 3) < Seq(2));
    }

    #[test]
    fn trichotomy_holds_everywhere() {
        // sweep pairs around every interesting boundary, including the exact
        // half-range point where naive comparisons break down
        let interesting = [
            0u16, 1, 2, 255, 256, 32_766, 32_767, 32_768, 32_769, 65_533, 65_534, 65_535,
        ];
        for &a in &interesting {
            for &b in &interesting {
                let (a, b) = (Seq(a), Seq(b));
                let gt = a > b;
                let lt = a < b;
                let eq = a == b;
                assert_eq!(
                    1,
                    u8::from(gt) + u8::from(lt) + u8::from(eq),
                    "a = {a:?}, b = {b:?}"
                );
            }
        }
    }

    #[test]
    fn half_range_boundary_is_ahead() {
        assert!(Seq(32_768) > Seq(0));
        assert!(Seq(0) < Seq(32_768));

        assert_eq!(32_768, Seq(0).dist_to(Seq(32_768)));
        assert_eq!(32_768, Seq(32_768).dist_to(Seq(0)));
    }

    #[test]
    fn dist_to_reduces_modulo() {
        assert_eq!(0, Seq(7).dist_to(Seq(7)));
        assert_eq!(5, Seq(0).dist_to(Seq(5)));
        assert_eq!(-5, Seq(5).dist_to(Seq(0)));
        assert_eq!(10, Seq(65_530).dist_to(Seq(4)));
        assert_eq!(-10, Seq(4).dist_to(Seq(65_530)));
    }

    #[test]
    fn get_inc_wraps() {
        let mut seq = Seq(u16::MAX);
        assert_eq!(Seq(u16::MAX), seq.get_inc());
        assert_eq!(Seq(0), seq.get_inc());
        assert_eq!(Seq(1), seq);
    }
}
