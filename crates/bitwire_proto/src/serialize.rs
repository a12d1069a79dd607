//! Typed codecs layered on the [`bits`] writer and reader.
//!
//! Everything here is range-driven: both sides must agree on the bounds (and,
//! for compressed floats, the resolution) of every field, since the bounds
//! determine how many bits the field occupies on the wire. Nothing about the
//! bounds is transmitted.
//!
//! Out-of-range *arguments* are programmer errors and panic; out-of-range
//! *wire values* surface as [`BitsReadError::OutOfRange`] and are handled by
//! discarding the offending packet.
//!
//! [`bits`]: crate::bits

use glam::{Quat, Vec2, Vec3};

use crate::bits::{BitReader, BitWriter, BitsReadError, BitsWriteError, WORD_BITS};

/// Number of bits needed to represent every value in `[min, max]`.
///
/// Returns 0 when `min == max` - a field with a single legal value occupies
/// no space on the wire.
///
/// # Panics
///
/// Panics if `min > max`.
#[must_use]
pub const fn bits_required(min: i64, max: i64) -> usize {
    assert!(min <= max, "min must not exceed max");
    let range = max.abs_diff(min);
    (u64::BITS - range.leading_zeros()) as usize
}

/// Number of quantization steps and bits used by a compressed float with the
/// given bounds and resolution.
fn compressed_f32_params(min: f32, max: f32, resolution: f32) -> (u64, usize) {
    assert!(min < max, "min must be less than max");
    assert!(resolution > 0.0, "resolution must be positive");
    let delta = f64::from(max) - f64::from(min);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // ceil of a positive
    let max_index = (delta / f64::from(resolution)).ceil() as u64;
    #[allow(clippy::cast_possible_wrap)] // bounded by f64 precision, far below i64::MAX
    let bits = bits_required(0, max_index as i64);
    assert!(
        bits <= WORD_BITS,
        "resolution too fine for a 32-bit quantization index"
    );
    (max_index, bits)
}

impl BitWriter<'_> {
    /// Writes an integer known by both sides to lie in `[min, max]`, using
    /// exactly [`bits_required`]`(min, max)` bits.
    ///
    /// # Errors
    ///
    /// Errors if the underlying buffer is out of capacity.
    ///
    /// # Panics
    ///
    /// Panics if `min >= max`, if `value` lies outside `[min, max]`, or if
    /// the range spans more than 32 bits.
    pub fn write_int(&mut self, value: i64, min: i64, max: i64) -> Result<(), BitsWriteError> {
        assert!(min < max, "min must be less than max");
        assert!(
            (min..=max).contains(&value),
            "value {value} is outside the range [{min}, {max}]"
        );
        let bits = bits_required(min, max);
        assert!(bits <= WORD_BITS, "range [{min}, {max}] spans more than 32 bits");
        #[allow(clippy::cast_possible_truncation)] // relative < 2^bits <= 2^32
        let relative = value.abs_diff(min) as u32;
        self.write_bits(relative, bits)
    }

    /// Writes a float as its raw IEEE-754 bit pattern, using 32 bits.
    ///
    /// # Errors
    ///
    /// Errors if the underlying buffer is out of capacity.
    pub fn write_f32(&mut self, value: f32) -> Result<(), BitsWriteError> {
        self.write_bits(value.to_bits(), WORD_BITS)
    }

    /// Writes a float quantized onto `[min, max]` with the given resolution.
    ///
    /// `value` is clamped into the range before quantization. The reader must
    /// use identical `min`, `max` and `resolution`, and recovers the value to
    /// within `resolution` of the original.
    ///
    /// # Errors
    ///
    /// Errors if the underlying buffer is out of capacity.
    ///
    /// # Panics
    ///
    /// Panics if `min >= max`, if `resolution` is not positive, or if the
    /// quantization index would span more than 32 bits.
    pub fn write_compressed_f32(
        &mut self,
        value: f32,
        min: f32,
        max: f32,
        resolution: f32,
    ) -> Result<(), BitsWriteError> {
        let (max_index, bits) = compressed_f32_params(min, max, resolution);
        let delta = f64::from(max) - f64::from(min);
        let normalized = ((f64::from(value) - f64::from(min)) / delta).clamp(0.0, 1.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // <= max_index < 2^32
        let index = (normalized * max_index as f64 + 0.5).floor() as u32;
        self.write_bits(index, bits)
    }

    /// Writes a 2-vector as two compressed floats sharing one range and
    /// resolution.
    ///
    /// # Errors
    ///
    /// Errors if the underlying buffer is out of capacity.
    pub fn write_vec2(
        &mut self,
        value: Vec2,
        min: f32,
        max: f32,
        resolution: f32,
    ) -> Result<(), BitsWriteError> {
        self.write_compressed_f32(value.x, min, max, resolution)?;
        self.write_compressed_f32(value.y, min, max, resolution)
    }

    /// Writes a 3-vector as three compressed floats sharing one range and
    /// resolution.
    ///
    /// # Errors
    ///
    /// Errors if the underlying buffer is out of capacity.
    pub fn write_vec3(
        &mut self,
        value: Vec3,
        min: f32,
        max: f32,
        resolution: f32,
    ) -> Result<(), BitsWriteError> {
        self.write_compressed_f32(value.x, min, max, resolution)?;
        self.write_compressed_f32(value.y, min, max, resolution)?;
        self.write_compressed_f32(value.z, min, max, resolution)
    }

    /// Writes a quaternion as four raw floats, `x y z w`.
    ///
    /// # Errors
    ///
    /// Errors if the underlying buffer is out of capacity.
    pub fn write_quat(&mut self, value: Quat) -> Result<(), BitsWriteError> {
        self.write_f32(value.x)?;
        self.write_f32(value.y)?;
        self.write_f32(value.z)?;
        self.write_f32(value.w)
    }

    /// Writes a bool as a single bit.
    ///
    /// # Errors
    ///
    /// Errors if the underlying buffer is out of capacity.
    pub fn write_bool(&mut self, value: bool) -> Result<(), BitsWriteError> {
        self.write_bits(u32::from(value), 1)
    }

    /// Aligns the stream to a byte boundary, then writes a byte slice.
    ///
    /// # Errors
    ///
    /// Errors if the underlying buffer is out of capacity.
    pub fn write_byte_slice(&mut self, bytes: &[u8]) -> Result<(), BitsWriteError> {
        self.align()?;
        self.write_bytes(bytes)
    }

    /// Writes a length-prefixed string.
    ///
    /// The length occupies [`bits_required`]`(0, max_len)` bits, followed by
    /// alignment padding and the raw bytes.
    ///
    /// # Errors
    ///
    /// Errors if the underlying buffer is out of capacity.
    ///
    /// # Panics
    ///
    /// Panics if `value` is longer than `max_len` bytes, or if `max_len` is 0.
    pub fn write_str(&mut self, value: &str, max_len: usize) -> Result<(), BitsWriteError> {
        assert!(
            value.len() <= max_len,
            "string of {} bytes exceeds max_len {max_len}",
            value.len()
        );
        #[allow(clippy::cast_possible_wrap)] // lengths are far below i64::MAX
        self.write_int(value.len() as i64, 0, max_len as i64)?;
        self.write_byte_slice(value.as_bytes())
    }
}

impl BitReader<'_> {
    /// Reads an integer known by both sides to lie in `[min, max]`.
    ///
    /// # Errors
    ///
    /// Errors if the stream is exhausted, or if the decoded value falls
    /// outside `[min, max]` - which means the wire data is corrupt or
    /// hostile, since a well-formed stream cannot encode such a value
    /// unambiguously.
    ///
    /// # Panics
    ///
    /// Panics if `min >= max` or if the range spans more than 32 bits.
    pub fn read_int(&mut self, min: i64, max: i64) -> Result<i64, BitsReadError> {
        assert!(min < max, "min must be less than max");
        let bits = bits_required(min, max);
        assert!(bits <= WORD_BITS, "range [{min}, {max}] spans more than 32 bits");
        let relative = i64::from(self.read_bits(bits)?);
        let value = min + relative;
        if value > max {
            return Err(BitsReadError::OutOfRange { value, min, max });
        }
        Ok(value)
    }

    /// Reads a float written by [`BitWriter::write_f32`].
    ///
    /// # Errors
    ///
    /// Errors if the stream is exhausted.
    pub fn read_f32(&mut self) -> Result<f32, BitsReadError> {
        Ok(f32::from_bits(self.read_bits(WORD_BITS)?))
    }

    /// Reads a float written by [`BitWriter::write_compressed_f32`] with
    /// identical `min`, `max` and `resolution`.
    ///
    /// # Errors
    ///
    /// Errors if the stream is exhausted.
    ///
    /// # Panics
    ///
    /// Panics if `min >= max`, if `resolution` is not positive, or if the
    /// quantization index would span more than 32 bits.
    pub fn read_compressed_f32(
        &mut self,
        min: f32,
        max: f32,
        resolution: f32,
    ) -> Result<f32, BitsReadError> {
        let (max_index, bits) = compressed_f32_params(min, max, resolution);
        let index = self.read_bits(bits)?;
        let delta = f64::from(max) - f64::from(min);
        #[allow(clippy::cast_possible_truncation)] // back to the working precision
        let value = ((f64::from(index) / max_index as f64) * delta + f64::from(min)) as f32;
        Ok(value)
    }

    /// Reads a 2-vector written by [`BitWriter::write_vec2`].
    ///
    /// # Errors
    ///
    /// Errors if the stream is exhausted.
    pub fn read_vec2(&mut self, min: f32, max: f32, resolution: f32) -> Result<Vec2, BitsReadError> {
        Ok(Vec2 {
            x: self.read_compressed_f32(min, max, resolution)?,
            y: self.read_compressed_f32(min, max, resolution)?,
        })
    }

    /// Reads a 3-vector written by [`BitWriter::write_vec3`].
    ///
    /// # Errors
    ///
    /// Errors if the stream is exhausted.
    pub fn read_vec3(&mut self, min: f32, max: f32, resolution: f32) -> Result<Vec3, BitsReadError> {
        Ok(Vec3 {
            x: self.read_compressed_f32(min, max, resolution)?,
            y: self.read_compressed_f32(min, max, resolution)?,
            z: self.read_compressed_f32(min, max, resolution)?,
        })
    }

    /// Reads a quaternion written by [`BitWriter::write_quat`].
    ///
    /// # Errors
    ///
    /// Errors if the stream is exhausted.
    pub fn read_quat(&mut self) -> Result<Quat, BitsReadError> {
        let x = self.read_f32()?;
        let y = self.read_f32()?;
        let z = self.read_f32()?;
        let w = self.read_f32()?;
        Ok(Quat::from_xyzw(x, y, z, w))
    }

    /// Reads a bool written by [`BitWriter::write_bool`].
    ///
    /// # Errors
    ///
    /// Errors if the stream is exhausted.
    pub fn read_bool(&mut self) -> Result<bool, BitsReadError> {
        Ok(self.read_bits(1)? == 1)
    }

    /// Aligns the stream to a byte boundary, then reads `len` bytes into a
    /// fresh buffer.
    ///
    /// # Errors
    ///
    /// Errors if the stream is exhausted or the alignment padding is dirty.
    pub fn read_byte_slice(&mut self, len: usize) -> Result<Vec<u8>, BitsReadError> {
        self.align()?;
        let mut out = vec![0u8; len];
        self.read_bytes(&mut out)?;
        Ok(out)
    }

    /// Reads a string written by [`BitWriter::write_str`] with an identical
    /// `max_len`.
    ///
    /// # Errors
    ///
    /// Errors if the stream is exhausted, the length prefix is out of range,
    /// or the bytes are not valid UTF-8.
    ///
    /// # Panics
    ///
    /// Panics if `max_len` is 0.
    pub fn read_string(&mut self, max_len: usize) -> Result<String, BitsReadError> {
        #[allow(clippy::cast_possible_wrap)] // lengths are far below i64::MAX
        let len = self.read_int(0, max_len as i64)?;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // in [0, max_len]
        let bytes = self.read_byte_slice(len as usize)?;
        String::from_utf8(bytes).map_err(|_| BitsReadError::InvalidUtf8)
    }
}
