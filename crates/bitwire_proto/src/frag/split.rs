use std::iter::FusedIterator;

use bytes::Bytes;

use crate::{MAX_FRAGMENT_LEN, MAX_PACKET_LEN};

use super::{Fragment, FragmentHeader};

/// Error that occurs when using [`split`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SplitError {
    /// Attempted to split a message which was too big.
    #[error("message too big - {len} / {max} bytes")]
    MessageTooBig {
        /// Length of the message in bytes.
        len: usize,
        /// Maximum length of the message in bytes.
        max: usize,
    },
    /// Attempted to split an empty message.
    #[error("message is empty")]
    MessageEmpty,
}

/// Splits a message up into individual fragments and creates the appropriate
/// header for each.
///
/// Returns an iterator over the fragments: `⌈len / 1024⌉` of them, indexed
/// `0..n`, every one exactly [`MAX_FRAGMENT_LEN`] bytes except possibly the
/// last. Slicing a [`Bytes`] is cheap, so no payload data is copied.
///
/// # Errors
///
/// Errors if the message is empty or longer than [`MAX_PACKET_LEN`].
pub fn split(msg: Bytes) -> Result<Fragments, SplitError> {
    if msg.is_empty() {
        return Err(SplitError::MessageEmpty);
    }
    if msg.len() > MAX_PACKET_LEN {
        return Err(SplitError::MessageTooBig {
            len: msg.len(),
            max: MAX_PACKET_LEN,
        });
    }
    #[allow(clippy::cast_possible_truncation)] // at most MAX_FRAGMENTS
    let num_frags = msg.len().div_ceil(MAX_FRAGMENT_LEN) as u16;
    Ok(Fragments {
        msg,
        num_frags,
        index: 0,
    })
}

/// Iterator over the fragments of one message, created by [`split`].
#[derive(Debug, Clone)]
pub struct Fragments {
    msg: Bytes,
    num_frags: u16,
    index: u16,
}

impl Fragments {
    /// Gets the number of fragments that this iterator produces in total.
    #[must_use]
    pub const fn num_frags(&self) -> u16 {
        self.num_frags
    }
}

impl Iterator for Fragments {
    type Item = Fragment;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.num_frags {
            return None;
        }
        let start = usize::from(self.index) * MAX_FRAGMENT_LEN;
        let end = (start + MAX_FRAGMENT_LEN).min(self.msg.len());
        let payload = self.msg.slice(start..end);

        #[allow(clippy::cast_possible_truncation)] // index < num_frags <= 256
        let header = FragmentHeader {
            len: payload.len() as u32,
            index: self.index as u8,
            num_frags: self.num_frags,
        };
        self.index += 1;
        Some(Fragment { header, payload })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = usize::from(self.num_frags - self.index);
        (left, Some(left))
    }
}

impl ExactSizeIterator for Fragments {}

impl FusedIterator for Fragments {}
