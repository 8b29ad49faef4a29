// CLASSIFICATION: COMMUNITY
// Filename: strings.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

//! Packed argument and environment string lists.

use cohesix_procargs::Strings;

use crate::status::Status;

/// Ordered strings stored back to back, one trailing NUL each.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StringBlob {
    bytes: Vec<u8>,
    count: u32,
}

impl StringBlob {
    /// Pack `strings`. The list is walked twice, once to size the buffer
    /// and once to fill it; if the two walks disagree the partial buffer is
    /// discarded with `Inconsistent`. Interior NULs are `InvalidArgs`.
    pub fn build<I, S>(strings: I) -> Result<Self, Status>
    where
        I: IntoIterator<Item = S> + Clone,
        S: AsRef<[u8]>,
    {
        let mut total = 0usize;
        let mut count = 0u32;
        for item in strings.clone() {
            let item = item.as_ref();
            if item.contains(&0) {
                return Err(Status::InvalidArgs);
            }
            total = total
                .checked_add(item.len() + 1)
                .ok_or(Status::OutOfMemory)?;
            count = count.checked_add(1).ok_or(Status::OutOfRange)?;
        }

        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(total)
            .map_err(|_| Status::OutOfMemory)?;
        let mut copied = 0u32;
        for item in strings {
            let item = item.as_ref();
            if item.contains(&0) || bytes.len() + item.len() + 1 > total {
                return Err(Status::Inconsistent);
            }
            bytes.extend_from_slice(item);
            bytes.push(0);
            copied += 1;
        }
        if bytes.len() != total || copied != count {
            return Err(Status::Inconsistent);
        }
        Ok(Self { bytes, count })
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Packed length including terminators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Wire view used by the bootstrap encoders.
    #[must_use]
    pub fn strings(&self) -> Strings<'_> {
        Strings::new(&self.bytes, self.count)
    }

    /// Iterate the strings without terminators.
    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        let body = self.bytes.strip_suffix(&[0]).unwrap_or(&[]);
        body.split(|&b| b == 0).take(self.count as usize)
    }
}
