//! Firmware images as sparse address → byte maps.
use std::collections::BTreeMap;

/// Read-only view of a firmware image.
///
/// Addresses in `[min_address, max_address]` without a byte are holes; the
/// programmer fills them with the erased value.
pub trait ImageSource {
    fn min_address(&self) -> u32;
    fn max_address(&self) -> u32;
    fn byte_at(&self, address: u32) -> Option<u8>;
}

impl<I: ImageSource + ?Sized> ImageSource for &I {
    fn min_address(&self) -> u32 {
        (**self).min_address()
    }

    fn max_address(&self) -> u32 {
        (**self).max_address()
    }

    fn byte_at(&self, address: u32) -> Option<u8> {
        (**self).byte_at(address)
    }
}

/// Owned sparse image, as loaded from an Intel HEX or ELF file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SparseImage {
    bytes: BTreeMap<u32, u8>,
}

impl SparseImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Contiguous image starting at `base`.
    pub fn from_binary(base: u32, data: &[u8]) -> Self {
        let mut image = SparseImage::new();
        image.insert(base, data);
        image
    }

    /// Place `data` at `address`. Later writes win on overlap; bytes that would
    /// land past the 32-bit address space are dropped.
    pub fn insert(&mut self, address: u32, data: &[u8]) {
        for (addr, &b) in (address..=u32::MAX).zip(data) {
            self.bytes.insert(addr, b);
        }
        if (data.len() as u64) > (u32::MAX - address) as u64 + 1 {
            log::warn!(
                "section at {:#010x} runs past the end of the address space, truncated",
                address
            );
        }
    }

    pub fn set(&mut self, address: u32, value: u8) {
        self.bytes.insert(address, value);
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Number of defined bytes, not counting holes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Span from the lowest to the highest defined byte, holes included.
    pub fn span(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.max_address() as u64 - self.min_address() as u64 + 1
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u8)> + '_ {
        self.bytes.iter().map(|(&a, &b)| (a, b))
    }
}

impl ImageSource for SparseImage {
    /// `u32::MAX` when empty, so empty images fail the bounds check.
    fn min_address(&self) -> u32 {
        self.bytes.keys().next().copied().unwrap_or(u32::MAX)
    }

    /// `0` when empty.
    fn max_address(&self) -> u32 {
        self.bytes.keys().next_back().copied().unwrap_or(0)
    }

    fn byte_at(&self, address: u32) -> Option<u8> {
        self.bytes.get(&address).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_follow_defined_bytes() {
        let mut image = SparseImage::new();
        image.insert(0x0800_0010, &[1, 2, 3]);
        image.set(0x0800_0100, 0xaa);
        assert_eq!(image.min_address(), 0x0800_0010);
        assert_eq!(image.max_address(), 0x0800_0100);
        assert_eq!(image.len(), 4);
        assert_eq!(image.span(), 0xf1);
        assert_eq!(image.byte_at(0x0800_0011), Some(2));
        assert_eq!(image.byte_at(0x0800_0013), None);
    }

    #[test]
    fn empty_image_has_inverted_bounds() {
        let image = SparseImage::new();
        assert!(image.is_empty());
        assert!(image.min_address() > image.max_address());
        assert_eq!(image.span(), 0);
    }

    #[test]
    fn insert_truncates_at_top_of_address_space() {
        let image = SparseImage::from_binary(0xffff_fffe, &[1, 2, 3, 4]);
        assert_eq!(image.len(), 2);
        assert_eq!(image.max_address(), u32::MAX);
    }

    #[test]
    fn later_insert_wins() {
        let mut image = SparseImage::from_binary(0x100, &[0; 4]);
        image.insert(0x102, &[9, 9]);
        let bytes: Vec<_> = image.iter().map(|(_, b)| b).collect();
        assert_eq!(bytes, vec![0, 0, 9, 9]);
    }
}
