//! Flash images.
//!
//! An [`Image`] is a raw binary and the flash address it is written to.
//! Images meant to boot directly carry a checksum in the interrupt vector
//! table, which the boot ROM validates:
//!
//! ```text
//! offset  0x00  0x04  0x08  0x0C  0x10  0x14  0x18  0x1C
//!        +-----+-----+-----+-----+-----+-----+-----+-----+
//!        | v0  | v1  | v2  | v3  | v4  | v5  | v6  | v7  |
//!        +-----+-----+-----+-----+-----+-----+-----+-----+
//!                                   ARM7 ^      Cortex ^
//! ```
//!
//! The checksum slot is chosen so the table sums to zero modulo 2^32.

use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use log::debug;
use std::path::Path;

/// Number of 32-bit words in the vector table.
pub const VECTOR_COUNT: usize = 8;

/// Size of the vector table in bytes.
pub const VECTOR_TABLE_SIZE: usize = VECTOR_COUNT * 4;

/// Fill byte used when padding images (erased flash state).
pub const PAD_BYTE: u8 = 0xFF;

/// Binary image bound to a flash address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    base_address: u32,
    data: Vec<u8>,
}

impl Image {
    /// Create an image from raw bytes.
    pub fn new(base_address: u32, data: Vec<u8>) -> Self {
        Self { base_address, data }
    }

    /// Load a raw binary file.
    pub fn from_file<P: AsRef<Path>>(path: P, base_address: u32) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading image from: {}", path.display());

        let data = std::fs::read(path)?;
        if data.is_empty() {
            return Err(Error::InvalidImage(format!("{} is empty", path.display())));
        }

        Ok(Self::new(base_address, data))
    }

    /// Flash address of the first byte.
    pub fn base_address(&self) -> u32 {
        self.base_address
    }

    /// Image bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image has no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Address of the last byte, or `None` for an empty image or one that
    /// runs past the 32-bit address space.
    pub fn last_address(&self) -> Option<u32> {
        let len = u32::try_from(self.data.len()).ok()?;
        self.base_address
            .checked_add(len.checked_sub(1)?)
    }

    /// Consume the image and return its bytes.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Write the boot checksum into vector slot `vector` and return it.
    ///
    /// Slots up to and including `vector` take part in the sum; slot 5
    /// (the ARM7 layout) sums the whole table.
    pub fn patch_boot_checksum(&mut self, vector: usize) -> Result<u32> {
        if self.data.len() < VECTOR_TABLE_SIZE {
            return Err(Error::InvalidImage(format!(
                "image of {} bytes has no vector table",
                self.data.len()
            )));
        }
        if vector >= VECTOR_COUNT {
            return Err(Error::InvalidImage(format!(
                "checksum vector {vector} is outside the vector table"
            )));
        }

        let mut reader = &self.data[..VECTOR_TABLE_SIZE];
        let mut words = [0u32; VECTOR_COUNT];
        for word in &mut words {
            *word = reader.read_u32::<LittleEndian>()?;
        }

        let sum = words
            .iter()
            .enumerate()
            .filter(|&(i, _)| vector == 5 || i <= vector)
            .fold(0u32, |sum, (_, &word)| sum.wrapping_add(word))
            .wrapping_sub(words[vector]);
        let csum = sum.wrapping_neg();

        LittleEndian::write_u32(&mut self.data[vector * 4..vector * 4 + 4], csum);
        Ok(csum)
    }

    /// Pad with [`PAD_BYTE`] to a multiple of `block` bytes and return the
    /// number of bytes added.
    pub fn pad_to(&mut self, block: usize) -> usize {
        if block == 0 {
            return 0;
        }
        let padded = self.data.len().next_multiple_of(block);
        let added = padded - self.data.len();
        self.data.resize(padded, PAD_BYTE);
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vectors(image: &Image) -> Vec<u32> {
        image.data()[..VECTOR_TABLE_SIZE]
            .chunks(4)
            .map(LittleEndian::read_u32)
            .collect()
    }

    #[test]
    fn test_zero_table_checksum_is_zero() {
        let mut image = Image::new(0, vec![0; 64]);
        assert_eq!(image.patch_boot_checksum(5).unwrap(), 0);
        assert!(image.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_patched_table_sums_to_zero() {
        let data: Vec<u8> = (0..64u8).map(|b| b.wrapping_mul(37)).collect();
        let mut image = Image::new(0, data.clone());
        image.patch_boot_checksum(5).unwrap();

        let sum = vectors(&image)
            .iter()
            .fold(0u32, |s, &w| s.wrapping_add(w));
        assert_eq!(sum, 0);
        // Only the checksum word changes
        assert_eq!(image.data()[..20], data[..20]);
        assert_eq!(image.data()[24..], data[24..]);
    }

    #[test]
    fn test_cortex_vector_seven() {
        let mut data = vec![0u8; 32];
        LittleEndian::write_u32(&mut data[0..4], 0x1000_8000);
        LittleEndian::write_u32(&mut data[4..8], 0x0000_00C1);
        let mut image = Image::new(0, data);

        let csum = image.patch_boot_checksum(7).unwrap();
        assert_eq!(csum, 0u32.wrapping_sub(0x1000_80C1));
        assert_eq!(vectors(&image)[7], csum);
    }

    #[test]
    fn test_low_vector_ignores_later_words() {
        let mut data = vec![0u8; 32];
        LittleEndian::write_u32(&mut data[0..4], 1);
        LittleEndian::write_u32(&mut data[28..32], 100);
        let mut image = Image::new(0, data);

        assert_eq!(image.patch_boot_checksum(3).unwrap(), u32::MAX);
    }

    #[test]
    fn test_existing_checksum_is_replaced() {
        let mut data = vec![0u8; 32];
        LittleEndian::write_u32(&mut data[0..4], 7);
        LittleEndian::write_u32(&mut data[20..24], 0xDEAD_BEEF);
        let mut image = Image::new(0, data);

        assert_eq!(image.patch_boot_checksum(5).unwrap(), 0u32.wrapping_sub(7));
    }

    #[test]
    fn test_short_image_rejected() {
        let mut image = Image::new(0, vec![0; 16]);
        assert!(matches!(
            image.patch_boot_checksum(5),
            Err(Error::InvalidImage(_))
        ));
    }

    #[test]
    fn test_pad_to_block() {
        let mut image = Image::new(0, vec![0; 100]);
        assert_eq!(image.pad_to(64), 28);
        assert_eq!(image.len(), 128);
        assert!(image.data()[100..].iter().all(|&b| b == PAD_BYTE));
        assert_eq!(image.pad_to(64), 0);
    }

    #[test]
    fn test_last_address() {
        assert_eq!(Image::new(0x2000, vec![0; 16]).last_address(), Some(0x200F));
        assert_eq!(Image::new(0, Vec::new()).last_address(), None);
    }

    #[test]
    fn test_from_file() {
        let dir = std::env::temp_dir().join(format!("lpcisp-image-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("app.bin");
        std::fs::write(&path, [1u8, 2, 3, 4]).unwrap();

        let image = Image::from_file(&path, 0x1000).unwrap();
        assert_eq!(image.base_address(), 0x1000);
        assert_eq!(image.data(), &[1, 2, 3, 4]);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
