//! Asset-code encoding and firmware image patching.
//!
//! Firmware is built with a fixed-width placeholder where the per-unit
//! serial number belongs; commissioning overwrites exactly that slot and
//! nothing else.

use std::fmt;

use crate::error::Error;

/// Width of the serial-number slot reserved in the firmware image.
pub const SLOT_WIDTH: usize = 15;

/// Placeholder the firmware build leaves in the image.
pub const PLACEHOLDER: &[u8; SLOT_WIDTH] = b"XXXXXXXXXXXXXXX";

/// Filler for codes shorter than the slot. The firmware reads the slot as a
/// C string, so the remainder is NUL.
pub const PAD_BYTE: u8 = 0;

/// A per-unit asset code, e.g. `srABC123`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetCode(String);

impl AssetCode {
    /// Builds an asset code from operator input: trimmed, uppercased, and
    /// given the `sr` prefix.
    pub fn from_operator_input(input: &str) -> Self {
        AssetCode(format!("sr{}", input.trim().to_uppercase()))
    }

    /// Accepts a code exactly as stored in an EEPROM descriptor.
    pub fn from_descriptor(serial: &str) -> Self {
        AssetCode(serial.to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Encodes the code into an exact `width`-byte slot. Shorter codes are
    /// NUL-padded on the right; longer codes are rejected rather than
    /// truncated.
    pub fn pad(&self, width: usize) -> Result<Vec<u8>, Error> {
        let bytes = self.0.as_bytes();
        if bytes.len() > width {
            return Err(Error::AssetCodeTooLong {
                code: self.0.clone(),
                len: bytes.len(),
                width,
            });
        }

        let mut padded = vec![PAD_BYTE; width];
        padded[..bytes.len()].copy_from_slice(bytes);

        Ok(padded)
    }
}

impl fmt::Display for AssetCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Finds the placeholder slot in `image`. The first occurrence is
/// authoritative; an image with more than one placeholder is a firmware
/// build defect upstream of this tool.
pub fn locate_placeholder(image: &[u8]) -> Result<usize, Error> {
    image
        .windows(PLACEHOLDER.len())
        .position(|window| window == PLACEHOLDER)
        .ok_or(Error::PlaceholderNotFound)
}

/// Returns a copy of `image` with `padded` written at `offset`. The input
/// buffer is never modified.
pub fn patch(image: &[u8], padded: &[u8], offset: usize) -> Vec<u8> {
    let mut patched = image.to_vec();
    patched[offset..offset + padded.len()].copy_from_slice(padded);
    patched
}

/// Locates the placeholder, encodes `code`, and returns the patched image.
pub fn patch_image(image: &[u8], code: &AssetCode) -> Result<Vec<u8>, Error> {
    let offset = locate_placeholder(image)?;
    let padded = code.pad(SLOT_WIDTH)?;

    Ok(patch(image, &padded, offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_input_is_uppercased_and_prefixed() {
        let code = AssetCode::from_operator_input(" abc123 ");
        assert_eq!(code.as_str(), "srABC123");
    }

    #[test]
    fn descriptor_codes_are_taken_verbatim() {
        let code = AssetCode::from_descriptor("srXYZ9");
        assert_eq!(code.as_str(), "srXYZ9");
    }

    #[test]
    fn pad_fills_short_codes_to_exact_width() {
        let padded = AssetCode::from_descriptor("srAB12").pad(15).unwrap();
        assert_eq!(padded.len(), 15);
        assert_eq!(&padded[..6], b"srAB12");
        assert!(padded[6..].iter().all(|&b| b == PAD_BYTE));
    }

    #[test]
    fn pad_accepts_codes_filling_the_whole_slot() {
        let padded = AssetCode::from_descriptor("srABCDEFGHIJKLM").pad(15).unwrap();
        assert_eq!(padded, b"srABCDEFGHIJKLM");
    }

    #[test]
    fn pad_rejects_codes_longer_than_the_slot() {
        let result = AssetCode::from_descriptor("srABCDEFGHIJKLMN").pad(15);
        assert!(matches!(
            result,
            Err(Error::AssetCodeTooLong { len: 16, width: 15, .. })
        ));
    }

    #[test]
    fn locate_finds_first_occurrence() {
        let mut image = vec![0xffu8; 64];
        image[20..35].copy_from_slice(PLACEHOLDER);
        assert_eq!(locate_placeholder(&image).unwrap(), 20);
    }

    #[test]
    fn locate_fails_without_placeholder() {
        let image = vec![0u8; 64];
        assert!(matches!(
            locate_placeholder(&image),
            Err(Error::PlaceholderNotFound)
        ));
    }

    #[test]
    fn patch_touches_only_the_slot() {
        let mut image = vec![0xaau8; 64];
        image[8..23].copy_from_slice(PLACEHOLDER);

        let code = AssetCode::from_descriptor("sr1234");
        let patched = patch_image(&image, &code).unwrap();

        assert_eq!(patched.len(), image.len());
        assert_eq!(&patched[..8], &image[..8]);
        assert_eq!(&patched[23..], &image[23..]);
        assert_eq!(&patched[8..14], b"sr1234");
        assert!(patched[14..23].iter().all(|&b| b == PAD_BYTE));
        // the input buffer is untouched
        assert_eq!(&image[8..23], PLACEHOLDER);
    }

    #[test]
    fn patch_image_without_placeholder_leaves_input_intact() {
        let image = vec![0x55u8; 32];
        assert!(patch_image(&image, &AssetCode::from_descriptor("sr1")).is_err());
        assert!(image.iter().all(|&b| b == 0x55));
    }
}
