//! Firmware file formats
use std::path::Path;
use std::str;

use anyhow::{Context, Result};
use object::{
    Endianness, elf::FileHeader32, elf::PT_LOAD, read::elf::FileHeader, read::elf::ProgramHeader,
};

use crate::image::SparseImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FirmwareFormat {
    PlainHex,
    IntelHex,
    ELF,
    Binary,
}

/// Load an image from disk.
///
/// `base` is the load address for formats that carry no addresses of their
/// own (raw binary, plain hex); Intel HEX and ELF ignore it.
pub fn read_image_from_file<P: AsRef<Path>>(path: P, base: u32) -> Result<SparseImage> {
    let p = path.as_ref();
    let raw = std::fs::read(p).with_context(|| format!("reading {}", p.display()))?;
    parse_image(p, &raw, base)
}

pub fn parse_image(path: &Path, raw: &[u8], base: u32) -> Result<SparseImage> {
    let format = guess_format(path, raw);
    log::info!("Read {} as {:?} format", path.display(), format);
    let image = match format {
        FirmwareFormat::PlainHex => {
            let digits: Vec<u8> = raw
                .iter()
                .copied()
                .filter(|c| !c.is_ascii_whitespace())
                .collect();
            SparseImage::from_binary(base, &hex::decode(digits)?)
        }
        FirmwareFormat::IntelHex => read_ihex(str::from_utf8(raw)?)?,
        FirmwareFormat::ELF => read_elf(raw)?,
        FirmwareFormat::Binary => SparseImage::from_binary(base, raw),
    };
    if image.is_empty() {
        anyhow::bail!("{} contains no data", path.display());
    }
    Ok(image)
}

pub fn guess_format(path: &Path, raw: &[u8]) -> FirmwareFormat {
    let ext = path
        .extension()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default()
        .to_lowercase();
    if ["ihex", "ihe", "h86", "hex", "a43", "a90"].contains(&&*ext) {
        return FirmwareFormat::IntelHex;
    }
    if ext == "bin" {
        return FirmwareFormat::Binary;
    }

    if raw.starts_with(&[0x7f, b'E', b'L', b'F']) {
        FirmwareFormat::ELF
    } else if raw.first() == Some(&b':')
        && raw
            .iter()
            .all(|&c| c.is_ascii_hexdigit() || c == b':' || c == b'\n' || c == b'\r')
    {
        FirmwareFormat::IntelHex
    } else if !raw.is_empty() && raw.iter().all(|&c| c.is_ascii_hexdigit() || c.is_ascii_whitespace())
    {
        FirmwareFormat::PlainHex
    } else {
        FirmwareFormat::Binary
    }
}

pub fn read_ihex(data: &str) -> Result<SparseImage> {
    use ihex::Record;

    let mut base_address = 0u32;
    let mut image = SparseImage::new();
    for record in ihex::Reader::new(data) {
        let record = record?;
        use Record::*;
        match record {
            Data { offset, value } => {
                image.insert(base_address.wrapping_add(offset as u32), &value);
            }
            EndOfFile => break,
            ExtendedSegmentAddress(address) => {
                base_address = (address as u32) * 16;
            }
            StartSegmentAddress { .. } => (),
            ExtendedLinearAddress(address) => {
                base_address = (address as u32) << 16;
            }
            StartLinearAddress(_) => (),
        };
    }
    Ok(image)
}

/// Loadable segments of an ELF32 file, placed at their physical addresses.
pub fn read_elf(elf_data: &[u8]) -> Result<SparseImage> {
    match object::FileKind::parse(elf_data)? {
        object::FileKind::Elf32 => (),
        _ => anyhow::bail!("cannot read file as ELF32 format"),
    }
    let elf_header = FileHeader32::<Endianness>::parse(elf_data)?;
    let endian = elf_header.endian()?;

    let mut image = SparseImage::new();
    for segment in elf_header.program_headers(endian, elf_data)? {
        // Flash gets the load (physical) address, not where it runs from.
        let p_paddr = segment.p_paddr(endian);
        let segment_data = segment
            .data(endian, elf_data)
            .map_err(|_| anyhow::format_err!("Failed to access data for an ELF segment."))?;
        if !segment_data.is_empty() && segment.p_type(endian) == PT_LOAD {
            log::info!(
                "Found loadable segment, physical address: {:#010x}, size: {:#x}",
                p_paddr,
                segment_data.len()
            );
            image.insert(p_paddr, segment_data);
        }
    }

    if image.is_empty() {
        anyhow::bail!("empty ELF file");
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageSource;

    const IHEX: &str = ":020000040800F2\n\
                        :10010000214601360121470136007EFE09D2190140\n\
                        :00000001FF\n";

    #[test]
    fn guess_by_extension_and_content() {
        assert_eq!(
            guess_format(Path::new("fw.hex"), b"anything"),
            FirmwareFormat::IntelHex
        );
        assert_eq!(
            guess_format(Path::new("fw"), IHEX.as_bytes()),
            FirmwareFormat::IntelHex
        );
        assert_eq!(
            guess_format(Path::new("fw"), b"\x7fELF\x01"),
            FirmwareFormat::ELF
        );
        assert_eq!(
            guess_format(Path::new("fw.txt"), b"deadbeef\n"),
            FirmwareFormat::PlainHex
        );
        assert_eq!(
            guess_format(Path::new("fw.bin"), b"deadbeef"),
            FirmwareFormat::Binary
        );
        assert_eq!(guess_format(Path::new("fw"), b""), FirmwareFormat::Binary);
    }

    #[test]
    fn ihex_uses_extended_linear_address() {
        let image = read_ihex(IHEX).unwrap();
        assert_eq!(image.min_address(), 0x0800_0100);
        assert_eq!(image.max_address(), 0x0800_010f);
        assert_eq!(image.byte_at(0x0800_0100), Some(0x21));
        assert_eq!(image.byte_at(0x0800_010f), Some(0x01));
    }

    #[test]
    fn plain_hex_and_binary_use_base() {
        let image = parse_image(Path::new("fw.txt"), b"0102\n0304\n", 0x0800_0000).unwrap();
        assert_eq!(image.len(), 4);
        assert_eq!(image.byte_at(0x0800_0003), Some(4));

        let image = parse_image(Path::new("fw.bin"), &[0xaa, 0xbb], 0x2000_0000).unwrap();
        assert_eq!(image.min_address(), 0x2000_0000);
        assert_eq!(image.max_address(), 0x2000_0001);
    }

    #[test]
    fn empty_file_is_rejected() {
        assert!(parse_image(Path::new("fw.bin"), &[], 0).is_err());
    }

    #[test]
    fn truncated_elf_is_rejected() {
        assert!(read_elf(b"\x7fELF\x01\x01\x01").is_err());
    }
}
