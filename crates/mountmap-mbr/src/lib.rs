//! MBR/EBR sector codec and extended-partition chain walk (C1, §4.1).
//!
//! Reads exactly 512 bytes starting at the reader's current position.
//! Decoding never writes anything back: the core only ever reads the
//! first sector of a disk (and, transitively, EBR sectors) to corroborate
//! a [`mountmap-mapping`]-decoded `MbrPartition` mapping against the live
//! device inventory.

use std::io::{Read, Seek, SeekFrom};

use bytemuck::{Pod, Zeroable};
use mountmap_common::types::{Endian, LittleEndian, U32};

/// Partition-table types that mean "this entry points at an extended
/// partition, not a primary filesystem".
pub const EXTENDED_PARTITION_TYPES: [u8; 3] = [0x05, 0x0F, 0x85];

/// The first logical-partition index inside an extended partition chain.
pub const FIRST_LOGICAL_PARTITION_INDEX: u32 = 5;

const SECTOR_LEN: usize = 512;
const SIGNATURE_OFFSET: usize = 510;
const DISK_SIGNATURE_OFFSET: usize = 440;
const PARTITION_TABLE_OFFSET: usize = 446;
const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];

#[derive(Debug, thiserror::Error)]
pub enum MbrError {
    #[error("I/O error reading MBR/EBR sector: {0}")]
    Io(#[from] std::io::Error),
    #[error("sector is missing the 0x55 0xAA boot signature")]
    BadSignature,
}

/// One 16-byte entry of the four-entry primary partition table.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MbrPartitionEntry {
    pub boot_indicator: u8,
    pub chs_first: [u8; 3],
    pub part_type: u8,
    pub chs_last: [u8; 3],
    lba_start: U32<LittleEndian>,
    lba_size: U32<LittleEndian>,
}

impl MbrPartitionEntry {
    pub fn lba_start(&self) -> u32 {
        self.lba_start.get()
    }

    pub fn lba_size(&self) -> u32 {
        self.lba_size.get()
    }

    pub fn is_empty(&self) -> bool {
        self.part_type == 0x00
    }

    /// An entry is classified extended iff its type is one of 0x05, 0x0F, 0x85 (§4.1).
    pub fn is_extended(&self) -> bool {
        EXTENDED_PARTITION_TYPES.contains(&self.part_type)
    }
}

/// A decoded 512-byte MBR or EBR sector.
#[derive(Debug, Clone, Copy)]
pub struct MbrSector {
    pub disk_signature: u32,
    pub entries: [MbrPartitionEntry; 4],
}

impl MbrSector {
    /// Reads exactly 512 bytes from the reader's current position and
    /// decodes them. The trailing two bytes must be `0x55 0xAA`
    /// (little-endian signature `0xAA55`).
    pub fn parse<R: Read>(reader: &mut R) -> Result<Self, MbrError> {
        let mut buf = [0u8; SECTOR_LEN];
        reader.read_exact(&mut buf)?;

        if buf[SIGNATURE_OFFSET..SIGNATURE_OFFSET + 2] != BOOT_SIGNATURE {
            return Err(MbrError::BadSignature);
        }

        let disk_signature = u32::from_le_bytes(
            buf[DISK_SIGNATURE_OFFSET..DISK_SIGNATURE_OFFSET + 4]
                .try_into()
                .unwrap(),
        );

        let mut entries = [MbrPartitionEntry::zeroed(); 4];
        for (i, entry) in entries.iter_mut().enumerate() {
            let start = PARTITION_TABLE_OFFSET + i * 16;
            let raw: [u8; 16] = buf[start..start + 16].try_into().unwrap();
            *entry = bytemuck::cast(raw);
        }

        Ok(Self {
            disk_signature,
            entries,
        })
    }
}

/// Walks the extended-partition chain starting at `extended_lba_start`
/// looking for the logical partition whose start equals `target_lba`
/// (both given in sectors of `block_size` bytes). Returns the logical
/// partition's 1-based index (numbered from
/// [`FIRST_LOGICAL_PARTITION_INDEX`]) on a match.
///
/// Terminates on malformed chains: a zero `entry[1].lba_start` ends the
/// walk, and so does a next-EBR address that equals `extended_lba_start`
/// (the required cycle-termination test, §4.1).
pub fn walk_extended_chain<R: Read + Seek>(
    reader: &mut R,
    block_size: u64,
    extended_lba_start: u64,
    target_lba: u64,
) -> Result<Option<u32>, MbrError> {
    let mut cur = extended_lba_start;
    let mut index = FIRST_LOGICAL_PARTITION_INDEX;

    loop {
        reader.seek(SeekFrom::Start(cur * block_size))?;
        let ebr = MbrSector::parse(reader)?;

        let logical_start = cur + ebr.entries[0].lba_start() as u64;
        if logical_start == target_lba {
            return Ok(Some(index));
        }

        let next_relative = ebr.entries[1].lba_start();
        if next_relative == 0 {
            return Ok(None);
        }

        let next_ebr = extended_lba_start + next_relative as u64;
        if next_ebr == extended_lba_start {
            return Ok(None);
        }

        cur = next_ebr;
        index += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sector_with(disk_signature: u32, entries: [[u8; 16]; 4]) -> [u8; SECTOR_LEN] {
        let mut buf = [0u8; SECTOR_LEN];
        buf[DISK_SIGNATURE_OFFSET..DISK_SIGNATURE_OFFSET + 4]
            .copy_from_slice(&disk_signature.to_le_bytes());
        for (i, entry) in entries.iter().enumerate() {
            let start = PARTITION_TABLE_OFFSET + i * 16;
            buf[start..start + 16].copy_from_slice(entry);
        }
        buf[SIGNATURE_OFFSET..SIGNATURE_OFFSET + 2].copy_from_slice(&BOOT_SIGNATURE);
        buf
    }

    fn primary_entry(part_type: u8, lba_start: u32, lba_size: u32) -> [u8; 16] {
        let mut e = [0u8; 16];
        e[4] = part_type;
        e[8..12].copy_from_slice(&lba_start.to_le_bytes());
        e[12..16].copy_from_slice(&lba_size.to_le_bytes());
        e
    }

    #[test]
    fn rejects_missing_signature() {
        let mut buf = [0u8; SECTOR_LEN];
        buf[SIGNATURE_OFFSET] = 0x00;
        let mut cursor = Cursor::new(buf);
        assert!(matches!(
            MbrSector::parse(&mut cursor),
            Err(MbrError::BadSignature)
        ));
    }

    #[test]
    fn s6_decodes_disk_signature_and_first_entry() {
        // S6 scenario: disk id 0xABCDEF01, primary-entry[0] lba_start=2048, type=0x07.
        let sector = sector_with(
            0xABCDEF01,
            [
                primary_entry(0x07, 2048, 1_000_000),
                [0; 16],
                [0; 16],
                [0; 16],
            ],
        );
        let mut cursor = Cursor::new(sector);
        let mbr = MbrSector::parse(&mut cursor).unwrap();
        assert_eq!(mbr.disk_signature, 0xABCDEF01);
        assert_eq!(mbr.entries[0].lba_start(), 2048);
        assert_eq!(mbr.entries[0].part_type, 0x07);
        assert!(!mbr.entries[0].is_extended());
    }

    #[test]
    fn classifies_extended_types() {
        for ty in EXTENDED_PARTITION_TYPES {
            let sector = sector_with(0, [primary_entry(ty, 0, 0), [0; 16], [0; 16], [0; 16]]);
            let mut cursor = Cursor::new(sector);
            let mbr = MbrSector::parse(&mut cursor).unwrap();
            assert!(mbr.entries[0].is_extended());
        }
    }

    #[test]
    fn chain_walk_finds_second_logical_partition() {
        // Extended partition starts at LBA 1000. First EBR's logical partition
        // starts at 1000 + 63 = 1063 and chains to a second EBR at
        // 1000 + 2000 = 3000, whose logical partition starts at
        // 3000 + 63 = 3063 (index 6).
        let block_size = 512u64;
        let mut disk = vec![0u8; (4000 * 512) as usize];

        let ebr1 = sector_with(0, [primary_entry(0x83, 63, 100), primary_entry(0x05, 2000, 0), [0; 16], [0; 16]]);
        disk[1000 * 512..1000 * 512 + SECTOR_LEN].copy_from_slice(&ebr1);

        let ebr2 = sector_with(0, [primary_entry(0x83, 63, 100), [0; 16], [0; 16], [0; 16]]);
        disk[3000 * 512..3000 * 512 + SECTOR_LEN].copy_from_slice(&ebr2);

        let mut cursor = Cursor::new(disk);
        let found = walk_extended_chain(&mut cursor, block_size, 1000, 3063).unwrap();
        assert_eq!(found, Some(6));
    }

    #[test]
    fn chain_walk_terminates_on_zero_next_pointer() {
        let block_size = 512u64;
        let mut disk = vec![0u8; 2000 * 512];
        let ebr = sector_with(0, [primary_entry(0x83, 63, 100), [0; 16], [0; 16], [0; 16]]);
        disk[1000 * 512..1000 * 512 + SECTOR_LEN].copy_from_slice(&ebr);

        let mut cursor = Cursor::new(disk);
        let found = walk_extended_chain(&mut cursor, block_size, 1000, 999_999).unwrap();
        assert_eq!(found, None);
    }

    #[test]
    fn chain_walk_terminates_on_cycle_back_to_extended_start() {
        // entry[1].lba_start points right back at the extended partition's
        // own start: next_ebr == extended_lba_start must terminate, not loop.
        let block_size = 512u64;
        let mut disk = vec![0u8; 2000 * 512];
        let ebr = sector_with(
            0,
            [
                primary_entry(0x83, 63, 100),
                primary_entry(0x05, 0, 0),
                [0; 16],
                [0; 16],
            ],
        );
        disk[1000 * 512..1000 * 512 + SECTOR_LEN].copy_from_slice(&ebr);

        let mut cursor = Cursor::new(disk);
        let found = walk_extended_chain(&mut cursor, block_size, 1000, 999_999).unwrap();
        assert_eq!(found, None);
    }
}
