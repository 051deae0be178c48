//! Decode/encode of `MountedDevices` value blobs into a tagged [`Mapping`]
//! sum type (C3, §4.3). This is the Rust-native replacement for the
//! original's `Mapping`/`MbrPartitionMapping`/`GuidPartitionMapping`/
//! `GenericMapping`/`RawMapping` class hierarchy: one enum, one `decode`,
//! one `encode`, dispatched by `match`.

use mountmap_common::guid::{bytes_to_canonical_string, canonical_string_to_bytes};

const GUID_PARTITION_MAGIC: &[u8; 8] = b"DMIO:ID:";
const DEVICE_INTERFACE_PREFIX_BACKSLASH: [u8; 8] = [
    b'\\', 0, b'?', 0, b'?', 0, b'\\', 0,
];
const DEVICE_INTERFACE_PREFIX_UNDERSCORE: [u8; 8] = [
    b'_', 0, b'?', 0, b'?', 0, b'_', 0,
];

/// A decoded `MountedDevices` value (§3, §4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mapping {
    MbrPartition {
        disk_id: u32,
        offset_bytes: u64,
    },
    GuidPartition {
        /// Uppercase `8-4-4-4-12` canonical form.
        guid: String,
    },
    GenericDeviceInterface {
        instance_path: String,
        interface_guid: String,
    },
    Raw {
        bytes: Vec<u8>,
    },
}

impl Mapping {
    /// Classify and decode a raw `MountedDevices` value blob (§4.3).
    pub fn decode(bytes: &[u8]) -> Mapping {
        if bytes.len() == 12 {
            let disk_id = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
            let offset_bytes = u64::from_le_bytes(bytes[4..12].try_into().unwrap());
            return Mapping::MbrPartition {
                disk_id,
                offset_bytes,
            };
        }

        if bytes.len() == 24 && &bytes[0..8] == GUID_PARTITION_MAGIC {
            let raw: [u8; 16] = bytes[8..24].try_into().unwrap();
            return Mapping::GuidPartition {
                guid: bytes_to_canonical_string(raw),
            };
        }

        if bytes.len() >= (36 + 2) * 2
            && (bytes[0..8] == DEVICE_INTERFACE_PREFIX_BACKSLASH
                || bytes[0..8] == DEVICE_INTERFACE_PREFIX_UNDERSCORE)
        {
            let ascii = utf16le_to_ascii_lossy(bytes);
            let guid_begin = ascii.len() - (36 + 2);
            let mut instance_path = ascii[4..guid_begin].to_string();
            let interface_guid = ascii[guid_begin + 1..guid_begin + 1 + 36].to_string();

            instance_path = instance_path.replace('#', "\\");
            if instance_path.ends_with('\\') {
                instance_path.pop();
            }

            return Mapping::GenericDeviceInterface {
                instance_path,
                interface_guid,
            };
        }

        Mapping::Raw {
            bytes: bytes.to_vec(),
        }
    }

    /// Re-encode the mapping back into its value-blob form. The inverse of
    /// [`Mapping::decode`] for the typed variants; `Raw` round-trips
    /// byte-for-byte (invariant 1, §8). `GenericDeviceInterface` does not
    /// round-trip byte-for-byte in general: the decode already discarded
    /// the original `\??\` vs `_??_` prefix distinction and any non-ASCII
    /// code unit (Open Question #2, SPEC_FULL.md §13) before this struct
    /// ever sees it.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Mapping::MbrPartition {
                disk_id,
                offset_bytes,
            } => {
                let mut out = Vec::with_capacity(12);
                out.extend_from_slice(&disk_id.to_le_bytes());
                out.extend_from_slice(&offset_bytes.to_le_bytes());
                out
            }
            Mapping::GuidPartition { guid } => {
                let mut out = Vec::with_capacity(24);
                out.extend_from_slice(GUID_PARTITION_MAGIC);
                let raw = canonical_string_to_bytes(guid)
                    .expect("Mapping::GuidPartition must hold a canonical GUID string");
                out.extend_from_slice(&raw);
                out
            }
            Mapping::GenericDeviceInterface {
                instance_path,
                interface_guid,
            } => {
                let escaped = instance_path.replace('\\', "#");
                let text = format!("\\??\\{escaped}{{{interface_guid}}}");
                ascii_to_utf16le(&text)
            }
            Mapping::Raw { bytes } => bytes.clone(),
        }
    }
}

/// Known `GUID_DEVINTERFACE_*` constants, for giving a human a name
/// instead of a bare GUID in [`Mapping`]'s `Display` impl.
fn device_interface_guid_name(guid: &str) -> &str {
    match guid.to_ascii_uppercase().as_str() {
        "53F56312-B6BF-11D0-94F2-00A0C91EFB8B" => "CD Changer",
        "53F56308-B6BF-11D0-94F2-00A0C91EFB8B" => "CD-ROM",
        "53F56307-B6BF-11D0-94F2-00A0C91EFB8B" => "Disk",
        "53F56311-B6BF-11D0-94F2-00A0C91EFB8B" => "Floppy",
        "53F56310-B6BF-11D0-94F2-00A0C91EFB8B" => "Medium Changer",
        "53F5630A-B6BF-11D0-94F2-00A0C91EFB8B" => "Partition",
        "2ACCFE60-C130-11D2-B082-00A0C91EFB8B" => "Storage Port",
        "53F5630B-B6BF-11D0-94F2-00A0C91EFB8B" => "Tape",
        "53F5630D-B6BF-11D0-94F2-00A0C91EFB8B" => "Volume",
        "53F5630C-B6BF-11D0-94F2-00A0C91EFB8B" => "Write-Once Disk",
        _ => guid,
    }
}

impl std::fmt::Display for Mapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mapping::MbrPartition { disk_id, offset_bytes } => write!(
                f,
                "MBR Disk 0x{disk_id:08x} @ 0x{offset_bytes:016x} (block {})",
                offset_bytes / 512
            ),
            Mapping::GuidPartition { guid } => write!(f, "GUID Partition {guid}"),
            Mapping::GenericDeviceInterface { instance_path, interface_guid } => {
                write!(f, "{} {instance_path}", device_interface_guid_name(interface_guid))
            }
            Mapping::Raw { bytes } => {
                for (i, chunk) in bytes.chunks(16).enumerate() {
                    if i != 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{:04x} ", i * 16)?;
                    let mut ascii = String::with_capacity(16);
                    for (k, b) in chunk.iter().enumerate() {
                        if k == 8 {
                            write!(f, " ")?;
                        }
                        write!(f, " {b:02x}")?;
                        ascii.push(if b.is_ascii_graphic() || *b == b' ' { *b as char } else { '.' });
                    }
                    write!(f, "  |{ascii}|")?;
                }
                Ok(())
            }
        }
    }
}

/// Drops every high byte of a UTF-16LE code unit (emitting `'?'` whenever
/// it's non-zero), per §4.3's lossy ASCII decode.
fn utf16le_to_ascii_lossy(bytes: &[u8]) -> String {
    bytes
        .chunks_exact(2)
        .map(|pair| if pair[1] != 0 { '?' } else { pair[0] as char })
        .collect()
}

fn ascii_to_utf16le(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() * 2);
    for c in s.chars() {
        out.push(c as u8);
        out.push(0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_mbr_decode() {
        let bytes = [
            0x78, 0x56, 0x34, 0x12, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        let mapping = Mapping::decode(&bytes);
        assert_eq!(
            mapping,
            Mapping::MbrPartition {
                disk_id: 0x12345678,
                offset_bytes: 2048,
            }
        );
        // invariant 1: encode(decode(b)) == b.
        assert_eq!(mapping.encode(), bytes);
    }

    #[test]
    fn s2_gpt_decode() {
        let bytes = [
            0x44, 0x4D, 0x49, 0x4F, 0x3A, 0x49, 0x44, 0x3A, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66,
            0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x00,
        ];
        let mapping = Mapping::decode(&bytes);
        assert_eq!(
            mapping,
            Mapping::GuidPartition {
                guid: "44332211-6655-8877-99AA-BBCCDDEEFF00".to_string(),
            }
        );
        assert_eq!(mapping.encode(), bytes);
    }

    #[test]
    fn generic_device_interface_decode() {
        // "\??\IDE#CdRomVENDOR____MODEL___###1\0\{53f56308-b6bf-11d0-94f2-00a0c91efb8b}"
        // built as UTF-16LE, with the instance path containing a '#' separator
        // that must become '\' after decode.
        let instance = "\\??\\IDE#CdRomFOO\\";
        let guid = "53F56308-B6BF-11D0-94F2-00A0C91EFB8B";
        let mut bytes = ascii_to_utf16le(instance);
        bytes.extend(ascii_to_utf16le(&format!("{{{guid}}}")));

        let mapping = Mapping::decode(&bytes);
        match mapping {
            Mapping::GenericDeviceInterface {
                instance_path,
                interface_guid,
            } => {
                assert_eq!(instance_path, "IDE\\CdRomFOO");
                assert_eq!(interface_guid, guid);
            }
            other => panic!("expected GenericDeviceInterface, got {other:?}"),
        }
    }

    #[test]
    fn non_ascii_code_unit_becomes_question_mark() {
        let mut bytes = ascii_to_utf16le("\\??\\X");
        // A non-ASCII UTF-16LE code unit: high byte non-zero.
        bytes.push(0x00);
        bytes.push(0x01);
        bytes.extend(ascii_to_utf16le(&format!(
            "{{{}}}",
            "53F56308-B6BF-11D0-94F2-00A0C91EFB8B"
        )));

        let mapping = Mapping::decode(&bytes);
        match mapping {
            Mapping::GenericDeviceInterface { instance_path, .. } => {
                assert!(instance_path.ends_with('?'));
            }
            other => panic!("expected GenericDeviceInterface, got {other:?}"),
        }
    }

    #[test]
    fn s1_human_form_contains_expected_substrings() {
        let mapping = Mapping::MbrPartition { disk_id: 0x12345678, offset_bytes: 0x0000000000000800 };
        let human = mapping.to_string();
        assert!(human.contains("MBR Disk 0x12345678"));
        assert!(human.contains("0x0000000000000800"));
        assert!(human.contains("block 4"));
    }

    #[test]
    fn known_device_interface_guid_gets_a_friendly_name() {
        let mapping = Mapping::GenericDeviceInterface {
            instance_path: "IDE\\CdRomFOO".to_string(),
            interface_guid: "53f56308-b6bf-11d0-94f2-00a0c91efb8b".to_string(),
        };
        assert_eq!(mapping.to_string(), "CD-ROM IDE\\CdRomFOO");
    }

    #[test]
    fn unrecognized_shape_is_raw_and_round_trips() {
        let bytes = vec![1, 2, 3, 4, 5];
        let mapping = Mapping::decode(&bytes);
        assert_eq!(mapping, Mapping::Raw { bytes: bytes.clone() });
        assert_eq!(mapping.encode(), bytes);
    }
}
