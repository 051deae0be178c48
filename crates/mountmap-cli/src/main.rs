use std::path::{Path, PathBuf};

use clap::Parser;
use mountmap_common::error::{MountmapError, UserFault};
use mountmap_common::properties::keys;
use mountmap_common::{Criteria, PropertyValue};
use mountmap_hive::Hive;
use mountmap_mapping::Mapping;
use mountmap_mount::ResolvedHive;

#[derive(Debug, Clone, Parser)]
#[command(name = "mountmap", about = "Read and mutate HKLM\\SYSTEM\\MountedDevices")]
struct Args {
    #[command(subcommand)]
    cmd: Command,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Clone, clap::Subcommand)]
enum Command {
    /// List every drive-letter mapping, with its resolved OS device.
    List(ListArgs),
    /// Exchange the mappings held by two drive letters.
    Swap(SwapArgs),
    /// Move a mapping from one drive letter onto another.
    Change(ChangeArgs),
    /// Zero out the mapping held by a drive letter.
    Remove(RemoveArgs),
    /// Create a new mapping under a free drive letter.
    Add(AddArgs),
    /// Print the raw device inventory.
    Dump(DumpArgs),
}

#[derive(Debug, Clone, clap::Args)]
struct ListArgs {
    #[command(flatten)]
    hive: HiveSelection,
    /// Also list volume-keyed mappings that have no drive letter.
    #[arg(long = "all", visible_alias = "with-volumes")]
    all: bool,
}

#[derive(Debug, Clone, clap::Args)]
struct SwapArgs {
    #[command(flatten)]
    hive: HiveSelection,
    a: String,
    b: String,
}

#[derive(Debug, Clone, clap::Args)]
struct ChangeArgs {
    #[command(flatten)]
    hive: HiveSelection,
    from: String,
    to: String,
}

#[derive(Debug, Clone, clap::Args)]
struct RemoveArgs {
    #[command(flatten)]
    hive: HiveSelection,
    letter: String,
}

#[derive(Debug, Clone, clap::Args)]
struct AddArgs {
    #[command(flatten)]
    hive: HiveSelection,
    #[command(subcommand)]
    kind: AddKind,
}

#[derive(Debug, Clone, clap::Subcommand)]
enum AddKind {
    /// `add mbr L: <hex-disk> <offset>`
    Mbr { letter: String, disk_id: String, offset: u64 },
    /// `add partition L: <device>` — reads the MBR of the device's parent disk.
    Partition { letter: String, device: String },
    /// `add raw L: <string>` — the literal bytes of `data`.
    Raw { letter: String, data: String },
}

#[derive(Debug, Clone, clap::Args)]
struct DumpArgs {
    #[command(subcommand)]
    kind: DumpKind,
}

#[derive(Debug, Clone, clap::Subcommand)]
enum DumpKind {
    Disks,
    Partitions,
}

/// Exactly one of these must select a hive, per §9.3: "every subcommand
/// needs exactly one way to resolve a hive path before acting."
#[derive(Debug, Clone, clap::Args)]
struct HiveSelection {
    #[arg(long)]
    hive: Option<PathBuf>,
    #[arg(long)]
    sysdir: Option<PathBuf>,
    #[arg(long)]
    sysroot: Option<PathBuf>,
    #[arg(long)]
    sysdrive: Option<String>,
    #[arg(long)]
    probe: bool,
}

/// A hive path together with whatever mount it depends on, kept alive for
/// as long as the resolved `Hive` needs to read the underlying file.
enum HivePath {
    Direct(PathBuf),
    Resolved(ResolvedHive),
}

impl HivePath {
    fn as_path(&self) -> &Path {
        match self {
            HivePath::Direct(path) => path,
            HivePath::Resolved(resolved) => resolved.path(),
        }
    }
}

fn resolve_hive_path(sel: &HiveSelection) -> Result<HivePath, MountmapError> {
    if let Some(hive) = &sel.hive {
        return Ok(HivePath::Direct(hive.clone()));
    }
    if let Some(sysdir) = &sel.sysdir {
        return Ok(HivePath::Resolved(mountmap_mount::hive_from_sys_dir(sysdir)?));
    }
    if let Some(sysroot) = &sel.sysroot {
        return Ok(HivePath::Resolved(mountmap_mount::hive_from_sys_root(sysroot)?));
    }
    if let Some(sysdrive) = &sel.sysdrive {
        return Ok(HivePath::Resolved(mountmap_mount::hive_from_sys_drive(sysdrive)?));
    }
    if sel.probe {
        let mut installs = mountmap_mount::all_windows_installs().into_iter();
        let first = installs.next().ok_or(UserFault::NoWindowsInstallFound)?;
        if installs.next().is_some() {
            return Err(UserFault::AmbiguousWindowsInstall.into());
        }
        return Ok(HivePath::Resolved(mountmap_mount::hive_from_sys_drive(&first.path)?));
    }
    Err(UserFault::Other {
        message: "one of --hive, --sysdir, --sysroot, --sysdrive, --probe is required".into(),
    }
    .into())
}

/// A single uppercase letter, optionally followed by `:`.
fn parse_drive_letter(arg: &str) -> Result<char, MountmapError> {
    let valid = match arg.as_bytes() {
        [letter] => letter.is_ascii_uppercase(),
        [letter, b':'] => letter.is_ascii_uppercase(),
        _ => false,
    };
    if !valid {
        return Err(UserFault::InvalidDriveLetter { arg: arg.to_string() }.into());
    }
    Ok(arg.chars().next().unwrap())
}

fn main() {
    let args = Args::parse();

    simple_logger::SimpleLogger::new()
        .with_level(if args.verbose { log::LevelFilter::Trace } else { log::LevelFilter::Warn })
        .init()
        .unwrap();

    if let Err(err) = run(args.cmd) {
        eprintln!("mountmap: {err}");
        std::process::exit(err.exit_code());
    }
}

fn run(cmd: Command) -> Result<(), MountmapError> {
    match cmd {
        Command::List(args) => list(&args),
        Command::Swap(args) => swap(&args),
        Command::Change(args) => change(&args),
        Command::Remove(args) => remove(&args),
        Command::Add(args) => add(&args),
        Command::Dump(args) => dump(&args.kind),
    }
}

fn list(args: &ListArgs) -> Result<(), MountmapError> {
    let hive_path = resolve_hive_path(&args.hive)?;
    let hive = Hive::open(hive_path.as_path(), false)?;

    for value in hive.list(args.all)? {
        let resolved = mountmap_resolve::resolve(&value.mapping);
        println!("{} : {} -> {}", value.name.key(), value.mapping, resolved);
    }
    Ok(())
}

fn swap(args: &SwapArgs) -> Result<(), MountmapError> {
    let a = parse_drive_letter(&args.a)?;
    let b = parse_drive_letter(&args.b)?;
    let hive_path = resolve_hive_path(&args.hive)?;
    let hive = Hive::open(hive_path.as_path(), true)?;
    hive.swap(a, b)
}

fn change(args: &ChangeArgs) -> Result<(), MountmapError> {
    let from = parse_drive_letter(&args.from)?;
    let to = parse_drive_letter(&args.to)?;
    let hive_path = resolve_hive_path(&args.hive)?;
    let hive = Hive::open(hive_path.as_path(), true)?;
    hive.change(from, to)
}

fn remove(args: &RemoveArgs) -> Result<(), MountmapError> {
    let letter = parse_drive_letter(&args.letter)?;
    let hive_path = resolve_hive_path(&args.hive)?;
    let hive = Hive::open(hive_path.as_path(), true)?;
    hive.remove(letter)
}

fn add(args: &AddArgs) -> Result<(), MountmapError> {
    let hive_path = resolve_hive_path(&args.hive)?;
    let hive = Hive::open(hive_path.as_path(), true)?;

    let (letter, mapping) = match &args.kind {
        AddKind::Mbr { letter, disk_id, offset } => {
            let disk_id = u32::from_str_radix(disk_id.trim_start_matches("0x"), 16)
                .map_err(|_| UserFault::Other { message: format!("not a hex disk id: {disk_id}") })?;
            (parse_drive_letter(letter)?, Mapping::MbrPartition { disk_id, offset_bytes: *offset })
        }
        AddKind::Partition { letter, device } => {
            let mapping = mbr_mapping_for_partition(device)?;
            (parse_drive_letter(letter)?, mapping)
        }
        AddKind::Raw { letter, data } => {
            (parse_drive_letter(letter)?, Mapping::Raw { bytes: data.clone().into_bytes() })
        }
    };

    hive.add(letter, &mapping.encode())
}

/// §2's `add partition` data flow: query C2 by device name, read the MBR of
/// its parent disk through C1, and construct the 12-byte MBR blob from the
/// disk's signature and the partition's byte offset.
fn mbr_mapping_for_partition(device: &str) -> Result<Mapping, MountmapError> {
    let all = mountmap_inventory::partitions(&Criteria::new());
    let part_props = if let Some(props) = all.get(device) {
        props.clone()
    } else {
        let mut by_mountable = Criteria::new();
        by_mountable.insert(keys::MOUNTABLE_PATH.to_string(), PropertyValue::String(device.to_string()));
        mountmap_inventory::partitions(&by_mountable)
            .into_values()
            .next()
            .ok_or_else(|| UserFault::Other { message: format!("no such partition: {device}") })?
    };

    let disk_id_prop = part_props
        .get(keys::DISK_ID)
        .ok_or_else(|| UserFault::Other { message: format!("{device} has no parent disk") })?;

    let mut disk_criteria = Criteria::new();
    disk_criteria.insert(keys::DISK_ID.to_string(), PropertyValue::String(disk_id_prop.clone()));
    let (_, disk_props) = mountmap_inventory::disks(&disk_criteria)
        .into_iter()
        .next()
        .ok_or_else(|| UserFault::Other { message: format!("{device}'s parent disk is not in the inventory") })?;

    let readable_path = disk_props
        .get(keys::READABLE_PATH)
        .ok_or_else(|| UserFault::Other { message: format!("{device}'s parent disk has no readable path") })?;

    let mut file = std::fs::File::open(readable_path)
        .map_err(|e| mountmap_common::error::SystemError::io("open", e))?;
    let sector = mountmap_mbr::MbrSector::parse(&mut file)
        .map_err(|e| UserFault::Other { message: format!("reading MBR of {readable_path}: {e}") })?;

    let block_size: u64 = disk_props
        .get(keys::LBA_SIZE)
        .and_then(|v| v.parse().ok())
        .unwrap_or(512);

    let offset_bytes = if let Some(bytes) = part_props.get(keys::PART_OFFSET_BYTES) {
        bytes
            .parse()
            .map_err(|_| UserFault::Other { message: format!("{device} has a malformed partition byte offset") })?
    } else if let Some(blocks) = part_props.get(keys::PART_OFFSET_BLOCKS) {
        let blocks: u64 = blocks
            .parse()
            .map_err(|_| UserFault::Other { message: format!("{device} has a malformed partition block offset") })?;
        blocks * block_size
    } else {
        return Err(UserFault::Other { message: format!("{device} has no partition offset in the inventory") }.into());
    };

    Ok(Mapping::MbrPartition {
        disk_id: sector.disk_signature,
        offset_bytes,
    })
}

fn dump(kind: &DumpKind) -> Result<(), MountmapError> {
    let entries = match kind {
        DumpKind::Disks => mountmap_inventory::disks(&Criteria::new()),
        DumpKind::Partitions => mountmap_inventory::partitions(&Criteria::new()),
    };

    for (device, props) in entries {
        println!("{device}");
        for (key, value) in &props {
            println!("  {key} = {value}");
        }
    }
    Ok(())
}
