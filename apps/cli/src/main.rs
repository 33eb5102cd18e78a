use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cm_core::protocol::*;
use cm_core::transport::sim::SIM_SECURE_CODE;
use cm_core::zone::ZoneRegisters;
use cm_core::{CryptoMemory, DeviceProfile, Direction, HmacCryptogram, ResultCode, SimulatedChip};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "CryptoMemory protocol tool", long_about = None)]
struct Args {
    /// Device profile (TOML); defaults describe an AT88SC0104C
    #[arg(long)]
    profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Select the chip and print its identification and zone registers
    Info,
    /// Walk through personalization, authentication and protected writes
    Demo,
    /// Print the active device profile as TOML
    DumpProfile {
        /// Write to this file instead of stdout
        #[arg(long)]
        output: Option<String>,
    },
}

type Device = CryptoMemory<SimulatedChip, HmacCryptogram, cm_core::TracingObserver>;

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::WARN.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("setting default subscriber failed");
    }

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let profile = match &args.profile {
        Some(path) => DeviceProfile::load_from_file(path)
            .with_context(|| format!("loading profile {path}"))?,
        None => DeviceProfile::default(),
    };

    match args.command {
        Command::Info => info_cmd(profile),
        Command::Demo => demo_cmd(profile),
        Command::DumpProfile { output } => {
            match output {
                Some(path) => {
                    profile.save_to_file(&path)?;
                    info!(path = %path, "Profile written");
                }
                None => print!("{}", profile.to_toml()?),
            }
            Ok(())
        }
    }
}

fn open(profile: DeviceProfile) -> Result<Device> {
    info!("Using simulated card link");
    CryptoMemory::new(SimulatedChip::new(&profile), HmacCryptogram, profile)
        .context("invalid device profile")
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn info_cmd(profile: DeviceProfile) -> Result<()> {
    let chip = profile.chip_address;
    let zones = profile.user_zones;
    let mut dev = open(profile)?;
    dev.select_chip(chip).context("selecting chip")?;

    println!("Chip 0x{chip:X}");
    for (name, addr, len) in [
        ("Answer to reset", ATR_ADDR, ATR_LEN),
        ("Fab code", FAB_ADDR, FAB_LEN),
        ("Manufacturer", CMC_ADDR, CMC_LEN),
        ("Lot history", LHC_ADDR, LHC_LEN),
        ("Device config", DCR_ADDR, 1),
        ("Identification", INN_ADDR, INN_LEN),
        ("Issuer code", IC_ADDR, IC_LEN),
    ] {
        let data = dev.read_config_zone(chip, addr, len)?;
        println!("  {name:<16} @0x{addr:02X}: {}", hex(&data));
    }

    let fuses = dev.read_fuse(chip)?;
    println!("  {:<16}: {fuses:?}", "Fuses");

    for zone in 0..zones {
        let regs = dev.read_config_zone(chip, access_register_addr(zone), 2)?;
        let regs = ZoneRegisters::from_bytes(regs[0], regs[1]);
        println!(
            "  Zone {zone}: AR={:02X} PR={:02X} password={:?} auth={:?} key set {} password set {}",
            regs.access.0,
            regs.password.0,
            regs.access.password_mode(),
            regs.access.auth_mode(),
            regs.password.key_set(),
            regs.password.password_set(),
        );
    }
    Ok(())
}

fn report<T>(step: &str, result: &std::result::Result<T, CmError>) {
    let code = ResultCode::from_result(result);
    println!("{step:<40} {code} (0x{:02X})", code.value());
}

fn demo_cmd(profile: DeviceProfile) -> Result<()> {
    let chip = profile.chip_address;
    let mut dev = open(profile)?;
    let seed = [0x31, 0x41, 0x59, 0x26, 0x53, 0x58, 0x97, 0x93];

    let r = dev.select_chip(chip);
    report("select chip", &r);
    r?;

    let r = dev.verify_password(chip, &[0, 0, 0], SECURE_CODE_SET, Direction::Write);
    report("wrong secure code", &r);

    let r = dev.verify_secure_code(chip, &SIM_SECURE_CODE);
    report("secure code", &r);
    r?;

    let r = dev.write_config_zone(chip, CM_G, &seed, false);
    report("program seed, key set 0", &r);
    r?;

    // Zone 0: writes need authentication with key set 0.
    let r = dev.write_config_zone(chip, access_register_addr(0), &[0xEF, 0x00], false);
    report("protect zone 0", &r);
    r?;

    let r = dev.reset_password(chip);
    report("drop secure code", &r);

    let r = dev.set_user_zone(chip, 0, false);
    report("set user zone 0", &r);
    r?;

    let r = dev.write_small_zone(chip, 0, b"secret");
    report("write zone 0 unauthenticated", &r);

    let r = dev.activate_security(chip, 0, &seed, None, false);
    report("authenticate, key set 0", &r);
    r?;

    let r = dev.set_user_zone(chip, 0, true);
    report("set user zone 0, anti-tearing", &r);
    r?;

    let r = dev.write_small_zone(chip, 0, b"secret");
    report("write zone 0 authenticated", &r);
    r?;

    let r = dev.read_small_zone(chip, 0, 6);
    report("read zone 0", &r);
    println!("  data: {:?}", String::from_utf8_lossy(&r?));

    let checksum = dev.read_checksum(chip)?;
    let r = dev.send_checksum(chip, checksum);
    report("send checksum", &r);

    let r = dev.write_large_zone(chip, 0, &[0u8; 40]);
    report("write 40 bytes", &r);

    let r = dev.deactivate_security(chip);
    report("deactivate security", &r);

    let r = dev.set_user_zone(chip, 0, false).and_then(|_| dev.write_small_zone(chip, 0, b"x"));
    report("write zone 0 after deactivate", &r);

    let r = dev.select_chip(0x02);
    report("select absent chip 0x2", &r);

    dev.power_off();
    Ok(())
}
