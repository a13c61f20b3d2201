use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use mlxbridge::session::Incoming;
use mlxbridge::transport::serial::SerialStream;
use mlxbridge::{Config, FieldMap, SensingMode, Session, Space};

#[derive(clap::Parser)]
#[command(
    name = "mlxbridge",
    about = "Read, edit and program MLX90381 registers and MTP through the UART bridge"
)]
struct Cli {
    /// Serial port of the bridge, overrides the config file
    #[arg(short, long, global = true)]
    port: Option<String>,
    /// Baud rate, overrides the config file
    #[arg(short, long, global = true)]
    baud: Option<u32>,
    /// YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// More logging, repeat for raw traffic
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// List serial ports
    Ports,
    /// Print the field table
    Fields,
    /// Check the bridge firmware answers
    Identify,
    /// Print the bridge's last I2C acknowledge status
    Status,
    /// Sample OUT1 and OUT2
    Measure,
    /// Read registers and MTP and print them
    Dump,
    /// Print every line the bridge sends
    Monitor {
        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Edit and program the volatile registers (W + S)
    ProgramRegs {
        /// NAME=VALUE, may be repeated
        #[arg(long = "set", value_parser = parse_assignment)]
        set: Vec<(String, String)>,
        /// OUT1/OUT2 axis preset: X/Y, Y/X, X/Z, Z/X, Y/Z, Z/Y
        #[arg(long)]
        mode: Option<SensingMode>,
    },
    /// Edit and program MTP words 0x00..0x0E (E + P), non-volatile
    ProgramMtp {
        /// NAME=VALUE, may be repeated
        #[arg(long = "set", value_parser = parse_assignment)]
        set: Vec<(String, String)>,
        /// Start from the current register values
        #[arg(long)]
        from_regs: bool,
        /// Program even though MEMLOCK/DIS_DIAG bits are set
        #[arg(long)]
        force_lock_bits: bool,
        /// Confirm the MTP write, MTP has limited write cycles
        #[arg(long)]
        yes: bool,
    },
    /// Permanently lock the MTP (MEMLOCK)
    Lock {
        #[arg(long)]
        yes_really: bool,
    },
}

fn parse_assignment(s: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got {:?}", s))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let _ = simplelog::TermLogger::init(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let timeout = config.response_timeout();

    match &cli.command {
        Commands::Ports => {
            for port in SerialStream::scan_ports()? {
                println!("{}", port);
            }
        }
        Commands::Fields => {
            let fields = FieldMap::load()?;
            for spec in fields.fields() {
                println!("{}", spec);
            }
        }
        Commands::Identify => {
            let mut session = open_session(&cli, &config)?;
            session.identify()?;
            let ok = session.wait_until(timeout, |s| s.identified());
            anyhow::ensure!(ok, "bridge did not identify within {:?}", timeout);
            log::info!("Bridge firmware identified");
        }
        Commands::Status => {
            let mut session = open_session(&cli, &config)?;
            session.acknowledge_status()?;
            print_lines(&mut session, Some(timeout));
        }
        Commands::Measure => {
            let mut session = open_session(&cli, &config)?;
            session.measure()?;
            let ok = session.wait_until(timeout, |s| s.last_measurement().is_some());
            anyhow::ensure!(ok, "no measurement within {:?}", timeout);
            if let Some(m) = session.last_measurement() {
                println!("OUT1 {} OUT2 {}", m.out1, m.out2);
            }
        }
        Commands::Dump => {
            let mut session = open_session(&cli, &config)?;
            fetch(&mut session, Space::Register, timeout)?;
            fetch(&mut session, Space::Mtp, timeout)?;
            print_words(&session, Space::Register);
            print_words(&session, Space::Mtp);
            print_fields(&session);
        }
        Commands::Monitor { seconds } => {
            let mut session = open_session(&cli, &config)?;
            print_lines(&mut session, seconds.map(Duration::from_secs));
        }
        Commands::ProgramRegs { set, mode } => {
            let mut session = open_session(&cli, &config)?;
            fetch(&mut session, Space::Register, timeout)?;
            if let Some(mode) = mode {
                session.apply_sensing_mode(*mode)?;
            }
            apply_edits(&mut session, Space::Register, set)?;
            print_fields(&session);

            let expected = session.state().register_words();
            session.program_registers()?;
            fetch(&mut session, Space::Register, timeout)?;
            verify(&expected, &session.state().register_words(), Space::Register);
        }
        Commands::ProgramMtp {
            set,
            from_regs,
            force_lock_bits,
            yes,
        } => {
            let mut session = open_session(&cli, &config)?;
            fetch(&mut session, Space::Mtp, timeout)?;
            if *from_regs {
                fetch(&mut session, Space::Register, timeout)?;
                session.copy_registers_to_mtp();
            }
            apply_edits(&mut session, Space::Mtp, set)?;
            print_fields(&session);

            if session.mtp_lock_risk() && !*force_lock_bits {
                anyhow::bail!(
                    "MTP 0x0C holds MEMLOCK/DIS_DIAG bits, non-zero values can permanently lock \
                     the chip or disable diagnostics. Clear them or pass --force-lock-bits"
                );
            }
            if !*yes {
                anyhow::bail!(
                    "MTP is non-volatile with limited write cycles, this writes 0x00-0x0E \
                     (8 words). Pass --yes to proceed"
                );
            }

            let expected = session.state().mtp_program_words();
            session.program_mtp()?;
            fetch(&mut session, Space::Mtp, timeout)?;
            verify(&expected, &session.state().mtp_program_words(), Space::Mtp);
        }
        Commands::Lock { yes_really } => {
            anyhow::ensure!(
                *yes_really,
                "MEMLOCK is permanent, the MTP can never be programmed again. Pass --yes-really"
            );
            let mut session = open_session(&cli, &config)?;
            fetch(&mut session, Space::Mtp, timeout)?;
            if session.field("MEMLOCK", Space::Mtp)? == Some(1) {
                log::warn!("MEMLOCK is already set");
            }
            session.lock_mtp()?;
            print_lines(&mut session, Some(timeout));
        }
    }

    Ok(())
}

fn open_session(cli: &Cli, config: &Config) -> Result<Session> {
    let port = cli
        .port
        .clone()
        .or_else(|| config.port.clone())
        .context("no serial port given, use --port or set `port` in the config")?;
    let baud = cli.baud.unwrap_or(config.baud);
    let mut session = Session::from_config(config)?;
    session.connect(&port, baud)?;
    Ok(session)
}

/// Request a dump of `space` and wait until every word of it came back.
fn fetch(session: &mut Session, space: Space, timeout: Duration) -> Result<()> {
    let wanted = session.words_received(space) + space.addresses().count();
    match space {
        Space::Register => session.read_registers()?,
        Space::Mtp => session.read_mtp()?,
    }
    let ok = session.wait_until(timeout, |s| s.words_received(space) >= wanted);
    if !ok {
        if let Some(reason) = session.last_error() {
            anyhow::bail!("{} dump failed: {}", space, reason);
        }
        anyhow::bail!("no complete {} dump within {:?}", space, timeout);
    }
    Ok(())
}

fn apply_edits(session: &mut Session, space: Space, edits: &[(String, String)]) -> Result<()> {
    for (name, value) in edits {
        let written = session.set_field_text(name, space, value)?;
        anyhow::ensure!(written, "{} has no address in {}", name, space);
    }
    Ok(())
}

fn verify(expected: &[u16], actual: &[u16], space: Space) {
    let mismatches: Vec<_> = space
        .addresses()
        .zip(expected.iter().zip(actual))
        .filter(|(_, (e, a))| e != a)
        .collect();
    if mismatches.is_empty() {
        log::info!("Verified {}", space);
    }
    for (addr, (e, a)) in mismatches {
        log::warn!("{} 0x{:02X}: wrote 0x{:04X}, read back 0x{:04X}", space, addr, e, a);
    }
}

/// Print lines until `limit` elapses, or forever.
fn print_lines(session: &mut Session, limit: Option<Duration>) {
    let started = Instant::now();
    while session.is_connected() {
        if limit.is_some_and(|l| started.elapsed() >= l) {
            break;
        }
        match session.poll(Duration::from_millis(100)) {
            Some(Incoming::Line { text, .. }) => println!("{}", text),
            Some(Incoming::Disconnected(reason)) => log::error!("{}", reason),
            Some(Incoming::WriteFailed(reason)) => log::warn!("{}", reason),
            None => {}
        }
    }
}

fn print_words(session: &Session, space: Space) {
    println!("{}:", space);
    println!("  {:<6} {:>6} {:>8}", "ADDR", "DEC", "HEX");
    for addr in space.addresses() {
        let w = session.state().space(space).get(addr);
        println!("  0x{:02X}   {:>6}   0x{:04X}", addr, w, w);
    }
}

fn print_fields(session: &Session) {
    println!(
        "{:<12} {:>8} {:>8} {:>8} {:>8}",
        "Parameter", "REG_DEC", "MTP_DEC", "REG_HEX", "MTP_HEX"
    );
    for spec in session.fields().fields() {
        let (reg_dec, reg_hex) = match session.state().read_field(spec, Space::Register) {
            Some(v) => (v.to_string(), format!("0x{:X}", v)),
            None => ("N/A".to_string(), "N/A".to_string()),
        };
        let mtp = session
            .state()
            .read_field(spec, Space::Mtp)
            .unwrap_or_default();
        println!(
            "{:<12} {:>8} {:>8} {:>8} {:>8}",
            spec.name,
            reg_dec,
            mtp,
            reg_hex,
            format!("0x{:X}", mtp)
        );
    }
}
