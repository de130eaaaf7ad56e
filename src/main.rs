use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use croco::{Cartridge, Context, Operation, Progress, Session, ROM_NAME_LENGTH};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Manage ROMs and save games on a Croco Cartridge.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// USB bus number of the cartridge, if several are connected.
    #[arg(long, requires = "address")]
    bus: Option<u8>,

    /// USB device address of the cartridge, if several are connected.
    #[arg(long, requires = "bus")]
    address: Option<u8>,

    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// List all ROMs on the cartridge.
    List,

    /// Show hardware and firmware information.
    Info,

    /// Upload a ROM image.
    UploadRom {
        file: PathBuf,

        /// Name stored on the cartridge (defaults to the file name, at most 17 bytes).
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Delete a ROM.
    DeleteRom { id: u8 },

    /// Download the save memory of a ROM into a file.
    DownloadSave { id: u8, file: PathBuf },

    /// Upload a file into the save memory of a ROM.
    UploadSave { id: u8, file: PathBuf },
}

fn setup_logging(verbosity: &Verbosity<InfoLevel>) {
    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).without_time())
        .init();
}

fn main() {
    let cli = Cli::parse();
    setup_logging(&cli.verbose);

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let context = Context::new().context("Failed to initialize libusb")?;
    let location = cli.bus.zip(cli.address);
    let mut cartridge = context
        .open_cartridge(location)
        .context("Failed to open cartridge")?;
    let endpoints = cartridge.session().endpoints();
    debug!(
        interface = cartridge.session().interface(),
        bulk_in = endpoints.bulk_in,
        bulk_out = endpoints.bulk_out,
        "Cartridge opened"
    );

    match cli.command {
        Action::List => list(&mut cartridge),
        Action::Info => {
            let identity = cartridge.identity().context("Failed to get device info")?;
            println!("{}", identity);
            Ok(())
        }
        Action::UploadRom { file, name } => {
            let data = fs::read(&file).with_context(|| format!("Failed to read {:?}", file))?;
            let name = name.unwrap_or_else(|| default_name(&file));
            let name = truncate_name(name.as_bytes());
            info!(
                name = %String::from_utf8_lossy(name),
                bytes = data.len(),
                "Uploading ROM"
            );
            let mut upload = cartridge.upload_rom(name, &data)?;
            let total = upload.total();
            run_operation(&mut upload, total)
        }
        Action::DeleteRom { id } => {
            cartridge.delete_rom(id)?;
            println!("Deleted ROM {}", id);
            Ok(())
        }
        Action::DownloadSave { id, file } => {
            let mut download = cartridge.download_save(id, OutputFile::new(file))?;
            let total = download.total();
            run_operation(&mut download, total)
        }
        Action::UploadSave { id, file } => {
            let data = fs::read(&file).with_context(|| format!("Failed to read {:?}", file))?;
            let mut upload = cartridge.upload_save(id, &data)?;
            let total = upload.total();
            run_operation(&mut upload, total)
        }
    }
}

fn list<S: Session>(cartridge: &mut Cartridge<S>) -> Result<()> {
    let catalog = cartridge.catalog().context("Failed to get ROM utilization")?;
    let utilization = catalog.utilization;
    println!(
        "Found {} game(s) using {} / {} banks",
        utilization.rom_count, utilization.used_banks, utilization.max_banks
    );

    if utilization.rom_count == 0 {
        println!("No ROMs found on cartridge");
    }
    for entry in &catalog.entries {
        println!("{}", entry);
    }
    for id in &catalog.skipped {
        println!("[{:2}] <failed to get ROM info>", id);
    }
    Ok(())
}

/// Drives a transfer, logging once per completed bank.
fn run_operation<O: Operation>(operation: &mut O, total: usize) -> Result<()> {
    let mut last = Progress::default();
    for step in operation {
        let progress = step?;
        if progress.banks != last.banks {
            info!(
                "Bank {} done ({} / {} bytes)",
                progress.banks, progress.bytes, total
            );
        }
        last = progress;
    }
    println!("Transferred {} bytes in {} banks", last.bytes, last.banks);
    Ok(())
}

/// A file that is only created once the first byte is written, so a refused transfer leaves
/// an existing file untouched.
struct OutputFile {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl OutputFile {
    fn new(path: PathBuf) -> Self {
        Self { path, writer: None }
    }

    fn writer(&mut self) -> io::Result<&mut BufWriter<File>> {
        match self.writer {
            Some(ref mut writer) => Ok(writer),
            None => {
                let file = File::create(&self.path)?;
                Ok(self.writer.insert(BufWriter::new(file)))
            }
        }
    }
}

impl Write for OutputFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer {
            Some(ref mut writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

fn default_name(file: &Path) -> String {
    file.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn truncate_name(name: &[u8]) -> &[u8] {
    &name[..name.len().min(ROM_NAME_LENGTH)]
}
