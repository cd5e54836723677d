//! DLG CLI - Convert and inspect conversation files.

use clap::{Parser, Subcommand};
use dlg::{Dialog, DlgReader, DlgWriter, GffFile};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "dlg")]
#[command(author, version, about = "DLG conversation file converter", long_about = None)]
struct Cli {
    /// Print debug diagnostics to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert DLG to XML
    ToXml {
        /// Input DLG file
        #[arg(short, long)]
        input: PathBuf,

        /// Output XML file (defaults to input with .xml extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Convert XML to DLG
    ToDlg {
        /// Input XML file
        #[arg(short, long)]
        input: PathBuf,

        /// Output DLG file (defaults to input with .dlg extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show information about a DLG file
    Info {
        /// Input DLG file
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Check a DLG or XML file for structural problems
    Validate {
        /// Input DLG or XML file
        #[arg(short, long)]
        input: PathBuf,
    },
}

fn init_logging(verbose: bool) -> Result<(), log::SetLoggerError> {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!("[{}] {}", record.level(), message))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()
}

fn with_extension(input: &Path, extension: &str) -> PathBuf {
    let mut p = input.to_path_buf();
    p.set_extension(extension);
    p
}

fn is_xml(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"))
}

fn read_dlg(path: &Path) -> Result<Dialog, Box<dyn std::error::Error>> {
    let file = File::open(path)?;
    Ok(DlgReader::read(BufReader::new(file))?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    match cli.command {
        Commands::ToXml { input, output } => {
            let output = output.unwrap_or_else(|| with_extension(&input, "xml"));

            println!("Converting {} -> {}", input.display(), output.display());

            let dialog = read_dlg(&input)?;
            let xml = dialog.to_xml()?;
            std::fs::write(&output, xml)?;

            println!("Done!");
        }

        Commands::ToDlg { input, output } => {
            let output = output.unwrap_or_else(|| with_extension(&input, "dlg"));

            println!("Converting {} -> {}", input.display(), output.display());

            let xml = std::fs::read_to_string(&input)?;
            let dialog = Dialog::from_xml(&xml)?;

            let file = File::create(&output)?;
            DlgWriter::write(&dialog, BufWriter::new(file))?;

            println!("Done!");
        }

        Commands::Info { input } => {
            let data = std::fs::read(&input)?;
            let gff = GffFile::parse(&data)?;
            let header = gff.header();
            let dialog = dlg::decode(&data)?;

            println!("File: {}", input.display());
            println!(
                "Version: {}",
                String::from_utf8_lossy(&header.version).trim_end()
            );
            println!("Structs: {}", header.struct_count);
            println!("Fields: {}", header.field_count);
            println!("Labels: {}", header.label_count);
            println!("Field data: {} bytes", header.field_data_size);
            println!("List indices: {} bytes", header.list_indices_size);
            println!("Entries: {}", dialog.entries.len());
            println!("Replies: {}", dialog.replies.len());
            println!("Starts: {}", dialog.starts.len());
            println!("Pointers: {}", dialog.pointer_count());

            let warnings = dlg::validate(&dialog);
            if !warnings.is_empty() {
                println!("Warnings: {}", warnings.len());
                for warning in &warnings {
                    println!("  {}", warning);
                }
            }
        }

        Commands::Validate { input } => {
            let dialog = if is_xml(&input) {
                Dialog::from_xml(&std::fs::read_to_string(&input)?)?
            } else {
                read_dlg(&input)?
            };

            let warnings = dlg::validate(&dialog);
            for warning in &warnings {
                println!("{}: {}", input.display(), warning);
            }
            if !warnings.is_empty() {
                std::process::exit(1);
            }
            println!("{}: OK", input.display());
        }
    }

    Ok(())
}
