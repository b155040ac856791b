//! Saved Time-Series JSON → Excel
//!
//! Converts reporting responses saved to disk (`{"values": [[datetime, value], ...]}`)
//! into workbooks with `datetime,value` columns, one `.xlsx` beside each input.
//!
//! Usage:
//!   cargo run --bin json_to_xlsx                     # every *.json in the working directory
//!   cargo run --bin json_to_xlsx -- a.json b.json

use std::fs;
use std::path::PathBuf;

use clap::Parser;

use usace_reservoirs::download::convert_saved_response;

#[derive(Parser, Debug)]
#[command(name = "json_to_xlsx", version, about = "Convert saved CWMS time-series JSON to XLSX")]
struct Cli {
    /// JSON files to convert (default: *.json in the working directory)
    files: Vec<PathBuf>,

    #[arg(short, long)]
    verbose: bool,
}

fn json_files_in_cwd() -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(".")?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    Ok(files)
}

fn main() {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();

    let files = if cli.files.is_empty() {
        match json_files_in_cwd() {
            Ok(files) => files,
            Err(e) => {
                eprintln!("❌ Cannot read working directory: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        cli.files
    };

    if files.is_empty() {
        println!("No JSON files found in current directory");
        return;
    }

    let mut failed = 0;
    for file in &files {
        println!("📄 Reading {}...", file.display());
        match convert_saved_response(file) {
            Ok(conversion) => {
                println!("✓ Data successfully converted!");
                match &conversion.summary {
                    Some(s) => {
                        println!("   Total rows: {}", s.count);
                        println!("   Date range: {} to {}", s.first, s.last);
                        println!("   Value range: {:.2} to {:.2}", s.min, s.max);
                    }
                    None => println!("   Total rows: 0"),
                }
                println!("   Output saved to: {}\n", conversion.output.display());
            }
            Err(e) => {
                eprintln!("❌ Error processing {}: {}\n", file.display(), e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        std::process::exit(1);
    }
}
