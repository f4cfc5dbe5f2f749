//! Inspect command implementation.

use super::LogSource;
use serde::Serialize;
use std::path::Path;

/// Log statistics.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Log directory.
    pub path: String,
    /// File name prefix.
    pub base_name: String,
    /// Store the log belongs to.
    pub store_id: String,
    /// Segment size in bytes.
    pub segment_size: u32,
    /// Total size of all files.
    pub total_size: u64,
    /// Per-file details.
    pub files: Vec<FileInfo>,
}

/// One log file.
#[derive(Debug, Serialize)]
pub struct FileInfo {
    /// File name.
    pub name: String,
    /// Log version.
    pub version: u64,
    /// Size in bytes.
    pub size: u64,
    /// Header fields, absent while the header is unwritten.
    pub header: Option<HeaderInfo>,
}

/// Header fields of one file.
#[derive(Debug, Serialize)]
pub struct HeaderInfo {
    /// Header format version.
    pub format_version: u8,
    /// Kernel version byte.
    pub kernel_version: u8,
    /// Last transaction id started before this file.
    pub base_tx_id: u64,
    /// Last append index before this file.
    pub base_append_index: u64,
    /// Checksum the first envelope chains from.
    pub previous_checksum: u32,
}

/// Gathers per-file details of the log.
pub fn inspect(
    path: &Path,
    source: &LogSource,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let files = &source.files;
    let mut result = InspectResult {
        path: path.display().to_string(),
        base_name: files.base_name().to_string(),
        store_id: source.header.store_id.to_string(),
        segment_size: source.header.segment_size,
        total_size: 0,
        files: Vec::with_capacity(source.versions.len()),
    };

    for &version in &source.versions {
        let size = match files.open_channel(version)? {
            Some(channel) => channel.size()?,
            None => continue,
        };
        let header = files.read_header(version)?.map(|h| HeaderInfo {
            format_version: h.format_version,
            kernel_version: h.kernel_version.as_byte(),
            base_tx_id: h.base_tx_id,
            base_append_index: h.base_append_index,
            previous_checksum: h.previous_checksum,
        });
        result.total_size += size;
        result.files.push(FileInfo {
            name: files.file_name(version),
            version,
            size,
            header,
        });
    }
    Ok(result)
}

/// Runs the inspect command.
pub fn run(path: &Path, base_name: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let source = LogSource::open(path, base_name)?;
    let result = inspect(path, &source)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Transaction Log: {}", result.path);
    println!("═══════════════════════════════════════════");
    println!();
    println!("Store:         {}", result.store_id);
    println!("Segment size:  {}", format_size(u64::from(result.segment_size)));
    println!("Files:         {}", result.files.len());
    println!("Total size:    {}", format_size(result.total_size));
    println!();

    for file in &result.files {
        println!("{} ({})", file.name, format_size(file.size));
        match &file.header {
            Some(header) => {
                println!(
                    "  format {}  kernel V{}  base tx {}  base append index {}",
                    header.format_version,
                    header.kernel_version,
                    header.base_tx_id,
                    header.base_append_index
                );
                println!("  previous checksum {:#010x}", header.previous_checksum);
            }
            None => println!("  (header not written)"),
        }
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
