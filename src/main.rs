use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use clap::{Parser, Subcommand};

use vrs::datalayout::DataLayout;
use vrs::error::{Result, VrsError};
use vrs::filter::{CopyMode, RecordFilter, TimeSpec};
use vrs::format::{BlockHeader, BlockType, BLOCK_HEADER_SIZE};
use vrs::player::{RecordFormatPlayer, RecordFormatStreamPlayer};
use vrs::reader::{RecordFileReader, RecordInfo};
use vrs::record_format::{AudioContentBlockSpec, ImageContentBlockSpec, ImageFormat};
use vrs::writer::RecordFileWriterOptions;
use vrs::{CompressionPreset, MultiRecordFileReader, RecordType};

#[derive(Parser)]
#[command(
    name = "vrs",
    version = "1.0.0",
    about = "The VRS container format CLI",
    after_help = "With no command, prints the file's details.\n\
                  Filters: '+ <streamOrType>' includes, '- <streamOrType>' excludes;\n\
                  '--after <t|±t>', '--before <t|±t>', '--around <center> <window>'."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    /// VRS file (implicit "details" command)
    path: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Overview: tags, streams, record counts
    Details {
        path: String,
    },
    /// Copy records into a new file, with filters
    Copy {
        path: String,
        /// Output file (required)
        #[arg(long)]
        to: PathBuf,
        /// Target compression: none, lz4[-tight], zstd[-light|-medium|-tight]
        #[arg(long)]
        compression: Option<String>,
        /// Re-encode payloads instead of copying them verbatim
        #[arg(long)]
        reencode: bool,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        filters: Vec<String>,
    },
    /// Merge several related files into one, with filters
    Merge {
        /// Input files, then any filter tokens
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
        #[arg(long)]
        to: PathBuf,
        #[arg(long)]
        compression: Option<String>,
    },
    /// Decode every record, report failures
    Check {
        path: String,
    },
    /// One checksum over all decoded record payloads
    Checksum {
        path: String,
    },
    /// Per-record checksums of decoded payloads
    Checksums {
        path: String,
    },
    /// One checksum over the raw on-disk payloads (no decode)
    ChecksumVerbatim {
        path: String,
    },
    /// Dump the block structure with leading payload bytes
    Hexdump {
        path: String,
        /// Payload bytes to show per block
        #[arg(long, default_value = "32")]
        bytes: usize,
    },
    /// Decode every record, printing one line per record
    Decode {
        path: String,
    },
    /// Compare the decoded records of two files
    Compare {
        left: String,
        right: String,
    },
    /// Compare the raw record payloads of two files
    CompareVerbatim {
        left: String,
        right: String,
    },
    /// Dump block headers (offset, type, size)
    Debug {
        path: String,
    },
    /// List the record formats and layout schemas of every stream
    RecordFormats {
        path: String,
    },
    /// One line per record
    List {
        path: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        filters: Vec<String>,
    },
    /// Play records, printing data-layout contents
    Print {
        path: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        filters: Vec<String>,
    },
    /// Like print, with full piece-level detail
    PrintDetails {
        path: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        filters: Vec<String>,
    },
    /// Data-layout contents as compact JSON lines
    PrintJson {
        path: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        filters: Vec<String>,
    },
    /// Data-layout contents as pretty JSON
    PrintJsonPretty {
        path: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        filters: Vec<String>,
    },
    /// Everything a bug report needs
    Rage {
        path: String,
    },
    /// Extract image blocks to files
    ExtractImages {
        path: String,
        #[arg(long)]
        to: PathBuf,
    },
    /// Extract audio blocks to files
    ExtractAudio {
        path: String,
        #[arg(long)]
        to: PathBuf,
    },
    /// Extract everything: metadata JSON plus media blobs
    ExtractAll {
        path: String,
        #[arg(long)]
        to: PathBuf,
    },
    /// File description as compact JSON
    JsonDescription {
        path: String,
    },
    /// File description as pretty JSON
    JsonPrettyDescription {
        path: String,
    },
    /// Rebuild a missing or damaged index and write it back
    FixIndex {
        path: String,
    },
    /// Benchmark every compression preset against the file's payloads
    CompressionBenchmark {
        path: String,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        None => {
            let path = cli.path.ok_or_else(|| {
                VrsError::InvalidParameter("a file path or a command is required".into())
            })?;
            details(&path)
        }
        Some(command) => match command {
            Commands::Details { path } => details(&path),
            Commands::Copy { path, to, compression, reencode, filters } => {
                copy(&path, &to, compression.as_deref(), reencode, &filters)
            }
            Commands::Merge { args, to, compression } => {
                // Input paths come first; the first filter-looking token
                // starts the filter list.
                let split = args
                    .iter()
                    .position(|a| matches!(a.as_str(), "+" | "-") || a.starts_with("--"))
                    .unwrap_or(args.len());
                let (paths, filters) = args.split_at(split);
                merge(paths, &to, compression.as_deref(), filters)
            }
            Commands::Check { path } => check(&path),
            Commands::Checksum { path } => checksum(&path, false),
            Commands::Checksums { path } => checksums(&path),
            Commands::ChecksumVerbatim { path } => checksum(&path, true),
            Commands::Hexdump { path, bytes } => hexdump(&path, bytes),
            Commands::Decode { path } => decode(&path),
            Commands::Compare { left, right } => compare(&left, &right, false),
            Commands::CompareVerbatim { left, right } => compare(&left, &right, true),
            Commands::Debug { path } => debug_blocks(&path),
            Commands::RecordFormats { path } => record_formats(&path),
            Commands::List { path, filters } => list(&path, &filters),
            Commands::Print { path, filters } => print_records(&path, &filters, PrintMode::Text),
            Commands::PrintDetails { path, filters } => {
                print_records(&path, &filters, PrintMode::Details)
            }
            Commands::PrintJson { path, filters } => {
                print_records(&path, &filters, PrintMode::Json)
            }
            Commands::PrintJsonPretty { path, filters } => {
                print_records(&path, &filters, PrintMode::JsonPretty)
            }
            Commands::Rage { path } => rage(&path),
            Commands::ExtractImages { path, to } => extract(&path, &to, Extract::Images),
            Commands::ExtractAudio { path, to } => extract(&path, &to, Extract::Audio),
            Commands::ExtractAll { path, to } => extract(&path, &to, Extract::All),
            Commands::JsonDescription { path } => json_description(&path, false),
            Commands::JsonPrettyDescription { path } => json_description(&path, true),
            Commands::FixIndex { path } => fix_index(&path),
            Commands::CompressionBenchmark { path } => compression_benchmark(&path),
        },
    }
}

// ── Filter token parsing ─────────────────────────────────────────────────────

/// Parse the trailing `+ x / - x / --after / --before / --around /
/// --decimate` tokens shared by the filtering commands.
fn parse_filters(tokens: &[String]) -> Result<RecordFilter> {
    let mut filter = RecordFilter::default();
    let mut i = 0usize;
    let take = |i: &mut usize, what: &str| -> Result<String> {
        *i += 1;
        tokens
            .get(*i - 1)
            .cloned()
            .ok_or_else(|| VrsError::InvalidParameter(format!("{what} needs a value")))
    };
    while i < tokens.len() {
        let token = tokens[i].clone();
        i += 1;
        match token.as_str() {
            "+" => {
                let value = take(&mut i, "+")?;
                filter.add_token(true, &value)?;
            }
            "-" => {
                let value = take(&mut i, "-")?;
                filter.add_token(false, &value)?;
            }
            "--after" => {
                let value = take(&mut i, "--after")?;
                filter.after = Some(parse_time(&value)?);
            }
            "--before" => {
                let value = take(&mut i, "--before")?;
                filter.before = Some(parse_time(&value)?);
            }
            "--around" => {
                let center: f64 = parse_number(&take(&mut i, "--around")?)?;
                let window: f64 = parse_number(&take(&mut i, "--around")?)?;
                filter.around = Some((center, window));
            }
            "--decimate" => {
                filter.decimate_interval = Some(parse_number(&take(&mut i, "--decimate")?)?);
            }
            other if other.starts_with('+') => filter.add_token(true, &other[1..])?,
            other => {
                return Err(VrsError::InvalidParameter(format!(
                    "unexpected filter token '{other}'"
                )))
            }
        }
    }
    filter.validate()?;
    Ok(filter)
}

fn parse_time(s: &str) -> Result<TimeSpec> {
    TimeSpec::parse(s)
        .ok_or_else(|| VrsError::InvalidParameter(format!("bad time specification '{s}'")))
}

fn parse_number(s: &str) -> Result<f64> {
    s.parse()
        .map_err(|_| VrsError::InvalidParameter(format!("bad number '{s}'")))
}

fn parse_preset(s: Option<&str>) -> Result<CompressionPreset> {
    match s {
        None => Ok(CompressionPreset::default()),
        Some(name) => CompressionPreset::from_name(name)
            .ok_or_else(|| VrsError::InvalidParameter(format!("unknown preset '{name}'"))),
    }
}

/// Terminal progress redraws are disabled inside IDE consoles.
fn terminal_progress_enabled() -> bool {
    let xpc = std::env::var("XPC_SERVICE_NAME").unwrap_or_default();
    if xpc.contains("qtcreator") || xpc.contains("Qt Creator") {
        return false;
    }
    !std::env::var("TERM").unwrap_or_default().contains("nuclide")
}

// ── details / rage ───────────────────────────────────────────────────────────

fn details(path: &str) -> Result<i32> {
    let reader = RecordFileReader::open(path)?;
    println!("── VRS file ─────────────────────────────────────────────");
    println!("  Path            {path}");
    println!("  File size       {} B", reader.total_size());
    println!("  Format version  {}", reader.file_header().format_version);
    println!("  UUID            {}", reader.file_header().file_uuid);
    println!("  Index           {} record(s){}", reader.record_count(),
        if reader.index_was_rebuilt() { " (rebuilt by scan)" } else { "" });
    if !reader.file_tags().is_empty() {
        println!("  File tags:");
        for (name, value) in reader.file_tags() {
            println!("    {name} = {value}");
        }
    }
    println!("  Streams ({}):", reader.stream_ids().len());
    for id in reader.stream_ids() {
        let tags = reader.get_tags(id);
        let flavor = tags
            .and_then(|t| t.flavor.clone())
            .map(|f| format!("  [{f}]"))
            .unwrap_or_default();
        let config = reader.record_count_for(id, Some(RecordType::Configuration));
        let state = reader.record_count_for(id, Some(RecordType::State));
        let data = reader.record_count_for(id, Some(RecordType::Data));
        println!("    {id}{flavor}  {config} config, {state} state, {data} data");
    }
    Ok(0)
}

fn rage(path: &str) -> Result<i32> {
    details(path)?;
    let reader = RecordFileReader::open(path)?;
    println!();
    println!("  ── Header ───────────────────────────────────────────");
    println!("  description_offset  {}", reader.file_header().description_offset);
    println!("  index_offset        {}", reader.file_header().index_offset);
    println!("  first_record_offset {}", reader.file_header().first_record_offset);
    println!();
    println!("  ── Stream tags ──────────────────────────────────────");
    for id in reader.stream_ids() {
        if let Some(tags) = reader.get_tags(id) {
            println!("  {id}:");
            for (name, value) in &tags.tags {
                println!("    user  {name} = {value}");
            }
            for (name, value) in &tags.vrs_tags {
                let shown = if value.len() > 100 { &value[..100] } else { value };
                println!("    vrs   {name} = {shown}");
            }
        }
    }
    println!();
    let decode_errors = count_decode_errors(path)?;
    println!("  Decode errors: {decode_errors}");
    Ok(0)
}

// ── copy / merge ─────────────────────────────────────────────────────────────

fn copy(
    path: &str,
    to: &Path,
    compression: Option<&str>,
    reencode: bool,
    filter_tokens: &[String],
) -> Result<i32> {
    let filter = parse_filters(filter_tokens)?;
    let mut reader = RecordFileReader::open(path)?;
    let mode = if reencode || compression.is_some() {
        CopyMode::Reencode { preset: parse_preset(compression)?, transform: None }
    } else {
        CopyMode::Verbatim
    };
    let stats = vrs::copy_records(
        &mut reader,
        to,
        &filter,
        mode,
        &RecordFileWriterOptions::default(),
    )?;
    println!(
        "Copied {} record(s) from {} stream(s) → {}",
        stats.records_copied,
        stats.streams_kept,
        to.display()
    );
    Ok(0)
}

fn merge(
    paths: &[String],
    to: &Path,
    compression: Option<&str>,
    filter_tokens: &[String],
) -> Result<i32> {
    if paths.len() < 2 {
        return Err(VrsError::InvalidParameter("merge needs at least two files".into()));
    }
    if compression.is_some() {
        // Merge copies payloads verbatim; recompression is a follow-up copy.
        return Err(VrsError::InvalidParameter(
            "merge does not recompress; run copy --compression on the result".into(),
        ));
    }
    let filter = parse_filters(filter_tokens)?;
    let mut multi = MultiRecordFileReader::open(paths)?;
    let stats = vrs::filter::merge_records(
        &mut multi,
        to,
        &filter,
        &RecordFileWriterOptions::default(),
    )?;
    println!(
        "Merged {} record(s) from {} file(s) ({} streams) → {}",
        stats.records_copied,
        paths.len(),
        stats.streams_kept,
        to.display()
    );
    Ok(0)
}

// ── check / decode / checksums / compare ─────────────────────────────────────

fn count_decode_errors(path: &str) -> Result<usize> {
    let mut reader = RecordFileReader::open(path)?;
    let entries: Vec<_> = reader.index().to_vec();
    let mut errors = 0usize;
    for entry in &entries {
        if reader.load_record_payload(entry).is_err() {
            errors += 1;
        }
    }
    Ok(errors)
}

fn check(path: &str) -> Result<i32> {
    let mut reader = RecordFileReader::open(path)?;
    let entries: Vec<_> = reader.index().to_vec();
    let total = entries.len();
    let progress = terminal_progress_enabled();
    let mut errors = 0usize;
    for (i, entry) in entries.iter().enumerate() {
        if let Err(e) = reader.load_record_payload(entry) {
            eprintln!("record {i} @ {}: {e}", entry.offset);
            errors += 1;
        }
        if progress && total > 100 && i % 100 == 0 {
            print!("\r  checking {i}/{total}");
            let _ = std::io::stdout().flush();
        }
    }
    if progress && total > 100 {
        println!();
    }
    if reader.index_was_rebuilt() {
        println!("Index was rebuilt by scanning.");
    }
    println!("{} record(s), {errors} error(s)", total);
    Ok(if errors == 0 { 0 } else { 1 })
}

fn decode(path: &str) -> Result<i32> {
    let mut reader = RecordFileReader::open(path)?;
    let entries: Vec<_> = reader.index().to_vec();
    let mut errors = 0usize;
    for entry in &entries {
        match reader.load_record_payload(entry) {
            Ok((info, payload)) => println!(
                "{:<12.6}  {}  {:<13}  {} B",
                info.timestamp,
                info.stream_id,
                info.record_type.name(),
                payload.len()
            ),
            Err(e) => {
                println!("{:<12.6}  {}  {:<13}  ERROR {e}",
                    entry.timestamp, entry.stream_id, entry.record_type.name());
                errors += 1;
            }
        }
    }
    Ok(if errors == 0 { 0 } else { 1 })
}

/// One hash covering every record (prolog fields + payload), in file order.
fn file_digest(path: &str, verbatim: bool) -> Result<String> {
    let mut reader = RecordFileReader::open(path)?;
    let entries: Vec<_> = reader.index().to_vec();
    let mut hasher = blake3::Hasher::new();
    for entry in &entries {
        hasher.update(&entry.timestamp.to_le_bytes());
        hasher.update(&entry.stream_id.as_u32().to_le_bytes());
        hasher.update(&[entry.record_type as u8]);
        if verbatim {
            let (_, raw) = reader.load_record_verbatim(entry)?;
            hasher.update(&raw);
        } else {
            let (_, payload) = reader.load_record_payload(entry)?;
            hasher.update(&payload);
        }
    }
    Ok(hasher.finalize().to_hex().to_string())
}

fn checksum(path: &str, verbatim: bool) -> Result<i32> {
    println!("{}", file_digest(path, verbatim)?);
    Ok(0)
}

fn checksums(path: &str) -> Result<i32> {
    let mut reader = RecordFileReader::open(path)?;
    let entries: Vec<_> = reader.index().to_vec();
    for entry in &entries {
        let (info, payload) = reader.load_record_payload(entry)?;
        let hash = blake3::hash(&payload);
        println!(
            "{:<12.6}  {}  {:<13}  {}",
            info.timestamp,
            info.stream_id,
            info.record_type.name(),
            &hash.to_hex().to_string()[..16]
        );
    }
    Ok(0)
}

fn compare(left: &str, right: &str, verbatim: bool) -> Result<i32> {
    let a = file_digest(left, verbatim)?;
    let b = file_digest(right, verbatim)?;
    if a == b {
        println!("{left} and {right} contain the same records");
        Ok(0)
    } else {
        println!("{left} and {right} differ");
        println!("  {a}  {left}");
        println!("  {b}  {right}");
        Ok(1)
    }
}

// ── structure dumps ──────────────────────────────────────────────────────────

fn walk_blocks(path: &str, mut visit: impl FnMut(u64, &BlockHeader, &[u8])) -> Result<()> {
    use std::io::{Read, Seek, SeekFrom};
    let mut file = vrs::chunked_file::ChunkedFileReader::open(path)?;
    let total = file.total_size();
    let mut offset = 0u64;
    while offset + BLOCK_HEADER_SIZE as u64 <= total {
        file.seek(SeekFrom::Start(offset))?;
        let header = match BlockHeader::read(&mut file) {
            Ok(h) => h,
            Err(_) => break,
        };
        let body_len = (header.body_size() as usize).min(64);
        let mut peek = vec![0u8; body_len];
        let _ = file.read(&mut peek);
        visit(offset, &header, &peek);
        offset += header.block_size;
    }
    Ok(())
}

fn debug_blocks(path: &str) -> Result<i32> {
    walk_blocks(path, |offset, header, _| {
        println!("{offset:>12}  {:<13}  {} B", header.block_type.name(), header.block_size);
    })?;
    Ok(0)
}

fn hexdump(path: &str, bytes: usize) -> Result<i32> {
    walk_blocks(path, |offset, header, peek| {
        let shown = &peek[..peek.len().min(bytes)];
        println!(
            "{offset:>12}  {:<13}  {} B  {}",
            header.block_type.name(),
            header.block_size,
            hex::encode(shown)
        );
    })?;
    Ok(0)
}

fn record_formats(path: &str) -> Result<i32> {
    let reader = RecordFileReader::open(path)?;
    for id in reader.stream_ids() {
        println!("{id}:");
        if let Some(info) = reader.stream_info(id) {
            let mut formats: Vec<_> = info.record_formats().collect();
            formats.sort_by_key(|((rt, v), _)| (*rt as u8, *v));
            for ((record_type, version), format) in formats {
                println!("  {} v{version}: {format}", record_type.name());
                for (block_index, _) in format.blocks().iter().enumerate() {
                    if let Some(schema) = info.layout_schema(*record_type, *version, block_index) {
                        println!("    block {block_index} layout: {schema}");
                    }
                }
            }
        }
    }
    Ok(0)
}

fn json_description(path: &str, pretty: bool) -> Result<i32> {
    let reader = RecordFileReader::open(path)?;
    let text = if pretty {
        serde_json::to_string_pretty(reader.description())?
    } else {
        serde_json::to_string(reader.description())?
    };
    println!("{text}");
    Ok(0)
}

// ── list / print ─────────────────────────────────────────────────────────────

fn list(path: &str, filter_tokens: &[String]) -> Result<i32> {
    let filter = parse_filters(filter_tokens)?;
    let reader = RecordFileReader::open(path)?;
    for entry in filter.select(&reader)? {
        println!(
            "{:<12.6}  {}  {}",
            entry.timestamp,
            entry.stream_id,
            entry.record_type.name()
        );
    }
    Ok(0)
}

#[derive(Clone, Copy, PartialEq)]
enum PrintMode {
    Text,
    Details,
    Json,
    JsonPretty,
}

struct PrintHandler {
    mode: PrintMode,
}

impl RecordFormatPlayer for PrintHandler {
    fn on_data_layout_read(
        &mut self,
        info: &RecordInfo,
        block_index: usize,
        layout: &DataLayout,
    ) -> Result<()> {
        let values = layout.values_json();
        match self.mode {
            PrintMode::Text => {
                println!(
                    "{:<12.6}  {}  {:<13}  block {block_index}: {values}",
                    info.timestamp,
                    info.stream_id,
                    info.record_type.name()
                );
            }
            PrintMode::Details => {
                println!(
                    "{:<12.6}  {}  {:<13}  block {block_index}",
                    info.timestamp,
                    info.stream_id,
                    info.record_type.name()
                );
                for (index, piece) in layout.pieces().iter().enumerate() {
                    println!(
                        "    {} ({}): {}",
                        piece.label,
                        piece.type_name(),
                        layout.piece_value_json(index)
                    );
                }
            }
            PrintMode::Json => {
                let line = serde_json::json!({
                    "timestamp": info.timestamp,
                    "stream": info.stream_id.numeric_name(),
                    "type": info.record_type.name(),
                    "block": block_index,
                    "content": values,
                });
                println!("{line}");
            }
            PrintMode::JsonPretty => {
                let line = serde_json::json!({
                    "timestamp": info.timestamp,
                    "stream": info.stream_id.numeric_name(),
                    "type": info.record_type.name(),
                    "block": block_index,
                    "content": values,
                });
                println!("{}", serde_json::to_string_pretty(&line).unwrap_or_default());
            }
        }
        Ok(())
    }

    fn on_image_read(
        &mut self,
        info: &RecordInfo,
        block_index: usize,
        spec: &ImageContentBlockSpec,
        bytes: &[u8],
    ) -> Result<()> {
        if matches!(self.mode, PrintMode::Text | PrintMode::Details) {
            println!(
                "{:<12.6}  {}  {:<13}  block {block_index}: image {} B ({}x{})",
                info.timestamp,
                info.stream_id,
                info.record_type.name(),
                bytes.len(),
                spec.width.unwrap_or(0),
                spec.height.unwrap_or(0)
            );
        }
        Ok(())
    }

    fn on_audio_read(
        &mut self,
        info: &RecordInfo,
        block_index: usize,
        _spec: &AudioContentBlockSpec,
        bytes: &[u8],
    ) -> Result<()> {
        if matches!(self.mode, PrintMode::Text | PrintMode::Details) {
            println!(
                "{:<12.6}  {}  {:<13}  block {block_index}: audio {} B",
                info.timestamp,
                info.stream_id,
                info.record_type.name(),
                bytes.len()
            );
        }
        Ok(())
    }
}

fn print_records(path: &str, filter_tokens: &[String], mode: PrintMode) -> Result<i32> {
    let filter = parse_filters(filter_tokens)?;
    let mut reader = RecordFileReader::open(path)?;
    for id in reader.stream_ids() {
        if let Some(info) = reader.stream_info(id) {
            let player = RecordFormatStreamPlayer::new(info, PrintHandler { mode });
            reader.set_stream_player(id, Box::new(player));
        }
    }
    for entry in filter.select(&reader)? {
        // Per-record failures are reported and playback continues.
        if let Err(e) = reader.read_record(entry) {
            eprintln!("record @ {}: {e}", entry.offset);
        }
    }
    Ok(0)
}

// ── extract ──────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq)]
enum Extract {
    Images,
    Audio,
    All,
}

#[derive(Default)]
struct ExtractStats {
    images: usize,
    audio: usize,
    metadata: usize,
}

struct ExtractHandler {
    what: Extract,
    dir: PathBuf,
    stats: Arc<Mutex<ExtractStats>>,
}

impl ExtractHandler {
    fn save(&self, name: String, bytes: &[u8]) -> Result<()> {
        std::fs::write(self.dir.join(name), bytes)?;
        Ok(())
    }
}

impl RecordFormatPlayer for ExtractHandler {
    fn on_image_read(
        &mut self,
        info: &RecordInfo,
        _block_index: usize,
        spec: &ImageContentBlockSpec,
        bytes: &[u8],
    ) -> Result<()> {
        if self.what == Extract::Audio {
            return Ok(());
        }
        let extension = match spec.format {
            Some(ImageFormat::Jpg) => "jpg",
            Some(ImageFormat::Png) => "png",
            Some(ImageFormat::Jxl) => "jxl",
            Some(ImageFormat::Video) => "bin",
            _ => "raw",
        };
        let mut stats = self.stats.lock().unwrap();
        stats.images += 1;
        let n = stats.images;
        drop(stats);
        self.save(
            format!("{}-{n:05}-{:.3}.{extension}", info.stream_id, info.timestamp),
            bytes,
        )
    }

    fn on_audio_read(
        &mut self,
        info: &RecordInfo,
        _block_index: usize,
        _spec: &AudioContentBlockSpec,
        bytes: &[u8],
    ) -> Result<()> {
        if self.what == Extract::Images {
            return Ok(());
        }
        let mut stats = self.stats.lock().unwrap();
        stats.audio += 1;
        let n = stats.audio;
        drop(stats);
        self.save(format!("{}-{n:05}.pcm", info.stream_id), bytes)
    }

    fn on_data_layout_read(
        &mut self,
        info: &RecordInfo,
        block_index: usize,
        layout: &DataLayout,
    ) -> Result<()> {
        if self.what != Extract::All {
            return Ok(());
        }
        let mut stats = self.stats.lock().unwrap();
        stats.metadata += 1;
        drop(stats);
        let line = serde_json::json!({
            "timestamp": info.timestamp,
            "stream": info.stream_id.numeric_name(),
            "type": info.record_type.name(),
            "block": block_index,
            "content": layout.values_json(),
        });
        let path = self.dir.join("metadata.jsonl");
        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

fn extract(path: &str, to: &Path, what: Extract) -> Result<i32> {
    std::fs::create_dir_all(to)?;
    let mut reader = RecordFileReader::open(path)?;
    let stats = Arc::new(Mutex::new(ExtractStats::default()));
    for id in reader.stream_ids() {
        if let Some(info) = reader.stream_info(id) {
            let handler = ExtractHandler {
                what,
                dir: to.to_path_buf(),
                stats: Arc::clone(&stats),
            };
            let player = RecordFormatStreamPlayer::new(info, handler);
            reader.set_stream_player(id, Box::new(player));
        }
    }
    let _ = reader.read_all_records();
    let stats = stats.lock().unwrap();
    println!(
        "Extracted {} image(s), {} audio block(s), {} metadata record(s) → {}",
        stats.images,
        stats.audio,
        stats.metadata,
        to.display()
    );
    Ok(0)
}

// ── fix-index ────────────────────────────────────────────────────────────────

fn fix_index(path: &str) -> Result<i32> {
    let reader = RecordFileReader::open(path)?;
    if !reader.index_was_rebuilt() {
        println!("Index is intact; nothing to fix.");
        return Ok(0);
    }
    // Rewriting happens on the single-chunk layout only.
    if vrs::chunked_file::discover_chunks(Path::new(path))?.len() > 1 {
        return Err(VrsError::UnsupportedFeature(
            "fix-index on multi-chunk files".into(),
        ));
    }

    let file_len = std::fs::metadata(path)?.len();
    // Keep only records whose blocks are complete on disk.
    let mut complete = Vec::new();
    let mut truncated = 0usize;
    {
        use std::io::{Seek, SeekFrom};
        let mut file = std::fs::File::open(path)?;
        for entry in reader.index() {
            file.seek(SeekFrom::Start(entry.offset as u64))?;
            match BlockHeader::read(&mut file) {
                Ok(block) if entry.offset as u64 + block.block_size <= file_len => {
                    complete.push((*entry, block.block_size));
                }
                _ => truncated += 1,
            }
        }
    }

    let description = reader.description().clone();
    let mut header = reader.file_header().clone();
    let tail_start = complete
        .last()
        .map(|(entry, size)| entry.offset as u64 + size)
        .unwrap_or(header.first_record_offset);
    let entries: Vec<_> = complete.iter().map(|(entry, _)| *entry).collect();
    drop(reader);

    // Truncate the damaged tail, then append EndOfRecords + index +
    // description and patch the header.
    use std::io::{Seek, SeekFrom};
    let mut file = std::fs::OpenOptions::new().read(true).write(true).open(path)?;
    file.set_len(tail_start)?;
    file.seek(SeekFrom::End(0))?;

    BlockHeader::new(BlockType::EndOfRecords, 0).write(&mut file)?;

    header.description_offset = file.stream_position()?;
    let mut body = Vec::new();
    let body_size = vrs::description::write_json_body(&description, &mut body)?;
    BlockHeader::new(BlockType::Description, body_size).write(&mut file)?;
    file.write_all(&body)?;

    header.index_offset = file.stream_position()?;
    BlockHeader::new(BlockType::IndexRecord, vrs::index::index_body_size(entries.len()))
        .write(&mut file)?;
    vrs::index::write_index(&entries, &mut file)?;

    file.seek(SeekFrom::Start(0))?;
    header.write(&mut file)?;
    file.sync_all()?;

    println!(
        "Index rewritten: {} record(s) kept, {truncated} truncated record(s) dropped.",
        entries.len()
    );
    Ok(0)
}

// ── compression benchmark ────────────────────────────────────────────────────

fn compression_benchmark(path: &str) -> Result<i32> {
    let mut reader = RecordFileReader::open(path)?;
    let entries: Vec<_> = reader.index().to_vec();
    let mut payloads: Vec<Vec<u8>> = Vec::new();
    let mut total_raw = 0usize;
    for entry in &entries {
        if let Ok((_, payload)) = reader.load_record_payload(entry) {
            total_raw += payload.len();
            payloads.push(payload);
        }
    }
    println!("{} record payload(s), {} B raw", payloads.len(), total_raw);
    println!("{:<14} {:>12} {:>8} {:>10} {:>10}", "preset", "bytes", "ratio", "pack ms", "unpack ms");

    for preset in CompressionPreset::ALL {
        let start = Instant::now();
        let mut packed_all: Vec<Vec<u8>> = Vec::with_capacity(payloads.len());
        for payload in &payloads {
            packed_all.push(vrs::compress::compress(payload, preset)?);
        }
        let pack_ms = start.elapsed().as_millis();
        let total_packed: usize = packed_all.iter().map(Vec::len).sum();

        let start = Instant::now();
        if preset.method() != vrs::CompressionMethod::None {
            for (packed, payload) in packed_all.iter().zip(&payloads) {
                vrs::compress::decompress(packed, payload.len())?;
            }
        }
        let unpack_ms = start.elapsed().as_millis();

        println!(
            "{:<14} {:>12} {:>7.1}% {:>10} {:>10}",
            preset.name(),
            total_packed,
            total_packed as f64 / total_raw.max(1) as f64 * 100.0,
            pack_ms,
            unpack_ms
        );
    }
    Ok(0)
}

