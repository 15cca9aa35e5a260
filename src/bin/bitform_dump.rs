//! Schema-driven binary dump utility
//! Decodes a file with a JSON schema and prints the decoded record as JSON

use bitform::io::hexdump;
use bitform::{BitStream, Record, SchemaFile, TypeRegistry};
use std::env;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tracing_subscriber::{fmt::format::FmtSpan, prelude::*, EnvFilter};

fn usage(program: &str) -> ! {
    eprintln!("Usage: {} <schema.json> <data file> [options]", program);
    eprintln!("\nOptions:");
    eprintln!("  --path <path>    Print only the value at a path such as header.items[2]");
    eprintln!("  --hex            Also print a hex dump of the re-encoded record");
    eprintln!("  --check          Re-encode the record and compare it with the input");
    eprintln!("  --unseekable     Read the data file as a plain stream without seeking");
    std::process::exit(1);
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let filter_layer = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let format_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::NONE)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(format_layer)
        .init();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        usage(&args[0]);
    }

    let schema_file = &args[1];
    let data_file = &args[2];
    let mut path = None;
    let mut show_hex = false;
    let mut check = false;
    let mut unseekable = false;

    let mut rest = args[3..].iter();
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--path" => match rest.next() {
                Some(p) => path = Some(p.clone()),
                None => usage(&args[0]),
            },
            "--hex" => show_hex = true,
            "--check" => check = true,
            "--unseekable" => unseekable = true,
            other => {
                eprintln!("Unknown option: {}", other);
                usage(&args[0]);
            }
        }
    }

    // Load schema
    let schema = SchemaFile::from_path(schema_file)?;
    let proto = schema.sanitize(Arc::new(TypeRegistry::with_builtins()))?;
    tracing::info!("Loaded schema {} (root type {})", schema_file, proto.type_name);

    // Decode
    let file = File::open(data_file)?;
    let mut record = Record::new(&proto)?;
    let trailing = if unseekable {
        let mut io = BitStream::unseekable_reader(BufReader::new(file));
        record.read(&mut io)?;
        None
    } else {
        let mut io = BitStream::reader(BufReader::new(file))?;
        record.read(&mut io)?;
        Some(io.bytes_remaining()?)
    };
    tracing::info!("Decoded {} bytes from {}", record.num_bytes()?, data_file);
    if let Some(trailing) = trailing.filter(|&n| n > 0) {
        tracing::warn!("{} trailing bytes were not consumed", trailing);
    }

    let value = match &path {
        Some(p) => record.get(p)?,
        None => record.snapshot()?,
    };
    println!("{}", serde_json::to_string_pretty(&value)?);

    if show_hex || check {
        let encoded = record.to_bytes()?;
        if show_hex {
            println!("\n{}", hexdump(&encoded));
        }
        if check {
            let original = std::fs::read(data_file)?;
            if original.starts_with(&encoded) {
                println!("Round trip OK ({} bytes)", encoded.len());
            } else {
                anyhow::bail!("re-encoded record differs from {}", data_file);
            }
        }
    }

    Ok(())
}
