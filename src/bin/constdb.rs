use clap::{Parser, Subcommand};
use constdb::{ConstDb, ConstDbBuilder, ConstDbRecord};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Error, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Exit code for a key that is not in the database.
const EXIT_NOT_FOUND: u8 = 1;
/// Exit code for IO failures and corrupt input.
const EXIT_FATAL: u8 = 111;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let result = match cli.command {
        Command::Make(args) => run_make(args),
        Command::Get(args) => run_get(args),
        Command::Dump(args) => run_dump(args),
        Command::Stats(args) => run_stats(args),
        Command::Test(args) => run_test(args),
        Command::Info(args) => run_info(args),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(EXIT_NOT_FOUND),
        Err(e) => {
            eprintln!("constdb: fatal: {e}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "constdb utility for creating, querying and checking constant databases",
    subcommand_required = true,
    arg_required_else_help = true
)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a database from records in `+klen,dlen:key->value` form
    Make(MakeArgs),
    /// Print the value stored under a key
    Get(GetArgs),
    /// Print every record in `+klen,dlen:key->value` form
    Dump(FileArgs),
    /// Print the probe displacement histogram as JSON
    Stats(FileArgs),
    /// Look up every record again and report mismatches as JSON
    Test(FileArgs),
    /// Print a summary of the database as JSON
    Info(FileArgs),
}

#[derive(clap::Args)]
struct MakeArgs {
    /// Path to the database file to produce
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Path to the record input; standard input when omitted
    #[arg(short, long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Slots allocated per record in every bucket table (at least 2)
    #[arg(long, value_name = "FACTOR", default_value_t = 2)]
    slot_factor: u32,

    /// Writer buffer size in bytes
    #[arg(long, value_name = "BYTES", default_value_t = 1 << 20)]
    buffer_size: usize,
}

#[derive(clap::Args)]
struct GetArgs {
    /// Path to the database file
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Key to look up
    key: String,

    /// Print every value stored under the key, one per line
    #[arg(short, long)]
    all: bool,
}

#[derive(clap::Args)]
struct FileArgs {
    /// Path to the database file
    #[arg(value_name = "FILE")]
    input: PathBuf,
}

fn open(path: &Path) -> constdb::Result<ConstDb<File>> {
    ConstDb::load(File::open(path)?)
}

fn run_make(args: MakeArgs) -> constdb::Result<bool> {
    let input: Box<dyn Read> = match &args.input {
        Some(path) => Box::new(File::open(path)?),
        None => Box::new(io::stdin().lock()),
    };
    let mut records = TextRecords::new(BufReader::new(input));

    // Build next to the destination and rename over it only once complete,
    // so readers never observe a partial file.
    let dir = match args.output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let temp = tempfile::Builder::new()
        .prefix(".constdb")
        .tempfile_in(&dir)?;

    let info = ConstDbBuilder::default()
        .with_slot_factor(args.slot_factor)
        .with_writer_buffer_size(args.buffer_size)
        .build(temp.as_file(), &mut records)?;
    if let Some(e) = records.error.take() {
        return Err(e.into());
    }
    temp.as_file().sync_all()?;
    temp.persist(&args.output).map_err(|e| e.error)?;

    print_json(&info)?;
    Ok(true)
}

fn run_get(args: GetArgs) -> constdb::Result<bool> {
    let db = open(&args.input)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if !args.all {
        return match db.get(args.key.as_bytes())? {
            Some(value) => {
                out.write_all(&value)?;
                Ok(true)
            }
            None => Ok(false),
        };
    }

    let mut found = false;
    for value in db.get_all(args.key.as_bytes()) {
        out.write_all(&value?)?;
        out.write_all(b"\n")?;
        found = true;
    }
    Ok(found)
}

fn run_dump(args: FileArgs) -> constdb::Result<bool> {
    let db = open(&args.input)?;
    let mut out = BufWriter::new(io::stdout().lock());
    for record in db.iter() {
        write_text_record(&mut out, &record?)?;
    }
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(true)
}

fn run_stats(args: FileArgs) -> constdb::Result<bool> {
    let db = open(&args.input)?;
    print_json(&db.stats()?)?;
    Ok(true)
}

fn run_test(args: FileArgs) -> constdb::Result<bool> {
    let db = open(&args.input)?;
    let report = db.check()?;
    print_json(&report)?;
    Ok(report.is_clean())
}

fn run_info(args: FileArgs) -> constdb::Result<bool> {
    let db = open(&args.input)?;
    print_json(&db.info()?)?;
    Ok(true)
}

fn print_json<T: serde::Serialize>(value: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| Error::other(format!("Failed to format JSON: {e}")))?;
    println!("{}", json);
    Ok(())
}

fn write_text_record<W: Write>(out: &mut W, record: &ConstDbRecord) -> io::Result<()> {
    write!(out, "+{},{}:", record.key.len(), record.value.len())?;
    out.write_all(&record.key)?;
    out.write_all(b"->")?;
    out.write_all(&record.value)?;
    out.write_all(b"\n")
}

/// Streams `(key, value)` pairs out of `+klen,dlen:key->value\n` lines.
///
/// The input ends with an empty line. Parsing stops at the first malformed
/// record and keeps the error in `error`, so a caller can feed this straight
/// into the builder and check for failure afterwards.
struct TextRecords<R: BufRead> {
    reader: R,
    error: Option<Error>,
    done: bool,
}

impl<R: BufRead> TextRecords<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            error: None,
            done: false,
        }
    }

    fn read_record(&mut self) -> io::Result<Option<(Vec<u8>, Vec<u8>)>> {
        match self.read_byte()? {
            b'\n' => return Ok(None),
            b'+' => {}
            other => return Err(bad_format(format!("expected '+', found {:?}", other as char))),
        }
        let key_len = self.read_number(b',')?;
        let value_len = self.read_number(b':')?;
        let key = self.read_exact(key_len)?;
        self.expect(b"->")?;
        let value = self.read_exact(value_len)?;
        self.expect(b"\n")?;
        Ok(Some((key, value)))
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        let mut byte = [0u8; 1];
        self.reader.read_exact(&mut byte).map_err(truncated)?;
        Ok(byte[0])
    }

    fn read_number(&mut self, terminator: u8) -> io::Result<usize> {
        let mut value: usize = 0;
        let mut digits = 0;
        loop {
            let byte = self.read_byte()?;
            if byte == terminator && digits > 0 {
                return Ok(value);
            }
            if !byte.is_ascii_digit() {
                return Err(bad_format(format!("unexpected {:?} in length", byte as char)));
            }
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add((byte - b'0') as usize))
                .ok_or_else(|| bad_format("length too large".to_string()))?;
            digits += 1;
        }
    }

    fn read_exact(&mut self, length: usize) -> io::Result<Vec<u8>> {
        let mut data = Vec::new();
        (&mut self.reader)
            .take(length as u64)
            .read_to_end(&mut data)?;
        if data.len() != length {
            return Err(truncated(Error::from(ErrorKind::UnexpectedEof)));
        }
        Ok(data)
    }

    fn expect(&mut self, expected: &[u8]) -> io::Result<()> {
        for &byte in expected {
            if self.read_byte()? != byte {
                return Err(bad_format(format!(
                    "expected {:?}",
                    String::from_utf8_lossy(expected)
                )));
            }
        }
        Ok(())
    }
}

impl<R: BufRead> Iterator for TextRecords<R> {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_record() {
            Ok(Some(pair)) => Some(pair),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                self.error = Some(e);
                None
            }
        }
    }
}

fn bad_format(message: String) -> Error {
    Error::new(ErrorKind::InvalidData, format!("bad input format: {message}"))
}

fn truncated(e: Error) -> Error {
    if e.kind() == ErrorKind::UnexpectedEof {
        bad_format("unexpected end of input".to_string())
    } else {
        e
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &[u8]) -> (Vec<(Vec<u8>, Vec<u8>)>, Option<Error>) {
        let mut records = TextRecords::new(input);
        let pairs = records.by_ref().collect();
        (pairs, records.error)
    }

    #[test]
    fn test_parse_records() {
        let (pairs, error) = parse(b"+5,1:alpha->1\n+4,2:beta->\n2\n+0,0:->\n\n");
        assert!(error.is_none());
        assert_eq!(
            pairs,
            vec![
                (b"alpha".to_vec(), b"1".to_vec()),
                (b"beta".to_vec(), b"\n2".to_vec()),
                (Vec::new(), Vec::new()),
            ]
        );
    }

    #[test]
    fn test_parse_errors() {
        for input in [
            &b"+5,1:alpha->1\n"[..],
            b"+5,1:alp",
            b"+5,1:alpha=>1\n\n",
            b"+5;1:alpha->1\n\n",
            b"+,1:alpha->1\n\n",
            b"-5,1:alpha->1\n\n",
            b"+99999999999999999999999,1:alpha->1\n\n",
        ] {
            let (_, error) = parse(input);
            let error = error.unwrap();
            assert_eq!(error.kind(), ErrorKind::InvalidData, "{:?}", input);
        }
    }

    #[test]
    fn test_dump_then_make_round_trip() {
        let records = [
            ConstDbRecord {
                offset: 2048,
                key: b"one".to_vec(),
                value: b"1".to_vec(),
            },
            ConstDbRecord {
                offset: 2060,
                key: b"two->".to_vec(),
                value: b"2\n".to_vec(),
            },
        ];
        let mut text = Vec::new();
        for record in &records {
            write_text_record(&mut text, record).unwrap();
        }
        text.push(b'\n');
        assert_eq!(&text[..14], b"+3,1:one->1\n+5");

        let (pairs, error) = parse(&text);
        assert!(error.is_none());
        let expected: Vec<_> = records
            .iter()
            .map(|r| (r.key.clone(), r.value.clone()))
            .collect();
        assert_eq!(pairs, expected);
    }
}
