use jfr_parse::JfrReader;
use std::env;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    if args.len() != 2 {
        eprintln!("Usage: {} <file.jfr>", args[0]);
        return ExitCode::from(2);
    }

    let path = &args[1];

    let mut jfr = match JfrReader::open(path) {
        Ok(jfr) => jfr,
        Err(e) => {
            eprintln!("Error opening '{}': {}", path, e);
            return ExitCode::FAILURE;
        }
    };

    let mut chunks = 0u64;
    let mut events = 0u64;
    loop {
        match jfr.next_chunk() {
            Ok(true) => chunks += 1,
            Ok(false) => break,
            Err(e) => {
                eprintln!("Invalid JFR file '{}': {}", path, e);
                return ExitCode::FAILURE;
            }
        }
        loop {
            match jfr.read_any_event() {
                Ok(Some(_)) => events += 1,
                Ok(None) => break,
                Err(e) => {
                    eprintln!("Invalid JFR file '{}': {}", path, e);
                    return ExitCode::FAILURE;
                }
            }
        }
    }

    let duration_ms = if chunks > 0 {
        jfr.duration_nanos() / 1_000_000
    } else {
        0
    };
    println!("Valid JFR recording: {}", path);
    println!("  Chunks: {}", chunks);
    println!("  Duration: {} ms", duration_ms);
    println!("  Events: {}", events);
    println!("  Threads: {}", jfr.threads.len());
    println!("  Classes: {}", jfr.classes.len());
    println!("  Methods: {}", jfr.methods.len());
    println!("  Symbols: {}", jfr.symbols.len());
    println!("  Stack traces: {}", jfr.stack_traces.len());
    ExitCode::SUCCESS
}
