//! Convert JFR recordings to flame graphs, collapsed stacks, or pprof.
//!
//! # Usage
//!
//! ```bash
//! jfrconv recording.jfr profile.html
//! jfrconv --alloc --total recording.jfr profile.pprof.gz
//! jfrconv recording.jfr        # writes ./recording.html
//! jfrconv app.collapsed flame.html
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use flate2::write::GzEncoder;
use flate2::Compression;
use jfr_parse::JfrReader;
use jfrconv::collapsed::CollapsedStacks;
use jfrconv::flame::FlameGraph;
use jfrconv::jfr::JfrConverter;
use jfrconv::{compile_pattern, pprof, Arguments, ConvertError};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

const FORMATS: &[&str] = &["html", "collapsed", "pprof", "pprof.gz"];

#[derive(Parser, Debug)]
#[command(name = "jfrconv")]
#[command(about = "Convert JFR recordings to flame graphs, collapsed stacks, or pprof")]
#[command(version)]
struct Args {
    /// Input files, then an output file or directory (defaults to the
    /// current directory for a single input)
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Output format: html, collapsed, pprof, or pprof.gz
    /// (default derives from the output extension)
    #[arg(short, long)]
    output: Option<String>,

    /// Flame graph page title
    #[arg(long, default_value = "Flame Graph")]
    title: String,

    /// Prune frames narrower than this percentage of the total
    #[arg(long, default_value_t = 0.0)]
    minwidth: f64,

    /// Drop this many root-side frames from every stack
    #[arg(long, default_value_t = 0)]
    skip: usize,

    /// Put callees at the root
    #[arg(long)]
    reverse: bool,

    /// Keep only samples with a frame matching this pattern
    #[arg(long)]
    include: Option<String>,

    /// Drop samples with a frame matching this pattern
    #[arg(long)]
    exclude: Option<String>,

    /// Pattern to highlight in the rendered flame graph
    #[arg(long)]
    highlight: Option<String>,

    /// Allocation profile
    #[arg(long)]
    alloc: bool,

    /// Live object profile
    #[arg(long)]
    live: bool,

    /// Lock contention profile
    #[arg(long)]
    lock: bool,

    /// Split stack traces by thread
    #[arg(long)]
    threads: bool,

    /// Comma-separated thread states to keep (RUNNABLE, SLEEPING, ...)
    #[arg(long)]
    state: Option<String>,

    /// Tag samples with a predefined category
    #[arg(long)]
    classify: bool,

    /// Accumulate total value (time, bytes) instead of sample counts
    #[arg(long)]
    total: bool,

    /// Append line numbers to method names
    #[arg(long)]
    lines: bool,

    /// Append bytecode indices to method names
    #[arg(long)]
    bci: bool,

    /// Simple class names instead of fully qualified ones
    #[arg(long)]
    simple: bool,

    /// Normalize names of hidden classes and lambdas
    #[arg(long)]
    norm: bool,

    /// Dotted class names
    #[arg(long)]
    dot: bool,

    /// Start of the time window in ms: absolute, from start, or negative
    /// from the end of the recording
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    from: i64,

    /// End of the time window in ms (same formats as --from)
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    to: i64,
}

impl Args {
    fn to_arguments(&self) -> Result<Arguments> {
        Ok(Arguments {
            title: self.title.clone(),
            highlight: self.highlight.clone(),
            include: self.include.as_deref().map(compile_pattern).transpose()?,
            exclude: self.exclude.as_deref().map(compile_pattern).transpose()?,
            minwidth: self.minwidth,
            skip: self.skip,
            reverse: self.reverse,
            alloc: self.alloc,
            live: self.live,
            lock: self.lock,
            threads: self.threads,
            classify: self.classify,
            total: self.total,
            lines: self.lines,
            bci: self.bci,
            simple: self.simple,
            norm: self.norm,
            dot: self.dot,
            state: self.state.clone(),
            from: self.from,
            to: self.to,
        })
    }
}

fn run(args: Args) -> Result<()> {
    let arguments = args.to_arguments()?;

    let mut files = args.files.clone();
    if files.len() == 1 {
        files.push(PathBuf::from("."));
    }
    let (inputs, target) = files.split_at(files.len() - 1);
    let target = &target[0];
    let to_directory = target.is_dir();

    let format = match &args.output {
        Some(format) => format.clone(),
        None if to_directory => "html".to_string(),
        None => output_format(target),
    };
    if !FORMATS.contains(&format.as_str()) {
        bail!(ConvertError::InvalidArgument(format!(
            "unknown output format '{}'",
            format
        )));
    }

    for input in inputs {
        let output = if to_directory {
            target.join(replace_ext(input, &format))
        } else {
            target.clone()
        };
        convert_file(input, &output, &format, &arguments)
            .with_context(|| format!("converting '{}'", input.display()))?;
    }
    Ok(())
}

fn convert_file(input: &Path, output: &Path, format: &str, args: &Arguments) -> Result<()> {
    if !is_jfr(input)? {
        // Collapsed text in: the only supported rendering is a flame graph.
        let mut fg = FlameGraph::new(args.clone());
        fg.parse(BufReader::new(File::open(input)?))?;
        let mut out = BufWriter::new(File::create(output)?);
        fg.dump(&mut out)?;
        out.flush()?;
        return Ok(());
    }

    let mut jfr = JfrReader::open(input)?;
    match format {
        "collapsed" => {
            let mut sink = CollapsedStacks::new(BufWriter::new(File::create(output)?));
            JfrConverter::new(&mut jfr, args).convert(&mut sink)?;
            sink.finish()?;
        }
        "pprof" | "pprof.gz" => {
            let file = BufWriter::new(File::create(output)?);
            let gzip = format == "pprof.gz"
                || output.extension().is_some_and(|ext| ext == "gz");
            if gzip {
                let mut encoder = GzEncoder::new(file, Compression::default());
                pprof::convert(&mut jfr, args, &mut encoder)?;
                encoder.finish()?;
            } else {
                pprof::convert(&mut jfr, args, file)?;
            }
        }
        _ => {
            let mut fg = FlameGraph::new(args.clone());
            JfrConverter::new(&mut jfr, args).convert(&mut fg)?;
            let mut out = BufWriter::new(File::create(output)?);
            fg.dump(&mut out)?;
            out.flush()?;
        }
    }
    Ok(())
}

/// Detects JFR input by extension, falling back to the `FLR\0` magic.
fn is_jfr(path: &Path) -> Result<bool> {
    let name = path.to_string_lossy();
    if name.ends_with(".jfr") {
        return Ok(true);
    }
    if name.ends_with(".collapsed") || name.ends_with(".txt") || name.ends_with(".csv") {
        return Ok(false);
    }
    let mut magic = [0u8; 4];
    let n = File::open(path)
        .and_then(|mut f| f.read(&mut magic))
        .with_context(|| format!("reading '{}'", path.display()))?;
    Ok(n == 4 && &magic == b"FLR\0")
}

/// The output format implied by a file name: `pprof.gz` for a compressed
/// pprof suffix, otherwise a recognizable last extension, defaulting to
/// html.
fn output_format(path: &Path) -> String {
    let name = path.to_string_lossy();
    if name.ends_with(".pprof.gz") {
        return "pprof.gz".to_string();
    }
    match path.extension().map(|ext| ext.to_string_lossy().into_owned()) {
        Some(ext) if FORMATS.contains(&ext.as_str()) => ext,
        _ => "html".to_string(),
    }
}

/// Swaps a file name's extension for the output format's.
fn replace_ext(input: &Path, format: &str) -> PathBuf {
    let stem = input.file_stem().unwrap_or(input.as_os_str());
    let mut name = stem.to_os_string();
    name.push(".");
    name.push(format);
    PathBuf::from(name)
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let invalid = e.downcast_ref::<ConvertError>().is_some_and(|c| {
                matches!(
                    c,
                    ConvertError::InvalidArgument(_) | ConvertError::InvalidPattern { .. }
                )
            });
            if invalid {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_output_name() {
        assert_eq!(output_format(Path::new("out.html")), "html");
        assert_eq!(output_format(Path::new("out.collapsed")), "collapsed");
        assert_eq!(output_format(Path::new("out.pprof")), "pprof");
        assert_eq!(output_format(Path::new("out.pprof.gz")), "pprof.gz");
        assert_eq!(output_format(Path::new("out")), "html");
        assert_eq!(output_format(Path::new("out.dat")), "html");
    }

    #[test]
    fn extension_replacement() {
        assert_eq!(
            replace_ext(Path::new("dir/rec.jfr"), "html"),
            PathBuf::from("rec.html")
        );
        assert_eq!(
            replace_ext(Path::new("rec.jfr"), "pprof.gz"),
            PathBuf::from("rec.pprof.gz")
        );
        assert_eq!(replace_ext(Path::new("rec"), "html"), PathBuf::from("rec.html"));
    }
}
