//! Collapsed stack text output.
//!
//! The degenerate renderer: every sample prints immediately as
//! `frame;frame;...;frame weight`, with frame-type suffixes already present
//! on the titles.

use std::io::Write;

use crate::{Result, SampleSink};

pub struct CollapsedStacks<W: Write> {
    out: W,
    line: String,
}

impl<W: Write> CollapsedStacks<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            line: String::new(),
        }
    }

    /// Flushes and returns the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

impl<W: Write> SampleSink for CollapsedStacks<W> {
    fn add_sample(&mut self, trace: &[String], weight: u64) -> Result<()> {
        if trace.is_empty() {
            return Ok(());
        }
        self.line.clear();
        for title in trace {
            self.line.push_str(title);
            self.line.push(';');
        }
        self.line.pop();
        writeln!(self.out, "{} {}", self.line, weight)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prints_one_line_per_sample() {
        let mut sink = CollapsedStacks::new(Vec::new());
        let trace = vec!["a".to_string(), "b_[j]".to_string(), "c_[i]".to_string()];
        sink.add_sample(&trace, 5).unwrap();
        sink.add_sample(&["x".to_string()], 2).unwrap();

        let out = String::from_utf8(sink.finish().unwrap()).unwrap();
        assert_eq!(out, "a;b_[j];c_[i] 5\nx 2\n");
    }

    #[test]
    fn empty_trace_is_skipped() {
        let mut sink = CollapsedStacks::new(Vec::new());
        sink.add_sample(&[], 5).unwrap();

        assert!(sink.finish().unwrap().is_empty());
    }
}
