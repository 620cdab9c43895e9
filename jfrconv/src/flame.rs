//! Flame-graph tree construction and HTML emission.
//!
//! Samples merge into a tree keyed by frame title and type. Emission
//! substitutes seven ordered markers in the embedded viewer template with a
//! compact JavaScript encoding: a prefix-compressed constant pool of sorted
//! titles and a frame script of `f`/`u`/`n` calls that reconstruct the tree
//! coordinates incrementally.

use std::collections::HashMap;
use std::io::{BufRead, Write};

use jfr_parse::frame as ft;

use crate::{Arguments, ConvertError, Result, SampleSink};

const TEMPLATE: &str = include_str!("../assets/flame.html");

const TYPE_SHIFT: u32 = 28;
const TITLE_MASK: u32 = (1 << TYPE_SHIFT) - 1;

/// One node of the frame tree. `total` covers the subtree, `self_weight`
/// only samples ending here; `inlined`/`c1`/`interpreted` classify part of
/// `total` for tier coloring.
#[derive(Default)]
struct Frame {
    total: u64,
    self_weight: u64,
    inlined: u64,
    c1: u64,
    interpreted: u64,
    children: HashMap<u32, Frame>,
}

impl Frame {
    fn effective_type(&self, key: u32) -> u8 {
        if self.inlined * 3 >= self.total {
            ft::INLINED
        } else if self.c1 * 2 >= self.total {
            ft::C1_COMPILED
        } else if self.interpreted * 2 >= self.total {
            ft::INTERPRETED
        } else {
            (key >> TYPE_SHIFT) as u8
        }
    }

    fn depth(&self, cutoff: u64) -> usize {
        let mut depth = 0;
        for child in self.children.values() {
            if child.total >= cutoff {
                depth = depth.max(child.depth(cutoff));
            }
        }
        depth + 1
    }
}

/// Insertion-ordered title interner with the empty string at index 0.
#[derive(Default)]
struct TitleIndex {
    map: HashMap<String, u32>,
    keys: Vec<String>,
}

impl TitleIndex {
    fn new() -> Self {
        let mut index = Self::default();
        index.index("");
        index
    }

    fn index(&mut self, title: &str) -> u32 {
        if let Some(&i) = self.map.get(title) {
            return i;
        }
        let i = self.keys.len() as u32;
        self.keys.push(title.to_string());
        self.map.insert(title.to_string(), i);
        i
    }
}

enum TierCounter {
    None,
    Inlined,
    C1,
    Interpreted,
}

/// Builds a flame graph from collapsed text or resolved JFR samples and
/// renders it into the embedded HTML viewer.
pub struct FlameGraph {
    args: Arguments,
    cpool: TitleIndex,
    root: Frame,
    depth: usize,
}

impl FlameGraph {
    pub fn new(args: Arguments) -> Self {
        Self {
            args,
            cpool: TitleIndex::new(),
            root: Frame::default(),
            depth: 0,
        }
    }

    /// Reads collapsed stack lines (`frame;frame;... count`). Lines without
    /// a count are skipped; a malformed count is an error.
    pub fn parse<R: BufRead>(&mut self, reader: R) -> Result<()> {
        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            let Some(space) = line.rfind(' ') else {
                continue;
            };
            if space == 0 {
                continue;
            }
            let ticks: u64 = line[space + 1..]
                .trim()
                .parse()
                .map_err(|_| ConvertError::MalformedCollapsed { line: number + 1 })?;
            let trace: Vec<String> = line[..space].split(';').map(str::to_string).collect();
            self.add(&trace, ticks);
        }
        Ok(())
    }

    /// Merges one sample into the tree. The trace runs root to leaf; frame
    /// types are inferred from title suffixes and naming heuristics.
    pub fn add(&mut self, trace: &[String], weight: u64) {
        if exclude_trace(&self.args, trace) {
            return;
        }
        self.depth = self.depth.max(trace.len());

        let skipped = trace.get(self.args.skip..).unwrap_or(&[]);
        let cpool = &mut self.cpool;
        let mut frame = &mut self.root;
        if self.args.reverse {
            for title in skipped.iter().rev() {
                frame = add_child(frame, cpool, title, weight);
            }
        } else {
            for title in skipped {
                frame = add_child(frame, cpool, title, weight);
            }
        }
        frame.total += weight;
        frame.self_weight += weight;
    }

    /// Writes the HTML flame graph, replacing the template's substitution
    /// markers in order.
    pub fn dump<W: Write>(&mut self, mut out: W) -> Result<()> {
        let mintotal = (self.root.total as f64 * self.args.minwidth / 100.0) as u64;
        let depth = if mintotal > 1 {
            self.root.depth(mintotal)
        } else {
            self.depth + 1
        };

        let mut tail = TEMPLATE;
        tail = print_till(&mut out, tail, "/*height:*/300")?;
        write!(out, "{}", (depth * 16).min(32767))?;

        tail = print_till(&mut out, tail, "/*title:*/")?;
        out.write_all(self.args.title.as_bytes())?;

        tail = print_till(&mut out, tail, "/*reverse:*/false")?;
        write!(out, "{}", self.args.reverse)?;

        tail = print_till(&mut out, tail, "/*depth:*/0")?;
        write!(out, "{}", depth)?;

        tail = print_till(&mut out, tail, "/*cpool:*/")?;
        let order = self.print_cpool(&mut out)?;

        tail = print_till(&mut out, tail, "/*frames:*/")?;
        let mut script = FrameScript {
            out: &mut out,
            order: &order,
            mintotal,
            last_level: 0,
            last_x: 0,
            last_total: 0,
        };
        script.print(&self.root, (ft::NATIVE as u32) << TYPE_SHIFT, 0, 0)?;

        tail = print_till(&mut out, tail, "/*highlight:*/")?;
        if let Some(highlight) = &self.args.highlight {
            write!(out, "'{}'", escape(highlight))?;
        }

        out.write_all(tail.as_bytes())?;
        Ok(())
    }

    /// Emits the sorted, prefix-compressed title pool and returns the
    /// permutation from insertion indices to sorted indices.
    fn print_cpool<W: Write>(&self, out: &mut W) -> Result<Vec<u32>> {
        let mut sorted: Vec<&str> = self.cpool.keys.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        out.write_all(b"'all'")?;

        let mut order = vec![0u32; sorted.len()];
        let mut prev = "";
        for (i, &title) in sorted.iter().enumerate().skip(1) {
            let prefix_len = common_prefix(prev, title).min(95);
            let entry = format!(
                "{}{}",
                (prefix_len as u8 + b' ') as char,
                &title[prefix_len..]
            );
            write!(out, ",\n'{}'", escape(&entry))?;
            order[self.cpool.map[title] as usize] = i as u32;
            prev = title;
        }
        Ok(order)
    }

    #[cfg(test)]
    fn root(&self) -> &Frame {
        &self.root
    }
}

impl SampleSink for FlameGraph {
    fn add_sample(&mut self, trace: &[String], weight: u64) -> Result<()> {
        self.add(trace, weight);
        Ok(())
    }
}

fn add_child<'t>(
    frame: &'t mut Frame,
    cpool: &mut TitleIndex,
    title: &str,
    weight: u64,
) -> &'t mut Frame {
    frame.total += weight;

    let (title, frame_type, counter) = infer_frame_type(title);
    let key = cpool.index(title) | (frame_type as u32) << TYPE_SHIFT;
    let child = frame.children.entry(key).or_default();
    match counter {
        TierCounter::Inlined => child.inlined += weight,
        TierCounter::C1 => child.c1 += weight,
        TierCounter::Interpreted => child.interpreted += weight,
        TierCounter::None => {}
    }
    child
}

fn infer_frame_type(title: &str) -> (&str, u8, TierCounter) {
    if let Some(stripped) = title.strip_suffix("_[j]") {
        (stripped, ft::JIT_COMPILED, TierCounter::None)
    } else if let Some(stripped) = title.strip_suffix("_[i]") {
        (stripped, ft::JIT_COMPILED, TierCounter::Inlined)
    } else if let Some(stripped) = title.strip_suffix("_[k]") {
        (stripped, ft::KERNEL, TierCounter::None)
    } else if let Some(stripped) = title.strip_suffix("_[1]") {
        (stripped, ft::JIT_COMPILED, TierCounter::C1)
    } else if let Some(stripped) = title.strip_suffix("_[0]") {
        (stripped, ft::JIT_COMPILED, TierCounter::Interpreted)
    } else if title.contains("::") || title.starts_with("-[") || title.starts_with("+[") {
        (title, ft::CPP, TierCounter::None)
    } else if title.find('/').is_some_and(|p| p > 0) && !title.starts_with('[')
        || title.find('.').is_some_and(|p| p > 0)
            && title.chars().next().is_some_and(char::is_uppercase)
    {
        (title, ft::JIT_COMPILED, TierCounter::None)
    } else {
        (title, ft::NATIVE, TierCounter::None)
    }
}

/// Include/exclude semantics: walking root to leaf, an exclude match drops
/// the sample immediately; an include match arms acceptance unless a later
/// frame still hits exclude.
fn exclude_trace(args: &Arguments, trace: &[String]) -> bool {
    let mut include = args.include.as_ref();
    let exclude = args.exclude.as_ref();
    if include.is_none() && exclude.is_none() {
        return false;
    }

    for title in trace {
        if let Some(pattern) = exclude {
            if pattern.is_match(title) {
                return true;
            }
        }
        if let Some(pattern) = include {
            if pattern.is_match(title) {
                if exclude.is_none() {
                    return false;
                }
                include = None;
            }
        }
    }
    include.is_some()
}

struct FrameScript<'a, W: Write> {
    out: &'a mut W,
    order: &'a [u32],
    mintotal: u64,
    last_level: usize,
    last_x: u64,
    last_total: u64,
}

impl<W: Write> FrameScript<'_, W> {
    fn print(&mut self, frame: &Frame, key: u32, level: usize, x: u64) -> Result<()> {
        let title_index = (key & TITLE_MASK) as usize;
        let name_and_type =
            (self.order[title_index] as u64) << 3 | frame.effective_type(key) as u64;
        let has_extra_types = (frame.inlined | frame.c1 | frame.interpreted) != 0
            && frame.inlined < frame.total
            && frame.interpreted < frame.total;

        let func = if level == self.last_level + 1 && x == self.last_x {
            'u'
        } else if level == self.last_level && x == self.last_x + self.last_total {
            'n'
        } else {
            'f'
        };

        let mut call = format!("{}({}", func, name_and_type);
        if func == 'f' {
            call.push_str(&format!(",{},{}", level, x as i64 - self.last_x as i64));
        }
        if frame.total != self.last_total || has_extra_types {
            call.push_str(&format!(",{}", frame.total));
            if has_extra_types {
                call.push_str(&format!(
                    ",{},{},{}",
                    frame.inlined, frame.c1, frame.interpreted
                ));
            }
        }
        call.push(')');
        writeln!(self.out, "{}", call)?;

        self.last_level = level;
        self.last_x = x;
        self.last_total = frame.total;

        let mut children: Vec<(u32, &Frame)> =
            frame.children.iter().map(|(&k, v)| (k, v)).collect();
        children.sort_unstable_by_key(|(k, _)| self.order[(k & TITLE_MASK) as usize]);

        let mut x = x + frame.self_weight;
        for (child_key, child) in children {
            if child.total >= self.mintotal {
                self.print(child, child_key, level + 1, x)?;
            }
            x += child.total;
        }
        Ok(())
    }
}

fn print_till<'t, W: Write>(out: &mut W, data: &'t str, till: &'static str) -> Result<&'t str> {
    let index = data.find(till).ok_or(ConvertError::BadTemplate(till))?;
    out.write_all(data[..index].as_bytes())?;
    Ok(&data[index + till.len()..])
}

fn common_prefix(a: &str, b: &str) -> usize {
    a.bytes()
        .zip(b.bytes())
        .take_while(|(x, y)| x == y && *x < 128)
        .count()
}

fn escape(s: &str) -> String {
    let mut s = s.to_string();
    if s.contains('\\') {
        s = s.replace('\\', "\\\\");
    }
    if s.contains('\'') {
        s = s.replace('\'', "\\'");
    }
    s
}
