//! Display names for interned method, class, and thread IDs.
//!
//! Class names in JFR symbols use JVM descriptor syntax (`Lpkg/Name;`,
//! leading `[` for arrays, primitive descriptor bytes). The transforms here
//! mirror the recording conventions: `norm` strips hidden-class and lambda
//! suffixes of the shape `$$Lambda+0xADDR/RAND`, `simple` drops the package
//! path, and `dot` rewrites the remaining slashes.

use std::collections::HashMap;

use jfr_parse::{frame, JfrReader};

use crate::Arguments;

const UNKNOWN_NAME: &str = "unknown";

/// Resolves IDs against a reader's dictionaries. The method-name cache is
/// meant to live for one chunk and be dropped with the resolver.
pub struct NameResolver<'a> {
    jfr: &'a JfrReader,
    args: &'a Arguments,
    native_means_c: bool,
    cache: HashMap<i64, String>,
}

impl<'a> NameResolver<'a> {
    pub fn new(jfr: &'a JfrReader, args: &'a Arguments) -> Self {
        // JFR proper marks Java native methods with the Native frame type;
        // async-profiler recordings (recognizable by a Kernel member in the
        // frame-type table) use it for C frames.
        let native_means_c = jfr
            .get_enum_value("jdk.types.FrameType", frame::KERNEL as i32)
            .is_some();
        Self {
            jfr,
            args,
            native_means_c,
            cache: HashMap::new(),
        }
    }

    /// `ClassName.methodName`, or the bare method name for native-like
    /// frames and classless methods. Unresolvable IDs become `"unknown"`.
    pub fn method_name(&mut self, method_id: i64, frame_type: u8) -> String {
        if let Some(name) = self.cache.get(&method_id) {
            return name.clone();
        }
        let name = self.resolve_method_name(method_id, frame_type);
        self.cache.insert(method_id, name.clone());
        name
    }

    fn resolve_method_name(&self, method_id: i64, frame_type: u8) -> String {
        let Some(method) = self.jfr.methods.get(&method_id) else {
            return UNKNOWN_NAME.to_string();
        };
        let class_name = self
            .jfr
            .classes
            .get(&method.class)
            .and_then(|cls| self.jfr.symbols.get(&cls.name));
        let method_name = self
            .jfr
            .symbols
            .get(&method.name)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned());

        match class_name {
            Some(cls) if !cls.is_empty() && !self.is_native_frame(frame_type) => {
                let class_str = to_java_class_name(cls, 0, self.args, self.args.dot);
                match method_name {
                    Some(name) if !name.is_empty() => format!("{}.{}", class_str, name),
                    _ => class_str,
                }
            }
            _ => method_name.unwrap_or_else(|| UNKNOWN_NAME.to_string()),
        }
    }

    /// Class name with array depth rendered as trailing `[]` pairs.
    /// Unresolvable IDs become `"null"`.
    pub fn class_name(&self, class_id: i64) -> String {
        let Some(symbol) = self
            .jfr
            .classes
            .get(&class_id)
            .and_then(|cls| self.jfr.symbols.get(&cls.name))
        else {
            return "null".to_string();
        };

        let mut array_depth = 0;
        while symbol.get(array_depth) == Some(&b'[') {
            array_depth += 1;
        }

        let mut name = to_java_class_name(symbol, array_depth, self.args, true);
        for _ in 0..array_depth {
            name.push_str("[]");
        }
        name
    }

    /// Recorded thread name as `[name tid=N]`, or `[tid=N]` when unknown.
    pub fn thread_name(&self, tid: i32) -> String {
        match self.jfr.threads.get(&tid) {
            None => format!("[tid={}]", tid),
            Some(name) if name.starts_with("[tid=") => name.clone(),
            Some(name) => format!("[{} tid={}]", name, tid),
        }
    }

    fn is_native_frame(&self, frame_type: u8) -> bool {
        frame_type == frame::NATIVE && self.native_means_c
            || frame_type == frame::CPP
            || frame_type == frame::KERNEL
    }
}

fn to_java_class_name(symbol: &[u8], mut start: usize, args: &Arguments, dotted: bool) -> String {
    let mut end = symbol.len();
    if start > 0 {
        match symbol.get(start).copied() {
            Some(b'B') => return "byte".to_string(),
            Some(b'C') => return "char".to_string(),
            Some(b'S') => return "short".to_string(),
            Some(b'I') => return "int".to_string(),
            Some(b'J') => return "long".to_string(),
            Some(b'Z') => return "boolean".to_string(),
            Some(b'F') => return "float".to_string(),
            Some(b'D') => return "double".to_string(),
            Some(b'L') => {
                start += 1;
                end -= 1;
            }
            _ => {}
        }
    }

    if args.norm {
        let mut i = end.saturating_sub(2);
        while i > start {
            if symbol[i] == b'/' || symbol[i] == b'.' {
                if symbol[i + 1].is_ascii_digit() {
                    end = i;
                    if i > start + 19 && symbol[i - 19] == b'+' && symbol[i - 18] == b'0' {
                        // Hidden lambda names look like
                        // pkg.ClassName$$Lambda+0x00007f8177090218/543846639
                        end = i - 19;
                    }
                }
                break;
            }
            i -= 1;
        }
    }

    if args.simple {
        let mut i = end as i64 - 2;
        while i >= start as i64 {
            let at = i as usize;
            if symbol[at] == b'/' && !symbol[at + 1].is_ascii_digit() {
                start = at + 1;
                break;
            }
            i -= 1;
        }
    }

    let end = end.max(start);
    let name = String::from_utf8_lossy(&symbol[start..end]);
    if dotted {
        name.replace('/', ".")
    } else {
        name.into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(norm: bool, simple: bool, dot: bool) -> Arguments {
        Arguments {
            norm,
            simple,
            dot,
            ..Arguments::default()
        }
    }

    #[test]
    fn plain_class_name() {
        let a = args(false, false, false);
        assert_eq!(to_java_class_name(b"java/io/File", 0, &a, false), "java/io/File");
        assert_eq!(to_java_class_name(b"java/io/File", 0, &a, true), "java.io.File");
    }

    #[test]
    fn norm_strips_lambda_suffix() {
        let a = args(true, false, true);
        assert_eq!(
            to_java_class_name(b"pkg/Foo$$Lambda+0x00007f8177090218/543846639", 0, &a, true),
            "pkg.Foo$$Lambda"
        );
    }

    #[test]
    fn norm_strips_hidden_class_counter() {
        let a = args(true, false, false);
        assert_eq!(
            to_java_class_name(b"pkg/Hidden/0x123.42", 0, &a, false),
            "pkg/Hidden/0x123"
        );
    }

    #[test]
    fn norm_is_idempotent() {
        let a = args(true, false, true);
        let once = to_java_class_name(b"pkg/Foo$$Lambda+0x00007f8177090218/543846639", 0, &a, true);
        let twice = to_java_class_name(once.as_bytes(), 0, &a, true);
        assert_eq!(once, twice);
    }

    #[test]
    fn simple_drops_package() {
        let a = args(false, true, false);
        assert_eq!(to_java_class_name(b"java/io/File", 0, &a, false), "File");
        // A slash followed by a digit is part of a hidden-class name,
        // not a package separator.
        assert_eq!(
            to_java_class_name(b"pkg/Cls/123", 0, &a, false),
            "Cls/123"
        );
    }

    #[test]
    fn primitive_descriptors_at_array_depth() {
        let a = args(false, false, false);
        assert_eq!(to_java_class_name(b"[I", 1, &a, true), "int");
        assert_eq!(to_java_class_name(b"[[J", 2, &a, true), "long");
    }

    #[test]
    fn object_array_envelope() {
        let a = args(false, false, false);
        assert_eq!(
            to_java_class_name(b"[Ljava/lang/String;", 1, &a, true),
            "java.lang.String"
        );
    }
}
