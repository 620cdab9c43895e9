//! Classification of stack traces into coarse categories.
//!
//! The rule set is static: the deepest non-native frame picks the category
//! by method-name prefix, first match wins. Stacks with no Java frame fall
//! back to rules over the leaf native frame.

use jfr_parse::{frame, StackTrace};

use crate::resolve::NameResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Gc,
    Jit,
    Kernel,
    Network,
    Filesystem,
    Java,
    Native,
}

impl Category {
    /// The synthetic frame title rendered for this category, and the pprof
    /// `category` label value.
    pub fn title(self) -> &'static str {
        match self {
            Category::Gc => "[gc]",
            Category::Jit => "[jit]",
            Category::Kernel => "[kernel]",
            Category::Network => "[network]",
            Category::Filesystem => "[filesystem]",
            Category::Java => "[java]",
            Category::Native => "[native]",
        }
    }
}

const JAVA_RULES: &[(&str, Category)] = &[
    ("java.net.", Category::Network),
    ("sun.net.", Category::Network),
    ("sun.nio.ch.", Category::Network),
    ("jdk.internal.net.", Category::Network),
    ("java.io.", Category::Filesystem),
    ("sun.nio.fs.", Category::Filesystem),
    ("java.util.zip.", Category::Filesystem),
];

const NATIVE_RULES: &[(&str, Category)] = &[
    ("GC", Category::Gc),
    ("G1", Category::Gc),
    ("ZDriver", Category::Gc),
    ("ConcurrentMark", Category::Gc),
    ("CompileBroker", Category::Jit),
    ("CompilerThread", Category::Jit),
    ("C2 ", Category::Jit),
    ("C1 ", Category::Jit),
];

/// Categorizes one stack trace. Frames run leaf first, so the first frame
/// that is not native-like is the deepest Java frame.
pub fn categorize(stack: &StackTrace, resolver: &mut NameResolver) -> Category {
    for i in 0..stack.methods.len() {
        let frame_type = stack.types[i];
        if matches!(frame_type, frame::NATIVE | frame::CPP | frame::KERNEL) {
            continue;
        }
        let name = resolver
            .method_name(stack.methods[i], frame_type)
            .replace('/', ".");
        for (prefix, category) in JAVA_RULES {
            if name.starts_with(prefix) {
                return *category;
            }
        }
        return Category::Java;
    }

    if stack.types.contains(&frame::KERNEL) {
        return Category::Kernel;
    }
    if let (Some(&method), Some(&frame_type)) = (stack.methods.first(), stack.types.first()) {
        let name = resolver.method_name(method, frame_type);
        for (prefix, category) in NATIVE_RULES {
            if name.starts_with(prefix) {
                return *category;
            }
        }
    }
    Category::Native
}
