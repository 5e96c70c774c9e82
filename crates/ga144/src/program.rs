//! Compiled-program input.
//!
//! The emulator consumes already-compiled node images — the compiler
//! front-end lives elsewhere. Images arrive as JSON (or are built in
//! code by tests): a list of per-node memory images with optional
//! register and stack initialisation, in `YXX` coordinates.

use emu_core::Coord;
use serde::{Deserialize, Serialize};

use f18a::WORD_MASK;
use f18a::node::MEM_WORDS;

/// One diagnostic from compilation or load validation.
///
/// `line`/`col` are source positions when the compiler produced the
/// issue; load-time validation reports zeros there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub col: u32,
    pub message: String,
}

impl Issue {
    #[must_use]
    pub fn load(message: String) -> Self {
        Self { line: 0, col: 0, message }
    }
}

/// A compiled image for one node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeImage {
    /// Node coordinate in `YXX` form.
    pub coord: u16,
    /// RAM image; `null` cells are left unwritten.
    #[serde(default)]
    pub mem: Vec<Option<u32>>,
    /// Number of words the boot stream installs.
    pub len: u8,
    /// Entry point; absent means the node stays parked after loading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub io: Option<u32>,
    /// Values pre-pushed onto the data stack, bottom first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stack: Vec<u32>,
}

impl NodeImage {
    /// The code words the boot stream carries, in order.
    #[must_use]
    pub fn code(&self) -> Vec<u32> {
        (0..usize::from(self.len))
            .map(|i| self.mem.get(i).copied().flatten().unwrap_or(0) & WORD_MASK)
            .collect()
    }
}

/// A compiled multi-node program.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    pub nodes: Vec<NodeImage>,
    /// Compiler diagnostics carried alongside; the program may still
    /// be partially loadable.
    #[serde(default, alias = "errors")]
    pub issues: Vec<Issue>,
}

impl Program {
    /// Parse a program from JSON.
    pub fn from_json(text: &str) -> Result<Self, String> {
        serde_json::from_str(text).map_err(|e| format!("program parse error: {e}"))
    }

    /// Validate images, returning the loadable ones and diagnostics
    /// for the rest. Invalid images are dropped, not fatal.
    #[must_use]
    pub fn validated(&self) -> (Vec<&NodeImage>, Vec<Issue>) {
        let mut issues = self.issues.clone();
        let mut good: Vec<&NodeImage> = Vec::new();
        for image in &self.nodes {
            if let Some(problem) = validate_image(image) {
                issues.push(Issue::load(problem));
                continue;
            }
            if good.iter().any(|g| g.coord == image.coord) {
                issues.push(Issue::load(format!("duplicate image for node {}", image.coord)));
                continue;
            }
            good.push(image);
        }
        (good, issues)
    }
}

fn validate_image(image: &NodeImage) -> Option<String> {
    let Some(coord) = Coord::new(image.coord) else {
        return Some(format!("invalid node coordinate {}", image.coord));
    };
    if usize::from(image.len) > MEM_WORDS {
        return Some(format!("node {coord}: len {} exceeds {MEM_WORDS} words", image.len));
    }
    if image.mem.len() > MEM_WORDS {
        return Some(format!("node {coord}: image has {} cells", image.mem.len()));
    }
    if let Some(word) = image.mem.iter().flatten().find(|&&w| w > WORD_MASK) {
        return Some(format!("node {coord}: word {word:#X} exceeds 18 bits"));
    }
    if let Some(p) = image.p {
        if p > 0x1FF {
            return Some(format!("node {coord}: entry {p:#X} exceeds 9 bits"));
        }
    }
    if let Some(b) = image.b {
        if b > 0x1FF {
            return Some(format!("node {coord}: B {b:#X} exceeds 9 bits"));
        }
    }
    if image.stack.len() > 10 {
        return Some(format!("node {coord}: {} stack cells (max 10)", image.stack.len()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_json() {
        let prog = Program::from_json(
            r#"{"nodes": [{"coord": 709, "mem": [170], "len": 1}], "errors": []}"#,
        )
        .expect("parses");
        assert_eq!(prog.nodes.len(), 1);
        assert_eq!(prog.nodes[0].code(), vec![170]);
    }

    #[test]
    fn null_cells_are_unset() {
        let prog = Program::from_json(
            r#"{"nodes": [{"coord": 709, "mem": [1, null, 3], "len": 3}]}"#,
        )
        .expect("parses");
        assert_eq!(prog.nodes[0].code(), vec![1, 0, 3]);
    }

    #[test]
    fn bad_coordinate_is_reported_not_fatal() {
        let prog = Program {
            nodes: vec![
                NodeImage { coord: 718, len: 0, ..NodeImage::default() },
                NodeImage { coord: 709, len: 0, ..NodeImage::default() },
            ],
            issues: Vec::new(),
        };
        let (good, issues) = prog.validated();
        assert_eq!(good.len(), 1);
        assert_eq!(good[0].coord, 709);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("718"));
    }

    #[test]
    fn oversized_word_is_reported() {
        let prog = Program {
            nodes: vec![NodeImage {
                coord: 100,
                mem: vec![Some(0x40000)],
                len: 1,
                ..NodeImage::default()
            }],
            issues: Vec::new(),
        };
        let (good, issues) = prog.validated();
        assert!(good.is_empty());
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn duplicate_coord_is_reported() {
        let prog = Program {
            nodes: vec![
                NodeImage { coord: 709, len: 0, ..NodeImage::default() },
                NodeImage { coord: 709, len: 0, ..NodeImage::default() },
            ],
            issues: Vec::new(),
        };
        let (good, issues) = prog.validated();
        assert_eq!(good.len(), 1);
        assert!(issues[0].message.contains("duplicate"));
    }
}
