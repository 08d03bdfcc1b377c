//! Model persistence: a whitespace-delimited ASCII format.
//!
//! The format predates this crate and is shared with other implementations,
//! so it is written by hand and kept byte-stable:
//!
//! ```text
//! seed
//! nTrees
//! nSamples
//! <per sample: tag suid y nCodes [code value] * nCodes>
//! <per tree: nodes in pre-order>
//! ```
//!
//! Each node is `code id watermark.rank watermark.code c0 c1` followed by
//! its decision-count entries (`code 0 0 c0p c1p rank` — the two zeros are
//! legacy placeholders), then either the leaf payload (sample tags and the
//! cached value; `code == -1` marks a leaf) or the two subtrees. Sample
//! tags are arbitrary unique integers assigned at save time and resolved
//! through the sample table on load.

use std::collections::{BTreeMap, HashMap};
use std::io::{self, Read, Write};
use std::rc::Rc;
use std::str::FromStr;

use thiserror::Error;

use crate::forest::Forest;
use crate::sample::{Sample, SampleHandle};
use crate::store::SampleStore;
use crate::tree::counts::{CountsTable, DecisionCounts};
use crate::tree::node::{Node, NodeIdGen, NodeKind};

/// Sentinel `code` marking a leaf node in the format.
const LEAF_CODE: i32 = -1;

/// Failures a caller can hit while reading a model.
///
/// Corrupt cross-references (a leaf naming a sample tag that is not in the
/// sample table) are not an error variant: they mean the persistent state
/// itself is broken, and the loader aborts.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("unexpected end of input while reading {0}")]
    UnexpectedEof(&'static str),

    #[error("malformed {what}: {token:?}")]
    Malformed { what: &'static str, token: String },
}

pub fn save_forest<W: Write>(forest: &Forest, out: &mut W) -> io::Result<()> {
    writeln!(out, "{}", forest.ids.state())?;
    writeln!(out, "{}", forest.trees.len())?;

    let committed = forest.store.committed();
    writeln!(out, "{}", committed.len())?;

    let mut tags: HashMap<*const Sample, usize> = HashMap::with_capacity(committed.len());
    for (tag, handle) in committed.values().enumerate() {
        tags.insert(Rc::as_ptr(handle), tag);
        writeln!(out, "{tag}")?;
        writeln!(out, "{}", handle.suid)?;
        writeln!(out, "{}", handle.y)?;
        writeln!(out, "{}", handle.x_codes.len())?;
        for (code, value) in &handle.x_codes {
            writeln!(out, "{code} {value}")?;
        }
    }

    for tree in &forest.trees {
        save_node(tree, &tags, out)?;
    }
    Ok(())
}

fn save_node<W: Write>(
    node: &Node,
    tags: &HashMap<*const Sample, usize>,
    out: &mut W,
) -> io::Result<()> {
    let code = match &node.kind {
        NodeKind::Leaf { .. } => LEAF_CODE,
        NodeKind::Internal { code, .. } => *code,
    };
    writeln!(out, "{code}")?;
    writeln!(out, "{}", node.id)?;
    let (watermark_rank, watermark_code) = node.counts.watermark();
    writeln!(out, "{watermark_rank} {watermark_code}")?;
    writeln!(out, "{} {}", node.c0, node.c1)?;

    writeln!(out, "{}", node.counts.len())?;
    for (entry_code, dc) in node.counts.iter() {
        writeln!(out, "{entry_code}")?;
        writeln!(out, "0 0 {} {} {}", dc.c0p, dc.c1p, dc.rank)?;
    }

    match &node.kind {
        NodeKind::Leaf { value, samples } => {
            writeln!(out, "{}", samples.len())?;
            for sample in samples {
                match tags.get(&Rc::as_ptr(sample)) {
                    Some(tag) => writeln!(out, "{tag}")?,
                    None => panic!(
                        "leaf references sample {:?} missing from the store",
                        sample.suid
                    ),
                }
            }
            writeln!(out, "{value}")?;
        }
        NodeKind::Internal {
            negative, positive, ..
        } => {
            save_node(negative, tags, out)?;
            save_node(positive, tags, out)?;
        }
    }
    Ok(())
}

pub fn load_forest<R: Read>(mut input: R) -> Result<Forest, LoadError> {
    let mut text = String::new();
    input.read_to_string(&mut text)?;
    let mut tokens = Tokens {
        iter: text.split_whitespace(),
    };

    let seed: u64 = tokens.parse("seed")?;
    let n_trees: usize = tokens.parse("tree count")?;
    let n_samples: usize = tokens.parse("sample count")?;

    let mut store = SampleStore::new();
    let mut by_tag: HashMap<u64, SampleHandle> = HashMap::with_capacity(n_samples);
    for _ in 0..n_samples {
        let tag: u64 = tokens.parse("sample tag")?;
        let suid = tokens.next("sample id")?.to_owned();
        let y: f32 = tokens.parse("sample target")?;
        let n_codes: usize = tokens.parse("feature count")?;
        let mut x_codes = BTreeMap::new();
        for _ in 0..n_codes {
            let code: i32 = tokens.parse("feature code")?;
            let value: f32 = tokens.parse("feature value")?;
            x_codes.insert(code, value);
        }
        let handle: SampleHandle = Rc::new(Sample { suid, y, x_codes });
        by_tag.insert(tag, Rc::clone(&handle));
        store.insert_committed(handle);
    }

    let mut trees = Vec::with_capacity(n_trees);
    for _ in 0..n_trees {
        trees.push(load_node(&mut tokens, &by_tag)?);
    }

    Ok(Forest::from_parts(trees, store, NodeIdGen::new(seed)))
}

fn load_node(
    tokens: &mut Tokens<'_>,
    by_tag: &HashMap<u64, SampleHandle>,
) -> Result<Node, LoadError> {
    let code: i32 = tokens.parse("node code")?;
    let id: u64 = tokens.parse("node id")?;
    let watermark_rank: u32 = tokens.parse("watermark rank")?;
    let watermark_code: i32 = tokens.parse("watermark code")?;
    let c0: u32 = tokens.parse("class-0 total")?;
    let c1: u32 = tokens.parse("class-1 total")?;

    let n_counts: usize = tokens.parse("decision-count size")?;
    let mut entries = Vec::with_capacity(n_counts);
    for _ in 0..n_counts {
        let entry_code: i32 = tokens.parse("decision-count code")?;
        let _legacy: u32 = tokens.parse("legacy placeholder")?;
        let _legacy: u32 = tokens.parse("legacy placeholder")?;
        let c0p: u32 = tokens.parse("present class-0 count")?;
        let c1p: u32 = tokens.parse("present class-1 count")?;
        let rank: u32 = tokens.parse("code rank")?;
        let dc = DecisionCounts { c0p, c1p, rank };
        // Entries with no evidence on either side are dropped on load.
        if !dc.is_zero() {
            entries.push((entry_code, dc));
        }
    }
    let counts = CountsTable::from_parts(entries, (watermark_rank, watermark_code));

    let kind = if code == LEAF_CODE {
        let n: usize = tokens.parse("leaf sample count")?;
        let mut samples = Vec::with_capacity(n);
        for _ in 0..n {
            let tag: u64 = tokens.parse("sample tag")?;
            match by_tag.get(&tag) {
                Some(handle) => samples.push(Rc::clone(handle)),
                None => panic!("model file references unknown sample tag {tag}"),
            }
        }
        let value: f32 = tokens.parse("leaf value")?;
        NodeKind::Leaf { value, samples }
    } else {
        let negative = Box::new(load_node(tokens, by_tag)?);
        let positive = Box::new(load_node(tokens, by_tag)?);
        NodeKind::Internal {
            code,
            negative,
            positive,
        }
    };

    Ok(Node {
        id,
        c0,
        c1,
        counts,
        kind,
    })
}

struct Tokens<'a> {
    iter: std::str::SplitWhitespace<'a>,
}

impl<'a> Tokens<'a> {
    fn next(&mut self, what: &'static str) -> Result<&'a str, LoadError> {
        self.iter.next().ok_or(LoadError::UnexpectedEof(what))
    }

    fn parse<T: FromStr>(&mut self, what: &'static str) -> Result<T, LoadError> {
        let token = self.next(what)?;
        token.parse().map_err(|_| LoadError::Malformed {
            what,
            token: token.to_owned(),
        })
    }
}
