// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Per-event argument decoding.
//!
//! Every trace record carries trailing tokens after its event name. How those
//! tokens are interpreted depends on the event: most events use `key=value`
//! pairs, the stack-trace event carries the `<stack trace>` marker, and some
//! events (like the low-memory killer's `lmk_shrink`) use fixed positional
//! fields. A [`DecoderRegistry`] maps event names to decoder functions and is
//! owned by the trace loader; registering a decoder is an explicit call on the
//! registry, never a global side effect.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::fmt;

/// Event name of kernel stack-trace continuation records.
pub const STACK_EVENT: &str = "kernel_stack";

/// A decoded argument value. Integer parsing accepts `0x`-prefixed hex and
/// decimal (leading zeros read as decimal, never octal); anything else stays
/// a trimmed string.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Int(i64),
    Str(String),
}

impl ArgValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ArgValue::Int(v) => Some(*v),
            ArgValue::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Int(_) => None,
            ArgValue::Str(s) => Some(s),
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Int(v) => write!(f, "{}", v),
            ArgValue::Str(s) => write!(f, "{}", s),
        }
    }
}

/// Named argument values of one record. Keys are unique; insertion order is
/// not meaningful.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArgSet(BTreeMap<String, ArgValue>);

impl ArgSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, val: ArgValue) {
        self.0.insert(key.into(), val);
    }

    pub fn get(&self, key: &str) -> Option<&ArgValue> {
        self.0.get(key)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(ArgValue::as_int)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ArgValue)> {
        self.0.iter()
    }
}

impl fmt::Display for ArgSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        write!(f, "}}")
    }
}

/// Result of decoding one event's trailing tokens.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedArgs {
    pub values: ArgSet,
    /// The event opens a stack capture; subsequent lines are stack frames.
    pub capture_stack: bool,
}

/// A decoder turns an event's trailing tokens into a [`DecodedArgs`]. Parse
/// failures are fatal for the scan.
pub type ArgDecoder = fn(&[&str]) -> Result<DecodedArgs>;

/// Maps event names to decoders; unregistered events fall back to
/// [`decode_default_args`]. The registry is a plain value owned by whoever
/// drives the parse.
#[derive(Debug, Clone)]
pub struct DecoderRegistry {
    decoders: BTreeMap<String, ArgDecoder>,
}

impl DecoderRegistry {
    /// A registry that only knows the stack-trace event.
    pub fn new() -> Self {
        let mut registry = Self {
            decoders: BTreeMap::new(),
        };
        registry.register(STACK_EVENT, decode_stack_args);
        registry
    }

    /// Register (or replace) the decoder for one event name.
    pub fn register(&mut self, event: &str, decoder: ArgDecoder) {
        self.decoders.insert(event.to_string(), decoder);
    }

    pub fn resolve(&self, event: &str) -> ArgDecoder {
        self.decoders
            .get(event)
            .copied()
            .unwrap_or(decode_default_args)
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses a token as an integer: `0x`/`0X` prefix selects hex, everything
/// else is decimal. Hex values above `i64::MAX` (kernel pointers) wrap
/// through the sign bit; consumers treat them as opaque keys.
pub(crate) fn parse_int(tok: &str) -> Option<i64> {
    let (neg, body) = match tok.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, tok),
    };
    let val = match body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok()? as i64,
        None => body.parse::<i64>().ok()?,
    };
    Some(if neg { val.wrapping_neg() } else { val })
}

/// Parses a hex token with or without the `0x` prefix.
pub(crate) fn parse_hex(tok: &str) -> Result<u64> {
    let body = tok
        .strip_prefix("0x")
        .or_else(|| tok.strip_prefix("0X"))
        .unwrap_or(tok);
    u64::from_str_radix(body, 16).with_context(|| format!("malformed hex value '{}'", tok))
}

/// Default decoder: every token must be a single `key=value` pair.
pub fn decode_default_args(tokens: &[&str]) -> Result<DecodedArgs> {
    let mut values = ArgSet::new();
    for tok in tokens {
        let parts: Vec<&str> = tok.split('=').collect();
        if parts.len() != 2 {
            bail!("malformed key=value token '{}'", tok);
        }
        let key = parts[0].trim();
        let val = parts[1].trim();
        let val = match parse_int(val) {
            Some(v) => ArgValue::Int(v),
            None => ArgValue::Str(val.to_string()),
        };
        values.insert(key, val);
    }
    Ok(DecodedArgs {
        values,
        capture_stack: false,
    })
}

/// Stack-trace decoder: the literal `<stack trace>` marker begins stack
/// capture with an empty argument set. Anything else decodes as key=value.
pub fn decode_stack_args(tokens: &[&str]) -> Result<DecodedArgs> {
    if tokens == ["<stack", "trace>"] {
        return Ok(DecodedArgs {
            values: ArgSet::new(),
            capture_stack: true,
        });
    }
    decode_default_args(tokens)
}

fn trim_last(tok: &str) -> Result<&str> {
    match tok.char_indices().last() {
        Some((idx, _)) => Ok(&tok[..idx]),
        None => bail!("empty argument token"),
    }
}

fn value_after_eq(tok: &str) -> Result<&str> {
    match tok.split_once('=') {
        Some((_, v)) => Ok(v),
        None => bail!("expected key=value token, got '{}'", tok),
    }
}

fn parse_dec(tok: &str) -> Result<i64> {
    tok.parse::<i64>()
        .with_context(|| format!("malformed decimal value '{}'", tok))
}

/// Low-memory-killer decoder: five fields extracted by fixed token offsets
/// from the `lmk_shrink` event.
pub fn decode_lmk_args(tokens: &[&str]) -> Result<DecodedArgs> {
    if tokens.len() < 7 {
        bail!("truncated lmk_shrink arguments ({} tokens)", tokens.len());
    }
    let mut values = ArgSet::new();
    values.insert(
        "nr",
        ArgValue::Int(parse_dec(value_after_eq(trim_last(tokens[0])?)?)?),
    );
    values.insert(
        "gfp",
        ArgValue::Int(parse_hex(value_after_eq(trim_last(tokens[1])?)?)? as i64),
    );
    values.insert("ofree", ArgValue::Int(parse_dec(tokens[3])?));
    values.insert(
        "vfs_cache",
        ArgValue::Int(parse_dec(trim_last(tokens[4])?)?),
    );
    values.insert("oom_adj", ArgValue::Int(parse_dec(tokens[6])?));
    Ok(DecodedArgs {
        values,
        capture_stack: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_decode() {
        let decoded = decode_default_args(&["page=0x2a0", "order=2", "flags=GFP_KERNEL"]).unwrap();
        assert!(!decoded.capture_stack);
        assert_eq!(decoded.values.get_int("page"), Some(0x2a0));
        assert_eq!(decoded.values.get_int("order"), Some(2));
        assert_eq!(
            decoded.values.get("flags").and_then(ArgValue::as_str),
            Some("GFP_KERNEL")
        );
    }

    #[test]
    fn test_default_decode_leading_zero_is_decimal() {
        let decoded = decode_default_args(&["nid=010"]).unwrap();
        assert_eq!(decoded.values.get_int("nid"), Some(10));
    }

    #[test]
    fn test_default_decode_negative() {
        let decoded = decode_default_args(&["adj=-5"]).unwrap();
        assert_eq!(decoded.values.get_int("adj"), Some(-5));
    }

    #[test]
    fn test_default_decode_malformed_token() {
        assert!(decode_default_args(&["noequals"]).is_err());
        assert!(decode_default_args(&["a=b=c"]).is_err());
    }

    #[test]
    fn test_stack_decode_marker() {
        let decoded = decode_stack_args(&["<stack", "trace>"]).unwrap();
        assert!(decoded.capture_stack);
        assert!(decoded.values.is_empty());
    }

    #[test]
    fn test_stack_decode_fallback() {
        let decoded = decode_stack_args(&["depth=3"]).unwrap();
        assert!(!decoded.capture_stack);
        assert_eq!(decoded.values.get_int("depth"), Some(3));
    }

    #[test]
    fn test_lmk_decode() {
        let decoded =
            decode_lmk_args(&["nr=7,", "gfp=250,", "ofree", "1024", "3200,", "adj", "-5"]).unwrap();
        assert_eq!(decoded.values.get_int("nr"), Some(7));
        assert_eq!(decoded.values.get_int("gfp"), Some(0x250));
        assert_eq!(decoded.values.get_int("ofree"), Some(1024));
        assert_eq!(decoded.values.get_int("vfs_cache"), Some(3200));
        assert_eq!(decoded.values.get_int("oom_adj"), Some(-5));
    }

    #[test]
    fn test_lmk_decode_truncated() {
        assert!(decode_lmk_args(&["nr=7,"]).is_err());
    }

    #[test]
    fn test_registry_resolve() {
        let mut registry = DecoderRegistry::new();

        // Unknown events get the default key=value decoder.
        let decoded = registry.resolve("mm_page_alloc")(&["order=2"]).unwrap();
        assert_eq!(decoded.values.get_int("order"), Some(2));

        // The stack event is pre-registered.
        let decoded = registry.resolve(STACK_EVENT)(&["<stack", "trace>"]).unwrap();
        assert!(decoded.capture_stack);

        // Explicit registration overrides the default.
        registry.register("lmk_shrink", decode_lmk_args);
        let decoded = registry
            .resolve("lmk_shrink")(&["nr=7,", "gfp=250,", "ofree", "1024", "3200,", "adj", "-5"])
            .unwrap();
        assert_eq!(decoded.values.get_int("nr"), Some(7));
    }

    #[test]
    fn test_parse_int_hex_pointer() {
        // Kernel pointers above i64::MAX wrap but stay unique keys.
        let v = parse_int("0xffffff8008883d34").unwrap();
        assert_eq!(v as u64, 0xffffff8008883d34);
    }
}
