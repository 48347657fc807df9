//! Decoder generator for 32-bit instruction sets.
//!
//! Reads a decodetree description (`%` fields, `&` argument sets,
//! `@` formats and patterns) and writes Rust source with one `Args*`
//! struct per argument set, one `extract_*` function per field, a
//! `Decode<Ir>` trait with a `trans_*` method per pattern name, a
//! first-match `decode` function and the `PATTERNS` table that
//! mirrors its match order.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

/// Width of every instruction word, in bits.
pub const INSN_BITS: u32 = 32;

// ── Data structures ─────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSegment {
    pub pos: u32,
    pub len: u32,
    pub signed: bool,
}

/// `%name seg... [!function=ex_shift_N]`.
///
/// Segments concatenate, the first one most significant; only the
/// first may be signed.
#[derive(Clone, Debug)]
pub struct Field {
    pub name: String,
    pub segments: Vec<FieldSegment>,
    /// Left shift applied after extraction.
    pub shift: u32,
}

#[derive(Clone, Debug)]
pub struct ArgSet {
    pub name: String,
    pub fields: Vec<String>,
    pub is_extern: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldMapping {
    FieldRef(String),
    Inline { pos: u32, len: u32 },
    Const(i64),
}

#[derive(Clone, Debug)]
pub struct Format {
    pub fixedbits: u32,
    pub fixedmask: u32,
    pub args_name: String,
    pub field_map: BTreeMap<String, FieldMapping>,
}

#[derive(Clone, Debug)]
pub struct Pattern {
    pub name: String,
    /// Source line, for diagnostics.
    pub line: usize,
    pub fixedbits: u32,
    pub fixedmask: u32,
    pub args_name: String,
    pub field_map: BTreeMap<String, FieldMapping>,
}

impl Pattern {
    pub fn matches(&self, insn: u32) -> bool {
        insn & self.fixedmask == self.fixedbits
    }

    /// Every word `later` accepts is already taken by `self`.
    pub fn shadows(&self, later: &Pattern) -> bool {
        self.fixedmask & !later.fixedmask == 0
            && later.fixedbits & self.fixedmask == self.fixedbits
    }
}

pub struct Parsed {
    pub fields: BTreeMap<String, Field>,
    pub argsets: BTreeMap<String, ArgSet>,
    pub patterns: Vec<Pattern>,
}

impl Parsed {
    /// Patterns that accept `insn`, in file order.
    pub fn matching(&self, insn: u32) -> impl Iterator<Item = &Pattern> {
        self.patterns.iter().filter(move |p| p.matches(insn))
    }
}

// ── Tokens ──────────────────────────────────────────────────────

pub fn is_bit_char(c: char) -> bool {
    matches!(c, '0' | '1' | '.' | '-')
}

pub fn is_bit_token(s: &str) -> bool {
    !s.is_empty() && s.chars().all(is_bit_char)
}

/// `name:len` inside a bit pattern.
pub fn is_inline_field(s: &str) -> bool {
    match s.split_once(':') {
        Some((name, len)) => {
            !name.is_empty()
                && name.chars().all(|c| c.is_alphanumeric() || c == '_')
                && !len.is_empty()
                && len.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

pub fn count_bit_tokens(tokens: &[&str]) -> usize {
    tokens
        .iter()
        .take_while(|t| is_bit_token(t) || is_inline_field(t))
        .count()
}

pub fn to_camel(s: &str) -> String {
    s.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut c = w.chars();
            match c.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + c.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

fn args_struct(args_name: &str) -> String {
    format!("Args{}", to_camel(args_name))
}

// ── Bit patterns ────────────────────────────────────────────────

pub struct BitPattern {
    pub fixedbits: u32,
    pub fixedmask: u32,
    /// Inline fields as `(pos, len)`.
    pub inline_fields: BTreeMap<String, (u32, u32)>,
}

/// Parse a run of bit tokens, most significant bit first. The run
/// must describe exactly [`INSN_BITS`] bits.
pub fn parse_bit_tokens(tokens: &[&str]) -> Result<BitPattern, String> {
    let mut pat = BitPattern {
        fixedbits: 0,
        fixedmask: 0,
        inline_fields: BTreeMap::new(),
    };
    let mut next = INSN_BITS;
    for &tok in tokens {
        if is_bit_token(tok) {
            for c in tok.chars() {
                let Some(bit) = next.checked_sub(1) else {
                    return Err(format!("pattern exceeds {INSN_BITS} bits"));
                };
                match c {
                    '1' => {
                        pat.fixedbits |= 1 << bit;
                        pat.fixedmask |= 1 << bit;
                    }
                    '0' => pat.fixedmask |= 1 << bit,
                    _ => {}
                }
                next = bit;
            }
        } else if let Some((name, len)) = tok.split_once(':') {
            let len: u32 = len
                .parse()
                .map_err(|e| format!("bad inline field {tok}: {e}"))?;
            let Some(pos) = next.checked_sub(len) else {
                return Err(format!("pattern exceeds {INSN_BITS} bits"));
            };
            if len == 0 || pat.inline_fields.contains_key(name) {
                return Err(format!("bad inline field {tok}"));
            }
            pat.inline_fields.insert(name.to_string(), (pos, len));
            next = pos;
        } else {
            return Err(format!("not a bit token: {tok}"));
        }
    }
    if next != 0 {
        return Err(format!(
            "pattern covers {} bits, expected {INSN_BITS}",
            INSN_BITS - next
        ));
    }
    Ok(pat)
}

// ── Fields and argument sets ────────────────────────────────────

/// `pos:len`, or `pos:slen` for a sign-extended segment.
pub fn parse_field_segment(s: &str) -> Result<FieldSegment, String> {
    let (pos, rest) = s
        .split_once(':')
        .ok_or_else(|| format!("bad segment: {s}"))?;
    let (signed, len) = match rest.strip_prefix('s') {
        Some(len) => (true, len),
        None => (false, rest),
    };
    let pos: u32 = pos.parse().map_err(|_| format!("bad pos: {s}"))?;
    let len: u32 = len.parse().map_err(|_| format!("bad len: {s}"))?;
    if len == 0 || pos + len > INSN_BITS {
        return Err(format!("segment out of range: {s}"));
    }
    Ok(FieldSegment { pos, len, signed })
}

pub fn parse_field(line: &str) -> Result<Field, String> {
    let mut tokens = line.split_whitespace();
    let name = tokens
        .next()
        .and_then(|t| t.strip_prefix('%'))
        .ok_or_else(|| format!("bad field: {line}"))?;
    let mut segments = Vec::new();
    let mut shift = 0;
    for tok in tokens {
        if let Some(func) = tok.strip_prefix("!function=") {
            shift = func
                .strip_prefix("ex_shift_")
                .and_then(|n| n.parse().ok())
                .filter(|&n: &u32| n < 64)
                .ok_or_else(|| format!("unknown function {func}"))?;
        } else {
            segments.push(parse_field_segment(tok)?);
        }
    }
    if segments.is_empty() {
        return Err(format!("field %{name} has no segments"));
    }
    if segments[1..].iter().any(|s| s.signed) {
        return Err(format!("field %{name}: only the first segment may be signed"));
    }
    Ok(Field {
        name: name.to_string(),
        segments,
        shift,
    })
}

pub fn parse_argset(line: &str) -> Result<ArgSet, String> {
    let mut tokens: Vec<&str> = line.split_whitespace().collect();
    let is_extern = tokens.last() == Some(&"!extern");
    if is_extern {
        tokens.pop();
    }
    let name = tokens
        .first()
        .and_then(|t| t.strip_prefix('&'))
        .ok_or_else(|| format!("bad argument set: {line}"))?;
    Ok(ArgSet {
        name: name.to_string(),
        fields: tokens[1..].iter().map(|s| s.to_string()).collect(),
        is_extern,
    })
}

// ── Formats and patterns ────────────────────────────────────────

#[derive(Default)]
struct Attrs {
    args: Option<String>,
    format: Option<String>,
    map: BTreeMap<String, FieldMapping>,
}

/// Trailing `&args`, `@format`, `%field`, `name=%field` and
/// `name=const` tokens.
fn parse_attrs(tokens: &[&str]) -> Result<Attrs, String> {
    let mut attrs = Attrs::default();
    for &tok in tokens {
        if let Some(a) = tok.strip_prefix('&') {
            attrs.args = Some(a.to_string());
        } else if let Some(f) = tok.strip_prefix('@') {
            attrs.format = Some(f.to_string());
        } else if let Some(f) = tok.strip_prefix('%') {
            attrs
                .map
                .insert(f.to_string(), FieldMapping::FieldRef(f.to_string()));
        } else if let Some((key, val)) = tok.split_once('=') {
            let mapping = match val.strip_prefix('%') {
                Some(f) => FieldMapping::FieldRef(f.to_string()),
                None => FieldMapping::Const(
                    val.parse().map_err(|_| format!("bad constant: {tok}"))?,
                ),
            };
            attrs.map.insert(key.to_string(), mapping);
        } else {
            return Err(format!("unexpected token: {tok}"));
        }
    }
    Ok(attrs)
}

fn inline_map(pat: &BitPattern) -> BTreeMap<String, FieldMapping> {
    pat.inline_fields
        .iter()
        .map(|(name, &(pos, len))| {
            (name.clone(), FieldMapping::Inline { pos, len })
        })
        .collect()
}

fn split_bits<'a>(tokens: &'a [&'a str]) -> (&'a [&'a str], &'a [&'a str]) {
    tokens.split_at(count_bit_tokens(tokens))
}

fn parse_format(line: &str) -> Result<(String, Format), String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let name = tokens[0][1..].to_string();
    let (bits, rest) = split_bits(&tokens[1..]);
    let pat = parse_bit_tokens(bits)?;
    let attrs = parse_attrs(rest)?;
    let args_name = attrs
        .args
        .ok_or_else(|| format!("format @{name} needs an argument set"))?;
    let mut field_map = inline_map(&pat);
    field_map.extend(attrs.map);
    Ok((
        name,
        Format {
            fixedbits: pat.fixedbits,
            fixedmask: pat.fixedmask,
            args_name,
            field_map,
        },
    ))
}

fn parse_pattern(
    line: &str,
    lineno: usize,
    formats: &BTreeMap<String, Format>,
    auto_args: &mut BTreeMap<String, ArgSet>,
) -> Result<Pattern, String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let name = tokens[0].to_string();
    let (bits, rest) = split_bits(&tokens[1..]);
    let pat = parse_bit_tokens(bits)?;
    let attrs = parse_attrs(rest)?;

    let (mut fixedbits, mut fixedmask) = (pat.fixedbits, pat.fixedmask);
    let (args_name, field_map) = if let Some(fname) = &attrs.format {
        let fmt = formats
            .get(fname)
            .ok_or_else(|| format!("unknown format @{fname}"))?;
        if !pat.inline_fields.is_empty() {
            return Err(format!("{name}: inline fields beside @{fname}"));
        }
        if (fixedbits ^ fmt.fixedbits) & fixedmask & fmt.fixedmask != 0 {
            return Err(format!("{name}: fixed bits contradict @{fname}"));
        }
        fixedbits |= fmt.fixedbits;
        fixedmask |= fmt.fixedmask;
        let mut map = fmt.field_map.clone();
        map.extend(attrs.map);
        (fmt.args_name.clone(), map)
    } else {
        let mut map = inline_map(&pat);
        map.extend(attrs.map);
        let args_name = match attrs.args {
            Some(a) => a,
            None => {
                let auto = format!("_auto_{name}");
                auto_args.insert(
                    auto.clone(),
                    ArgSet {
                        name: auto.clone(),
                        fields: map.keys().cloned().collect(),
                        is_extern: false,
                    },
                );
                auto
            }
        };
        (args_name, map)
    };

    Ok(Pattern {
        name,
        line: lineno,
        fixedbits,
        fixedmask,
        args_name,
        field_map,
    })
}

/// Join lines ending in `\` with the next one.
pub fn merge_continuations(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut cont = false;
    for line in input.lines() {
        if cont {
            out.push(' ');
            out.push_str(line.trim());
        } else {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(line);
        }
        cont = out.ends_with('\\');
        if cont {
            out.pop();
            out.truncate(out.trim_end().len());
        }
    }
    out
}

// ── Whole description ───────────────────────────────────────────

pub fn parse(input: &str) -> Result<Parsed, String> {
    let merged = merge_continuations(input);
    let mut fields = BTreeMap::new();
    let mut argsets = BTreeMap::new();
    let mut formats = BTreeMap::new();
    let mut patterns = Vec::new();
    let mut auto_args = BTreeMap::new();

    for (idx, raw) in merged.lines().enumerate() {
        let lineno = idx + 1;
        let line = raw.split('#').next().unwrap_or("").trim();
        let Some(first) = line.chars().next() else {
            continue;
        };
        let result = match first {
            '%' => parse_field(line).map(|f| {
                fields.insert(f.name.clone(), f);
            }),
            '&' => parse_argset(line).map(|a| {
                argsets.insert(a.name.clone(), a);
            }),
            '@' => parse_format(line).map(|(n, f)| {
                formats.insert(n, f);
            }),
            '{' | '}' | '[' | ']' => Ok(()),
            _ => parse_pattern(line, lineno, &formats, &mut auto_args)
                .map(|p| patterns.push(p)),
        };
        result.map_err(|e| format!("line {lineno}: {e}"))?;
    }
    argsets.extend(auto_args);
    let parsed = Parsed {
        fields,
        argsets,
        patterns,
    };
    parsed.validate()?;
    Ok(parsed)
}

impl Parsed {
    fn validate(&self) -> Result<(), String> {
        let mut trans_args: BTreeMap<&str, &str> = BTreeMap::new();
        for (j, p) in self.patterns.iter().enumerate() {
            let at = |msg: String| format!("line {}: {}: {msg}", p.line, p.name);
            let args = self
                .argsets
                .get(&p.args_name)
                .ok_or_else(|| at(format!("unknown argument set &{}", p.args_name)))?;
            for f in &args.fields {
                match p.field_map.get(f) {
                    None => return Err(at(format!("argument {f} is unbound"))),
                    Some(FieldMapping::FieldRef(r))
                        if !self.fields.contains_key(r) =>
                    {
                        return Err(at(format!("unknown field %{r}")));
                    }
                    Some(_) => {}
                }
            }
            let prev = trans_args
                .entry(p.name.as_str())
                .or_insert(p.args_name.as_str());
            if *prev != p.args_name {
                return Err(at(format!(
                    "trans_{} already takes &{prev}",
                    p.name
                )));
            }
            if let Some(e) = self.patterns[..j].iter().find(|e| e.shadows(p)) {
                return Err(at(format!(
                    "unreachable behind {} on line {}",
                    e.name, e.line
                )));
            }
        }
        Ok(())
    }

    /// Fields some pattern actually reads.
    fn used_fields(&self) -> BTreeSet<&str> {
        self.patterns
            .iter()
            .flat_map(|p| p.field_map.values())
            .filter_map(|m| match m {
                FieldMapping::FieldRef(r) => Some(r.as_str()),
                _ => None,
            })
            .collect()
    }
}

// ── Code generation ─────────────────────────────────────────────

/// Sign-extended bits `[pos, pos + len)` of `insn`, as an `i64`.
fn signed_expr(pos: u32, len: u32) -> String {
    let lshift = INSN_BITS - pos - len;
    let rshift = INSN_BITS - len;
    if lshift == 0 {
        format!("((insn as i32) >> {rshift}) as i64")
    } else {
        format!("(((insn as i32) << {lshift}) >> {rshift}) as i64")
    }
}

fn unsigned_expr(pos: u32, len: u32) -> String {
    let mask = if len == INSN_BITS {
        u32::MAX
    } else {
        (1 << len) - 1
    };
    if pos == 0 {
        format!("(insn & {mask:#x}) as i64")
    } else {
        format!("((insn >> {pos}) & {mask:#x}) as i64")
    }
}

fn segment_expr(s: &FieldSegment) -> String {
    if s.signed {
        signed_expr(s.pos, s.len)
    } else {
        unsigned_expr(s.pos, s.len)
    }
}

fn emit_arg_structs(
    w: &mut dyn Write,
    argsets: &BTreeMap<String, ArgSet>,
) -> std::io::Result<()> {
    for a in argsets.values().filter(|a| !a.is_extern) {
        writeln!(w, "#[derive(Debug, Clone, Copy, Default)]")?;
        writeln!(w, "pub struct {} {{", args_struct(&a.name))?;
        for f in &a.fields {
            writeln!(w, "    pub {f}: i64,")?;
        }
        writeln!(w, "}}\n")?;
    }
    Ok(())
}

fn emit_extract_field(w: &mut dyn Write, field: &Field) -> std::io::Result<()> {
    writeln!(w, "fn extract_{}(insn: u32) -> i64 {{", field.name)?;
    let (first, rest) = field.segments.split_at(1);
    if rest.is_empty() {
        writeln!(w, "    let val = {};", segment_expr(&first[0]))?;
    } else {
        writeln!(w, "    let mut val = {};", segment_expr(&first[0]))?;
        for s in rest {
            writeln!(w, "    val = (val << {}) | {};", s.len, segment_expr(s))?;
        }
    }
    if field.shift == 0 {
        writeln!(w, "    val")?;
    } else {
        writeln!(w, "    val << {}", field.shift)?;
    }
    writeln!(w, "}}\n")
}

fn field_expr(mapping: &FieldMapping) -> String {
    match mapping {
        FieldMapping::FieldRef(r) => format!("extract_{r}(insn)"),
        FieldMapping::Inline { pos, len } => unsigned_expr(*pos, *len),
        FieldMapping::Const(c) => format!("{c}_i64"),
    }
}

fn emit_decode_trait(
    w: &mut dyn Write,
    patterns: &[Pattern],
) -> std::io::Result<()> {
    writeln!(w, "pub trait Decode<Ir> {{")?;
    let mut seen = BTreeSet::new();
    for p in patterns.iter().filter(|p| seen.insert(&p.name)) {
        writeln!(
            w,
            "    fn trans_{}(&mut self, ir: &mut Ir, a: &{}) -> bool;",
            p.name,
            args_struct(&p.args_name)
        )?;
    }
    writeln!(w, "}}\n")
}

fn emit_decode_fn(w: &mut dyn Write, parsed: &Parsed) -> std::io::Result<()> {
    writeln!(
        w,
        "pub fn decode<Ir, T: Decode<Ir>>(ctx: &mut T, ir: &mut Ir, \
         insn: u32) -> bool {{"
    )?;
    for p in &parsed.patterns {
        if p.fixedmask == u32::MAX {
            writeln!(w, "    if insn == {:#010x} {{", p.fixedbits)?;
        } else {
            writeln!(
                w,
                "    if insn & {:#010x} == {:#010x} {{",
                p.fixedmask, p.fixedbits
            )?;
        }
        let sname = args_struct(&p.args_name);
        let fields = parsed
            .argsets
            .get(&p.args_name)
            .map(|a| a.fields.as_slice())
            .unwrap_or_default();
        if fields.is_empty() {
            writeln!(w, "        return ctx.trans_{}(ir, &{sname} {{}});", p.name)?;
        } else {
            writeln!(w, "        let a = {sname} {{")?;
            for f in fields {
                let expr = p.field_map.get(f).map(field_expr);
                writeln!(w, "            {f}: {},", expr.unwrap_or_default())?;
            }
            writeln!(w, "        }};")?;
            writeln!(w, "        return ctx.trans_{}(ir, &a);", p.name)?;
        }
        writeln!(w, "    }}")?;
    }
    writeln!(w, "    false")?;
    writeln!(w, "}}\n")
}

fn emit_pattern_table(
    w: &mut dyn Write,
    patterns: &[Pattern],
) -> std::io::Result<()> {
    writeln!(w, "/// One pattern of the decoder, in match order.")?;
    writeln!(w, "#[derive(Debug, Clone, Copy, PartialEq, Eq)]")?;
    writeln!(w, "pub struct PatternInfo {{")?;
    writeln!(w, "    pub name: &'static str,")?;
    writeln!(w, "    pub mask: u32,")?;
    writeln!(w, "    pub bits: u32,")?;
    writeln!(w, "}}\n")?;
    writeln!(w, "pub const PATTERNS: &[PatternInfo] = &[")?;
    for p in patterns {
        writeln!(
            w,
            "    PatternInfo {{ name: {:?}, mask: {:#010x}, bits: {:#010x} }},",
            p.name, p.fixedmask, p.fixedbits
        )?;
    }
    writeln!(w, "];")
}

// ── Public API ──────────────────────────────────────────────────

pub fn generate(input: &str, output: &mut dyn Write) -> Result<(), String> {
    let parsed = parse(input)?;
    let io = |e: std::io::Error| e.to_string();
    writeln!(output, "// Auto-generated by decodetree.").map_err(io)?;
    writeln!(output, "// Do not edit.\n").map_err(io)?;
    emit_arg_structs(output, &parsed.argsets).map_err(io)?;
    let used = parsed.used_fields();
    for field in parsed.fields.values() {
        if used.contains(field.name.as_str()) {
            emit_extract_field(output, field).map_err(io)?;
        }
    }
    emit_decode_trait(output, &parsed.patterns).map_err(io)?;
    emit_decode_fn(output, &parsed).map_err(io)?;
    emit_pattern_table(output, &parsed.patterns).map_err(io)?;
    Ok(())
}
