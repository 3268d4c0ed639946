use std::collections::{BTreeMap, HashSet};
use std::env;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use serde::Deserialize;

/// ISA data files, in the order their opcode enums are emitted.
const ISA_FILES: &[&str] = &["isa/ecma.yaml", "isa/panda.yaml"];

const FLAGS: &[&str] = &[
    "jump",
    "conditional",
    "return",
    "throw",
    "call",
    "call_virt",
    "call_dyn",
    "initobj",
    "range",
    "suspend",
    "acc_read",
    "acc_write",
    "string_id",
    "method_id",
    "literalarray_id",
    "type_id",
    "field_id",
];

const EXCEPTIONS: &[&str] = &[
    "null", "bounds", "negsize", "store", "arith", "cast", "oom", "classdef", "call", "throw",
    "stack", "ecma",
];

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct IsaFile {
    isa: String,
    min_prefix_opcode: u8,
    #[serde(default)]
    prefixes: Vec<Prefix>,
    instructions: Vec<Instruction>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Prefix {
    name: String,
    opcode: u8,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Instruction {
    mnemonic: String,
    opcode: u16,
    format: String,
    #[serde(default)]
    imms: Vec<String>,
    #[serde(default)]
    ids: Vec<String>,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    exceptions: Vec<String>,
    #[serde(default)]
    range: Option<Range>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Range {
    #[serde(default)]
    count: Option<u8>,
    #[serde(default)]
    extra: u8,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Kind {
    Imm,
    VReg,
    Id,
}

struct Operand {
    kind: Kind,
    bit_offset: u32,
    width: u32,
}

struct FormatDef {
    name: String,
    variant: String,
    prefixed: bool,
    size: u32,
    operands: Vec<Operand>,
}

impl FormatDef {
    fn count(&self, kind: Kind) -> usize {
        self.operands.iter().filter(|op| op.kind == kind).count()
    }

    fn nth(&self, kind: Kind, idx: usize) -> &Operand {
        self.operands
            .iter()
            .filter(|op| op.kind == kind)
            .nth(idx)
            .unwrap_or_else(|| panic!("{}: no operand #{idx}", self.name))
    }
}

fn main() {
    let manifest = env::var("CARGO_MANIFEST_DIR").unwrap();
    let out_dir = env::var("OUT_DIR").unwrap();

    let mut isas = Vec::new();
    for file in ISA_FILES {
        let path = format!("{manifest}/{file}");
        println!("cargo:rerun-if-changed={path}");
        let text =
            fs::read_to_string(&path).unwrap_or_else(|e| panic!("failed to read {path}: {e}"));
        let isa: IsaFile =
            serde_yaml::from_str(&text).unwrap_or_else(|e| panic!("failed to parse {path}: {e}"));
        isas.push(isa);
    }

    // Formats are shared by every ISA: one enum, one marker type each.
    let mut formats: BTreeMap<String, FormatDef> = BTreeMap::new();
    for isa in &isas {
        for insn in &isa.instructions {
            formats
                .entry(insn.format.clone())
                .or_insert_with(|| parse_format(&insn.format));
        }
    }

    let mut out = String::new();
    out.push_str("// @generated by build.rs from isa/*.yaml. Do not edit.\n\n");
    emit_formats(&mut out, &formats);
    emit_markers(&mut out, &formats);
    for isa in &isas {
        validate(isa, &formats);
        emit_isa(&mut out, isa, &formats);
    }

    let dest = Path::new(&out_dir).join("generated.rs");
    fs::write(&dest, out).expect("failed to write generated.rs");
    println!("cargo:rerun-if-changed=build.rs");
}

/// Derive the operand layout from a format name such as `PREF_IMM16_V8`.
///
/// The opcode occupies the first byte, or the first two for `PREF_`
/// formats. Operands follow in name order, packed without padding, so two
/// 4-bit operands share a byte with the first one in the low nibble.
fn parse_format(name: &str) -> FormatDef {
    let mut tokens: Vec<&str> = name.split('_').collect();
    let prefixed = tokens.first() == Some(&"PREF");
    if prefixed {
        tokens.remove(0);
    }

    let mut bit = if prefixed { 16 } else { 8 };
    let mut operands = Vec::new();
    if tokens != ["NONE"] {
        for tok in &tokens {
            let (kind, digits) = if let Some(w) = tok.strip_prefix("IMM") {
                (Kind::Imm, w)
            } else if let Some(w) = tok.strip_prefix("ID") {
                (Kind::Id, w)
            } else if let Some(w) = tok.strip_prefix('V') {
                (Kind::VReg, w)
            } else {
                panic!("format {name}: unknown operand token {tok}");
            };
            let width: u32 = digits
                .parse()
                .unwrap_or_else(|_| panic!("format {name}: bad width in {tok}"));
            assert!(
                matches!(width, 4 | 8 | 16 | 32 | 64),
                "format {name}: unsupported width {width}"
            );
            operands.push(Operand {
                kind,
                bit_offset: bit,
                width,
            });
            bit += width;
        }
    }
    assert!(bit % 8 == 0, "format {name} is not byte aligned ({bit} bits)");

    let mut variant = String::new();
    if prefixed {
        variant.push_str("Pref");
    }
    if tokens == ["NONE"] {
        variant.push_str("Bare");
    } else {
        for tok in &tokens {
            variant.push_str(&camel_segment(tok));
        }
    }

    FormatDef {
        name: name.to_string(),
        variant,
        prefixed,
        size: bit / 8,
        operands,
    }
}

/// `IMM8` -> `Imm8`, `jeqz` -> `Jeqz`.
fn camel_segment(segment: &str) -> String {
    let lower = segment.to_ascii_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

/// `call.acc.short` + `V4_IMM4_ID16` -> `CallAccShortV4Imm4Id16`.
///
/// A digit-leading segment that follows a digit gets an underscore
/// (`div2.64` -> `Div2_64`), which the camel-case lint accepts.
fn opcode_variant(mnemonic: &str, format: &FormatDef) -> String {
    let mut name = String::new();
    for segment in mnemonic.split(['.', '_']) {
        let starts_digit = segment.starts_with(|c: char| c.is_ascii_digit());
        let ends_digit = name.ends_with(|c: char| c.is_ascii_digit());
        if starts_digit && ends_digit {
            name.push('_');
        }
        name.push_str(&camel_segment(segment));
    }
    if format.operands.is_empty() {
        return name;
    }
    let tokens = format.name.split('_').filter(|t| *t != "PREF");
    for tok in tokens {
        name.push_str(&camel_segment(tok));
    }
    name
}

fn validate(isa: &IsaFile, formats: &BTreeMap<String, FormatDef>) {
    let prefixes: HashSet<u8> = isa.prefixes.iter().map(|p| p.opcode).collect();
    for p in &isa.prefixes {
        assert!(
            p.opcode >= isa.min_prefix_opcode,
            "{}: prefix {} ({:#x}) is below min_prefix_opcode",
            isa.isa,
            p.name,
            p.opcode
        );
    }

    let mut raws = HashSet::new();
    let mut variants = HashSet::new();
    for insn in &isa.instructions {
        let fmt = &formats[&insn.format];
        let what = format!("{}: {} ({})", isa.isa, insn.mnemonic, insn.format);

        let primary = (insn.opcode & 0xff) as u8;
        if fmt.prefixed {
            assert!(prefixes.contains(&primary), "{what}: undeclared prefix {primary:#x}");
        } else {
            assert!(insn.opcode <= 0xff, "{what}: plain opcode wider than a byte");
            assert!(
                primary < isa.min_prefix_opcode,
                "{what}: plain opcode collides with the prefix range"
            );
        }
        assert!(raws.insert(insn.opcode), "{what}: duplicate opcode {:#x}", insn.opcode);
        assert!(
            variants.insert(opcode_variant(&insn.mnemonic, fmt)),
            "{what}: duplicate mnemonic/format pair"
        );

        assert_eq!(
            insn.imms.len(),
            fmt.count(Kind::Imm),
            "{what}: `imms` must describe every immediate"
        );
        assert_eq!(
            insn.ids.len(),
            fmt.count(Kind::Id),
            "{what}: `ids` must describe every id"
        );
        for (i, kind) in insn.imms.iter().enumerate() {
            assert!(
                matches!(kind.as_str(), "u" | "i" | "f" | "jump"),
                "{what}: bad immediate kind {kind}"
            );
            if kind == "f" {
                let width = fmt.nth(Kind::Imm, i).width;
                assert!(width == 32 || width == 64, "{what}: float immediate of width {width}");
            }
        }
        for kind in &insn.ids {
            assert!(
                matches!(kind.as_str(), "string" | "method" | "literalarray" | "type" | "field"),
                "{what}: bad id kind {kind}"
            );
        }
        for flag in &insn.flags {
            assert!(FLAGS.contains(&flag.as_str()), "{what}: unknown flag {flag}");
        }
        for exc in &insn.exceptions {
            assert!(EXCEPTIONS.contains(&exc.as_str()), "{what}: unknown exception {exc}");
        }
        if insn.flags.iter().any(|f| f == "jump") {
            assert!(
                insn.imms.iter().any(|k| k == "jump"),
                "{what}: jump without a jump offset"
            );
        }
        if let Some(range) = &insn.range {
            assert!(fmt.count(Kind::VReg) >= 1, "{what}: range without a base register");
            if let Some(count) = range.count {
                assert!(
                    (count as usize) < insn.imms.len(),
                    "{what}: range count refers to a missing immediate"
                );
            }
        }
    }
}

fn emit_formats(out: &mut String, formats: &BTreeMap<String, FormatDef>) {
    out.push_str("/// Physical instruction layouts.\n");
    out.push_str("#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]\n");
    out.push_str("pub enum Format {\n");
    for f in formats.values() {
        writeln!(out, "    /// `{}`, {} byte(s).", f.name, f.size).unwrap();
        writeln!(out, "    {},", f.variant).unwrap();
    }
    out.push_str("}\n\n");

    for f in formats.values() {
        writeln!(
            out,
            "static LAYOUT_{}: crate::format::FormatLayout = crate::format::FormatLayout {{",
            f.name
        )
        .unwrap();
        writeln!(out, "    name: {:?},", f.name).unwrap();
        writeln!(out, "    size: {},", f.size).unwrap();
        writeln!(out, "    prefixed: {},", f.prefixed).unwrap();
        out.push_str("    operands: &[\n");
        for op in &f.operands {
            let kind = match op.kind {
                Kind::Imm => "Imm",
                Kind::VReg => "VReg",
                Kind::Id => "Id",
            };
            writeln!(
                out,
                "        crate::format::OperandLayout {{ kind: crate::format::OperandKind::{kind}, bit_offset: {}, width: {} }},",
                op.bit_offset, op.width
            )
            .unwrap();
        }
        out.push_str("    ],\n};\n\n");
    }

    out.push_str("impl Format {\n");
    out.push_str("    /// Every format referenced by an instruction set.\n");
    out.push_str("    pub const ALL: &'static [Format] = &[\n");
    for f in formats.values() {
        writeln!(out, "        Format::{},", f.variant).unwrap();
    }
    out.push_str("    ];\n\n");
    out.push_str("    /// Static layout of this format.\n");
    out.push_str("    pub fn layout(self) -> &'static crate::format::FormatLayout {\n");
    out.push_str("        match self {\n");
    for f in formats.values() {
        writeln!(out, "            Format::{} => &LAYOUT_{},", f.variant, f.name).unwrap();
    }
    out.push_str("        }\n    }\n}\n\n");
}

fn emit_markers(out: &mut String, formats: &BTreeMap<String, FormatDef>) {
    out.push_str("/// Zero-sized markers, one per [`Format`], carrying operand positions\n");
    out.push_str("/// and resolved field types as associated items.\n");
    out.push_str("pub mod formats {\n");
    out.push_str("    use crate::format::{FormatSpec, IdSlot, ImmSlot, VRegSlot};\n");
    out.push_str("    use crate::width::{Bits, FieldWidth};\n");
    out.push_str("    use crate::Format;\n\n");
    for f in formats.values() {
        writeln!(out, "    /// Marker for `{}`.", f.name).unwrap();
        out.push_str("    #[derive(Clone, Copy, Debug, Default)]\n");
        writeln!(out, "    pub struct {};\n", f.variant).unwrap();
        writeln!(out, "    impl FormatSpec for {} {{", f.variant).unwrap();
        writeln!(out, "        const FORMAT: Format = Format::{};", f.variant).unwrap();
        writeln!(out, "        const SIZE: usize = {};", f.size).unwrap();
        out.push_str("    }\n\n");

        for (kind, count) in [
            (Kind::Imm, f.count(Kind::Imm)),
            (Kind::VReg, f.count(Kind::VReg)),
            (Kind::Id, f.count(Kind::Id)),
        ] {
            for idx in 0..count {
                let op = f.nth(kind, idx);
                let trait_name = match kind {
                    Kind::Imm => "ImmSlot",
                    Kind::VReg => "VRegSlot",
                    Kind::Id => "IdSlot",
                };
                writeln!(out, "    impl {trait_name}<{idx}> for {} {{", f.variant).unwrap();
                writeln!(out, "        const BIT_OFFSET: usize = {};", op.bit_offset).unwrap();
                writeln!(out, "        const WIDTH: u32 = {};", op.width).unwrap();
                if kind == Kind::Imm {
                    writeln!(
                        out,
                        "        type Unsigned = <Bits<{}> as FieldWidth>::Unsigned;",
                        op.width
                    )
                    .unwrap();
                    writeln!(
                        out,
                        "        type Signed = <Bits<{}> as FieldWidth>::Signed;",
                        op.width
                    )
                    .unwrap();
                }
                out.push_str("    }\n\n");
            }
        }
    }
    out.push_str("}\n\n");
}

fn emit_isa(out: &mut String, isa: &IsaFile, formats: &BTreeMap<String, FormatDef>) {
    let enum_name = format!("{}Opcode", camel_segment(&isa.isa));
    let table = format!("{}_OPCODE_INFO", isa.isa.to_ascii_uppercase());
    let all = format!("{}_OPCODES", isa.isa.to_ascii_uppercase());
    let n = isa.instructions.len();

    let rows: Vec<(String, &Instruction, &FormatDef)> = isa
        .instructions
        .iter()
        .map(|insn| {
            let fmt = &formats[&insn.format];
            (opcode_variant(&insn.mnemonic, fmt), insn, fmt)
        })
        .collect();

    writeln!(
        out,
        "/// Opcodes of the `{}` instruction set, generated from `isa/{}.yaml`.",
        isa.isa, isa.isa
    )
    .unwrap();
    out.push_str("///\n/// The discriminant is the raw opcode value: the opcode byte, or\n");
    out.push_str("/// `(secondary << 8) | prefix` for prefixed opcodes.\n");
    out.push_str("#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]\n");
    out.push_str("#[repr(u16)]\n");
    writeln!(out, "pub enum {enum_name} {{").unwrap();
    for (variant, insn, fmt) in &rows {
        writeln!(out, "    /// `{}` ({})", insn.mnemonic, fmt.name).unwrap();
        writeln!(out, "    {variant} = {:#06x},", insn.opcode).unwrap();
    }
    out.push_str("}\n\n");

    writeln!(out, "static {all}: [{enum_name}; {n}] = [").unwrap();
    for (variant, _, _) in &rows {
        writeln!(out, "    {enum_name}::{variant},").unwrap();
    }
    out.push_str("];\n\n");

    writeln!(out, "static {table}: [crate::opcode::OpcodeInfo; {n}] = [").unwrap();
    for (_, insn, fmt) in &rows {
        let mut flags: Vec<String> = insn.flags.iter().map(|f| f.to_ascii_uppercase()).collect();
        for id in &insn.ids {
            let flag = format!("{}_ID", id.to_ascii_uppercase());
            if !flags.contains(&flag) {
                flags.push(flag);
            }
        }
        if insn.range.is_some() && !flags.iter().any(|f| f == "RANGE") {
            flags.push("RANGE".to_string());
        }
        let flags_expr = flags.iter().fold(
            "crate::opcode::OpcodeFlags::empty()".to_string(),
            |acc, f| format!("{acc}.union(crate::opcode::OpcodeFlags::{f})"),
        );
        let exc_expr = insn.exceptions.iter().fold(
            "crate::opcode::Exceptions::empty()".to_string(),
            |acc, e| format!("{acc}.union(crate::opcode::Exceptions::{})", e.to_ascii_uppercase()),
        );
        let imms: Vec<&str> = insn
            .imms
            .iter()
            .map(|k| match k.as_str() {
                "u" => "crate::opcode::ImmKind::Unsigned",
                "i" => "crate::opcode::ImmKind::Signed",
                "f" => "crate::opcode::ImmKind::Float",
                _ => "crate::opcode::ImmKind::Jump",
            })
            .collect();
        let ids: Vec<&str> = insn
            .ids
            .iter()
            .map(|k| match k.as_str() {
                "string" => "crate::opcode::IdKind::String",
                "method" => "crate::opcode::IdKind::Method",
                "literalarray" => "crate::opcode::IdKind::LiteralArray",
                "type" => "crate::opcode::IdKind::Type",
                _ => "crate::opcode::IdKind::Field",
            })
            .collect();
        let range = match &insn.range {
            None => "None".to_string(),
            Some(r) => format!(
                "Some(crate::opcode::RangeInfo {{ count_imm: {}, extra: {} }})",
                match r.count {
                    Some(c) => format!("Some({c})"),
                    None => "None".to_string(),
                },
                r.extra
            ),
        };

        out.push_str("    crate::opcode::OpcodeInfo {\n");
        writeln!(out, "        mnemonic: {:?},", insn.mnemonic).unwrap();
        writeln!(out, "        raw: {:#06x},", insn.opcode).unwrap();
        writeln!(out, "        format: Format::{},", fmt.variant).unwrap();
        writeln!(out, "        flags: {flags_expr},").unwrap();
        writeln!(out, "        exceptions: {exc_expr},").unwrap();
        writeln!(out, "        imm_kinds: &[{}],", imms.join(", ")).unwrap();
        writeln!(out, "        id_kinds: &[{}],", ids.join(", ")).unwrap();
        writeln!(out, "        range: {range},").unwrap();
        out.push_str("    },\n");
    }
    out.push_str("];\n\n");

    writeln!(out, "impl crate::opcode::Opcode for {enum_name} {{").unwrap();
    writeln!(out, "    const ISA: &'static str = {:?};", isa.isa).unwrap();
    writeln!(out, "    const MIN_PREFIX_OPCODE: u8 = {:#04x};", isa.min_prefix_opcode).unwrap();
    out.push_str("    const PREFIXES: &'static [(&'static str, u8)] = &[");
    for p in &isa.prefixes {
        write!(out, "({:?}, {:#04x}), ", p.name, p.opcode).unwrap();
    }
    out.push_str("];\n\n");
    out.push_str("    fn all() -> &'static [Self] {\n");
    writeln!(out, "        &{all}").unwrap();
    out.push_str("    }\n\n");
    out.push_str("    fn from_raw(raw: u16) -> Option<Self> {\n");
    out.push_str("        match raw {\n");
    for (variant, insn, _) in &rows {
        writeln!(out, "            {:#06x} => Some(Self::{variant}),", insn.opcode).unwrap();
    }
    out.push_str("            _ => None,\n        }\n    }\n\n");
    out.push_str("    #[inline]\n");
    out.push_str("    fn raw(self) -> u16 {\n        self as u16\n    }\n\n");
    out.push_str("    fn info(self) -> &'static crate::opcode::OpcodeInfo {\n");
    out.push_str("        match self {\n");
    for (i, (variant, _, _)) in rows.iter().enumerate() {
        writeln!(out, "            Self::{variant} => &{table}[{i}],").unwrap();
    }
    out.push_str("        }\n    }\n}\n\n");
}
