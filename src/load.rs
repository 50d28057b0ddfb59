use std::fs;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use jclassfile::class_file;
use jclassfile::constant_pool::ConstantPool;
use jdescriptor::MethodDescriptor;
use zip::ZipArchive;

use crate::flow::{build_blocks, discover_edges};
use crate::ir::{Class, ClassGroup, Field, Insn, InsnKind, Method, access};
use crate::opcodes;

/// Load one program version from a JAR or a single class file and resolve
/// its hierarchy. All back-references are populated before this returns, so
/// classification never resolves anything lazily.
pub(crate) fn load_group(path: &Path) -> Result<ClassGroup> {
    let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    let mut group = ClassGroup::new();

    match extension {
        "class" => {
            let data =
                fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            let class = parse_class(&data)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            group.add(class)?;
        }
        "jar" => load_jar(path, &mut group)?,
        _ => anyhow::bail!("unsupported input file: {}", path.display()),
    }

    group.resolve()?;
    Ok(group)
}

fn load_jar(path: &Path, group: &mut ClassGroup) -> Result<()> {
    let file = fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;

    // Keep deterministic ordering by sorting entry names.
    let mut entry_names = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if name.ends_with(".class") && !name.ends_with("module-info.class") {
            entry_names.push(name);
        }
    }

    entry_names.sort();
    entry_names.dedup();

    for name in entry_names {
        let mut entry = archive
            .by_name(&name)
            .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
        let class = parse_class(&data)
            .with_context(|| format!("failed to parse {}:{}", path.display(), name))?;
        group.add(class)?;
    }

    Ok(())
}

fn parse_class(data: &[u8]) -> Result<Class> {
    let class_file = class_file::parse(data).context("failed to parse class file bytes")?;
    let constant_pool = class_file.constant_pool();

    let name =
        resolve_class_name(constant_pool, class_file.this_class()).context("resolve class name")?;
    let super_name = if class_file.super_class() == 0 {
        None
    } else {
        Some(
            resolve_class_name(constant_pool, class_file.super_class())
                .context("resolve super class name")?,
        )
    };
    let mut interface_names = Vec::new();
    for interface in class_file.interfaces() {
        interface_names.push(
            resolve_class_name(constant_pool, *interface).context("resolve interface name")?,
        );
    }

    let fields = parse_fields(constant_pool, class_file.fields()).context("parse fields")?;
    let methods =
        parse_methods(&name, constant_pool, class_file.methods()).context("parse methods")?;

    Ok(Class::new(
        name,
        class_file.access_flags().bits(),
        super_name,
        interface_names,
        methods,
        fields,
    ))
}

fn parse_fields(
    constant_pool: &[ConstantPool],
    fields: &[jclassfile::fields::FieldInfo],
) -> Result<Vec<Field>> {
    let mut parsed = Vec::new();
    for field in fields {
        let name = resolve_utf8(constant_pool, field.name_index()).context("resolve field name")?;
        let descriptor = resolve_utf8(constant_pool, field.descriptor_index())
            .context("resolve field descriptor")?;
        parsed.push(Field {
            name,
            descriptor,
            access: field.access_flags().bits(),
        });
    }
    Ok(parsed)
}

fn parse_methods(
    class_name: &str,
    constant_pool: &[ConstantPool],
    methods: &[jclassfile::methods::MethodInfo],
) -> Result<Vec<Method>> {
    let mut parsed = Vec::new();
    for method in methods {
        let name =
            resolve_utf8(constant_pool, method.name_index()).context("resolve method name")?;
        let descriptor = resolve_utf8(constant_pool, method.descriptor_index())
            .context("resolve method descriptor")?;
        let desc = MethodDescriptor::from_str(&descriptor).context("parse method descriptor")?;
        let flags = method.access_flags().bits();

        let code = method
            .attributes()
            .iter()
            .find_map(|attribute| match attribute {
                jclassfile::attributes::Attribute::Code {
                    code,
                    exception_table,
                    ..
                } => Some((code, exception_table)),
                _ => None,
            });

        let (insns, flow) = match code {
            None => (Vec::new(), None),
            Some((code, exception_table)) => {
                let handler_offsets: Vec<usize> = exception_table
                    .iter()
                    .map(|entry| entry.handler_pc() as usize)
                    .collect();
                match decode_insns(code, &handler_offsets) {
                    Ok(insns) => {
                        let edges = discover_edges(&insns);
                        match build_blocks(&insns, &edges) {
                            Ok(graph) => (insns, Some(graph)),
                            Err(err) => {
                                log::warn!(
                                    "dropping control flow of {class_name}.{name}{descriptor}: {err:#}"
                                );
                                (insns, None)
                            }
                        }
                    }
                    Err(err) => {
                        log::warn!(
                            "dropping bytecode of {class_name}.{name}{descriptor}: {err:#}"
                        );
                        (Vec::new(), None)
                    }
                }
            }
        };

        let real =
            !insns.is_empty() && flags & (access::ACC_SYNTHETIC | access::ACC_BRIDGE) == 0;
        parsed.push(Method {
            name,
            descriptor,
            desc,
            access: flags,
            real,
            insns,
            flow,
        });
    }
    Ok(parsed)
}

fn resolve_class_name(constant_pool: &[ConstantPool], class_index: u16) -> Result<String> {
    let entry = constant_pool
        .get(class_index as usize)
        .context("missing class entry")?;
    match entry {
        ConstantPool::Class { name_index } => resolve_utf8(constant_pool, *name_index),
        _ => anyhow::bail!("unexpected class entry"),
    }
}

fn resolve_utf8(constant_pool: &[ConstantPool], index: u16) -> Result<String> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing utf8 entry")?;
    match entry {
        ConstantPool::Utf8 { value } => Ok(value.clone()),
        _ => anyhow::bail!("unexpected utf8 entry"),
    }
}

/// Decode raw bytecode into index-based instructions: one pass discovers
/// instruction byte offsets, the second maps jump/switch targets and
/// exception handler entry points onto instruction indices.
fn decode_insns(code: &[u8], handler_offsets: &[usize]) -> Result<Vec<Insn>> {
    let mut offsets = Vec::new();
    let mut offset = 0usize;
    while offset < code.len() {
        offsets.push(offset);
        let length = opcode_length(code, offset)?;
        if length == 0 || offset + length > code.len() {
            anyhow::bail!("invalid bytecode length at offset {}", offset);
        }
        offset += length;
    }

    let mut insns = Vec::with_capacity(offsets.len());
    for &offset in &offsets {
        let opcode = code[offset];
        let kind = match opcode {
            0x99..=0xa6 | opcodes::IFNULL | opcodes::IFNONNULL => InsnKind::Jump {
                target: insn_index(&offsets, offset as i64 + i64::from(read_i16(code, offset + 1)?))?,
                conditional: true,
            },
            opcodes::GOTO | opcodes::JSR => InsnKind::Jump {
                target: insn_index(&offsets, offset as i64 + i64::from(read_i16(code, offset + 1)?))?,
                conditional: false,
            },
            opcodes::GOTO_W | opcodes::JSR_W => InsnKind::Jump {
                target: insn_index(&offsets, offset as i64 + i64::from(read_i32(code, offset + 1)?))?,
                conditional: false,
            },
            opcodes::TABLESWITCH => InsnKind::Switch {
                targets: switch_targets(code, offset, &offsets, true)?,
            },
            opcodes::LOOKUPSWITCH => InsnKind::Switch {
                targets: switch_targets(code, offset, &offsets, false)?,
            },
            opcodes::IRETURN..=opcodes::RETURN | opcodes::ATHROW | opcodes::RET => InsnKind::Exit,
            _ => InsnKind::Other,
        };
        insns.push(Insn {
            opcode,
            kind,
            label_target: false,
        });
    }

    let mut targets = Vec::new();
    for insn in &insns {
        match &insn.kind {
            InsnKind::Jump { target, .. } => targets.push(*target),
            InsnKind::Switch { targets: switch } => targets.extend_from_slice(switch),
            _ => {}
        }
    }
    for &handler in handler_offsets {
        targets.push(insn_index(&offsets, handler as i64)?);
    }
    for target in targets {
        insns[target].label_target = true;
    }

    Ok(insns)
}

/// Instruction index of a byte offset; the offset must start an instruction.
fn insn_index(offsets: &[usize], byte_offset: i64) -> Result<usize> {
    usize::try_from(byte_offset)
        .ok()
        .and_then(|byte_offset| offsets.binary_search(&byte_offset).ok())
        .with_context(|| format!("target offset {byte_offset} does not start an instruction"))
}

fn switch_targets(
    code: &[u8],
    offset: usize,
    offsets: &[usize],
    table: bool,
) -> Result<Vec<usize>> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let default = read_i32(code, base)?;
    let mut byte_targets = vec![offset as i64 + i64::from(default)];
    if table {
        let low = read_i32(code, base + 4)?;
        let high = read_i32(code, base + 8)?;
        let count = high
            .checked_sub(low)
            .and_then(|v| v.checked_add(1))
            .context("invalid tableswitch range")?;
        let mut index = base + 12;
        for _ in 0..count {
            byte_targets.push(offset as i64 + i64::from(read_i32(code, index)?));
            index += 4;
        }
    } else {
        let npairs = read_i32(code, base + 4)?;
        let mut index = base + 8;
        for _ in 0..npairs {
            byte_targets.push(offset as i64 + i64::from(read_i32(code, index + 4)?));
            index += 8;
        }
    }

    let mut targets = Vec::new();
    for byte_target in byte_targets {
        let target = insn_index(offsets, byte_target)?;
        if !targets.contains(&target) {
            targets.push(target);
        }
    }
    Ok(targets)
}

fn opcode_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code[offset];
    let length = match opcode {
        0x00..=0x0f => 1,
        0x10 => 2,
        0x11 => 3,
        opcodes::LDC => 2,
        opcodes::LDC_W | opcodes::LDC2_W => 3,
        0x15..=0x19 => 2,
        0x1a..=0x35 => 1,
        0x36..=0x3a => 2,
        0x3b..=0x4e => 1,
        0x4f..=0x56 => 1,
        0x57..=0x5f => 1,
        0x60..=0x83 => 1,
        0x84 => 3,
        0x85..=0x98 => 1,
        0x99..=0xa6 => 3,
        opcodes::GOTO | opcodes::JSR => 3,
        opcodes::RET => 2,
        opcodes::TABLESWITCH => tableswitch_length(code, offset)?,
        opcodes::LOOKUPSWITCH => lookupswitch_length(code, offset)?,
        0xac..=0xb1 => 1,
        0xb2..=0xb5 => 3,
        opcodes::INVOKEVIRTUAL | opcodes::INVOKESPECIAL | opcodes::INVOKESTATIC => 3,
        opcodes::INVOKEINTERFACE | opcodes::INVOKEDYNAMIC => 5,
        0xbb => 3,
        0xbc => 2,
        0xbd => 3,
        0xbe | 0xbf => 1,
        0xc0 | 0xc1 => 3,
        0xc2 | 0xc3 => 1,
        opcodes::WIDE => wide_length(code, offset)?,
        0xc5 => 4,
        opcodes::IFNULL | opcodes::IFNONNULL => 3,
        opcodes::GOTO_W | opcodes::JSR_W => 5,
        0xca => 1,
        0xfe | 0xff => 1,
        _ => anyhow::bail!("unsupported opcode 0x{:02x}", opcode),
    };
    Ok(length)
}

fn tableswitch_length(code: &[u8], offset: usize) -> Result<usize> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let low = read_i32(code, base + 4)?;
    let high = read_i32(code, base + 8)?;
    let count = high
        .checked_sub(low)
        .and_then(|v| v.checked_add(1))
        .context("invalid tableswitch range")?;
    if count < 0 {
        anyhow::bail!("invalid tableswitch range");
    }
    Ok(1 + padding + 12 + (count as usize) * 4)
}

fn lookupswitch_length(code: &[u8], offset: usize) -> Result<usize> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let npairs = read_i32(code, base + 4)?;
    if npairs < 0 {
        anyhow::bail!("invalid lookupswitch pairs");
    }
    Ok(1 + padding + 8 + (npairs as usize) * 8)
}

fn wide_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code
        .get(offset + 1)
        .copied()
        .context("missing wide opcode")?;
    if opcode == 0x84 { Ok(6) } else { Ok(4) }
}

fn padding(offset: usize) -> usize {
    (4 - ((offset + 1) % 4)) % 4
}

fn read_u16(code: &[u8], offset: usize) -> Result<u16> {
    let slice = code
        .get(offset..offset + 2)
        .context("bytecode u16 out of bounds")?;
    Ok(u16::from_be_bytes([slice[0], slice[1]]))
}

fn read_u32(code: &[u8], offset: usize) -> Result<u32> {
    let slice = code
        .get(offset..offset + 4)
        .context("bytecode u32 out of bounds")?;
    Ok(u32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

fn read_i16(code: &[u8], offset: usize) -> Result<i16> {
    let value = read_u16(code, offset)?;
    Ok(i16::from_be_bytes(value.to_be_bytes()))
}

fn read_i32(code: &[u8], offset: usize) -> Result<i32> {
    let value = read_u32(code, offset)?;
    Ok(i32::from_be_bytes(value.to_be_bytes()))
}
