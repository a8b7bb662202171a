use std::collections::BTreeMap;

use anyhow::{Context, Result};

use crate::ir::{Constant, Insn, LabelId, TryCatchBlock};
use crate::opcodes;

/// Constant pool access needed to decode instructions.
pub(crate) trait ConstantLookup {
    fn class_name(&self, index: u16) -> Result<String>;
    fn member_ref(&self, index: u16) -> Result<MemberRef>;
    fn loadable(&self, index: u16) -> Result<Constant>;
    fn invoke_dynamic(&self, index: u16) -> Result<(String, String)>;
}

/// Resolved `Fieldref`, `Methodref` or `InterfaceMethodref`.
#[derive(Clone, Debug)]
pub(crate) struct MemberRef {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) desc: String,
    pub(crate) interface: bool,
}

/// Exception table entry with the catch type already resolved.
#[derive(Clone, Debug)]
pub(crate) struct RawHandler {
    pub(crate) start_pc: u16,
    pub(crate) end_pc: u16,
    pub(crate) handler_pc: u16,
    pub(crate) catch_type: Option<String>,
}

/// Labels allocated on first reference to a bytecode offset.
#[derive(Default)]
struct LabelTable {
    by_offset: BTreeMap<u32, LabelId>,
}

impl LabelTable {
    fn at(&mut self, offset: u32) -> LabelId {
        let next = LabelId(self.by_offset.len() as u32);
        *self.by_offset.entry(offset).or_insert(next)
    }
}

/// Decode a `Code` attribute into instructions with inline labels, line
/// numbers and a label-based try/catch table.
pub(crate) fn decode_code(
    code: &[u8],
    handlers: &[RawHandler],
    line_numbers: &[(u16, u16)],
    pool: &impl ConstantLookup,
) -> Result<(Vec<Insn>, Vec<TryCatchBlock>)> {
    let mut labels = LabelTable::default();
    let mut decoded = Vec::new();
    let mut offset = 0usize;
    while offset < code.len() {
        let (insn, next) = decode_one(code, offset, pool, &mut labels)
            .with_context(|| format!("decode instruction at offset {offset}"))?;
        decoded.push((offset as u32, insn));
        offset = next;
    }

    let blocks = handlers
        .iter()
        .map(|handler| TryCatchBlock {
            start: labels.at(handler.start_pc as u32),
            end: labels.at(handler.end_pc as u32),
            handler: labels.at(handler.handler_pc as u32),
            catch_type: handler.catch_type.clone(),
        })
        .collect();

    let mut lines: BTreeMap<u32, u16> = BTreeMap::new();
    for (start_pc, line) in line_numbers {
        labels.at(*start_pc as u32);
        lines.entry(*start_pc as u32).or_insert(*line);
    }

    let mut out = Vec::with_capacity(decoded.len() + labels.by_offset.len());
    for (offset, insn) in decoded {
        push_label(&mut out, &labels, &lines, offset);
        out.push(insn);
    }
    push_label(&mut out, &labels, &lines, code.len() as u32);

    Ok((out, blocks))
}

fn push_label(out: &mut Vec<Insn>, labels: &LabelTable, lines: &BTreeMap<u32, u16>, offset: u32) {
    if let Some(label) = labels.by_offset.get(&offset) {
        out.push(Insn::Label(*label));
        if let Some(line) = lines.get(&offset) {
            out.push(Insn::LineNumber {
                line: *line,
                start: *label,
            });
        }
    }
}

fn decode_one(
    code: &[u8],
    offset: usize,
    pool: &impl ConstantLookup,
    labels: &mut LabelTable,
) -> Result<(Insn, usize)> {
    let opcode = code[offset];
    let decoded = match opcode {
        opcodes::NOP..=opcodes::DCONST_1 => (Insn::Simple(opcode), offset + 1),
        opcodes::BIPUSH => (
            Insn::Int {
                opcode,
                operand: read_u8(code, offset + 1)? as i8 as i32,
            },
            offset + 2,
        ),
        opcodes::SIPUSH => (
            Insn::Int {
                opcode,
                operand: read_i16(code, offset + 1)? as i32,
            },
            offset + 3,
        ),
        opcodes::LDC => (
            Insn::Ldc(pool.loadable(read_u8(code, offset + 1)? as u16)?),
            offset + 2,
        ),
        opcodes::LDC_W | opcodes::LDC2_W => (
            Insn::Ldc(pool.loadable(read_u16(code, offset + 1)?)?),
            offset + 3,
        ),
        opcodes::ILOAD..=opcodes::ALOAD | opcodes::ISTORE..=opcodes::ASTORE | opcodes::RET => (
            Insn::Var {
                opcode,
                var: read_u8(code, offset + 1)? as u16,
            },
            offset + 2,
        ),
        opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
            let index = opcode - opcodes::ILOAD_0;
            (
                Insn::Var {
                    opcode: opcodes::ILOAD + index / 4,
                    var: (index % 4) as u16,
                },
                offset + 1,
            )
        }
        opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
            let index = opcode - opcodes::ISTORE_0;
            (
                Insn::Var {
                    opcode: opcodes::ISTORE + index / 4,
                    var: (index % 4) as u16,
                },
                offset + 1,
            )
        }
        opcodes::IINC => (
            Insn::Iinc {
                var: read_u8(code, offset + 1)? as u16,
                incr: read_u8(code, offset + 2)? as i8 as i16,
            },
            offset + 3,
        ),
        opcodes::IFEQ..=opcodes::JSR | opcodes::IFNULL | opcodes::IFNONNULL => {
            let branch = read_i16(code, offset + 1)? as i64;
            (
                Insn::Jump {
                    opcode,
                    label: labels.at(target(offset, branch)?),
                },
                offset + 3,
            )
        }
        opcodes::GOTO_W | opcodes::JSR_W => {
            let branch = read_i32(code, offset + 1)? as i64;
            let opcode = if opcode == opcodes::GOTO_W {
                opcodes::GOTO
            } else {
                opcodes::JSR
            };
            (
                Insn::Jump {
                    opcode,
                    label: labels.at(target(offset, branch)?),
                },
                offset + 5,
            )
        }
        opcodes::TABLESWITCH => {
            let base = offset + 1 + padding(offset);
            let default = read_i32(code, base)? as i64;
            let min = read_i32(code, base + 4)?;
            let max = read_i32(code, base + 8)?;
            let count = (max as i64)
                .checked_sub(min as i64)
                .map(|span| span + 1)
                .filter(|count| *count >= 0)
                .context("invalid tableswitch range")?;
            let remaining = code.len().saturating_sub(base + 12) / 4;
            let mut targets = Vec::with_capacity((count as usize).min(remaining));
            let mut index = base + 12;
            for _ in 0..count {
                let branch = read_i32(code, index)? as i64;
                targets.push(labels.at(target(offset, branch)?));
                index += 4;
            }
            (
                Insn::TableSwitch {
                    min,
                    max,
                    default: labels.at(target(offset, default)?),
                    labels: targets,
                },
                index,
            )
        }
        opcodes::LOOKUPSWITCH => {
            let base = offset + 1 + padding(offset);
            let default = read_i32(code, base)? as i64;
            let npairs = read_i32(code, base + 4)?;
            if npairs < 0 {
                anyhow::bail!("invalid lookupswitch pair count {npairs}");
            }
            let capacity = (npairs as usize).min(code.len().saturating_sub(base + 8) / 8);
            let mut keys = Vec::with_capacity(capacity);
            let mut targets = Vec::with_capacity(capacity);
            let mut index = base + 8;
            for _ in 0..npairs {
                keys.push(read_i32(code, index)?);
                let branch = read_i32(code, index + 4)? as i64;
                targets.push(labels.at(target(offset, branch)?));
                index += 8;
            }
            (
                Insn::LookupSwitch {
                    default: labels.at(target(offset, default)?),
                    keys,
                    labels: targets,
                },
                index,
            )
        }
        opcodes::GETSTATIC..=opcodes::PUTFIELD => {
            let member = pool.member_ref(read_u16(code, offset + 1)?)?;
            (
                Insn::Field {
                    opcode,
                    owner: member.owner,
                    name: member.name,
                    desc: member.desc,
                },
                offset + 3,
            )
        }
        opcodes::INVOKEVIRTUAL..=opcodes::INVOKEINTERFACE => {
            let member = pool.member_ref(read_u16(code, offset + 1)?)?;
            let length = if opcode == opcodes::INVOKEINTERFACE { 5 } else { 3 };
            (
                Insn::Method {
                    opcode,
                    owner: member.owner,
                    name: member.name,
                    desc: member.desc,
                    interface: member.interface,
                },
                offset + length,
            )
        }
        opcodes::INVOKEDYNAMIC => {
            let (name, desc) = pool.invoke_dynamic(read_u16(code, offset + 1)?)?;
            (Insn::InvokeDynamic { name, desc }, offset + 5)
        }
        opcodes::NEW | opcodes::ANEWARRAY | opcodes::CHECKCAST | opcodes::INSTANCEOF => (
            Insn::Type {
                opcode,
                desc: pool.class_name(read_u16(code, offset + 1)?)?,
            },
            offset + 3,
        ),
        opcodes::NEWARRAY => (
            Insn::Int {
                opcode,
                operand: read_u8(code, offset + 1)? as i32,
            },
            offset + 2,
        ),
        opcodes::MULTIANEWARRAY => (
            Insn::MultiANewArray {
                desc: pool.class_name(read_u16(code, offset + 1)?)?,
                dims: read_u8(code, offset + 3)?,
            },
            offset + 4,
        ),
        opcodes::WIDE => {
            let widened = read_u8(code, offset + 1)?;
            let var = read_u16(code, offset + 2)?;
            match widened {
                opcodes::IINC => (
                    Insn::Iinc {
                        var,
                        incr: read_i16(code, offset + 4)?,
                    },
                    offset + 6,
                ),
                opcodes::ILOAD..=opcodes::ALOAD
                | opcodes::ISTORE..=opcodes::ASTORE
                | opcodes::RET => (
                    Insn::Var {
                        opcode: widened,
                        var,
                    },
                    offset + 4,
                ),
                other => anyhow::bail!("invalid wide opcode 0x{other:02x}"),
            }
        }
        opcodes::IALOAD..=opcodes::SALOAD
        | opcodes::IASTORE..=opcodes::LXOR
        | opcodes::I2L..=opcodes::DCMPG
        | opcodes::IRETURN..=opcodes::RETURN
        | opcodes::ARRAYLENGTH
        | opcodes::ATHROW
        | opcodes::MONITORENTER
        | opcodes::MONITOREXIT => (Insn::Simple(opcode), offset + 1),
        other => anyhow::bail!("unsupported opcode 0x{other:02x}"),
    };
    Ok(decoded)
}

fn target(offset: usize, branch: i64) -> Result<u32> {
    let target = offset as i64 + branch;
    u32::try_from(target).with_context(|| format!("branch target {target} out of range"))
}

pub(crate) fn padding(offset: usize) -> usize {
    (4 - ((offset + 1) % 4)) % 4
}

fn read_u8(code: &[u8], offset: usize) -> Result<u8> {
    code.get(offset)
        .copied()
        .context("unexpected end of bytecode")
}

pub(crate) fn read_u16(code: &[u8], offset: usize) -> Result<u16> {
    let bytes = code
        .get(offset..offset + 2)
        .context("unexpected end of bytecode")?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_i16(code: &[u8], offset: usize) -> Result<i16> {
    let value = read_u16(code, offset)?;
    Ok(i16::from_be_bytes(value.to_be_bytes()))
}

fn read_i32(code: &[u8], offset: usize) -> Result<i32> {
    let bytes = code
        .get(offset..offset + 4)
        .context("unexpected end of bytecode")?;
    Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakePool;

    impl ConstantLookup for FakePool {
        fn class_name(&self, index: u16) -> Result<String> {
            Ok(format!("pkg/C{index}"))
        }

        fn member_ref(&self, index: u16) -> Result<MemberRef> {
            Ok(MemberRef {
                owner: "pkg/Owner".to_string(),
                name: format!("m{index}"),
                desc: "()V".to_string(),
                interface: index == 9,
            })
        }

        fn loadable(&self, index: u16) -> Result<Constant> {
            Ok(Constant::Int(index as i32 * 100))
        }

        fn invoke_dynamic(&self, _index: u16) -> Result<(String, String)> {
            Ok(("run".to_string(), "()Ljava/lang/Runnable;".to_string()))
        }
    }

    #[test]
    fn decodes_simple_method_with_normalized_locals() {
        // aload_0; bipush -2; istore_1; ldc #3; return
        let code = [0x2a, 0x10, 0xfe, 0x3c, 0x12, 0x03, 0xb1];
        let (insns, blocks) = decode_code(&code, &[], &[], &FakePool).expect("decode");

        assert!(blocks.is_empty());
        assert_eq!(
            insns,
            vec![
                Insn::Var {
                    opcode: opcodes::ALOAD,
                    var: 0
                },
                Insn::Int {
                    opcode: opcodes::BIPUSH,
                    operand: -2
                },
                Insn::Var {
                    opcode: opcodes::ISTORE,
                    var: 1
                },
                Insn::Ldc(Constant::Int(300)),
                Insn::Simple(opcodes::RETURN),
            ]
        );
    }

    #[test]
    fn places_labels_at_branch_targets() {
        // 0: iload_0; 1: ifeq +4 (-> 5); 4: nop; 5: return
        let code = [0x1a, 0x99, 0x00, 0x04, 0x00, 0xb1];
        let (insns, _) = decode_code(&code, &[], &[(0, 10)], &FakePool).expect("decode");

        let Insn::Jump { label, .. } = insns[3].clone() else {
            panic!("expected jump, got {:?}", insns[3]);
        };
        assert_eq!(insns[0], Insn::Label(LabelId(1)));
        assert_eq!(
            insns[1],
            Insn::LineNumber {
                line: 10,
                start: LabelId(1)
            }
        );
        assert_eq!(insns[4], Insn::Simple(opcodes::NOP));
        assert_eq!(insns[5], Insn::Label(label));
        assert_eq!(insns[6], Insn::Simple(opcodes::RETURN));
    }

    #[test]
    fn decodes_tableswitch_with_padding() {
        // 0: iload_0; 1: tableswitch pad(2) default=+23 low=0 high=1 [+23, +23]; 24: return
        let mut code = vec![0x1a, 0xaa, 0x00, 0x00];
        for value in [23i32, 0, 1, 23, 23] {
            code.extend_from_slice(&value.to_be_bytes());
        }
        code.push(0xb1);

        let (insns, _) = decode_code(&code, &[], &[], &FakePool).expect("decode");

        let Insn::TableSwitch {
            min,
            max,
            default,
            labels,
        } = &insns[1]
        else {
            panic!("expected tableswitch, got {:?}", insns[1]);
        };
        assert_eq!((*min, *max), (0, 1));
        assert_eq!(labels, &vec![*default, *default]);
        assert_eq!(insns[2], Insn::Label(*default));
    }

    #[test]
    fn converts_exception_table_to_labels() {
        // 0: nop; 1: return; 2: athrow
        let code = [0x00, 0xb1, 0xbf];
        let handlers = [RawHandler {
            start_pc: 0,
            end_pc: 1,
            handler_pc: 2,
            catch_type: Some("java/lang/Exception".to_string()),
        }];

        let (insns, blocks) = decode_code(&code, &handlers, &[], &FakePool).expect("decode");

        assert_eq!(blocks.len(), 1);
        assert_eq!(insns[0], Insn::Label(blocks[0].start));
        assert_eq!(insns[2], Insn::Label(blocks[0].end));
        assert_eq!(insns[4], Insn::Label(blocks[0].handler));
        assert_eq!(blocks[0].catch_type.as_deref(), Some("java/lang/Exception"));
    }

    #[test]
    fn decodes_wide_iinc_and_interface_invoke() {
        // wide iinc 300 -1000; invokeinterface #9 1 0; return
        let code = [0xc4, 0x84, 0x01, 0x2c, 0xfc, 0x18, 0xb9, 0x00, 0x09, 0x01, 0x00, 0xb1];
        let (insns, _) = decode_code(&code, &[], &[], &FakePool).expect("decode");

        assert_eq!(
            insns[0],
            Insn::Iinc {
                var: 300,
                incr: -1000
            }
        );
        assert!(matches!(
            &insns[1],
            Insn::Method {
                opcode: opcodes::INVOKEINTERFACE,
                interface: true,
                ..
            }
        ));
    }

    #[test]
    fn rejects_truncated_code() {
        let code = [0x11, 0x00];
        assert!(decode_code(&code, &[], &[], &FakePool).is_err());
    }

    #[test]
    fn oversized_switch_counts_fail_on_missing_entries() {
        let table = [
            0xaa, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x7f, 0xff, 0xff, 0xfe,
        ];
        assert!(decode_code(&table, &[], &[], &FakePool).is_err());

        let lookup = [0xab, 0, 0, 0, 0, 0, 0, 0, 0x7f, 0xff, 0xff, 0xff];
        assert!(decode_code(&lookup, &[], &[], &FakePool).is_err());
    }
}
