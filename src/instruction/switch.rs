use crate::error::{PatchError, Result, ValidateError};
use crate::instruction::{
    check_or_set_label, equal_or_wild, expect_params, get_label, parse_int, validate_int,
    validate_label, CheckContext, CreateContext, Instruction, InstructionHandler, PrintContext,
};
use crate::ir::Insn;
use crate::patch::PatchInstruction;

const META_INDENT: &str = "            ";
const END_INDENT: &str = "        ";

/// `switch-table min max default`, one label per meta line.
pub(crate) struct TableSwitch;

impl InstructionHandler for TableSwitch {
    fn check(&self, ctx: &mut CheckContext<'_, '_>, instruction: &PatchInstruction, insn: &Insn) -> bool {
        let Insn::TableSwitch {
            min,
            max,
            default,
            labels,
        } = insn
        else {
            return false;
        };
        let method = ctx.method.id;
        if !equal_or_wild(&instruction.params[0], *min)
            || !equal_or_wild(&instruction.params[1], *max)
            || !check_or_set_label(ctx.scope(), method, &instruction.params[2], *default)
        {
            return false;
        }
        if labels.len() < instruction.meta.len() {
            return false;
        }
        instruction
            .meta
            .iter()
            .zip(labels)
            .all(|(name, label)| check_or_set_label(ctx.scope(), method, name, *label))
    }

    fn create(&self, ctx: &mut CreateContext<'_, '_>, instruction: &PatchInstruction) -> Result<Insn> {
        let min = parse_int(&instruction.params[0])?;
        let max = parse_int(&instruction.params[1])?;
        let default = get_label(ctx.scope, ctx.method, &instruction.params[2])?;
        let mut labels = Vec::with_capacity(instruction.meta.len());
        for name in &instruction.meta {
            labels.push(get_label(ctx.scope, ctx.method, name)?);
        }
        Ok(Insn::TableSwitch {
            min,
            max,
            default,
            labels,
        })
    }

    fn print(&self, _instruction: Instruction, ctx: &mut PrintContext<'_>, insn: &Insn) -> Option<String> {
        let Insn::TableSwitch {
            min,
            max,
            default,
            labels,
        } = insn
        else {
            return None;
        };
        let mut out = format!("switch-table {min} {max} {}", ctx.labels.reference(*default));
        for label in labels {
            out.push('\n');
            out.push_str(META_INDENT);
            out.push_str(&ctx.labels.reference(*label));
        }
        out.push('\n');
        out.push_str(END_INDENT);
        out.push_str(".end-switch-table");
        Some(out)
    }

    fn validate(&self, instruction: &PatchInstruction) -> std::result::Result<(), ValidateError> {
        expect_params(instruction, 3, "switch-table")?;
        validate_int(&instruction.params[0])?;
        validate_int(&instruction.params[1])?;
        validate_label(&instruction.params[2])?;
        instruction
            .meta
            .iter()
            .try_for_each(|label| validate_label(label))
    }

    fn requires_meta(&self) -> bool {
        true
    }
}

/// `switch-lookup default`, one `key:label` pair per meta line.
pub(crate) struct LookupSwitch;

fn split_entry(entry: &str) -> std::result::Result<(&str, &str), ValidateError> {
    entry
        .split_once(':')
        .map(|(key, label)| (key.trim(), label.trim()))
        .ok_or_else(|| ValidateError::new(format!("Invalid switch entry {entry}")))
}

impl InstructionHandler for LookupSwitch {
    fn check(&self, ctx: &mut CheckContext<'_, '_>, instruction: &PatchInstruction, insn: &Insn) -> bool {
        let Insn::LookupSwitch {
            default,
            keys,
            labels,
        } = insn
        else {
            return false;
        };
        let method = ctx.method.id;
        if !check_or_set_label(ctx.scope(), method, &instruction.params[0], *default) {
            return false;
        }
        if labels.len() < instruction.meta.len() {
            return false;
        }
        for (index, entry) in instruction.meta.iter().enumerate() {
            let Ok((key, name)) = split_entry(entry) else {
                return false;
            };
            if !equal_or_wild(key, keys[index])
                || !check_or_set_label(ctx.scope(), method, name, labels[index])
            {
                return false;
            }
        }
        true
    }

    fn create(&self, ctx: &mut CreateContext<'_, '_>, instruction: &PatchInstruction) -> Result<Insn> {
        let default = get_label(ctx.scope, ctx.method, &instruction.params[0])?;
        let mut keys = Vec::with_capacity(instruction.meta.len());
        let mut labels = Vec::with_capacity(instruction.meta.len());
        for entry in &instruction.meta {
            let (key, name) =
                split_entry(entry).map_err(|error| PatchError::internal(error.message))?;
            keys.push(parse_int(key)?);
            labels.push(get_label(ctx.scope, ctx.method, name)?);
        }
        Ok(Insn::LookupSwitch {
            default,
            keys,
            labels,
        })
    }

    fn print(&self, _instruction: Instruction, ctx: &mut PrintContext<'_>, insn: &Insn) -> Option<String> {
        let Insn::LookupSwitch {
            default,
            keys,
            labels,
        } = insn
        else {
            return None;
        };
        let mut out = format!("switch-lookup {}", ctx.labels.reference(*default));
        for (key, label) in keys.iter().zip(labels) {
            out.push('\n');
            out.push_str(META_INDENT);
            out.push_str(&format!("{key}:{}", ctx.labels.reference(*label)));
        }
        out.push('\n');
        out.push_str(END_INDENT);
        out.push_str(".end-switch-lookup");
        Some(out)
    }

    fn validate(&self, instruction: &PatchInstruction) -> std::result::Result<(), ValidateError> {
        expect_params(instruction, 1, "switch-lookup")?;
        validate_label(&instruction.params[0])?;
        for entry in &instruction.meta {
            let (key, label) = split_entry(entry)?;
            validate_label(label)?;
            validate_int(key)?;
        }
        Ok(())
    }

    fn requires_meta(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use crate::classset::ClassSet;
    use crate::instruction::tests::{create, instruction, print, validate_error, void_method};
    use crate::instruction::{CheckContext, InstructionHandler};
    use crate::ir::{Insn, LabelId};
    use crate::scope::PatchScope;

    use super::{LookupSwitch, TableSwitch};

    #[test]
    fn table_switch_binds_case_labels_in_order() {
        let class_set = ClassSet::new();
        let method = void_method();
        let mut scope = PatchScope::new();
        let switch = instruction(".switch-table 0 1 ~d\n~a\n~b\n.end-switch-table");
        let insn = Insn::TableSwitch {
            min: 0,
            max: 1,
            default: LabelId(0),
            labels: vec![LabelId(1), LabelId(2)],
        };

        let mut ctx = CheckContext {
            class_set: &class_set,
            scope: Some(&mut scope),
            method: &method,
        };
        assert!(TableSwitch.check(&mut ctx, &switch, &insn));
        assert_eq!(scope.label(method.id, "b"), Some(LabelId(2)));

        let shifted = instruction(".switch-table 1 * ~d\n.end-switch-table");
        let mut ctx = CheckContext {
            class_set: &class_set,
            scope: None,
            method: &method,
        };
        assert!(!TableSwitch.check(&mut ctx, &shifted, &insn));
    }

    #[test]
    fn lookup_switch_checks_keys() {
        let class_set = ClassSet::new();
        let method = void_method();
        let switch = instruction(".switch-lookup ~d\n10:~a\n*:~b\n.end-switch-lookup");
        let insn = Insn::LookupSwitch {
            default: LabelId(0),
            keys: vec![10, 20],
            labels: vec![LabelId(1), LabelId(2)],
        };
        let mut ctx = CheckContext {
            class_set: &class_set,
            scope: None,
            method: &method,
        };
        assert!(LookupSwitch.check(&mut ctx, &switch, &insn));

        let wrong = Insn::LookupSwitch {
            default: LabelId(0),
            keys: vec![11, 20],
            labels: vec![LabelId(1), LabelId(2)],
        };
        assert!(!LookupSwitch.check(&mut ctx, &switch, &wrong));
    }

    #[test]
    fn created_lookup_switch_reuses_labels() {
        let mut method = void_method();
        let switch = instruction("+switch-lookup ~d\n1:~a\n2:~a\n+end-switch-lookup");
        let Insn::LookupSwitch { keys, labels, .. } = create(&switch, &mut method) else {
            panic!("expected lookup switch");
        };
        assert_eq!(keys, vec![1, 2]);
        assert_eq!(labels[0], labels[1]);
    }

    #[test]
    fn printed_switch_parses_back() {
        let method = void_method();
        let insn = Insn::TableSwitch {
            min: 3,
            max: 4,
            default: LabelId(0),
            labels: vec![LabelId(1), LabelId(0)],
        };
        let printed = print(&method, &insn).expect("printed");
        assert_eq!(
            printed,
            "switch-table 3 4 ~label-A\n            ~label-B\n            ~label-A\n        .end-switch-table"
        );
        let parsed = instruction(&format!(".{printed}"));
        assert_eq!(parsed.meta, vec!["~label-B", "~label-A"]);
    }

    #[test]
    fn switch_validation() {
        assert_eq!(
            validate_error(".switch-lookup ~d\n1~a\n.end-switch-lookup").message,
            "Invalid switch entry 1~a"
        );
        assert_eq!(
            validate_error(".switch-table 0 1 ~d\nplain\n.end-switch-table").message,
            "Non-weak label plain"
        );
    }
}
