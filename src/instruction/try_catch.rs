use std::collections::BTreeMap;

use crate::check::{check_types, updated_type};
use crate::descriptor::{validate_object_type, JavaType};
use crate::error::{PatchError, Result, ValidateError};
use crate::instruction::{
    expect_params, get_label, root_class_name, validate_label, CheckContext, CreateContext, Instruction,
    InstructionHandler, LabelNames, PrintContext,
};
use crate::ir::{Insn, LabelId, TryCatchBlock};
use crate::patch::{Ident, PatchInstruction};

/// A try/catch table entry: start, end and handler labels plus the caught
/// class or `null` for any throwable. It matches the method's set of entries
/// rather than an instruction position.
pub(crate) struct TryCatch;

/// Index of the first try/catch block of the method that satisfies the
/// patch entry. Label bindings are committed to the scope only for that
/// block.
pub(crate) fn matching_block(ctx: &mut CheckContext<'_, '_>, instruction: &PatchInstruction) -> Option<usize> {
    let params = instruction.params.as_slice();
    let [start, end, handler, catch_type] = params else {
        return None;
    };
    let method = ctx.method;
    method.try_catch_blocks.iter().position(|block| {
        let Some(bindings) = bind_labels(
            ctx,
            [
                (start.as_str(), block.start),
                (end.as_str(), block.end),
                (handler.as_str(), block.handler),
            ],
        ) else {
            return false;
        };
        let type_ok = match (catch_type.as_str(), &block.catch_type) {
            ("*", _) => true,
            ("null", caught) => caught.is_none(),
            (_, None) => false,
            (param, Some(caught)) => {
                let class_set = ctx.class_set;
                check_types(
                    class_set,
                    ctx.scope(),
                    &JavaType::from_internal_name(param),
                    &JavaType::from_internal_name(caught),
                )
            }
        };
        if !type_ok {
            return false;
        }
        if let Some(scope) = ctx.scope() {
            for (name, label) in bindings {
                scope.put_label(method.id, &name, label);
            }
        }
        true
    })
}

pub(crate) fn matches_block(ctx: &mut CheckContext<'_, '_>, instruction: &PatchInstruction) -> bool {
    matching_block(ctx, instruction).is_some()
}

/// Tentatively bind weak label names, returning the new bindings when every
/// name agrees with the scope and with the other names of the entry.
fn bind_labels(ctx: &mut CheckContext<'_, '_>, labels: [(&str, LabelId); 3]) -> Option<BTreeMap<String, LabelId>> {
    let method = ctx.method.id;
    let mut local = BTreeMap::new();
    for (raw, label) in labels {
        let ident = Ident::new(raw);
        if ident.is_wildcard() {
            continue;
        }
        if !ident.is_weak() {
            return None;
        }
        let bound = ctx
            .scope()
            .and_then(|scope| scope.label(method, ident.name()))
            .or_else(|| local.get(ident.name()).copied());
        match bound {
            Some(bound) if bound != label => return None,
            Some(_) => {}
            None => {
                local.insert(ident.name().to_string(), label);
            }
        }
    }
    Some(local)
}

/// Concrete try/catch entry for an added patch entry.
pub(crate) fn create_block(ctx: &mut CreateContext<'_, '_>, instruction: &PatchInstruction) -> Result<TryCatchBlock> {
    let [start, end, handler, catch_type] = instruction.params.as_slice() else {
        return Err(PatchError::internal("Incorrect number of arguments for try-catch"));
    };
    let catch_type = if catch_type == "null" {
        None
    } else {
        let ty = JavaType::from_internal_name(catch_type);
        Some(updated_type(ctx.class_set, ctx.scope, &ty)?.internal_name())
    };
    Ok(TryCatchBlock {
        start: get_label(ctx.scope, ctx.method, start)?,
        end: get_label(ctx.scope, ctx.method, end)?,
        handler: get_label(ctx.scope, ctx.method, handler)?,
        catch_type,
    })
}

/// A method's try/catch entry in patch syntax.
pub(crate) fn print_block(labels: &mut LabelNames, block: &TryCatchBlock) -> String {
    format!(
        "try-catch {} {} {} {}",
        labels.reference(block.start),
        labels.reference(block.end),
        labels.reference(block.handler),
        block.catch_type.as_deref().unwrap_or("null")
    )
}

impl InstructionHandler for TryCatch {
    fn check(&self, ctx: &mut CheckContext<'_, '_>, instruction: &PatchInstruction, _insn: &Insn) -> bool {
        matches_block(ctx, instruction)
    }

    fn create(&self, _ctx: &mut CreateContext<'_, '_>, _instruction: &PatchInstruction) -> Result<Insn> {
        Err(PatchError::internal("try-catch entries are not instructions"))
    }

    fn print(&self, _instruction: Instruction, _ctx: &mut PrintContext<'_>, _insn: &Insn) -> Option<String> {
        None
    }

    fn validate(&self, instruction: &PatchInstruction) -> std::result::Result<(), ValidateError> {
        expect_params(instruction, 4, "try-catch")?;
        for label in &instruction.params[..3] {
            validate_label(label)?;
        }
        match instruction.params[3].as_str() {
            "null" | "*" => Ok(()),
            catch_type => validate_object_type(catch_type),
        }
    }

    fn referenced_classes(&self, instruction: &PatchInstruction) -> Vec<String> {
        match instruction.params[3].as_str() {
            "null" => Vec::new(),
            catch_type => root_class_name(&JavaType::from_internal_name(catch_type))
                .into_iter()
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classset::ClassSet;
    use crate::instruction::tests::{handler, instruction, validate_error, void_method};
    use crate::ir::MethodNode;
    use crate::scope::PatchScope;

    fn guarded() -> MethodNode {
        void_method().with_body(
            Vec::new(),
            vec![
                TryCatchBlock {
                    start: LabelId(0),
                    end: LabelId(1),
                    handler: LabelId(2),
                    catch_type: None,
                },
                TryCatchBlock {
                    start: LabelId(0),
                    end: LabelId(1),
                    handler: LabelId(3),
                    catch_type: Some("java/io/IOException".to_string()),
                },
            ],
        )
    }

    fn find(scope: &mut PatchScope<'_>, method: &MethodNode, body: &str) -> Option<usize> {
        let class_set = ClassSet::new();
        let mut ctx = CheckContext {
            class_set: &class_set,
            scope: Some(scope),
            method,
        };
        matching_block(&mut ctx, &instruction(body))
    }

    #[test]
    fn matches_entry_by_type_and_binds_labels() {
        let method = guarded();
        let mut scope = PatchScope::new();

        assert_eq!(find(&mut scope, &method, ".try-catch ~s ~e ~h java/io/IOException"), Some(1));
        assert_eq!(scope.label(method.id, "h"), Some(LabelId(3)));
        assert_eq!(find(&mut scope, &method, ".try-catch ~s ~e ~h null"), None);

        let mut fresh = PatchScope::new();
        assert_eq!(find(&mut fresh, &method, ".try-catch ~s ~e ~h null"), Some(0));
        assert_eq!(fresh.label(method.id, "h"), Some(LabelId(2)));
    }

    #[test]
    fn one_name_cannot_stand_for_two_labels() {
        let method = guarded();
        let mut scope = PatchScope::new();
        assert_eq!(find(&mut scope, &method, ".try-catch ~s ~s ~h *"), None);
        assert_eq!(scope.label(method.id, "s"), None);
    }

    #[test]
    fn added_entry_allocates_labels() {
        let class_set = ClassSet::new();
        let mut scope = PatchScope::new();
        let mut method = void_method();
        let patch = instruction("+try-catch ~s ~e ~h java/lang/Exception");
        let mut ctx = CreateContext {
            class_set: &class_set,
            scope: &mut scope,
            method: &mut method,
        };
        let block = create_block(&mut ctx, &patch).expect("block");
        assert_ne!(block.start, block.end);
        assert_eq!(block.catch_type.as_deref(), Some("java/lang/Exception"));
        assert_eq!(scope.label(method.id, "e"), Some(block.end));
    }

    #[test]
    fn prints_and_validates() {
        let mut labels = LabelNames::new();
        let printed = print_block(&mut labels, &guarded().try_catch_blocks[1]);
        assert_eq!(printed, "try-catch ~label-A ~label-B ~label-C java/io/IOException");

        assert_eq!(
            validate_error(".try-catch ~a ~b ~c").message,
            "Incorrect number of arguments for try-catch"
        );
        assert_eq!(validate_error(".try-catch a ~b ~c null").message, "Non-weak label a");
        let patch = instruction(".try-catch ~a ~b ~c ~Failure");
        assert_eq!(handler(&patch).referenced_classes(&patch), vec!["Failure"]);
    }
}
