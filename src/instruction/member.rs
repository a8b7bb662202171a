use crate::check::{check_types, resolve_class_name, updated_method_type, updated_type};
use crate::classset::{ClassId, ClassSet};
use crate::descriptor::{JavaType, MethodType};
use crate::error::{PatchError, Result, ValidateError};
use crate::instruction::{
    expect_params, root_class_name, CheckContext, CreateContext, Instruction, InstructionHandler,
    MemberReference, PrintContext,
};
use crate::ir::Insn;
use crate::opcodes;
use crate::patch::{Ident, PatchInstruction};
use crate::scope::PatchScope;

#[derive(Clone, Copy)]
enum Member {
    Method,
    Field,
}

impl Member {
    fn bound(self, scope: &PatchScope<'_>, class_set: &ClassSet, owner: ClassId, name: &str, desc: &str) -> Option<String> {
        match self {
            Member::Method => scope
                .get_method(class_set, owner, name, desc)
                .map(|method| class_set.method(method).name.clone()),
            Member::Field => scope
                .get_field(class_set, owner, name, desc)
                .map(|field| class_set.field(field).name.clone()),
        }
    }

    /// Bind the concrete member `name desc` of `owner` to the patch name.
    fn bind(
        self,
        scope: &mut PatchScope<'_>,
        class_set: &ClassSet,
        owner: ClassId,
        (name, desc): (&str, &str),
        (patch_name, patch_desc): (&str, &str),
    ) -> bool {
        match self {
            Member::Method => match class_set.find_method(owner, name, desc) {
                Some(method) => {
                    scope.put_method(method, patch_name, patch_desc);
                    true
                }
                None => false,
            },
            Member::Field => match class_set.find_field(owner, name, desc) {
                Some(field) => {
                    scope.put_field(field, patch_name, patch_desc);
                    true
                }
                None => false,
            },
        }
    }
}

/// Check the owner and member name of a member instruction. Weak names bind
/// to the concrete owner and member on first use.
fn check_member(
    ctx: &mut CheckContext<'_, '_>,
    member: Member,
    params: &[String],
    (owner, name, desc): (&str, &str, &str),
) -> bool {
    let class_set = ctx.class_set;
    let owner_ident = Ident::new(&params[0]);
    if !owner_ident.is_wildcard() && (ctx.scope.is_some() || !owner_ident.is_weak()) {
        let expected = if owner_ident.is_weak() {
            let Some(scope) = ctx.scope() else {
                return false;
            };
            match scope.get_class(owner_ident.name()) {
                Some(bound) => class_set.name(bound).to_string(),
                None => {
                    let Some(class) = class_set.lookup(owner) else {
                        return false;
                    };
                    scope.put_class(owner_ident.name(), class);
                    owner.to_string()
                }
            }
        } else {
            owner_ident.name().to_string()
        };
        if expected != owner {
            return false;
        }
    }

    let name_ident = Ident::new(&params[1]);
    if !name_ident.is_wildcard() && (ctx.scope.is_some() || !name_ident.is_weak()) {
        let expected = if name_ident.is_weak() {
            let Some(class) = class_set.lookup(owner) else {
                return false;
            };
            let Some(scope) = ctx.scope() else {
                return false;
            };
            match member.bound(scope, class_set, class, name_ident.name(), &params[2]) {
                Some(bound) => bound,
                None => {
                    if !member.bind(scope, class_set, class, (name, desc), (name_ident.name(), &params[2])) {
                        return false;
                    }
                    name.to_string()
                }
            }
        } else {
            name_ident.name().to_string()
        };
        if expected != name {
            return false;
        }
    }
    true
}

/// Concrete owner and member name for an added member instruction.
fn created_member(ctx: &mut CreateContext<'_, '_>, member: Member, params: &[String]) -> Result<(String, String)> {
    let owner = resolve_class_name(ctx.class_set, ctx.scope, &params[0])?;
    let name_ident = Ident::new(&params[1]);
    if !name_ident.is_weak() {
        return Ok((owner, name_ident.name().to_string()));
    }
    let class = ctx
        .class_set
        .lookup(&owner)
        .ok_or_else(|| PatchError::internal(format!("Missing class {owner}")))?;
    let name = member
        .bound(ctx.scope, ctx.class_set, class, name_ident.name(), &params[2])
        .ok_or_else(|| PatchError::internal(format!("Unbound member {owner}.{}", params[1])))?;
    Ok((owner, name))
}

fn member_reference(params: &[String]) -> Option<MemberReference> {
    let owner = Ident::new(&params[0]);
    let name = Ident::new(&params[1]);
    if owner.is_wildcard() || name.is_wildcard() {
        return None;
    }
    Some(MemberReference {
        owner: owner.name().to_string(),
        name: name.name().to_string(),
        desc: params[2].clone(),
    })
}

fn owner_class(params: &[String]) -> Option<String> {
    let owner = Ident::new(&params[0]);
    (!owner.is_wildcard()).then(|| owner.name().to_string())
}

/// `get-static`, `put-static`, `get-field` and `put-field`: owner, name,
/// field descriptor.
pub(crate) struct FieldAccess(pub(crate) u8);

impl InstructionHandler for FieldAccess {
    fn check(&self, ctx: &mut CheckContext<'_, '_>, instruction: &PatchInstruction, insn: &Insn) -> bool {
        let Insn::Field {
            opcode,
            owner,
            name,
            desc,
        } = insn
        else {
            return false;
        };
        if *opcode != self.0 {
            return false;
        }
        if !check_member(ctx, Member::Field, &instruction.params, (owner, name, desc)) {
            return false;
        }
        let (Ok(expected), Ok(actual)) = (JavaType::parse(&instruction.params[2]), JavaType::parse(desc)) else {
            return false;
        };
        let class_set = ctx.class_set;
        check_types(class_set, ctx.scope(), &expected, &actual)
    }

    fn create(&self, ctx: &mut CreateContext<'_, '_>, instruction: &PatchInstruction) -> Result<Insn> {
        let (owner, name) = created_member(ctx, Member::Field, &instruction.params)?;
        let desc = JavaType::parse(&instruction.params[2])?;
        Ok(Insn::Field {
            opcode: self.0,
            owner,
            name,
            desc: updated_type(ctx.class_set, ctx.scope, &desc)?.descriptor(),
        })
    }

    fn print(&self, instruction: Instruction, _ctx: &mut PrintContext<'_>, insn: &Insn) -> Option<String> {
        match insn {
            Insn::Field {
                opcode,
                owner,
                name,
                desc,
            } if *opcode == self.0 => Some(format!("{} {owner} {name} {desc}", instruction.name())),
            _ => None,
        }
    }

    fn validate(&self, instruction: &PatchInstruction) -> std::result::Result<(), ValidateError> {
        expect_params(instruction, 3, "field instruction")?;
        JavaType::parse(&instruction.params[2]).map(|_| ())
    }

    fn referenced_classes(&self, instruction: &PatchInstruction) -> Vec<String> {
        let mut classes: Vec<String> = owner_class(&instruction.params).into_iter().collect();
        if let Ok(desc) = JavaType::parse(&instruction.params[2]) {
            classes.extend(root_class_name(&desc));
        }
        classes
    }

    fn referenced_fields(&self, instruction: &PatchInstruction) -> Vec<MemberReference> {
        member_reference(&instruction.params).into_iter().collect()
    }
}

/// The four `invoke-*` instructions: owner, name, method descriptor.
pub(crate) struct Invoke(pub(crate) u8);

impl InstructionHandler for Invoke {
    fn check(&self, ctx: &mut CheckContext<'_, '_>, instruction: &PatchInstruction, insn: &Insn) -> bool {
        let Insn::Method {
            opcode,
            owner,
            name,
            desc,
            ..
        } = insn
        else {
            return false;
        };
        if *opcode != self.0 {
            return false;
        }
        if !check_member(ctx, Member::Method, &instruction.params, (owner, name, desc)) {
            return false;
        }
        let (Ok(expected), Ok(actual)) = (MethodType::parse(&instruction.params[2]), MethodType::parse(desc)) else {
            return false;
        };
        if expected.args.len() != actual.args.len() {
            return false;
        }
        let class_set = ctx.class_set;
        expected
            .args
            .iter()
            .zip(&actual.args)
            .chain(std::iter::once((&expected.ret, &actual.ret)))
            .all(|(expected, actual)| check_types(class_set, ctx.scope(), expected, actual))
    }

    fn create(&self, ctx: &mut CreateContext<'_, '_>, instruction: &PatchInstruction) -> Result<Insn> {
        let (owner, name) = created_member(ctx, Member::Method, &instruction.params)?;
        let desc = MethodType::parse(&instruction.params[2])?;
        Ok(Insn::Method {
            opcode: self.0,
            owner,
            name,
            desc: updated_method_type(ctx.class_set, ctx.scope, &desc)?.descriptor(),
            interface: self.0 == opcodes::INVOKEINTERFACE,
        })
    }

    fn print(&self, instruction: Instruction, _ctx: &mut PrintContext<'_>, insn: &Insn) -> Option<String> {
        match insn {
            Insn::Method {
                opcode,
                owner,
                name,
                desc,
                ..
            } if *opcode == self.0 => Some(format!("{} {owner} {name} {desc}", instruction.name())),
            _ => None,
        }
    }

    fn validate(&self, instruction: &PatchInstruction) -> std::result::Result<(), ValidateError> {
        expect_params(instruction, 3, "invoke instruction")?;
        MethodType::parse(&instruction.params[2]).map(|_| ())
    }

    fn referenced_classes(&self, instruction: &PatchInstruction) -> Vec<String> {
        let mut classes: Vec<String> = owner_class(&instruction.params).into_iter().collect();
        if let Ok(desc) = MethodType::parse(&instruction.params[2]) {
            classes.extend(desc.args.iter().chain(std::iter::once(&desc.ret)).filter_map(root_class_name));
        }
        classes
    }

    fn referenced_methods(&self, instruction: &PatchInstruction) -> Vec<MemberReference> {
        member_reference(&instruction.params).into_iter().collect()
    }
}
