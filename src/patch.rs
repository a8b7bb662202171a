//! Patch AST and the line-based patch parser.

use std::fmt;

use log::debug;

use crate::descriptor::{JavaType, MethodType};
use crate::error::ValidateError;
use crate::instruction::Instruction;
use crate::ir::Constant;

/// A patch-level name. Weak names (`~name`) are placeholders resolved
/// against the class set; strong names must match exactly.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ident {
    name: String,
    weak: bool,
}

impl Ident {
    pub fn new(raw: &str) -> Self {
        match raw.strip_prefix('~') {
            Some(name) => Self {
                name: name.to_string(),
                weak: true,
            },
            None => Self {
                name: raw.to_string(),
                weak: false,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_weak(&self) -> bool {
        self.weak
    }

    pub fn is_wildcard(&self) -> bool {
        self.name == "*"
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.weak {
            f.write_str("~")?;
        }
        f.write_str(&self.name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Mode {
    Match,
    Add,
    Remove,
}

impl Mode {
    fn from_char(c: char) -> Option<Self> {
        match c {
            '.' => Some(Mode::Match),
            '+' => Some(Mode::Add),
            '-' => Some(Mode::Remove),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Mode::Match => '.',
            Mode::Add => '+',
            Mode::Remove => '-',
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassKind {
    Class,
    Interface,
    Enum,
}

impl ClassKind {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "class" => Some(ClassKind::Class),
            "interface" => Some(ClassKind::Interface),
            "enum" => Some(ClassKind::Enum),
            _ => None,
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            ClassKind::Class => "class",
            ClassKind::Interface => "interface",
            ClassKind::Enum => "enum",
        }
    }
}

/// A `super` or `interface` line inside a class.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassModifier {
    pub ident: Ident,
    pub mode: Mode,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PatchField {
    pub ident: Ident,
    pub desc_raw: String,
    pub desc: JavaType,
    pub mode: Mode,
    pub is_static: bool,
    pub is_private: bool,
    pub value: Option<Constant>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PatchInstruction {
    id: usize,
    pub mode: Mode,
    pub instruction: Instruction,
    pub params: Vec<String>,
    pub meta: Vec<String>,
    pub line: usize,
}

impl PatchInstruction {
    /// Key of this instruction in per-method instruction maps, unique within
    /// one parsed patch.
    pub fn id(&self) -> usize {
        self.id
    }
}

impl fmt::Display for PatchInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.mode.as_char(), self.instruction.name())?;
        for param in &self.params {
            write!(f, " {param}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PatchMethod {
    pub ident: Ident,
    pub desc_raw: String,
    pub desc: MethodType,
    pub mode: Mode,
    pub is_static: bool,
    pub is_private: bool,
    pub is_protected: bool,
    pub instructions: Vec<PatchInstruction>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PatchClass {
    pub kind: ClassKind,
    pub ident: Ident,
    pub mode: Mode,
    pub supers: Vec<ClassModifier>,
    pub interfaces: Vec<ClassModifier>,
    pub fields: Vec<PatchField>,
    pub methods: Vec<PatchMethod>,
}

/// A parsed patch: every class it declares, in source order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PatchClasses {
    pub classes: Vec<PatchClass>,
}

impl PatchClasses {
    pub fn parse(source: &str) -> Result<Self, ValidateError> {
        Parser::new(source).parse()
    }

    /// Patch class declared under `name` (without the weak marker).
    pub fn get_class(&self, name: &str) -> Option<&PatchClass> {
        self.classes.iter().find(|class| class.ident.name() == name)
    }
}

/// One patch line split into mode, lowercased name and arguments.
#[derive(Clone, Debug, PartialEq)]
struct Command {
    mode: Mode,
    name: String,
    args: Vec<String>,
}

impl Command {
    fn parse(line: &str) -> Result<Self, ValidateError> {
        let mut words = split_words(line).into_iter();
        let Some(head) = words.next() else {
            return Err(ValidateError::new("Empty command"));
        };
        let mut chars = head.chars();
        let Some(first) = chars.next() else {
            return Err(ValidateError::new("Empty command"));
        };
        let Some(mode) = Mode::from_char(first) else {
            return Err(ValidateError::new(format!("Unknown mode '{first}'")));
        };
        Ok(Command {
            mode,
            name: chars.as_str().to_lowercase(),
            args: words.map(str::to_string).collect(),
        })
    }
}

/// Whitespace-separated words of a command line. A `"`-quoted literal stays
/// in one word with its inner spacing intact.
fn split_words(line: &str) -> Vec<&str> {
    let mut words = Vec::new();
    let mut start = None;
    let mut quoted = false;
    let mut escaped = false;
    for (index, c) in line.char_indices() {
        if quoted {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => quoted = false,
                _ => {}
            }
            continue;
        }
        if c.is_whitespace() {
            if let Some(begin) = start.take() {
                words.push(&line[begin..index]);
            }
            continue;
        }
        if start.is_none() {
            start = Some(index);
        }
        if c == '"' {
            quoted = true;
        }
    }
    if let Some(begin) = start {
        words.push(&line[begin..]);
    }
    words
}

struct Parser<'a> {
    lines: std::iter::Enumerate<std::str::Lines<'a>>,
    line: usize,
    next_id: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            lines: source.lines().enumerate(),
            line: 0,
            next_id: 0,
        }
    }

    fn parse(mut self) -> Result<PatchClasses, ValidateError> {
        let mut classes = Vec::new();
        while let Some(command) = self.next_command()? {
            let line = self.line;
            let class = match ClassKind::from_name(&command.name) {
                Some(kind) => self.parse_class(kind, command),
                None => Err(ValidateError::new(format!("Unexpected {}", command.name))),
            };
            classes.push(class.map_err(|error| error.at_line(line))?);
        }
        debug!("parsed {} patch classes", classes.len());
        Ok(PatchClasses { classes })
    }

    /// Next non-blank, non-comment line, trimmed.
    fn next_line(&mut self) -> Option<&'a str> {
        for (index, line) in self.lines.by_ref() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("//") {
                continue;
            }
            self.line = index + 1;
            return Some(line);
        }
        None
    }

    fn next_command(&mut self) -> Result<Option<Command>, ValidateError> {
        match self.next_line() {
            Some(line) => Command::parse(line)
                .map(Some)
                .map_err(|error| error.at_line(self.line)),
            None => Ok(None),
        }
    }

    fn expect_command(&mut self, expected: &str) -> Result<Command, ValidateError> {
        self.next_command()?.ok_or_else(|| {
            ValidateError::new(format!("Unexpected end of patch, expected {expected}"))
                .at_line(self.line)
        })
    }

    fn parse_class(&mut self, kind: ClassKind, command: Command) -> Result<PatchClass, ValidateError> {
        if command.args.len() != 1 {
            return Err(ValidateError::new("Incorrect number of arguments for class"));
        }
        let end = format!("end-{}", kind.keyword());
        let mut class = PatchClass {
            kind,
            ident: Ident::new(&command.args[0]),
            mode: command.mode,
            supers: Vec::new(),
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        };

        loop {
            let command = self.expect_command(&end)?;
            let line = self.line;
            check_nested_mode(class.mode, command.mode, "classes").map_err(|e| e.at_line(line))?;
            match command.name.as_str() {
                "super" => {
                    let modifier = parse_modifier(&command).map_err(|e| e.at_line(line))?;
                    let matched = class.supers.iter().any(|s| s.mode != Mode::Add);
                    if modifier.mode != Mode::Add && matched {
                        return Err(ValidateError::new("Multiple super classes").at_line(line));
                    }
                    class.supers.push(modifier);
                }
                "interface" => {
                    let modifier = parse_modifier(&command).map_err(|e| e.at_line(line))?;
                    class.interfaces.push(modifier);
                }
                "method" => class.methods.push(self.parse_method(command)?),
                "field" => class
                    .fields
                    .push(parse_field(command).map_err(|e| e.at_line(line))?),
                name if name == end => break,
                name => return Err(ValidateError::new(format!("Unexpected {name}")).at_line(line)),
            }
        }
        Ok(class)
    }

    fn parse_method(&mut self, command: Command) -> Result<PatchMethod, ValidateError> {
        let line = self.line;
        if command.args.len() < 2 {
            return Err(ValidateError::new("Incorrect number of arguments for method").at_line(line));
        }
        let desc = MethodType::parse(&command.args[1]).map_err(|e| e.at_line(line))?;
        let mut method = PatchMethod {
            ident: Ident::new(&command.args[0]),
            desc_raw: command.args[1].clone(),
            desc,
            mode: command.mode,
            is_static: false,
            is_private: false,
            is_protected: false,
            instructions: Vec::new(),
        };
        for flag in &command.args[2..] {
            match flag.to_lowercase().as_str() {
                "static" => method.is_static = true,
                "private" => method.is_private = true,
                "protected" => method.is_protected = true,
                _ => return Err(ValidateError::new(format!("Unexpected {flag}")).at_line(line)),
            }
        }

        loop {
            let command = self.expect_command("end-method")?;
            let line = self.line;
            check_nested_mode(method.mode, command.mode, "methods").map_err(|e| e.at_line(line))?;
            if command.name == "end-method" {
                break;
            }
            let instruction = self.parse_instruction(command)?;
            method.instructions.push(instruction);
        }
        Ok(method)
    }

    fn parse_instruction(&mut self, command: Command) -> Result<PatchInstruction, ValidateError> {
        let line = self.line;
        let Some(instruction) = Instruction::from_name(&command.name) else {
            return Err(ValidateError::new(format!("Unknown instruction {}", command.name)).at_line(line));
        };
        let mut meta = Vec::new();
        if instruction.requires_meta() {
            let end = format!("{}end-{}", command.mode.as_char(), command.name);
            loop {
                let Some(meta_line) = self.next_line() else {
                    return Err(
                        ValidateError::new(format!("Unexpected end of patch, expected {end}"))
                            .at_line(line),
                    );
                };
                if meta_line.eq_ignore_ascii_case(&end) {
                    break;
                }
                meta.push(meta_line.to_string());
            }
        }

        let patch_instruction = PatchInstruction {
            id: self.next_id,
            mode: command.mode,
            instruction,
            params: command.args,
            meta,
            line,
        };
        self.next_id += 1;
        if let Some(handler) = instruction.handler() {
            handler
                .validate(&patch_instruction)
                .map_err(|e| e.at_line(line))?;
        }
        Ok(patch_instruction)
    }
}

fn check_nested_mode(outer: Mode, inner: Mode, what: &str) -> Result<(), ValidateError> {
    match outer {
        Mode::Add if inner != Mode::Add => Err(ValidateError::new(format!(
            "In added {what} everything must be +"
        ))),
        Mode::Remove if inner != Mode::Remove => Err(ValidateError::new(format!(
            "In removed {what} everything must be -"
        ))),
        _ => Ok(()),
    }
}

fn parse_modifier(command: &Command) -> Result<ClassModifier, ValidateError> {
    if command.args.len() != 1 {
        return Err(ValidateError::new(format!(
            "{} requires 1 parameter",
            command.name
        )));
    }
    Ok(ClassModifier {
        ident: Ident::new(&command.args[0]),
        mode: command.mode,
    })
}

fn parse_field(command: Command) -> Result<PatchField, ValidateError> {
    if command.args.len() < 2 {
        return Err(ValidateError::new("Incorrect number of arguments for field"));
    }
    let desc = JavaType::parse(&command.args[1])?;
    let mut field = PatchField {
        ident: Ident::new(&command.args[0]),
        desc_raw: command.args[1].clone(),
        desc,
        mode: command.mode,
        is_static: false,
        is_private: false,
        value: None,
    };

    let mut rest = &command.args[2..];
    while let Some(flag) = rest.first() {
        match flag.to_lowercase().as_str() {
            "static" => field.is_static = true,
            "private" => field.is_private = true,
            _ => break,
        }
        rest = &rest[1..];
    }
    if rest.first().is_some_and(|token| token == "=") {
        rest = &rest[1..];
    }
    if !rest.is_empty() {
        field.value = Some(parse_constant(&rest.join(" "), &field.desc)?);
    }
    Ok(field)
}

/// Parse a field initial value, coercing numbers to the field's type.
pub(crate) fn parse_constant(literal: &str, ty: &JavaType) -> Result<Constant, ValidateError> {
    let invalid = || ValidateError::new(format!("Invalid constant {literal}"));
    if literal.starts_with('"') {
        return unquote(literal).map(Constant::String).ok_or_else(invalid);
    }
    let constant = match ty {
        JavaType::Int | JavaType::Boolean | JavaType::Byte | JavaType::Char | JavaType::Short => {
            Constant::Int(literal.parse().map_err(|_| invalid())?)
        }
        JavaType::Long => Constant::Long(
            strip_suffix(literal, &['L', 'l'])
                .parse()
                .map_err(|_| invalid())?,
        ),
        JavaType::Float => Constant::Float(parse_float(literal).ok_or_else(invalid)?),
        JavaType::Double => Constant::Double(parse_double(literal).ok_or_else(invalid)?),
        _ => return literal_by_suffix(literal).ok_or_else(invalid),
    };
    Ok(constant)
}

fn literal_by_suffix(literal: &str) -> Option<Constant> {
    if let Some(body) = literal.strip_suffix(['L', 'l']) {
        return body.parse().ok().map(Constant::Long);
    }
    if literal.ends_with(['F', 'f']) {
        return parse_float(literal).map(Constant::Float);
    }
    if literal.ends_with(['D', 'd']) || literal.contains('.') {
        return parse_double(literal).map(Constant::Double);
    }
    literal.parse().ok().map(Constant::Int)
}

fn strip_suffix<'s>(literal: &'s str, suffixes: &[char]) -> &'s str {
    literal.strip_suffix(suffixes).unwrap_or(literal)
}

/// Float literal with an optional `F` or `D` suffix.
pub(crate) fn parse_float(literal: &str) -> Option<f32> {
    strip_suffix(literal, &['F', 'f', 'D', 'd']).parse().ok()
}

/// Double literal with an optional `D` or `F` suffix.
pub(crate) fn parse_double(literal: &str) -> Option<f64> {
    strip_suffix(literal, &['D', 'd', 'F', 'f']).parse().ok()
}

/// Render a string constant as a quoted patch literal.
pub(crate) fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

/// Inverse of [`quote`]. `None` when the literal is not a quoted string.
pub(crate) fn unquote(literal: &str) -> Option<String> {
    let body = literal.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            other => out.push(other),
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_err(source: &str) -> ValidateError {
        PatchClasses::parse(source).expect_err("patch should be rejected")
    }

    #[test]
    fn quoted_literals_keep_their_spacing() {
        assert_eq!(
            split_words(".push-string \"a  b\"  \"c \\\" d\""),
            vec![".push-string", "\"a  b\"", "\"c \\\" d\""]
        );

        let patch = PatchClasses::parse(
            ".class A\n.field s Ljava/lang/String; static = \"x   y\"\n.end-class\n",
        )
        .expect("patch");
        assert_eq!(
            patch.classes[0].fields[0].value,
            Some(Constant::String("x   y".to_string()))
        );
    }

    #[test]
    fn parses_class_with_members() {
        let source = "\
// comment
.class ~A
    .super ~B
    +interface java/lang/Runnable
    +field count I static private = 0
    .method ~m ()V static
        .push-int 5
        -push-int 5
        +push-int 10
        .return
    .end-method
.end-class
";
        let patch = PatchClasses::parse(source).expect("patch");
        let class = patch.get_class("A").expect("class");

        assert!(class.ident.is_weak());
        assert_eq!(class.kind, ClassKind::Class);
        assert_eq!(class.supers[0].ident.name(), "B");
        assert_eq!(class.interfaces[0].mode, Mode::Add);

        let field = &class.fields[0];
        assert_eq!(field.ident.name(), "count");
        assert!(field.is_static && field.is_private);
        assert_eq!(field.value, Some(Constant::Int(0)));

        let method = &class.methods[0];
        assert!(method.is_static);
        assert_eq!(method.instructions.len(), 4);
        assert_eq!(method.instructions[1].mode, Mode::Remove);
        assert_eq!(method.instructions[2].params, vec!["10".to_string()]);
        assert_eq!(method.instructions[3].line, 10);
        assert_ne!(method.instructions[0].id(), method.instructions[1].id());
    }

    #[test]
    fn reads_switch_meta_lines_until_end_marker() {
        let source = "\
.class A
.method run (I)V
.load-int 1
.switch-table 0 1 ~d
~a

~b
.END-SWITCH-TABLE
.end-method
.end-class
";
        let patch = PatchClasses::parse(source).expect("patch");
        let switch = &patch.classes[0].methods[0].instructions[1];

        assert_eq!(switch.instruction, Instruction::SwitchTable);
        assert_eq!(switch.meta, vec!["~a".to_string(), "~b".to_string()]);
    }

    #[test]
    fn rejects_unknown_mode_with_line() {
        let error = parse_err(".class A\n*method m ()V\n");
        assert_eq!(error.line, Some(2));
        assert_eq!(error.message, "Unknown mode '*'");
    }

    #[test]
    fn rejects_unexpected_top_level_command() {
        let error = parse_err("\n.method m ()V\n");
        assert_eq!(error.line, Some(2));
        assert_eq!(error.message, "Unexpected method");
    }

    #[test]
    fn added_class_requires_added_members() {
        let error = parse_err("+class A\n+field x I\n.field y I\n+end-class\n");
        assert_eq!(error.line, Some(3));
        assert_eq!(error.message, "In added classes everything must be +");

        let error = parse_err("-class A\n-method m ()V\n-nop\n.nop\n");
        assert_eq!(error.line, Some(4));
        assert_eq!(error.message, "In removed methods everything must be -");
    }

    #[test]
    fn rejects_bad_method_headers() {
        assert_eq!(
            parse_err(".class A\n.method m\n").message,
            "Incorrect number of arguments for method"
        );
        assert_eq!(
            parse_err(".class A\n.method m ()V final\n").message,
            "Unexpected final"
        );
        let error = parse_err(".class A\n.method m (I\n");
        assert_eq!(error.message, "Unexpected end of type, expected ')'");
        assert_eq!(error.line, Some(2));
    }

    #[test]
    fn instruction_errors_carry_their_line() {
        let error = parse_err(".class A\n.method m ()V\n.nop\n.push-int x\n.end-method\n.end-class\n");
        assert_eq!(error.line, Some(4));
        assert_eq!(error.message, "Invalid number x");

        let error = parse_err(".class A\n.method m ()V\n.frobnicate\n");
        assert_eq!(error.message, "Unknown instruction frobnicate");
    }

    #[test]
    fn missing_end_is_reported() {
        let error = parse_err(".class A\n.method m ()V\n.nop\n");
        assert_eq!(error.message, "Unexpected end of patch, expected end-method");
    }

    #[test]
    fn interface_and_enum_use_matching_end_lines() {
        let patch = PatchClasses::parse(".interface ~I\n.end-interface\n.enum E\n.end-enum\n")
            .expect("patch");
        assert_eq!(patch.classes[0].kind, ClassKind::Interface);
        assert_eq!(patch.classes[1].kind, ClassKind::Enum);
    }

    #[test]
    fn field_constants_follow_field_type() {
        assert_eq!(
            parse_constant("5L", &JavaType::Long).expect("long"),
            Constant::Long(5)
        );
        assert_eq!(
            parse_constant("1.5", &JavaType::Float).expect("float"),
            Constant::Float(1.5)
        );
        assert_eq!(
            parse_constant("2.0D", &JavaType::Double).expect("double"),
            Constant::Double(2.0)
        );
        let string = JavaType::Object("java/lang/String".to_string());
        assert_eq!(
            parse_constant("\"a b\"", &string).expect("string"),
            Constant::String("a b".to_string())
        );
        assert!(parse_constant("abc", &JavaType::Int).is_err());
    }

    #[test]
    fn quoting_round_trips_escapes() {
        let value = "say \"hi\"\n\\";
        assert_eq!(unquote(&quote(value)).as_deref(), Some(value));
        assert_eq!(unquote("plain"), None);
    }

    #[test]
    fn ident_strips_weak_marker() {
        let ident = Ident::new("~A");
        assert!(ident.is_weak());
        assert_eq!(ident.name(), "A");
        assert_eq!(ident.to_string(), "~A");
        assert!(Ident::new("*").is_wildcard());
    }
}
