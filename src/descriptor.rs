//! JVM type and method descriptors.
//!
//! Patch descriptors use the class-file grammar with weak class names
//! (`L~A;`) and wildcards (`L*;`) allowed inside object types, so the
//! parser here accepts any character between `L` and `;`.

use std::fmt;

use crate::error::ValidateError;

/// A JVM field or return type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum JavaType {
    Void,
    Boolean,
    Char,
    Byte,
    Short,
    Int,
    Float,
    Long,
    Double,
    Object(String),
    /// Element type (never itself an array) and dimension count.
    Array(Box<JavaType>, usize),
}

/// Coarse type category used for compatibility checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sort {
    Void,
    Boolean,
    Char,
    Byte,
    Short,
    Int,
    Float,
    Long,
    Double,
    Array,
    Object,
}

impl JavaType {
    pub fn parse(descriptor: &str) -> Result<Self, ValidateError> {
        let (ty, end) = parse_at(descriptor, 0)?;
        if end != descriptor.len() {
            return Err(ValidateError::new(format!(
                "Extra characters found '{}'",
                &descriptor[end..]
            )));
        }
        Ok(ty)
    }

    /// Type for an internal name as found in `CONSTANT_Class` entries: array
    /// descriptors stay arrays, anything else is an object type.
    pub fn from_internal_name(name: &str) -> Self {
        if name.starts_with('[') {
            if let Ok(ty) = Self::parse(name) {
                return ty;
            }
        }
        JavaType::Object(name.to_string())
    }

    pub fn sort(&self) -> Sort {
        match self {
            JavaType::Void => Sort::Void,
            JavaType::Boolean => Sort::Boolean,
            JavaType::Char => Sort::Char,
            JavaType::Byte => Sort::Byte,
            JavaType::Short => Sort::Short,
            JavaType::Int => Sort::Int,
            JavaType::Float => Sort::Float,
            JavaType::Long => Sort::Long,
            JavaType::Double => Sort::Double,
            JavaType::Object(_) => Sort::Object,
            JavaType::Array(_, _) => Sort::Array,
        }
    }

    /// Element type for arrays, the type itself otherwise.
    pub fn root(&self) -> &JavaType {
        match self {
            JavaType::Array(element, _) => element,
            other => other,
        }
    }

    pub fn class_name(&self) -> Option<&str> {
        match self {
            JavaType::Object(name) => Some(name),
            _ => None,
        }
    }

    pub fn dimensions(&self) -> usize {
        match self {
            JavaType::Array(_, dimensions) => *dimensions,
            _ => 0,
        }
    }

    pub fn descriptor(&self) -> String {
        let mut out = String::new();
        self.write_descriptor(&mut out);
        out
    }

    /// Name used by `new`, `checkcast` and friends: the class name for
    /// object types, the full descriptor otherwise.
    pub fn internal_name(&self) -> String {
        match self {
            JavaType::Object(name) => name.clone(),
            other => other.descriptor(),
        }
    }

    /// Rewrite every object class name through `map`.
    pub fn map_classes<E>(
        &self,
        map: &mut impl FnMut(&str) -> Result<String, E>,
    ) -> Result<JavaType, E> {
        Ok(match self {
            JavaType::Object(name) => JavaType::Object(map(name)?),
            JavaType::Array(element, dimensions) => {
                JavaType::Array(Box::new(element.map_classes(map)?), *dimensions)
            }
            other => other.clone(),
        })
    }

    fn write_descriptor(&self, out: &mut String) {
        match self {
            JavaType::Void => out.push('V'),
            JavaType::Boolean => out.push('Z'),
            JavaType::Char => out.push('C'),
            JavaType::Byte => out.push('B'),
            JavaType::Short => out.push('S'),
            JavaType::Int => out.push('I'),
            JavaType::Float => out.push('F'),
            JavaType::Long => out.push('J'),
            JavaType::Double => out.push('D'),
            JavaType::Object(name) => {
                out.push('L');
                out.push_str(name);
                out.push(';');
            }
            JavaType::Array(element, dimensions) => {
                for _ in 0..*dimensions {
                    out.push('[');
                }
                element.write_descriptor(out);
            }
        }
    }
}

impl fmt::Display for JavaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor())
    }
}

/// Argument and return types of a method descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodType {
    pub args: Vec<JavaType>,
    pub ret: JavaType,
}

impl MethodType {
    pub fn parse(descriptor: &str) -> Result<Self, ValidateError> {
        let mut chars = descriptor.char_indices();
        match chars.next() {
            None => {
                return Err(ValidateError::new(
                    "Unexpected end of type, expected '('",
                ));
            }
            Some((_, '(')) => {}
            Some(_) => return Err(ValidateError::new("Expected '('")),
        }

        let mut offset = 1;
        let mut args = Vec::new();
        loop {
            match descriptor[offset..].chars().next() {
                None => {
                    return Err(ValidateError::new(
                        "Unexpected end of type, expected ')'",
                    ));
                }
                Some(')') => {
                    offset += 1;
                    break;
                }
                Some(_) => {
                    let (arg, end) = parse_at(descriptor, offset)?;
                    args.push(arg);
                    offset = end;
                }
            }
        }

        if offset >= descriptor.len() {
            return Err(ValidateError::new(
                "Unexpected end of type, expected return type",
            ));
        }
        let (ret, end) = parse_at(descriptor, offset)?;
        if end != descriptor.len() {
            return Err(ValidateError::new(format!(
                "Extra characters found '{}'",
                &descriptor[end..]
            )));
        }
        Ok(MethodType { args, ret })
    }

    pub fn descriptor(&self) -> String {
        let mut out = String::from("(");
        for arg in &self.args {
            arg.write_descriptor(&mut out);
        }
        out.push(')');
        self.ret.write_descriptor(&mut out);
        out
    }

    pub fn map_classes<E>(
        &self,
        map: &mut impl FnMut(&str) -> Result<String, E>,
    ) -> Result<MethodType, E> {
        let mut args = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            args.push(arg.map_classes(map)?);
        }
        Ok(MethodType {
            args,
            ret: self.ret.map_classes(map)?,
        })
    }
}

impl fmt::Display for MethodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor())
    }
}

/// Validate a class operand, which is either an internal name or an array
/// descriptor.
pub fn validate_object_type(param: &str) -> Result<(), ValidateError> {
    if param.starts_with('[') {
        JavaType::parse(param).map(|_| ())
    } else {
        JavaType::parse(&format!("L{param};")).map(|_| ())
    }
}

fn parse_at(descriptor: &str, start: usize) -> Result<(JavaType, usize), ValidateError> {
    let rest = &descriptor[start..];
    let mut dimensions = 0;
    for (index, c) in rest.char_indices() {
        let next = start + index + c.len_utf8();
        let base = match c {
            '[' => {
                dimensions += 1;
                continue;
            }
            'L' => {
                let body = &descriptor[next..];
                let Some(end) = body.find(';') else {
                    return Err(ValidateError::new(
                        "Unexpected end of type, expected ';' (object end)",
                    ));
                };
                let ty = JavaType::Object(body[..end].to_string());
                return Ok((wrap_array(ty, dimensions), next + end + 1));
            }
            'B' => JavaType::Byte,
            'C' => JavaType::Char,
            'D' => JavaType::Double,
            'F' => JavaType::Float,
            'I' => JavaType::Int,
            'J' => JavaType::Long,
            'S' => JavaType::Short,
            'Z' => JavaType::Boolean,
            'V' => JavaType::Void,
            other => return Err(ValidateError::new(format!("Unexpected {other}"))),
        };
        return Ok((wrap_array(base, dimensions), next));
    }
    Err(ValidateError::new("Unexpected end of type"))
}

fn wrap_array(element: JavaType, dimensions: usize) -> JavaType {
    if dimensions == 0 {
        element
    } else {
        JavaType::Array(Box::new(element), dimensions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_weak_object_and_array_types() {
        assert_eq!(
            JavaType::parse("L~A;").expect("weak object"),
            JavaType::Object("~A".to_string())
        );
        let array = JavaType::parse("[[Ljava/lang/String;").expect("array");
        assert_eq!(array.dimensions(), 2);
        assert_eq!(array.root().class_name(), Some("java/lang/String"));
        assert_eq!(array.descriptor(), "[[Ljava/lang/String;");
    }

    #[test]
    fn reports_grammar_errors() {
        let error = JavaType::parse("IJ").expect_err("extra characters");
        assert_eq!(error.message, "Extra characters found 'J'");

        let error = JavaType::parse("Ljava/lang/Object").expect_err("unterminated");
        assert_eq!(
            error.message,
            "Unexpected end of type, expected ';' (object end)"
        );

        let error = JavaType::parse("Q").expect_err("bad char");
        assert_eq!(error.message, "Unexpected Q");
    }

    #[test]
    fn parses_method_descriptors() {
        let method = MethodType::parse("(I[JL~A;)V").expect("method");
        assert_eq!(method.args.len(), 3);
        assert_eq!(method.args[2], JavaType::Object("~A".to_string()));
        assert_eq!(method.ret, JavaType::Void);
        assert_eq!(method.descriptor(), "(I[JL~A;)V");
    }

    #[test]
    fn reports_method_grammar_errors() {
        let cases = [
            ("", "Unexpected end of type, expected '('"),
            ("I)V", "Expected '('"),
            ("(I", "Unexpected end of type, expected ')'"),
            ("(I)", "Unexpected end of type, expected return type"),
            ("()VV", "Extra characters found 'V'"),
        ];
        for (descriptor, message) in cases {
            let error = MethodType::parse(descriptor).expect_err(descriptor);
            assert_eq!(error.message, message, "{descriptor}");
        }
    }

    #[test]
    fn internal_names_keep_array_descriptors() {
        assert_eq!(
            JavaType::from_internal_name("[I"),
            JavaType::Array(Box::new(JavaType::Int), 1)
        );
        assert_eq!(
            JavaType::from_internal_name("java/util/List"),
            JavaType::Object("java/util/List".to_string())
        );
        assert!(validate_object_type("~A").is_ok());
        assert!(validate_object_type("[Q").is_err());
    }

    #[test]
    fn maps_class_names_recursively() {
        let method = MethodType::parse("([L~A;I)L~B;").expect("method");
        let mapped = method
            .map_classes(&mut |name: &str| -> Result<String, ()> {
                Ok(name.trim_start_matches('~').to_lowercase())
            })
            .expect("map");
        assert_eq!(mapped.descriptor(), "([La;I)Lb;");
    }
}
