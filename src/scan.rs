use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use jclassfile::attributes::Attribute;
use jclassfile::class_file;
use jclassfile::constant_pool::ConstantPool;
use jdescriptor::MethodDescriptor;
use log::{debug, warn};
use zip::ZipArchive;

use crate::bytecode::{decode_code, ConstantLookup, MemberRef, RawHandler};
use crate::classset::ClassSet;
use crate::ir::{ClassNode, Constant, FieldNode, MethodNode};

/// Class set loaded from the input and classpath entries.
pub struct LoadedClasses {
    pub class_set: ClassSet,
    /// Editable classes read from the input.
    pub class_count: usize,
    /// Library classes read from the classpath.
    pub hidden_count: usize,
}

/// Load the input as editable classes and every classpath entry as hidden
/// library classes.
pub fn load_inputs(input: &Path, classpath: &[PathBuf]) -> Result<LoadedClasses> {
    let mut loaded = LoadedClasses {
        class_set: ClassSet::new(),
        class_count: 0,
        hidden_count: 0,
    };

    load_path(input, false, true, &mut loaded)?;

    // Keep deterministic ordering by sorting classpath entries and directory listings.
    let mut classpath_entries = classpath.to_vec();
    classpath_entries.sort_by(|a, b| path_key(a).cmp(&path_key(b)));

    for entry in classpath_entries {
        load_path(&entry, true, true, &mut loaded)?;
    }

    debug!(
        "loaded {} classes and {} library classes",
        loaded.class_count, loaded.hidden_count
    );
    Ok(loaded)
}

fn load_path(path: &Path, hidden: bool, strict: bool, loaded: &mut LoadedClasses) -> Result<()> {
    if path.is_dir() {
        load_dir(path, hidden, loaded)?;
        return Ok(());
    }

    let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    match extension {
        "class" => load_class_file(path, hidden, loaded),
        "jar" => load_jar_file(path, hidden, loaded),
        _ => {
            if strict {
                anyhow::bail!("unsupported input file: {}", path.display())
            } else {
                Ok(())
            }
        }
    }
}

fn load_dir(path: &Path, hidden: bool, loaded: &mut LoadedClasses) -> Result<()> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(path)
        .with_context(|| format!("failed to read directory {}", path.display()))?
    {
        let entry = entry.with_context(|| format!("failed to read entry under {}", path.display()))?;
        entries.push(entry.path());
    }

    entries.sort_by(|a, b| path_key(a).cmp(&path_key(b)));

    for entry in entries {
        if entry.is_dir() {
            load_dir(&entry, hidden, loaded)?;
        } else {
            load_path(&entry, hidden, false, loaded)?;
        }
    }

    Ok(())
}

fn load_class_file(path: &Path, hidden: bool, loaded: &mut LoadedClasses) -> Result<()> {
    if path.file_name().is_some_and(|name| name == "module-info.class") {
        return Ok(());
    }
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let node = parse_class(&data).with_context(|| format!("failed to parse {}", path.display()))?;
    push_class(node, hidden, loaded);
    Ok(())
}

fn load_jar_file(path: &Path, hidden: bool, loaded: &mut LoadedClasses) -> Result<()> {
    let file = fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;

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

    for name in entry_names {
        let mut entry = archive
            .by_name(&name)
            .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
        let node = parse_class(&data)
            .with_context(|| format!("failed to parse {}:{}", path.display(), name))?;
        push_class(node, hidden, loaded);
    }

    Ok(())
}

fn push_class(node: ClassNode, hidden: bool, loaded: &mut LoadedClasses) {
    if loaded.class_set.lookup(&node.name).is_some() {
        if hidden {
            // Input classes shadow library classes of the same name.
            return;
        }
        warn!("duplicate class {} replaces an earlier definition", node.name);
    }
    if hidden {
        loaded.hidden_count += 1;
    } else {
        loaded.class_count += 1;
    }
    loaded.class_set.add(node, hidden);
}

/// Parse class file bytes into a class node.
pub fn parse_class(data: &[u8]) -> Result<ClassNode> {
    let class_file = class_file::parse(data).context("failed to parse class file bytes")?;
    let constant_pool = class_file.constant_pool();
    let pool = Pool(constant_pool);

    let name = pool
        .class_name(class_file.this_class())
        .context("resolve class name")?;
    let super_name = if class_file.super_class() == 0 {
        None
    } else {
        Some(
            pool.class_name(class_file.super_class())
                .context("resolve super class name")?,
        )
    };
    let mut node = ClassNode::new(class_file.access_flags().bits(), name, super_name.as_deref());
    for interface in class_file.interfaces() {
        node.interfaces
            .push(pool.class_name(*interface).context("resolve interface name")?);
    }

    for field in class_file.fields() {
        let name = resolve_utf8(constant_pool, field.name_index()).context("resolve field name")?;
        let descriptor = resolve_utf8(constant_pool, field.descriptor_index())
            .context("resolve field descriptor")?;
        let mut field_node = FieldNode::new(field.access_flags().bits(), name, descriptor);
        for attribute in field.attributes() {
            if let Attribute::ConstantValue { constantvalue_index } = attribute {
                field_node.value = Some(
                    pool.loadable(*constantvalue_index)
                        .with_context(|| format!("resolve value of field {}", field_node.name))?,
                );
            }
        }
        node.fields.push(field_node);
    }

    for method in class_file.methods() {
        let name =
            resolve_utf8(constant_pool, method.name_index()).context("resolve method name")?;
        let descriptor = resolve_utf8(constant_pool, method.descriptor_index())
            .context("resolve method descriptor")?;
        MethodDescriptor::from_str(&descriptor)
            .with_context(|| format!("parse method descriptor of {name}{descriptor}"))?;
        let mut method_node = MethodNode::new(method.access_flags().bits(), name, descriptor);

        let code = method
            .attributes()
            .iter()
            .find_map(|attribute| match attribute {
                Attribute::Code {
                    code,
                    exception_table,
                    attributes,
                    ..
                } => Some((code, exception_table, attributes)),
                _ => None,
            });
        if let Some((code, exception_table, code_attributes)) = code {
            let mut handlers = Vec::with_capacity(exception_table.len());
            for entry in exception_table {
                let catch_type = if entry.catch_type() == 0 {
                    None
                } else {
                    Some(
                        pool.class_name(entry.catch_type())
                            .context("resolve catch type")?,
                    )
                };
                handlers.push(RawHandler {
                    start_pc: entry.start_pc(),
                    end_pc: entry.end_pc(),
                    handler_pc: entry.handler_pc(),
                    catch_type,
                });
            }
            let mut line_numbers = Vec::new();
            for attribute in code_attributes {
                if let Attribute::LineNumberTable { line_number_table } = attribute {
                    for record in line_number_table {
                        line_numbers.push((record.start_pc(), record.line_number()));
                    }
                }
            }
            let (instructions, blocks) = decode_code(code, &handlers, &line_numbers, &pool)
                .with_context(|| {
                    format!("decode bytecode of {}{}", method_node.name, method_node.desc)
                })?;
            method_node = method_node.with_body(instructions, blocks);
        }
        node.methods.push(method_node);
    }

    Ok(node)
}

/// Constant pool view used by the bytecode decoder.
struct Pool<'a>(&'a [ConstantPool]);

impl Pool<'_> {
    fn entry(&self, index: u16) -> Result<&ConstantPool> {
        self.0
            .get(index as usize)
            .with_context(|| format!("missing constant pool entry {index}"))
    }

    fn name_and_type(&self, index: u16) -> Result<(String, String)> {
        match self.entry(index)? {
            ConstantPool::NameAndType {
                name_index,
                descriptor_index,
            } => Ok((
                resolve_utf8(self.0, *name_index)?,
                resolve_utf8(self.0, *descriptor_index)?,
            )),
            _ => anyhow::bail!("unexpected name and type entry {index}"),
        }
    }
}

impl ConstantLookup for Pool<'_> {
    fn class_name(&self, index: u16) -> Result<String> {
        match self.entry(index)? {
            ConstantPool::Class { name_index } => resolve_utf8(self.0, *name_index),
            _ => anyhow::bail!("unexpected class entry {index}"),
        }
    }

    fn member_ref(&self, index: u16) -> Result<MemberRef> {
        let (class_index, name_and_type_index, interface) = match self.entry(index)? {
            ConstantPool::Fieldref {
                class_index,
                name_and_type_index,
            }
            | ConstantPool::Methodref {
                class_index,
                name_and_type_index,
            } => (*class_index, *name_and_type_index, false),
            ConstantPool::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => (*class_index, *name_and_type_index, true),
            _ => anyhow::bail!("unexpected member reference entry {index}"),
        };
        let owner = self.class_name(class_index)?;
        let (name, desc) = self.name_and_type(name_and_type_index)?;
        Ok(MemberRef {
            owner,
            name,
            desc,
            interface,
        })
    }

    fn loadable(&self, index: u16) -> Result<Constant> {
        match self.entry(index)? {
            ConstantPool::Integer { value } => Ok(Constant::Int(*value)),
            ConstantPool::Float { value } => Ok(Constant::Float(*value)),
            ConstantPool::Long { value } => Ok(Constant::Long(*value)),
            ConstantPool::Double { value } => Ok(Constant::Double(*value)),
            ConstantPool::String { string_index } => {
                Ok(Constant::String(resolve_utf8(self.0, *string_index)?))
            }
            ConstantPool::Class { name_index } => {
                Ok(Constant::Class(resolve_utf8(self.0, *name_index)?))
            }
            _ => anyhow::bail!("unsupported loadable constant {index}"),
        }
    }

    fn invoke_dynamic(&self, index: u16) -> Result<(String, String)> {
        match self.entry(index)? {
            ConstantPool::InvokeDynamic {
                name_and_type_index,
                ..
            } => self.name_and_type(*name_and_type_index),
            _ => anyhow::bail!("unexpected invokedynamic entry {index}"),
        }
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

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    use crate::ir::Insn;
    use crate::opcodes;

    /// Minimal `public class <name> { public void bar() { return; } }`.
    pub(crate) fn minimal_class(name: &str) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&0xCAFE_BABEu32.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&52u16.to_be_bytes());
        out.extend_from_slice(&8u16.to_be_bytes());
        push_utf8(&mut out, name);
        push_class_ref(&mut out, 1);
        push_utf8(&mut out, "java/lang/Object");
        push_class_ref(&mut out, 3);
        push_utf8(&mut out, "bar");
        push_utf8(&mut out, "()V");
        push_utf8(&mut out, "Code");
        out.extend_from_slice(&0x0021u16.to_be_bytes());
        out.extend_from_slice(&2u16.to_be_bytes());
        out.extend_from_slice(&4u16.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&0x0001u16.to_be_bytes());
        out.extend_from_slice(&5u16.to_be_bytes());
        out.extend_from_slice(&6u16.to_be_bytes());
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&7u16.to_be_bytes());
        out.extend_from_slice(&13u32.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&1u32.to_be_bytes());
        out.push(opcodes::RETURN);
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out
    }

    fn push_utf8(out: &mut Vec<u8>, value: &str) {
        out.push(1);
        out.extend_from_slice(&(value.len() as u16).to_be_bytes());
        out.extend_from_slice(value.as_bytes());
    }

    fn push_class_ref(out: &mut Vec<u8>, name_index: u16) {
        out.push(7);
        out.extend_from_slice(&name_index.to_be_bytes());
    }

    #[test]
    fn load_inputs_rejects_invalid_class_file() {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let class_path = temp_dir.path().join("bad.class");
        fs::write(&class_path, b"nope").expect("write test class");

        let result = load_inputs(&class_path, &[]);

        assert!(result.is_err());
    }

    #[test]
    fn parse_class_reads_members_and_code() {
        let node = parse_class(&minimal_class("pkg/Foo")).expect("parse class");

        assert_eq!(node.name, "pkg/Foo");
        assert_eq!(node.super_name.as_deref(), Some("java/lang/Object"));
        let bar = node.method("bar", "()V").expect("bar");
        assert_eq!(bar.instructions, vec![Insn::Simple(opcodes::RETURN)]);
    }

    #[test]
    fn load_inputs_marks_classpath_classes_hidden() {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let input = temp_dir.path().join("input");
        fs::create_dir_all(input.join("pkg")).expect("create input dir");
        fs::write(input.join("pkg/Foo.class"), minimal_class("pkg/Foo")).expect("write class");
        fs::write(input.join("README.txt"), b"ignored").expect("write resource");

        let jar_path = temp_dir.path().join("lib.jar");
        let file = fs::File::create(&jar_path).expect("create jar");
        let mut writer = ZipWriter::new(file);
        writer
            .start_file("lib/Base.class", SimpleFileOptions::default())
            .expect("start entry");
        writer
            .write_all(&minimal_class("lib/Base"))
            .expect("write entry");
        writer.finish().expect("finish jar");

        let loaded = load_inputs(&input, &[jar_path]).expect("load inputs");

        assert_eq!(loaded.class_count, 1);
        assert_eq!(loaded.hidden_count, 1);
        let base = loaded.class_set.by_name("lib/Base").expect("library class");
        assert!(base.is_hidden());
        let foo = loaded.class_set.by_name("pkg/Foo").expect("input class");
        assert!(!foo.is_hidden());
    }

    #[test]
    fn load_inputs_rejects_unknown_input_extension() {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let path = temp_dir.path().join("input.txt");
        fs::write(&path, b"text").expect("write input");

        let error = load_inputs(&path, &[]).err().expect("unsupported input");
        assert!(error.to_string().contains("unsupported input file"));
    }
}
