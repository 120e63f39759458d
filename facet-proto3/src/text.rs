//! Renders compiled schemas as `.proto` text.

use std::collections::{HashSet, VecDeque};
use std::fmt::Write as _;
use std::sync::Arc;

use facet_core::ConstTypeId;

use crate::custom::CustomStyle;
use crate::descriptor::{Element, FieldDescriptor, Schema};

/// One `message` block for `schema`, named `name`.
pub(crate) fn render_message(out: &mut String, name: &str, schema: &Schema) {
    let _ = writeln!(out, "message {name} {{");
    for field in schema.fields() {
        let _ = writeln!(
            out,
            "  {} {} = {};",
            field.proto_type(),
            field.name(),
            field.tag()
        );
    }
    out.push_str("}\n");
}

/// A complete `.proto` file: the syntax line, imports for well-known types,
/// then every record reachable from `root`, breadth-first in field order.
pub(crate) fn render_file(root: &Arc<Schema>) -> String {
    let mut imports: Vec<&'static str> = Vec::new();
    let mut blocks: Vec<String> = Vec::new();
    let mut seen: HashSet<ConstTypeId> = HashSet::new();
    let mut queue: VecDeque<(String, Arc<Schema>)> = VecDeque::new();

    seen.insert(root.shape().id);
    queue.push_back((root.message_name().to_string(), root.clone()));

    while let Some((name, schema)) = queue.pop_front() {
        if let Some(which) = schema.well_known {
            if !imports.contains(&which.import_path()) {
                imports.push(which.import_path());
            }
            continue;
        }

        let mut block = String::new();
        render_message(&mut block, &name, &schema);
        blocks.push(block);

        for field in schema.fields() {
            if let Some(comment) = custom_comment(field, &mut seen) {
                blocks.push(comment);
                continue;
            }
            let Some(message) = field.message() else {
                continue;
            };
            let Some(nested) = message.schema.upgrade() else {
                continue;
            };
            if seen.insert(nested.shape().id) {
                queue.push_back((nested_name(field), nested));
            }
        }
    }

    let mut out = String::from("syntax = \"proto3\";\n");
    if !imports.is_empty() {
        out.push('\n');
        for path in imports {
            let _ = writeln!(out, "import \"{path}\";");
        }
    }
    for block in blocks {
        out.push('\n');
        out.push_str(&block);
    }
    out
}

/// The message name a field refers to, without `repeated` or the map wrapper.
fn nested_name(field: &FieldDescriptor) -> String {
    let ty = match &field.element {
        Element::MapEntry(entry) => entry.val.proto_type(),
        _ => field.proto_type(),
    };
    ty.trim_start_matches("repeated ").to_string()
}

fn custom_comment(field: &FieldDescriptor, seen: &mut HashSet<ConstTypeId>) -> Option<String> {
    let codec = match &field.element {
        Element::Custom(codec) => codec,
        Element::MapEntry(entry) => match &entry.val.element {
            Element::Custom(codec) => codec,
            _ => return None,
        },
        _ => return None,
    };
    if !seen.insert(codec.shape.id) {
        return None;
    }
    let via = match codec.style {
        CustomStyle::Marshal(_) => "Marshaler",
        CustomStyle::Append(_) => "Appender",
    };
    Some(format!(
        "// {} is encoded by its own {via}\n",
        codec.type_name()
    ))
}
