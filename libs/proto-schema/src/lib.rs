//! Resolves a gRPC method out of a `.proto` file at runtime.
//!
//! The schema is compiled with `protox` and flattened into the tagged
//! [`MethodDescriptor`] the load generator builds messages from.
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use loadgen_core::{FieldDescriptor, FieldKind, MessageShape, MethodDescriptor};
use prost_types::{
    DescriptorProto, FileDescriptorSet, MethodDescriptorProto, field_descriptor_proto::Type,
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid proto path {0:?}")]
    InvalidPath(PathBuf),
    #[error("failed to compile schema: {0}")]
    Compile(#[from] Box<protox::Error>),
    #[error("method {0} not found in any service")]
    MethodNotFound(String),
    #[error("message type {0} not found")]
    MissingType(String),
}

/// Compile `proto` and find `method` (case-insensitive) across every service.
/// The file's directory is always searched for imports, ahead of `includes`.
pub fn load_method(
    proto: &Path,
    includes: &[PathBuf],
    method: &str,
) -> Result<MethodDescriptor, SchemaError> {
    if proto.file_name().is_none() {
        return Err(SchemaError::InvalidPath(proto.to_path_buf()));
    }
    let parent = match proto.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut dirs = Vec::with_capacity(includes.len() + 1);
    dirs.push(parent);
    dirs.extend(includes.iter().cloned());

    let set = protox::compile([proto], &dirs).map_err(Box::new)?;
    debug!(proto = ?proto, files = set.file.len(), "compiled schema");
    find_method(&set, method)
}

/// look `name` up in an already compiled descriptor set
pub fn find_method(set: &FileDescriptorSet, name: &str) -> Result<MethodDescriptor, SchemaError> {
    let messages = index_messages(set);

    for file in &set.file {
        for service in &file.service {
            let Some(found) = service
                .method
                .iter()
                .find(|m| m.name().eq_ignore_ascii_case(name))
            else {
                continue;
            };
            debug!(service = service.name(), method = found.name(), "resolved method");
            return describe(file.package(), service.name(), found, &messages);
        }
    }

    Err(SchemaError::MethodNotFound(name.to_string()))
}

fn describe(
    package: &str,
    service: &str,
    method: &MethodDescriptorProto,
    messages: &HashMap<String, &DescriptorProto>,
) -> Result<MethodDescriptor, SchemaError> {
    Ok(MethodDescriptor {
        package: package.to_string(),
        service: service.to_string(),
        name: method.name().to_string(),
        input: shape(method.input_type(), messages)?,
        output: shape(method.output_type(), messages)?,
        client_streaming: method.client_streaming(),
        server_streaming: method.server_streaming(),
    })
}

fn shape(
    type_name: &str,
    messages: &HashMap<String, &DescriptorProto>,
) -> Result<MessageShape, SchemaError> {
    let name = type_name.trim_start_matches('.');
    let message = messages
        .get(name)
        .ok_or_else(|| SchemaError::MissingType(name.to_string()))?;

    let fields = message
        .field
        .iter()
        .map(|field| FieldDescriptor {
            name: field.name().to_string(),
            number: field.number() as u32,
            kind: match field.r#type() {
                Type::String => FieldKind::String,
                Type::Bytes => FieldKind::Bytes,
                _ => FieldKind::Other,
            },
        })
        .collect();

    Ok(MessageShape {
        name: name.to_string(),
        fields,
    })
}

/// every message keyed by fully qualified name, nested types included
fn index_messages(set: &FileDescriptorSet) -> HashMap<String, &DescriptorProto> {
    fn walk<'a>(
        scope: &str,
        messages: &'a [DescriptorProto],
        out: &mut HashMap<String, &'a DescriptorProto>,
    ) {
        for message in messages {
            let name = if scope.is_empty() {
                message.name().to_string()
            } else {
                format!("{scope}.{}", message.name())
            };
            walk(&name, &message.nested_type, out);
            out.insert(name, message);
        }
    }

    let mut out = HashMap::new();
    for file in &set.file {
        walk(file.package(), &file.message_type, &mut out);
    }
    out
}
