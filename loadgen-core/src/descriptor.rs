//! Runtime description of a gRPC method. The target schema is only known once
//! a descriptor is loaded, so messages are described by tagged field lists
//! rather than generated types.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Bytes,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub number: u32,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageShape {
    /// fully qualified name without the leading dot, ex. `chat.MessageRequest`
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
}

impl MessageShape {
    pub fn fields_of(&self, kind: FieldKind) -> impl Iterator<Item = &FieldDescriptor> + '_ {
        self.fields.iter().filter(move |field| field.kind == kind)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub package: String,
    pub service: String,
    pub name: String,
    pub input: MessageShape,
    pub output: MessageShape,
    pub client_streaming: bool,
    pub server_streaming: bool,
}

impl MethodDescriptor {
    /// HTTP/2 path of the method, `/{package}.{Service}/{Method}`
    pub fn full_path(&self) -> String {
        if self.package.is_empty() {
            format!("/{}/{}", self.service, self.name)
        } else {
            format!("/{}.{}/{}", self.package, self.service, self.name)
        }
    }
}
