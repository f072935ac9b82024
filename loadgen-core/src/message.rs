//! Protobuf messages built and read at runtime.
//!
//! [`DynamicMessage`] encodes the `string`/`bytes` fields of a
//! [`MessageShape`] by field number; everything else stays at its zero value
//! and is therefore absent on the wire. [`RawMessage`] is the reply side: the
//! engine only counts replies, so decoding skips every field.
use std::{collections::BTreeMap, sync::Arc};

use bytes::{Buf, BufMut, Bytes};
use prost::{
    DecodeError, Message,
    encoding::{self, DecodeContext, WireType},
};

use crate::descriptor::{FieldKind, MessageShape};
use crate::payload::PayloadError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    String(String),
    Bytes(Bytes),
}

impl Value {
    const fn kind(&self) -> FieldKind {
        match self {
            Self::String(_) => FieldKind::String,
            Self::Bytes(_) => FieldKind::Bytes,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DynamicMessage {
    shape: Arc<MessageShape>,
    values: BTreeMap<u32, Value>,
}

impl DynamicMessage {
    pub fn new(shape: Arc<MessageShape>) -> Self {
        Self {
            shape,
            values: BTreeMap::new(),
        }
    }

    /// set a declared field; the value must match the field's kind
    pub fn set_field_by_name(&mut self, name: &str, value: Value) -> Result<(), PayloadError> {
        let field = self
            .shape
            .field(name)
            .ok_or_else(|| PayloadError::UnknownField {
                message: self.shape.name.clone(),
                field: name.to_string(),
            })?;
        if field.kind != value.kind() {
            return Err(PayloadError::KindMismatch {
                field: name.to_string(),
                expected: field.kind,
                found: value.kind(),
            });
        }
        self.values.insert(field.number, value);
        Ok(())
    }

    pub fn get_field_by_name(&self, name: &str) -> Option<&Value> {
        let field = self.shape.field(name)?;
        self.values.get(&field.number)
    }

    /// field values keyed by number, for builders that already resolved the shape
    pub(crate) fn values_mut(&mut self) -> &mut BTreeMap<u32, Value> {
        &mut self.values
    }
}

impl Message for DynamicMessage {
    fn encode_raw(&self, buf: &mut impl BufMut) {
        for (number, value) in &self.values {
            match value {
                Value::String(value) => encoding::string::encode(*number, value, buf),
                Value::Bytes(value) => encoding::bytes::encode(*number, value, buf),
            }
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: WireType,
        buf: &mut impl Buf,
        ctx: DecodeContext,
    ) -> Result<(), DecodeError> {
        let kind = self
            .shape
            .fields
            .iter()
            .find(|field| field.number == tag)
            .map(|field| field.kind);
        match kind {
            Some(FieldKind::String) => {
                let mut value = String::new();
                encoding::string::merge(wire_type, &mut value, buf, ctx)?;
                self.values.insert(tag, Value::String(value));
            }
            Some(FieldKind::Bytes) => {
                let mut value = Bytes::new();
                encoding::bytes::merge(wire_type, &mut value, buf, ctx)?;
                self.values.insert(tag, Value::Bytes(value));
            }
            _ => encoding::skip_field(wire_type, tag, buf, ctx)?,
        }
        Ok(())
    }

    fn encoded_len(&self) -> usize {
        self.values
            .iter()
            .map(|(number, value)| match value {
                Value::String(value) => encoding::string::encoded_len(*number, value),
                Value::Bytes(value) => encoding::bytes::encoded_len(*number, value),
            })
            .sum()
    }

    fn clear(&mut self) {
        self.values.clear();
    }
}

/// A reply whose content is not inspected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawMessage {
    /// number of top-level fields present in the reply
    pub fields: usize,
}

impl Message for RawMessage {
    fn encode_raw(&self, _buf: &mut impl BufMut) {}

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: WireType,
        buf: &mut impl Buf,
        ctx: DecodeContext,
    ) -> Result<(), DecodeError> {
        self.fields += 1;
        encoding::skip_field(wire_type, tag, buf, ctx)
    }

    fn encoded_len(&self) -> usize {
        0
    }

    fn clear(&mut self) {
        self.fields = 0;
    }
}
