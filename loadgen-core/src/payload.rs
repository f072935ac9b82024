//! Per-trial request payloads
use std::{io, path::PathBuf, pin::Pin, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use rand::{Rng, SeedableRng, rngs::StdRng};
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::descriptor::{FieldDescriptor, FieldKind, MessageShape, MethodDescriptor};
use crate::message::{DynamicMessage, Value};

/// alphabet used for generated string fields
const RAND_ALPHABET: &[u8] = b"0123";
/// length of generated string fields
const RAND_LEN: usize = 2;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("message `{message}` has no field `{field}`")]
    UnknownField { message: String, field: String },
    #[error("field `{field}` is {expected:?}, got a {found:?} value")]
    KindMismatch {
        field: String,
        expected: FieldKind,
        found: FieldKind,
    },
    #[error("message `{0}` has no bytes field to carry upload chunks")]
    NoBytesField(String),
}

/// Builds the payloads one trial sends
pub trait PayloadBuilder: Send + Sync + 'static {
    type Payload: Send + 'static;

    /// the single request of a unary or server-stream trial
    fn request(&self, trial: usize) -> Self::Payload;

    /// one upload chunk of a client-stream trial
    fn chunk(&self, chunk: Bytes) -> Self::Payload;
}

/// HTTP body loaded once and reused verbatim by every trial
#[derive(Debug, Clone, Default)]
pub struct HttpBody {
    body: Bytes,
}

impl HttpBody {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self { body: body.into() }
    }
}

impl PayloadBuilder for HttpBody {
    type Payload = Bytes;

    fn request(&self, _trial: usize) -> Bytes {
        self.body.clone()
    }

    fn chunk(&self, chunk: Bytes) -> Bytes {
        chunk
    }
}

/// Populates gRPC input messages from a method descriptor.
///
/// Every `string` field gets a short random value. The random source is
/// owned by the builder: trial `i` draws from a generator seeded with
/// `(seed, i)`, so a fixed seed reproduces a run exactly.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    input: Arc<MessageShape>,
    seed: u64,
    upload_field: Option<FieldDescriptor>,
}

impl MessageBuilder {
    pub fn new(method: &MethodDescriptor, seed: u64) -> Self {
        Self {
            input: Arc::new(method.input.clone()),
            seed,
            upload_field: None,
        }
    }

    /// builder for client-stream uploads, requires a `bytes` field in the input
    pub fn for_upload(method: &MethodDescriptor, seed: u64) -> Result<Self, PayloadError> {
        let upload_field = method
            .input
            .fields_of(FieldKind::Bytes)
            .next()
            .cloned()
            .ok_or_else(|| PayloadError::NoBytesField(method.input.name.clone()))?;
        Ok(Self {
            upload_field: Some(upload_field),
            ..Self::new(method, seed)
        })
    }

    pub fn upload_field(&self) -> Option<&FieldDescriptor> {
        self.upload_field.as_ref()
    }

    fn rng_for(&self, trial: usize) -> StdRng {
        let mixed = (trial as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ self.seed.rotate_left(17);
        StdRng::seed_from_u64(mixed)
    }
}

impl PayloadBuilder for MessageBuilder {
    type Payload = DynamicMessage;

    fn request(&self, trial: usize) -> DynamicMessage {
        let mut rng = self.rng_for(trial);
        let mut msg = DynamicMessage::new(Arc::clone(&self.input));
        for field in self.input.fields_of(FieldKind::String) {
            msg.values_mut()
                .insert(field.number, Value::String(rand_string(&mut rng, RAND_LEN)));
        }
        msg
    }

    fn chunk(&self, chunk: Bytes) -> DynamicMessage {
        let mut msg = DynamicMessage::new(Arc::clone(&self.input));
        if let Some(field) = &self.upload_field {
            msg.values_mut().insert(field.number, Value::Bytes(chunk));
        }
        msg
    }
}

fn rand_string(rng: &mut impl Rng, len: usize) -> String {
    (0..len)
        .map(|_| RAND_ALPHABET[rng.gen_range(0..RAND_ALPHABET.len())] as char)
        .collect()
}

pub type UploadReader = Pin<Box<dyn AsyncRead + Send>>;

/// Byte source a client-stream trial uploads, opened once per trial
#[async_trait]
pub trait UploadSource: Send + Sync + 'static {
    async fn open(&self) -> io::Result<UploadReader>;
}

/// upload a file from disk
#[async_trait]
impl UploadSource for PathBuf {
    async fn open(&self) -> io::Result<UploadReader> {
        let file = tokio::fs::File::open(self).await?;
        Ok(Box::pin(file))
    }
}

/// upload an in-memory buffer
#[async_trait]
impl UploadSource for Bytes {
    async fn open(&self) -> io::Result<UploadReader> {
        Ok(Box::pin(io::Cursor::new(self.clone())))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::{HttpBody, MessageBuilder, PayloadBuilder, PayloadError};
    use crate::descriptor::{FieldDescriptor, FieldKind, MessageShape, MethodDescriptor};
    use crate::message::Value;

    fn field(name: &str, number: u32, kind: FieldKind) -> FieldDescriptor {
        FieldDescriptor {
            name: name.to_string(),
            number,
            kind,
        }
    }

    fn method(fields: Vec<FieldDescriptor>) -> MethodDescriptor {
        MethodDescriptor {
            package: "chat".to_string(),
            service: "ChatService".to_string(),
            name: "SendMessage".to_string(),
            input: MessageShape {
                name: "chat.MessageRequest".to_string(),
                fields,
            },
            output: MessageShape::default(),
            client_streaming: false,
            server_streaming: false,
        }
    }

    #[test]
    fn fills_only_string_fields() {
        let method = method(vec![
            field("user_id", 1, FieldKind::String),
            field("message", 2, FieldKind::String),
            field("timestamp", 3, FieldKind::Other),
            field("attachment", 4, FieldKind::Bytes),
        ]);
        let builder = MessageBuilder::new(&method, 7);
        let msg = builder.request(0);

        for name in ["user_id", "message"] {
            match msg.get_field_by_name(name) {
                Some(Value::String(value)) => {
                    assert_eq!(value.len(), 2);
                    assert!(value.chars().all(|c| ('0'..='3').contains(&c)));
                }
                other => panic!("expected string for {name}, got {other:?}"),
            }
        }
        assert!(msg.get_field_by_name("timestamp").is_none());
        assert!(msg.get_field_by_name("attachment").is_none());
    }

    #[test]
    fn deterministic_for_same_seed() {
        let method = method(vec![
            field("a", 1, FieldKind::String),
            field("b", 2, FieldKind::String),
            field("c", 3, FieldKind::String),
        ]);
        let builder_a = MessageBuilder::new(&method, 42);
        let builder_b = MessageBuilder::new(&method, 42);

        for trial in 0..16 {
            let msg_a = builder_a.request(trial);
            let msg_b = builder_b.request(trial);
            for name in ["a", "b", "c"] {
                assert_eq!(msg_a.get_field_by_name(name), msg_b.get_field_by_name(name));
            }
        }
    }

    #[test]
    fn schema_without_strings_builds_empty_message() {
        let method = method(vec![field("count", 1, FieldKind::Other)]);
        let msg = MessageBuilder::new(&method, 1).request(3);
        assert!(msg.get_field_by_name("count").is_none());
    }

    #[test]
    fn upload_requires_bytes_field() {
        let method = method(vec![field("name", 1, FieldKind::String)]);
        let err = MessageBuilder::for_upload(&method, 1).expect_err("no bytes field");
        assert!(matches!(err, PayloadError::NoBytesField(_)));
    }

    #[test]
    fn upload_chunk_lands_in_bytes_field() {
        let method = method(vec![
            field("name", 1, FieldKind::String),
            field("chunk", 2, FieldKind::Bytes),
        ]);
        let builder = MessageBuilder::for_upload(&method, 1).expect("bytes field");
        assert_eq!(builder.upload_field().map(|f| f.number), Some(2));

        let msg = builder.chunk(Bytes::from_static(b"abc"));
        assert_eq!(
            msg.get_field_by_name("chunk"),
            Some(&Value::Bytes(Bytes::from_static(b"abc")))
        );
        assert!(msg.get_field_by_name("name").is_none());
    }

    #[test]
    fn http_body_is_reused_verbatim() {
        let body = HttpBody::new(r#"{"message":"hi"}"#);
        assert_eq!(body.request(0), body.request(99));
        assert_eq!(&body.request(0)[..], br#"{"message":"hi"}"#);
    }
}
