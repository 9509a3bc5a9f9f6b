//! Message protocol and framing.
//!
//! Every message is a self-delimiting binary envelope:
//!
//! ```text
//! [u32 BE: len][u8: kind][MessagePack payload of len - 1 bytes]
//! ```
//!
//! The pipe underneath provides no framing; the length prefix lets a reader
//! consume exactly one message per receive.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::config::ChannelConfig;
use crate::error::{OutprocError, Result};
use crate::value::Value;

/// Stable identifier of a hosted type, resolvable on both sides.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeDescriptor(String);

/// Stable identifier of a method on a hosted type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodDescriptor(String);

macro_rules! descriptor_impls {
    ($name:ident) => {
        impl $name {
            pub fn new(name: impl Into<String>) -> Self {
                Self(name.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(name: &str) -> Self {
                Self(name.to_string())
            }
        }

        impl From<String> for $name {
            fn from(name: String) -> Self {
                Self(name)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

descriptor_impls!(TypeDescriptor);
descriptor_impls!(MethodDescriptor);

/// Discriminator byte at the head of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Init = 1,
    Call = 2,
    Return = 3,
    Fault = 4,
    Exit = 5,
    Constructed = 6,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Init => "Init",
            MessageKind::Call => "Call",
            MessageKind::Return => "Return",
            MessageKind::Fault => "Fault",
            MessageKind::Exit => "Exit",
            MessageKind::Constructed => "Constructed",
        }
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = OutprocError;

    fn try_from(byte: u8) -> Result<Self> {
        match byte {
            1 => Ok(MessageKind::Init),
            2 => Ok(MessageKind::Call),
            3 => Ok(MessageKind::Return),
            4 => Ok(MessageKind::Fault),
            5 => Ok(MessageKind::Exit),
            6 => Ok(MessageKind::Constructed),
            other => Err(OutprocError::Codec {
                message: format!("unknown message kind {}", other),
            }),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Construct the hosted instance.
    Init {
        type_descriptor: TypeDescriptor,
        args: Vec<Value>,
    },
    /// Invoke a method on the hosted instance.
    Call {
        method: MethodDescriptor,
        args: Vec<Value>,
    },
    /// Successful reply to a `Call`.
    Return { value: Value },
    /// Failed reply to a `Call` or `Init`.
    Fault { description: String },
    /// Graceful shutdown request.
    Exit,
    /// Acknowledgment of a successful `Init`.
    Constructed,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Init { .. } => MessageKind::Init,
            Message::Call { .. } => MessageKind::Call,
            Message::Return { .. } => MessageKind::Return,
            Message::Fault { .. } => MessageKind::Fault,
            Message::Exit => MessageKind::Exit,
            Message::Constructed => MessageKind::Constructed,
        }
    }

    pub fn fault(description: impl Into<String>) -> Self {
        Message::Fault {
            description: description.into(),
        }
    }

    /// Encode into a frame body (kind byte followed by payload).
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut body = vec![self.kind() as u8];
        match self {
            Message::Init {
                type_descriptor,
                args,
            } => rmp_serde::encode::write(&mut body, &(type_descriptor, args))?,
            Message::Call { method, args } => {
                rmp_serde::encode::write(&mut body, &(method, args))?
            }
            Message::Return { value } => rmp_serde::encode::write(&mut body, value)?,
            Message::Fault { description } => rmp_serde::encode::write(&mut body, description)?,
            Message::Exit | Message::Constructed => {}
        }
        Ok(body)
    }

    /// Decode a frame body produced by [`encode`](Self::encode).
    pub fn decode(body: &[u8]) -> Result<Self> {
        let (&kind, payload) = body.split_first().ok_or_else(|| OutprocError::Codec {
            message: "empty frame".to_string(),
        })?;

        let message = match MessageKind::try_from(kind)? {
            MessageKind::Init => {
                let (type_descriptor, args): (TypeDescriptor, Vec<Value>) =
                    rmp_serde::from_slice(payload)?;
                Message::Init {
                    type_descriptor,
                    args,
                }
            }
            MessageKind::Call => {
                let (method, args): (MethodDescriptor, Vec<Value>) =
                    rmp_serde::from_slice(payload)?;
                Message::Call { method, args }
            }
            MessageKind::Return => Message::Return {
                value: rmp_serde::from_slice(payload)?,
            },
            MessageKind::Fault => Message::Fault {
                description: rmp_serde::from_slice(payload)?,
            },
            MessageKind::Exit => Message::Exit,
            MessageKind::Constructed => Message::Constructed,
        };
        Ok(message)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Init {
                type_descriptor,
                args,
            } => write!(f, "[Init: <{}> | {} args]", type_descriptor, args.len()),
            Message::Call { method, args } => {
                write!(f, "[Call: {} | {} args]", method, args.len())
            }
            Message::Return { value } => write!(f, "[Return: {}]", value.kind()),
            Message::Fault { description } => write!(f, "[Fault: {}]", description),
            Message::Exit => f.write_str("[Exit]"),
            Message::Constructed => f.write_str("[Constructed]"),
        }
    }
}

/// Read a length-prefixed frame from an async reader.
///
/// Returns `None` on clean EOF at a frame boundary (peer closed the channel).
/// EOF inside a frame is reported as `ChannelClosed`.
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; ChannelConfig::LENGTH_PREFIX_SIZE];
    // Only a close before the first prefix byte is clean.
    if reader.read(&mut len_buf[..1]).await? == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut len_buf[1..]).await?;

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > ChannelConfig::MAX_MESSAGE_SIZE {
        return Err(OutprocError::FrameTooLarge {
            size: len,
            max: ChannelConfig::MAX_MESSAGE_SIZE,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(payload))
}

/// Write a length-prefixed frame to an async writer.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > ChannelConfig::MAX_MESSAGE_SIZE {
        return Err(OutprocError::FrameTooLarge {
            size: payload.len(),
            max: ChannelConfig::MAX_MESSAGE_SIZE,
        });
    }

    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read and decode one message. `None` means the peer closed the channel.
pub async fn read_message<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Message>> {
    match read_frame(reader).await? {
        Some(body) => Message::decode(&body).map(Some),
        None => Ok(None),
    }
}

/// Encode and write one message.
pub async fn write_message<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    message: &Message,
) -> Result<()> {
    let body = message.encode()?;
    write_frame(writer, &body).await
}
