use std::{borrow::Cow, io};

use crate::{Deserialize, EncodedUpdate, PeerId, Serialize};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const ERR_KIND: Header = 0;
const CONTROL_KIND: Header = 1;
const UPDATE_KIND: Header = 2;

/// The size of the fixed fields of an update after the kind header.
const UPDATE_FIELDS_SIZE: usize = 3 * size_of::<u64>() + 3 * size_of::<u32>();

/// The size of a single entry on the wire: index, magnitude and sign.
const ENTRY_SIZE: usize = size_of::<u32>() + size_of::<f32>() + size_of::<i8>();

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug)]
pub enum Payload<'a> {
    Update {
        sender: PeerId,
        update: Cow<'a, EncodedUpdate>,
    },
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Connect { peer: PeerId },
    Disconnect,
}

/// The application layer message for the entire system.
#[derive(Debug)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    fn invalid_data<T>(detail: String) -> io::Result<T> {
        Err(io::Error::new(io::ErrorKind::InvalidData, detail))
    }

    fn buf_is_too_small<T>(size: usize, needed: usize) -> io::Result<T> {
        Self::invalid_data(format!(
            "The given buffer is too small {size}, must at least be {needed} bytes"
        ))
    }

    /// A short name for the kind of this message, used for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(Command::Connect { .. }) => "control/connect",
            Msg::Control(Command::Disconnect) => "control/disconnect",
            Msg::Data(Payload::Update { .. }) => "data/update",
            Msg::Err(_) => "err",
        }
    }
}

/// Splits the first `N` bytes off `buf`.
fn take<const N: usize>(buf: &mut &[u8]) -> io::Result<[u8; N]> {
    let Some((head, rest)) = buf.split_first_chunk::<N>() else {
        return Msg::buf_is_too_small(buf.len(), N);
    };

    *buf = rest;
    Ok(*head)
}

fn serialize_update(sender: PeerId, update: &EncodedUpdate, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&UPDATE_KIND.to_be_bytes());
    buf.extend_from_slice(&sender.0.to_be_bytes());
    buf.extend_from_slice(&update.iteration().to_be_bytes());
    buf.extend_from_slice(&update.epoch().to_be_bytes());
    buf.extend_from_slice(&update.boundary().to_be_bytes());
    buf.extend_from_slice(&(update.tensor_len() as u32).to_be_bytes());
    buf.extend_from_slice(&(update.count() as u32).to_be_bytes());
    buf.extend_from_slice(bytemuck::cast_slice(update.indices()));
    buf.extend_from_slice(bytemuck::cast_slice(update.magnitudes()));
}

fn deserialize_update(mut buf: &[u8]) -> io::Result<Payload<'static>> {
    if buf.len() < UPDATE_FIELDS_SIZE {
        return Msg::buf_is_too_small(buf.len(), UPDATE_FIELDS_SIZE);
    }

    let sender = PeerId(u64::from_be_bytes(take(&mut buf)?));
    let iteration = u64::from_be_bytes(take(&mut buf)?);
    let epoch = u64::from_be_bytes(take(&mut buf)?);
    let boundary = u32::from_be_bytes(take(&mut buf)?);
    let len = u32::from_be_bytes(take(&mut buf)?);
    let count = u32::from_be_bytes(take(&mut buf)?) as usize;

    if count > boundary as usize {
        return Msg::invalid_data(format!("{count} entries exceed the boundary of {boundary}"));
    }

    if buf.len() != count * ENTRY_SIZE {
        return Msg::invalid_data(format!(
            "update announces {count} entries but carries {} bytes of entries",
            buf.len()
        ));
    }

    let (indices, rest) = buf.split_at(count * size_of::<u32>());
    let (magnitudes, signs) = rest.split_at(count * size_of::<f32>());

    let update = EncodedUpdate::new(
        iteration,
        epoch,
        boundary,
        len,
        bytemuck::pod_collect_to_vec(indices),
        bytemuck::pod_collect_to_vec(signs),
        bytemuck::pod_collect_to_vec(magnitudes),
    )
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    Ok(Payload::Update {
        sender,
        update: Cow::Owned(update),
    })
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&ERR_KIND.to_be_bytes());
                Some(e.as_bytes())
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL_KIND.to_be_bytes());

                // SAFETY: Serialize impl for `Command` is derived and not implemented
                //         by hand. Nor has a non string-key map inside.
                serde_json::to_writer(buf, &cmd).unwrap();
                None
            }
            Msg::Data(Payload::Update { sender, update }) => {
                serialize_update(*sender, update, buf);
                Some(bytemuck::cast_slice(update.signs()))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        let Some((kind, rest)) = buf.split_first_chunk::<HEADER_SIZE>() else {
            return Self::buf_is_too_small(buf.len(), HEADER_SIZE);
        };

        match Header::from_be_bytes(*kind) {
            ERR_KIND => {
                let string = str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            CONTROL_KIND => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            UPDATE_KIND => Ok(Self::Data(deserialize_update(rest)?)),
            kind => Self::invalid_data(format!("Received an invalid kind header {kind}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(msg: &Msg) -> Vec<u8> {
        let mut buf = Vec::new();
        let tail = msg.serialize(&mut buf).map(<[u8]>::to_vec);
        buf.extend(tail.unwrap_or_default());
        buf
    }

    fn sample_update() -> EncodedUpdate {
        EncodedUpdate::new(7, 2, 4, 16, vec![1, 9, 15], vec![1, -1, 1], vec![0.5, 1.25, 3.])
            .unwrap()
    }

    #[test]
    fn update_layout() {
        let update = sample_update();
        let msg = Msg::Data(Payload::Update {
            sender: PeerId(3),
            update: Cow::Borrowed(&update),
        });

        let bytes = frame(&msg);
        assert_eq!(bytes.len(), HEADER_SIZE + UPDATE_FIELDS_SIZE + 3 * ENTRY_SIZE);
        assert_eq!(bytes[..HEADER_SIZE], UPDATE_KIND.to_be_bytes());

        let Msg::Data(Payload::Update { sender, update: got }) = Msg::deserialize(&bytes).unwrap()
        else {
            panic!("expected an update");
        };

        assert_eq!(sender, PeerId(3));
        assert_eq!(*got, update);
    }

    #[test]
    fn control_message() {
        let msg = Msg::Control(Command::Connect { peer: PeerId(5) });
        let bytes = frame(&msg);

        match Msg::deserialize(&bytes).unwrap() {
            Msg::Control(cmd) => assert_eq!(cmd, Command::Connect { peer: PeerId(5) }),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn truncated_update_is_invalid_data() {
        let update = sample_update();
        let msg = Msg::Data(Payload::Update {
            sender: PeerId(0),
            update: Cow::Borrowed(&update),
        });

        let bytes = frame(&msg);
        let err = Msg::deserialize(&bytes[..bytes.len() - 1]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn out_of_range_index_is_invalid_data() {
        let update = sample_update();
        let msg = Msg::Data(Payload::Update {
            sender: PeerId(0),
            update: Cow::Borrowed(&update),
        });

        let mut bytes = frame(&msg);
        let first_index = HEADER_SIZE + UPDATE_FIELDS_SIZE;
        bytes[first_index..first_index + 4].copy_from_slice(&100u32.to_ne_bytes());

        let err = Msg::deserialize(&bytes).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn unknown_kind_is_invalid_data() {
        let bytes = 9u32.to_be_bytes();
        assert!(Msg::deserialize(&bytes).is_err());
    }
}
