use std::{borrow::Cow, io};

use comms::{
    EncodedUpdate, PeerId,
    msg::{Command, Msg, Payload},
};
use tokio::io::{self as tokio_io, AsyncWriteExt};

const SIZE: usize = 4096;

fn sample_update(iteration: u64) -> EncodedUpdate {
    EncodedUpdate::new(iteration, 0, 3, 8, vec![0, 3, 7], vec![1, -1, 1], vec![1., 2., 3.])
        .unwrap()
}

#[tokio::test]
async fn send_recv_update() -> io::Result<()> {
    let (one, two) = tokio_io::duplex(SIZE);
    let (rx, tx) = tokio_io::split(one);
    let (_, mut tx) = comms::channel(rx, tx);

    let update = sample_update(4);
    let msg = Msg::Data(Payload::Update {
        sender: PeerId(1),
        update: Cow::Borrowed(&update),
    });
    tx.send(&msg).await?;

    let (rx, tx) = tokio_io::split(two);
    let (mut rx, _) = comms::channel(rx, tx);

    let mut buf: Vec<u32> = Vec::new();
    let Msg::Data(Payload::Update { sender, update: got }) = rx.recv_into(&mut buf).await? else {
        panic!("expected an update");
    };

    assert_eq!(sender, PeerId(1));
    assert_eq!(*got, update);
    Ok(())
}

#[tokio::test]
async fn malformed_frame_keeps_stream_aligned() -> io::Result<()> {
    let (mut one, two) = tokio_io::duplex(SIZE);

    // A whole frame carrying an unknown kind header.
    one.write_all(&4u64.to_be_bytes()).await?;
    one.write_all(&9u32.to_be_bytes()).await?;

    let (rx, tx) = tokio_io::split(one);
    let (_, mut tx) = comms::channel(rx, tx);
    tx.send(&Msg::Control(Command::Disconnect)).await?;

    let (rx, tx) = tokio_io::split(two);
    let (mut rx, _) = comms::channel(rx, tx);
    let mut buf: Vec<u32> = Vec::new();

    let res: io::Result<Msg> = rx.recv_into(&mut buf).await;
    let err = res.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidData);

    let next: Msg = rx.recv_into(&mut buf).await?;
    assert!(matches!(next, Msg::Control(Command::Disconnect)));
    Ok(())
}
