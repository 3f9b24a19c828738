use comms::specs::EncodingSpec;
use compression::{EncodingHandler, HandlerBuilder, UpdateSink};

use crate::{ParameterServer, PeerTransport, Result, ServerErr};

/// Builds a handler that broadcasts every update to the linked peers and then queues it
/// locally, so the local update is merged with the remote ones. The handler draws its
/// scratch buffers from the server's pool.
///
/// # Arguments
/// * `builder` - The handler builder.
/// * `spec` - The encoding specification, its length must match the server's.
/// * `server` - The local server.
/// * `transport` - The outbound links.
///
/// # Returns
/// The handler, or a configuration error.
pub fn wired_handler(
    builder: &HandlerBuilder,
    spec: &EncodingSpec,
    server: &ParameterServer,
    transport: &PeerTransport,
) -> Result<EncodingHandler> {
    let sinks: Vec<Box<dyn UpdateSink>> =
        vec![Box::new(transport.clone()), Box::new(server.clone())];

    build(builder, spec, server, sinks)
}

/// Builds a handler that only queues its updates in `server`, for single process runs.
pub fn local_handler(
    builder: &HandlerBuilder,
    spec: &EncodingSpec,
    server: &ParameterServer,
) -> Result<EncodingHandler> {
    build(builder, spec, server, vec![Box::new(server.clone())])
}

fn build(
    builder: &HandlerBuilder,
    spec: &EncodingSpec,
    server: &ParameterServer,
    sinks: Vec<Box<dyn UpdateSink>>,
) -> Result<EncodingHandler> {
    if spec.len.get() != server.len() {
        return Err(ServerErr::LengthMismatch {
            expected: server.len(),
            got: spec.len.get(),
        });
    }

    let builder = builder.clone().with_pool(server.pool());
    Ok(builder.build(server.id(), spec, sinks)?)
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use comms::{
        PeerId,
        specs::{ServerSpec, ThresholdSpec},
    };

    use super::*;

    fn spec(len: usize) -> EncodingSpec {
        EncodingSpec {
            len: NonZeroUsize::new(len).unwrap(),
            boundary: NonZeroUsize::new(2).unwrap(),
            threshold: ThresholdSpec::Fixed { threshold: 1. },
            quantization: Default::default(),
            overflow: Default::default(),
            residual: Default::default(),
            debug: false,
        }
    }

    #[tokio::test]
    async fn local_enqueue_survives_missing_links() {
        let server_spec = ServerSpec::default();
        let server = ParameterServer::new(PeerId(0), 3, &server_spec);
        server.register_peer(PeerId(1));
        let transport = PeerTransport::for_server(&server, &server_spec);

        let mut handler =
            wired_handler(&HandlerBuilder::new(), &spec(3), &server, &transport).unwrap();
        handler.send_update(&[2., 0., -3.], 0, 0).unwrap();

        assert_eq!(
            server.drain_merged_update().as_deref(),
            Some(&[2., 0., -3.][..])
        );
        assert_eq!(server.pool().idle(), 1);

        let snapshot = server.diagnostics().snapshot();
        assert_eq!(snapshot.send_failed, 1);
        assert_eq!(snapshot.queued, 1);
    }

    #[test]
    fn length_must_match_server() {
        let server = ParameterServer::new(PeerId(0), 3, &ServerSpec::default());
        let res = local_handler(&HandlerBuilder::new(), &spec(4), &server);

        assert!(matches!(
            res,
            Err(ServerErr::LengthMismatch {
                expected: 3,
                got: 4
            })
        ));
    }
}
