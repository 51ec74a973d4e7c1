//! Per-connection task: the `want-command` / `want-data` / `send-word` /
//! `send-job` / `wait` state machine that drives one client's view of the
//! shared core.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use futures::sink::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::core::{Core, PutOutcome, ReleaseOutcome, ReserveOutcome};
use crate::types::conn::ConnId;
use crate::types::job::JobId;
use crate::wire::events::ClientEvent;
use crate::wire::protocol::{Command, Response};
use crate::wire::{self, decoder};

type Conn<T> = Framed<T, wire::Codec>;

/// Runs a single client connection to completion: registers it with the
/// core, services commands until disconnect or a framing error forces a
/// close, then unregisters it (returning any reserved jobs to the pool).
pub async fn handle<T>(core: Arc<Mutex<Core>>, wake_deadline: Arc<Notify>, stream: T)
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let conn = core.lock().expect("core mutex poisoned").register_conn();
    debug!(%conn, "accepted connection");

    let mut framed = wire::framed(stream);
    let mut body_buf = BytesMut::new();
    // Commands observed on the socket while a `reserve` was blocked waiting
    // for a job (spec.md §4.2's `wait` state: "data read while waiting is
    // buffered for future command parsing"), drained ahead of the next real
    // socket read.
    let mut pending: VecDeque<ClientEvent> = VecDeque::new();

    loop {
        let evt = match pending.pop_front() {
            Some(evt) => Ok(evt),
            None => match framed.next().await {
                None => break,
                Some(r) => r,
            },
        };

        let evt = match evt {
            Ok(ClientEvent::Discarded) => continue,
            Ok(evt) => evt,
            Err(decoder::Error::IO(err)) => {
                warn!(%conn, %err, "connection error");
                break;
            },
            Err(decoder::Error::Client(resp)) => {
                let _ = framed.send(resp).await;
                warn!(%conn, "client sent malformed input and was disconnected");
                break;
            },
        };

        let cmd = match evt {
            ClientEvent::Command(cmd) => cmd,
            // The decoder only emits PutChunk/PutEnd while the put loop
            // below is actively draining them; anything else reaching here
            // is unreachable from a well-formed stream.
            ClientEvent::PutChunk(_) | ClientEvent::PutEnd => continue,
            ClientEvent::Discarded => continue,
        };

        match cmd {
            Command::Quit => break,

            Command::Put {
                pri,
                delay,
                ttr,
                n_bytes,
            } => {
                match handle_put(
                    &core,
                    &wake_deadline,
                    &mut framed,
                    &mut body_buf,
                    conn,
                    pri,
                    delay,
                    ttr,
                    n_bytes,
                )
                .await
                {
                    PutResult::Replied(resp) => {
                        if framed.send(resp).await.is_err() {
                            break;
                        }
                    },
                    PutResult::ReplyThenClose(resp) => {
                        let _ = framed.send(resp).await;
                        break;
                    },
                    PutResult::Closed => break,
                }
            },

            Command::Reserve => {
                match handle_reserve(&core, &wake_deadline, &mut framed, &mut pending, conn).await
                {
                    ReserveResult::Ok => {},
                    ReserveResult::Closed => break,
                }
            },

            other => match dispatch(&core, &wake_deadline, conn, other) {
                Dispatched::Word(resp) => {
                    if framed.send(resp).await.is_err() {
                        break;
                    }
                },
                Dispatched::Job(resp, body) => {
                    if send_job(&mut framed, resp, body).await.is_err() {
                        break;
                    }
                },
            },
        }
    }

    core.lock().expect("core mutex poisoned").unregister_conn(conn);
    let _ = framed.into_inner().shutdown().await;
    debug!(%conn, "connection closed");
}

enum Dispatched {
    Word(Response),
    Job(Response, Bytes),
}

/// Handles every verb except `put`, `reserve`, and `quit`, which need
/// access to the framed stream for their multi-step body/job protocols.
fn dispatch(core: &Arc<Mutex<Core>>, wake_deadline: &Arc<Notify>, conn: ConnId, cmd: Command) -> Dispatched {
    let mut core = core.lock().expect("core mutex poisoned");

    match cmd {
        Command::Delete { id } => match JobId::from_wire(id) {
            Some(id) if core.delete(conn, id) => Dispatched::Word(Response::Deleted),
            _ => Dispatched::Word(Response::NotFound),
        },
        Command::Release { id, pri, delay } => {
            let outcome = match JobId::from_wire(id) {
                Some(id) => core.release(conn, id, pri, delay),
                None => ReleaseOutcome::NotFound,
            };
            if outcome != ReleaseOutcome::NotFound {
                wake_deadline.notify_one();
            }
            Dispatched::Word(match outcome {
                ReleaseOutcome::Released => Response::Released,
                ReleaseOutcome::Buried => Response::Buried,
                ReleaseOutcome::NotFound => Response::NotFound,
            })
        },
        Command::Bury { id, pri } => match JobId::from_wire(id) {
            Some(id) if core.bury(conn, id, pri) => Dispatched::Word(Response::Buried),
            _ => Dispatched::Word(Response::NotFound),
        },
        Command::Touch { id } => match JobId::from_wire(id) {
            Some(id) if core.touch(conn, id) => {
                wake_deadline.notify_one();
                Dispatched::Word(Response::Touched)
            },
            _ => Dispatched::Word(Response::NotFound),
        },
        Command::Kick { bound } => {
            let count = core.kick(bound);
            if count > 0 {
                wake_deadline.notify_one();
            }
            Dispatched::Word(Response::Kicked { count })
        },
        Command::Peek => match core.peek_any() {
            Some((id, pri, body)) => Dispatched::Job(
                Response::Found {
                    id: id.get(),
                    pri,
                    n_bytes: body.len() as u32,
                },
                body,
            ),
            None => Dispatched::Word(Response::NotFound),
        },
        Command::PeekId { id } => match JobId::from_wire(id).and_then(|id| core.peek_id(id)) {
            Some((id, pri, body)) => Dispatched::Job(
                Response::Found {
                    id: id.get(),
                    pri,
                    n_bytes: body.len() as u32,
                },
                body,
            ),
            None => Dispatched::Word(Response::NotFound),
        },
        Command::Stats => Dispatched::Word(Response::OkStats(Box::new(core.stats_global()))),
        Command::StatsJob { id } => match JobId::from_wire(id).and_then(|id| core.stats_job(id)) {
            Some(stats) => Dispatched::Word(Response::OkStatsJob(Box::new(stats))),
            None => Dispatched::Word(Response::NotFound),
        },
        Command::Put { .. } | Command::Reserve | Command::Quit => {
            unreachable!("handled by the caller before dispatch")
        },
    }
}

enum ReserveResult {
    Ok,
    Closed,
}

/// Services a `reserve`: replies immediately if a job is available, else
/// waits for `process_queue` to hand one off while still watching the
/// socket for a hang-up or further pipelined input (spec.md §4.2's `wait`
/// state). Anything read from the socket while waiting is pushed onto
/// `pending` rather than processed, so a client that pipelines further
/// commands behind a blocking `reserve` doesn't lose them.
async fn handle_reserve<T>(
    core: &Arc<Mutex<Core>>,
    wake_deadline: &Arc<Notify>,
    framed: &mut Conn<T>,
    pending: &mut VecDeque<ClientEvent>,
    conn: ConnId,
) -> ReserveResult
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let outcome = core.lock().expect("core mutex poisoned").reserve(conn);

    let handoff = match outcome {
        ReserveOutcome::Immediate(h) => h,
        ReserveOutcome::Pending(mut rx) => {
            wake_deadline.notify_one();

            loop {
                tokio::select! {
                    biased;
                    handoff = &mut rx => {
                        match handoff {
                            Ok(h) => break h,
                            Err(_) => return ReserveResult::Ok,
                        }
                    },
                    next = framed.next() => match next {
                        None => {
                            core.lock().expect("core mutex poisoned").cancel_wait(conn);
                            return ReserveResult::Closed;
                        },
                        Some(Ok(evt)) => pending.push_back(evt),
                        Some(Err(decoder::Error::Client(resp))) => {
                            let _ = framed.send(resp).await;
                        },
                        Some(Err(decoder::Error::IO(_))) => {
                            core.lock().expect("core mutex poisoned").cancel_wait(conn);
                            return ReserveResult::Closed;
                        },
                    },
                }
            }
        },
    };

    let ok = send_job(
        framed,
        Response::Reserved {
            id: handoff.id.get(),
            pri: handoff.pri,
            n_bytes: handoff.body.len() as u32,
        },
        handoff.body,
    )
    .await
    .is_ok();

    if ok {
        ReserveResult::Ok
    } else {
        ReserveResult::Closed
    }
}

enum PutResult {
    /// The job body was read cleanly; reply and keep the connection open.
    Replied(Response),
    /// An unrecoverable framing error (e.g. a bad job trailer) was hit
    /// mid-body. The decoder has already entered its resync state, but per
    /// its documented policy such clients are disconnected rather than
    /// resynced indefinitely: send the error reply, then close.
    ReplyThenClose(Response),
    /// The socket closed or failed outright; nothing to reply with.
    Closed,
}

#[allow(clippy::too_many_arguments)]
async fn handle_put<T>(
    core: &Arc<Mutex<Core>>,
    wake_deadline: &Arc<Notify>,
    framed: &mut Conn<T>,
    body_buf: &mut BytesMut,
    conn: ConnId,
    pri: u32,
    delay: u32,
    ttr: u32,
    n_bytes: u32,
) -> PutResult
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    body_buf.clear();

    loop {
        match framed.next().await {
            Some(Ok(ClientEvent::PutChunk(chunk))) => body_buf.extend_from_slice(&chunk),
            Some(Ok(ClientEvent::PutEnd)) => break,
            Some(Ok(ClientEvent::Discarded)) => continue,
            Some(Ok(ClientEvent::Command(_))) => return PutResult::ReplyThenClose(Response::BadFormat),
            Some(Err(decoder::Error::Client(resp))) => return PutResult::ReplyThenClose(resp),
            Some(Err(decoder::Error::IO(_))) | None => return PutResult::Closed,
        }
    }

    let body = body_buf.split().freeze();
    let outcome = core
        .lock()
        .expect("core mutex poisoned")
        .put(pri, delay, ttr, body, conn);
    if delay > 0 {
        wake_deadline.notify_one();
    }

    PutResult::Replied(match outcome {
        PutOutcome::Inserted(id) => Response::Inserted { id: id.get() },
        PutOutcome::Buried(id) => Response::BuriedId { id: id.get() },
        PutOutcome::Draining => Response::Draining,
        PutOutcome::TooBig => Response::JobTooBig,
    })
}

async fn send_job<T>(framed: &mut Conn<T>, head: Response, body: Bytes) -> Result<(), wire::encoder::Error>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    framed.feed(head).await?;
    framed.feed(Response::JobBody(body)).await?;
    framed.send(Response::JobEnd).await
}

#[cfg(test)]
mod tests {
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    use super::*;

    fn spawn_conn(core: Arc<Mutex<Core>>) -> DuplexStream {
        let (client, server) = duplex(4096);
        let wake_deadline = Arc::new(Notify::new());
        tokio::spawn(handle(core, wake_deadline, server));
        client
    }

    #[tokio::test]
    async fn put_then_reserve_round_trip_over_wire() {
        let core = Arc::new(Mutex::new(Core::new(65_535, false)));
        let mut producer = spawn_conn(Arc::clone(&core));
        let mut consumer = spawn_conn(core);

        producer
            .write_all(b"put 5 0 60 5\r\nhello\r\n")
            .await
            .unwrap();
        let mut buf = [0u8; 64];
        let n = producer.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("INSERTED "));

        consumer.write_all(b"reserve\r\n").await.unwrap();
        let n = consumer.read(&mut buf).await.unwrap();
        let text = String::from_utf8_lossy(&buf[..n]);
        assert!(text.starts_with("RESERVED "), "got {text:?}");
        assert!(text.ends_with("hello\r\n"), "got {text:?}");
    }

    #[tokio::test]
    async fn draining_rejects_put_over_wire() {
        let core = Arc::new(Mutex::new(Core::new(65_535, true)));
        let mut conn = spawn_conn(core);

        conn.write_all(b"put 0 0 60 1\r\nx\r\n").await.unwrap();
        let mut buf = [0u8; 64];
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"SERVER_ERROR 2 draining\r\n");
    }

    #[tokio::test]
    async fn bad_trailer_disconnects_client() {
        let core = Arc::new(Mutex::new(Core::new(65_535, false)));
        let mut conn = spawn_conn(core);

        conn.write_all(b"put 0 0 60 4\r\nabcdXXstats\r\n")
            .await
            .unwrap();
        let mut buf = [0u8; 128];
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"CLIENT_ERROR 2 expected CR-LF after job body\r\n");

        let n2 = conn.read(&mut buf).await.unwrap();
        assert_eq!(n2, 0, "connection should have been closed");
    }

    #[tokio::test]
    async fn delete_unknown_job_is_not_found() {
        let core = Arc::new(Mutex::new(Core::new(65_535, false)));
        let mut conn = spawn_conn(core);

        conn.write_all(b"delete 999\r\n").await.unwrap();
        let mut buf = [0u8; 64];
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"NOT_FOUND\r\n");
    }
}
