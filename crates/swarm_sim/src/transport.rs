use crate::metrics::Metrics;
use crate::shutdown::Shutdown;
use anyhow::{anyhow, Context};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use swarm_core::protocol::{Command, Outbound, ReportEvent, StateSnapshot};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

/// Longest inbound line accepted; anything longer is discarded up to its newline.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Pause after a failed `accept` so a persistent error does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// The transport's ends of the queues shared with the scheduler.
pub struct OperatorQueues {
    pub commands: mpsc::UnboundedSender<Command>,
    pub reports: mpsc::UnboundedReceiver<ReportEvent>,
    /// Latest state snapshot; older ones are overwritten if the operator lags.
    pub snapshots: watch::Receiver<Option<StateSnapshot>>,
}

/// Waits for the operator console. Returns `None` if shutdown comes first.
pub async fn accept_operator(
    listener: &TcpListener,
    shutdown: &Shutdown,
) -> anyhow::Result<Option<(TcpStream, SocketAddr)>> {
    tokio::select! {
        _ = shutdown.wait() => Ok(None),
        accepted = listener.accept() => {
            let (stream, peer) = accepted.context("Failed to accept operator connection")?;
            Ok(Some((stream, peer)))
        }
    }
}

/// Runs one operator session until either direction fails or shutdown is
/// triggered. Ending the session for any reason triggers shutdown.
pub async fn run_session(
    listener: TcpListener,
    stream: TcpStream,
    peer: SocketAddr,
    queues: OperatorQueues,
    metrics: Arc<Metrics>,
    shutdown: Shutdown,
    write_timeout: Duration,
) {
    let session_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(session_id, peer = %peer, "Operator connected");

    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
    }
    let (read_half, mut write_half) = stream.into_split();
    let OperatorQueues {
        commands,
        reports,
        snapshots,
    } = queues;

    let reader = async {
        let res = read_commands(BufReader::new(read_half), &commands, &metrics, &shutdown).await;
        shutdown.trigger();
        res
    };
    let writer = async {
        let res = write_outbound(
            &mut write_half,
            reports,
            snapshots,
            &metrics,
            &shutdown,
            write_timeout,
        )
        .await;
        shutdown.trigger();
        res
    };
    let (read_res, write_res, ()) =
        tokio::join!(reader, writer, reject_extra(&listener, &shutdown));

    if let Err(e) = read_res {
        tracing::warn!(session_id, error = %e, "Operator read failed");
    }
    if let Err(e) = write_res {
        tracing::warn!(session_id, error = %e, "Operator write failed");
    }
    tracing::info!(session_id, peer = %peer, "Operator session ended");
}

/// Reads newline-delimited commands and queues them for the scheduler.
///
/// Malformed lines (bad JSON, invalid UTF-8, longer than [`MAX_LINE_BYTES`])
/// are logged and discarded. Returns `Ok` on end of stream, on shutdown, or
/// when the scheduler has gone away.
pub async fn read_commands<R>(
    mut reader: R,
    commands: &mpsc::UnboundedSender<Command>,
    metrics: &Metrics,
    shutdown: &Shutdown,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut oversized = false;
    loop {
        buf.clear();
        let mut limited = (&mut reader).take(MAX_LINE_BYTES as u64);
        let read = tokio::select! {
            _ = shutdown.wait() => return Ok(()),
            read = limited.read_until(b'\n', &mut buf) => read?,
        };
        if read == 0 {
            tracing::info!("Operator closed the connection");
            return Ok(());
        }

        let complete = buf.last() == Some(&b'\n');
        if oversized {
            // Still inside an overlong line; drop bytes up to its newline.
            oversized = !complete;
            continue;
        }
        if !complete && buf.len() >= MAX_LINE_BYTES {
            oversized = true;
            metrics.protocol_errors_total.inc();
            tracing::warn!(limit = MAX_LINE_BYTES, "Discarding oversized operator line");
            continue;
        }

        let Ok(text) = std::str::from_utf8(&buf) else {
            metrics.protocol_errors_total.inc();
            tracing::warn!(bytes = buf.len(), "Discarding operator line that is not valid UTF-8");
            continue;
        };
        let line = text.trim();
        if line.is_empty() {
            continue;
        }
        match Command::decode(line) {
            Ok(command) => {
                tracing::debug!(drone_id = command.drone(), command = ?command, "Command received");
                if commands.send(command).is_err() {
                    return Ok(());
                }
            }
            Err(e) => {
                metrics.protocol_errors_total.inc();
                tracing::warn!(error = %e, line, "Discarding malformed operator message");
            }
        }
    }
}

/// Writes reports and the latest state snapshot to the operator.
///
/// Reports are written in order; snapshots that arrive while a write is in
/// flight collapse into the newest one. A write that takes longer than
/// `write_timeout` is a failure.
pub async fn write_outbound<W>(
    writer: &mut W,
    mut reports: mpsc::UnboundedReceiver<ReportEvent>,
    mut snapshots: watch::Receiver<Option<StateSnapshot>>,
    metrics: &Metrics,
    shutdown: &Shutdown,
    write_timeout: Duration,
) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait() => return Ok(()),
            report = reports.recv() => match report {
                Some(report) => {
                    send(writer, &Outbound::Report(report), write_timeout).await?;
                }
                None => {
                    // Scheduler finished; deliver its last snapshot if unseen.
                    if snapshots.has_changed().unwrap_or(false) {
                        let latest = snapshots.borrow_and_update().clone();
                        if let Some(state) = latest {
                            send(writer, &Outbound::State(state), write_timeout).await?;
                            metrics.snapshots_sent_total.inc();
                        }
                    }
                    return Ok(());
                }
            },
            changed = snapshots.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let latest = snapshots.borrow_and_update().clone();
                if let Some(state) = latest {
                    send(writer, &Outbound::State(state), write_timeout).await?;
                    metrics.snapshots_sent_total.inc();
                }
            }
        }
    }
}

async fn send<W>(writer: &mut W, message: &Outbound, write_timeout: Duration) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = message.encode().context("Failed to encode outbound message")?;
    tokio::time::timeout(write_timeout, writer.write_all(line.as_bytes()))
        .await
        .map_err(|_| anyhow!("write to operator timed out after {write_timeout:?}"))?
        .context("Failed to write to operator")?;
    Ok(())
}

/// Turns away further connections while the operator session is live.
async fn reject_extra(listener: &TcpListener, shutdown: &Shutdown) {
    loop {
        tokio::select! {
            _ = shutdown.wait() => return,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::warn!(peer = %peer, "Rejecting connection, an operator is already connected");
                    drop(stream);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler;
    use swarm_core::protocol::{DroneView, PoiView};
    use swarm_core::{Disposition, DroneStatus};

    fn report() -> ReportEvent {
        ReportEvent {
            drone_id: 3,
            poi_idx: 1,
            drone_x: 10.0,
            drone_y: 12.5,
            time: 1_700_000_000.0,
        }
    }

    fn snapshot() -> StateSnapshot {
        StateSnapshot {
            time: 1_700_000_000.5,
            env_size: 50.0,
            poi: vec![PoiView {
                x: 1.0,
                y: 2.0,
                status: Disposition::Unknown,
                idx: 0,
            }],
            drones: vec![DroneView {
                id: 0,
                x: 3.0,
                y: 4.0,
                status: DroneStatus::Exploring,
                power: 999.9,
                assigned_region: None,
                reported_poi: None,
            }],
            explored_regions: Vec::new(),
            tick: 5,
            total_regions: 100,
            active_drones: 1,
        }
    }

    #[tokio::test]
    async fn reader_queues_commands_and_skips_garbage() {
        let metrics = Metrics::new().unwrap();
        let shutdown = Shutdown::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let input = concat!(
            "{\"type\":\"confirm\",\"drone_id\":1,\"poi_idx\":0}\n",
            "not json at all\n",
            "\n",
            "{\"type\":\"self_destruct\",\"drone_id\":1}\n",
            "{\"type\":\"stop_manual\",\"drone_id\":-1}\n",
            "{\"type\":\"stop_manual\",\"drone_id\":2}\r\n",
        );

        read_commands(input.as_bytes(), &tx, &metrics, &shutdown)
            .await
            .unwrap();

        assert_eq!(rx.try_recv().unwrap(), Command::Confirm { drone: 1, poi: 0 });
        assert_eq!(rx.try_recv().unwrap(), Command::StopManual { drone: 2 });
        assert!(rx.try_recv().is_err());
        assert_eq!(metrics.protocol_errors_total.get(), 3);
    }

    #[tokio::test]
    async fn non_utf8_line_is_skipped_without_ending_the_session() {
        let metrics = Metrics::new().unwrap();
        let shutdown = Shutdown::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut input = Vec::new();
        input.extend_from_slice(b"{\"type\":\"confirm\",\"drone_id\":1,\"poi_idx\":0}\n");
        input.extend_from_slice(b"\xff\xfe garbage\n");
        input.extend_from_slice(b"{\"type\":\"stop_manual\",\"drone_id\":2}\n");

        read_commands(input.as_slice(), &tx, &metrics, &shutdown)
            .await
            .unwrap();

        assert_eq!(rx.try_recv().unwrap(), Command::Confirm { drone: 1, poi: 0 });
        assert_eq!(rx.try_recv().unwrap(), Command::StopManual { drone: 2 });
        assert!(rx.try_recv().is_err());
        assert_eq!(metrics.protocol_errors_total.get(), 1);
    }

    #[tokio::test]
    async fn overlong_line_is_dropped_up_to_its_newline() {
        let metrics = Metrics::new().unwrap();
        let shutdown = Shutdown::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut input = vec![b'a'; MAX_LINE_BYTES + 10];
        input.push(b'\n');
        input.extend_from_slice(b"{\"type\":\"manual_control\",\"drone_id\":6}\n");

        read_commands(input.as_slice(), &tx, &metrics, &shutdown)
            .await
            .unwrap();

        assert_eq!(rx.try_recv().unwrap(), Command::RequestManualControl { drone: 6 });
        assert!(rx.try_recv().is_err());
        assert_eq!(metrics.protocol_errors_total.get(), 1);
    }

    #[tokio::test]
    async fn final_line_without_newline_is_still_read() {
        let metrics = Metrics::new().unwrap();
        let shutdown = Shutdown::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        read_commands(&b"{\"type\":\"stop_manual\",\"drone_id\":0}"[..], &tx, &metrics, &shutdown)
            .await
            .unwrap();

        assert_eq!(rx.try_recv().unwrap(), Command::StopManual { drone: 0 });
    }

    #[tokio::test]
    async fn writer_sends_reports_then_the_final_snapshot() {
        let metrics = Metrics::new().unwrap();
        let shutdown = Shutdown::new();
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let (snap_tx, snap_rx) = watch::channel(None);

        report_tx.send(report()).unwrap();
        snap_tx.send_replace(Some(snapshot()));
        drop(report_tx);

        let mut out = Vec::new();
        write_outbound(
            &mut out,
            report_rx,
            snap_rx,
            &metrics,
            &shutdown,
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(Outbound::decode(lines[0]).unwrap(), Outbound::Report(report()));
        assert_eq!(Outbound::decode(lines[1]).unwrap(), Outbound::State(snapshot()));
        assert_eq!(metrics.snapshots_sent_total.get(), 1);
    }

    #[tokio::test]
    async fn stalled_operator_times_out() {
        let metrics = Metrics::new().unwrap();
        let shutdown = Shutdown::new();
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let (_snap_tx, snap_rx) = watch::channel(None);
        let (_peer, mut stalled) = tokio::io::duplex(8);

        report_tx.send(report()).unwrap();
        let res = write_outbound(
            &mut stalled,
            report_rx,
            snap_rx,
            &metrics,
            &shutdown,
            Duration::from_millis(50),
        )
        .await;
        assert!(res.unwrap_err().to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn session_round_trip_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Shutdown::new();
        let metrics = Arc::new(Metrics::new().unwrap());

        let mut client = TcpStream::connect(addr).await.unwrap();
        let (stream, peer) = accept_operator(&listener, &shutdown).await.unwrap().unwrap();

        let (mut sim_side, operator_side) = scheduler::queues();
        let session = tokio::spawn(run_session(
            listener,
            stream,
            peer,
            operator_side,
            metrics.clone(),
            shutdown.clone(),
            Duration::from_secs(1),
        ));

        // A second console is turned away.
        let mut intruder = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(1), intruder.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);

        client
            .write_all(Command::RequestManualControl { drone: 4 }.encode().as_bytes())
            .await
            .unwrap();
        let received = tokio::time::timeout(Duration::from_secs(1), sim_side.commands.recv())
            .await
            .unwrap();
        assert_eq!(received, Some(Command::RequestManualControl { drone: 4 }));

        sim_side.reports.send(report()).unwrap();
        let mut lines = BufReader::new(&mut client).lines();
        let line = tokio::time::timeout(Duration::from_secs(1), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(Outbound::decode(&line).unwrap(), Outbound::Report(report()));

        drop(lines);
        drop(client);
        tokio::time::timeout(Duration::from_secs(1), session)
            .await
            .unwrap()
            .unwrap();
        assert!(shutdown.is_triggered());
    }
}
