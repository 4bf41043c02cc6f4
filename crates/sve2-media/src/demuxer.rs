// crates/sve2-media/src/demuxer.rs
//
// Background worker that owns a container and routes packets to one channel
// per selected stream. Modeled as an explicit state machine per the
// reference's "coroutine control flow" redesign note, rather than the flag
// soup the original demuxer_thread mixes I/O, command handling and
// backpressure through.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::context::Input;
use ffmpeg::Packet;
use thiserror::Error;

use sve2_core::{Channel, Deadline, GrowPolicy, PacketMessage, RecvOutcome};

const BACKOFF: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum DemuxerError {
    #[error("unable to open container: {0}")]
    Open(String),
    #[error("no stream resolved for the requested selection")]
    StreamNotFound,
}

/// One selected stream's outbound packet channel, shared with its decoder.
pub type StreamChannel = Arc<Channel<PacketMessage<Packet>>>;

struct SelectedStream {
    absolute_index: i32,
    channel: StreamChannel,
}

/// Commands accepted on the demuxer's inbound command channel.
pub enum DemuxerCmd {
    Exit,
    LatePacket,
    /// `stream == -1` means "every selected stream" (matches the reference's
    /// `demuxer_cmd_seek` with a negative stream index).
    Seek { stream: i32, timestamp: i64, backward: bool },
}

/// Internal worker state, one transition per loop iteration.
enum WorkerState {
    Idle,
    HoldingPacket { stream_idx: usize, packet: Packet, late: bool },
    Terminating { outcome: PacketMessage<Packet> },
}

/// Handle to a running demuxer thread. Dropping without calling
/// [`DemuxerHandle::close`] leaks the thread; `close` is the documented exit
/// path (`cmd_exit` then join).
pub struct DemuxerHandle {
    cmd: Arc<Channel<DemuxerCmd>>,
    thread: Option<JoinHandle<()>>,
}

impl DemuxerHandle {
    /// Opens `path` and spawns the worker thread, one packet channel per
    /// entry in `absolute_stream_indices`, each buffering up to
    /// `num_buffered_packets` regular packets before backpressure kicks in.
    pub fn open(
        path: &str,
        absolute_stream_indices: &[i32],
        num_buffered_packets: usize,
    ) -> Result<(Self, Vec<StreamChannel>), DemuxerError> {
        let ictx = ffmpeg::format::input(&path).map_err(|e| DemuxerError::Open(e.to_string()))?;

        let channels: Vec<StreamChannel> = absolute_stream_indices
            .iter()
            .map(|_| Arc::new(Channel::new(num_buffered_packets, GrowPolicy::Strict)))
            .collect();

        let selected: Vec<SelectedStream> = absolute_stream_indices
            .iter()
            .zip(channels.iter())
            .map(|(&idx, ch)| SelectedStream { absolute_index: idx, channel: ch.clone() })
            .collect();

        let cmd: Arc<Channel<DemuxerCmd>> = Arc::new(Channel::new(16, GrowPolicy::GrowBy(16)));
        let cmd_worker = cmd.clone();

        let thread = std::thread::spawn(move || run(ictx, selected, cmd_worker));

        Ok((DemuxerHandle { cmd, thread: Some(thread) }, channels))
    }

    pub fn cmd_late_packet(&self) {
        self.cmd.send(DemuxerCmd::LatePacket, Deadline::Infinite);
    }

    pub fn cmd_seek(&self, stream: i32, timestamp: i64, backward: bool) {
        self.cmd.send(DemuxerCmd::Seek { stream, timestamp, backward }, Deadline::Infinite);
    }

    /// Sends `exit` and joins the worker thread. The thread's own exit code
    /// is non-fatal: a panic inside the worker is logged at `warn` rather
    /// than propagated, matching the reference's "log and move on" stance on
    /// the join handle's result.
    pub fn close(mut self) {
        self.cmd.send(DemuxerCmd::Exit, Deadline::Infinite);
        if let Some(t) = self.thread.take() {
            if let Err(e) = t.join() {
                log::warn!("demuxer worker exited abnormally: {e:?}");
            }
        }
    }
}

impl Drop for DemuxerHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.cmd.send(DemuxerCmd::Exit, Deadline::Infinite);
            if let Some(t) = self.thread.take() {
                let _ = t.join();
            }
        }
    }
}

/// Whether the held packet should be dispatched now. `late` forces dispatch
/// unconditionally; otherwise the worker waits for backpressure to clear on
/// *any* selected stream, not just the held packet's own channel, so one
/// stream draining slowly never stalls packets held for a different stream
/// (matches `demuxer_should_send` in the reference demuxer).
fn should_dispatch(selected: &[SelectedStream], late: bool, num_buffered_packets: usize) -> bool {
    late || selected.iter().any(|s| s.channel.len() < num_buffered_packets)
}

fn run(mut ictx: Input, selected: Vec<SelectedStream>, cmd: Arc<Channel<DemuxerCmd>>) {
    let num_buffered_packets = selected.first().map(|s| s.channel.capacity()).unwrap_or(8);
    let exiting = AtomicBool::new(false);
    let mut state = WorkerState::Idle;
    let mut late = false;

    loop {
        // Step 1: drain pending commands. Deadline is "now" if a packet is
        // already held (we have dispatching work to do), else a 10ms
        // backoff so the thread does not spin while every channel is full.
        let drain_deadline = match &state {
            WorkerState::HoldingPacket { .. } => Deadline::Now,
            _ => Deadline::after(BACKOFF),
        };

        loop {
            let mut msg = None;
            match cmd.recv_into(&mut msg, drain_deadline) {
                RecvOutcome::Ok => match msg.unwrap() {
                    DemuxerCmd::Exit => {
                        exiting.store(true, Ordering::Relaxed);
                    }
                    DemuxerCmd::LatePacket => {
                        late = true;
                    }
                    DemuxerCmd::Seek { stream, timestamp, backward } => {
                        let range: std::ops::RangeInclusive<i64> = if backward {
                            i64::MIN..=timestamp
                        } else {
                            timestamp..=i64::MAX
                        };
                        match ictx.seek(timestamp, range) {
                            Ok(()) => {
                                state = WorkerState::Idle; // drop any held packet
                                for s in &selected {
                                    if stream < 0 || stream == s.absolute_index {
                                        s.channel.send(PacketMessage::SeekMarker, Deadline::Infinite);
                                    }
                                }
                                // late does not clear until a new packet is held
                            }
                            Err(e) => {
                                log::warn!("seek failed: {e}");
                            }
                        }
                    }
                },
                RecvOutcome::Timeout => break,
                RecvOutcome::Closed => {
                    exiting.store(true, Ordering::Relaxed);
                    break;
                }
            }
        }

        if exiting.load(Ordering::Relaxed) {
            state = WorkerState::Terminating { outcome: PacketMessage::Eof };
        }

        match state {
            WorkerState::Terminating { outcome } => {
                for s in &selected {
                    s.channel.send(clone_marker(&outcome), Deadline::Infinite);
                }
                return;
            }
            WorkerState::HoldingPacket { stream_idx, packet, late: held_late } => {
                if should_dispatch(&selected, held_late || late, num_buffered_packets) {
                    let s = &selected[stream_idx];
                    s.channel.send(PacketMessage::Regular(packet), Deadline::Infinite);
                    late = false;
                    state = WorkerState::Idle;
                } else {
                    state = WorkerState::HoldingPacket { stream_idx, packet, late: held_late };
                    continue;
                }
            }
            WorkerState::Idle => {}
        }

        match read_one(&mut ictx, &selected) {
            Ok(Some((stream_idx, packet))) => {
                state = WorkerState::HoldingPacket { stream_idx, packet, late };
            }
            Ok(None) => {
                // packet belonged to an unselected stream: always unref/drop
                // immediately rather than leaking (resolves the open question
                // in favor of never leaking).
            }
            Err(eof) => {
                state = WorkerState::Terminating {
                    outcome: if eof { PacketMessage::Eof } else { PacketMessage::Error },
                };
            }
        }
    }
}

fn clone_marker<T>(m: &PacketMessage<T>) -> PacketMessage<T> {
    match m {
        PacketMessage::Eof => PacketMessage::Eof,
        PacketMessage::Error => PacketMessage::Error,
        PacketMessage::SeekMarker => PacketMessage::SeekMarker,
        PacketMessage::Regular(_) => unreachable!("terminal outcome is never Regular"),
    }
}

/// Reads one packet from the container. `Ok(Some(..))` is a packet matching
/// a selected stream (to be held); `Ok(None)` is a packet for an unselected
/// stream (already dropped); `Err(is_eof)` is a terminal container read.
fn read_one(ictx: &mut Input, selected: &[SelectedStream]) -> Result<Option<(usize, Packet)>, bool> {
    let mut packets = ictx.packets();
    match packets.next() {
        Some(Ok((stream, packet))) => {
            let idx = stream.index() as i32;
            match selected.iter().position(|s| s.absolute_index == idx) {
                Some(pos) => Ok(Some((pos, packet))),
                None => Ok(None),
            }
        }
        Some(Err(e)) => Err(matches!(e, ffmpeg::Error::Eof)),
        None => Err(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(absolute_index: i32, capacity: usize) -> SelectedStream {
        SelectedStream {
            absolute_index,
            channel: Arc::new(Channel::new(capacity, GrowPolicy::Strict)),
        }
    }

    fn fill(s: &SelectedStream, n: usize) {
        for _ in 0..n {
            s.channel.send(PacketMessage::Regular(Packet::empty()), Deadline::Now);
        }
    }

    #[test]
    fn late_always_dispatches_regardless_of_backpressure() {
        let selected = vec![stream(0, 2)];
        fill(&selected[0], 2);
        assert!(should_dispatch(&selected, true, 2));
    }

    #[test]
    fn blocks_only_when_every_selected_stream_is_full() {
        let selected = vec![stream(0, 2), stream(1, 2)];
        fill(&selected[0], 2);
        fill(&selected[1], 2);
        assert!(!should_dispatch(&selected, false, 2));
    }

    #[test]
    fn dispatches_when_any_selected_stream_has_room() {
        // Regression for the bug where only the held packet's own stream was
        // checked: here the held stream (index 0) is full but a sibling
        // stream (index 1) has room, so dispatch should still proceed.
        let selected = vec![stream(0, 2), stream(1, 2)];
        fill(&selected[0], 2);
        assert!(should_dispatch(&selected, false, 2));
    }

    #[test]
    fn empty_selection_never_dispatches_without_late() {
        let selected: Vec<SelectedStream> = Vec::new();
        assert!(!should_dispatch(&selected, false, 8));
        assert!(should_dispatch(&selected, true, 8));
    }

    #[test]
    fn clone_marker_preserves_terminal_variant() {
        assert!(matches!(clone_marker(&PacketMessage::<Packet>::Eof), PacketMessage::Eof));
        assert!(matches!(clone_marker(&PacketMessage::<Packet>::Error), PacketMessage::Error));
        assert!(matches!(
            clone_marker(&PacketMessage::<Packet>::SeekMarker),
            PacketMessage::SeekMarker
        ));
    }
}
