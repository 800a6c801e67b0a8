// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// LPD wire codec and per-connection state machine (RFC 1179, receive side).
//
// A client opens a connection and sends one daemon command line:
//
//   0x02 <queue> LF                     receive a printer job
//
// answered by a single status byte.  It then sends any number of
// "receive job" sub-commands, each a single line followed (for files) by
// the payload and a NUL terminator:
//
//   0x01 LF                             abort job
//   0x02 <count> SP <name> LF           control file
//   0x03 <count> SP <name> LF           data file
//
// Every sub-command line and every payload is acknowledged with a single
// status byte, 0 meaning success.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt};

use greenbar_core::error::{GreenbarError, Result};

/// Status byte acknowledging a command or payload.
pub const ACK_OK: u8 = 0x00;
/// Status byte refusing a command.
pub const ACK_REJECT: u8 = 0x01;

/// Longest command line accepted, including the trailing LF.
pub const MAX_COMMAND_LINE: usize = 1024;

const CMD_RECEIVE_JOB: u8 = 0x02;

const SUB_ABORT: u8 = 0x01;
const SUB_CONTROL_FILE: u8 = 0x02;
const SUB_DATA_FILE: u8 = 0x03;

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// First-level daemon command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonCommand {
    ReceiveJob { queue: String },
}

/// Which file of a job a payload carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Control,
    Data,
}

/// "Receive job" sub-command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubCommand {
    Abort,
    File {
        kind: FileKind,
        len: usize,
        name: String,
    },
}

fn protocol(msg: impl Into<String>) -> GreenbarError {
    GreenbarError::Protocol(msg.into())
}

/// Parse a daemon command line (without its LF).
pub fn parse_daemon_command(line: &[u8]) -> Result<DaemonCommand> {
    let (&code, rest) = line
        .split_first()
        .ok_or_else(|| protocol("empty command line"))?;

    if code != CMD_RECEIVE_JOB {
        return Err(protocol(format!("unsupported daemon command 0x{code:02x}")));
    }

    let queue = std::str::from_utf8(rest)
        .map_err(|_| protocol("queue name is not valid UTF-8"))?
        .trim();
    if queue.is_empty() {
        return Err(protocol("missing queue name"));
    }

    Ok(DaemonCommand::ReceiveJob {
        queue: queue.to_string(),
    })
}

/// Parse a "receive job" sub-command line (without its LF).
///
/// `max_len` bounds the payload size a file sub-command may announce.
pub fn parse_subcommand(line: &[u8], max_len: usize) -> Result<SubCommand> {
    let (&code, rest) = line
        .split_first()
        .ok_or_else(|| protocol("empty sub-command line"))?;

    let kind = match code {
        SUB_ABORT => return Ok(SubCommand::Abort),
        SUB_CONTROL_FILE => FileKind::Control,
        SUB_DATA_FILE => FileKind::Data,
        other => return Err(protocol(format!("unsupported sub-command 0x{other:02x}"))),
    };

    let text = std::str::from_utf8(rest).map_err(|_| protocol("sub-command is not valid UTF-8"))?;
    let (count, name) = text
        .split_once(' ')
        .ok_or_else(|| protocol(format!("malformed file sub-command `{text}`")))?;

    let len: usize = count
        .parse()
        .map_err(|_| protocol(format!("malformed byte count `{count}`")))?;
    if len > max_len {
        return Err(protocol(format!(
            "payload of {len} bytes exceeds the {max_len} byte limit"
        )));
    }

    let name = name.trim();
    if name.is_empty() {
        return Err(protocol("missing file name"));
    }

    Ok(SubCommand::File {
        kind,
        len,
        name: name.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Read one LF-terminated command line, returning it without the LF.
///
/// Returns `Ok(None)` when the peer closed the connection cleanly before
/// sending anything.
pub async fn read_command_line<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let n = reader
        .take(MAX_COMMAND_LINE as u64)
        .read_until(b'\n', &mut line)
        .await?;

    if n == 0 {
        return Ok(None);
    }
    if line.last() != Some(&b'\n') {
        return Err(if n >= MAX_COMMAND_LINE {
            protocol("command line too long")
        } else {
            protocol("connection closed mid-command")
        });
    }

    line.pop();
    Ok(Some(line))
}

/// Read exactly `len` payload bytes followed by the NUL terminator.
pub async fn read_payload<R>(reader: &mut R, len: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; len + 1];
    reader.read_exact(&mut buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            protocol(format!("connection closed before {len} byte payload was complete"))
        } else {
            GreenbarError::Io(e)
        }
    })?;

    if buf.pop() != Some(0) {
        return Err(protocol("payload is missing its NUL terminator"));
    }
    Ok(buf)
}

// ---------------------------------------------------------------------------
// Session state machine
// ---------------------------------------------------------------------------

/// A file received over the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// A job whose control and data files have both arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedJob {
    pub queue: String,
    pub control: ReceivedFile,
    pub data: ReceivedFile,
}

/// Where a connection is in the receive-job exchange.
///
/// Transitions consume the state and return the next one; any transition
/// not listed is a protocol violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the daemon command naming the queue.
    AwaitQueue,
    /// Queue accepted; collecting the job's files in any order.
    AwaitFiles {
        queue: String,
        control: Option<ReceivedFile>,
        data: Option<ReceivedFile>,
    },
    /// Both files received; ready to hand off.
    Complete(ReceivedJob),
}

impl SessionState {
    /// AwaitQueue -> AwaitFiles.
    pub fn queue_accepted(self, queue: impl Into<String>) -> Result<Self> {
        match self {
            Self::AwaitQueue => Ok(Self::AwaitFiles {
                queue: queue.into(),
                control: None,
                data: None,
            }),
            other => Err(unexpected(&other, "queue command")),
        }
    }

    /// AwaitFiles -> AwaitFiles | Complete.
    pub fn file_received(self, kind: FileKind, file: ReceivedFile) -> Result<Self> {
        let (queue, mut control, mut data) = match self {
            Self::AwaitFiles {
                queue,
                control,
                data,
            } => (queue, control, data),
            other => return Err(unexpected(&other, "file")),
        };

        let slot = match kind {
            FileKind::Control => &mut control,
            FileKind::Data => &mut data,
        };
        if slot.is_some() {
            return Err(protocol(format!("second {kind:?} file for the same job")));
        }
        *slot = Some(file);

        Ok(match (control, data) {
            (Some(control), Some(data)) => Self::Complete(ReceivedJob {
                queue,
                control,
                data,
            }),
            (control, data) => Self::AwaitFiles {
                queue,
                control,
                data,
            },
        })
    }

    /// AwaitFiles -> AwaitFiles with everything received so far discarded.
    pub fn aborted(self) -> Result<Self> {
        match self {
            Self::AwaitFiles { queue, .. } => Ok(Self::AwaitFiles {
                queue,
                control: None,
                data: None,
            }),
            other => Err(unexpected(&other, "abort")),
        }
    }

    /// Complete -> (job, AwaitFiles) so the client may send another job.
    ///
    /// Any other state is handed back unchanged.
    pub fn take_job(self) -> std::result::Result<(ReceivedJob, Self), Self> {
        match self {
            Self::Complete(job) => {
                let next = Self::AwaitFiles {
                    queue: job.queue.clone(),
                    control: None,
                    data: None,
                };
                Ok((job, next))
            }
            other => Err(other),
        }
    }

    /// Whether some but not all files of a job have been received.
    pub fn has_partial_job(&self) -> bool {
        matches!(
            self,
            Self::AwaitFiles { control, data, .. } if control.is_some() || data.is_some()
        )
    }
}

fn unexpected(state: &SessionState, event: &str) -> GreenbarError {
    let name = match state {
        SessionState::AwaitQueue => "awaiting queue",
        SessionState::AwaitFiles { .. } => "awaiting files",
        SessionState::Complete(_) => "job complete",
    };
    protocol(format!("unexpected {event} while {name}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    fn file(name: &str, bytes: &[u8]) -> ReceivedFile {
        ReceivedFile {
            name: name.into(),
            bytes: bytes.to_vec(),
        }
    }

    // -- Command parsing ----------------------------------------------------

    #[test]
    fn receive_job_command() {
        let cmd = parse_daemon_command(b"\x02abc123").unwrap();
        assert_eq!(
            cmd,
            DaemonCommand::ReceiveJob {
                queue: "abc123".into()
            }
        );
    }

    #[test]
    fn other_daemon_commands_are_unsupported() {
        for code in [0x01u8, 0x03, 0x04, 0x05, 0x7f] {
            let line = [code, b'q'];
            assert!(matches!(
                parse_daemon_command(&line),
                Err(GreenbarError::Protocol(_))
            ));
        }
        assert!(parse_daemon_command(b"\x02").is_err());
        assert!(parse_daemon_command(b"").is_err());
    }

    #[test]
    fn file_subcommands() {
        assert_eq!(
            parse_subcommand(b"\x0242 cfA001host", 100).unwrap(),
            SubCommand::File {
                kind: FileKind::Control,
                len: 42,
                name: "cfA001host".into()
            }
        );
        assert_eq!(
            parse_subcommand(b"\x030 dfA001host", 100).unwrap(),
            SubCommand::File {
                kind: FileKind::Data,
                len: 0,
                name: "dfA001host".into()
            }
        );
        assert_eq!(parse_subcommand(b"\x01", 100).unwrap(), SubCommand::Abort);
    }

    #[test]
    fn malformed_subcommands_are_rejected() {
        let bad: [&[u8]; 6] = [
            b"\x02abc cfA001host",
            b"\x02-1 cfA001host",
            b"\x0212",
            b"\x0212 ",
            b"\x0512 x",
            b"",
        ];
        for line in bad {
            assert!(parse_subcommand(line, 100).is_err(), "{line:?}");
        }
    }

    #[test]
    fn oversize_payload_is_rejected() {
        let err = parse_subcommand(b"\x03101 dfA001host", 100).unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    // -- Framing --------------------------------------------------------------

    #[tokio::test]
    async fn command_lines_survive_fragmentation() {
        let (mut client, server) = tokio::io::duplex(4);
        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            for chunk in [&b"\x02q"[..], b"ueu", b"e\n\x01", b"\n"] {
                client.write_all(chunk).await.unwrap();
            }
        });

        let mut reader = BufReader::new(server);
        let first = read_command_line(&mut reader).await.unwrap().unwrap();
        assert_eq!(first, b"\x02queue");
        let second = read_command_line(&mut reader).await.unwrap().unwrap();
        assert_eq!(second, b"\x01");
        writer.await.unwrap();
        assert_eq!(read_command_line(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn overlong_command_line_is_rejected() {
        let data = vec![b'a'; MAX_COMMAND_LINE + 10];
        let mut reader = BufReader::new(&data[..]);
        let err = read_command_line(&mut reader).await.unwrap_err();
        assert!(err.to_string().contains("too long"));
    }

    #[tokio::test]
    async fn truncated_command_line_is_rejected() {
        let mut reader = BufReader::new(&b"\x02queue"[..]);
        assert!(read_command_line(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn payload_requires_terminator() {
        let mut ok = &b"hello\0rest"[..];
        assert_eq!(read_payload(&mut ok, 5).await.unwrap(), b"hello");

        let mut missing = &b"hello!"[..];
        assert!(read_payload(&mut missing, 5).await.is_err());

        let mut short = &b"hel"[..];
        let err = read_payload(&mut short, 5).await.unwrap_err();
        assert!(matches!(err, GreenbarError::Protocol(_)));
    }

    // -- State machine ----------------------------------------------------------

    #[test]
    fn files_in_either_order_complete_the_job() {
        for order in [
            [FileKind::Control, FileKind::Data],
            [FileKind::Data, FileKind::Control],
        ] {
            let mut state = SessionState::AwaitQueue.queue_accepted("q").unwrap();
            for kind in order {
                state = state.file_received(kind, file("f", b"x")).unwrap();
            }
            let (job, next) = state.take_job().expect("job complete");
            assert_eq!(job.queue, "q");
            assert!(!next.has_partial_job());
            assert!(matches!(next, SessionState::AwaitFiles { .. }));
        }
    }

    #[test]
    fn abort_discards_partial_job() {
        let state = SessionState::AwaitQueue
            .queue_accepted("q")
            .unwrap()
            .file_received(FileKind::Control, file("cfA", b"Hhost\n"))
            .unwrap();
        assert!(state.has_partial_job());

        let state = state.aborted().unwrap();
        assert!(!state.has_partial_job());
        assert!(state.take_job().is_err());
    }

    #[test]
    fn out_of_order_transitions_are_protocol_errors() {
        assert!(SessionState::AwaitQueue.aborted().is_err());
        assert!(
            SessionState::AwaitQueue
                .file_received(FileKind::Data, file("d", b""))
                .is_err()
        );

        let awaiting = SessionState::AwaitQueue.queue_accepted("q").unwrap();
        assert!(awaiting.clone().queue_accepted("again").is_err());

        let once = awaiting
            .file_received(FileKind::Data, file("d", b"1"))
            .unwrap();
        assert!(once.file_received(FileKind::Data, file("d", b"2")).is_err());
    }
}
