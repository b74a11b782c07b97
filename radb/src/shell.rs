//! Shell execution on a device.
//!
//! `shell:<cmdline>` streams interleaved stdout+stderr until the peer
//! closes, with no framing and no exit code. `shell,v2:<cmdline>` (behind
//! the `shell_v2` feature) multiplexes the streams and reports the exit
//! code in-band; see [`radb_wire::ShellV2Reader`].

use std::time::{Duration, Instant};

use radb_wire::{Error, Result, ShellChunkKind, ShellV2Reader, TcpWire};
use tracing::debug;

use crate::device::{Device, DeviceSocket};

/// Collected output of a shell-v2 command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOutput {
    /// Stdout bytes.
    pub stdout: Vec<u8>,
    /// Stderr bytes.
    pub stderr: Vec<u8>,
    /// The remote process exit code.
    pub exit_code: u8,
}

/// Validates and assembles a remote command line.
///
/// The remote shell splits on spaces, so arguments containing whitespace
/// are wrapped in ASCII double quotes. Arguments that themselves contain a
/// double quote cannot be escaped at all and are rejected.
pub(crate) fn prepare_command_line(cmd: &str, args: &[&str]) -> Result<String> {
    if cmd.chars().all(char::is_whitespace) {
        return Err(Error::Assertion("shell command cannot be blank".to_owned()));
    }

    let mut line = String::from(cmd);
    for (i, arg) in args.iter().enumerate() {
        if arg.contains('"') {
            return Err(Error::Parse(format!(
                "arg at index {i} contains an invalid double quote: {arg}"
            )));
        }
        line.push(' ');
        if arg.contains([' ', '\t', '\x0b']) {
            line.push('"');
            line.push_str(arg);
            line.push('"');
        } else {
            line.push_str(arg);
        }
    }
    Ok(line)
}

impl Device {
    /// Runs `cmd` and returns the raw v1 output stream.
    ///
    /// The caller reads to EOF; stdout and stderr arrive interleaved and
    /// no exit code is reported. No deadline is armed on the stream.
    pub fn shell_stream(&self, cmd: &str, args: &[&str]) -> Result<DeviceSocket> {
        let (mut conn, _request) = self.open_shell(false, cmd, args, None)?;
        conn.set_deadline(None)?;
        Ok(DeviceSocket::new(conn.into_stream()))
    }

    /// Runs `cmd` and collects the v1 output to EOF under the long-command
    /// deadline.
    pub fn shell_output(&self, cmd: &str, args: &[&str]) -> Result<Vec<u8>> {
        self.shell_output_deadline(cmd, args, self.timeout_long())
    }

    /// [`shell_output`](Self::shell_output) with a caller-supplied
    /// whole-operation deadline.
    pub fn shell_output_deadline(
        &self,
        cmd: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let (mut conn, request) = self.open_shell(false, cmd, args, Some(timeout))?;
        conn.read_until_eof(&request)
    }

    /// Runs `cmd` over shell-v2 and returns the lazy chunk decoder.
    ///
    /// The device must advertise the `shell_v2` feature; this library does
    /// not check, the daemon rejects the request if unsupported.
    pub fn shell_v2_stream(&self, cmd: &str, args: &[&str]) -> Result<ShellV2Reader<TcpWire>> {
        let (mut conn, request) = self.open_shell(true, cmd, args, None)?;
        conn.set_deadline(None)?;
        Ok(ShellV2Reader::new(conn.into_stream(), request))
    }

    /// Runs `cmd` over shell-v2 and collects stdout, stderr and the exit
    /// code under the long-command deadline.
    pub fn shell_v2_output(&self, cmd: &str, args: &[&str]) -> Result<ShellOutput> {
        let (conn, request) = self.open_shell(true, cmd, args, Some(self.timeout_long()))?;
        let mut reader = ShellV2Reader::new(conn.into_stream(), request);

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = 0;
        while let Some(chunk) = reader.next_chunk()? {
            match chunk.kind {
                ShellChunkKind::Stdout => stdout.extend(chunk.payload),
                ShellChunkKind::Stderr => stderr.extend(chunk.payload),
                ShellChunkKind::Exit => exit_code = chunk.payload[0],
                ShellChunkKind::Stdin => {}
            }
        }

        Ok(ShellOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    /// Runs `cmd` over shell-v2 and returns stdout, surfacing a non-zero
    /// exit code as [`Error::CommandFailed`].
    pub fn shell_checked(&self, cmd: &str, args: &[&str]) -> Result<Vec<u8>> {
        let output = self.shell_v2_output(cmd, args)?;
        if output.exit_code != 0 {
            return Err(Error::CommandFailed {
                code: output.exit_code,
            });
        }
        Ok(output.stdout)
    }

    /// Transport switch plus the `shell:`/`shell,v2:` request.
    fn open_shell(
        &self,
        v2: bool,
        cmd: &str,
        args: &[&str],
        timeout: Option<Duration>,
    ) -> Result<(radb_wire::Conn<TcpWire>, String)> {
        let line = prepare_command_line(cmd, args)?;
        let request = if v2 {
            format!("shell,v2:{line}")
        } else {
            format!("shell:{line}")
        };

        let deadline = Instant::now() + timeout.unwrap_or(crate::client::SHORT_COMMAND_TIMEOUT);
        let mut conn = self.dial_transport(deadline)?;
        conn.send_message(request.as_bytes())?;
        conn.read_status(&request)?;
        debug!(device = %self.selector(), %request, "shell opened");
        Ok((conn, request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DeviceSelector;
    use crate::testutil::{self, fake_server};
    use radb_wire::encode_chunk;

    #[test]
    fn command_lines_quote_whitespace_args() {
        assert_eq!(prepare_command_line("ls", &[]).unwrap(), "ls");
        assert_eq!(
            prepare_command_line("ls", &["-l", "/sdcard"]).unwrap(),
            "ls -l /sdcard"
        );
        assert_eq!(
            prepare_command_line("echo", &["hello world"]).unwrap(),
            "echo \"hello world\""
        );
        assert_eq!(
            prepare_command_line("echo", &["tab\there", "vt\x0bhere"]).unwrap(),
            "echo \"tab\there\" \"vt\x0bhere\""
        );
    }

    #[test]
    fn blank_command_is_assertion() {
        assert!(matches!(
            prepare_command_line("", &[]),
            Err(Error::Assertion(_))
        ));
        assert!(matches!(
            prepare_command_line(" \t ", &[]),
            Err(Error::Assertion(_))
        ));
    }

    #[test]
    fn double_quoted_arg_is_rejected() {
        assert!(matches!(
            prepare_command_line("echo", &["say \"hi\""]),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn shell_v1_reads_to_eof() {
        // `0009shell:pwd` → OKAY, `/\n`, close.
        let (client, server) = fake_server(|listener| {
            let mut stream = testutil::accept(&listener);
            testutil::expect_transport(&mut stream, "host:transport-any");
            assert_eq!(testutil::read_request(&mut stream), "shell:pwd");
            testutil::write_okay(&mut stream);
            testutil::write_raw(&mut stream, b"/\n");
        });

        let device = client.device(DeviceSelector::Any);
        assert_eq!(device.shell_output("pwd", &[]).unwrap(), b"/\n");
        server.join().unwrap();
    }

    #[test]
    fn cancel_token_interrupts_a_blocked_read() {
        let (client, server) = fake_server(|listener| {
            let mut stream = testutil::accept(&listener);
            testutil::expect_transport(&mut stream, "host:transport-any");
            assert_eq!(testutil::read_request(&mut stream), "shell:sleep 100");
            testutil::write_okay(&mut stream);
            // Never produce output; wait for the client to hang up.
            let mut buf = [0u8; 1];
            use std::io::Read;
            let _ = stream.read(&mut buf);
        });

        let device = client.device(DeviceSelector::Any);
        let mut pipe = device.shell_stream("sleep", &["100"]).unwrap();
        let token = pipe.cancel_token().unwrap();
        let canceler = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            token.cancel();
        });

        assert!(matches!(pipe.read_to_end_vec(), Err(Error::Canceled)));
        canceler.join().unwrap();
        server.join().unwrap();
    }

    #[test]
    fn shell_v2_collects_streams_and_exit_code() {
        let (client, server) = fake_server(|listener| {
            let mut stream = testutil::accept(&listener);
            testutil::expect_transport(&mut stream, "host:transport-any");
            assert_eq!(testutil::read_request(&mut stream), "shell,v2:ls /missing");
            testutil::write_okay(&mut stream);
            testutil::write_raw(&mut stream, &encode_chunk(ShellChunkKind::Stderr, b"ls: /missing: No such file or directory\n"));
            testutil::write_raw(&mut stream, &encode_chunk(ShellChunkKind::Exit, &[1]));
        });

        let device = client.device(DeviceSelector::Any);
        let output = device.shell_v2_output("ls", &["/missing"]).unwrap();
        assert!(output.stdout.is_empty());
        assert!(output.stderr.starts_with(b"ls:"));
        assert_eq!(output.exit_code, 1);
        server.join().unwrap();
    }

    #[test]
    fn shell_checked_surfaces_nonzero_exit() {
        let (client, server) = fake_server(|listener| {
            let mut stream = testutil::accept(&listener);
            testutil::expect_transport(&mut stream, "host:transport-any");
            testutil::read_request(&mut stream);
            testutil::write_okay(&mut stream);
            testutil::write_raw(&mut stream, &encode_chunk(ShellChunkKind::Exit, &[77]));
        });

        let device = client.device(DeviceSelector::Any);
        match device.shell_checked("false", &[]) {
            Err(Error::CommandFailed { code }) => assert_eq!(code, 77),
            other => panic!("expected CommandFailed, got {other:?}"),
        }
        server.join().unwrap();
    }
}
