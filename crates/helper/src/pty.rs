//! PTY session management for the interactive terminal endpoint (spec
//! §4.3 `/v1/terminal`). The helper owns the PTY end directly (unlike the
//! teacher's container-exec shell, which proxies an existing Docker exec
//! stream) because an LXC shell is spawned fresh for every session.

use std::io::{Read, Write};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};

pub struct PtySession {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    writer: Box<dyn Write + Send>,
}

impl PtySession {
    /// Spawn `pct enter <ctid>` (or an explicit shell command) under a PTY.
    pub fn spawn(ctid: u32, shell: &str, cols: u16, rows: u16) -> anyhow::Result<Self> {
        let pty_system = native_pty_system();
        let pair = pty_system.openpty(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        })?;

        let mut cmd = CommandBuilder::new("pct");
        cmd.arg("exec");
        cmd.arg(ctid.to_string());
        cmd.arg("--");
        cmd.arg(shell);

        let child = pair.slave.spawn_command(cmd)?;
        let writer = pair.master.take_writer()?;

        Ok(Self {
            master: pair.master,
            child,
            writer,
        })
    }

    pub fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        self.master.resize(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        })?;
        Ok(())
    }

    pub fn try_clone_reader(&self) -> anyhow::Result<Box<dyn Read + Send>> {
        Ok(self.master.try_clone_reader()?)
    }

    pub fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(data)
    }

    /// Send End-of-Transmission (0x04) on client disconnect, per spec §4.3.
    pub fn send_eot(&mut self) -> std::io::Result<()> {
        self.writer.write_all(&[0x04])
    }

    pub fn wait(&mut self) -> anyhow::Result<portable_pty::ExitStatus> {
        Ok(self.child.wait()?)
    }
}
