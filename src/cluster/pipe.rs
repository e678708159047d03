use std::io::{self, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver, Sender};

use super::Role;

const BARRIER_ACK: u8 = 0xA5;
const BARRIER_RELEASE: u8 = 0x5A;

#[derive(Debug, thiserror::Error)]
pub enum PipeError {
    #[error("cluster pipe I/O failed: {0}")]
    Io(#[from] io::Error),
    /// Participant 0 is the master, slaves count from 1.
    #[error("participant {participant} left the cluster")]
    Disconnected { participant: usize },
    #[error("expected a barrier byte, found {found:#04x}")]
    BarrierMismatch { found: u8 },
}

/// Ordered one-to-many byte channel between the master and its slaves.
///
/// The master writes, every slave reads the same bytes in the same order.
/// Writes are buffered until [`finish_message`](Self::finish_message).
pub trait MulticastPipe: Read + Write + Send {
    fn role(&self) -> Role;

    /// Number of slaves; 0 on a slave endpoint.
    fn num_slaves(&self) -> usize;

    /// Sends everything written so far. No-op on slaves.
    fn finish_message(&mut self) -> Result<(), PipeError>;

    /// Blocks until every participant has reached the barrier.
    fn barrier(&mut self) -> Result<(), PipeError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Stream pipe
// ─────────────────────────────────────────────────────────────────────────────

enum Endpoint<S> {
    Master { slaves: Vec<S>, buffer: Vec<u8> },
    Slave { master: BufReader<S> },
}

/// Multicast pipe over one ordered byte stream per slave.
pub struct StreamPipe<S> {
    endpoint: Endpoint<S>,
}

impl<S: Read + Write + Send> StreamPipe<S> {
    #[must_use]
    pub fn master(slaves: Vec<S>) -> Self {
        Self {
            endpoint: Endpoint::Master {
                slaves,
                buffer: Vec::new(),
            },
        }
    }

    #[must_use]
    pub fn slave(master: S) -> Self {
        Self {
            endpoint: Endpoint::Slave {
                master: BufReader::new(master),
            },
        }
    }
}

impl StreamPipe<TcpStream> {
    /// Accepts `num_slaves` connections on `addr`.
    pub fn listen(addr: impl ToSocketAddrs, num_slaves: usize) -> Result<Self, PipeError> {
        let listener = TcpListener::bind(addr)?;
        log::info!(
            "waiting for {num_slaves} slaves on {}",
            listener.local_addr()?
        );
        let mut slaves = Vec::with_capacity(num_slaves);
        while slaves.len() < num_slaves {
            let (stream, peer) = listener.accept()?;
            stream.set_nodelay(true)?;
            log::debug!("slave {} connected from {peer}", slaves.len() + 1);
            slaves.push(stream);
        }
        Ok(Self::master(slaves))
    }

    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, PipeError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self::slave(stream))
    }
}

fn wrong_role(operation: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{operation} is not possible on this end of the cluster pipe"),
    )
}

fn send_to(slave: &mut impl Write, participant: usize, bytes: &[u8]) -> Result<(), PipeError> {
    slave
        .write_all(bytes)
        .and_then(|()| slave.flush())
        .map_err(|err| match err.kind() {
            io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => {
                PipeError::Disconnected { participant }
            }
            _ => PipeError::Io(err),
        })
}

fn receive_byte(stream: &mut impl Read, participant: usize) -> Result<u8, PipeError> {
    let mut byte = [0u8; 1];
    match stream.read_exact(&mut byte) {
        Ok(()) => Ok(byte[0]),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
            Err(PipeError::Disconnected { participant })
        }
        Err(err) => Err(err.into()),
    }
}

impl<S: Read + Write + Send> MulticastPipe for StreamPipe<S> {
    fn role(&self) -> Role {
        match self.endpoint {
            Endpoint::Master { .. } => Role::Master,
            Endpoint::Slave { .. } => Role::Slave,
        }
    }

    fn num_slaves(&self) -> usize {
        match &self.endpoint {
            Endpoint::Master { slaves, .. } => slaves.len(),
            Endpoint::Slave { .. } => 0,
        }
    }

    fn finish_message(&mut self) -> Result<(), PipeError> {
        let Endpoint::Master { slaves, buffer } = &mut self.endpoint else {
            return Ok(());
        };
        if buffer.is_empty() {
            return Ok(());
        }
        log::debug!("pipe: {} bytes to {} slaves", buffer.len(), slaves.len());
        for (i, slave) in slaves.iter_mut().enumerate() {
            send_to(slave, i + 1, buffer)?;
        }
        buffer.clear();
        Ok(())
    }

    fn barrier(&mut self) -> Result<(), PipeError> {
        self.finish_message()?;
        match &mut self.endpoint {
            Endpoint::Master { slaves, .. } => {
                for (i, slave) in slaves.iter_mut().enumerate() {
                    let found = receive_byte(slave, i + 1)?;
                    if found != BARRIER_ACK {
                        return Err(PipeError::BarrierMismatch { found });
                    }
                }
                for (i, slave) in slaves.iter_mut().enumerate() {
                    send_to(slave, i + 1, &[BARRIER_RELEASE])?;
                }
            }
            Endpoint::Slave { master } => {
                send_to(master.get_mut(), 0, &[BARRIER_ACK])?;
                let found = receive_byte(master, 0)?;
                if found != BARRIER_RELEASE {
                    return Err(PipeError::BarrierMismatch { found });
                }
            }
        }
        Ok(())
    }
}

impl<S: Read> Read for StreamPipe<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.endpoint {
            Endpoint::Slave { master } => master.read(buf),
            Endpoint::Master { .. } => Err(wrong_role("reading")),
        }
    }
}

impl<S> Write for StreamPipe<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.endpoint {
            Endpoint::Master { buffer, .. } => {
                buffer.extend_from_slice(buf);
                Ok(buf.len())
            }
            Endpoint::Slave { .. } => Err(wrong_role("writing")),
        }
    }

    /// Buffered bytes only leave with `finish_message`.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-process channel streams
// ─────────────────────────────────────────────────────────────────────────────

/// One end of an in-memory duplex byte stream.
pub struct ChannelStream {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    chunk: Vec<u8>,
    pos: usize,
}

impl ChannelStream {
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();
        (
            Self {
                tx: a_tx,
                rx: a_rx,
                chunk: Vec::new(),
                pos: 0,
            },
            Self {
                tx: b_tx,
                rx: b_rx,
                chunk: Vec::new(),
                pos: 0,
            },
        )
    }
}

impl Read for ChannelStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.chunk.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                // Peer dropped: end of stream.
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.chunk.len() - self.pos);
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Write for ChannelStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub type ChannelPipe = StreamPipe<ChannelStream>;

/// A master pipe and `num_slaves` slave pipes connected in memory.
#[must_use]
pub fn channel_group(num_slaves: usize) -> (ChannelPipe, Vec<ChannelPipe>) {
    let (master_ends, slave_ends): (Vec<_>, Vec<_>) =
        (0..num_slaves).map(|_| ChannelStream::pair()).unzip();
    (
        StreamPipe::master(master_ends),
        slave_ends.into_iter().map(StreamPipe::slave).collect(),
    )
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn slaves_read_what_the_master_finished() {
        let (mut master, slaves) = channel_group(2);
        let readers: Vec<_> = slaves
            .into_iter()
            .map(|mut slave| {
                thread::spawn(move || {
                    let mut text = [0u8; 11];
                    slave.read_exact(&mut text).expect("read");
                    slave.barrier().expect("barrier");
                    text
                })
            })
            .collect();

        master.write_all(b"hello ").expect("write");
        master.write_all(b"world").expect("write");
        master.finish_message().expect("finish");
        master.barrier().expect("barrier");
        for reader in readers {
            assert_eq!(&reader.join().expect("join"), b"hello world");
        }
    }

    #[test]
    fn writes_stay_buffered_until_finished() {
        let (mut master, mut slaves) = channel_group(1);
        master.write_all(b"x").expect("write");
        drop(master);
        let mut rest = Vec::new();
        slaves[0].read_to_end(&mut rest).expect("read");
        assert!(rest.is_empty());
    }

    #[test]
    fn roles_are_enforced() {
        let (mut master, mut slaves) = channel_group(1);
        assert_eq!(master.role(), Role::Master);
        assert_eq!(master.num_slaves(), 1);
        assert_eq!(slaves[0].role(), Role::Slave);
        assert!(master.read(&mut [0u8; 1]).is_err());
        assert!(slaves[0].write(b"x").is_err());
    }

    #[test]
    fn barrier_notices_a_missing_slave() {
        let (mut master, slaves) = channel_group(1);
        drop(slaves);
        match master.barrier() {
            Err(PipeError::Disconnected { participant: 1 }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
