//! Sink implementations.
//!
//! Grounded on `network/ports/listener.rs` for the framing style and on the
//! `rdkafka`/`zmq` usage in `vectordotdev-vector`'s sink crates.

use crate::error::{CdcError, Result};
use crate::output::Message;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

/// One outbound destination for committed messages. `send_message` may be
/// called from a single writer thread only — implementations need no
/// internal synchronization beyond what they use for their own handle.
pub trait Sink: Send + Sync {
    fn send_message(&self, msg: &Message) -> Result<()>;
}

/// Appends newline-delimited JSON-ish framed payloads to a flat file — payload
/// bytes are opaque to the sink, so framing is just a length-prefixed write.
pub struct FileSink {
    file: Mutex<std::fs::File>,
}

impl FileSink {
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file: Mutex::new(file) })
    }
}

impl Sink for FileSink {
    fn send_message(&self, msg: &Message) -> Result<()> {
        let mut file = self.file.lock().unwrap();
        file.write_all(&msg.header.length.to_le_bytes())?;
        file.write_all(&msg.payload)?;
        file.flush()?;
        Ok(())
    }
}

#[cfg(feature = "kafka")]
pub struct KafkaSink {
    producer: rdkafka::producer::BaseProducer,
    topic: String,
}

#[cfg(feature = "kafka")]
impl KafkaSink {
    pub fn new(brokers: &str, topic: impl Into<String>) -> Result<Self> {
        use rdkafka::config::ClientConfig;
        use rdkafka::producer::Producer;
        let producer: rdkafka::producer::BaseProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .create()
            .map_err(|e| CdcError::Network(e.to_string()))?;
        let _ = producer.client();
        Ok(Self { producer, topic: topic.into() })
    }
}

#[cfg(feature = "kafka")]
impl Sink for KafkaSink {
    fn send_message(&self, msg: &Message) -> Result<()> {
        use rdkafka::producer::{BaseRecord, Producer};
        let key = msg.header.id.to_string();
        let record = BaseRecord::to(&self.topic).payload(&msg.payload).key(&key);
        self.producer
            .send(record)
            .map_err(|(e, _)| CdcError::Transient(e.to_string()))?;
        self.producer.poll(std::time::Duration::from_millis(0));
        Ok(())
    }
}

#[cfg(feature = "zeromq")]
pub struct ZeroMqSink {
    socket: Mutex<zmq::Socket>,
}

#[cfg(feature = "zeromq")]
impl ZeroMqSink {
    pub fn bind(endpoint: &str) -> Result<Self> {
        let ctx = zmq::Context::new();
        let socket = ctx.socket(zmq::PUB).map_err(|e| CdcError::Network(e.to_string()))?;
        socket.bind(endpoint).map_err(|e| CdcError::Network(e.to_string()))?;
        Ok(Self { socket: Mutex::new(socket) })
    }
}

#[cfg(feature = "zeromq")]
impl Sink for ZeroMqSink {
    fn send_message(&self, msg: &Message) -> Result<()> {
        self.socket
            .lock()
            .unwrap()
            .send(&msg.payload, 0)
            .map_err(|e| CdcError::Transient(e.to_string()))
    }
}

/// Plain length-prefixed TCP stream, distinct from the richer Protobuf control-protocol variant
/// below — a client on this socket gets nothing but framed payload bytes,
/// no `INFO`/`START`/`REDO`/`CONFIRM` handshake.
pub struct NetworkSink {
    stream: Mutex<std::net::TcpStream>,
}

impl NetworkSink {
    pub fn connect(addr: &str) -> Result<Self> {
        let stream = std::net::TcpStream::connect(addr).map_err(|e| CdcError::Network(e.to_string()))?;
        Ok(Self { stream: Mutex::new(stream) })
    }
}

impl Sink for NetworkSink {
    fn send_message(&self, msg: &Message) -> Result<()> {
        let mut stream = self.stream.lock().unwrap();
        stream.write_all(&msg.header.length.to_le_bytes()).map_err(|e| CdcError::Transient(e.to_string()))?;
        stream.write_all(&msg.payload).map_err(|e| CdcError::Transient(e.to_string()))?;
        Ok(())
    }
}

/// Protobuf control-protocol variant: a `REDO`-coded frame per
/// payload, as opposed to `NetworkSink`'s raw bytes. The `INFO`/`START`/
/// `CONFIRM` handshake itself lives in `protocol.rs` and in the listener
/// loop that owns this socket; this `Sink` only covers steady-state
/// streaming once `STARTED` has been returned.
pub struct ControlProtocolSink {
    stream: Mutex<std::net::TcpStream>,
}

impl ControlProtocolSink {
    pub fn new(stream: std::net::TcpStream) -> Self {
        Self { stream: Mutex::new(stream) }
    }
}

impl Sink for ControlProtocolSink {
    fn send_message(&self, msg: &Message) -> Result<()> {
        use super::protocol::{encode_response, streaming};
        let frame = encode_response(&streaming(msg.header.scn));
        let mut stream = self.stream.lock().unwrap();
        stream
            .write_all(&(frame.len() as u32).to_be_bytes())
            .map_err(|e| CdcError::Transient(e.to_string()))?;
        stream.write_all(&frame).map_err(|e| CdcError::Transient(e.to_string()))?;
        stream
            .write_all(&(msg.payload.len() as u32).to_be_bytes())
            .map_err(|e| CdcError::Transient(e.to_string()))?;
        stream.write_all(&msg.payload).map_err(|e| CdcError::Transient(e.to_string()))?;
        Ok(())
    }
}

/// No-op sink used by the `STARTED`/`INFO` control-protocol paths that carry
/// no row data, and by tests.
pub struct NullSink;

impl Sink for NullSink {
    fn send_message(&self, _msg: &Message) -> Result<()> {
        Ok(())
    }
}

#[allow(dead_code)]
pub(crate) fn checkpoint_path_for(database: &str, dir: &std::path::Path) -> PathBuf {
    dir.join(format!("{database}-chkpt.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::MessageHeader;
    use crate::scn::Scn;

    #[test]
    fn file_sink_writes_length_prefixed_payload() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out.bin");
        let sink = FileSink::open(&path).unwrap();
        let msg = Message {
            header: MessageHeader {
                id: 1,
                queue_id: 0,
                length: 3,
                scn: Scn(1),
                sequence: 0,
                obj: 1,
                pos: 0,
                allocated: false,
            },
            payload: b"abc".to_vec(),
        };
        sink.send_message(&msg).unwrap();
        let data = std::fs::read(&path).unwrap();
        assert_eq!(data.len(), 4 + 3);
    }

    #[test]
    fn null_sink_accepts_everything() {
        let msg = Message {
            header: MessageHeader {
                id: 1,
                queue_id: 0,
                length: 0,
                scn: Scn(1),
                sequence: 0,
                obj: 1,
                pos: 0,
                allocated: false,
            },
            payload: Vec::new(),
        };
        NullSink.send_message(&msg).unwrap();
    }

    #[test]
    fn network_sink_writes_length_prefixed_frame() {
        use std::io::Read;
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut buf = vec![0u8; 4 + 3];
            conn.read_exact(&mut buf).unwrap();
            buf
        });

        let sink = NetworkSink::connect(&addr.to_string()).unwrap();
        let msg = Message {
            header: MessageHeader {
                id: 1,
                queue_id: 0,
                length: 3,
                scn: Scn(1),
                sequence: 0,
                obj: 1,
                pos: 0,
                allocated: false,
            },
            payload: b"xyz".to_vec(),
        };
        sink.send_message(&msg).unwrap();

        let received = handle.join().unwrap();
        assert_eq!(&received[4..], b"xyz");
    }
}
