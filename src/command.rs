//! Line based readout and maintenance commands.
//!
//! Replies are single JSON objects followed by a newline. `read_log`
//! additionally streams the raw log bytes after its header.

use core::fmt::Write as _;

#[allow(unused_imports)]
#[cfg(target_os = "none")]
use defmt::{debug, error, info, warn};
use embedded_io_async::{Read, Write};
#[allow(unused_imports)]
#[cfg(not(target_os = "none"))]
use log::{debug, error, info, warn};

use crate::calibration::RangeClass;
use crate::platform::Eeprom;
use crate::store::{Store, StoreError};

/// Longest command line accepted.
pub const MAX_LINE: usize = 128;

const CHUNK: usize = 64;

type Reply = heapless::String<128>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum Command {
    GetStatus,
    ReadLog,
    ClearLog,
    GetCalibration,
}

impl Command {
    pub fn parse(line: &[u8]) -> Option<Self> {
        match line.trim_ascii() {
            b"get_status" => Some(Command::GetStatus),
            b"read_log" => Some(Command::ReadLog),
            b"clear_log" => Some(Command::ClearLog),
            b"get_calibration" => Some(Command::GetCalibration),
            _ => None,
        }
    }
}

/// Collects bytes into lines. `\r` is ignored, `\n` ends a line and lines
/// longer than `N` are dropped whole.
pub struct LineBuffer<const N: usize> {
    buf: heapless::Vec<u8, N>,
    overflowed: bool,
}

impl<const N: usize> LineBuffer<N> {
    pub fn new() -> Self {
        Self {
            buf: heapless::Vec::new(),
            overflowed: false,
        }
    }

    /// Returns true once `c` completed a line, see [`LineBuffer::line`].
    pub fn push(&mut self, c: u8) -> bool {
        match c {
            b'\r' => false,
            b'\n' => {
                if self.overflowed {
                    warn!("command line too long, dropped");
                    self.clear();
                    return false;
                }
                true
            }
            _ => {
                if self.buf.push(c).is_err() {
                    self.overflowed = true;
                }
                false
            }
        }
    }

    pub fn line(&self) -> &[u8] {
        &self.buf
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.overflowed = false;
    }
}

impl<const N: usize> Default for LineBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads commands from `rx` until it reports end of input and answers each on `tx`.
pub async fn serve<D, R, W>(store: &mut Store<D>, rx: &mut R, tx: &mut W) -> Result<(), W::Error>
where
    D: Eeprom,
    R: Read,
    W: Write,
{
    let mut rx_buf = [0_u8; CHUNK];
    let mut line = LineBuffer::<MAX_LINE>::new();
    loop {
        let len = match rx.read(&mut rx_buf).await {
            Ok(0) => return Ok(()),
            Ok(len) => len,
            Err(_) => {
                warn!("command input failed");
                return Ok(());
            }
        };
        for &c in &rx_buf[..len] {
            if line.push(c) {
                handle_command(store, line.line(), tx).await?;
                line.clear();
            }
        }
    }
}

/// Runs one command line and writes its reply.
pub async fn handle_command<D, W>(store: &mut Store<D>, line: &[u8], tx: &mut W) -> Result<(), W::Error>
where
    D: Eeprom,
    W: Write,
{
    let Some(command) = Command::parse(line) else {
        info!("invalid command");
        return send(tx, &error_reply("unknown_command")).await;
    };

    match command {
        Command::GetStatus => send(tx, &status_reply(store)).await,
        Command::ReadLog => read_log(store, tx).await,
        Command::ClearLog => match store.erase_log() {
            Ok(()) => send(tx, "{\"ok\":true}").await,
            Err(e) => send(tx, &error_reply(e.code())).await,
        },
        Command::GetCalibration => match calibration_reply(store) {
            Ok(reply) => send(tx, &reply).await,
            Err(e) => send(tx, &error_reply(e.code())).await,
        },
    }
}

async fn read_log<D: Eeprom, W: Write>(store: &mut Store<D>, tx: &mut W) -> Result<(), W::Error> {
    if let Err(e) = store.ensure_ready() {
        return send(tx, &error_reply(e.code())).await;
    }
    let length = store.log_cursor();
    let mut reply = Reply::new();
    let _ = write!(reply, "{{\"length\":{}}}", length);
    send(tx, &reply).await?;

    let mut buf = [0_u8; CHUNK];
    let mut read: u32 = 0;
    while read < length {
        let n = match store.read_log(read, &mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                error!("log readout stopped at {}: {}", read, e.code());
                break;
            }
        };
        tx.write_all(&buf[..n]).await?;
        read += n as u32;
    }
    tx.flush().await
}

fn status_reply<D: Eeprom>(store: &mut Store<D>) -> Reply {
    let mut reply = Reply::new();
    let _ = write!(
        reply,
        "{{\"state\":\"{}\",\"log_used\":{},\"log_size\":{}",
        store.state().as_str(),
        store.log_cursor(),
        store.log_capacity()
    );
    if let (Ok(range), Ok(max_g)) = (store.configured_range(), store.max_g()) {
        let range = RangeClass::from_code(range).unwrap_or(RangeClass::DEFAULT);
        let _ = write!(
            reply,
            ",\"range\":{},\"max_g\":{}.{}",
            range.full_scale_g(),
            max_g.whole(),
            max_g.tenths()
        );
    }
    let _ = reply.push('}');
    reply
}

fn calibration_reply<D: Eeprom>(store: &mut Store<D>) -> Result<Reply, StoreError<D::Error>> {
    let record = store.calibration_record()?;
    let [x, y, z] = record.bias;
    let mut reply = Reply::new();
    let _ = write!(
        reply,
        "{{\"bias\":[{},{},{}],\"range\":{},\"max_g\":{}.{}}}",
        x,
        y,
        z,
        record.range_class().full_scale_g(),
        record.max_g.whole(),
        record.max_g.tenths()
    );
    Ok(reply)
}

fn error_reply(code: &str) -> Reply {
    let mut reply = Reply::new();
    let _ = write!(reply, "{{\"error\":\"{}\"}}", code);
    reply
}

async fn send<W: Write>(tx: &mut W, reply: &str) -> Result<(), W::Error> {
    tx.write_all(reply.as_bytes()).await?;
    tx.write_all(b"\n").await?;
    tx.flush().await
}

#[cfg(test)]
mod tests {
    use core::convert::Infallible;

    use embassy_futures::block_on;

    use super::*;
    use crate::calibration::MaxG;
    use crate::config::StoreConfig;
    use crate::platform::native::{MockEeprom, MockFault};

    #[derive(Default)]
    struct Sink {
        written: Vec<u8>,
    }

    impl embedded_io_async::ErrorType for Sink {
        type Error = Infallible;
    }

    impl Write for Sink {
        async fn write(&mut self, buf: &[u8]) -> Result<usize, Infallible> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        async fn flush(&mut self) -> Result<(), Infallible> {
            Ok(())
        }
    }

    struct Source<'a> {
        data: &'a [u8],
    }

    impl embedded_io_async::ErrorType for Source<'_> {
        type Error = Infallible;
    }

    impl Read for Source<'_> {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Infallible> {
            // short reads so lines span several packets
            let n = buf.len().min(self.data.len()).min(5);
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    fn ready_store() -> Store<MockEeprom> {
        let mut store = Store::new(MockEeprom::default(), StoreConfig::default());
        store.init().unwrap();
        store
    }

    fn run(store: &mut Store<MockEeprom>, line: &str) -> String {
        let mut sink = Sink::default();
        block_on(handle_command(store, line.as_bytes(), &mut sink)).unwrap();
        String::from_utf8_lossy(&sink.written).into_owned()
    }

    #[test]
    fn parse_commands() {
        assert_eq!(Command::parse(b"get_status"), Some(Command::GetStatus));
        assert_eq!(Command::parse(b"  read_log "), Some(Command::ReadLog));
        assert_eq!(Command::parse(b"clear_log"), Some(Command::ClearLog));
        assert_eq!(Command::parse(b"get_calibration"), Some(Command::GetCalibration));
        assert_eq!(Command::parse(b"read_flash"), None);
        assert_eq!(Command::parse(b""), None);
    }

    #[test]
    fn line_buffer_splits_and_drops_long_lines() {
        let mut line = LineBuffer::<8>::new();
        let mut lines = Vec::new();
        for &c in b"abc\r\nthis is too long\nok\n" {
            if line.push(c) {
                lines.push(line.line().to_vec());
                line.clear();
            }
        }
        assert_eq!(lines, vec![b"abc".to_vec(), b"ok".to_vec()]);
    }

    #[test]
    fn status_reports_state_and_log_usage() {
        let mut store = ready_store();
        store.set_max_g(MaxG::from_byte(0x73)).unwrap();
        for v in [1, 2] {
            while !store.append_byte(v).unwrap().is_accepted() {}
        }
        let mut store = Store::new(store.release().restart(), StoreConfig::default());
        store.init().unwrap();

        assert_eq!(
            run(&mut store, "get_status"),
            "{\"state\":\"ready\",\"log_used\":2,\"log_size\":1014,\"range\":2,\"max_g\":7.3}\n"
        );
    }

    #[test]
    fn status_before_init_omits_fields() {
        let mut store = Store::new(MockEeprom::default(), StoreConfig::default());
        assert_eq!(
            run(&mut store, "get_status"),
            "{\"state\":\"uninitialized\",\"log_used\":0,\"log_size\":1014}\n"
        );
    }

    #[test]
    fn read_log_streams_header_and_bytes() {
        let mut store = ready_store();
        let mut appended = 0_u8;
        while appended < 3 {
            if store.append_byte(0x41 + appended).unwrap().is_accepted() {
                appended += 1;
            }
        }
        store.write_byte(9, 0).unwrap();
        assert_eq!(run(&mut store, "read_log"), "{\"length\":3}\nABC");
    }

    #[test]
    fn clear_log_and_calibration() {
        let mut store = ready_store();
        store.set_calibration_bias([12, -5, 300]).unwrap();
        while !store.append_byte(7).unwrap().is_accepted() {}

        assert_eq!(run(&mut store, "clear_log"), "{\"ok\":true}\n");
        assert_eq!(store.log_cursor(), 0);
        assert_eq!(
            run(&mut store, "get_calibration"),
            "{\"bias\":[12,-5,300],\"range\":2,\"max_g\":0.0}\n"
        );
    }

    #[test]
    fn errors_are_reported_as_json() {
        let mut store = ready_store();
        assert_eq!(run(&mut store, "format_disk"), "{\"error\":\"unknown_command\"}\n");

        let mut eeprom = store.release();
        eeprom.inject_fault(Some(MockFault::NotPresent));
        let mut store = Store::new(eeprom, StoreConfig::default());
        assert!(store.init().is_err());
        assert_eq!(run(&mut store, "get_calibration"), "{\"error\":\"unavailable\"}\n");
        assert_eq!(run(&mut store, "read_log"), "{\"error\":\"unavailable\"}\n");
    }

    #[test]
    fn serve_answers_every_line() {
        let mut store = ready_store();
        let mut rx = Source {
            data: b"clear_log\r\nnope\nget_status\n",
        };
        let mut tx = Sink::default();
        block_on(serve(&mut store, &mut rx, &mut tx)).unwrap();
        let out = String::from_utf8(tx.written).unwrap();
        let replies: Vec<&str> = out.lines().collect();
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0], "{\"ok\":true}");
        assert_eq!(replies[1], "{\"error\":\"unknown_command\"}");
        assert!(replies[2].starts_with("{\"state\":\"ready\""));
    }
}
