use std::ffi::CStr;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::thread;
use std::time::Duration;

use crate::error::Error;
use crate::sample::Sample;

use super::{cpu_label, ResultSink};

/// Largest datagram we send: one Ethernet MTU.
pub const DATAGRAM_BUDGET: usize = 1500;

/// Pause between datagrams so the receiver is not flooded.
pub const PACING: Duration = Duration::from_millis(1);

/// Publishes samples as InfluxDB line protocol over UDP:
/// `jitter,host=<host>,cpu=<cpu> latency=<delay> <timestamp>`.
pub struct InfluxSink {
    socket: UdpSocket,
    target: SocketAddr,
    hostname: String,
    pacing: Duration,
}

impl InfluxSink {
    /// Resolves `host:port` and binds an ephemeral local socket.
    pub fn connect(host: &str, port: u16) -> Result<Self, Error> {
        let target = (host, port)
            .to_socket_addrs()
            .map_err(|e| Error::InvalidArgs(format!("cannot resolve {}:{}: {}", host, port, e)))?
            .next()
            .ok_or_else(|| Error::InvalidArgs(format!("{} resolved to no address", host)))?;

        let bind: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind)?;

        Ok(Self {
            socket,
            target,
            hostname: local_hostname(),
            pacing: PACING,
        })
    }

    #[cfg(test)]
    fn with_hostname(mut self, hostname: &str) -> Self {
        self.hostname = hostname.to_string();
        self
    }
}

impl ResultSink for InfluxSink {
    fn publish(&mut self, samples: &[Sample], cpu: Option<usize>) -> Result<(), Error> {
        let datagrams = encode_batches(&self.hostname, &cpu_label(cpu), samples, DATAGRAM_BUDGET);
        log::debug!(
            "sending {} samples in {} datagrams to {}",
            samples.len(),
            datagrams.len(),
            self.target
        );
        for datagram in &datagrams {
            self.socket
                .send_to(datagram.as_bytes(), self.target)
                .map_err(|e| Error::Publish(format!("udp send to {} failed: {}", self.target, e)))?;
            thread::sleep(self.pacing);
        }
        Ok(())
    }
}

fn encode_line(host: &str, cpu: &str, s: &Sample) -> String {
    format!(
        "jitter,host={},cpu={} latency={} {}\n",
        host, cpu, s.delay, s.timestamp
    )
}

/// Packs lines into datagrams of at most `budget` bytes. A line longer than
/// the budget on its own still goes out, alone.
fn encode_batches(host: &str, cpu: &str, samples: &[Sample], budget: usize) -> Vec<String> {
    let mut batches = Vec::new();
    let mut current = String::new();
    for s in samples {
        let line = encode_line(host, cpu, s);
        if !current.is_empty() && current.len() + line.len() > budget {
            batches.push(std::mem::take(&mut current));
        }
        current.push_str(&line);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Tag values may not contain spaces, commas or equals signs unescaped.
fn escape_tag(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ' ' | ',' | '=') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn local_hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: buf is writable for its full length.
    let ret = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if ret != 0 {
        log::warn!(
            "gethostname failed: {}, reporting as \"unknown\"",
            std::io::Error::last_os_error()
        );
        return "unknown".into();
    }
    // the kernel may not terminate a truncated name
    buf[buf.len() - 1] = 0;
    let name = CStr::from_bytes_until_nul(&buf)
        .map(|c| c.to_string_lossy().into_owned())
        .unwrap_or_default();
    escape_tag(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(n: i64) -> Vec<Sample> {
        (0..n)
            .map(|i| Sample {
                timestamp: 1_700_000_000_000_000_000 + i * 1_000_000_000,
                delay: 1000 + i,
            })
            .collect()
    }

    #[test]
    fn test_encode_line() {
        let line = encode_line("box", "3", &Sample { timestamp: 42, delay: 1500 });
        assert_eq!(line, "jitter,host=box,cpu=3 latency=1500 42\n");
    }

    #[test]
    fn test_batches_respect_budget() {
        let data = samples(200);
        let batches = encode_batches("host-a", "2", &data, DATAGRAM_BUDGET);
        assert!(batches.len() > 1);
        for b in &batches {
            assert!(b.len() <= DATAGRAM_BUDGET, "datagram of {} bytes", b.len());
            assert!(b.ends_with('\n'));
        }
        // every sample exactly once, in order
        let joined: String = batches.concat();
        let expected: String = data.iter().map(|s| encode_line("host-a", "2", s)).collect();
        assert_eq!(joined, expected);
    }

    #[test]
    fn test_oversized_line_sent_alone() {
        let data = samples(3);
        let batches = encode_batches("h", "0", &data, 10);
        assert_eq!(batches.len(), 3);
    }

    #[test]
    fn test_no_samples_no_datagrams() {
        assert!(encode_batches("h", "0", &[], DATAGRAM_BUDGET).is_empty());
    }

    #[test]
    fn test_escape_tag() {
        assert_eq!(escape_tag("plain-host"), "plain-host");
        assert_eq!(escape_tag("a b,c=d"), "a\\ b\\,c\\=d");
    }

    #[test]
    fn test_hostname_not_empty() {
        assert!(!local_hostname().is_empty());
    }

    #[test]
    fn test_publish_over_loopback() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let mut sink = InfluxSink::connect("127.0.0.1", port)
            .unwrap()
            .with_hostname("testbox");
        let data = samples(100);
        sink.publish(&data, None).unwrap();

        let expected_datagrams = encode_batches("testbox", "-1", &data, DATAGRAM_BUDGET).len();
        let mut received = String::new();
        let mut buf = [0u8; 2048];
        for _ in 0..expected_datagrams {
            let (n, _) = receiver.recv_from(&mut buf).unwrap();
            assert!(n <= DATAGRAM_BUDGET);
            received.push_str(std::str::from_utf8(&buf[..n]).unwrap());
        }

        let lines: Vec<&str> = received.lines().collect();
        assert_eq!(lines.len(), 100);
        assert_eq!(
            lines[0],
            "jitter,host=testbox,cpu=-1 latency=1000 1700000000000000000"
        );
    }
}
